//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clpipe::{PipelineConfig, Preset, ReportMode, SimTopology, WorkSize};

use crate::output::OutputFormat;

/// clpipe - run one compute kernel on the first double-precision GPU
#[derive(Debug, Parser)]
#[command(name = "clpipe")]
#[command(about = "Select a GPU, compile a kernel at runtime, dispatch it and verify the results")]
#[command(long_about = r#"
clpipe selects the first available GPU with double-precision support, compiles
an OpenCL C kernel at runtime, launches it once over an N-dimensional range and
reads the results back for verification.

Examples:
  # Add two 32-element vectors and print every result
  clpipe run

  # Size the launch to the device's maximum work-item dimensions
  clpipe run --preset hello

  # Compile your own kernel file
  clpipe run --source my_kernel.cl --kernel my_add --work-size 1024

  # Show every GPU and whether it qualifies
  clpipe devices
"#)]
#[command(version)]
pub struct Cli {
    /// Compute runtime to use
    #[arg(long, value_enum, env = "CLPIPE_BACKEND", global = true)]
    pub backend: Option<BackendKind>,

    /// Platform layout of the simulated runtime
    #[arg(
        long,
        value_name = "TOPOLOGY",
        env = "CLPIPE_SIM_TOPOLOGY",
        default_value_t = SimTopology::Standard,
        global = true
    )]
    pub sim_topology: SimTopology,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pipeline once
    Run(RunArgs),

    /// List every GPU and whether it qualifies
    #[command(alias = "ls")]
    Devices(DevicesArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// System OpenCL runtime
    #[value(name = "opencl")]
    OpenCl,
    /// In-process simulated runtime
    Sim,
}

impl BackendKind {
    /// The runtime used when none is requested.
    pub fn default_for_build() -> Self {
        if cfg!(feature = "opencl") {
            Self::OpenCl
        } else {
            Self::Sim
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Starting configuration; other flags override it
    #[arg(long, default_value_t = Preset::Main)]
    pub preset: Preset,

    /// Kernel entry point
    #[arg(long, value_name = "NAME")]
    pub kernel: Option<String>,

    /// Kernel source file, compiled at runtime
    #[arg(long, value_name = "PATH")]
    pub source: Option<PathBuf>,

    /// Number of work items, or "device-max"
    #[arg(long, value_name = "N")]
    pub work_size: Option<WorkSize>,

    /// Work-group size along dimension 0
    #[arg(long, value_name = "N")]
    pub local_size: Option<usize>,

    /// Options passed to the kernel compiler
    #[arg(long, value_name = "STR", allow_hyphen_values = true)]
    pub build_options: Option<String>,

    /// Enable queue profiling and report device time
    #[arg(long)]
    pub profile: bool,

    /// Print every element or only a summary
    #[arg(long, value_name = "MODE")]
    pub report: Option<ReportMode>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl RunArgs {
    /// The pipeline configuration these flags describe.
    pub fn to_config(&self) -> clpipe::Result<PipelineConfig> {
        let mut builder = self.preset.builder().local_size(self.local_size).profiling(self.profile);
        if let Some(kernel) = &self.kernel {
            builder = builder.kernel_name(kernel.clone());
        }
        if let Some(path) = &self.source {
            builder = builder.source_file(path.clone());
        }
        if let Some(work_size) = self.work_size {
            builder = builder.work_size(work_size);
        }
        if let Some(options) = &self.build_options {
            builder = builder.build_options(options.clone());
        }
        if let Some(report) = self.report {
            builder = builder.report(report);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Args)]
pub struct DevicesArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clpipe::KernelSource;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("clpipe").chain(args.iter().copied())).unwrap()
    }

    fn run_args(cli: Cli) -> RunArgs {
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_reproduce_main_preset() {
        let config = run_args(parse(&["run"])).to_config().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn flags_override_the_preset() {
        let args = run_args(parse(&[
            "run",
            "--preset",
            "hello",
            "--kernel",
            "my_add",
            "--source",
            "k.cl",
            "--work-size",
            "64",
            "--local-size",
            "16",
            "--build-options",
            "-cl-std=CL1.2",
            "--profile",
            "--report",
            "elements",
        ]));
        let config = args.to_config().unwrap();
        assert_eq!(config.kernel_name, "my_add");
        assert_eq!(config.source, KernelSource::File("k.cl".into()));
        assert_eq!(config.work_size, WorkSize::Fixed(64));
        assert_eq!(config.local_size, Some(16));
        assert_eq!(config.build_options, "-cl-std=CL1.2");
        assert!(config.profiling);
        assert_eq!(config.report, ReportMode::Elements);
    }

    #[test]
    fn device_max_is_accepted() {
        let args = run_args(parse(&["run", "--work-size", "device-max"]));
        assert_eq!(args.work_size, Some(WorkSize::DeviceMax));
    }

    #[test]
    fn invalid_values_are_rejected_by_the_parser() {
        for bad in [
            &["run", "--preset", "nope"][..],
            &["run", "--work-size", "lots"],
            &["run", "--format", "yaml"],
            &["--sim-topology", "weird", "devices"],
            &["--backend", "cuda", "run"],
        ] {
            let argv = std::iter::once("clpipe").chain(bad.iter().copied());
            assert!(Cli::try_parse_from(argv).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn inconsistent_flags_fail_validation() {
        let args = run_args(parse(&["run", "--work-size", "10", "--local-size", "4"]));
        assert_eq!(args.to_config().unwrap_err().category(), "config");
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = parse(&["devices", "--backend", "sim", "--sim-topology", "mixed"]);
        assert_eq!(cli.backend, Some(BackendKind::Sim));
        assert_eq!(cli.sim_topology, SimTopology::Mixed);
    }
}
