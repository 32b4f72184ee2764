//! clpipe command-line host.
//!
//! Runs the compute pipeline once on the selected runtime and reports the
//! outcome through stdout (results) and stderr (logs, diagnostics), with the
//! exit code distinguishing verification failures from everything else.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use clpipe::{
    enumerate_devices, run, Backend, DeviceRequirements, NullObserver, SimulatedBackend,
};
use clpipe_cli::args::{BackendKind, Cli, Commands, DevicesArgs, RunArgs};
use clpipe_cli::exit::{self, EXIT_SUCCESS};
use clpipe_cli::output::{emit_json, render_devices, DeviceRow, OutputFormat, TextObserver};

fn main() {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let result = dispatch(&cli);
    let code = match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            debug!("Command failed: {}", e);

            // Show error chain
            let mut source = e.source();
            while let Some(err) = source {
                debug!("  Caused by: {}", err);
                source = err.source();
            }

            eprintln!("error: {e:#}");
            exit::code_for(&e)
        }
    };
    std::process::exit(code);
}

/// Logs go to stderr so stdout stays the result channel.
fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn dispatch(cli: &Cli) -> Result<()> {
    let kind = cli.backend.unwrap_or_else(BackendKind::default_for_build);
    debug!("Using {:?} backend", kind);
    match kind {
        BackendKind::Sim => {
            let backend = SimulatedBackend::from_topology(cli.sim_topology);
            execute(&backend, &cli.command)
        }
        #[cfg(feature = "opencl")]
        BackendKind::OpenCl => execute(&clpipe::OpenClBackend::new(), &cli.command),
        #[cfg(not(feature = "opencl"))]
        BackendKind::OpenCl => anyhow::bail!(
            "this build of clpipe has no OpenCL support; rebuild with `--features opencl` or use `--backend sim`"
        ),
    }
}

fn execute<B: Backend>(backend: &B, command: &Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run_command(backend, args),
        Commands::Devices(args) => devices_command(backend, args),
    }
}

fn run_command<B: Backend>(backend: &B, args: &RunArgs) -> Result<()> {
    let config = args.to_config()?;
    let mut stdout = io::stdout().lock();

    match args.format {
        OutputFormat::Text => {
            let mut observer = TextObserver::new(&mut stdout, config.report);
            let outcome = run(backend, &config, &mut observer);
            if let Ok(report) = &outcome {
                observer.summary(report);
            }
            observer.finish().context("failed to write results")?;
            outcome?;
        }
        OutputFormat::Json => {
            let report = run(backend, &config, &mut NullObserver)?;
            emit_json(&mut stdout, &report)?;
        }
    }
    Ok(())
}

fn devices_command<B: Backend>(backend: &B, args: &DevicesArgs) -> Result<()> {
    let requirements = DeviceRequirements::double_precision();
    let rows: Vec<DeviceRow> = enumerate_devices(backend)?
        .into_iter()
        .map(|device| {
            let qualifies = requirements.matches(&device.info);
            DeviceRow::new(device, qualifies)
        })
        .collect();

    let mut stdout = io::stdout().lock();
    match args.format {
        OutputFormat::Text => stdout.write_all(render_devices(&rows).as_bytes())?,
        OutputFormat::Json => emit_json(&mut stdout, &rows)?,
    }
    Ok(())
}
