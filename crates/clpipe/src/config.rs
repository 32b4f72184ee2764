//! Pipeline configuration.
//!
//! A [`PipelineConfig`] describes one run: which kernel to compile, how many
//! work items to launch and what the host should do with the results. It is
//! assembled with [`PipelineConfigBuilder`], usually starting from a
//! [`Preset`], and validated before any device work starts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::device::{DeviceInfo, DeviceRequirements};
use crate::error::{Error, Result};
use crate::kernels;
use crate::program::KernelSource;

// ── WorkSize ────────────────────────────────────────────────────────────────

/// How many work items the kernel is launched over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkSize {
    /// A fixed element count.
    Fixed(usize),
    /// The product of the device's max work-item sizes.
    ///
    /// This ties the problem size to the device's launch geometry and can be
    /// very large (1024 x 1024 x 64 is 67M elements); it exists to reproduce
    /// that sizing, not as a sensible default.
    DeviceMax,
}

impl WorkSize {
    /// Element count for `device`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the device-max product overflows `usize`.
    pub fn resolve(&self, device: &DeviceInfo) -> Result<usize> {
        match *self {
            Self::Fixed(n) => Ok(n),
            Self::DeviceMax => {
                let n = device
                    .max_work_item_sizes
                    .iter()
                    .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                    .ok_or_else(|| {
                        Error::config(format!(
                            "device-max work size {} overflows",
                            device.max_dimensions()
                        ))
                    })?;
                warn!(
                    "Sizing the run to the device maximum: {} work items ({})",
                    n,
                    device.max_dimensions()
                );
                Ok(n)
            }
        }
    }
}

impl FromStr for WorkSize {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device-max" | "max" => Ok(Self::DeviceMax),
            other => other
                .parse::<usize>()
                .map(Self::Fixed)
                .map_err(|_| format!("invalid work size '{s}'. Expected a count or 'device-max'")),
        }
    }
}

impl fmt::Display for WorkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::DeviceMax => write!(f, "device-max"),
        }
    }
}

// ── ReportMode / InputPattern ───────────────────────────────────────────────

/// What the host reports after verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMode {
    /// Every element, one `[i]: v` line each.
    Elements,
    /// Count and timing only.
    #[default]
    Summary,
}

impl FromStr for ReportMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elements" => Ok(Self::Elements),
            "summary" => Ok(Self::Summary),
            other => Err(format!("unknown report mode '{other}'. Expected one of: elements, summary")),
        }
    }
}

impl fmt::Display for ReportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elements => write!(f, "elements"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

/// Host input values: every element of `a` and `b` is filled with these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputPattern {
    pub a: f64,
    pub b: f64,
}

impl Default for InputPattern {
    fn default() -> Self {
        Self { a: 1.0, b: 2.0 }
    }
}

impl InputPattern {
    /// Value every output element must hold.
    pub fn expected(&self) -> f64 {
        self.a + self.b
    }
}

// ── Preset ──────────────────────────────────────────────────────────────────

/// Ready-made configurations for the bundled kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// `main_kernel` over 32 elements, every element reported.
    #[default]
    Main,
    /// `hello_kernel` sized to the device maximum.
    Hello,
    /// `sandbox` sized to the device maximum.
    Sandbox,
}

impl Preset {
    pub fn kernel_name(self) -> &'static str {
        match self {
            Self::Main => "main_kernel",
            Self::Hello => "hello_kernel",
            Self::Sandbox => "sandbox",
        }
    }

    pub fn source(self) -> KernelSource {
        match self {
            Self::Main => kernels::MAIN,
            Self::Hello => kernels::HELLO,
            Self::Sandbox => kernels::SANDBOX,
        }
    }

    pub fn work_size(self) -> WorkSize {
        match self {
            Self::Main => WorkSize::Fixed(32),
            Self::Hello | Self::Sandbox => WorkSize::DeviceMax,
        }
    }

    pub fn report(self) -> ReportMode {
        match self {
            Self::Main => ReportMode::Elements,
            Self::Hello | Self::Sandbox => ReportMode::Summary,
        }
    }

    /// A builder pre-filled with this preset.
    pub fn builder(self) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
            .kernel_name(self.kernel_name())
            .source(self.source())
            .work_size(self.work_size())
            .report(self.report())
    }
}

impl FromStr for Preset {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Ok(Self::Main),
            "hello" => Ok(Self::Hello),
            "sandbox" => Ok(Self::Sandbox),
            other => Err(format!("unknown preset '{other}'. Expected one of: main, hello, sandbox")),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Hello => write!(f, "hello"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

// ── PipelineConfig ──────────────────────────────────────────────────────────

/// Everything one pipeline run needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub kernel_name: String,
    pub source: KernelSource,
    pub work_size: WorkSize,
    /// Work-group size along dimension 0; `None` lets the runtime choose.
    pub local_size: Option<usize>,
    pub build_options: String,
    pub requirements: DeviceRequirements,
    pub profiling: bool,
    pub inputs: InputPattern,
    pub report: ReportMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            kernel_name: Preset::Main.kernel_name().to_owned(),
            source: Preset::Main.source(),
            work_size: Preset::Main.work_size(),
            local_size: None,
            build_options: String::new(),
            requirements: DeviceRequirements::double_precision(),
            profiling: false,
            inputs: InputPattern::default(),
            report: Preset::Main.report(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.kernel_name.trim().is_empty() {
            return Err(Error::config("kernel name must not be empty"));
        }
        if self.kernel_name.chars().any(char::is_whitespace) {
            return Err(Error::config(format!(
                "kernel name '{}' must be a single identifier",
                self.kernel_name
            )));
        }
        if self.work_size == WorkSize::Fixed(0) {
            return Err(Error::config("work size must be greater than zero"));
        }
        if self.local_size == Some(0) {
            return Err(Error::config("local size must be greater than zero"));
        }
        if let (WorkSize::Fixed(n), Some(local)) = (self.work_size, self.local_size) {
            if n % local != 0 {
                return Err(Error::config(format!(
                    "local size {local} does not divide work size {n}"
                )));
            }
        }
        if !self.inputs.a.is_finite() || !self.inputs.b.is_finite() {
            return Err(Error::config("input values must be finite"));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kernel_name(mut self, name: impl Into<String>) -> Self {
        self.config.kernel_name = name.into();
        self
    }

    pub fn source(mut self, source: KernelSource) -> Self {
        self.config.source = source;
        self
    }

    pub fn source_file(self, path: impl Into<PathBuf>) -> Self {
        self.source(KernelSource::File(path.into()))
    }

    pub fn work_size(mut self, work_size: WorkSize) -> Self {
        self.config.work_size = work_size;
        self
    }

    pub fn local_size(mut self, local_size: Option<usize>) -> Self {
        self.config.local_size = local_size;
        self
    }

    pub fn build_options(mut self, options: impl Into<String>) -> Self {
        self.config.build_options = options.into();
        self
    }

    pub fn requirements(mut self, requirements: DeviceRequirements) -> Self {
        self.config.requirements = requirements;
        self
    }

    pub fn profiling(mut self, enabled: bool) -> Self {
        self.config.profiling = enabled;
        self
    }

    pub fn inputs(mut self, inputs: InputPattern) -> Self {
        self.config.inputs = inputs;
        self
    }

    pub fn report(mut self, report: ReportMode) -> Self {
        self.config.report = report;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
