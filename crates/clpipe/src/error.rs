//! Error taxonomy for the compute pipeline.
//!
//! Every stage reports failure as a value. The categories mirror the
//! pipeline stages so callers (and the CLI exit-code mapping) can tell an
//! infrastructure problem from a wrong answer:
//!
//! - [`DiscoveryError`]: no platform, or no device satisfying the predicate
//! - [`CompilationError`]: the runtime compiler rejected the source, or the
//!   requested entry point does not exist
//! - [`RuntimeError`]: any other non-success status from the compute runtime
//! - [`VerificationFailure`]: the kernel ran but produced unexpected values

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Verification(#[from] VerificationFailure),

    /// The kernel source file could not be read.
    #[error("failed to read kernel source {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Pipeline configuration rejected before any device work started.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config { reason: reason.into() }
    }

    /// Whether the pipeline ran to completion but produced wrong values.
    pub fn is_verification(&self) -> bool {
        matches!(self, Self::Verification(_))
    }

    /// Short machine-readable category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::Compilation(_) => "compilation",
            Self::Runtime(_) => "runtime",
            Self::Verification(_) => "verification",
            Self::Source { .. } => "source",
            Self::Config { .. } => "config",
        }
    }
}

// ── Discovery ───────────────────────────────────────────────────────────────

/// Device discovery failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The runtime reported no platforms (or the platform query itself failed).
    #[error("OpenCL platforms not found")]
    NoPlatforms,

    /// Platforms exist but none of their GPUs satisfies the requirements.
    #[error("no available GPU with {requirement} found ({inspected} GPU(s) inspected)")]
    NoQualifyingDevice { requirement: String, inspected: usize },
}

// ── Compilation ─────────────────────────────────────────────────────────────

/// Program build or kernel lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    /// The runtime compiler rejected the source. `log` is the compiler output
    /// exactly as the driver produced it.
    #[error("OpenCL compilation error on {device} ({})\n{log}", code_name(.code))]
    BuildFailed { device: String, code: i32, log: String },

    /// The program built but does not define the requested entry point.
    #[error("kernel entry point '{name}' not found (program defines: {})", list_or_none(.available))]
    EntryPointNotFound { name: String, available: Vec<String> },
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

// ── Runtime ─────────────────────────────────────────────────────────────────

/// A compute runtime call returned a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "OpenCL error: {operation} failed with {} ({code}){}",
    code_name(.code),
    detail(.message)
)]
pub struct RuntimeError {
    /// The runtime operation that failed, e.g. `clEnqueueNDRangeKernel`.
    pub operation: &'static str,
    /// Numeric status code as defined by the OpenCL headers.
    pub code: i32,
    pub message: String,
}

fn detail(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(": {message}")
    }
}

impl RuntimeError {
    pub fn new(operation: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self { operation, code, message: message.into() }
    }

    /// A status-only error with no additional detail.
    pub fn status(operation: &'static str, code: i32) -> Self {
        Self::new(operation, code, "")
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// Read-back values did not match the expected results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "verification failed: {mismatches} of {total} results differ; \
     first at [{first_index}]: expected {expected}, got {actual}"
)]
pub struct VerificationFailure {
    pub total: usize,
    pub mismatches: usize,
    pub first_index: usize,
    pub expected: String,
    pub actual: String,
}

// ── Status codes ────────────────────────────────────────────────────────────

/// OpenCL status codes produced or interpreted by this crate.
pub mod status {
    pub const CL_SUCCESS: i32 = 0;
    pub const CL_DEVICE_NOT_FOUND: i32 = -1;
    pub const CL_DEVICE_NOT_AVAILABLE: i32 = -2;
    pub const CL_MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const CL_OUT_OF_RESOURCES: i32 = -5;
    pub const CL_OUT_OF_HOST_MEMORY: i32 = -6;
    pub const CL_BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: i32 = -14;
    pub const CL_INVALID_VALUE: i32 = -30;
    pub const CL_INVALID_PLATFORM: i32 = -32;
    pub const CL_INVALID_DEVICE: i32 = -33;
    pub const CL_INVALID_CONTEXT: i32 = -34;
    pub const CL_INVALID_COMMAND_QUEUE: i32 = -36;
    pub const CL_INVALID_MEM_OBJECT: i32 = -38;
    pub const CL_INVALID_PROGRAM: i32 = -44;
    pub const CL_INVALID_PROGRAM_EXECUTABLE: i32 = -45;
    pub const CL_INVALID_KERNEL_NAME: i32 = -46;
    pub const CL_INVALID_KERNEL: i32 = -48;
    pub const CL_INVALID_ARG_INDEX: i32 = -49;
    pub const CL_INVALID_ARG_VALUE: i32 = -50;
    pub const CL_INVALID_ARG_SIZE: i32 = -51;
    pub const CL_INVALID_KERNEL_ARGS: i32 = -52;
    pub const CL_INVALID_WORK_DIMENSION: i32 = -53;
    pub const CL_INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const CL_INVALID_WORK_ITEM_SIZE: i32 = -55;
    pub const CL_INVALID_EVENT_WAIT_LIST: i32 = -57;
    pub const CL_INVALID_EVENT: i32 = -58;
    pub const CL_INVALID_OPERATION: i32 = -59;
    pub const CL_INVALID_BUFFER_SIZE: i32 = -61;
    pub const CL_INVALID_GLOBAL_WORK_SIZE: i32 = -63;
    pub const CL_PLATFORM_NOT_FOUND_KHR: i32 = -1001;
}

fn code_name(code: &i32) -> &'static str {
    status_name(*code)
}

/// Symbolic name of an OpenCL status code.
pub fn status_name(code: i32) -> &'static str {
    use status::*;
    match code {
        CL_SUCCESS => "CL_SUCCESS",
        CL_DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
        CL_DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
        CL_MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        CL_OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
        CL_OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
        CL_BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
        CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
            "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
        }
        CL_INVALID_VALUE => "CL_INVALID_VALUE",
        CL_INVALID_PLATFORM => "CL_INVALID_PLATFORM",
        CL_INVALID_DEVICE => "CL_INVALID_DEVICE",
        CL_INVALID_CONTEXT => "CL_INVALID_CONTEXT",
        CL_INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
        CL_INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
        CL_INVALID_PROGRAM => "CL_INVALID_PROGRAM",
        CL_INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
        CL_INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
        CL_INVALID_KERNEL => "CL_INVALID_KERNEL",
        CL_INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
        CL_INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
        CL_INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
        CL_INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
        CL_INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
        CL_INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
        CL_INVALID_WORK_ITEM_SIZE => "CL_INVALID_WORK_ITEM_SIZE",
        CL_INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
        CL_INVALID_EVENT => "CL_INVALID_EVENT",
        CL_INVALID_OPERATION => "CL_INVALID_OPERATION",
        CL_INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
        CL_INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
        CL_PLATFORM_NOT_FOUND_KHR => "CL_PLATFORM_NOT_FOUND_KHR",
        _ => "unknown status",
    }
}
