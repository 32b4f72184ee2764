//! The seam between the pipeline stages and a concrete compute runtime.
//!
//! The pipeline components ([`crate::device`], [`crate::context`],
//! [`crate::program`], [`crate::buffer`], [`crate::dispatch`],
//! [`crate::collect`]) are written once against [`Backend`]. Two
//! implementations exist: the OpenCL runtime (`opencl` feature) and the
//! in-process [`crate::sim::SimulatedBackend`].
//!
//! Backend methods are thin: they translate one runtime call and report its
//! status. Ordering, argument bookkeeping and scoped release live in the
//! generic layers above.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::error::Result;

// ── Handle vocabulary ───────────────────────────────────────────────────────

/// How a kernel may access a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Whether kernels may store to a buffer with this mode.
    pub fn kernel_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    /// Whether kernels may load from a buffer with this mode.
    pub fn kernel_readable(self) -> bool {
        !matches!(self, Self::WriteOnly)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::WriteOnly => write!(f, "write-only"),
            Self::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// A by-value kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    /// OpenCL C spelling of the argument type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::U32(_) => "uint",
            Self::I32(_) => "int",
            Self::U64(_) => "ulong",
            Self::F32(_) => "float",
            Self::F64(_) => "double",
        }
    }

    /// Argument size in bytes, as `clSetKernelArg` expects it.
    pub fn size(&self) -> usize {
        match self {
            Self::U32(_) | Self::I32(_) | Self::F32(_) => 4,
            Self::U64(_) | Self::F64(_) => 8,
        }
    }
}

/// An N-dimensional index space for one kernel launch.
///
/// Always expressed as three dimensions; unused dimensions are `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdRange {
    pub global: [usize; 3],
    pub local: Option<[usize; 3]>,
}

impl NdRange {
    /// A one-dimensional range of `n` work items, `(n, 1, 1)`.
    pub fn linear(n: usize) -> Self {
        Self { global: [n, 1, 1], local: None }
    }

    pub fn new(global: [usize; 3]) -> Self {
        Self { global, local: None }
    }

    /// Set an explicit work-group shape.
    #[must_use]
    pub fn with_local(mut self, local: [usize; 3]) -> Self {
        self.local = Some(local);
        self
    }

    /// Total work items, or `None` on overflow.
    pub fn work_items(&self) -> Option<usize> {
        self.global.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

impl fmt::Display for NdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.global;
        write!(f, "{x}x{y}x{z}")?;
        if let Some([lx, ly, lz]) = self.local {
            write!(f, " (local {lx}x{ly}x{lz})")?;
        }
        Ok(())
    }
}

/// Execution status of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    /// Terminated abnormally with the given (negative) status code.
    Error(i32),
}

impl EventStatus {
    /// Whether the command has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }
}

/// Completion handle for one submitted operation.
pub trait CompletionEvent {
    /// Block the calling thread until the operation completes.
    fn wait(&self) -> Result<()>;

    /// Non-blocking status query.
    fn status(&self) -> Result<EventStatus>;

    /// Device-side execution time. `None` unless the queue was created with
    /// profiling enabled and the command has completed.
    fn profiled_duration(&self) -> Option<Duration>;
}

// ── Backend ─────────────────────────────────────────────────────────────────

/// A compute runtime able to run the pipeline.
///
/// All handles are owned values; releasing them is their `Drop`.
pub trait Backend {
    type Platform;
    type Device: Clone;
    type Context;
    type Queue;
    type Program;
    type Kernel;
    type Buffer;
    type Event: CompletionEvent;

    /// Short identifier used in logs and reports.
    fn name(&self) -> &'static str;

    // Discovery

    fn platforms(&self) -> Result<Vec<Self::Platform>>;
    fn platform_name(&self, platform: &Self::Platform) -> Result<String>;
    fn gpu_devices(&self, platform: &Self::Platform) -> Result<Vec<Self::Device>>;
    /// Query device attributes. `platform_name` on the result may be left
    /// empty; the enumerator fills it.
    fn device_info(&self, device: &Self::Device) -> Result<DeviceInfo>;

    // Context

    fn create_context(&self, device: &Self::Device) -> Result<Self::Context>;
    /// Create an in-order queue. `device` must be the device the context was
    /// created from.
    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        profiling: bool,
    ) -> Result<Self::Queue>;

    // Compilation

    /// Build `source` for `device`. A rejected build must be reported as
    /// [`crate::error::CompilationError::BuildFailed`] carrying the log.
    fn build_program(
        &self,
        context: &Self::Context,
        device: &Self::Device,
        source: &str,
        options: &str,
    ) -> Result<(Self::Program, String)>;
    fn kernel_names(&self, program: &Self::Program) -> Result<Vec<String>>;
    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel>;
    fn kernel_arg_count(&self, kernel: &Self::Kernel) -> Result<u32>;

    // Memory

    /// Allocate `size` bytes. When `host` is given its contents are copied
    /// into the new buffer before this returns.
    fn create_buffer(
        &self,
        context: &Self::Context,
        access: AccessMode,
        size: usize,
        host: Option<&[u8]>,
    ) -> Result<Self::Buffer>;

    // Dispatch

    fn set_buffer_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        buffer: &Self::Buffer,
    ) -> Result<()>;
    fn set_scalar_arg(&self, kernel: &mut Self::Kernel, index: u32, value: Scalar) -> Result<()>;
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        range: &NdRange,
        wait_list: &[&Self::Event],
    ) -> Result<Self::Event>;

    /// Copy `dst.len()` bytes starting at `offset` out of `buffer`.
    ///
    /// # Safety
    ///
    /// When `blocking` is false the runtime writes into `dst` after this
    /// call returns. The memory behind `dst` must stay allocated and must
    /// not be accessed until the returned event has completed.
    unsafe fn enqueue_read(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        blocking: bool,
        offset: usize,
        dst: &mut [u8],
        wait_list: &[&Self::Event],
    ) -> Result<Self::Event>;

    /// Block until every command submitted to `queue` has completed.
    fn finish(&self, queue: &Self::Queue) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_range_pads_unused_dimensions() {
        let r = NdRange::linear(32);
        assert_eq!(r.global, [32, 1, 1]);
        assert_eq!(r.local, None);
        assert_eq!(r.work_items(), Some(32));
        assert_eq!(r.to_string(), "32x1x1");
    }

    #[test]
    fn work_items_detects_overflow() {
        let r = NdRange::new([usize::MAX, 2, 1]);
        assert_eq!(r.work_items(), None);
    }

    #[test]
    fn range_display_includes_local_shape() {
        let r = NdRange::linear(64).with_local([16, 1, 1]);
        assert_eq!(r.to_string(), "64x1x1 (local 16x1x1)");
    }

    #[test]
    fn access_modes() {
        assert!(!AccessMode::ReadOnly.kernel_writable());
        assert!(AccessMode::ReadOnly.kernel_readable());
        assert!(AccessMode::WriteOnly.kernel_writable());
        assert!(!AccessMode::WriteOnly.kernel_readable());
        assert!(AccessMode::ReadWrite.kernel_writable());
        assert_eq!(AccessMode::ReadWrite.to_string(), "read-write");
    }

    #[test]
    fn scalar_sizes_match_opencl_c() {
        assert_eq!(Scalar::F64(1.0).size(), 8);
        assert_eq!(Scalar::U32(1).size(), 4);
        assert_eq!(Scalar::F32(1.0).type_name(), "float");
    }
}
