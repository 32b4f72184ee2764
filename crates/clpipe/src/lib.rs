//! Host-side compute pipeline for OpenCL-style accelerators.
//!
//! A run selects the first available GPU with double-precision support,
//! binds it to a context and an in-order queue, compiles kernel source at
//! runtime, allocates device buffers, dispatches one N-dimensional launch and
//! reads the results back for verification.
//!
//! - [`device`]: platform/device enumeration and the capability predicate
//! - [`context`]: one device, one context, one in-order queue
//! - [`program`]: runtime compilation with the build log surfaced on failure
//! - [`buffer`]: typed device buffers, copied from the host or uninitialised
//! - [`dispatch`]: positional arguments, N-D submission, completion handles
//! - [`collect`]: blocking and non-blocking read-back, result verification
//! - [`pipeline`]: the stages above in sequence, driven by [`PipelineConfig`]
//!
//! Every stage is generic over [`Backend`]. [`sim::SimulatedBackend`] runs
//! entirely in-process; the OpenCL runtime backend is behind the `opencl`
//! feature.

pub mod backend;
pub mod buffer;
pub mod collect;
pub mod config;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod kernels;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod pipeline;
pub mod program;
pub mod sim;

pub use backend::{AccessMode, Backend, CompletionEvent, EventStatus, NdRange, Scalar};
pub use buffer::DeviceBuffer;
pub use collect::{verify_uniform, verify_with, PendingRead};
pub use config::{InputPattern, PipelineConfig, PipelineConfigBuilder, Preset, ReportMode, WorkSize};
pub use context::{ContextOptions, ExecutionContext};
pub use device::{
    enumerate_devices, find_device, format_device_info, DeviceInfo, DeviceRequirements,
    DiscoveredDevice, SelectedDevice,
};
pub use dispatch::{CompletedDispatch, Kernel, KernelArg, PendingDispatch};
pub use error::{
    CompilationError, DiscoveryError, Error, Result, RuntimeError, VerificationFailure,
};
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;
pub use pipeline::{run, NullObserver, RunObserver, RunReport};
pub use program::{KernelSource, Program};
pub use sim::{SimDeviceSpec, SimPlatformSpec, SimTopology, SimulatedBackend};
