//! Execution context: one selected device, its compute context and a single
//! in-order command queue.
//!
//! Everything created afterwards (programs, buffers, pending dispatches)
//! borrows the context, so none of it can outlive the context or mix handles
//! from two different contexts.

use tracing::{debug, info};

use crate::backend::Backend;
use crate::device::{DeviceInfo, SelectedDevice};
use crate::error::Result;

/// Options applied when the context and queue are created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextOptions {
    /// Create the queue with profiling enabled so completed commands report
    /// device-side execution time.
    pub profiling: bool,
}

/// A device bound to a context and an in-order queue.
pub struct ExecutionContext<'b, B: Backend> {
    backend: &'b B,
    // Field order is drop order: the queue is released before the context.
    queue: B::Queue,
    context: B::Context,
    device: SelectedDevice<B::Device>,
    options: ContextOptions,
}

impl<'b, B: Backend> ExecutionContext<'b, B> {
    /// Create a context and queue for the selected device.
    ///
    /// Both are created from the same device handle the enumerator returned.
    pub fn create(
        backend: &'b B,
        device: SelectedDevice<B::Device>,
        options: ContextOptions,
    ) -> Result<Self> {
        let context = backend.create_context(&device.handle)?;
        debug!("Created context on '{}'", device.info.name);

        let queue = backend.create_queue(&context, &device.handle, options.profiling)?;
        info!(
            "Execution context ready on '{}' (backend: {}, profiling: {})",
            device.info.name,
            backend.name(),
            options.profiling
        );

        Ok(Self { backend, queue, context, device, options })
    }

    pub fn backend(&self) -> &'b B {
        self.backend
    }

    /// Attributes of the bound device.
    pub fn device(&self) -> &DeviceInfo {
        &self.device.info
    }

    pub fn device_handle(&self) -> &B::Device {
        &self.device.handle
    }

    pub fn options(&self) -> ContextOptions {
        self.options
    }

    /// The backend's context handle.
    pub fn raw_context(&self) -> &B::Context {
        &self.context
    }

    /// The backend's queue handle.
    pub fn raw_queue(&self) -> &B::Queue {
        &self.queue
    }

    /// Block until everything submitted so far has completed.
    pub fn finish(&self) -> Result<()> {
        self.backend.finish(&self.queue)
    }
}

impl<B: Backend> std::fmt::Debug for ExecutionContext<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("backend", &self.backend.name())
            .field("device", &self.device.info.name)
            .field("profiling", &self.options.profiling)
            .finish_non_exhaustive()
    }
}
