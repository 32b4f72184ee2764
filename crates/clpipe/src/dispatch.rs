//! Kernel argument binding and N-dimensional dispatch.
//!
//! Arguments are bound by position. Submission returns a
//! [`PendingDispatch`]; the only way to learn the kernel finished (and how
//! long it took) is [`PendingDispatch::wait`]. Dropping a pending dispatch
//! without waiting blocks until the device is done with it.

use std::fmt;
use std::time::{Duration, Instant};

use bytemuck::Pod;
use tracing::{debug, warn};

use crate::backend::{Backend, CompletionEvent, EventStatus, NdRange, Scalar};
use crate::buffer::DeviceBuffer;
use crate::context::ExecutionContext;
use crate::error::{status, Result, RuntimeError};

// ── Arguments ───────────────────────────────────────────────────────────────

/// A value that can be bound to a kernel parameter.
pub enum KernelArg<'a, B: Backend> {
    Buffer { raw: &'a B::Buffer, context: &'a B::Context },
    Scalar(Scalar),
}

impl<'a, 'c: 'a, B: Backend, T: Pod> From<&'a DeviceBuffer<'c, B, T>> for KernelArg<'a, B> {
    fn from(buffer: &'a DeviceBuffer<'c, B, T>) -> Self {
        Self::Buffer { raw: buffer.raw(), context: buffer.owner_context() }
    }
}

impl<B: Backend> From<Scalar> for KernelArg<'_, B> {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

macro_rules! scalar_arg {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl<B: Backend> From<$ty> for KernelArg<'_, B> {
                fn from(value: $ty) -> Self {
                    Self::Scalar(Scalar::$variant(value))
                }
            }
        )*
    };
}

scalar_arg!(u32 => U32, i32 => I32, u64 => U64, f32 => F32, f64 => F64);

// ── Kernel ──────────────────────────────────────────────────────────────────

/// A named entry point extracted from a built program.
pub struct Kernel<'c, B: Backend> {
    ctx: &'c ExecutionContext<'c, B>,
    raw: B::Kernel,
    name: String,
    bound: Vec<bool>,
}

impl<'c, B: Backend> Kernel<'c, B> {
    pub(crate) fn new(
        ctx: &'c ExecutionContext<'c, B>,
        raw: B::Kernel,
        name: &str,
        arity: u32,
    ) -> Self {
        Self { ctx, raw, name: name.to_owned(), bound: vec![false; arity as usize] }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parameters in the kernel signature.
    pub fn arity(&self) -> u32 {
        self.bound.len() as u32
    }

    /// Indices of parameters not yet bound.
    pub fn unbound_args(&self) -> Vec<u32> {
        self.bound
            .iter()
            .enumerate()
            .filter(|(_, set)| !**set)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Bind parameter `index`.
    ///
    /// # Errors
    ///
    /// `CL_INVALID_ARG_INDEX` past the last parameter, `CL_INVALID_CONTEXT`
    /// for a buffer from another context, or whatever the runtime reports for
    /// a value that does not fit the parameter.
    pub fn set_arg<'a>(
        &mut self,
        index: u32,
        arg: impl Into<KernelArg<'a, B>>,
    ) -> Result<&mut Self>
    where
        B: 'a,
    {
        if index as usize >= self.bound.len() {
            return Err(RuntimeError::new(
                "clSetKernelArg",
                status::CL_INVALID_ARG_INDEX,
                format!("kernel '{}' takes {} argument(s), got index {index}", self.name, self.arity()),
            )
            .into());
        }

        let backend = self.ctx.backend();
        match arg.into() {
            KernelArg::Buffer { raw, context } => {
                if !std::ptr::eq(context, self.ctx.raw_context()) {
                    return Err(RuntimeError::new(
                        "clSetKernelArg",
                        status::CL_INVALID_CONTEXT,
                        "buffer belongs to a different execution context",
                    )
                    .into());
                }
                backend.set_buffer_arg(&mut self.raw, index, raw)?;
            }
            KernelArg::Scalar(value) => backend.set_scalar_arg(&mut self.raw, index, value)?,
        }
        self.bound[index as usize] = true;
        Ok(self)
    }
}

impl<B: Backend> fmt::Debug for Kernel<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("arity", &self.bound.len())
            .field("unbound", &self.unbound_args())
            .finish_non_exhaustive()
    }
}

// ── Submission ──────────────────────────────────────────────────────────────

fn validate_range(range: &NdRange, max_items: [usize; 3], max_group: usize) -> Result<()> {
    let op = "clEnqueueNDRangeKernel";
    if range.global.contains(&0) {
        return Err(RuntimeError::new(
            op,
            status::CL_INVALID_GLOBAL_WORK_SIZE,
            format!("global size {range} has a zero dimension"),
        )
        .into());
    }
    let Some(local) = range.local else {
        return Ok(());
    };

    for dim in 0..3 {
        if local[dim] == 0 || range.global[dim] % local[dim] != 0 {
            return Err(RuntimeError::new(
                op,
                status::CL_INVALID_WORK_GROUP_SIZE,
                format!("local size does not divide global size in {range}"),
            )
            .into());
        }
        if local[dim] > max_items[dim] {
            return Err(RuntimeError::new(
                op,
                status::CL_INVALID_WORK_ITEM_SIZE,
                format!(
                    "local size {} exceeds device limit {} in dimension {dim}",
                    local[dim], max_items[dim]
                ),
            )
            .into());
        }
    }

    match local.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n)) {
        Some(group) if group <= max_group => Ok(()),
        Some(group) => Err(RuntimeError::new(
            op,
            status::CL_INVALID_WORK_GROUP_SIZE,
            format!("work-group of {group} exceeds device maximum {max_group}"),
        )
        .into()),
        None => Err(RuntimeError::new(
            op,
            status::CL_INVALID_WORK_GROUP_SIZE,
            format!("work-group size of {range} overflows"),
        )
        .into()),
    }
}

impl<'b, B: Backend> ExecutionContext<'b, B> {
    /// Submit `kernel` over `range`.
    pub fn enqueue(&self, kernel: &Kernel<'_, B>, range: NdRange) -> Result<PendingDispatch<'_, B>> {
        self.enqueue_after(kernel, range, &[])
    }

    /// Submit `kernel` over `range` once every event in `wait_list` has
    /// completed.
    ///
    /// # Errors
    ///
    /// `CL_INVALID_KERNEL_ARGS` if any parameter is unbound; range validation
    /// errors; anything the runtime reports on submission.
    pub fn enqueue_after(
        &self,
        kernel: &Kernel<'_, B>,
        range: NdRange,
        wait_list: &[&B::Event],
    ) -> Result<PendingDispatch<'_, B>> {
        let op = "clEnqueueNDRangeKernel";
        if !std::ptr::eq(kernel.ctx.raw_context(), self.raw_context()) {
            return Err(RuntimeError::new(
                op,
                status::CL_INVALID_CONTEXT,
                format!("kernel '{}' was built in a different execution context", kernel.name),
            )
            .into());
        }

        let unbound = kernel.unbound_args();
        if !unbound.is_empty() {
            return Err(RuntimeError::new(
                op,
                status::CL_INVALID_KERNEL_ARGS,
                format!("kernel '{}' has unbound argument(s) {unbound:?}", kernel.name),
            )
            .into());
        }

        let device = self.device();
        validate_range(&range, device.max_work_item_sizes, device.max_work_group_size)?;
        let work_items = range.work_items().ok_or_else(|| {
            RuntimeError::new(
                op,
                status::CL_INVALID_GLOBAL_WORK_SIZE,
                format!("work-item count of {range} overflows"),
            )
        })?;

        let submitted = Instant::now();
        let event = self.backend().enqueue_kernel(self.raw_queue(), &kernel.raw, &range, wait_list)?;
        debug!("Enqueued '{}' over {} ({} work items)", kernel.name, range, work_items);

        Ok(PendingDispatch {
            event,
            waited: false,
            kernel: kernel.name.clone(),
            range,
            work_items,
            submitted,
            _ctx: std::marker::PhantomData,
        })
    }
}

/// A submitted kernel launch that has not been observed to complete.
#[must_use = "a dispatch must be waited on before its results are used"]
pub struct PendingDispatch<'c, B: Backend> {
    event: B::Event,
    waited: bool,
    kernel: String,
    range: NdRange,
    work_items: usize,
    submitted: Instant,
    _ctx: std::marker::PhantomData<&'c ExecutionContext<'c, B>>,
}

impl<B: Backend> PendingDispatch<'_, B> {
    /// Completion handle, for use in another command's wait list.
    pub fn event(&self) -> &B::Event {
        &self.event
    }

    /// Non-blocking status query.
    pub fn status(&self) -> Result<EventStatus> {
        self.event.status()
    }

    /// Block until the kernel has completed.
    pub fn wait(mut self) -> Result<CompletedDispatch> {
        self.waited = true;
        self.event.wait()?;
        let wall = self.submitted.elapsed();
        let device = self.event.profiled_duration();
        debug!("'{}' completed in {:?} (device: {:?})", self.kernel, wall, device);

        Ok(CompletedDispatch {
            kernel: std::mem::take(&mut self.kernel),
            range: self.range,
            work_items: self.work_items,
            wall,
            device,
        })
    }
}

impl<B: Backend> Drop for PendingDispatch<'_, B> {
    fn drop(&mut self) {
        if self.waited {
            return;
        }
        if let Err(e) = self.event.wait() {
            warn!("Dispatch of '{}' dropped while pending; wait failed: {e}", self.kernel);
        }
    }
}

impl<B: Backend> fmt::Debug for PendingDispatch<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDispatch")
            .field("kernel", &self.kernel)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

/// Timing of a completed kernel launch.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedDispatch {
    pub kernel: String,
    pub range: NdRange,
    pub work_items: usize,
    /// Host wall clock from submission to observed completion.
    pub wall: Duration,
    /// Device execution time, when the queue has profiling enabled.
    pub device: Option<Duration>,
}

impl CompletedDispatch {
    pub fn elapsed_ms(&self) -> f64 {
        self.wall.as_secs_f64() * 1e3
    }

    pub fn device_ms(&self) -> Option<f64> {
        self.device.map(|d| d.as_secs_f64() * 1e3)
    }
}
