//! [`Backend`] implementation over the system OpenCL runtime via `opencl3`.
//!
//! Handles are the `opencl3` RAII wrappers, so releasing them happens on
//! drop in reverse order of creation as long as [`ExecutionContext`] owns
//! them.
//!
//! [`ExecutionContext`]: crate::context::ExecutionContext

use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::time::Duration;

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_GPU};
use opencl3::error_codes::ClError;
use opencl3::event::Event;
use opencl3::kernel::Kernel;
use opencl3::memory::{
    Buffer, ClMem, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY,
};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_event, cl_mem_flags, CL_BLOCKING, CL_NON_BLOCKING};
use tracing::debug;

use crate::backend::{AccessMode, Backend, CompletionEvent, EventStatus, NdRange, Scalar};
use crate::device::DeviceInfo;
use crate::error::{status, CompilationError, Result, RuntimeError};

// CL_QUEUED .. CL_COMPLETE as reported by CL_EVENT_COMMAND_EXECUTION_STATUS.
const CL_COMPLETE: i32 = 0;
const CL_RUNNING: i32 = 1;
const CL_SUBMITTED: i32 = 2;

fn cl_err(operation: &'static str) -> impl FnOnce(ClError) -> crate::error::Error {
    move |e| RuntimeError::status(operation, e.0).into()
}

fn mem_flags(access: AccessMode) -> cl_mem_flags {
    match access {
        AccessMode::ReadOnly => CL_MEM_READ_ONLY,
        AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
        AccessMode::ReadWrite => CL_MEM_READ_WRITE,
    }
}

/// Completion event of an OpenCL command.
pub struct OpenClEvent(Event);

impl OpenClEvent {
    pub fn raw(&self) -> cl_event {
        self.0.get()
    }
}

impl fmt::Debug for OpenClEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpenClEvent").field(&self.0.get()).finish()
    }
}

impl CompletionEvent for OpenClEvent {
    fn wait(&self) -> Result<()> {
        self.0.wait().map_err(cl_err("clWaitForEvents"))
    }

    fn status(&self) -> Result<EventStatus> {
        let raw = self
            .0
            .command_execution_status()
            .map_err(cl_err("clGetEventInfo"))?
            .0;
        Ok(match raw {
            CL_COMPLETE => EventStatus::Complete,
            CL_RUNNING => EventStatus::Running,
            CL_SUBMITTED => EventStatus::Submitted,
            code if code < 0 => EventStatus::Error(code),
            _ => EventStatus::Queued,
        })
    }

    fn profiled_duration(&self) -> Option<Duration> {
        let start = self.0.profiling_command_start().ok()?;
        let end = self.0.profiling_command_end().ok()?;
        Some(Duration::from_nanos(end.saturating_sub(start)))
    }
}

/// The system OpenCL runtime.
#[derive(Default)]
pub struct OpenClBackend {
    _private: (),
}

impl OpenClBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for OpenClBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OpenClBackend")
    }
}

fn wait_ids(wait_list: &[&OpenClEvent]) -> Vec<cl_event> {
    wait_list.iter().map(|e| e.raw()).collect()
}

impl Backend for OpenClBackend {
    type Platform = Platform;
    type Device = Device;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = Program;
    type Kernel = Kernel;
    type Buffer = Buffer<u8>;
    type Event = OpenClEvent;

    fn name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> Result<Vec<Platform>> {
        get_platforms().map_err(cl_err("clGetPlatformIDs"))
    }

    fn platform_name(&self, platform: &Platform) -> Result<String> {
        platform.name().map_err(cl_err("clGetPlatformInfo"))
    }

    fn gpu_devices(&self, platform: &Platform) -> Result<Vec<Device>> {
        let ids = platform.get_devices(CL_DEVICE_TYPE_GPU).map_err(cl_err("clGetDeviceIDs"))?;
        Ok(ids.into_iter().map(Device::new).collect())
    }

    fn device_info(&self, device: &Device) -> Result<DeviceInfo> {
        const OP: &str = "clGetDeviceInfo";
        // Only availability and extensions decide selection; the rest is descriptive.
        let available = device.available().map_err(cl_err(OP))?;
        let extensions = device.extensions().map_err(cl_err(OP))?;

        let mut max_work_item_sizes = [1usize; 3];
        let sizes = device.max_work_item_sizes().unwrap_or_default();
        for (slot, size) in max_work_item_sizes.iter_mut().zip(sizes) {
            *slot = size;
        }
        Ok(DeviceInfo {
            name: device.name().unwrap_or_default().trim().to_owned(),
            vendor: device.vendor().unwrap_or_default().trim().to_owned(),
            platform_name: String::new(),
            driver_version: device.driver_version().unwrap_or_default().trim().to_owned(),
            available,
            extensions: DeviceInfo::parse_extensions(&extensions),
            max_work_item_sizes,
            max_work_group_size: device.max_work_group_size().unwrap_or_default(),
            global_mem_bytes: device.global_mem_size().unwrap_or_default(),
        })
    }

    fn create_context(&self, device: &Device) -> Result<Context> {
        Context::from_device(device).map_err(cl_err("clCreateContext"))
    }

    fn create_queue(&self, context: &Context, _device: &Device, profiling: bool) -> Result<CommandQueue> {
        let properties = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        CommandQueue::create_default_with_properties(context, properties, 0)
            .map_err(cl_err("clCreateCommandQueueWithProperties"))
    }

    fn build_program(
        &self,
        context: &Context,
        device: &Device,
        source: &str,
        options: &str,
    ) -> Result<(Program, String)> {
        let mut program =
            Program::create_from_source(context, source).map_err(cl_err("clCreateProgramWithSource"))?;
        let built = program.build(&[device.id()], options);
        let log = program.get_build_log(device.id()).unwrap_or_default();
        match built {
            Ok(()) => Ok((program, log)),
            Err(ClError(code)) if code == status::CL_BUILD_PROGRAM_FAILURE => {
                Err(CompilationError::BuildFailed {
                    device: device.name().unwrap_or_default().trim().to_owned(),
                    code,
                    log,
                }
                .into())
            }
            Err(e) => {
                debug!("clBuildProgram failed: {log}");
                Err(RuntimeError::status("clBuildProgram", e.0).into())
            }
        }
    }

    fn kernel_names(&self, program: &Program) -> Result<Vec<String>> {
        let names = program.get_kernel_names().map_err(cl_err("clGetProgramInfo"))?;
        Ok(names
            .split(';')
            .map(|name| name.trim_matches(char::from(0)).trim())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn create_kernel(&self, program: &Program, name: &str) -> Result<Kernel> {
        Kernel::create(program, name).map_err(cl_err("clCreateKernel"))
    }

    fn kernel_arg_count(&self, kernel: &Kernel) -> Result<u32> {
        kernel.num_args().map_err(cl_err("clGetKernelInfo"))
    }

    fn create_buffer(
        &self,
        context: &Context,
        access: AccessMode,
        size: usize,
        host: Option<&[u8]>,
    ) -> Result<Buffer<u8>> {
        const OP: &str = "clCreateBuffer";
        let (flags, host_ptr) = match host {
            Some(data) if data.len() != size => {
                return Err(RuntimeError::new(
                    OP,
                    status::CL_INVALID_VALUE,
                    format!("host data is {} byte(s), buffer is {size}", data.len()),
                )
                .into());
            }
            // COPY_HOST_PTR only reads through the pointer, before returning.
            Some(data) => (mem_flags(access) | CL_MEM_COPY_HOST_PTR, data.as_ptr() as *mut c_void),
            None => (mem_flags(access), ptr::null_mut()),
        };
        // SAFETY: `host_ptr` is null or valid for `size` bytes of reads.
        unsafe { Buffer::<u8>::create(context, flags, size, host_ptr) }.map_err(cl_err(OP))
    }

    fn set_buffer_arg(&self, kernel: &mut Kernel, index: u32, buffer: &Buffer<u8>) -> Result<()> {
        // SAFETY: the argument is a live cl_mem handle.
        unsafe { kernel.set_arg(index, &buffer.get()) }.map_err(cl_err("clSetKernelArg"))
    }

    fn set_scalar_arg(&self, kernel: &mut Kernel, index: u32, value: Scalar) -> Result<()> {
        // SAFETY: each value is a plain scalar of the size OpenCL C expects.
        let result = unsafe {
            match value {
                Scalar::U32(v) => kernel.set_arg(index, &v),
                Scalar::I32(v) => kernel.set_arg(index, &v),
                Scalar::U64(v) => kernel.set_arg(index, &v),
                Scalar::F32(v) => kernel.set_arg(index, &v),
                Scalar::F64(v) => kernel.set_arg(index, &v),
            }
        };
        result.map_err(cl_err("clSetKernelArg"))
    }

    fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        kernel: &Kernel,
        range: &NdRange,
        wait_list: &[&OpenClEvent],
    ) -> Result<OpenClEvent> {
        let local = range.local.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        // SAFETY: every argument was bound before submission and the size
        // arrays outlive the call.
        let event = unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.get(),
                3,
                ptr::null(),
                range.global.as_ptr(),
                local,
                &wait_ids(wait_list),
            )
        }
        .map_err(cl_err("clEnqueueNDRangeKernel"))?;
        Ok(OpenClEvent(event))
    }

    unsafe fn enqueue_read(
        &self,
        queue: &CommandQueue,
        buffer: &Buffer<u8>,
        blocking: bool,
        offset: usize,
        dst: &mut [u8],
        wait_list: &[&OpenClEvent],
    ) -> Result<OpenClEvent> {
        let mode = if blocking { CL_BLOCKING } else { CL_NON_BLOCKING };
        let event = queue
            .enqueue_read_buffer(buffer, mode, offset, dst, &wait_ids(wait_list))
            .map_err(cl_err("clEnqueueReadBuffer"))?;
        Ok(OpenClEvent(event))
    }

    fn finish(&self, queue: &CommandQueue) -> Result<()> {
        queue.finish().map_err(cl_err("clFinish"))
    }
}
