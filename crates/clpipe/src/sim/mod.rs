//! In-process simulated compute runtime.
//!
//! [`SimulatedBackend`] implements [`Backend`] without any driver: platforms
//! and devices come from [`SimPlatformSpec`]/[`SimDeviceSpec`] values,
//! programs are checked by a source scanner that produces compiler-style
//! logs, and kernels execute as host closures on a per-queue worker thread.
//!
//! It models what a host program can observe of a real runtime: partial
//! platform failures, unavailable devices, missing fp64, build logs,
//! argument type mismatches, device memory limits, asynchronous completion
//! with latency, and (optionally) wrong results.

mod compiler;
mod kernels;
mod queue;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

pub use compiler::{AddressSpace, ElemType, KernelSignature, Param, ParamKind, ScalarType};
pub use kernels::{elementwise_add, HostInvocation, HostKernel, HostKernelResult};
pub use queue::{SimEvent, SimQueue};

use crate::backend::{AccessMode, Backend, CompletionEvent, NdRange, Scalar};
use crate::device::{DeviceInfo, FP64_EXTENSIONS};
use crate::error::{status, CompilationError, Result, RuntimeError};
use kernels::{BoundArg, BUILTIN_ADD_KERNELS};

// ── Device and platform descriptions ────────────────────────────────────────

/// Deliberate misbehaviour of a simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// After every launch, overwrite element `index` of the first writable
    /// `__global` output with all-ones bytes.
    CorruptElement(usize),
}

/// Description of one simulated GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct SimDeviceSpec {
    pub name: String,
    pub vendor: String,
    pub driver_version: String,
    pub available: bool,
    pub extensions: Vec<String>,
    pub max_work_item_sizes: [usize; 3],
    pub max_work_group_size: usize,
    pub global_mem_bytes: u64,
    /// Time a kernel launch spends "running" before its writes land.
    pub completion_delay: Duration,
    pub fault: Option<SimFault>,
    /// Make `device_info` fail for this device.
    pub info_query_fails: bool,
}

impl SimDeviceSpec {
    /// An available GPU with `cl_khr_fp64`, 512 max work items and 256 MiB.
    pub fn gpu(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor: "clpipe".into(),
            driver_version: "sim-1.0".into(),
            available: true,
            extensions: ["cl_khr_byte_addressable_store", "cl_khr_global_int32_base_atomics", "cl_khr_fp64"]
                .map(String::from)
                .to_vec(),
            max_work_item_sizes: [64, 4, 2],
            max_work_group_size: 256,
            global_mem_bytes: 256 * 1024 * 1024,
            completion_delay: Duration::ZERO,
            fault: None,
            info_query_fails: false,
        }
    }

    #[must_use]
    pub fn without_fp64(mut self) -> Self {
        self.extensions.retain(|e| !FP64_EXTENSIONS.contains(&e.as_str()));
        self
    }

    /// Advertise double precision through the AMD extension only.
    #[must_use]
    pub fn with_amd_fp64(mut self) -> Self {
        self = self.without_fp64();
        self.extensions.push("cl_amd_fp64".into());
        self
    }

    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    #[must_use]
    pub fn with_max_work_item_sizes(mut self, sizes: [usize; 3]) -> Self {
        self.max_work_item_sizes = sizes;
        self
    }

    #[must_use]
    pub fn with_global_mem(mut self, bytes: u64) -> Self {
        self.global_mem_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    #[must_use]
    pub fn with_fault(mut self, fault: SimFault) -> Self {
        self.fault = Some(fault);
        self
    }

    #[must_use]
    pub fn failing_info_query(mut self) -> Self {
        self.info_query_fails = true;
        self
    }

    pub fn supports_fp64(&self) -> bool {
        self.extensions.iter().any(|e| FP64_EXTENSIONS.contains(&e.as_str()))
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            platform_name: String::new(),
            driver_version: self.driver_version.clone(),
            available: self.available,
            extensions: DeviceInfo::parse_extensions(&self.extensions.join(" ")),
            max_work_item_sizes: self.max_work_item_sizes,
            max_work_group_size: self.max_work_group_size,
            global_mem_bytes: self.global_mem_bytes,
        }
    }
}

/// Description of one simulated platform.
#[derive(Debug, Clone, PartialEq)]
pub struct SimPlatformSpec {
    pub name: String,
    pub devices: Vec<SimDeviceSpec>,
    /// Make the GPU device query fail for this platform.
    pub device_query_fails: bool,
}

impl SimPlatformSpec {
    pub fn new(name: impl Into<String>, devices: Vec<SimDeviceSpec>) -> Self {
        Self { name: name.into(), devices, device_query_fails: false }
    }

    /// A platform whose device query always fails.
    pub fn failing(name: impl Into<String>) -> Self {
        Self { name: name.into(), devices: Vec::new(), device_query_fails: true }
    }
}

/// Named platform layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimTopology {
    /// One platform with one fp64 GPU.
    #[default]
    Standard,
    /// A broken platform, then unavailable, non-fp64 and AMD-fp64 GPUs, then
    /// a second vendor with another fp64 GPU.
    Mixed,
    /// One platform whose only GPU lacks fp64.
    NoFp64,
    /// No platforms at all.
    NoPlatforms,
    /// One fp64 GPU that corrupts one output element.
    Faulty,
}

impl SimTopology {
    pub fn platforms(self) -> Vec<SimPlatformSpec> {
        const PLATFORM: &str = "clpipe Simulated Platform";
        match self {
            Self::Standard => vec![SimPlatformSpec::new(PLATFORM, vec![SimDeviceSpec::gpu("Simulated GPU")])],
            Self::Mixed => vec![
                SimPlatformSpec::failing("Broken ICD"),
                SimPlatformSpec::new(
                    "Simulated Vendor A",
                    vec![
                        SimDeviceSpec::gpu("Offline GPU").unavailable(),
                        SimDeviceSpec::gpu("Integrated GPU").without_fp64(),
                        SimDeviceSpec::gpu("Discrete GPU").with_amd_fp64(),
                    ],
                ),
                SimPlatformSpec::new("Simulated Vendor B", vec![SimDeviceSpec::gpu("Secondary GPU")]),
            ],
            Self::NoFp64 => vec![SimPlatformSpec::new(
                PLATFORM,
                vec![SimDeviceSpec::gpu("Integrated GPU").without_fp64()],
            )],
            Self::NoPlatforms => Vec::new(),
            Self::Faulty => vec![SimPlatformSpec::new(
                PLATFORM,
                vec![SimDeviceSpec::gpu("Faulty GPU").with_fault(SimFault::CorruptElement(7))],
            )],
        }
    }
}

impl FromStr for SimTopology {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "mixed" => Ok(Self::Mixed),
            "no-fp64" => Ok(Self::NoFp64),
            "no-platforms" => Ok(Self::NoPlatforms),
            "faulty" => Ok(Self::Faulty),
            other => Err(format!(
                "unknown topology '{other}'. Expected one of: standard, mixed, no-fp64, no-platforms, faulty"
            )),
        }
    }
}

impl fmt::Display for SimTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "standard",
            Self::Mixed => "mixed",
            Self::NoFp64 => "no-fp64",
            Self::NoPlatforms => "no-platforms",
            Self::Faulty => "faulty",
        })
    }
}

// ── Handles ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPlatform {
    index: usize,
}

#[derive(Debug, Clone)]
pub struct SimDevice {
    spec: Arc<SimDeviceSpec>,
}

impl SimDevice {
    pub fn spec(&self) -> &SimDeviceSpec {
        &self.spec
    }
}

#[derive(Debug)]
struct MemoryPool {
    device: Arc<SimDeviceSpec>,
    allocated: AtomicU64,
}

impl MemoryPool {
    fn reserve(&self, size: u64) -> Result<()> {
        let capacity = self.device.global_mem_bytes;
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(size).filter(|total| *total <= capacity)
            })
            .map(|_| ())
            .map_err(|used| {
                RuntimeError::new(
                    "clCreateBuffer",
                    status::CL_MEM_OBJECT_ALLOCATION_FAILURE,
                    format!("{size} byte(s) requested, {} of {capacity} free", capacity - used),
                )
                .into()
            })
    }

    fn release(&self, size: u64) {
        self.allocated.fetch_sub(size, Ordering::SeqCst);
    }
}

/// A simulated context: one device and its memory accounting.
#[derive(Debug)]
pub struct SimContext {
    device: Arc<SimDeviceSpec>,
    memory: Arc<MemoryPool>,
}

impl SimContext {
    /// Bytes currently held by live buffers of this context.
    pub fn allocated_bytes(&self) -> u64 {
        self.memory.allocated.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct SimProgram {
    device: Arc<SimDeviceSpec>,
    kernels: Vec<Arc<KernelSignature>>,
}

#[derive(Debug)]
pub struct SimKernel {
    signature: Arc<KernelSignature>,
    device: Arc<SimDeviceSpec>,
    args: Vec<Option<BoundArg>>,
}

impl SimKernel {
    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }
}

struct BufferStorage {
    access: AccessMode,
    size: usize,
    words: Mutex<Vec<u64>>,
    pool: Arc<MemoryPool>,
}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        self.pool.release(self.size as u64);
    }
}

/// Simulated device memory. Clones share the same allocation.
#[derive(Clone)]
pub struct SimBuffer {
    inner: Arc<BufferStorage>,
}

impl SimBuffer {
    pub fn access(&self) -> AccessMode {
        self.inner.access
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u64>> {
        self.inner.words.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn with_bytes<R>(&self, body: impl FnOnce(&[u8]) -> R) -> R {
        let words = self.lock();
        body(&bytemuck::cast_slice::<u64, u8>(&words)[..self.inner.size])
    }

    pub(crate) fn with_bytes_mut<R>(&self, body: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut words = self.lock();
        body(&mut bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..self.inner.size])
    }

    /// Current device contents, read without any synchronisation with the
    /// queue.
    pub fn peek(&self) -> Vec<u8> {
        self.with_bytes(<[u8]>::to_vec)
    }

    fn device(&self) -> &Arc<SimDeviceSpec> {
        &self.inner.pool.device
    }
}

impl fmt::Debug for SimBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBuffer")
            .field("access", &self.inner.access)
            .field("size", &self.inner.size)
            .finish_non_exhaustive()
    }
}

/// Destination of a read, written by the queue worker.
struct HostSlice {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the pointer is only dereferenced by the worker while the caller of
// `enqueue_read` keeps the memory alive and untouched.
unsafe impl Send for HostSlice {}

impl HostSlice {
    /// # Safety
    ///
    /// `ptr` must be valid for `len` bytes of writes with no other access.
    unsafe fn fill(self, src: &[u8]) {
        std::slice::from_raw_parts_mut(self.ptr, self.len).copy_from_slice(src);
    }
}

// ── Backend ─────────────────────────────────────────────────────────────────

/// A compute runtime simulated in-process.
pub struct SimulatedBackend {
    platforms: Vec<SimPlatformSpec>,
    devices: Vec<Vec<Arc<SimDeviceSpec>>>,
    host_kernels: HashMap<String, HostKernel>,
    platform_query_fails: bool,
}

impl SimulatedBackend {
    /// A runtime exposing `platforms`, with the built-in element-wise add
    /// bodies registered.
    pub fn new(platforms: Vec<SimPlatformSpec>) -> Self {
        let devices = platforms
            .iter()
            .map(|p| p.devices.iter().cloned().map(Arc::new).collect())
            .collect();
        let host_kernels = BUILTIN_ADD_KERNELS
            .iter()
            .map(|name| ((*name).to_owned(), HostKernel::new(elementwise_add)))
            .collect();
        Self { platforms, devices, host_kernels, platform_query_fails: false }
    }

    pub fn from_topology(topology: SimTopology) -> Self {
        Self::new(topology.platforms())
    }

    /// Register (or replace) the host body for entry point `name`.
    #[must_use]
    pub fn with_host_kernel(mut self, name: impl Into<String>, body: HostKernel) -> Self {
        self.host_kernels.insert(name.into(), body);
        self
    }

    /// Make the platform query itself fail.
    #[must_use]
    pub fn failing_platform_query(mut self) -> Self {
        self.platform_query_fails = true;
        self
    }

    fn platform(&self, platform: &SimPlatform) -> Result<&SimPlatformSpec> {
        self.platforms.get(platform.index).ok_or_else(|| {
            RuntimeError::status("clGetPlatformInfo", status::CL_INVALID_PLATFORM).into()
        })
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::from_topology(SimTopology::Standard)
    }
}

impl fmt::Debug for SimulatedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedBackend")
            .field("platforms", &self.platforms.len())
            .field("host_kernels", &self.host_kernels.len())
            .finish_non_exhaustive()
    }
}

fn check_arg_index(kernel: &SimKernel, index: u32) -> Result<&Param> {
    kernel.signature.params.get(index as usize).ok_or_else(|| {
        RuntimeError::new(
            "clSetKernelArg",
            status::CL_INVALID_ARG_INDEX,
            format!("'{}' has {} parameter(s)", kernel.signature.name, kernel.signature.params.len()),
        )
        .into()
    })
}

fn corrupt_output(signature: &KernelSignature, args: &[BoundArg], index: usize) {
    let target = signature.params.iter().zip(args).find_map(|(param, arg)| {
        let ParamKind::Pointer { space: AddressSpace::Global, elem: Some(elem), is_const: false } =
            &param.kind
        else {
            return None;
        };
        match arg {
            BoundArg::Buffer(b) if b.access().kernel_writable() => Some((elem.size(), b)),
            _ => None,
        }
    });
    if let Some((elem_size, buffer)) = target {
        buffer.with_bytes_mut(|bytes| {
            let start = index * elem_size;
            if let Some(slot) = bytes.get_mut(start..start + elem_size) {
                slot.fill(0xFF);
            }
        });
    }
}

impl Backend for SimulatedBackend {
    type Platform = SimPlatform;
    type Device = SimDevice;
    type Context = SimContext;
    type Queue = SimQueue;
    type Program = SimProgram;
    type Kernel = SimKernel;
    type Buffer = SimBuffer;
    type Event = SimEvent;

    fn name(&self) -> &'static str {
        "sim"
    }

    fn platforms(&self) -> Result<Vec<SimPlatform>> {
        if self.platform_query_fails {
            return Err(RuntimeError::status("clGetPlatformIDs", status::CL_PLATFORM_NOT_FOUND_KHR).into());
        }
        Ok((0..self.platforms.len()).map(|index| SimPlatform { index }).collect())
    }

    fn platform_name(&self, platform: &SimPlatform) -> Result<String> {
        Ok(self.platform(platform)?.name.clone())
    }

    fn gpu_devices(&self, platform: &SimPlatform) -> Result<Vec<SimDevice>> {
        let spec = self.platform(platform)?;
        if spec.device_query_fails {
            return Err(RuntimeError::new(
                "clGetDeviceIDs",
                status::CL_OUT_OF_HOST_MEMORY,
                format!("device query on '{}' failed", spec.name),
            )
            .into());
        }
        let devices = &self.devices[platform.index];
        if devices.is_empty() {
            return Err(RuntimeError::status("clGetDeviceIDs", status::CL_DEVICE_NOT_FOUND).into());
        }
        Ok(devices.iter().map(|spec| SimDevice { spec: Arc::clone(spec) }).collect())
    }

    fn device_info(&self, device: &SimDevice) -> Result<DeviceInfo> {
        if device.spec.info_query_fails {
            return Err(RuntimeError::new(
                "clGetDeviceInfo",
                status::CL_INVALID_DEVICE,
                format!("info query on '{}' failed", device.spec.name),
            )
            .into());
        }
        Ok(device.spec.info())
    }

    fn create_context(&self, device: &SimDevice) -> Result<SimContext> {
        if !device.spec.available {
            return Err(RuntimeError::status("clCreateContext", status::CL_DEVICE_NOT_AVAILABLE).into());
        }
        let memory =
            Arc::new(MemoryPool { device: Arc::clone(&device.spec), allocated: AtomicU64::new(0) });
        Ok(SimContext { device: Arc::clone(&device.spec), memory })
    }

    fn create_queue(&self, context: &SimContext, device: &SimDevice, profiling: bool) -> Result<SimQueue> {
        if !Arc::ptr_eq(&context.device, &device.spec) {
            return Err(RuntimeError::new(
                "clCreateCommandQueue",
                status::CL_INVALID_DEVICE,
                "device is not associated with the context",
            )
            .into());
        }
        SimQueue::spawn(Arc::clone(&device.spec), profiling)
    }

    fn build_program(
        &self,
        context: &SimContext,
        device: &SimDevice,
        source: &str,
        options: &str,
    ) -> Result<(SimProgram, String)> {
        if !Arc::ptr_eq(&context.device, &device.spec) {
            return Err(RuntimeError::status("clBuildProgram", status::CL_INVALID_DEVICE).into());
        }
        match compiler::compile(source, options, &device.spec) {
            Ok(image) => {
                debug!("Simulated build produced {} kernel(s)", image.kernels.len());
                let program = SimProgram {
                    device: Arc::clone(&device.spec),
                    kernels: image.kernels.into_iter().map(Arc::new).collect(),
                };
                Ok((program, image.log))
            }
            Err(log) => Err(CompilationError::BuildFailed {
                device: device.spec.name.clone(),
                code: status::CL_BUILD_PROGRAM_FAILURE,
                log,
            }
            .into()),
        }
    }

    fn kernel_names(&self, program: &SimProgram) -> Result<Vec<String>> {
        Ok(program.kernels.iter().map(|k| k.name.clone()).collect())
    }

    fn create_kernel(&self, program: &SimProgram, name: &str) -> Result<SimKernel> {
        let signature = program.kernels.iter().find(|k| k.name == name).ok_or_else(|| {
            RuntimeError::new("clCreateKernel", status::CL_INVALID_KERNEL_NAME, format!("no kernel named '{name}'"))
        })?;
        Ok(SimKernel {
            signature: Arc::clone(signature),
            device: Arc::clone(&program.device),
            args: vec![None; signature.params.len()],
        })
    }

    fn kernel_arg_count(&self, kernel: &SimKernel) -> Result<u32> {
        Ok(kernel.signature.params.len() as u32)
    }

    fn create_buffer(
        &self,
        context: &SimContext,
        access: AccessMode,
        size: usize,
        host: Option<&[u8]>,
    ) -> Result<SimBuffer> {
        if size == 0 {
            return Err(RuntimeError::status("clCreateBuffer", status::CL_INVALID_BUFFER_SIZE).into());
        }
        if let Some(data) = host {
            if data.len() != size {
                return Err(RuntimeError::new(
                    "clCreateBuffer",
                    status::CL_INVALID_VALUE,
                    format!("host data is {} byte(s), buffer is {size}", data.len()),
                )
                .into());
            }
        }
        context.memory.reserve(size as u64)?;

        // Device memory starts zeroed.
        let mut words = vec![0u64; size.div_ceil(8)];
        if let Some(data) = host {
            bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..size].copy_from_slice(data);
        }
        Ok(SimBuffer {
            inner: Arc::new(BufferStorage {
                access,
                size,
                words: Mutex::new(words),
                pool: Arc::clone(&context.memory),
            }),
        })
    }

    fn set_buffer_arg(&self, kernel: &mut SimKernel, index: u32, buffer: &SimBuffer) -> Result<()> {
        let param = check_arg_index(kernel, index)?;
        if !Arc::ptr_eq(buffer.device(), &kernel.device) {
            return Err(RuntimeError::new(
                "clSetKernelArg",
                status::CL_INVALID_MEM_OBJECT,
                "buffer was created for a different device",
            )
            .into());
        }
        match param.kind {
            ParamKind::Pointer { space: AddressSpace::Global | AddressSpace::Constant, .. } => {}
            ParamKind::Pointer { space, .. } => {
                return Err(RuntimeError::new(
                    "clSetKernelArg",
                    status::CL_INVALID_ARG_VALUE,
                    format!("argument {index} ('{}') is a {} pointer", param.name, space.keyword()),
                )
                .into());
            }
            ParamKind::Value(_) => {
                return Err(RuntimeError::new(
                    "clSetKernelArg",
                    status::CL_INVALID_ARG_SIZE,
                    format!("argument {index} ('{}') is passed by value, got a buffer", param.name),
                )
                .into());
            }
        }
        kernel.args[index as usize] = Some(BoundArg::Buffer(buffer.clone()));
        Ok(())
    }

    fn set_scalar_arg(&self, kernel: &mut SimKernel, index: u32, value: Scalar) -> Result<()> {
        let param = check_arg_index(kernel, index)?;
        match param.kind {
            ParamKind::Value(None) => {}
            ParamKind::Value(Some(elem)) if elem.size() == value.size() => {}
            ParamKind::Value(Some(elem)) => {
                return Err(RuntimeError::new(
                    "clSetKernelArg",
                    status::CL_INVALID_ARG_SIZE,
                    format!(
                        "argument {index} ('{}') is {} byte(s), got a {}-byte {}",
                        param.name,
                        elem.size(),
                        value.size(),
                        value.type_name()
                    ),
                )
                .into());
            }
            ParamKind::Pointer { space, .. } => {
                return Err(RuntimeError::new(
                    "clSetKernelArg",
                    status::CL_INVALID_ARG_SIZE,
                    format!(
                        "argument {index} ('{}') is a {} pointer, got a {} value",
                        param.name,
                        space.keyword(),
                        value.type_name()
                    ),
                )
                .into());
            }
        }
        kernel.args[index as usize] = Some(BoundArg::Scalar(value));
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &SimQueue,
        kernel: &SimKernel,
        range: &NdRange,
        wait_list: &[&SimEvent],
    ) -> Result<SimEvent> {
        const OP: &str = "clEnqueueNDRangeKernel";
        if !Arc::ptr_eq(queue.device(), &kernel.device) {
            return Err(RuntimeError::new(OP, status::CL_INVALID_CONTEXT, "kernel and queue use different devices").into());
        }
        let name = &kernel.signature.name;
        let body = self.host_kernels.get(name).cloned().ok_or_else(|| {
            RuntimeError::new(OP, status::CL_INVALID_KERNEL, format!("no host implementation for '{name}'"))
        })?;
        let args: Vec<BoundArg> = kernel
            .args
            .iter()
            .cloned()
            .collect::<Option<_>>()
            .ok_or_else(|| RuntimeError::status(OP, status::CL_INVALID_KERNEL_ARGS))?;

        let signature = Arc::clone(&kernel.signature);
        let fault = kernel.device.fault;
        let range = *range;
        let job: queue::Job = Box::new(move || -> std::result::Result<(), (i32, String)> {
            let invocation = HostInvocation { range, signature: &signature, args: &args };
            body.call(&invocation).map_err(|message| (status::CL_OUT_OF_RESOURCES, message))?;
            if let Some(SimFault::CorruptElement(index)) = fault {
                corrupt_output(&signature, &args, index);
            }
            Ok(())
        });
        queue.submit(OP, kernel.device.completion_delay, wait_list, job)
    }

    unsafe fn enqueue_read(
        &self,
        queue: &SimQueue,
        buffer: &SimBuffer,
        blocking: bool,
        offset: usize,
        dst: &mut [u8],
        wait_list: &[&SimEvent],
    ) -> Result<SimEvent> {
        const OP: &str = "clEnqueueReadBuffer";
        if !Arc::ptr_eq(queue.device(), buffer.device()) {
            return Err(RuntimeError::status(OP, status::CL_INVALID_CONTEXT).into());
        }
        let end = offset.checked_add(dst.len()).filter(|end| *end <= buffer.size()).ok_or_else(|| {
            RuntimeError::new(
                OP,
                status::CL_INVALID_VALUE,
                format!("{} byte(s) at offset {offset} exceed a {}-byte buffer", dst.len(), buffer.size()),
            )
        })?;

        let source = buffer.clone();
        let target = HostSlice { ptr: dst.as_mut_ptr(), len: dst.len() };
        let job: queue::Job = Box::new(move || -> std::result::Result<(), (i32, String)> {
            // SAFETY: guaranteed by the `enqueue_read` contract.
            source.with_bytes(|bytes| unsafe { target.fill(&bytes[offset..end]) });
            Ok(())
        });
        let event = queue.submit(OP, Duration::ZERO, wait_list, job)?;
        if blocking {
            event.wait()?;
        }
        Ok(event)
    }

    fn finish(&self, queue: &SimQueue) -> Result<()> {
        queue.finish()
    }
}
