//! Results are only observable after completion has been waited on.
//!
//! The simulated device holds every launch for a fixed latency before its
//! writes land, so peeking at device memory early shows the old contents.

use std::time::Duration;

use clpipe::kernels::MAIN;
use clpipe::{
    find_device, AccessMode, CompletionEvent, ContextOptions, DeviceRequirements, EventStatus,
    ExecutionContext, NdRange, SimDeviceSpec, SimPlatformSpec, SimulatedBackend,
};

const DELAY: Duration = Duration::from_millis(150);
const N: usize = 32;

fn delayed_backend() -> SimulatedBackend {
    SimulatedBackend::new(vec![SimPlatformSpec::new(
        "Slow Platform",
        vec![SimDeviceSpec::gpu("Slow GPU").with_completion_delay(DELAY)],
    )])
}

fn context(backend: &SimulatedBackend, profiling: bool) -> ExecutionContext<'_, SimulatedBackend> {
    let selected = find_device(backend, &DeviceRequirements::double_precision()).unwrap();
    ExecutionContext::create(backend, selected, ContextOptions { profiling }).unwrap()
}

fn as_f64(bytes: &[u8]) -> Vec<f64> {
    bytemuck::pod_collect_to_vec(bytes)
}

#[test]
fn device_memory_changes_only_after_completion() {
    let backend = delayed_backend();
    let ctx = context(&backend, false);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();

    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; N]).unwrap();
    let b = ctx.buffer_from_slice(AccessMode::ReadOnly, &[2.0f64; N]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, N).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &b).unwrap().set_arg(2, &c).unwrap();

    let pending = ctx.enqueue(&kernel, NdRange::linear(N)).unwrap();
    assert_ne!(pending.status().unwrap(), EventStatus::Complete);
    assert!(as_f64(&c.raw().peek()).iter().all(|v| *v == 0.0));

    let done = pending.wait().unwrap();
    assert!(done.wall >= DELAY, "{:?}", done.wall);
    assert_eq!(done.work_items, N);
    assert!(as_f64(&c.raw().peek()).iter().all(|v| *v == 3.0));
}

#[test]
fn blocking_read_on_in_order_queue_sees_finished_results() {
    let backend = delayed_backend();
    let ctx = context(&backend, false);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();

    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; N]).unwrap();
    let b = ctx.buffer_from_slice(AccessMode::ReadOnly, &[2.0f64; N]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, N).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &b).unwrap().set_arg(2, &c).unwrap();

    let pending = ctx.enqueue(&kernel, NdRange::linear(N)).unwrap();
    let results = ctx.read_back(&c).unwrap();
    assert_eq!(results, vec![3.0; N]);
    assert_eq!(pending.status().unwrap(), EventStatus::Complete);
    pending.wait().unwrap();
}

#[test]
fn async_read_chained_on_dispatch_event() {
    let backend = delayed_backend();
    let ctx = context(&backend, false);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();

    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[0.5f64; N]).unwrap();
    let b = ctx.buffer_from_slice(AccessMode::ReadOnly, &[2.5f64; N]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, N).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &b).unwrap().set_arg(2, &c).unwrap();

    let dispatch = ctx.enqueue(&kernel, NdRange::linear(N)).unwrap();
    let read = ctx.read_back_async(&c, &[dispatch.event()]).unwrap();
    assert_ne!(read.status().unwrap(), EventStatus::Complete);

    assert_eq!(read.wait().unwrap(), vec![3.0; N]);
    assert_eq!(dispatch.status().unwrap(), EventStatus::Complete);
    dispatch.wait().unwrap();
}

#[test]
fn dropping_a_pending_dispatch_waits_for_it() {
    let backend = delayed_backend();
    let ctx = context(&backend, false);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();

    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; N]).unwrap();
    let b = ctx.buffer_from_slice(AccessMode::ReadOnly, &[2.0f64; N]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, N).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &b).unwrap().set_arg(2, &c).unwrap();

    let pending = ctx.enqueue(&kernel, NdRange::linear(N)).unwrap();
    let event = pending.event().clone();
    drop(pending);

    assert_eq!(event.status().unwrap(), EventStatus::Complete);
    assert!(as_f64(&c.raw().peek()).iter().all(|v| *v == 3.0));
}

#[test]
fn profiling_reports_device_time() {
    let backend = delayed_backend();
    let ctx = context(&backend, true);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();

    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; N]).unwrap();
    let b = ctx.buffer_from_slice(AccessMode::ReadOnly, &[2.0f64; N]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, N).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &b).unwrap().set_arg(2, &c).unwrap();

    let done = ctx.enqueue(&kernel, NdRange::linear(N)).unwrap().wait().unwrap();
    let device_ms = done.device_ms().unwrap();
    assert!(device_ms >= DELAY.as_secs_f64() * 1e3, "{device_ms}");
    assert!(done.elapsed_ms() >= device_ms);
}

#[test]
fn finish_drains_the_queue() {
    let backend = delayed_backend();
    let ctx = context(&backend, false);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();

    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; N]).unwrap();
    let b = ctx.buffer_from_slice(AccessMode::ReadOnly, &[2.0f64; N]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, N).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &b).unwrap().set_arg(2, &c).unwrap();

    let pending = ctx.enqueue(&kernel, NdRange::linear(N)).unwrap();
    ctx.finish().unwrap();
    assert_eq!(pending.event().status().unwrap(), EventStatus::Complete);
    pending.wait().unwrap();
}
