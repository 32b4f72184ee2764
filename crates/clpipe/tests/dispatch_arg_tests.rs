//! Argument binding, launch validation and buffer lifetime.

use clpipe::error::status;
use clpipe::kernels::MAIN;
use clpipe::sim::{HostInvocation, HostKernel, HostKernelResult};
use clpipe::{
    find_device, AccessMode, ContextOptions, DeviceRequirements, Error, ExecutionContext, NdRange,
    Scalar, SimulatedBackend,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn context(backend: &SimulatedBackend) -> ExecutionContext<'_, SimulatedBackend> {
    let selected = find_device(backend, &DeviceRequirements::double_precision()).unwrap();
    ExecutionContext::create(backend, selected, ContextOptions::default()).unwrap()
}

fn runtime_code(err: &Error) -> i32 {
    match err {
        Error::Runtime(e) => e.code,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

const SCALE_SRC: &str = "__kernel void scale(__global float *x, const float factor) {\n\
                         x[get_global_id(0)] *= factor;\n}\n\
                         __kernel void no_body(__global float *x) {}\n";

fn scale(invocation: &HostInvocation<'_>) -> HostKernelResult {
    let Scalar::F32(factor) = invocation.scalar(1)? else {
        return Err("factor must be a float".into());
    };
    let n = invocation.range().global[0];
    invocation.write::<f32, _>(0, |x| x[..n].iter_mut().for_each(|v| *v *= factor))
}

// ── Binding ──────────────────────────────────────────────────────────────────

#[test]
fn index_past_arity_is_rejected() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();
    let buf = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, 4).unwrap();

    let err = kernel.set_arg(3, &buf).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_ARG_INDEX);
    assert_eq!(kernel.unbound_args(), [0, 1, 2]);
}

#[test]
fn scalar_for_pointer_parameter_is_rejected() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();

    let err = kernel.set_arg(0, 5u32).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_ARG_SIZE);
    assert!(err.to_string().contains("__global pointer"), "{err}");
}

#[test]
fn scalar_of_wrong_width_is_rejected() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let program = ctx.build_program(SCALE_SRC, "").unwrap();
    let mut kernel = program.kernel("scale").unwrap();

    let err = kernel.set_arg(1, 2.0f64).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_ARG_SIZE);
    assert!(kernel.set_arg(1, 2.0f32).is_ok());
}

#[test]
fn buffer_from_another_context_is_rejected() {
    let backend = SimulatedBackend::default();
    let first = context(&backend);
    let second = context(&backend);
    let program = first.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();
    let foreign = second.buffer_uninit::<f64>(AccessMode::ReadOnly, 4).unwrap();

    let err = kernel.set_arg(0, &foreign).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_CONTEXT);
}

#[test]
fn launch_with_unbound_arguments_is_rejected() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();
    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; 8]).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &a).unwrap();

    let err = ctx.enqueue(&kernel, NdRange::linear(8)).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_KERNEL_ARGS);
    assert!(err.to_string().contains("[2]"), "{err}");
}

// ── Launch geometry ──────────────────────────────────────────────────────────

#[test]
fn local_size_beyond_device_limit_is_rejected() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();
    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; 128]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, 128).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &a).unwrap().set_arg(2, &c).unwrap();

    // The standard simulated GPU allows 64 work items in dimension 0.
    let err = ctx.enqueue(&kernel, NdRange::linear(128).with_local([128, 1, 1])).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_WORK_ITEM_SIZE);

    let done = ctx.enqueue(&kernel, NdRange::linear(128).with_local([64, 1, 1])).unwrap().wait().unwrap();
    assert_eq!(done.work_items, 128);
    assert_eq!(ctx.read_back(&c).unwrap(), vec![2.0; 128]);
}

#[test]
fn range_larger_than_inputs_fails_at_completion() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();
    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; 16]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, 32).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &a).unwrap().set_arg(2, &c).unwrap();

    let err = ctx.enqueue(&kernel, NdRange::linear(32)).unwrap().wait().unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
    assert!(err.to_string().contains("reads past the end"), "{err}");
}

#[test]
fn writing_a_read_only_buffer_fails_the_launch() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let program = ctx.load_program(&MAIN, "").unwrap();
    let mut kernel = program.kernel("main_kernel").unwrap();
    let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[1.0f64; 8]).unwrap();
    let c = ctx.buffer_uninit::<f64>(AccessMode::ReadOnly, 8).unwrap();
    kernel.set_arg(0, &a).unwrap().set_arg(1, &a).unwrap().set_arg(2, &c).unwrap();

    let err = ctx.enqueue(&kernel, NdRange::linear(8)).unwrap().wait().unwrap_err();
    assert!(err.to_string().contains("kernel wrote to read-only buffer (argument 2)"), "{err}");
    assert!(err.to_string().contains("CL_OUT_OF_RESOURCES"), "{err}");
    assert_eq!(ctx.read_back(&c).unwrap(), vec![0.0; 8]);
}

// ── Host kernels and scalars ─────────────────────────────────────────────────

#[test]
fn registered_host_kernel_receives_scalar_arguments() {
    let backend = SimulatedBackend::default().with_host_kernel("scale", HostKernel::new(scale));
    let ctx = context(&backend);
    let program = ctx.build_program(SCALE_SRC, "").unwrap();
    let mut kernel = program.kernel("scale").unwrap();
    let x = ctx.buffer_from_slice(AccessMode::ReadWrite, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    kernel.set_arg(0, &x).unwrap().set_arg(1, 2.5f32).unwrap();

    ctx.enqueue(&kernel, NdRange::linear(4)).unwrap().wait().unwrap();
    assert_eq!(ctx.read_back(&x).unwrap(), [2.5, 5.0, 7.5, 10.0]);
}

#[test]
fn kernel_without_host_body_cannot_be_launched() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let program = ctx.build_program(SCALE_SRC, "").unwrap();
    let mut kernel = program.kernel("no_body").unwrap();
    let x = ctx.buffer_uninit::<f32>(AccessMode::ReadWrite, 4).unwrap();
    kernel.set_arg(0, &x).unwrap();

    let err = ctx.enqueue(&kernel, NdRange::linear(4)).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_KERNEL);
}

// ── Buffers ──────────────────────────────────────────────────────────────────

#[test]
fn device_memory_is_released_when_buffers_drop() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    assert_eq!(ctx.raw_context().allocated_bytes(), 0);
    {
        let a = ctx.buffer_from_slice(AccessMode::ReadOnly, &[0u32; 64]).unwrap();
        let c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, 64).unwrap();
        assert_eq!(a.size_bytes(), 256);
        assert_eq!(c.size_bytes(), 512);
        assert_eq!(ctx.raw_context().allocated_bytes(), 768);
    }
    assert_eq!(ctx.raw_context().allocated_bytes(), 0);
}

#[test]
fn empty_buffers_are_rejected() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let err = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, 0).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_BUFFER_SIZE);
    let err = ctx.buffer_from_slice::<f64>(AccessMode::ReadOnly, &[]).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_BUFFER_SIZE);
}

#[test]
fn read_into_checks_destination_length() {
    let backend = SimulatedBackend::default();
    let ctx = context(&backend);
    let buf = ctx.buffer_from_slice(AccessMode::ReadOnly, &[7i32; 10]).unwrap();

    let mut short = [0i32; 9];
    let err = ctx.read_into(&buf, &mut short).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_VALUE);

    let mut exact = [0i32; 10];
    ctx.read_into(&buf, &mut exact).unwrap();
    assert_eq!(exact, [7; 10]);
}

#[test]
fn buffer_from_another_context_cannot_be_read() {
    let backend = SimulatedBackend::default();
    let first = context(&backend);
    let second = context(&backend);
    let buf = second.buffer_from_slice(AccessMode::ReadOnly, &[1u8; 4]).unwrap();
    let err = first.read_back(&buf).unwrap_err();
    assert_eq!(runtime_code(&err), status::CL_INVALID_CONTEXT);
}
