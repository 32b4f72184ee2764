//! The end-to-end run: select, bind, compile, allocate, dispatch, collect.
//!
//! Stages run strictly in sequence on the calling thread. Progress is pushed
//! to a [`RunObserver`] as it happens so a front end can print the device
//! line before compilation starts, and nothing result-shaped is emitted for a
//! run that fails early.

use serde::Serialize;
use tracing::info;

use crate::backend::{AccessMode, Backend, NdRange};
use crate::collect::verify_uniform;
use crate::config::{PipelineConfig, ReportMode};
use crate::context::{ContextOptions, ExecutionContext};
use crate::device::{find_device, DeviceInfo};
use crate::dispatch::CompletedDispatch;
use crate::error::Result;

/// Receives progress events from [`run`].
pub trait RunObserver {
    /// A qualifying device was found.
    fn device_selected(&mut self, _device: &DeviceInfo) {}

    /// The kernel finished executing.
    fn dispatch_completed(&mut self, _dispatch: &CompletedDispatch) {}

    /// Results were read back. Called before verification.
    fn results_read(&mut self, _values: &[f64]) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub backend: &'static str,
    pub device: DeviceInfo,
    pub kernel: String,
    pub source: String,
    pub work_items: usize,
    pub global: [usize; 3],
    pub local: Option<[usize; 3]>,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_ms: Option<f64>,
    pub expected: f64,
    pub verified: bool,
    /// Every element, present only when the config asks for element reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<f64>>,
}

/// Run the pipeline once.
///
/// # Errors
///
/// The first failing stage's error. A run whose results do not verify fails
/// with [`crate::Error::Verification`] after the observer has seen them.
pub fn run<B: Backend>(
    backend: &B,
    config: &PipelineConfig,
    observer: &mut dyn RunObserver,
) -> Result<RunReport> {
    config.validate()?;

    let selected = find_device(backend, &config.requirements)?;
    observer.device_selected(&selected.info);

    let ctx = ExecutionContext::create(
        backend,
        selected,
        ContextOptions { profiling: config.profiling },
    )?;
    execute(&ctx, config, observer)
}

fn execute<B: Backend>(
    ctx: &ExecutionContext<'_, B>,
    config: &PipelineConfig,
    observer: &mut dyn RunObserver,
) -> Result<RunReport> {
    let n = config.work_size.resolve(ctx.device())?;

    let program = ctx.load_program(&config.source, &config.build_options)?;
    let mut kernel = program.kernel(&config.kernel_name)?;

    let a = vec![config.inputs.a; n];
    let b = vec![config.inputs.b; n];
    let buf_a = ctx.buffer_from_slice(AccessMode::ReadOnly, &a)?;
    let buf_b = ctx.buffer_from_slice(AccessMode::ReadOnly, &b)?;
    let buf_c = ctx.buffer_uninit::<f64>(AccessMode::ReadWrite, n)?;

    kernel.set_arg(0, &buf_a)?.set_arg(1, &buf_b)?.set_arg(2, &buf_c)?;

    let mut range = NdRange::linear(n);
    if let Some(local) = config.local_size {
        range = range.with_local([local, 1, 1]);
    }

    let done = ctx.enqueue(&kernel, range)?.wait()?;
    observer.dispatch_completed(&done);

    let results = ctx.read_back(&buf_c)?;
    observer.results_read(&results);

    let expected = config.inputs.expected();
    verify_uniform(&results, expected)?;
    info!("Verified {} result(s) equal to {} in {:.3} ms", n, expected, done.elapsed_ms());

    Ok(RunReport {
        backend: ctx.backend().name(),
        device: ctx.device().clone(),
        kernel: config.kernel_name.clone(),
        source: config.source.label(),
        work_items: done.work_items,
        global: range.global,
        local: range.local,
        elapsed_ms: done.elapsed_ms(),
        device_ms: done.device_ms(),
        expected,
        verified: true,
        results: (config.report == ReportMode::Elements).then_some(results),
    })
}
