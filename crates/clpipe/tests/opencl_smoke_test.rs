//! Real hardware validation through the system OpenCL runtime.

#![cfg(feature = "opencl")]

use clpipe::{enumerate_devices, run, NullObserver, OpenClBackend, PipelineConfig, Preset};

#[test]
#[ignore = "requires OpenCL runtime - run with --ignored on GPU machine"]
fn lists_gpus() {
    let devices = enumerate_devices(&OpenClBackend::new()).unwrap();
    for device in &devices {
        eprintln!("{}", clpipe::format_device_info(&device.info));
    }
}

#[test]
#[ignore = "requires OpenCL runtime with an fp64 GPU - run with --ignored on GPU machine"]
fn main_preset_verifies_on_real_gpu() {
    let backend = OpenClBackend::new();
    let report = run(&backend, &PipelineConfig::default(), &mut NullObserver).unwrap();
    assert!(report.verified);
    assert_eq!(report.results, Some(vec![3.0; 32]));
}

#[test]
#[ignore = "requires OpenCL runtime with an fp64 GPU - run with --ignored on GPU machine"]
fn profiled_sandbox_reports_device_time() {
    let backend = OpenClBackend::new();
    let config = Preset::Sandbox.builder().profiling(true).build().unwrap();
    let report = run(&backend, &config, &mut NullObserver).unwrap();
    assert!(report.device_ms.is_some());
}
