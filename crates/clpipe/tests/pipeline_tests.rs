//! End-to-end pipeline runs on the simulated runtime.

use clpipe::{
    run, CompletedDispatch, DeviceInfo, Error, InputPattern, KernelSource, NullObserver,
    PipelineConfig, Preset, ReportMode, RunObserver, SimTopology, SimulatedBackend, WorkSize,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Records what the pipeline reported, in order.
#[derive(Default)]
struct Recorder {
    events: Vec<String>,
    device: Option<String>,
    results: Vec<f64>,
}

impl RunObserver for Recorder {
    fn device_selected(&mut self, device: &DeviceInfo) {
        self.events.push("device".into());
        self.device = Some(device.name.clone());
    }

    fn dispatch_completed(&mut self, dispatch: &CompletedDispatch) {
        self.events.push(format!("dispatch:{}", dispatch.work_items));
    }

    fn results_read(&mut self, values: &[f64]) {
        self.events.push("results".into());
        self.results = values.to_vec();
    }
}

fn standard() -> SimulatedBackend {
    SimulatedBackend::from_topology(SimTopology::Standard)
}

// ── Successful runs ──────────────────────────────────────────────────────────

#[test]
fn main_preset_adds_thirty_two_elements() {
    let backend = standard();
    let mut recorder = Recorder::default();
    let report = run(&backend, &PipelineConfig::default(), &mut recorder).unwrap();

    assert_eq!(report.backend, "sim");
    assert_eq!(report.device.name, "Simulated GPU");
    assert_eq!(report.kernel, "main_kernel");
    assert_eq!(report.source, "embedded:main.cl");
    assert_eq!(report.work_items, 32);
    assert_eq!(report.global, [32, 1, 1]);
    assert_eq!(report.local, None);
    assert!(report.verified);
    assert!(report.elapsed_ms >= 0.0);
    assert_eq!(report.device_ms, None);
    assert_eq!(report.results, Some(vec![3.0; 32]));

    assert_eq!(recorder.events, ["device", "dispatch:32", "results"]);
    assert_eq!(recorder.device.as_deref(), Some("Simulated GPU"));
}

#[test]
fn device_max_presets_size_to_the_device() {
    let backend = standard();
    for preset in [Preset::Hello, Preset::Sandbox] {
        let config = preset.builder().build().unwrap();
        let report = run(&backend, &config, &mut NullObserver).unwrap();
        // 64 x 4 x 2 on the standard simulated GPU.
        assert_eq!(report.work_items, 512, "{preset}");
        assert_eq!(report.kernel, preset.kernel_name());
        assert_eq!(report.results, None);
        assert!(report.verified);
    }
}

#[test]
fn explicit_local_size_is_used() {
    let backend = standard();
    let config = Preset::Main.builder().local_size(Some(8)).profiling(true).build().unwrap();
    let report = run(&backend, &config, &mut NullObserver).unwrap();
    assert_eq!(report.local, Some([8, 1, 1]));
    assert!(report.device_ms.is_some());
}

#[test]
fn custom_inputs_change_the_expected_value() {
    let backend = standard();
    let config = Preset::Main
        .builder()
        .inputs(InputPattern { a: 0.25, b: 0.75 })
        .work_size(WorkSize::Fixed(100))
        .build()
        .unwrap();
    let report = run(&backend, &config, &mut NullObserver).unwrap();
    assert_eq!(report.expected, 1.0);
    assert_eq!(report.results.unwrap(), vec![1.0; 100]);
}

#[test]
fn mixed_topology_runs_on_first_qualifying_gpu() {
    let backend = SimulatedBackend::from_topology(SimTopology::Mixed);
    let report = run(&backend, &PipelineConfig::default(), &mut NullObserver).unwrap();
    assert_eq!(report.device.name, "Discrete GPU");
    assert_eq!(report.device.platform_name, "Simulated Vendor A");
}

#[test]
fn inline_source_with_custom_entry_point() {
    let backend = standard();
    let source = KernelSource::inline(
        "vadd",
        "#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n\
         __kernel void vector_add(__global const double *x, __global const double *y, __global double *z)\n\
         { size_t i = get_global_id(0); z[i] = x[i] + y[i]; }\n",
    );
    let config =
        PipelineConfig::builder().source(source).kernel_name("vector_add").report(ReportMode::Summary).build().unwrap();
    let report = run(&backend, &config, &mut NullObserver).unwrap();
    assert_eq!(report.source, "inline:vadd");
    assert_eq!(report.kernel, "vector_add");
}

#[test]
fn report_serializes_to_json() {
    let backend = standard();
    let report = run(&backend, &PipelineConfig::default(), &mut NullObserver).unwrap();
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["work_items"], 32);
    assert_eq!(json["verified"], true);
    assert_eq!(json["device"]["name"], "Simulated GPU");
    assert_eq!(json["results"].as_array().unwrap().len(), 32);
    assert!(json.get("device_ms").is_none());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[test]
fn corrupted_element_fails_verification_after_results_are_seen() {
    let backend = SimulatedBackend::from_topology(SimTopology::Faulty);
    let mut recorder = Recorder::default();
    let err = run(&backend, &PipelineConfig::default(), &mut recorder).unwrap_err();

    let Error::Verification(failure) = &err else {
        panic!("expected verification failure, got {err:?}");
    };
    assert_eq!(failure.total, 32);
    assert_eq!(failure.mismatches, 1);
    assert_eq!(failure.first_index, 7);
    assert_eq!(failure.actual, "NaN");
    assert!(err.is_verification());

    assert_eq!(recorder.events, ["device", "dispatch:32", "results"]);
    assert!(recorder.results[7].is_nan());
    assert_eq!(recorder.results[6], 3.0);
}

#[test]
fn no_fp64_device_fails_before_any_device_work() {
    let backend = SimulatedBackend::from_topology(SimTopology::NoFp64);
    let mut recorder = Recorder::default();
    let err = run(&backend, &PipelineConfig::default(), &mut recorder).unwrap_err();
    assert_eq!(err.category(), "discovery");
    assert!(recorder.events.is_empty());
}

#[test]
fn invalid_config_is_rejected_before_discovery() {
    let backend = SimulatedBackend::from_topology(SimTopology::NoPlatforms);
    let config = PipelineConfig { local_size: Some(5), ..PipelineConfig::default() };
    let err = run(&backend, &config, &mut NullObserver).unwrap_err();
    assert_eq!(err.category(), "config");
    assert!(err.to_string().contains("local size 5 does not divide work size 32"), "{err}");
}

#[test]
fn local_size_not_dividing_device_max_is_a_runtime_error() {
    let backend = standard();
    let config = Preset::Hello.builder().local_size(Some(3)).build().unwrap();
    let err = run(&backend, &config, &mut NullObserver).unwrap_err();
    assert_eq!(err.category(), "runtime");
    assert!(err.to_string().contains("CL_INVALID_WORK_GROUP_SIZE"), "{err}");
}

#[test]
fn missing_source_file_is_reported_with_its_path() {
    let backend = standard();
    let config = PipelineConfig::builder().source_file("/no/such/dir/kernel.cl").build().unwrap();
    let err = run(&backend, &config, &mut NullObserver).unwrap_err();
    assert_eq!(err.category(), "source");
    assert!(err.to_string().contains("/no/such/dir/kernel.cl"));
}

#[test]
fn unknown_kernel_name_is_a_compilation_error() {
    let backend = standard();
    let config = Preset::Main.builder().kernel_name("nope").build().unwrap();
    let err = run(&backend, &config, &mut NullObserver).unwrap_err();
    assert_eq!(err.category(), "compilation");
    assert!(err.to_string().contains("program defines: main_kernel"), "{err}");
}
