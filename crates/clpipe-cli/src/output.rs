//! Result rendering.
//!
//! Stdout carries results only: progress lines and element values in text
//! mode, a single JSON document in JSON mode. Logs and diagnostics go to
//! stderr.

use std::io::Write;

use clap::ValueEnum;
use clpipe::{CompletedDispatch, DeviceInfo, DiscoveredDevice, ReportMode, RunObserver, RunReport};
use serde::Serialize;

/// What `clpipe` writes on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Progress lines followed by element values or a summary.
    #[default]
    Text,
    /// A single JSON document: the run report or the device rows.
    Json,
}

/// Serialize `value` as pretty JSON on `out`.
pub fn emit_json<T: Serialize>(out: &mut impl Write, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    writeln!(out, "{json}")?;
    Ok(())
}

// ── Text progress ───────────────────────────────────────────────────────────

/// Prints pipeline progress as it happens.
///
/// Write errors are remembered and reported by [`TextObserver::finish`], since
/// observer callbacks cannot fail.
pub struct TextObserver<W: Write> {
    out: W,
    report: ReportMode,
    error: Option<std::io::Error>,
}

impl<W: Write> TextObserver<W> {
    pub fn new(out: W, report: ReportMode) -> Self {
        Self { out, report, error: None }
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        if self.error.is_none() {
            if let Err(e) = self.out.write_fmt(line).and_then(|()| self.out.write_all(b"\n")) {
                self.error = Some(e);
            }
        }
    }

    /// Print the closing summary of a verified run.
    pub fn summary(&mut self, report: &RunReport) {
        if self.report == ReportMode::Summary {
            self.emit(format_args!(
                "Verified {} results equal to {}",
                report.work_items, report.expected
            ));
        }
    }

    /// Flush and surface the first write error, if any.
    pub fn finish(mut self) -> std::io::Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> RunObserver for TextObserver<W> {
    fn device_selected(&mut self, device: &DeviceInfo) {
        self.emit(format_args!("Using device {}", device.name));
        self.emit(format_args!("Max dimensions: {}", device.max_dimensions()));
    }

    fn dispatch_completed(&mut self, dispatch: &CompletedDispatch) {
        self.emit(format_args!(
            "Executed {} work items in {:.3}ms",
            dispatch.work_items,
            dispatch.elapsed_ms()
        ));
        if let Some(device_ms) = dispatch.device_ms() {
            self.emit(format_args!("Device time: {device_ms:.3}ms"));
        }
    }

    fn results_read(&mut self, values: &[f64]) {
        if self.report == ReportMode::Elements {
            for (i, v) in values.iter().enumerate() {
                self.emit(format_args!("[{i}]: {v}"));
            }
        }
    }
}

// ── Device listing ──────────────────────────────────────────────────────────

/// One row of `clpipe devices`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRow {
    pub platform_index: usize,
    pub device_index: usize,
    pub qualifies: bool,
    #[serde(flatten)]
    pub info: DeviceInfo,
}

impl DeviceRow {
    pub fn new(device: DiscoveredDevice, qualifies: bool) -> Self {
        Self {
            platform_index: device.platform_index,
            device_index: device.device_index,
            qualifies,
            info: device.info,
        }
    }
}

/// Text rendering of a device listing.
pub fn render_devices(rows: &[DeviceRow]) -> String {
    if rows.is_empty() {
        return "No GPUs found\n".to_string();
    }
    let mut text = String::new();
    for row in rows {
        let marker = if row.qualifies { "*" } else { " " };
        text.push_str(&format!(
            "{marker} [{}.{}] {} ({}, {})\n",
            row.platform_index,
            row.device_index,
            row.info.name,
            row.info.platform_name,
            if row.info.available { "available" } else { "unavailable" },
        ));
        for line in clpipe::format_device_info(&row.info).lines() {
            text.push_str(&format!("      {line}\n"));
        }
    }
    text
}
