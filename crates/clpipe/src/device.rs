//! Platform/device enumeration and capability-based selection.
//!
//! Platforms are walked in the order the runtime reports them and, within a
//! platform, GPUs in device order. The first device satisfying the
//! [`DeviceRequirements`] wins. A platform whose device query fails
//! contributes no devices; discovery carries on with the next platform.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{DiscoveryError, Result};

/// Extensions that advertise IEEE double precision support.
pub const FP64_EXTENSIONS: [&str; 2] = ["cl_khr_fp64", "cl_amd_fp64"];

// ── DeviceInfo ──────────────────────────────────────────────────────────────

/// Attributes of one GPU device, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub platform_name: String,
    pub driver_version: String,
    /// `CL_DEVICE_AVAILABLE`.
    pub available: bool,
    /// Whitespace-separated extension tokens, de-duplicated.
    pub extensions: BTreeSet<String>,
    pub max_work_item_sizes: [usize; 3],
    pub max_work_group_size: usize,
    pub global_mem_bytes: u64,
}

impl DeviceInfo {
    /// Split a raw `CL_DEVICE_EXTENSIONS` string into tokens.
    pub fn parse_extensions(raw: &str) -> BTreeSet<String> {
        raw.split_whitespace().map(str::to_owned).collect()
    }

    /// Whether the device advertises `extension` as a whole token.
    pub fn has_extension(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }

    pub fn supports_fp64(&self) -> bool {
        FP64_EXTENSIONS.iter().any(|ext| self.has_extension(ext))
    }

    /// `XxYxZ` rendering of the per-dimension work-item limits.
    pub fn max_dimensions(&self) -> String {
        let [x, y, z] = self.max_work_item_sizes;
        format!("{x}x{y}x{z}")
    }
}

/// Format a byte count into a human-readable string.
#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Produce a human-readable summary of a device.
pub fn format_device_info(info: &DeviceInfo) -> String {
    let mut lines = Vec::with_capacity(8);

    lines.push(format!("Device:          {}", info.name));
    lines.push(format!("Vendor:          {}", info.vendor));
    lines.push(format!("Platform:        {}", info.platform_name));
    lines.push(format!("Driver:          {}", info.driver_version));
    lines.push(format!("Available:       {}", info.available));
    lines.push(format!("FP64:            {}", info.supports_fp64()));
    lines.push(format!("Global memory:   {}", format_bytes(info.global_mem_bytes)));
    lines.push(format!("Max workgroup:   {}", info.max_work_group_size));
    lines.push(format!("Max work items:  {}", info.max_dimensions()));

    lines.join("\n")
}

// ── DeviceRequirements ──────────────────────────────────────────────────────

/// Capability predicate a device must satisfy to be selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRequirements {
    /// Reject devices reporting `CL_DEVICE_AVAILABLE = false`.
    pub require_available: bool,
    /// Each group is satisfied when the device advertises at least one of
    /// its extensions; every group must be satisfied.
    pub extension_groups: Vec<Vec<String>>,
    /// Human-readable summary used in diagnostics.
    pub description: String,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self::double_precision()
    }
}

impl DeviceRequirements {
    /// An available GPU advertising `cl_khr_fp64` or `cl_amd_fp64`.
    pub fn double_precision() -> Self {
        Self {
            require_available: true,
            extension_groups: vec![FP64_EXTENSIONS.iter().map(|s| (*s).to_owned()).collect()],
            description: "double precision".into(),
        }
    }

    /// Any available GPU.
    pub fn any_available() -> Self {
        Self { require_available: true, extension_groups: Vec::new(), description: "any".into() }
    }

    /// Additionally require one of `any_of`.
    #[must_use]
    pub fn with_extension_group<I, S>(mut self, any_of: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group: Vec<String> = any_of.into_iter().map(Into::into).collect();
        self.description = format!("{} + {}", self.description, group.join("|"));
        self.extension_groups.push(group);
        self
    }

    /// Evaluate the predicate against one device.
    pub fn matches(&self, info: &DeviceInfo) -> bool {
        if self.require_available && !info.available {
            return false;
        }
        self.extension_groups
            .iter()
            .all(|group| group.iter().any(|ext| info.has_extension(ext)))
    }
}

// ── Discovery ───────────────────────────────────────────────────────────────

/// A device chosen by [`find_device`], paired with its runtime handle.
#[derive(Debug, Clone)]
pub struct SelectedDevice<D> {
    pub handle: D,
    pub info: DeviceInfo,
    pub platform_index: usize,
    pub device_index: usize,
}

/// One GPU seen during [`enumerate_devices`].
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    pub platform_index: usize,
    pub device_index: usize,
    pub info: DeviceInfo,
}

/// A platform's name and GPU handles, or `None` when its device query fails.
fn platform_devices<B: Backend>(
    backend: &B,
    platform: &B::Platform,
    platform_index: usize,
) -> Option<(String, Vec<B::Device>)> {
    let platform_name = backend.platform_name(platform).unwrap_or_else(|e| {
        debug!("Platform #{platform_index} name query failed: {e}");
        String::new()
    });
    debug!("Scanning platform #{}: {}", platform_index, platform_name);

    match backend.gpu_devices(platform) {
        Ok(handles) => Some((platform_name, handles)),
        Err(e) => {
            warn!("Skipping platform '{platform_name}': device query failed: {e}");
            None
        }
    }
}

fn platforms_or_not_found<B: Backend>(backend: &B) -> Result<Vec<B::Platform>> {
    let platforms = backend.platforms().map_err(|e| {
        debug!("Platform query failed: {e}");
        DiscoveryError::NoPlatforms
    })?;
    if platforms.is_empty() {
        return Err(DiscoveryError::NoPlatforms.into());
    }
    debug!("{} platform(s) reported by {}", platforms.len(), backend.name());
    Ok(platforms)
}

/// Select the first GPU satisfying `requirements`.
///
/// Devices are queried one at a time and the walk stops at the first match.
/// A device whose info query fails ends the scan of its platform; devices
/// before it stay eligible and the next platform is tried.
///
/// # Errors
///
/// [`DiscoveryError::NoPlatforms`] when the runtime has no platforms,
/// [`DiscoveryError::NoQualifyingDevice`] when no GPU qualifies.
pub fn find_device<B: Backend>(
    backend: &B,
    requirements: &DeviceRequirements,
) -> Result<SelectedDevice<B::Device>> {
    let platforms = platforms_or_not_found(backend)?;

    let mut inspected = 0usize;
    for (platform_index, platform) in platforms.iter().enumerate() {
        let Some((platform_name, handles)) = platform_devices(backend, platform, platform_index)
        else {
            continue;
        };

        for (device_index, handle) in handles.into_iter().enumerate() {
            let mut info = match backend.device_info(&handle) {
                Ok(info) => info,
                Err(e) => {
                    warn!(
                        "Abandoning platform '{platform_name}' at device #{device_index}: \
                         info query failed: {e}"
                    );
                    break;
                }
            };
            info.platform_name.clone_from(&platform_name);
            inspected += 1;

            let qualifies = requirements.matches(&info);
            debug!(
                "GPU {}.{} '{}': available={} fp64={} -> {}",
                platform_index,
                device_index,
                info.name,
                info.available,
                info.supports_fp64(),
                if qualifies { "match" } else { "skip" }
            );
            if qualifies {
                info!("Selected device '{}' on platform '{}'", info.name, info.platform_name);
                return Ok(SelectedDevice { handle, info, platform_index, device_index });
            }
        }
    }

    Err(DiscoveryError::NoQualifyingDevice {
        requirement: requirements.description.clone(),
        inspected,
    }
    .into())
}

/// List every GPU that answers its info query, on every platform that
/// answers its device query.
pub fn enumerate_devices<B: Backend>(backend: &B) -> Result<Vec<DiscoveredDevice>> {
    let platforms = platforms_or_not_found(backend)?;

    let mut found = Vec::new();
    for (platform_index, platform) in platforms.iter().enumerate() {
        let Some((platform_name, handles)) = platform_devices(backend, platform, platform_index)
        else {
            continue;
        };
        for (device_index, handle) in handles.iter().enumerate() {
            match backend.device_info(handle) {
                Ok(mut info) => {
                    info.platform_name.clone_from(&platform_name);
                    found.push(DiscoveredDevice { platform_index, device_index, info });
                }
                Err(e) => warn!("Skipping GPU {platform_index}.{device_index}: info query failed: {e}"),
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(available: bool, extensions: &str) -> DeviceInfo {
        DeviceInfo {
            name: "GPU".into(),
            vendor: "Vendor".into(),
            platform_name: String::new(),
            driver_version: "1.0".into(),
            available,
            extensions: DeviceInfo::parse_extensions(extensions),
            max_work_item_sizes: [1024, 1024, 64],
            max_work_group_size: 1024,
            global_mem_bytes: 1 << 30,
        }
    }

    #[test]
    fn double_precision_accepts_either_vendor_extension() {
        let req = DeviceRequirements::double_precision();
        assert!(req.matches(&info(true, "cl_khr_icd cl_khr_fp64")));
        assert!(req.matches(&info(true, "cl_amd_fp64 cl_khr_byte_addressable_store")));
    }

    #[test]
    fn double_precision_rejects_unavailable_device() {
        let req = DeviceRequirements::double_precision();
        assert!(!req.matches(&info(false, "cl_khr_fp64")));
    }

    #[test]
    fn extension_match_is_whole_token() {
        let req = DeviceRequirements::double_precision();
        assert!(!req.matches(&info(true, "cl_khr_fp64_extended")));
        assert!(!req.matches(&info(true, "xcl_khr_fp64")));
        assert!(!req.matches(&info(true, "")));
    }

    #[test]
    fn any_available_ignores_extensions() {
        assert!(DeviceRequirements::any_available().matches(&info(true, "")));
        assert!(!DeviceRequirements::any_available().matches(&info(false, "")));
    }

    #[test]
    fn extension_groups_are_conjunctive() {
        let req = DeviceRequirements::double_precision().with_extension_group(["cl_khr_fp16"]);
        assert!(req.matches(&info(true, "cl_khr_fp64 cl_khr_fp16")));
        assert!(!req.matches(&info(true, "cl_khr_fp64")));
        assert_eq!(req.description, "double precision + cl_khr_fp16");
    }

    #[test]
    fn descriptive_fields_do_not_affect_selection() {
        let bare = DeviceInfo {
            name: String::new(),
            vendor: String::new(),
            platform_name: String::new(),
            driver_version: String::new(),
            available: true,
            extensions: DeviceInfo::parse_extensions("cl_khr_fp64"),
            max_work_item_sizes: [1, 1, 1],
            max_work_group_size: 0,
            global_mem_bytes: 0,
        };
        assert!(DeviceRequirements::double_precision().matches(&bare));
        assert!(format_device_info(&bare).contains("Max workgroup:   0"));
    }

    #[test]
    fn format_device_info_lists_core_fields() {
        let mut dev = info(true, "cl_khr_fp64");
        dev.name = "Radeon".into();
        let text = format_device_info(&dev);
        assert!(text.contains("Device:          Radeon"));
        assert!(text.contains("FP64:            true"));
        assert!(text.contains("1024x1024x64"));
        assert!(text.contains("1.00 GB"));
    }
}
