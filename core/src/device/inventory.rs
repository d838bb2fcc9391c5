// Device inventory - turns the enumeration collaborator's output into descriptors
//
// Accepts the JSON shape produced by
// `lsblk -J -b -o NAME,MODEL,SERIAL,SIZE,TRAN,RO,TYPE,MOUNTPOINT` (or
// MOUNTPOINTS on newer releases). Partitions arrive as `children`; their
// mountpoints are folded into the parent disk so the session can unmount
// them. Output taken with `-d` has no children and is accepted too.
// Older lsblk releases emit numbers and booleans as strings, so both forms are
// accepted. Nothing here is trusted: every field is revalidated.

use crate::error::{WipeError, WipeResult};
use crate::DeviceDescriptor;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    size: Value,
    #[serde(default)]
    tran: Option<String>,
    #[serde(default)]
    ro: Value,
    #[serde(default, rename = "type")]
    device_type: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    mountpoints: Vec<Option<String>>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    /// Mountpoints of this entry and everything below it
    fn collect_mountpoints(&self, into: &mut Vec<String>) {
        let own = self.mountpoint.iter().chain(self.mountpoints.iter().flatten());
        for mountpoint in own {
            let mountpoint = clean_text(Some(mountpoint));
            if !mountpoint.is_empty() && !into.contains(&mountpoint) {
                into.push(mountpoint);
            }
        }
        for child in &self.children {
            child.collect_mountpoints(into);
        }
    }
}

/// Parse lsblk JSON into descriptors, keeping whole disks only
pub fn parse_lsblk_json(json: &str) -> WipeResult<Vec<DeviceDescriptor>> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    let mut devices = Vec::new();

    for entry in output.blockdevices {
        if let Some(kind) = entry.device_type.as_deref() {
            if !kind.eq_ignore_ascii_case("disk") {
                continue;
            }
        }

        let Some(name) = entry.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
            tracing::warn!("Skipping block device entry without a name");
            continue;
        };

        if should_skip_device(name) {
            tracing::debug!(device = %name, "Skipping virtual block device");
            continue;
        }

        let path = if name.starts_with("/dev/") {
            name.to_string()
        } else {
            format!("/dev/{}", name)
        };

        let bus_type = entry
            .tran
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| bus_hint_from_name(name).to_string());

        let mut mountpoints = Vec::new();
        entry.collect_mountpoints(&mut mountpoints);
        if !mountpoints.is_empty() {
            tracing::info!(device = %path, mounted = mountpoints.len(), "Device has mounted filesystems");
        }

        let descriptor = DeviceDescriptor {
            path,
            serial: clean_text(entry.serial.as_deref()),
            model: clean_text(entry.model.as_deref()),
            bus_type,
            capacity_bytes: parse_size(&entry.size),
            read_only: parse_flag(&entry.ro),
            mountpoints,
        };

        validate_descriptor(&descriptor)?;
        devices.push(descriptor);
    }

    Ok(devices)
}

pub fn load_lsblk_file(path: &Path) -> WipeResult<Vec<DeviceDescriptor>> {
    let json = std::fs::read_to_string(path)?;
    parse_lsblk_json(&json)
}

/// Reject descriptors the core cannot safely target
pub fn validate_descriptor(device: &DeviceDescriptor) -> WipeResult<()> {
    if device.path.trim().is_empty() {
        return Err(WipeError::InvalidDevice("empty device path".to_string()));
    }
    if device.path.contains(char::is_whitespace) || device.path.contains('\0') {
        return Err(WipeError::InvalidDevice(format!(
            "device path contains whitespace or NUL: {:?}",
            device.path
        )));
    }
    if !device.path.starts_with('/') {
        return Err(WipeError::InvalidDevice(format!(
            "device path must be absolute: {}",
            device.path
        )));
    }
    Ok(())
}

/// Loop devices, ram disks, device mapper and optical drives are never wipe targets
pub(crate) fn should_skip_device(device_name: &str) -> bool {
    let name = device_name.trim_start_matches("/dev/");
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("dm-")
        || name.starts_with("sr")
        || name.starts_with("zram")
}

/// Bus cue derived from the kernel device name when lsblk reports no transport
fn bus_hint_from_name(device_name: &str) -> &'static str {
    let name = device_name.trim_start_matches("/dev/");
    if name.starts_with("nvme") {
        "nvme"
    } else if name.starts_with("sd") || name.starts_with("hd") {
        "sata"
    } else {
        ""
    }
}

fn clean_text(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

fn parse_size(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn parse_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_u64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}
