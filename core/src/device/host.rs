// Host identification from the firmware DMI tables
//
// Recorded in the certificate next to the media so the wiped disks can be
// tied back to the machine they came out of. Missing or unreadable entries
// (containers, VMs without DMI, non-x86 boards) become "N/A".

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DMI_ROOT: &str = "/sys/class/dmi/id";
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub make_vendor: String,
    pub model_number: String,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            make_vendor: NOT_AVAILABLE.to_string(),
            model_number: NOT_AVAILABLE.to_string(),
        }
    }
}

impl HostInfo {
    pub fn detect() -> Self {
        Self::detect_from(Path::new(DMI_ROOT))
    }

    /// Read `sys_vendor` and `product_name` under `dmi_dir`
    pub fn detect_from(dmi_dir: &Path) -> Self {
        let host = Self {
            make_vendor: read_dmi_field(dmi_dir, "sys_vendor"),
            model_number: read_dmi_field(dmi_dir, "product_name"),
        };
        tracing::debug!(vendor = %host.make_vendor, model = %host.model_number, "Host identified");
        host
    }
}

fn read_dmi_field(dmi_dir: &Path, field: &str) -> String {
    match std::fs::read_to_string(dmi_dir.join(field)) {
        Ok(raw) => {
            let value: String = raw.chars().filter(|c| !c.is_control()).collect();
            let value = value.trim();
            if value.is_empty() {
                NOT_AVAILABLE.to_string()
            } else {
                value.to_string()
            }
        }
        Err(e) => {
            tracing::debug!(field = %field, error = %e, "DMI field unreadable");
            NOT_AVAILABLE.to_string()
        }
    }
}
