// Device classification - maps a descriptor's bus-type string to a method class
//
// The bus-type string comes from an untrusted collaborator, so it is
// normalized here before matching. NVMe cues win over ATA cues when a
// descriptor carries both.

use crate::method::MethodClass;
use crate::DeviceDescriptor;
use serde::{Deserialize, Serialize};

/// Longest bus-type string considered; anything beyond is ignored
const MAX_BUS_TYPE_LEN: usize = 64;

const ATA_TOKENS: &[&str] = &["ata", "sata", "esata", "pata", "ide", "atapi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusType {
    NVMe,
    ATA,
    Unrecognized,
}

impl BusType {
    /// Interpret a raw bus-type string (`tran` column, driver name, ...)
    pub fn from_raw(raw: &str) -> Self {
        let normalized = normalize_bus_type(raw);
        let tokens: Vec<&str> = normalized
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.iter().any(|t| t.starts_with("nvme")) {
            return BusType::NVMe;
        }

        if tokens
            .iter()
            .any(|t| ATA_TOKENS.contains(t) || t.starts_with("sata"))
        {
            return BusType::ATA;
        }

        BusType::Unrecognized
    }

    pub fn method_class(self) -> MethodClass {
        match self {
            BusType::NVMe => MethodClass::NVMeCryptoErase,
            BusType::ATA => MethodClass::ATASecureErase,
            BusType::Unrecognized => MethodClass::OverwriteFallback,
        }
    }
}

/// Lowercase, strip control characters and cap the length
pub fn normalize_bus_type(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .take(MAX_BUS_TYPE_LEN)
        .collect::<String>()
        .trim()
        .to_ascii_lowercase()
}

/// Outcome of classifying one descriptor, with the interpretation that led to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub bus: BusType,
    pub class: MethodClass,
    /// True when the bus type could not be recognized and the overwrite
    /// fallback was chosen by default
    pub ambiguous: bool,
}

pub fn classify_descriptor(device: &DeviceDescriptor) -> Classification {
    let bus = BusType::from_raw(&device.bus_type);
    Classification {
        bus,
        class: bus.method_class(),
        ambiguous: bus == BusType::Unrecognized,
    }
}

/// Total, deterministic mapping from descriptor to method class
pub fn classify(device: &DeviceDescriptor) -> MethodClass {
    classify_descriptor(device).class
}
