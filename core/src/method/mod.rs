// Sanitization methods
//
// A MethodClass names a strategy; the registry maps each class to an ordered
// list of SanitizationSteps, each one an external utility invocation.

pub mod registry;

pub use registry::MethodRegistry;

use crate::DeviceDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MethodClass {
    NVMeCryptoErase,
    ATASecureErase,
    OverwriteFallback,
}

impl MethodClass {
    pub const ALL: [MethodClass; 3] = [
        MethodClass::NVMeCryptoErase,
        MethodClass::ATASecureErase,
        MethodClass::OverwriteFallback,
    ];

    /// Key used in configuration files
    pub fn config_key(&self) -> &'static str {
        match self {
            MethodClass::NVMeCryptoErase => "nvme_crypto_erase",
            MethodClass::ATASecureErase => "ata_secure_erase",
            MethodClass::OverwriteFallback => "overwrite_fallback",
        }
    }
}

impl fmt::Display for MethodClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodClass::NVMeCryptoErase => write!(f, "NVMe crypto erase"),
            MethodClass::ATASecureErase => write!(f, "ATA secure erase"),
            MethodClass::OverwriteFallback => write!(f, "Overwrite"),
        }
    }
}

impl FromStr for MethodClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        MethodClass::ALL
            .into_iter()
            .find(|class| class.config_key() == key)
            .ok_or_else(|| format!("unknown method class '{}'", s))
    }
}

/// NIST SP 800-88 sanitization category achieved by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NistClass {
    Clear,
    Purge,
}

/// What a step is expected to do to the media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Support checks, unmounting, ATA password setup and cleanup. Never
    /// sanitizes anything on its own.
    Preparation,
    CryptoErase,
    HardwareSecureErase,
    Overwrite {
        passes: u32,
        /// Final pass writes zeros (enables the zero-sample check)
        #[serde(default)]
        zero_final: bool,
    },
}

impl StepKind {
    /// Class achieved when this step succeeds; None for preparation steps
    pub fn nist_class(&self) -> Option<NistClass> {
        match self {
            StepKind::Preparation => None,
            StepKind::CryptoErase | StepKind::HardwareSecureErase => Some(NistClass::Purge),
            StepKind::Overwrite { .. } => Some(NistClass::Clear),
        }
    }

    pub fn is_overwrite(&self) -> bool {
        matches!(self, StepKind::Overwrite { .. })
    }
}

/// When a step runs, judged against the step immediately before it in the
/// same sequence. A skipped predecessor satisfies neither condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    #[default]
    Always,
    AfterSuccess,
    AfterFailure,
}

impl StepCondition {
    /// `previous` is None when there is no predecessor or it was skipped
    pub fn allows(&self, previous: Option<bool>) -> bool {
        match self {
            StepCondition::Always => true,
            StepCondition::AfterSuccess => previous == Some(true),
            StepCondition::AfterFailure => previous == Some(false),
        }
    }
}

/// External command with `{device}` and `{password}` placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Copy with one extra placeholder (e.g. `{mountpoint}`) filled in
    pub fn bind(&self, placeholder: &str, value: &str) -> Self {
        let pattern = format!("{{{}}}", placeholder);
        Self {
            program: self.program.clone(),
            args: self.args.iter().map(|arg| arg.replace(&pattern, value)).collect(),
        }
    }

    /// Substitute placeholders; returns program and argument vector
    pub fn render(&self, device: &DeviceDescriptor, password: &str) -> (String, Vec<String>) {
        let args = self
            .args
            .iter()
            .map(|arg| arg.replace("{device}", &device.path).replace("{password}", password))
            .collect();
        (self.program.clone(), args)
    }
}

/// Nominal step duration used to derive the enforced timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationHint {
    pub base_secs: u64,
    #[serde(default)]
    pub secs_per_gib: u64,
}

impl DurationHint {
    pub fn nominal(&self, device: &DeviceDescriptor) -> Duration {
        let secs = self
            .base_secs
            .saturating_add(self.secs_per_gib.saturating_mul(device.capacity_gib()));
        Duration::from_secs(secs)
    }
}

fn default_success_codes() -> Vec<i32> {
    vec![0]
}

/// One ordered step within a method class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizationStep {
    pub name: String,
    pub kind: StepKind,
    pub command: CommandTemplate,
    #[serde(default = "default_success_codes")]
    pub success_exit_codes: Vec<i32>,
    /// Substring that must appear in the output for the step to count as done
    #[serde(default)]
    pub completion_marker: Option<String>,
    /// Case-insensitive substring that fails the step whatever the exit code
    #[serde(default)]
    pub failure_marker: Option<String>,
    pub duration: DurationHint,
    /// Failure aborts the session instead of falling through to the next step
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub run_when: StepCondition,
}

impl SanitizationStep {
    pub fn new(name: impl Into<String>, kind: StepKind, command: CommandTemplate) -> Self {
        Self {
            name: name.into(),
            kind,
            command,
            success_exit_codes: default_success_codes(),
            completion_marker: None,
            failure_marker: None,
            duration: DurationHint {
                base_secs: 60,
                secs_per_gib: 0,
            },
            critical: false,
            run_when: StepCondition::Always,
        }
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_duration(mut self, base_secs: u64, secs_per_gib: u64) -> Self {
        self.duration = DurationHint {
            base_secs,
            secs_per_gib,
        };
        self
    }

    pub fn with_completion_marker(mut self, marker: impl Into<String>) -> Self {
        self.completion_marker = Some(marker.into());
        self
    }

    pub fn with_success_codes(mut self, codes: Vec<i32>) -> Self {
        self.success_exit_codes = codes;
        self
    }

    pub fn with_failure_marker(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = Some(marker.into());
        self
    }

    pub fn run_when(mut self, condition: StepCondition) -> Self {
        self.run_when = condition;
        self
    }
}
