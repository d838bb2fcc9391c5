// Allow uppercase acronyms for industry-standard terms like NVMe, ATA, SATA
#![allow(clippy::upper_case_acronyms)]

pub mod batch;
pub mod cancel;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod events;
pub mod executor;
pub mod method;
pub mod session;
pub mod ui;
pub mod verification;

// Re-export the orchestration entry points for convenience
pub use batch::{BatchCoordinator, BatchOutcome, WipeContext};
pub use cancel::CancelToken;
pub use crypto::{CertificateBuilder, CertificateSigner, WipeCertificate};
pub use device::classify;
pub use error::{WipeError, WipeResult};
pub use events::{event_queue, EventReceiver, EventSender, WipeEvent};
pub use method::{MethodClass, MethodRegistry, NistClass, SanitizationStep, StepCondition, StepKind};
pub use session::{SessionState, WipeSession};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of one storage device as supplied by the enumeration
/// collaborator. `bus_type` is kept as the raw string and only interpreted by
/// the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub path: String,
    pub serial: String,
    pub model: String,
    pub bus_type: String,
    pub capacity_bytes: u64,
    pub read_only: bool,
    /// Mounted filesystems on the device or its partitions
    #[serde(default)]
    pub mountpoints: Vec<String>,
}

impl DeviceDescriptor {
    pub fn new(path: impl Into<String>, bus_type: impl Into<String>, capacity_bytes: u64) -> Self {
        Self {
            path: path.into(),
            serial: String::new(),
            model: String::new(),
            bus_type: bus_type.into(),
            capacity_bytes,
            read_only: false,
            mountpoints: Vec::new(),
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_mountpoints<I, S>(mut self, mountpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mountpoints = mountpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Identity used to key sessions and events
    pub fn device_id(&self) -> &str {
        &self.path
    }

    pub fn capacity_gib(&self) -> u64 {
        const GIB: u64 = 1024 * 1024 * 1024;
        self.capacity_bytes.div_ceil(GIB)
    }
}

/// Person performing the sanitization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorMetadata {
    pub name: String,
    pub organization: String,
    pub title: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
}

/// Media being sanitized and where it goes afterwards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Media property number / asset tag
    pub asset_tag: String,
    pub source: Option<String>,
    pub backup_location: Option<String>,
    pub destination: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failed,
    TimedOut,
    /// Not run because its condition on the previous step did not hold
    Skipped,
}

/// Why a step did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    /// Exit status outside the step's success set; `code` is None when the
    /// process was killed by a signal
    ExitStatus { code: Option<i32> },
    MissingCompletionMarker { marker: String },
    FailureMarker { marker: String },
    UtilityUnavailable { utility: String, reason: String },
    Timeout { after_secs: u64 },
    Cancelled,
    ReadOnlyDevice,
    Io { reason: String },
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepFailure::ExitStatus { code: Some(code) } => write!(f, "exited with status {}", code),
            StepFailure::ExitStatus { code: None } => write!(f, "terminated by signal"),
            StepFailure::MissingCompletionMarker { marker } => {
                write!(f, "completion marker '{}' not found in output", marker)
            }
            StepFailure::FailureMarker { marker } => {
                write!(f, "output reported '{}'", marker)
            }
            StepFailure::UtilityUnavailable { utility, reason } => {
                write!(f, "utility '{}' unavailable: {}", utility, reason)
            }
            StepFailure::Timeout { after_secs } => write!(f, "timed out after {}s", after_secs),
            StepFailure::Cancelled => write!(f, "cancelled"),
            StepFailure::ReadOnlyDevice => write!(f, "device is read-only"),
            StepFailure::Io { reason } => write!(f, "I/O error: {}", reason),
        }
    }
}

/// Record of one executed (or refused) sanitization step. Appended to the
/// session history and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub step_name: String,
    pub kind: StepKind,
    pub critical: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub outcome: StepOutcome,
    pub failure: Option<StepFailure>,
    pub output_summary: Vec<String>,
}

impl StepResult {
    /// A step that never reached a process: cancellation, read-only device, etc.
    pub fn refused(index: usize, step: &SanitizationStep, failure: StepFailure) -> Self {
        let now = Utc::now();
        Self {
            index,
            step_name: step.name.clone(),
            kind: step.kind,
            critical: step.critical,
            started_at: now,
            finished_at: now,
            exit_code: None,
            outcome: StepOutcome::Failed,
            failure: Some(failure),
            output_summary: Vec::new(),
        }
    }

    /// A step whose run condition did not hold
    pub fn skipped(index: usize, step: &SanitizationStep) -> Self {
        let mut result = Self::refused(index, step, StepFailure::Cancelled);
        result.outcome = StepOutcome::Skipped;
        result.failure = None;
        result
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }

    pub fn was_executed(&self) -> bool {
        self.outcome != StepOutcome::Skipped
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, Some(StepFailure::Cancelled))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionOutcome {
    Verified,
    Failed,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Verified => write!(f, "Verified"),
            SessionOutcome::Failed => write!(f, "Failed"),
        }
    }
}

/// Result of driving one device through its method's step sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WipeSessionResult {
    pub device: DeviceDescriptor,
    pub method: MethodClass,
    pub steps: Vec<StepResult>,
    pub outcome: SessionOutcome,
    /// NIST SP 800-88 class actually achieved; None unless Verified
    pub nist_class: Option<NistClass>,
    pub verification: Option<verification::VerificationCheck>,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WipeSessionResult {
    /// Result for a session that could not produce its own record
    pub fn aborted(device: DeviceDescriptor, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        let method = classify(&device);
        Self {
            device,
            method,
            steps: Vec::new(),
            outcome: SessionOutcome::Failed,
            nist_class: None,
            verification: None,
            failure_reason: Some(reason.into()),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.outcome == SessionOutcome::Verified
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod lib_tests;
