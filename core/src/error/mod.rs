/// Error taxonomy for wipe orchestration
///
/// Step-level failures (a utility exiting non-zero, a timeout, a missing
/// binary) are recorded as data in [`crate::StepResult`] and never surface
/// here as `Err`. This enum carries the failures that cross a component
/// boundary:
///
/// ```text
/// step      UtilityUnavailable, StepTimeout        -> recorded, session continues or aborts
/// device    SessionAborted                         -> Terminal(Failed), siblings unaffected
/// batch     SigningUnavailable                     -> propagated to the caller
/// ambient   Io, Serialization, Config, ...         -> propagated to the caller
/// ```
///
/// `ClassificationAmbiguous` is logged and resolved to the overwrite fallback,
/// and a mixed-outcome batch is a valid certificate rather than an error.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WipeError {
    #[error("Device classification ambiguous for {0}, using overwrite fallback")]
    ClassificationAmbiguous(String),

    #[error("Sanitization utility unavailable: {0}")]
    UtilityUnavailable(String),

    #[error("Step timed out: {0}")]
    StepTimeout(String),

    #[error("Session aborted: {0}")]
    SessionAborted(String),

    #[error("No signing key configured; refusing to issue a signed certificate")]
    SigningUnavailable,

    #[error("Invalid method registry: {0}")]
    InvalidRegistry(String),

    #[error("Invalid device descriptor: {0}")]
    InvalidDevice(String),

    #[error("Signing key rejected: {0}")]
    KeyRejected(String),

    #[error("Certificate hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },

    #[error("Certificate signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for WipeError {
    fn from(err: config::ConfigError) -> Self {
        WipeError::Config(err.to_string())
    }
}

impl WipeError {
    /// Whether this error ends the whole batch rather than one device
    pub fn is_batch_level(&self) -> bool {
        matches!(
            self,
            WipeError::SigningUnavailable
                | WipeError::InvalidRegistry(_)
                | WipeError::KeyRejected(_)
                | WipeError::Config(_)
        )
    }
}

pub type WipeResult<T> = Result<T, WipeError>;
