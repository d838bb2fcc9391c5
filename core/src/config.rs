//! Runtime settings.
//!
//! Sources, lowest precedence first: built-in defaults, the per-user
//! `config.toml` under the platform config directory, an explicit `--config`
//! file, and `WIPE_ATTEST__*` environment variables (`__` separates nested
//! keys, e.g. `WIPE_ATTEST__SIGNING__KEY_PATH`). Settings are validated once
//! and are read-only afterwards.

use crate::crypto::CertificateSigner;
use crate::error::{WipeError, WipeResult};
use crate::executor::ExecutorSettings;
use crate::method::{MethodRegistry, SanitizationStep};
use crate::verification::{PassThroughVerifier, Verifier, ZeroSampleVerifier};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const ENV_PREFIX: &str = "WIPE_ATTEST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    #[default]
    PassThrough,
    ZeroSample,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    /// PKCS#8 Ed25519 private key
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub max_concurrent_devices: usize,
    pub progress_queue_capacity: usize,
    pub timeout_factor: f64,
    pub min_step_timeout_secs: u64,
    pub termination_grace_secs: u64,
    pub output_summary_lines: usize,
    pub allow_unsigned: bool,
    pub signing: SigningSettings,
    pub verification: VerificationMode,
    pub verification_sample_bytes: u64,
    /// Per-class step lists replacing the built-in ones, keyed by
    /// `nvme_crypto_erase`, `ata_secure_erase` or `overwrite_fallback`
    pub methods: BTreeMap<String, Vec<SanitizationStep>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_devices: num_cpus::get().clamp(1, 4),
            progress_queue_capacity: 256,
            timeout_factor: 2.0,
            min_step_timeout_secs: 60,
            termination_grace_secs: 5,
            output_summary_lines: 20,
            allow_unsigned: false,
            signing: SigningSettings::default(),
            verification: VerificationMode::default(),
            verification_sample_bytes: 1024 * 1024,
            methods: BTreeMap::new(),
        }
    }
}

/// `<config dir>/wipe-attest/config.toml`, if the platform has one
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "wipe-attest").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Settings {
    pub fn load(explicit: Option<&Path>) -> WipeResult<Self> {
        Self::load_with(user_config_path().as_deref(), explicit)
    }

    pub fn load_with(user_file: Option<&Path>, explicit: Option<&Path>) -> WipeResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = user_file {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;

        tracing::debug!(
            max_concurrent_devices = settings.max_concurrent_devices,
            verification = ?settings.verification,
            allow_unsigned = settings.allow_unsigned,
            "Settings loaded"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> WipeResult<()> {
        if self.max_concurrent_devices == 0 {
            return Err(WipeError::Config(
                "max_concurrent_devices must be at least 1".to_string(),
            ));
        }
        if self.progress_queue_capacity == 0 {
            return Err(WipeError::Config(
                "progress_queue_capacity must be at least 1".to_string(),
            ));
        }
        if !self.timeout_factor.is_finite() || self.timeout_factor <= 0.0 {
            return Err(WipeError::Config(format!(
                "timeout_factor must be a positive number, got {}",
                self.timeout_factor
            )));
        }
        self.registry()?;
        Ok(())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            timeout_factor: self.timeout_factor,
            min_step_timeout: Duration::from_secs(self.min_step_timeout_secs),
            termination_grace: Duration::from_secs(self.termination_grace_secs),
            output_summary_lines: self.output_summary_lines,
            ..ExecutorSettings::default()
        }
    }

    pub fn registry(&self) -> WipeResult<MethodRegistry> {
        if self.methods.is_empty() {
            Ok(MethodRegistry::builtin())
        } else {
            MethodRegistry::with_overrides(&self.methods)
        }
    }

    pub fn verifier(&self) -> Arc<dyn Verifier> {
        match self.verification {
            VerificationMode::PassThrough => Arc::new(PassThroughVerifier),
            VerificationMode::ZeroSample => {
                Arc::new(ZeroSampleVerifier::new(self.verification_sample_bytes))
            }
        }
    }

    /// Signing key from `signing.key_path`; None when not configured
    pub fn signer(&self) -> WipeResult<Option<Arc<CertificateSigner>>> {
        self.signing
            .key_path
            .as_deref()
            .map(|path| CertificateSigner::load(path).map(Arc::new))
            .transpose()
    }
}
