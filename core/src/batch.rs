// Batch coordinator - one session per device, one certificate per batch
//
// Sessions run as independent tokio tasks bounded by a semaphore. A failed
// device never aborts its siblings; the certificate is built only after every
// session has reached its terminal state and records every outcome.

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::crypto::{CertificateBuilder, WipeCertificate};
use crate::device::inventory::validate_descriptor;
use crate::device::HostInfo;
use crate::error::{WipeError, WipeResult};
use crate::events::{EventSender, WipeEvent};
use crate::executor::{ProcessRunner, StepRunner};
use crate::method::MethodRegistry;
use crate::session::{SessionContext, WipeSession};
use crate::verification::Verifier;
use crate::{DeviceDescriptor, MediaMetadata, OperatorMetadata, SessionOutcome, WipeSessionResult};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Process-wide, read-only collaborators handed to the coordinator at
/// construction
#[derive(Clone)]
pub struct WipeContext {
    pub registry: Arc<MethodRegistry>,
    pub runner: Arc<dyn StepRunner>,
    pub verifier: Arc<dyn Verifier>,
    pub certificates: CertificateBuilder,
    pub max_concurrent_devices: usize,
    /// Issue an unsigned, flagged certificate when no key is configured
    pub allow_unsigned: bool,
}

impl WipeContext {
    pub fn new(
        registry: MethodRegistry,
        runner: Arc<dyn StepRunner>,
        verifier: Arc<dyn Verifier>,
        certificates: CertificateBuilder,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            runner,
            verifier,
            certificates,
            max_concurrent_devices: 1,
            allow_unsigned: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> WipeResult<Self> {
        let mut context = Self::new(
            settings.registry()?,
            Arc::new(ProcessRunner::new(settings.executor_settings())),
            settings.verifier(),
            CertificateBuilder::new(settings.signer()?).with_host(HostInfo::detect()),
        );
        context.max_concurrent_devices = settings.max_concurrent_devices;
        context.allow_unsigned = settings.allow_unsigned;
        Ok(context)
    }

    pub fn with_max_concurrent_devices(mut self, max: usize) -> Self {
        self.max_concurrent_devices = max;
        self
    }

    pub fn with_allow_unsigned(mut self, allow: bool) -> Self {
        self.allow_unsigned = allow;
        self
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: Arc::clone(&self.registry),
            runner: Arc::clone(&self.runner),
            verifier: Arc::clone(&self.verifier),
        }
    }
}

/// Aggregate of per-device outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub verified: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn from_sessions(sessions: &[WipeSessionResult]) -> Self {
        let verified = sessions.iter().filter(|s| s.is_verified()).count();
        Self {
            total: sessions.len(),
            verified,
            failed: sessions.len() - verified,
        }
    }

    pub fn from_certificate(certificate: &WipeCertificate) -> Self {
        Self::from_sessions(&certificate.body.sessions)
    }

    /// Some devices verified and some failed
    pub fn is_partial_failure(&self) -> bool {
        self.verified > 0 && self.failed > 0
    }

    pub fn all_verified(&self) -> bool {
        self.total > 0 && self.failed == 0
    }
}

pub struct BatchCoordinator {
    context: WipeContext,
    events: EventSender,
    cancel: CancelToken,
}

impl BatchCoordinator {
    pub fn new(context: WipeContext, events: EventSender, cancel: CancelToken) -> Self {
        Self {
            context,
            events,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn run(
        &self,
        operator: OperatorMetadata,
        media: MediaMetadata,
        devices: Vec<DeviceDescriptor>,
    ) -> WipeResult<WipeCertificate> {
        let signed = self.context.certificates.can_sign();
        if !signed && !self.context.allow_unsigned {
            let err = WipeError::SigningUnavailable;
            tracing::error!(error = %err, "Refusing to start batch");
            self.events.send(WipeEvent::BatchFailed {
                error: err.to_string(),
            });
            return Err(err);
        }

        let batch_id = Uuid::new_v4().to_string();
        let devices = dedupe_devices(devices);
        let concurrency = self.context.max_concurrent_devices.max(1);

        tracing::info!(
            batch_id = %batch_id,
            devices = devices.len(),
            concurrency = concurrency,
            signed = signed,
            "Starting wipe batch"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut pending = Vec::with_capacity(devices.len());
        let mut rejected = Vec::new();

        for device in devices {
            if let Err(e) = validate_descriptor(&device) {
                tracing::error!(device = %device.path, error = %e, "Rejecting device descriptor");
                let reason = e.to_string();
                self.events
                    .reporter(device.path.clone())
                    .terminal(SessionOutcome::Failed, Some(reason.clone()));
                rejected.push(WipeSessionResult::aborted(device, reason));
                continue;
            }

            let session = WipeSession::new(
                device.clone(),
                self.context.session_context(),
                self.events.reporter(device.path.clone()),
                self.cancel.clone(),
            );
            let semaphore = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                session.run().await
            });
            pending.push((device, handle));
        }

        let joined = futures::future::join_all(pending.into_iter().map(|(device, handle)| {
            let reporter = self.events.reporter(device.path.clone());
            async move {
                match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(device = %device.path, error = %e, "Session task failed");
                        let reason = WipeError::SessionAborted(format!("session task failed: {}", e))
                            .to_string();
                        reporter.terminal(SessionOutcome::Failed, Some(reason.clone()));
                        WipeSessionResult::aborted(device, reason)
                    }
                }
            }
        }))
        .await;

        let mut sessions = rejected;
        sessions.extend(joined);

        let outcome = BatchOutcome::from_sessions(&sessions);
        tracing::info!(
            batch_id = %batch_id,
            verified = outcome.verified,
            failed = outcome.failed,
            cancelled = self.cancel.is_cancelled(),
            "All sessions terminal"
        );

        let certificate = if signed {
            self.context
                .certificates
                .build(&batch_id, &operator, &media, sessions)
        } else {
            self.context
                .certificates
                .build_unsigned(&batch_id, &operator, &media, sessions)
        };

        match certificate {
            Ok(certificate) => {
                self.events.send(WipeEvent::BatchComplete {
                    certificate: Box::new(certificate.clone()),
                });
                Ok(certificate)
            }
            Err(e) => {
                tracing::error!(batch_id = %batch_id, error = %e, "Certificate generation failed");
                self.events.send(WipeEvent::BatchFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

/// One entry per device identity: first occurrence of a path wins, and a
/// later entry repeating a known non-empty serial under another path is the
/// same physical device
pub fn dedupe_devices(devices: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    let mut paths = HashSet::new();
    let mut serials = HashSet::new();

    devices
        .into_iter()
        .filter(|device| {
            let serial = device.serial.trim();
            let duplicate =
                paths.contains(&device.path) || (!serial.is_empty() && serials.contains(serial));
            if duplicate {
                tracing::warn!(device = %device.path, serial = %device.serial, "Dropping duplicate device selection");
                return false;
            }
            paths.insert(device.path.clone());
            if !serial.is_empty() {
                serials.insert(serial.to_string());
            }
            true
        })
        .collect()
}
