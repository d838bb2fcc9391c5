/// Post-condition checks run after a device's step sequence
///
/// A verifier only ever sees sessions whose last executed step succeeded and
/// no critical step failed; it can downgrade such a session to Failed but
/// never upgrade one.
use crate::method::StepKind;
use crate::{DeviceDescriptor, StepResult};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    PassThrough,
    ZeroSample,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub method: VerificationMethod,
    pub passed: bool,
    pub detail: String,
}

impl VerificationCheck {
    fn pass_through(last_step: Option<&StepResult>) -> Self {
        match last_step {
            Some(step) if step.is_success() => Self {
                method: VerificationMethod::PassThrough,
                passed: true,
                detail: format!("last step '{}' reported success", step.step_name),
            },
            Some(step) => Self {
                method: VerificationMethod::PassThrough,
                passed: false,
                detail: format!("last step '{}' did not succeed", step.step_name),
            },
            None => Self {
                method: VerificationMethod::PassThrough,
                passed: false,
                detail: "no step was executed".to_string(),
            },
        }
    }
}

pub trait Verifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        device: &'a DeviceDescriptor,
        last_step: Option<&'a StepResult>,
    ) -> BoxFuture<'a, VerificationCheck>;
}

/// Verified whenever the last executed step itself reported success
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughVerifier;

impl Verifier for PassThroughVerifier {
    fn verify<'a>(
        &'a self,
        _device: &'a DeviceDescriptor,
        last_step: Option<&'a StepResult>,
    ) -> BoxFuture<'a, VerificationCheck> {
        futures::future::ready(VerificationCheck::pass_through(last_step)).boxed()
    }
}

/// Reads windows at the start, middle and end of the device after a zeroing
/// overwrite and requires every sampled byte to be zero
#[derive(Debug, Clone, Copy)]
pub struct ZeroSampleVerifier {
    sample_bytes: u64,
}

impl Default for ZeroSampleVerifier {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl ZeroSampleVerifier {
    pub fn new(sample_bytes: u64) -> Self {
        Self { sample_bytes }
    }

    async fn check(&self, device: &DeviceDescriptor, last_step: Option<&StepResult>) -> VerificationCheck {
        let step = match last_step {
            Some(step) if step.is_success() => step,
            _ => return VerificationCheck::pass_through(last_step),
        };

        if !matches!(step.kind, StepKind::Overwrite { zero_final: true, .. }) || self.sample_bytes == 0 {
            return VerificationCheck::pass_through(last_step);
        }

        match self.sample(device).await {
            Ok(None) => VerificationCheck {
                method: VerificationMethod::ZeroSample,
                passed: true,
                detail: format!("sampled {} bytes at 3 offsets, all zero", self.sample_bytes),
            },
            Ok(Some(offset)) => {
                tracing::error!(device = %device.path, offset = offset, "Non-zero data found after zeroing overwrite");
                VerificationCheck {
                    method: VerificationMethod::ZeroSample,
                    passed: false,
                    detail: format!("non-zero byte at offset {}", offset),
                }
            }
            Err(e) => {
                tracing::warn!(
                    device = %device.path,
                    error = %e,
                    "Device unreadable for zero sampling, falling back to pass-through"
                );
                VerificationCheck::pass_through(last_step)
            }
        }
    }

    /// Offset of the first non-zero byte found, if any
    async fn sample(&self, device: &DeviceDescriptor) -> std::io::Result<Option<u64>> {
        let mut file = tokio::fs::File::open(&device.path).await?;
        let size = if device.capacity_bytes > 0 {
            device.capacity_bytes
        } else {
            file.metadata().await?.len()
        };

        if size == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "device reports zero size",
            ));
        }

        let window = self.sample_bytes.min(size);
        let mut offsets = vec![0, (size / 2).saturating_sub(window / 2), size - window];
        offsets.dedup();

        let mut buf = vec![0u8; window as usize];
        for offset in offsets {
            file.seek(SeekFrom::Start(offset)).await?;
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if let Some(pos) = buf[..filled].iter().position(|b| *b != 0) {
                return Ok(Some(offset + pos as u64));
            }
        }

        Ok(None)
    }
}

impl Verifier for ZeroSampleVerifier {
    fn verify<'a>(
        &'a self,
        device: &'a DeviceDescriptor,
        last_step: Option<&'a StepResult>,
    ) -> BoxFuture<'a, VerificationCheck> {
        self.check(device, last_step).boxed()
    }
}
