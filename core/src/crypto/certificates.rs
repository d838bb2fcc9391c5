use super::signing::{self, CertificateSigner, SIGNATURE_ALGORITHM};
use crate::device::HostInfo;
use crate::error::{WipeError, WipeResult};
use crate::{MediaMetadata, OperatorMetadata, WipeSessionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

pub const FORMAT_VERSION: u32 = 1;

/// Prefix of every hashed payload, so a certificate hash can never collide
/// with a hash of some other JSON document
const DOMAIN_TAG: &[u8] = b"wipe-attest:certificate:v1\0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

impl Default for ToolInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Everything covered by the verification hash. Field order is the
/// serialization order and must not change within a format version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateBody {
    pub format_version: u32,
    pub batch_id: String,
    pub tool: ToolInfo,
    pub operator: OperatorMetadata,
    pub media: MediaMetadata,
    /// Machine the devices were wiped in
    pub host: HostInfo,
    /// Sorted by (device path, serial)
    pub sessions: Vec<WipeSessionResult>,
    pub batch_started_at: DateTime<Utc>,
    pub batch_finished_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

impl CertificateBody {
    /// Domain tag followed by the compact JSON of the body
    pub fn canonical_bytes(&self) -> WipeResult<Vec<u8>> {
        let mut bytes = DOMAIN_TAG.to_vec();
        serde_json::to_writer(&mut bytes, self)?;
        Ok(bytes)
    }

    pub fn digest(&self) -> WipeResult<[u8; 32]> {
        Ok(Sha256::digest(self.canonical_bytes()?).into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSignature {
    pub algorithm: String,
    pub key_id: String,
    /// Hex-encoded raw public key
    pub public_key: String,
    /// Hex-encoded signature over the raw hash bytes
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WipeCertificate {
    pub body: CertificateBody,
    /// Lowercase hex SHA-256 of the canonical body
    pub verification_hash: String,
    pub signed: bool,
    pub signature: Option<CertificateSignature>,
}

impl WipeCertificate {
    pub fn certificate_id(&self) -> &str {
        &self.body.batch_id
    }

    pub fn compute_hash(&self) -> WipeResult<String> {
        Ok(hex::encode(self.body.digest()?))
    }

    /// Recompute the hash and check the signature. With `trusted_key_id`
    /// the certificate must also be signed by that key.
    pub fn verify(&self, trusted_key_id: Option<&str>) -> WipeResult<()> {
        let digest = self.body.digest()?;
        let computed = hex::encode(digest);
        if computed != self.verification_hash {
            return Err(WipeError::HashMismatch {
                expected: self.verification_hash.clone(),
                computed,
            });
        }

        let signature = match (&self.signature, self.signed) {
            (Some(signature), true) => signature,
            (None, false) => {
                return match trusted_key_id {
                    Some(_) => Err(WipeError::SignatureInvalid(
                        "certificate is unsigned".to_string(),
                    )),
                    None => Ok(()),
                };
            }
            _ => {
                return Err(WipeError::SignatureInvalid(
                    "signed flag does not match signature presence".to_string(),
                ))
            }
        };

        if signature.algorithm != SIGNATURE_ALGORITHM {
            return Err(WipeError::SignatureInvalid(format!(
                "unsupported algorithm {}",
                signature.algorithm
            )));
        }

        let public_key = hex::decode(&signature.public_key)
            .map_err(|e| WipeError::SignatureInvalid(format!("public key: {}", e)))?;
        let value = hex::decode(&signature.value)
            .map_err(|e| WipeError::SignatureInvalid(format!("signature: {}", e)))?;

        let derived_id = signing::key_id(&public_key);
        if derived_id != signature.key_id {
            return Err(WipeError::SignatureInvalid(format!(
                "key id {} does not match embedded public key",
                signature.key_id
            )));
        }
        if let Some(trusted) = trusted_key_id {
            if trusted != derived_id {
                return Err(WipeError::SignatureInvalid(format!(
                    "signed by {}, expected {}",
                    derived_id, trusted
                )));
            }
        }

        signing::verify_signature(&public_key, &digest, &value)
    }

    pub fn to_json(&self) -> WipeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> WipeResult<()> {
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), batch_id = %self.body.batch_id, "Certificate saved");
        Ok(())
    }

    pub fn load(path: &Path) -> WipeResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Assembles, hashes and signs certificates. The signer is read-only shared
/// state for the whole process lifetime.
#[derive(Debug, Clone, Default)]
pub struct CertificateBuilder {
    signer: Option<Arc<CertificateSigner>>,
    tool: ToolInfo,
    host: HostInfo,
}

impl CertificateBuilder {
    pub fn new(signer: Option<Arc<CertificateSigner>>) -> Self {
        Self {
            signer,
            tool: ToolInfo::default(),
            host: HostInfo::default(),
        }
    }

    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    pub fn signer_key_id(&self) -> Option<&str> {
        self.signer.as_deref().map(CertificateSigner::key_id)
    }

    /// Signed certificate; `SigningUnavailable` without a key
    pub fn build(
        &self,
        batch_id: &str,
        operator: &OperatorMetadata,
        media: &MediaMetadata,
        sessions: Vec<WipeSessionResult>,
    ) -> WipeResult<WipeCertificate> {
        let signer = self.signer.as_ref().ok_or(WipeError::SigningUnavailable)?;
        let body = self.assemble(batch_id, operator, media, sessions, Utc::now());
        let digest = body.digest()?;

        let signature = CertificateSignature {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            key_id: signer.key_id().to_string(),
            public_key: signer.public_key_hex(),
            value: hex::encode(signer.sign(&digest)),
        };

        tracing::info!(
            batch_id = %batch_id,
            key_id = %signer.key_id(),
            sessions = body.sessions.len(),
            "Certificate signed"
        );

        Ok(WipeCertificate {
            body,
            verification_hash: hex::encode(digest),
            signed: true,
            signature: Some(signature),
        })
    }

    /// Hashed but explicitly unsigned certificate
    pub fn build_unsigned(
        &self,
        batch_id: &str,
        operator: &OperatorMetadata,
        media: &MediaMetadata,
        sessions: Vec<WipeSessionResult>,
    ) -> WipeResult<WipeCertificate> {
        let body = self.assemble(batch_id, operator, media, sessions, Utc::now());
        let verification_hash = hex::encode(body.digest()?);
        tracing::warn!(batch_id = %batch_id, "Issuing UNSIGNED certificate");

        Ok(WipeCertificate {
            body,
            verification_hash,
            signed: false,
            signature: None,
        })
    }

    fn assemble(
        &self,
        batch_id: &str,
        operator: &OperatorMetadata,
        media: &MediaMetadata,
        mut sessions: Vec<WipeSessionResult>,
        generated_at: DateTime<Utc>,
    ) -> CertificateBody {
        sessions.sort_by(|a, b| {
            (&a.device.path, &a.device.serial).cmp(&(&b.device.path, &b.device.serial))
        });

        let batch_started_at = sessions
            .iter()
            .map(|s| s.started_at)
            .min()
            .unwrap_or(generated_at);
        let batch_finished_at = sessions
            .iter()
            .map(|s| s.finished_at)
            .max()
            .unwrap_or(generated_at);

        CertificateBody {
            format_version: FORMAT_VERSION,
            batch_id: batch_id.to_string(),
            tool: self.tool.clone(),
            operator: operator.clone(),
            media: media.clone(),
            host: self.host.clone(),
            sessions,
            batch_started_at,
            batch_finished_at,
            generated_at,
        }
    }
}
