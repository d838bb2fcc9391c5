// Ed25519 signing key management
//
// Keys are PKCS#8 documents as produced by ring. The private half never leaves
// this type: Debug prints only the key id.

use crate::error::{WipeError, WipeResult};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::path::Path;

pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

pub struct CertificateSigner {
    key_pair: Ed25519KeyPair,
    key_id: String,
}

impl fmt::Debug for CertificateSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl CertificateSigner {
    pub fn from_pkcs8(pkcs8: &[u8]) -> WipeResult<Self> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| WipeError::KeyRejected(e.to_string()))?;
        let key_id = key_id(key_pair.public_key().as_ref());
        Ok(Self { key_pair, key_id })
    }

    pub fn load(path: &Path) -> WipeResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            WipeError::KeyRejected(format!("cannot read {}: {}", path.display(), e))
        })?;
        let signer = Self::from_pkcs8(&bytes)?;
        tracing::info!(key_id = %signer.key_id, "Signing key loaded");
        Ok(signer)
    }

    /// Fresh PKCS#8 document from the system RNG
    pub fn generate_pkcs8() -> WipeResult<Vec<u8>> {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| WipeError::KeyRejected("key generation failed".to_string()))?;
        Ok(document.as_ref().to_vec())
    }

    /// Generate a key and write it to `path`; refuses to overwrite
    pub fn generate_to_file(path: &Path) -> WipeResult<Self> {
        let pkcs8 = Self::generate_pkcs8()?;
        let signer = Self::from_pkcs8(&pkcs8)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(&pkcs8)?;
        file.sync_all()?;

        tracing::info!(key_id = %signer.key_id, path = %path.display(), "Signing key generated");
        Ok(signer)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key_pair.public_key().as_ref())
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key_pair.sign(message).as_ref().to_vec()
    }
}

/// First 16 hex characters of SHA-256 over the raw public key
pub fn key_id(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode(digest)[..16].to_string()
}

pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> WipeResult<()> {
    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(message, signature)
        .map_err(|_| WipeError::SignatureInvalid("Ed25519 verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = CertificateSigner::from_pkcs8(&CertificateSigner::generate_pkcs8().unwrap()).unwrap();
        let public = hex::decode(signer.public_key_hex()).unwrap();
        let signature = signer.sign(b"payload");

        verify_signature(&public, b"payload", &signature).unwrap();
        assert!(matches!(
            verify_signature(&public, b"tampered", &signature),
            Err(WipeError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_key_id_is_stable() {
        let pkcs8 = CertificateSigner::generate_pkcs8().unwrap();
        let a = CertificateSigner::from_pkcs8(&pkcs8).unwrap();
        let b = CertificateSigner::from_pkcs8(&pkcs8).unwrap();
        assert_eq!(a.key_id(), b.key_id());
        assert_eq!(a.key_id().len(), 16);
    }

    #[test]
    fn test_garbage_key_rejected() {
        assert!(matches!(
            CertificateSigner::from_pkcs8(b"not a key"),
            Err(WipeError::KeyRejected(_))
        ));
    }

    #[test]
    fn test_debug_hides_private_key() {
        let signer = CertificateSigner::from_pkcs8(&CertificateSigner::generate_pkcs8().unwrap()).unwrap();
        let debug = format!("{:?}", signer);
        assert!(debug.contains(signer.key_id()));
        assert!(!debug.contains("key_pair"));
    }

    #[test]
    fn test_generate_to_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.pk8");

        let generated = CertificateSigner::generate_to_file(&path).unwrap();
        let loaded = CertificateSigner::load(&path).unwrap();
        assert_eq!(generated.key_id(), loaded.key_id());

        // never clobbers an existing key
        assert!(CertificateSigner::generate_to_file(&path).is_err());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
