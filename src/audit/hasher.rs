//! Chain hashing and HMAC signing
//!
//! `chain_hash` is a pure function: SHA-256 over the canonical payload
//! concatenated with the predecessor hash, lowercase hex output. A null
//! predecessor is represented by the empty string; the same sentinel is used
//! on the write, verify and rehash paths.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

use crate::config::SignatureConfig;
use crate::error::AuditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigningAlgo {
    Sha256,
    Sha512,
}

/// Computes chain hashes and, when a secret is configured, HMAC signatures
/// over them.
#[derive(Debug, Clone)]
pub struct ChainHasher {
    signing: Option<(SigningAlgo, String)>,
}

impl ChainHasher {
    pub fn new(config: &SignatureConfig) -> Result<Self, AuditError> {
        let signing = if config.enabled {
            if config.secret.is_empty() {
                return Err(AuditError::Config(
                    "Signature layer enabled without a secret".to_string(),
                ));
            }
            let algo = match config.algo.as_str() {
                "sha256" => SigningAlgo::Sha256,
                "sha512" => SigningAlgo::Sha512,
                other => return Err(AuditError::unknown_signature_algo(other)),
            };
            Some((algo, config.secret.clone()))
        } else {
            None
        };

        Ok(Self { signing })
    }

    /// Hasher with the signature layer disabled.
    pub fn unsigned() -> Self {
        Self { signing: None }
    }

    pub fn signing_enabled(&self) -> bool {
        self.signing.is_some()
    }

    /// SHA-256 over `canonical || previous`, lowercase hex.
    pub fn chain_hash(&self, canonical: &str, previous: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hasher.update(previous.unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// HMAC over the hash string. `None` when signing is disabled.
    pub fn sign(&self, hash: &str) -> Option<String> {
        let (algo, secret) = self.signing.as_ref()?;
        let signature = match algo {
            SigningAlgo::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                    .expect("HMAC can take key of any size");
                mac.update(hash.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            SigningAlgo::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
                    .expect("HMAC can take key of any size");
                mac.update(hash.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
        };
        Some(signature)
    }
}
