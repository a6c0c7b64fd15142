//! Request/response signing with HMAC-SHA256
//!
//! Bodies are signed as `base64(HMAC-SHA256(key, body))` and the signature
//! travels in the [`HASH_HEADER`] header. The agent signs every batch it
//! sends; the server verifies signed requests and signs its responses when a
//! key is configured.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const HASH_HEADER: &str = "HashSHA256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("failed to create HMAC: {0}")]
    HmacCreation(String),

    #[error("signature is not valid base64")]
    InvalidFormat,

    #[error("signature does not match body")]
    VerificationFailed,
}

/// Signs and verifies bodies with a shared key
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// A signer for an optional key; empty keys disable signing
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.filter(|key| !key.is_empty()).map(Self::new)
    }

    fn mac(&self) -> Result<HmacSha256, IntegrityError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| IntegrityError::HmacCreation(e.to_string()))
    }

    /// base64-encoded HMAC-SHA256 of `body`
    pub fn sign(&self, body: &[u8]) -> Result<String, IntegrityError> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Check `signature` against `body` in constant time
    pub fn verify(&self, body: &[u8], signature: &str) -> Result<(), IntegrityError> {
        let expected = STANDARD
            .decode(signature.trim())
            .map_err(|_| IntegrityError::InvalidFormat)?;

        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| IntegrityError::VerificationFailed)
    }
}
