//! VAPID keypair — P-256 generation, encoding, validation, and fingerprint.
//!
//! Encoding matches what web push libraries exchange:
//! - public key: 65-byte uncompressed SEC1 point, base64url without padding
//! - private key: 32-byte scalar, base64url without padding
//!
//! The fingerprint is the first 8 hex chars of `SHA256(public_key_bytes)`; it
//! identifies a keypair in logs without printing key material.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::{PublicKey, SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use crate::error::AppError;

const PUBLIC_KEY_LEN: usize = 65;
const PRIVATE_KEY_LEN: usize = 32;

/// An encoded VAPID keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct VapidKeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl std::fmt::Debug for VapidKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl VapidKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        Self::from_secret(&secret)
    }

    fn from_secret(secret: &SecretKey) -> Self {
        let public = secret.public_key().to_encoded_point(false);
        Self {
            public_key: URL_SAFE_NO_PAD.encode(public.as_bytes()),
            private_key: URL_SAFE_NO_PAD.encode(secret.to_bytes()),
        }
    }

    /// Decode and check a stored keypair: both halves must be well-formed and
    /// the private key must derive the public key.
    pub fn validate(&self) -> Result<(), AppError> {
        let public_bytes = decode("public_key", &self.public_key)?;
        if public_bytes.len() != PUBLIC_KEY_LEN {
            return Err(AppError::InvalidRecord(format!(
                "public_key is {} bytes, expected {PUBLIC_KEY_LEN}",
                public_bytes.len()
            )));
        }
        let public = PublicKey::from_sec1_bytes(&public_bytes)
            .map_err(|_| AppError::InvalidRecord("public_key is not a P-256 point".into()))?;

        let private_bytes = decode("private_key", &self.private_key)?;
        if private_bytes.len() != PRIVATE_KEY_LEN {
            return Err(AppError::InvalidRecord(format!(
                "private_key is {} bytes, expected {PRIVATE_KEY_LEN}",
                private_bytes.len()
            )));
        }
        let secret = SecretKey::from_slice(&private_bytes)
            .map_err(|_| AppError::InvalidRecord("private_key is not a valid P-256 scalar".into()))?;

        if secret.public_key() != public {
            return Err(AppError::InvalidRecord(
                "keypair mismatch: public_key does not match private_key".into(),
            ));
        }
        Ok(())
    }

    /// Short identifier for logs. Falls back to hashing the encoded string when
    /// the public key does not decode.
    pub fn fingerprint(&self) -> String {
        let digest = match URL_SAFE_NO_PAD.decode(self.public_key.trim_end_matches('=')) {
            Ok(bytes) => Sha256::digest(bytes),
            Err(_) => Sha256::digest(self.public_key.as_bytes()),
        };
        hex::encode(digest)[..8].to_string()
    }
}

/// Stored keys may carry `=` padding; the alphabet is always URL-safe.
fn decode(field: &str, value: &str) -> Result<Vec<u8>, AppError> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| AppError::InvalidRecord(format!("{field} is not base64url: {e}")))
}
