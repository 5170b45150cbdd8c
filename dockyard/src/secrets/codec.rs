//! Secrets codec

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use secrecy::{ExposeSecret, SecretString};

use crate::errors::{PlatformError, PlatformResult};
use crate::utils::sha256_digest;

/// AES-GCM nonce length in bytes
const NONCE_LENGTH: usize = 12;

/// Symmetric encryption boundary for stored secrets.
///
/// The same ciphertext always decrypts to the same plaintext; encrypting the
/// same plaintext twice is not expected to give the same ciphertext.
pub trait SecretsCodec: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> PlatformResult<String>;

    fn decrypt(&self, ciphertext: &str) -> PlatformResult<String>;
}

/// AES-256-GCM codec keyed by the platform secret
#[derive(Clone)]
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    /// Derive the 256-bit key as SHA-256 of the platform secret
    pub fn new(platform_secret: &SecretString) -> PlatformResult<Self> {
        let secret = platform_secret.expose_secret();
        if secret.is_empty() {
            return Err(PlatformError::ConfigError(
                "platform secret key must not be empty".to_string(),
            ));
        }

        let key = sha256_digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| PlatformError::CryptoError(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }
}

impl SecretsCodec for AesGcmCodec {
    fn encrypt(&self, plaintext: &str) -> PlatformResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| PlatformError::CryptoError(format!("Encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(combined))
    }

    fn decrypt(&self, encrypted: &str) -> PlatformResult<String> {
        let combined = STANDARD
            .decode(encrypted)
            .map_err(|e| PlatformError::CryptoError(format!("Failed to decode base64: {}", e)))?;

        if combined.len() < NONCE_LENGTH {
            return Err(PlatformError::CryptoError(
                "Encrypted data too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| PlatformError::CryptoError(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|_| PlatformError::CryptoError("Decrypted data is not valid UTF-8".to_string()))
    }
}
