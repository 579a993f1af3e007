// Authenticated encryption for sensitive fields

use crate::{effects::Effects, keys::DomainKey, AnonymizationError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// AES-GCM nonce length
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM encryptor bound to one domain key.
///
/// Output layout is `nonce || ciphertext || tag` with a fresh random nonce per
/// call, so equal plaintexts never produce equal ciphertexts.
#[derive(Clone, Debug)]
pub struct Encryptor {
    key: DomainKey,
    effects: Effects,
}

impl Encryptor {
    /// Create an encryptor from raw key bytes (must be exactly 32 bytes)
    pub fn new(key: &[u8], effects: Effects) -> Result<Self> {
        Ok(Self::from_key(DomainKey::from_slice(key)?, effects))
    }

    /// From an already validated key
    pub fn from_key(key: DomainKey, effects: Effects) -> Self {
        Encryptor { key, effects }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.key.as_bytes())
            .map_err(|e| AnonymizationError::encryption_failed(format!("cipher init: {e}")))
    }

    /// Encrypt data
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;

        let nonce_bytes: [u8; NONCE_LEN] = self.effects.random_bytes();
        let nonce = Nonce::from(nonce_bytes);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| AnonymizationError::encryption_failed(format!("AES-GCM seal: {e}")))?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data.
    ///
    /// Fails closed: a wrong key, truncated input or any tampering yields
    /// `DecryptionFailed` and no plaintext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(AnonymizationError::decryption_failed("ciphertext too short"));
        }

        let cipher = self
            .cipher()
            .map_err(|e| AnonymizationError::decryption_failed(e.to_string()))?;

        let (nonce_bytes, body) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, body)
            .map_err(|_| AnonymizationError::decryption_failed("authentication failed"))
    }

    /// Encrypt a string and return base64-encoded `nonce || ciphertext`
    pub fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())
            .map(|bytes| STANDARD.encode(bytes))
    }

    /// Decrypt base64 produced by [`Encryptor::encrypt_string`]
    pub fn decrypt_string(&self, encoded: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| AnonymizationError::decryption_failed("invalid base64"))?;
        let plaintext = self.decrypt(&bytes)?;
        String::from_utf8(plaintext)
            .map_err(|_| AnonymizationError::decryption_failed("plaintext is not UTF-8"))
    }
}
