//! Domain key material
//!
//! [`DomainKey`] is a 32-byte AES-256 key that is wiped on drop and never
//! printed. [`DistinctKeyPair`] can only be built from two different keys, so
//! any component holding one cannot have collapsed the identity and response
//! domains onto the same key.

use crate::{effects::Effects, AnonymizationError, Result};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Required key length in bytes
pub const KEY_LEN: usize = 32;

/// A 32-byte symmetric key for one storage domain
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DomainKey([u8; KEY_LEN]);

impl DomainKey {
    /// Build a key from a slice, rejecting any length other than 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            AnonymizationError::invalid_key(format!(
                "key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(DomainKey(key))
    }

    /// Build a key from an exact-length array
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        DomainKey(bytes)
    }

    /// Generate a fresh random key
    pub fn generate(effects: &Effects) -> Self {
        DomainKey(effects.random_bytes())
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl ConstantTimeEq for DomainKey {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl std::fmt::Debug for DomainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DomainKey(<redacted>)")
    }
}

/// Generate a secure 32-byte key for AES-256
pub fn generate_encryption_key(effects: &Effects) -> [u8; KEY_LEN] {
    effects.random_bytes()
}

/// Identity-domain and response-domain keys, guaranteed to differ
#[derive(Clone, Debug)]
pub struct DistinctKeyPair {
    identity: DomainKey,
    response: DomainKey,
}

impl DistinctKeyPair {
    /// Pair two keys, failing if they are equal.
    ///
    /// Equality is checked in constant time.
    pub fn new(identity: DomainKey, response: DomainKey) -> Result<Self> {
        if bool::from(identity.ct_eq(&response)) {
            return Err(AnonymizationError::separation_violation(
                "identity and response keys must be different",
            ));
        }
        Ok(DistinctKeyPair { identity, response })
    }

    /// Pair two raw key slices, validating length first
    pub fn from_slices(identity: &[u8], response: &[u8]) -> Result<Self> {
        Self::new(DomainKey::from_slice(identity)?, DomainKey::from_slice(response)?)
    }

    /// Identity-domain key
    pub fn identity(&self) -> &DomainKey {
        &self.identity
    }

    /// Response-domain key
    pub fn response(&self) -> &DomainKey {
        &self.response
    }
}
