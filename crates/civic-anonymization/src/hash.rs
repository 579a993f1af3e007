//! One-way hashing and random identifier helpers
//!
//! SHA-256 for fingerprints, HMAC-SHA256 for salted hashes and payout tokens.

use crate::{effects::RandomSource, AnonymizationError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Characters used for salts and other random strings
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest multiple of the alphabet size that fits in a byte
const ACCEPT_BELOW: u8 = (256 / ALPHANUMERIC.len() * ALPHANUMERIC.len()) as u8;

/// HMAC-SHA256 over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AnonymizationError::invalid_key(format!("HMAC key rejected: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// One-way hash of a device fingerprint, hex encoded.
///
/// Used only to detect duplicate submissions; the raw fingerprint is never kept.
pub fn hash_device_fingerprint(fingerprint: &str) -> String {
    hex::encode(Sha256::digest(fingerprint.as_bytes()))
}

/// Salted hash of `data`, hex encoded
pub fn hash_with_salt(data: &str, salt: &str) -> Result<String> {
    hmac_sha256(salt.as_bytes(), &[data.as_bytes()]).map(hex::encode)
}

/// Derive key material from a password by iterating HMAC-SHA256.
///
/// `key_0 = password`, `key_{i+1} = HMAC(salt, key_i)`. Zero iterations
/// return the password bytes unchanged.
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>> {
    let mut key = password.to_vec();
    for _ in 0..iterations {
        key = hmac_sha256(salt, &[&key])?.to_vec();
    }
    Ok(key)
}

/// Refills allowed before a source is treated as broken
const MAX_REFILLS: usize = 64;

/// Uniformly random alphanumeric string of `len` characters.
///
/// Fails if the source keeps producing bytes that rejection sampling
/// discards, so a stuck source cannot spin forever.
pub fn random_alphanumeric(len: usize, source: &dyn RandomSource) -> Result<String> {
    let mut out = String::with_capacity(len.min(4096));
    let mut buf = [0u8; 64];
    let mut barren = 0;
    while out.len() < len {
        source.fill_bytes(&mut buf);
        let before = out.len();
        for &byte in buf.iter() {
            // rejection keeps every character equally likely
            if byte >= ACCEPT_BELOW {
                continue;
            }
            out.push(ALPHANUMERIC[byte as usize % ALPHANUMERIC.len()] as char);
            if out.len() == len {
                break;
            }
        }
        if out.len() == before {
            barren += 1;
            if barren >= MAX_REFILLS {
                return Err(AnonymizationError::random_source_failed(
                    "source yielded no usable bytes",
                ));
            }
        } else {
            barren = 0;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{FixedRandomSource, SeededRandomSource};

    #[test]
    fn test_fingerprint_hash_is_stable_and_opaque() {
        let a = hash_device_fingerprint("device-abc");
        let b = hash_device_fingerprint("device-abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("device-abc"));
        assert_ne!(a, hash_device_fingerprint("device-abd"));
    }

    #[test]
    fn test_fingerprint_hash_known_vector() {
        assert_eq!(
            hash_device_fingerprint("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_with_salt_depends_on_salt() {
        let a = hash_with_salt("user-1", "salt-a").unwrap();
        let b = hash_with_salt("user-1", "salt-b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, hash_with_salt("user-1", "salt-a").unwrap());
    }

    #[test]
    fn test_derive_key_iterations() {
        let zero = derive_key(b"password", b"salt", 0).unwrap();
        assert_eq!(zero, b"password".to_vec());

        let one = derive_key(b"password", b"salt", 1).unwrap();
        assert_eq!(one.len(), 32);
        assert_eq!(one, hmac_sha256(b"salt", &[b"password"]).unwrap().to_vec());

        let many = derive_key(b"password", b"salt", 1000).unwrap();
        assert_eq!(many, derive_key(b"password", b"salt", 1000).unwrap());
        assert_ne!(many, one);
    }

    #[test]
    fn test_random_alphanumeric_charset_and_length() {
        let source = SeededRandomSource::new(3);
        let s = random_alphanumeric(200, &source).unwrap();
        assert_eq!(s.len(), 200);
        assert!(s.bytes().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_random_alphanumeric_skips_biased_bytes() {
        // 0xFF is rejected, 0x00 maps to 'a'
        let source = FixedRandomSource::new(vec![0xFF, 0x00]);
        assert_eq!(random_alphanumeric(4, &source).unwrap(), "aaaa");
    }

    #[test]
    fn test_random_alphanumeric_stuck_source_fails() {
        let source = FixedRandomSource::repeating(0xFF);
        let err = random_alphanumeric(32, &source).unwrap_err();
        assert!(matches!(err, AnonymizationError::RandomSourceFailed { .. }));
        assert!(err.is_fatal());
    }
}
