//! Response splitting
//!
//! Turns one submission into an [`IdentityRecord`] for the identity domain and
//! a [`ResponseRecord`] for the response domain. The combined submission is
//! never returned or stored.

use crate::{
    effects::Effects,
    encryption::Encryptor,
    hash::hash_device_fingerprint,
    keys::DistinctKeyPair,
    response::{Answers, IdentityRecord, ResponseRecord},
    token::{short_hash, TokenConfig, TokenMapping, TokenService},
    AnonymizationError, Result,
};
use tracing::{debug, instrument};

/// A raw submission before splitting
#[derive(Debug, Clone)]
pub struct Submission {
    /// Submitting user
    pub user_id: String,
    /// Poll answered
    pub poll_id: String,
    /// Location cell of the respondent
    pub location_cell: String,
    /// Answers keyed by question id
    pub answers: Answers,
    /// Seconds taken to answer
    pub response_time_seconds: u32,
    /// Raw device fingerprint; hashed before anything is stored
    pub device_fingerprint: String,
    /// Earning owed for this response, in paisa
    pub earning_amount: u64,
}

impl Submission {
    fn validate(&self) -> Result<()> {
        let missing = [
            ("user_id", self.user_id.is_empty()),
            ("poll_id", self.poll_id.is_empty()),
            ("location_cell", self.location_cell.is_empty()),
            ("answers", self.answers.is_empty()),
        ];
        match missing.iter().find(|(_, empty)| *empty) {
            Some((field, _)) => Err(AnonymizationError::invalid_input(format!(
                "missing {field}"
            ))),
            None => Ok(()),
        }
    }
}

/// Splits submissions between the identity and response domains
#[derive(Debug, Clone)]
pub struct ResponseSplitter {
    identity: Encryptor,
    response: Encryptor,
    tokens: TokenService,
    effects: Effects,
}

impl ResponseSplitter {
    /// Create a splitter from two raw 32-byte keys.
    ///
    /// Fails if either key has the wrong length or if the keys are equal.
    pub fn new(identity_key: &[u8], response_key: &[u8], effects: Effects) -> Result<Self> {
        let keys = DistinctKeyPair::from_slices(identity_key, response_key)?;
        let tokens = TokenService::new(TokenConfig::default(), effects.clone())?;
        Ok(Self::with_keys(keys, tokens, effects))
    }

    /// Create a splitter from an already distinct key pair
    pub fn with_keys(keys: DistinctKeyPair, tokens: TokenService, effects: Effects) -> Self {
        ResponseSplitter {
            identity: Encryptor::from_key(keys.identity().clone(), effects.clone()),
            response: Encryptor::from_key(keys.response().clone(), effects.clone()),
            tokens,
            effects,
        }
    }

    /// Token service used for minting
    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    /// Split one submission.
    ///
    /// Besides the poll id and timestamp, the payout token hash is the only
    /// value common to both records. The token salt is sealed under the
    /// identity key inside the identity record.
    #[instrument(skip_all, fields(poll_id = %submission.poll_id))]
    pub fn split_response(
        &self,
        submission: Submission,
    ) -> Result<(IdentityRecord, ResponseRecord)> {
        submission.validate()?;
        let Submission {
            user_id,
            poll_id,
            location_cell,
            answers,
            response_time_seconds,
            device_fingerprint,
            earning_amount,
        } = submission;

        let response_id = self.effects.gen_uuid().to_string();
        let (token, mapping) =
            self.tokens.generate_payout_token(&user_id, &poll_id, earning_amount)?;
        let sealed_mapping = self.seal_token_mapping(&mapping)?;
        let now = self.effects.now();

        let identity = IdentityRecord {
            user_id,
            payout_token_hash: token.token_hash.clone(),
            poll_id: poll_id.clone(),
            earning_amount,
            sealed_mapping,
            created_at: now,
        };

        let response = ResponseRecord {
            response_id,
            poll_id,
            location_cell,
            answers,
            response_time_seconds,
            device_fingerprint_hash: hash_device_fingerprint(&device_fingerprint),
            payout_token_hash: token.token_hash,
            created_at: now,
        };

        debug!(
            token = short_hash(&response.payout_token_hash),
            "split response into identity and response records"
        );
        Ok((identity, response))
    }

    fn seal_token_mapping(&self, mapping: &TokenMapping) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(mapping)?;
        self.identity.encrypt(&bytes)
    }

    /// Recover the token mapping from an identity record.
    ///
    /// Requires the identity-domain key held by this splitter.
    pub fn open_token_mapping(&self, record: &IdentityRecord) -> Result<TokenMapping> {
        let bytes = self.identity.decrypt(&record.sealed_mapping)?;
        let mapping: TokenMapping = serde_json::from_slice(&bytes)?;
        if mapping.token_hash != record.payout_token_hash || mapping.user_id != record.user_id {
            return Err(AnonymizationError::invalid_token(
                "sealed mapping does not belong to this record",
            ));
        }
        Ok(mapping)
    }

    /// Encrypt a response record for storage at rest in the response domain
    pub fn seal_response_record(&self, record: &ResponseRecord) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(record)?;
        self.response.encrypt(&bytes)
    }

    /// Decrypt a record produced by [`ResponseSplitter::seal_response_record`]
    pub fn open_response_record(&self, sealed: &[u8]) -> Result<ResponseRecord> {
        let bytes = self.response.decrypt(sealed)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::FixedRandomSource;
    use serde_json::json;
    use std::sync::Arc;

    fn splitter() -> ResponseSplitter {
        ResponseSplitter::new(&[1u8; 32], &[2u8; 32], Effects::test()).unwrap()
    }

    fn submission() -> Submission {
        let mut answers = Answers::new();
        answers.insert("q1".to_string(), json!("option_a"));
        answers.insert("q2".to_string(), json!(4));
        Submission {
            user_id: "user-42".to_string(),
            poll_id: "poll-7".to_string(),
            location_cell: "8928308280fffff".to_string(),
            answers,
            response_time_seconds: 31,
            device_fingerprint: "fp-raw-value".to_string(),
            earning_amount: 250,
        }
    }

    #[test]
    fn test_identical_keys_rejected() {
        let err = ResponseSplitter::new(&[5u8; 32], &[5u8; 32], Effects::test()).unwrap_err();
        assert!(matches!(err, AnonymizationError::SeparationViolation { .. }));
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let err = ResponseSplitter::new(&[5u8; 31], &[6u8; 32], Effects::test()).unwrap_err();
        assert!(matches!(err, AnonymizationError::InvalidKey { .. }));
    }

    #[test]
    fn test_split_shares_only_token_hash() {
        let (identity, response) = splitter().split_response(submission()).unwrap();

        assert_eq!(identity.payout_token_hash, response.payout_token_hash);
        assert_eq!(identity.user_id, "user-42");
        assert_eq!(identity.earning_amount, 250);
        assert_eq!(response.location_cell, "8928308280fffff");
        assert_eq!(response.response_time_seconds, 31);
        assert_eq!(
            response.device_fingerprint_hash,
            hash_device_fingerprint("fp-raw-value")
        );

        let serialized = serde_json::to_string(&response).unwrap();
        assert!(!serialized.contains("user-42"));
        assert!(!serialized.contains("fp-raw-value"));
    }

    #[test]
    fn test_mapping_opens_with_identity_key_only() {
        let splitter = splitter();
        let (identity, response) = splitter.split_response(submission()).unwrap();

        let mapping = splitter.open_token_mapping(&identity).unwrap();
        assert_eq!(mapping.user_id, "user-42");
        assert_eq!(mapping.token_hash, response.payout_token_hash);

        // A splitter holding a different identity key cannot read the salt
        let other = ResponseSplitter::new(&[3u8; 32], &[2u8; 32], Effects::test()).unwrap();
        assert!(matches!(
            other.open_token_mapping(&identity),
            Err(AnonymizationError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_mapping_verifies_against_token() {
        let splitter = splitter();
        let (identity, _) = splitter.split_response(submission()).unwrap();
        let mapping = splitter.open_token_mapping(&identity).unwrap();
        let recomputed =
            crate::hash::hmac_sha256(mapping.salt.as_bytes(), &[b"user-42", b"poll-7"]).unwrap();
        assert_eq!(hex::encode(recomputed), identity.payout_token_hash);
    }

    #[test]
    fn test_response_ids_unique() {
        let splitter = splitter();
        let (_, a) = splitter.split_response(submission()).unwrap();
        let (_, b) = splitter.split_response(submission()).unwrap();
        assert_ne!(a.response_id, b.response_id);
        assert_ne!(a.payout_token_hash, b.payout_token_hash);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut s = submission();
        s.location_cell.clear();
        assert!(matches!(
            splitter().split_response(s),
            Err(AnonymizationError::InvalidInput { .. })
        ));

        let mut s = submission();
        s.answers.clear();
        assert!(splitter().split_response(s).is_err());
    }

    #[test]
    fn test_response_record_sealing() {
        let splitter = splitter();
        let (_, response) = splitter.split_response(submission()).unwrap();
        let sealed = splitter.seal_response_record(&response).unwrap();
        assert_eq!(splitter.open_response_record(&sealed).unwrap(), response);
    }

    #[test]
    fn test_stuck_random_source_surfaces_error() {
        let effects = Effects::test().with_random(Arc::new(FixedRandomSource::repeating(0xFF)));
        let splitter = ResponseSplitter::new(&[1u8; 32], &[2u8; 32], effects).unwrap();
        let err = splitter.split_response(submission()).unwrap_err();
        assert!(matches!(err, AnonymizationError::RandomSourceFailed { .. }));
    }
}
