//! Response record types
//!
//! [`IdentityRecord`] knows the user but not the answers. [`ResponseRecord`]
//! and [`AnonymizedResponse`] know the answers but have no user id field at
//! all. The payout token hash is the only value present on both sides, and it
//! is not a foreign key: it cannot be inverted without the salt held in the
//! identity domain.

use crate::{AnonymizationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Question id to answer value
pub type Answers = BTreeMap<String, Value>;

/// Anything whose answers can be tallied
pub trait AnswerSet {
    /// Question id to answer value
    fn answers(&self) -> &Answers;
}

/// Canonical string form of an answer used as a tally key.
///
/// Strings are used verbatim so `"yes"` and `yes` tally together; every other
/// value uses its compact JSON form.
pub fn answer_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// What the identity domain stores after a split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// User who submitted the response
    pub user_id: String,
    /// Payout token hash
    pub payout_token_hash: String,
    /// Poll the earning belongs to
    pub poll_id: String,
    /// Earning in paisa
    pub earning_amount: u64,
    /// Token mapping sealed under the identity-domain key
    pub sealed_mapping: Vec<u8>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// What the response domain stores after a split. Has no user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Random response id
    pub response_id: String,
    /// Poll answered
    pub poll_id: String,
    /// Location cell (hexagon id) used for geographic aggregation
    pub location_cell: String,
    /// Answers keyed by question id
    pub answers: Answers,
    /// Seconds taken to answer
    pub response_time_seconds: u32,
    /// SHA-256 of the device fingerprint, for deduplication only
    pub device_fingerprint_hash: String,
    /// Payout token hash
    pub payout_token_hash: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

impl AnswerSet for ResponseRecord {
    fn answers(&self) -> &Answers {
        &self.answers
    }
}

/// A validated survey answer with no user linkage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedResponse {
    /// Response id
    pub id: String,
    /// Poll answered
    pub poll_id: String,
    /// Location cell only
    pub location_cell: String,
    /// Answers keyed by question id
    pub answers: Answers,
    /// Seconds taken to answer
    pub response_time_seconds: u32,
    /// For deduplication only
    pub device_fingerprint_hash: String,
    /// Payout token hash
    pub payout_token_hash: String,
    /// When the response was created
    pub created_at: DateTime<Utc>,
}

impl AnonymizedResponse {
    /// Check required fields are present
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AnonymizationError::invalid_input("missing id"));
        }
        if self.poll_id.is_empty() {
            return Err(AnonymizationError::invalid_input("missing poll_id"));
        }
        if self.location_cell.is_empty() {
            return Err(AnonymizationError::invalid_input(
                "missing location_cell for aggregation",
            ));
        }
        if self.answers.is_empty() {
            return Err(AnonymizationError::invalid_input("missing answers"));
        }
        Ok(())
    }
}

impl AnswerSet for AnonymizedResponse {
    fn answers(&self) -> &Answers {
        &self.answers
    }
}

impl From<ResponseRecord> for AnonymizedResponse {
    fn from(record: ResponseRecord) -> Self {
        AnonymizedResponse {
            id: record.response_id,
            poll_id: record.poll_id,
            location_cell: record.location_cell,
            answers: record.answers,
            response_time_seconds: record.response_time_seconds,
            device_fingerprint_hash: record.device_fingerprint_hash,
            payout_token_hash: record.payout_token_hash,
            created_at: record.created_at,
        }
    }
}
