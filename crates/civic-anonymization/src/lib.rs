//! Zero-knowledge response anonymization and k-anonymous aggregation
//!
//! A submitted poll response is split into an identity-side record (who, and
//! what they are owed) and a response-side record (what was answered, and
//! where). The two share only a one-way payout token hash. Batches of
//! response-side records are aggregated into tallies that are released only
//! above a k-anonymity floor, with Laplace noise on small cohorts.
//!
//! Persistence, key provisioning and the two physical stores are external.
#![allow(clippy::result_large_err)]

/// k-anonymous aggregation of response batches
pub mod aggregation;
/// Policy loading from TOML and the environment
pub mod config;
/// Injectable randomness and time
pub mod effects;
/// AES-256-GCM encryption of sensitive fields
pub mod encryption;
/// Unified error type
pub mod errors;
/// One-way hashing and random identifiers
pub mod hash;
/// Domain key material
pub mod keys;
/// Laplace-mechanism differential privacy
pub mod privacy;
/// Identity and response record types
pub mod response;
/// Identity/response domain separation checks
pub mod separation;
/// Response splitting
pub mod splitter;
/// Payout tokens
pub mod token;

pub use aggregation::{
    AggregatedResult, AggregationConfig, AggregationScope, Aggregator, AggregatorStats, Tallies,
};
pub use config::AnonymizationConfig;
pub use effects::{
    Effects, FixedRandomSource, OsRandomSource, RandomSource, SeededRandomSource,
    SimulatedTimeSource, SystemTimeSource, TimeSource,
};
pub use encryption::Encryptor;
pub use errors::{AnonymizationError, Result};
pub use hash::{derive_key, hash_device_fingerprint, hash_with_salt};
pub use keys::{generate_encryption_key, DistinctKeyPair, DomainKey};
pub use privacy::{apply_noise, LaplaceMechanism, LARGE_SAMPLE_THRESHOLD};
pub use response::{AnonymizedResponse, AnswerSet, Answers, IdentityRecord, ResponseRecord};
pub use separation::{validate_separation, SeparationGuarantee};
pub use splitter::{ResponseSplitter, Submission};
pub use token::{validate_payout_token, PayoutToken, TokenConfig, TokenMapping, TokenService};
