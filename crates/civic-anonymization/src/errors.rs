//! Error type for anonymization operations
//!
//! A single enum covers every failure the crate can report. Cryptographic and
//! structural failures are fatal to the calling operation; statistical ones
//! (too few responses, k-anonymity not met) are recoverable by waiting for
//! more data. See [`AnonymizationError::is_fatal`].
//!
//! Messages never carry plaintext, salts, user ids or partial tallies.

use chrono::{DateTime, Utc};

/// Unified error type for anonymization operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnonymizationError {
    /// A required field is missing or malformed
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Which input was rejected
        message: String,
    },

    /// The batch is smaller than the minimum aggregation size
    #[error("Insufficient responses for aggregation: got {got}, need {need}")]
    InsufficientResponses {
        /// Number of responses supplied
        got: usize,
        /// Configured minimum
        need: usize,
    },

    /// Tallies were requested from a result that did not meet k-anonymity
    #[error("k-anonymity threshold not met: {count} responses, threshold {threshold}")]
    KAnonymityNotMet {
        /// True response count of the cohort
        count: usize,
        /// Configured threshold
        threshold: usize,
    },

    /// Key material was rejected before any cipher was built
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Why the key was rejected
        message: String,
    },

    /// Cipher construction or sealing failed
    #[error("Encryption failed: {message}")]
    EncryptionFailed {
        /// Failure description
        message: String,
    },

    /// Authentication failed or the ciphertext was malformed
    #[error("Decryption failed: {message}")]
    DecryptionFailed {
        /// Failure description
        message: String,
    },

    /// Payout token is structurally invalid or does not verify
    #[error("Invalid payout token: {message}")]
    InvalidToken {
        /// Why the token was rejected
        message: String,
    },

    /// Payout token is past its expiry time
    #[error("Payout token expired at {expired_at}")]
    TokenExpired {
        /// When the token stopped being valid
        expired_at: DateTime<Utc>,
    },

    /// Identity and response domains are coupled
    #[error("Separation violation: {message}")]
    SeparationViolation {
        /// Which coupling was detected
        message: String,
    },

    /// The random source could not supply usable bytes
    #[error("Random source failed: {message}")]
    RandomSourceFailed {
        /// Failure description
        message: String,
    },

    /// Record (de)serialization failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Failure description
        message: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// Failure description
        message: String,
    },
}

impl AnonymizationError {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Create an encryption failure
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Create a decryption failure
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Create an invalid token error
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Create a separation violation
    pub fn separation_violation(message: impl Into<String>) -> Self {
        Self::SeparationViolation {
            message: message.into(),
        }
    }

    /// Create a random source failure
    pub fn random_source_failed(message: impl Into<String>) -> Self {
        Self::RandomSourceFailed {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this failure must abort the calling operation.
    ///
    /// Cryptographic and separation failures are never downgraded. Statistical
    /// and token-lifecycle failures are ordinary results the caller can act on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey { .. }
                | Self::EncryptionFailed { .. }
                | Self::DecryptionFailed { .. }
                | Self::SeparationViolation { .. }
                | Self::RandomSourceFailed { .. }
                | Self::Configuration { .. }
        )
    }
}

/// Standard Result type for anonymization operations
pub type Result<T> = std::result::Result<T, AnonymizationError>;

impl From<serde_json::Error> for AnonymizationError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AnonymizationError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(err.to_string())
    }
}
