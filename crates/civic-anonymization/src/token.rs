//! One-way payout tokens
//!
//! A payout token lets the payment system attribute an earning to a user
//! without the response domain ever holding a user id. The token hash is
//! `HMAC-SHA256(key = salt, message = user_id || poll_id)` with a fresh random
//! salt per call. The salt lives only in the [`TokenMapping`], which belongs
//! to the identity domain; without it the hash cannot be inverted even when
//! user ids and poll ids are guessable.

use crate::{
    effects::Effects,
    hash::{hmac_sha256, random_alphanumeric},
    AnonymizationError, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

/// Default token lifetime in days
pub const DEFAULT_MAX_TOKEN_AGE_DAYS: u32 = 30;

/// Longest allowed token lifetime in days
pub const MAX_TOKEN_AGE_DAYS_LIMIT: u32 = 3650;

/// Minimum salt length in characters
pub const MIN_SALT_LEN: usize = 32;

/// Maximum salt length in characters
pub const MAX_SALT_LEN: usize = 1024;

/// Hex length of an HMAC-SHA256 digest
const TOKEN_HASH_HEX_LEN: usize = 64;

/// Token policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Days until a token expires
    pub max_token_age_days: u32,
    /// Salt length in alphanumeric characters
    pub salt_length: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            max_token_age_days: DEFAULT_MAX_TOKEN_AGE_DAYS,
            salt_length: MIN_SALT_LEN,
        }
    }
}

impl TokenConfig {
    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.max_token_age_days == 0 || self.max_token_age_days > MAX_TOKEN_AGE_DAYS_LIMIT {
            return Err(AnonymizationError::configuration(format!(
                "max_token_age_days must be between 1 and {MAX_TOKEN_AGE_DAYS_LIMIT}"
            )));
        }
        if !(MIN_SALT_LEN..=MAX_SALT_LEN).contains(&self.salt_length) {
            return Err(AnonymizationError::configuration(format!(
                "salt_length must be between {MIN_SALT_LEN} and {MAX_SALT_LEN}"
            )));
        }
        Ok(())
    }

    /// Token lifetime
    pub fn max_age(&self) -> Duration {
        Duration::days(i64::from(self.max_token_age_days))
    }
}

/// A one-way reference from a payment to a (user, poll) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutToken {
    /// Hex-encoded HMAC; cannot be reversed to the user id
    pub token_hash: String,
    /// Amount in paisa
    pub amount: u64,
    /// Poll this payout belongs to
    pub poll_id: String,
    /// When the token was minted
    pub created_at: DateTime<Utc>,
    /// When the token stops being valid
    pub expires_at: DateTime<Utc>,
}

/// The only record linking a token hash back to a user id.
///
/// Identity domain only; never stored next to response content.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMapping {
    /// User the token belongs to
    pub user_id: String,
    /// Hash shared with the [`PayoutToken`]
    pub token_hash: String,
    /// Poll the token was minted for
    pub poll_id: String,
    /// Random HMAC key used to derive the hash
    pub salt: String,
    /// When the mapping was created
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMapping")
            .field("user_id", &"<redacted>")
            .field("token_hash", &short_hash(&self.token_hash))
            .field("poll_id", &self.poll_id)
            .field("salt", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// First eight characters of a token hash, for logs
pub(crate) fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

fn derive_token_hash(salt: &str, user_id: &str, poll_id: &str) -> Result<String> {
    hmac_sha256(salt.as_bytes(), &[user_id.as_bytes(), poll_id.as_bytes()]).map(hex::encode)
}

/// Mints and validates payout tokens
///
/// Stateless apart from its immutable policy, so it is safe to share across
/// threads without locking.
#[derive(Debug, Clone)]
pub struct TokenService {
    config: TokenConfig,
    effects: Effects,
}

impl TokenService {
    /// Create a token service
    pub fn new(config: TokenConfig, effects: Effects) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, effects })
    }

    /// Token service with default policy and production effects
    pub fn production() -> Self {
        Self {
            config: TokenConfig::default(),
            effects: Effects::production(),
        }
    }

    /// Active policy
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Mint a token and its identity-side mapping.
    ///
    /// Two calls with identical arguments produce different hashes.
    #[instrument(skip(self, user_id))]
    pub fn generate_payout_token(
        &self,
        user_id: &str,
        poll_id: &str,
        amount: u64,
    ) -> Result<(PayoutToken, TokenMapping)> {
        if user_id.is_empty() || poll_id.is_empty() {
            return Err(AnonymizationError::invalid_input(
                "user_id and poll_id are required",
            ));
        }

        let salt = random_alphanumeric(self.config.salt_length, self.effects.random.as_ref())?;
        let token_hash = derive_token_hash(&salt, user_id, poll_id)?;

        let now = self.effects.now();
        let expires_at = now
            .checked_add_signed(self.config.max_age())
            .ok_or_else(|| AnonymizationError::configuration("token expiry out of range"))?;
        let token = PayoutToken {
            token_hash: token_hash.clone(),
            amount,
            poll_id: poll_id.to_string(),
            created_at: now,
            expires_at,
        };
        let mapping = TokenMapping {
            user_id: user_id.to_string(),
            token_hash,
            poll_id: poll_id.to_string(),
            salt,
            created_at: now,
        };

        debug!(token = short_hash(&token.token_hash), "minted payout token");
        Ok((token, mapping))
    }

    /// Check that a token is well formed and not expired
    pub fn validate_payout_token(&self, token: &PayoutToken) -> Result<()> {
        validate_payout_token(token, self.effects.now())
    }

    /// Confirm that `mapping` is the identity-side record for `token`.
    ///
    /// Recomputes the HMAC from the mapping's salt; hashes are compared in
    /// constant time.
    pub fn verify_mapping(&self, token: &PayoutToken, mapping: &TokenMapping) -> Result<()> {
        self.validate_payout_token(token)?;

        if token.poll_id != mapping.poll_id {
            return Err(AnonymizationError::invalid_token("poll mismatch"));
        }

        let recomputed = derive_token_hash(&mapping.salt, &mapping.user_id, &mapping.poll_id)?;
        let stored_ok = token.token_hash.as_bytes().ct_eq(mapping.token_hash.as_bytes());
        let derived_ok = token.token_hash.as_bytes().ct_eq(recomputed.as_bytes());
        if !bool::from(stored_ok & derived_ok) {
            warn!(token = short_hash(&token.token_hash), "token mapping does not verify");
            return Err(AnonymizationError::invalid_token("mapping does not match token"));
        }
        Ok(())
    }
}

/// Check a token against an explicit clock
pub fn validate_payout_token(token: &PayoutToken, now: DateTime<Utc>) -> Result<()> {
    if token.token_hash.is_empty() {
        return Err(AnonymizationError::invalid_token("empty token hash"));
    }
    if token.token_hash.len() != TOKEN_HASH_HEX_LEN
        || !token.token_hash.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(AnonymizationError::invalid_token("token hash is not a hex digest"));
    }
    if token.poll_id.is_empty() {
        return Err(AnonymizationError::invalid_token("empty poll id"));
    }
    if now > token.expires_at {
        return Err(AnonymizationError::TokenExpired {
            expired_at: token.expires_at,
        });
    }
    Ok(())
}
