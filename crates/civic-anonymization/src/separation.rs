//! Separation guarantee between the identity and response domains
//!
//! A deployment declares how its two storage domains relate. Validation turns
//! that declaration into executable policy: any structural or cryptographic
//! coupling is a [`AnonymizationError::SeparationViolation`].

use crate::{keys::DistinctKeyPair, AnonymizationError, Result};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::error;

/// Declared relationship between two storage domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparationGuarantee {
    /// Identity domain (project, account or database) identifier
    pub identity_domain: String,
    /// Response domain identifier
    pub response_domain: String,
    /// A foreign key links the two domains
    pub foreign_key_exists: bool,
    /// Both domains encrypt under the same key
    pub shared_encryption_key: bool,
    /// Both domains share HSM or root keys
    pub shared_hsm_keys: bool,
}

impl SeparationGuarantee {
    /// Declaration for two domains keyed by a [`DistinctKeyPair`].
    ///
    /// Only `shared_encryption_key` follows from the keys. Foreign keys and
    /// HSM custody are properties of the deployment and must be declared.
    pub fn for_key_pair(
        identity_domain: impl Into<String>,
        response_domain: impl Into<String>,
        keys: &DistinctKeyPair,
        foreign_key_exists: bool,
        shared_hsm_keys: bool,
    ) -> Self {
        SeparationGuarantee {
            identity_domain: identity_domain.into(),
            response_domain: response_domain.into(),
            foreign_key_exists,
            shared_encryption_key: bool::from(keys.identity().ct_eq(keys.response())),
            shared_hsm_keys,
        }
    }

    /// Reject any coupling between the domains
    pub fn validate(&self) -> Result<()> {
        validate_separation(self)
    }
}

/// Reject any coupling between the identity and response domains
pub fn validate_separation(guarantee: &SeparationGuarantee) -> Result<()> {
    let violation = if guarantee.identity_domain.is_empty()
        || guarantee.response_domain.is_empty()
    {
        Some("both domains must be specified")
    } else if guarantee.identity_domain == guarantee.response_domain {
        Some("identity and response data must live in separate domains")
    } else if guarantee.foreign_key_exists {
        Some("no foreign key may exist between the domains")
    } else if guarantee.shared_encryption_key {
        Some("domains must use separate encryption keys")
    } else if guarantee.shared_hsm_keys {
        Some("HSM keys must be separate for each domain")
    } else {
        None
    };

    match violation {
        Some(message) => {
            error!(
                identity = %guarantee.identity_domain,
                response = %guarantee.response_domain,
                "{message}"
            );
            Err(AnonymizationError::separation_violation(message))
        }
        None => Ok(()),
    }
}
