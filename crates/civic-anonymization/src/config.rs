//! Configuration loading
//!
//! Policy is read from TOML, optionally overridden by `ANONYMIZATION_*`
//! environment variables, validated, and then handed to components by value.
//!
//! ```toml
//! [aggregation]
//! k_anonymity_threshold = 10
//! dp_epsilon = 1.0
//! min_aggregation_size = 10
//! apply_noise = true
//!
//! [tokens]
//! max_token_age_days = 30
//! ```

use crate::{aggregation::AggregationConfig, token::TokenConfig, AnonymizationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ANONYMIZATION_";

/// Complete policy for the anonymization core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizationConfig {
    /// Aggregation policy
    pub aggregation: AggregationConfig,
    /// Payout token policy
    pub tokens: TokenConfig,
}

impl AnonymizationConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnonymizationError::configuration(format!(
                "failed to read {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `ANONYMIZATION_*` overrides from an explicit variable list.
    ///
    /// Unknown keys are ignored; malformed values are an error.
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match field {
                "K_ANONYMITY_THRESHOLD" => {
                    self.aggregation.k_anonymity_threshold = parse(field, value)?;
                }
                "DP_EPSILON" => self.aggregation.dp_epsilon = parse(field, value)?,
                "MIN_AGGREGATION_SIZE" => {
                    self.aggregation.min_aggregation_size = parse(field, value)?;
                }
                "APPLY_NOISE" => self.aggregation.apply_noise = parse(field, value)?,
                "MAX_TOKEN_AGE_DAYS" => self.tokens.max_token_age_days = parse(field, value)?,
                "SALT_LENGTH" => self.tokens.salt_length = parse(field, value)?,
                _ => continue,
            }
            debug!(field, "applied environment override");
        }
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.aggregation.validate()?;
        self.tokens.validate()
    }
}

fn parse<T: FromStr>(field: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        AnonymizationError::configuration(format!("invalid value for {ENV_PREFIX}{field}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AnonymizationConfig::default();
        assert_eq!(config.aggregation.k_anonymity_threshold, 10);
        assert_eq!(config.aggregation.min_aggregation_size, 10);
        assert_eq!(config.aggregation.dp_epsilon, 1.0);
        assert!(config.aggregation.apply_noise);
        assert_eq!(config.tokens.max_token_age_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AnonymizationConfig::from_toml_str(
            r#"
            [aggregation]
            k_anonymity_threshold = 25
            apply_noise = false
            "#,
        )
        .unwrap();
        assert_eq!(config.aggregation.k_anonymity_threshold, 25);
        assert!(!config.aggregation.apply_noise);
        assert_eq!(config.aggregation.min_aggregation_size, 10);
        assert_eq!(config.tokens, TokenConfig::default());
    }

    #[test]
    fn test_malformed_toml() {
        let err = AnonymizationConfig::from_toml_str("[aggregation\nk = ").unwrap_err();
        assert!(matches!(err, AnonymizationError::Configuration { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tokens]\nmax_token_age_days = 7").unwrap();
        let config = AnonymizationConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.tokens.max_token_age_days, 7);
    }

    #[test]
    fn test_missing_file() {
        let err = AnonymizationConfig::load_from_file(Path::new("/nonexistent/anon.toml"))
            .unwrap_err();
        assert!(matches!(err, AnonymizationError::Configuration { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AnonymizationConfig::default();
        config
            .merge_with_vars([
                ("ANONYMIZATION_DP_EPSILON", "0.5"),
                ("ANONYMIZATION_APPLY_NOISE", "false"),
                ("ANONYMIZATION_MAX_TOKEN_AGE_DAYS", "14"),
                ("UNRELATED", "x"),
            ])
            .unwrap();
        assert_eq!(config.aggregation.dp_epsilon, 0.5);
        assert!(!config.aggregation.apply_noise);
        assert_eq!(config.tokens.max_token_age_days, 14);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = AnonymizationConfig::default();
        let err = config
            .merge_with_vars([("ANONYMIZATION_K_ANONYMITY_THRESHOLD", "ten")])
            .unwrap_err();
        assert!(err.to_string().contains("K_ANONYMITY_THRESHOLD"));
    }

    #[test]
    fn test_env_extremes_fail_validation() {
        for (key, value) in [
            ("ANONYMIZATION_MAX_TOKEN_AGE_DAYS", "4000000000"),
            ("ANONYMIZATION_SALT_LENGTH", "18446744073709551615"),
        ] {
            let mut config = AnonymizationConfig::default();
            config.merge_with_vars([(key, value)]).unwrap();
            assert!(
                matches!(config.validate(), Err(AnonymizationError::Configuration { .. })),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_validation_catches_bad_epsilon() {
        let mut config = AnonymizationConfig::default();
        config.aggregation.dp_epsilon = -1.0;
        assert!(config.validate().is_err());
    }
}
