//! k-anonymous aggregation
//!
//! Combines a batch of anonymized responses into per-question tallies. Tallies
//! are released only when the batch meets the k-anonymity threshold; below it
//! they are omitted entirely, never zeroed or approximated. Small cohorts that
//! do meet the threshold get Laplace noise on every count.

use crate::{
    effects::Effects,
    privacy::{LaplaceMechanism, DEFAULT_EPSILON, LARGE_SAMPLE_THRESHOLD},
    response::{answer_key, AnswerSet},
    AnonymizationError, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Minimum respondents before any tally is released
pub const DEFAULT_K_ANONYMITY_THRESHOLD: usize = 10;

/// Minimum batch size before aggregation is attempted
pub const DEFAULT_MIN_AGGREGATION_SIZE: usize = 10;

/// Question id to (answer to count)
pub type Tallies = BTreeMap<String, BTreeMap<String, u64>>;

/// Aggregation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Minimum respondents before any tally is released
    pub k_anonymity_threshold: usize,
    /// Differential privacy epsilon; smaller means more noise
    pub dp_epsilon: f64,
    /// Floor before aggregation is attempted at all
    pub min_aggregation_size: usize,
    /// Whether small cohorts get Laplace noise
    pub apply_noise: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            k_anonymity_threshold: DEFAULT_K_ANONYMITY_THRESHOLD,
            dp_epsilon: DEFAULT_EPSILON,
            min_aggregation_size: DEFAULT_MIN_AGGREGATION_SIZE,
            apply_noise: true,
        }
    }
}

impl AggregationConfig {
    /// Validate the policy.
    ///
    /// A threshold below the minimum batch size is allowed but logged.
    pub fn validate(&self) -> Result<()> {
        if self.k_anonymity_threshold == 0 {
            return Err(AnonymizationError::configuration(
                "k_anonymity_threshold must be at least 1",
            ));
        }
        if !self.dp_epsilon.is_finite() || self.dp_epsilon <= 0.0 {
            return Err(AnonymizationError::configuration(
                "dp_epsilon must be a positive finite number",
            ));
        }
        if self.k_anonymity_threshold < self.min_aggregation_size {
            warn!(
                k = self.k_anonymity_threshold,
                min = self.min_aggregation_size,
                "k-anonymity threshold is below the minimum aggregation size"
            );
        }
        Ok(())
    }
}

/// Geographic scope of an aggregation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationScope {
    /// Location cell (hexagon id); `None` for poll level
    pub location_cell: Option<String>,
    /// Electoral region id
    pub region_id: Option<u32>,
}

impl AggregationScope {
    /// Whole-poll scope
    pub fn poll_level() -> Self {
        Self::default()
    }

    /// Single location cell
    pub fn cell(location_cell: impl Into<String>) -> Self {
        Self {
            location_cell: Some(location_cell.into()),
            region_id: None,
        }
    }

    /// Electoral region
    pub fn region(region_id: u32) -> Self {
        Self {
            location_cell: None,
            region_id: Some(region_id),
        }
    }
}

/// k-anonymous aggregate for a poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Poll aggregated
    pub poll_id: String,
    /// Location cell, if cell-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_cell: Option<String>,
    /// Region, if region-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_id: Option<u32>,
    /// True number of responses (never noised)
    pub response_count: usize,
    /// Threshold the count was checked against
    pub k_anonymity_threshold: usize,
    /// Per-question tallies; `None` when k-anonymity is not met
    pub results: Option<Tallies>,
    /// Whether the count met the threshold
    pub meets_k_anon: bool,
    /// Whether the released tallies carry noise
    pub noise_applied: bool,
    /// When the aggregate was computed
    pub computed_at: DateTime<Utc>,
}

impl AggregatedResult {
    /// Released tallies, or `KAnonymityNotMet` if they were withheld
    pub fn released_tallies(&self) -> Result<&Tallies> {
        self.results
            .as_ref()
            .ok_or(AnonymizationError::KAnonymityNotMet {
                count: self.response_count,
                threshold: self.k_anonymity_threshold,
            })
    }

    /// Count for one answer to one question, if released
    pub fn tally(&self, question_id: &str, answer: &str) -> Option<u64> {
        self.results
            .as_ref()?
            .get(question_id)?
            .get(answer)
            .copied()
    }
}

/// Running counters across aggregation calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Batches aggregated
    pub aggregations: u64,
    /// Results whose tallies were withheld
    pub redacted: u64,
    /// Results published with noise
    pub noised: u64,
    /// Batches rejected as too small
    pub rejected: u64,
}

/// Aggregates anonymized responses with privacy guarantees
///
/// The policy is fixed at construction. Only the statistics counters are
/// mutable, behind a reader/writer lock held for the duration of an increment.
#[derive(Debug)]
pub struct Aggregator {
    config: AggregationConfig,
    noise: LaplaceMechanism,
    effects: Effects,
    stats: RwLock<AggregatorStats>,
}

impl Aggregator {
    /// Aggregator with production effects
    pub fn new(config: AggregationConfig) -> Result<Self> {
        Self::with_effects(config, Effects::production())
    }

    /// Aggregator drawing noise and timestamps from `effects`
    pub fn with_effects(config: AggregationConfig, effects: Effects) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            noise: LaplaceMechanism::new(effects.random.clone()),
            effects,
            stats: RwLock::new(AggregatorStats::default()),
        })
    }

    /// Active policy
    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> AggregatorStats {
        self.stats.read().clone()
    }

    /// Whether `count` respondents meet the k-anonymity threshold
    pub fn check_k_anonymity(&self, count: usize) -> bool {
        count >= self.config.k_anonymity_threshold
    }

    /// Aggregate a batch of responses for one poll.
    ///
    /// Rejects batches below `min_aggregation_size`. Answer values are
    /// stringified before tallying so mixed types compare consistently.
    #[instrument(skip(self, responses), fields(count = responses.len()))]
    pub fn aggregate_responses<R: AnswerSet>(
        &self,
        responses: &[R],
        poll_id: &str,
        scope: AggregationScope,
    ) -> Result<AggregatedResult> {
        if poll_id.is_empty() {
            return Err(AnonymizationError::invalid_input("missing poll_id"));
        }

        let count = responses.len();
        if count < self.config.min_aggregation_size {
            self.stats.write().rejected += 1;
            debug!(need = self.config.min_aggregation_size, "batch too small");
            return Err(AnonymizationError::InsufficientResponses {
                got: count,
                need: self.config.min_aggregation_size,
            });
        }

        let meets_k_anon = self.check_k_anonymity(count);
        let noise_applied =
            meets_k_anon && self.config.apply_noise && (count as u64) < LARGE_SAMPLE_THRESHOLD;

        let results = if meets_k_anon {
            let mut tallies = tally(responses);
            if noise_applied {
                for counts in tallies.values_mut() {
                    for c in counts.values_mut() {
                        *c = self.noise.apply_noise(*c, self.config.dp_epsilon);
                    }
                }
            }
            Some(tallies)
        } else {
            None
        };

        {
            let mut stats = self.stats.write();
            stats.aggregations += 1;
            if !meets_k_anon {
                stats.redacted += 1;
            }
            if noise_applied {
                stats.noised += 1;
            }
        }

        if meets_k_anon {
            info!(noise_applied, "released aggregate");
        } else {
            info!(
                threshold = self.config.k_anonymity_threshold,
                "k-anonymity not met, tallies withheld"
            );
        }

        Ok(AggregatedResult {
            poll_id: poll_id.to_string(),
            location_cell: scope.location_cell,
            region_id: scope.region_id,
            response_count: count,
            k_anonymity_threshold: self.config.k_anonymity_threshold,
            results,
            meets_k_anon,
            noise_applied,
            computed_at: self.effects.now(),
        })
    }
}

fn tally<R: AnswerSet>(responses: &[R]) -> Tallies {
    let mut tallies = Tallies::new();
    for response in responses {
        for (question_id, answer) in response.answers() {
            *tallies
                .entry(question_id.clone())
                .or_default()
                .entry(answer_key(answer))
                .or_insert(0) += 1;
        }
    }
    tallies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::FixedRandomSource;
    use crate::response::Answers;
    use serde_json::json;
    use std::sync::Arc;

    struct Reply(Answers);

    impl AnswerSet for Reply {
        fn answers(&self) -> &Answers {
            &self.0
        }
    }

    fn replies(a: usize, b: usize) -> Vec<Reply> {
        let answer = |v: &str| {
            let mut answers = Answers::new();
            answers.insert("q1".to_string(), json!(v));
            Reply(answers)
        };
        (0..a)
            .map(|_| answer("option_a"))
            .chain((0..b).map(|_| answer("option_b")))
            .collect()
    }

    fn exact(config: AggregationConfig) -> Aggregator {
        Aggregator::with_effects(
            AggregationConfig {
                apply_noise: false,
                ..config
            },
            Effects::test(),
        )
        .unwrap()
    }

    #[test]
    fn test_check_k_anonymity() {
        let aggregator = exact(AggregationConfig::default());
        assert!(!aggregator.check_k_anonymity(9));
        assert!(aggregator.check_k_anonymity(10));
        assert!(aggregator.check_k_anonymity(11));
    }

    #[test]
    fn test_insufficient_responses() {
        let aggregator = exact(AggregationConfig::default());
        let err = aggregator
            .aggregate_responses(&replies(5, 0), "poll-1", AggregationScope::poll_level())
            .unwrap_err();
        assert_eq!(
            err,
            AnonymizationError::InsufficientResponses { got: 5, need: 10 }
        );
        assert!(!err.is_fatal());
        assert_eq!(aggregator.stats().rejected, 1);
    }

    #[test]
    fn test_exact_counts_without_noise() {
        let aggregator = exact(AggregationConfig::default());
        let result = aggregator
            .aggregate_responses(&replies(10, 5), "poll-1", AggregationScope::poll_level())
            .unwrap();

        assert!(result.meets_k_anon);
        assert!(!result.noise_applied);
        assert_eq!(result.response_count, 15);
        assert_eq!(result.tally("q1", "option_a"), Some(10));
        assert_eq!(result.tally("q1", "option_b"), Some(5));
    }

    #[test]
    fn test_below_threshold_redacts_tallies() {
        let aggregator = exact(AggregationConfig {
            k_anonymity_threshold: 20,
            ..AggregationConfig::default()
        });
        let result = aggregator
            .aggregate_responses(&replies(6, 4), "poll-1", AggregationScope::cell("hex-1"))
            .unwrap();

        assert!(!result.meets_k_anon);
        assert!(result.results.is_none());
        assert_eq!(result.response_count, 10);
        assert_eq!(result.location_cell.as_deref(), Some("hex-1"));
        assert_eq!(
            result.released_tallies().unwrap_err(),
            AnonymizationError::KAnonymityNotMet {
                count: 10,
                threshold: 20
            }
        );
        assert_eq!(aggregator.stats().redacted, 1);
    }

    #[test]
    fn test_redacted_result_never_noised() {
        let aggregator = Aggregator::with_effects(
            AggregationConfig {
                k_anonymity_threshold: 20,
                ..AggregationConfig::default()
            },
            Effects::test(),
        )
        .unwrap();
        let result = aggregator
            .aggregate_responses(&replies(10, 0), "poll-1", AggregationScope::poll_level())
            .unwrap();
        assert!(!result.noise_applied);
        assert!(result.results.is_none());
    }

    #[test]
    fn test_noise_applied_to_small_cohort() {
        let effects = Effects::test().with_random(Arc::new(FixedRandomSource::repeating(0xFF)));
        let aggregator = Aggregator::with_effects(AggregationConfig::default(), effects).unwrap();
        let result = aggregator
            .aggregate_responses(&replies(10, 5), "poll-1", AggregationScope::poll_level())
            .unwrap();

        assert!(result.noise_applied);
        assert_eq!(result.response_count, 15);
        // +22 from the pinned uniform sample
        assert_eq!(result.tally("q1", "option_a"), Some(32));
        assert_eq!(result.tally("q1", "option_b"), Some(27));
        assert_eq!(aggregator.stats().noised, 1);
    }

    #[test]
    fn test_large_cohort_not_noised() {
        let effects = Effects::test().with_random(Arc::new(FixedRandomSource::repeating(0xFF)));
        let aggregator = Aggregator::with_effects(AggregationConfig::default(), effects).unwrap();
        let result = aggregator
            .aggregate_responses(&replies(30, 20), "poll-1", AggregationScope::region(42))
            .unwrap();

        assert!(!result.noise_applied);
        assert_eq!(result.tally("q1", "option_a"), Some(30));
        assert_eq!(result.tally("q1", "option_b"), Some(20));
        assert_eq!(result.region_id, Some(42));
    }

    #[test]
    fn test_heterogeneous_answer_types() {
        let mut batch = Vec::new();
        for i in 0..12 {
            let mut answers = Answers::new();
            answers.insert("rating".to_string(), json!(i % 3));
            answers.insert("agree".to_string(), json!(i % 2 == 0));
            batch.push(Reply(answers));
        }
        let aggregator = exact(AggregationConfig::default());
        let result = aggregator
            .aggregate_responses(&batch, "poll-1", AggregationScope::poll_level())
            .unwrap();

        assert_eq!(result.tally("rating", "0"), Some(4));
        assert_eq!(result.tally("agree", "true"), Some(6));
        assert_eq!(result.tally("agree", "false"), Some(6));
    }

    #[test]
    fn test_config_validation() {
        let zero_k = AggregationConfig {
            k_anonymity_threshold: 0,
            ..AggregationConfig::default()
        };
        assert!(Aggregator::new(zero_k).is_err());

        let bad_epsilon = AggregationConfig {
            dp_epsilon: 0.0,
            ..AggregationConfig::default()
        };
        assert!(matches!(
            Aggregator::new(bad_epsilon),
            Err(AnonymizationError::Configuration { .. })
        ));
    }

    #[test]
    fn test_empty_poll_id_rejected() {
        let aggregator = exact(AggregationConfig::default());
        assert!(aggregator
            .aggregate_responses(&replies(10, 5), "", AggregationScope::poll_level())
            .is_err());
    }
}
