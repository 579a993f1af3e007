//! Differential privacy noise (Laplace mechanism)
//!
//! Counts below [`LARGE_SAMPLE_THRESHOLD`] get Laplace noise with scale
//! `1 / epsilon`; sensitivity is fixed at 1 because one respondent changes any
//! count by at most one. Samples use the inverse CDF over a uniform draw from
//! an injectable [`RandomSource`].
//!
//! There is no epsilon budget across queries: repeated aggregation over
//! overlapping cohorts leaks more than a single `epsilon` suggests.

use crate::effects::{OsRandomSource, RandomSource};
use std::sync::Arc;

/// Counts at or above this are published without noise
pub const LARGE_SAMPLE_THRESHOLD: u64 = 50;

/// Default privacy parameter
pub const DEFAULT_EPSILON: f64 = 1.0;

/// Query sensitivity for counting queries
pub const SENSITIVITY: f64 = 1.0;

/// Keeps the uniform sample away from 0 and 1 so `ln` stays finite
const UNIFORM_MARGIN: f64 = 1e-10;

/// Laplace noise generator
#[derive(Clone)]
pub struct LaplaceMechanism {
    random: Arc<dyn RandomSource>,
}

impl LaplaceMechanism {
    /// Create a mechanism drawing from `random`
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// Mechanism backed by the OS CSPRNG
    pub fn production() -> Self {
        Self::new(Arc::new(OsRandomSource::new()))
    }

    /// Uniform sample in `[1e-10, 1 - 1e-10]` built from 8 random bytes
    fn uniform(&self) -> f64 {
        let raw = self.random.gen_u64();
        let u = raw as f64 / u64::MAX as f64;
        u.clamp(UNIFORM_MARGIN, 1.0 - UNIFORM_MARGIN)
    }

    /// One draw from Laplace(0, scale)
    pub fn sample(&self, scale: f64) -> f64 {
        let u = self.uniform();
        if u < 0.5 {
            scale * (2.0 * u).ln()
        } else {
            -scale * (2.0 * (1.0 - u)).ln()
        }
    }

    /// Add calibrated noise to a count.
    ///
    /// Large counts pass through unchanged. The result is rounded to the nearest
    /// integer and never negative. A non-positive or non-finite `epsilon` falls
    /// back to [`DEFAULT_EPSILON`].
    pub fn apply_noise(&self, count: u64, epsilon: f64) -> u64 {
        if count >= LARGE_SAMPLE_THRESHOLD {
            return count;
        }

        let epsilon = if epsilon.is_finite() && epsilon > 0.0 {
            epsilon
        } else {
            DEFAULT_EPSILON
        };

        let noise = self.sample(SENSITIVITY / epsilon).round() as i64;
        let noised = (count as i64).saturating_add(noise);
        noised.max(0) as u64
    }
}

impl Default for LaplaceMechanism {
    fn default() -> Self {
        Self::production()
    }
}

impl std::fmt::Debug for LaplaceMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaplaceMechanism").finish_non_exhaustive()
    }
}

/// Add Laplace noise to `count` using the OS CSPRNG
pub fn apply_noise(count: u64, epsilon: f64) -> u64 {
    LaplaceMechanism::production().apply_noise(count, epsilon)
}
