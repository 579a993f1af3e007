//! Injectable effects for deterministic testing
//!
//! Randomness and wall-clock time are the only side effects in this crate.
//! Both sit behind traits so production code draws from the OS CSPRNG and the
//! system clock while tests swap in seeded or scripted sources.
//!
//! Production sources hold no shared mutable state: every call reaches the
//! thread-local CSPRNG, so concurrent callers never race on a seed or counter.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use uuid::Uuid;

// ========== Time Source Abstraction ==========

/// Abstract time source - real system time or simulated time
pub trait TimeSource: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;

    /// Advance time (no-op for real time, used in tests)
    fn advance(&self, _by: Duration) {}

    /// Check if this is a simulated time source
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Real system time source (production use)
#[derive(Debug, Clone, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    /// Create a new system time source
    pub fn new() -> Self {
        SystemTimeSource
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Simulated time source with manual control of time progression
#[derive(Debug, Clone)]
pub struct SimulatedTimeSource {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl SimulatedTimeSource {
    /// Create a new simulated time source starting at the given instant
    pub fn new(start: DateTime<Utc>) -> Self {
        SimulatedTimeSource {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Create starting at a fixed recent instant (2025-01-01 00:00:00 UTC)
    pub fn from_recent() -> Self {
        let start = Utc
            .timestamp_opt(1_735_689_600, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }

    /// Jump to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current_time.lock() = instant;
    }
}

impl TimeSource for SimulatedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.lock()
    }

    fn advance(&self, by: Duration) {
        let mut time = self.current_time.lock();
        *time += by;
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

// ========== Random Source Abstraction ==========

/// Abstract randomness source
///
/// Production code must use [`OsRandomSource`]. The other implementations
/// exist so tests can reproduce salts, nonces and noise draws.
pub trait RandomSource: Send + Sync {
    /// Fill a byte buffer with random data
    fn fill_bytes(&self, dest: &mut [u8]);

    /// Generate a random u64
    fn gen_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    /// Generate a random (v4-format) UUID
    fn gen_uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

/// Real randomness source using OS entropy (production use)
///
/// Uses `rand::thread_rng()`, a CSPRNG reseeded from the OS.
#[derive(Debug, Clone, Default)]
pub struct OsRandomSource;

impl OsRandomSource {
    /// Create a new OS random source
    pub fn new() -> Self {
        OsRandomSource
    }
}

impl RandomSource for OsRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::thread_rng().fill_bytes(dest);
    }

    fn gen_u64(&self) -> u64 {
        rand::thread_rng().next_u64()
    }
}

/// Seeded deterministic RNG (same seed, same sequence)
#[derive(Debug, Clone)]
pub struct SeededRandomSource {
    rng: Arc<Mutex<StdRng>>,
}

impl SeededRandomSource {
    /// Create a new seeded RNG with the given seed
    pub fn new(seed: u64) -> Self {
        SeededRandomSource {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) {
        self.rng.lock().fill_bytes(dest);
    }
}

/// Replays a fixed byte pattern forever.
///
/// Lets tests pin the uniform sample fed into the Laplace sampler.
#[derive(Debug, Clone)]
pub struct FixedRandomSource {
    pattern: Vec<u8>,
    cursor: Arc<Mutex<usize>>,
}

impl FixedRandomSource {
    /// Create a source that cycles through `pattern`
    pub fn new(pattern: impl Into<Vec<u8>>) -> Self {
        let mut pattern = pattern.into();
        if pattern.is_empty() {
            pattern.push(0);
        }
        FixedRandomSource {
            pattern,
            cursor: Arc::new(Mutex::new(0)),
        }
    }

    /// Create a source that always yields `byte`
    pub fn repeating(byte: u8) -> Self {
        Self::new(vec![byte])
    }
}

impl RandomSource for FixedRandomSource {
    fn fill_bytes(&self, dest: &mut [u8]) {
        let mut cursor = self.cursor.lock();
        for byte in dest.iter_mut() {
            *byte = self.pattern[*cursor % self.pattern.len()];
            *cursor = cursor.wrapping_add(1);
        }
    }
}

// ========== Helper Functions ==========

/// Generate random bytes into a fixed-size array from any RandomSource
pub fn gen_random_bytes<const N: usize>(source: &dyn RandomSource) -> [u8; N] {
    let mut bytes = [0u8; N];
    source.fill_bytes(&mut bytes);
    bytes
}

// ========== Effect Bundle ==========

/// Bundle of injectable effects passed to every component
#[derive(Clone)]
pub struct Effects {
    /// Time source for timestamps and token expiry
    pub time: Arc<dyn TimeSource>,
    /// Random source for salts, nonces, ids and noise
    pub random: Arc<dyn RandomSource>,
}

impl Effects {
    /// Production effects (system clock + OS randomness)
    pub fn production() -> Self {
        Effects {
            time: Arc::new(SystemTimeSource::new()),
            random: Arc::new(OsRandomSource::new()),
        }
    }

    /// Deterministic effects (simulated clock + seeded RNG)
    pub fn deterministic(seed: u64, start: DateTime<Utc>) -> Self {
        Effects {
            time: Arc::new(SimulatedTimeSource::new(start)),
            random: Arc::new(SeededRandomSource::new(seed)),
        }
    }

    /// Test effects with seed 0 and a fixed recent start time
    pub fn test() -> Self {
        Effects {
            time: Arc::new(SimulatedTimeSource::from_recent()),
            random: Arc::new(SeededRandomSource::new(0)),
        }
    }

    /// Replace the random source, keeping the clock
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Replace the time source, keeping the random source
    pub fn with_time(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Current time
    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    /// Generate random bytes
    pub fn random_bytes<const N: usize>(&self) -> [u8; N] {
        gen_random_bytes(self.random.as_ref())
    }

    /// Fill buffer with random bytes
    pub fn fill_random(&self, dest: &mut [u8]) {
        self.random.fill_bytes(dest);
    }

    /// Generate a UUID
    pub fn gen_uuid(&self) -> Uuid {
        self.random.gen_uuid()
    }

    /// Check if running with a simulated clock
    pub fn is_simulated(&self) -> bool {
        self.time.is_simulated()
    }
}

impl Default for Effects {
    fn default() -> Self {
        Self::production()
    }
}

impl std::fmt::Debug for Effects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effects")
            .field("simulated", &self.is_simulated())
            .finish_non_exhaustive()
    }
}
