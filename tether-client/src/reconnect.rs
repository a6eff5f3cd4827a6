//! Reconnection strategies
//!
//! When a transport fails to open, or an established session is closed with a
//! recoverable code, the client asks its strategy how long to wait before the
//! next attempt. A strategy may also give up, which moves the client into the
//! error state.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: delay grows by 1.2x per failure with ±10% jitter,
//!   bounded to [1s, 5min] by default (the client default)
//! - **FixedDelay**: constant delay between attempts
//!
//! # Custom Strategies
//!
//! Implement the `ReconnectionStrategy` trait to create custom behavior.
//!
//! # Examples
//!
//! ```rust
//! use tether_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! // Default bounds, deterministic jitter
//! let mut backoff = ExponentialBackoff::default().with_seed(7);
//! let first = backoff.next_delay(0).unwrap();
//! assert!(first >= Duration::from_secs(1));
//!
//! // Tighter bounds for a local deployment
//! let local = ExponentialBackoff::new(
//!     Duration::from_millis(50),
//!     Duration::from_secs(2),
//! );
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Lower bound of the default backoff, in milliseconds
pub const MIN_BACKOFF_MS: u64 = 1_000;
/// Upper bound of the default backoff, in milliseconds
pub const MAX_BACKOFF_MS: u64 = 300_000;
/// Growth factor applied per failed attempt
pub const BACKOFF_FACTOR: f64 = 1.2;
/// Maximum jitter, as a fraction of the scaled interval
pub const BACKOFF_JITTER: f64 = 0.1;

/// Trait for reconnection strategies
///
/// # State Management
///
/// The strategy keeps state across consecutive failures. `reset()` is
/// called whenever a session is established and whenever the client is
/// closed or fails, so every new failure streak starts from scratch.
pub trait ReconnectionStrategy: Send + Sync {
    /// Returns the delay before the next attempt
    ///
    /// # Arguments
    ///
    /// * `attempt` - Number of failures in the current streak, minus one
    ///
    /// # Returns
    ///
    /// - `Some(duration)`: wait this long, then try again
    /// - `None`: give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Forget the current failure streak
    fn reset(&mut self);
}

/// Compute the interval that follows `current_ms`
///
/// The input is clamped into `[min_ms, max_ms]`, scaled by
/// [`BACKOFF_FACTOR`], perturbed by uniform noise of up to
/// [`BACKOFF_JITTER`] of the scaled value in either direction, clamped
/// again and floored.
pub fn next_interval<R: Rng + ?Sized>(current_ms: u64, min_ms: u64, max_ms: u64, rng: &mut R) -> u64 {
    let (min, max) = (min_ms as f64, max_ms.max(min_ms) as f64);
    let scaled = (current_ms as f64).clamp(min, max) * BACKOFF_FACTOR;
    let noise = rng.gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER) * scaled;
    (scaled + noise).clamp(min, max).floor() as u64
}

/// Exponential backoff with bounded jitter
pub struct ExponentialBackoff {
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    current_ms: u64,
    rng: StdRng,
}

impl ExponentialBackoff {
    /// Create a strategy bounded by `min_delay` and `max_delay`
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts: None,
            current_ms: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Give up after this many consecutive failures
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Use a seeded random source so jitter is reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Interval returned by the last `next_delay`, 0 after a reset
    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(MIN_BACKOFF_MS),
            Duration::from_millis(MAX_BACKOFF_MS),
        )
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        self.current_ms = next_interval(
            self.current_ms,
            self.min_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
            &mut self.rng,
        );
        Some(Duration::from_millis(self.current_ms))
    }

    fn reset(&mut self) {
        self.current_ms = 0;
    }
}

/// Fixed delay reconnection strategy
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Create a new fixed delay strategy
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Set the maximum number of attempts before giving up
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    fn reset(&mut self) {}
}
