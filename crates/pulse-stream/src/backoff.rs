//! Reconnect delay source.

use std::time::Duration;

use pulse_core::BackoffConfig;
use rand::Rng;

pub use pulse_core::retry::calculate_backoff_delay_with_random;

/// Jittered exponential backoff drawn from the thread RNG.
#[derive(Clone, Debug, Default)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    /// Wrap a config.
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// The config in use.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Attempts allowed before going offline.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Delay before zero-based reconnect `attempt`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let random: f64 = rand::rng().random();
        Duration::from_millis(self.config.delay_ms(attempt, random))
    }
}
