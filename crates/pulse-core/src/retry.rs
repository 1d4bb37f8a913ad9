//! Reconnect backoff configuration and delay math.
//!
//! Sync-only building blocks; the stream controller owns the timer and the
//! random source.
//!
//! - [`BackoffConfig`]: retry cap, base/max delay, jitter
//! - [`calculate_backoff_delay_with_random`]: exponential backoff with jitter,
//!   hard-capped at `max_delay_ms`

use serde::{Deserialize, Serialize};

/// Default number of reconnect attempts before going offline.
pub const DEFAULT_MAX_RETRIES: u32 = 8;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Reconnect backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Attempts allowed before the controller stops auto-retrying.
    pub max_retries: u32,
    /// Delay before the first retry, in ms.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, jitter included, in ms.
    pub max_delay_ms: u64,
    /// Jitter range as a fraction of the exponential delay (0.0–1.0).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffConfig {
    /// Delay for a zero-based `attempt`, given a `random` draw in `[0.0, 1.0)`.
    #[must_use]
    pub fn delay_ms(&self, attempt: u32, random: f64) -> u64 {
        calculate_backoff_delay_with_random(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        )
    }
}

/// Exponential backoff with symmetric jitter.
///
/// `min(max, base * 2^attempt) * (1 ± jitter)`, then clamped to `max_delay_ms`
/// so jitter can never push a delay past the configured ceiling.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    // Maps random [0,1) to [-jitter, +jitter]
    let jitter_factor = jitter_factor.clamp(0.0, 1.0);
    let jitter = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter_factor;
    let with_jitter = ((capped as f64) * jitter).round().max(0.0) as u64;

    with_jitter.min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
