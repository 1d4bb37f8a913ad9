//! Market data delivered over the push channel.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::SubscriptionError;

/// Longest accepted ticker symbol.
const MAX_TICKER_LEN: usize = 15;

/// A single price tick. Ephemeral; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Normalised ticker symbol.
    pub ticker: String,
    /// Last traded price.
    pub price: f64,
    /// Change since previous close, in percent.
    pub change_percent: f64,
    /// Server timestamp (ISO 8601).
    pub timestamp: String,
}

/// Normalise a ticker: trim, upper-case, and validate the character set.
///
/// Accepts `[A-Z0-9^][A-Z0-9.\-^=]*`, at most 15 characters. Index and FX
/// symbols such as `^GSPC` or `EURUSD=X` are allowed.
pub fn normalize_ticker(raw: &str) -> Result<String, SubscriptionError> {
    let ticker = raw.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err(SubscriptionError::invalid_ticker(raw, "empty symbol"));
    }
    if ticker.len() > MAX_TICKER_LEN {
        return Err(SubscriptionError::invalid_ticker(raw, "symbol too long"));
    }
    let mut chars = ticker.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '^');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if !(first_ok && rest_ok) {
        return Err(SubscriptionError::invalid_ticker(raw, "unexpected character"));
    }
    Ok(ticker)
}

/// Normalise a batch of tickers into a set, failing on the first bad symbol.
pub fn normalize_tickers<I, S>(raw: I) -> Result<BTreeSet<String>, SubscriptionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|t| normalize_ticker(t.as_ref()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
