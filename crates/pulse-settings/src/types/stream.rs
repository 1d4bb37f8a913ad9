//! Push channel settings.

use pulse_core::BackoffConfig;
use serde::{Deserialize, Serialize};

/// How the shared event stream is opened and kept alive.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Path of the `text/event-stream` endpoint.
    pub path: String,
    /// Query parameter carrying the comma-separated ticker list.
    pub tickers_param: String,
    /// Bound on one connect attempt (request sent to headers received).
    pub connect_timeout_ms: u64,
    /// Buffered deliveries per consumer; a full queue drops new deliveries.
    pub channel_capacity: usize,
    /// Reconnect backoff.
    pub reconnect: BackoffConfig,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            path: "/stream/prices".to_string(),
            tickers_param: "tickers".to_string(),
            connect_timeout_ms: 10_000,
            channel_capacity: 256,
            reconnect: BackoffConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_reconnect_partial() {
        let s: StreamSettings =
            serde_json::from_str(r#"{"reconnect":{"baseDelayMs":250}}"#).unwrap();
        assert_eq!(s.reconnect.base_delay_ms, 250);
        assert_eq!(s.reconnect.max_retries, 8);
        assert_eq!(s.tickers_param, "tickers");
    }
}
