//! Typed push events.
//!
//! | SSE event            | Payload                                         |
//! |----------------------|-------------------------------------------------|
//! | `price_update`       | `{ticker, price, changePercent, timestamp}`     |
//! | `subscription_error` | `{ticker, message}`                             |
//! | `heartbeat` / `ping` | ignored                                         |
//!
//! Anything malformed is logged and skipped; one bad frame never tears the
//! connection down.

use pulse_core::{PriceUpdate, SubscriptionError, normalize_ticker};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::sse::SseEvent;

/// A decoded push event.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A price tick.
    Price(PriceUpdate),
    /// The server rejected or lost one ticker.
    TickerError(SubscriptionError),
}

impl StreamEvent {
    /// Ticker the event concerns.
    pub fn ticker(&self) -> &str {
        match self {
            Self::Price(update) => &update.ticker,
            Self::TickerError(err) => err.ticker(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePrice {
    ticker: String,
    price: f64,
    #[serde(alias = "change_percent")]
    change_percent: f64,
    timestamp: serde_json::Value,
}

#[derive(Deserialize)]
struct WireTickerError {
    ticker: String,
    message: String,
}

/// Decode one SSE event. `None` for heartbeats, unknown events, and bad frames.
pub fn decode_event(event: &SseEvent) -> Option<StreamEvent> {
    match event.event.as_str() {
        "price_update" => decode_price(&event.data).map(StreamEvent::Price),
        "subscription_error" => decode_ticker_error(&event.data).map(StreamEvent::TickerError),
        "heartbeat" | "ping" => None,
        other => {
            debug!(event = other, "ignoring unknown stream event");
            None
        }
    }
}

fn decode_price(data: &str) -> Option<PriceUpdate> {
    let wire: WirePrice = match serde_json::from_str(data) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(error = %e, "malformed price_update, skipping");
            return None;
        }
    };
    let ticker = match normalize_ticker(&wire.ticker) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "price_update for invalid ticker, skipping");
            return None;
        }
    };
    let timestamp = match wire.timestamp {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    Some(PriceUpdate {
        ticker,
        price: wire.price,
        change_percent: wire.change_percent,
        timestamp,
    })
}

fn decode_ticker_error(data: &str) -> Option<SubscriptionError> {
    let wire: WireTickerError = match serde_json::from_str(data) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(error = %e, "malformed subscription_error, skipping");
            return None;
        }
    };
    // Same key as the subscription, or it can never match one.
    match normalize_ticker(&wire.ticker) {
        Ok(ticker) => Some(SubscriptionError::invalid_ticker(ticker, wire.message)),
        Err(e) => {
            warn!(error = %e, "subscription_error for invalid ticker, skipping");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn decodes_price_update() {
        let ev = SseEvent::new(
            "price_update",
            r#"{"ticker":"aapl","price":190.25,"changePercent":1.5,"timestamp":"2026-10-18T14:30:00Z"}"#,
        );
        let Some(StreamEvent::Price(update)) = decode_event(&ev) else {
            panic!("expected price");
        };
        assert_eq!(update.ticker, "AAPL");
        assert!((update.price - 190.25).abs() < f64::EPSILON);
        assert_eq!(update.timestamp, "2026-10-18T14:30:00Z");
    }

    #[test]
    fn numeric_timestamp_is_stringified() {
        let ev = SseEvent::new(
            "price_update",
            r#"{"ticker":"MSFT","price":1,"change_percent":0,"timestamp":1760797800000}"#,
        );
        let Some(StreamEvent::Price(update)) = decode_event(&ev) else {
            panic!("expected price");
        };
        assert_eq!(update.timestamp, "1760797800000");
    }

    #[test]
    fn decodes_subscription_error() {
        let ev = SseEvent::new(
            "subscription_error",
            r#"{"ticker":"zzzz","message":"unknown symbol"}"#,
        );
        assert_matches!(
            decode_event(&ev),
            Some(StreamEvent::TickerError(SubscriptionError::InvalidTicker { ref ticker, ref reason }))
                if ticker == "ZZZZ" && reason == "unknown symbol"
        );
    }

    #[test]
    fn subscription_error_ticker_matches_subscription_key() {
        let ev = SseEvent::new(
            "subscription_error",
            r#"{"ticker":" brk.b ","message":"halted"}"#,
        );
        let Some(StreamEvent::TickerError(err)) = decode_event(&ev) else {
            panic!("expected ticker error");
        };
        assert_eq!(err.ticker(), normalize_ticker("brk.b").unwrap());
        assert!(
            decode_event(&SseEvent::new(
                "subscription_error",
                r#"{"ticker":"$$$","message":"bad"}"#,
            ))
            .is_none()
        );
    }

    #[test]
    fn heartbeat_and_unknown_are_ignored() {
        assert!(decode_event(&SseEvent::new("heartbeat", "{}")).is_none());
        assert!(decode_event(&SseEvent::new("news", "{}")).is_none());
    }

    #[test]
    fn malformed_payload_is_skipped() {
        assert!(decode_event(&SseEvent::new("price_update", "{not json")).is_none());
        assert!(decode_event(&SseEvent::new("price_update", r#"{"ticker":"A"}"#)).is_none());
    }

    #[test]
    fn event_ticker_accessor() {
        let err = StreamEvent::TickerError(SubscriptionError::invalid_ticker("X", "gone"));
        assert_eq!(err.ticker(), "X");
    }
}
