//! Scriptable connector for controller and multiplexer tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{AuthError, TransportError};
use pulse_http::PipelineError;
use pulse_stream::{
    ConnectionSnapshot, ConnectionState, ControllerConfig, EventStream, SseEvent, StreamConnector,
};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

type Feed = mpsc::UnboundedSender<Result<SseEvent, TransportError>>;

#[derive(Default)]
pub struct FakeConnector {
    /// Topic set of every connect call, in order.
    pub connects: Mutex<Vec<BTreeSet<String>>>,
    /// Topic sets pushed through `update_topics`.
    pub updates: Mutex<Vec<BTreeSet<String>>>,
    /// Fail this many upcoming connects.
    pub fail_next: AtomicU32,
    /// Never complete connects while set.
    pub hang: AtomicBool,
    /// Reject connects as if the session expired.
    pub expired: AtomicBool,
    /// Advertise incremental topic updates.
    pub incremental: AtomicBool,
    feed: Mutex<Option<Feed>>,
}

impl FakeConnector {
    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn last_topics(&self) -> Option<BTreeSet<String>> {
        self.connects.lock().last().cloned()
    }

    /// Push a raw SSE event onto the live stream.
    pub fn push(&self, event: &str, data: serde_json::Value) {
        if let Some(feed) = self.feed.lock().as_ref() {
            let _ = feed.send(Ok(SseEvent::new(event, data.to_string())));
        }
    }

    pub fn push_price(&self, ticker: &str, price: f64) {
        self.push(
            "price_update",
            serde_json::json!({
                "ticker": ticker,
                "price": price,
                "changePercent": 0.0,
                "timestamp": "2026-10-18T14:30:00Z"
            }),
        );
    }

    pub fn push_ticker_error(&self, ticker: &str, message: &str) {
        self.push(
            "subscription_error",
            serde_json::json!({"ticker": ticker, "message": message}),
        );
    }

    /// Server-side close of the live stream.
    pub fn close_stream(&self) {
        let _ = self.feed.lock().take();
    }

    /// Transport error on the live stream.
    pub fn break_stream(&self) {
        if let Some(feed) = self.feed.lock().take() {
            let _ = feed.send(Err(TransportError::Network("connection reset".into())));
        }
    }
}

#[async_trait]
impl StreamConnector for FakeConnector {
    async fn connect(&self, topics: &BTreeSet<String>) -> Result<EventStream, PipelineError> {
        self.connects.lock().push(topics.clone());
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.expired.load(Ordering::SeqCst) {
            return Err(AuthError::SessionExpired.into());
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Network("connection refused".into()).into());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.feed.lock() = Some(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn supports_incremental(&self) -> bool {
        self.incremental.load(Ordering::SeqCst)
    }

    async fn update_topics(&self, topics: &BTreeSet<String>) -> Result<(), PipelineError> {
        self.updates.lock().push(topics.clone());
        Ok(())
    }
}

pub fn topics(tickers: &[&str]) -> BTreeSet<String> {
    tickers.iter().map(|t| (*t).to_string()).collect()
}

pub fn fast_config(max_retries: u32) -> ControllerConfig {
    ControllerConfig {
        backoff: pulse_core::BackoffConfig {
            max_retries,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_factor: 0.2,
        },
        connect_timeout: Duration::from_secs(5),
    }
}

/// Wait (in paused time) until the snapshot satisfies `pred`.
pub async fn wait_for(
    rx: &mut watch::Receiver<ConnectionSnapshot>,
    pred: impl FnMut(&ConnectionSnapshot) -> bool,
) -> ConnectionSnapshot {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(pred))
        .await
        .expect("timed out waiting for connection state")
        .expect("controller dropped")
        .clone()
}

pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionSnapshot>,
    state: ConnectionState,
) -> ConnectionSnapshot {
    wait_for(rx, |s| s.state == state).await
}

/// Let spawned tasks run without advancing time meaningfully.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
