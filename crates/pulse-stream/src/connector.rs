//! Opening the push channel.
//!
//! [`StreamConnector`] is the seam between the connection controller and the
//! transport. [`PipelineConnector`] opens `GET {path}?tickers=A,B` through the
//! request pipeline, so the channel is authorized (and repaired on 401) like
//! any other call.

use std::collections::BTreeSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use pulse_core::TransportError;
use pulse_http::{ApiRequest, PipelineError, RequestPipeline};
use pulse_settings::StreamSettings;
use tracing::debug;

use crate::sse::{SseEvent, parse_sse_events};

/// A live event stream. Ends when the server closes the channel.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, TransportError>> + Send>>;

/// Opens (and optionally retargets) the push channel.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// Open a channel carrying `topics`.
    async fn connect(&self, topics: &BTreeSet<String>) -> Result<EventStream, PipelineError>;

    /// Whether [`Self::update_topics`] can retarget a live channel.
    fn supports_incremental(&self) -> bool {
        false
    }

    /// Retarget the live channel to `topics` without reopening it.
    async fn update_topics(&self, _topics: &BTreeSet<String>) -> Result<(), PipelineError> {
        Err(TransportError::Protocol("incremental topic updates not supported".into()).into())
    }
}

/// Comma-separated topic list as sent on the wire.
pub fn encode_topics(topics: &BTreeSet<String>) -> String {
    topics.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// [`StreamConnector`] over the request pipeline and SSE.
///
/// The endpoint takes its topic list in the query string, so a topic change
/// means reopening the channel.
#[derive(Clone, Debug)]
pub struct PipelineConnector {
    pipeline: RequestPipeline,
    settings: StreamSettings,
}

impl PipelineConnector {
    /// Connect through `pipeline` using the stream settings.
    pub fn new(pipeline: RequestPipeline, settings: StreamSettings) -> Self {
        Self { pipeline, settings }
    }

    /// The request that opens a channel for `topics`.
    pub fn request(&self, topics: &BTreeSet<String>) -> ApiRequest {
        ApiRequest::get(self.settings.path.clone())
            .query(self.settings.tickers_param.clone(), encode_topics(topics))
            .header("accept", "text/event-stream")
            .header("cache-control", "no-cache")
            .streaming()
    }
}

#[async_trait]
impl StreamConnector for PipelineConnector {
    #[tracing::instrument(skip_all, fields(topics = topics.len()))]
    async fn connect(&self, topics: &BTreeSet<String>) -> Result<EventStream, PipelineError> {
        let resp = self
            .pipeline
            .execute(self.request(topics))
            .await?
            .error_for_status()
            .await?;

        if let Some(content_type) = resp.header("content-type") {
            if !content_type.starts_with("text/event-stream") {
                return Err(TransportError::Protocol(format!(
                    "expected text/event-stream, got {content_type}"
                ))
                .into());
            }
        }
        debug!("push channel open");
        Ok(Box::pin(parse_sse_events(Box::pin(resp.bytes_stream()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_comma_joined_in_order() {
        let topics: BTreeSet<String> = ["MSFT", "AAPL", "^GSPC"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(encode_topics(&topics), "AAPL,MSFT,^GSPC");
        assert_eq!(encode_topics(&BTreeSet::new()), "");
    }
}
