//! Request builder and response wrapper.

use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use pulse_core::TransportError;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::errors::PipelineError;

/// A request description, replayable for the post-refresh retry.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<serde_json::Value>,
    pub(crate) skip_auth: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) streaming: bool,
}

impl ApiRequest {
    /// Request with an arbitrary method.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            skip_auth: false,
            timeout: None,
            streaming: false,
        }
    }

    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `DELETE path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Send without a bearer token and skip refresh handling.
    #[must_use]
    pub fn skip_auth(mut self, skip: bool) -> Self {
        self.skip_auth = skip;
        self
    }

    /// Override the pipeline's default timeout.
    ///
    /// For streaming requests this bounds only the wait for response headers.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark the response as a long-lived stream (no whole-body timeout).
    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters in insertion order.
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }
}

/// A response that made it through the pipeline.
///
/// 5xx never reaches here (it is a [`TransportError::Server`]); a 4xx does, so
/// callers decide what it means.
#[derive(Debug)]
pub struct ApiResponse {
    inner: reqwest::Response,
}

impl ApiResponse {
    pub(crate) fn new(inner: reqwest::Response) -> Self {
        Self { inner }
    }

    /// HTTP status.
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name)?.to_str().ok()
    }

    /// Turn a non-2xx status into [`PipelineError::Status`].
    pub async fn error_for_status(self) -> Result<Self, PipelineError> {
        let status = self.inner.status();
        if status.is_success() {
            return Ok(self);
        }
        let body = self.inner.text().await.unwrap_or_default();
        Err(PipelineError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Decode the body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        Ok(self.inner.json().await?)
    }

    /// Body as text.
    pub async fn text(self) -> Result<String, TransportError> {
        Ok(self.inner.text().await?)
    }

    /// Body as a stream of chunks.
    pub fn bytes_stream(self) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send {
        self.inner.bytes_stream()
    }
}
