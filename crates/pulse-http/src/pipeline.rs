//! The authorized request pipeline.

use std::time::Duration;

use pulse_auth::SessionManager;
use pulse_core::{AuthError, TransportError};
use pulse_settings::{ApiSettings, AuthSettings};
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::request::{ApiRequest, ApiResponse};

/// Pipeline tuning.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// API settings (base URL, default timeout).
    pub api: ApiSettings,
    /// Refresh before dispatch when the token is near expiry.
    pub proactive_refresh: bool,
}

impl PipelineConfig {
    /// Build from the settings tree.
    pub fn from_settings(api: &ApiSettings, auth: &AuthSettings) -> Self {
        Self {
            api: api.clone(),
            proactive_refresh: auth.proactive_refresh,
        }
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }
}

/// Attaches the bearer token, repairs 401s once, classifies failures.
///
/// Cheap to clone; clones share the connection pool and session.
#[derive(Clone, Debug)]
pub struct RequestPipeline {
    client: reqwest::Client,
    sessions: SessionManager,
    config: PipelineConfig,
}

impl RequestPipeline {
    /// Create a pipeline over an existing client.
    ///
    /// The client must not carry a global timeout; streaming requests rely on
    /// per-request bounds.
    pub fn new(client: reqwest::Client, sessions: SessionManager, config: PipelineConfig) -> Self {
        Self {
            client,
            sessions,
            config,
        }
    }

    /// Build a client from settings and wrap it.
    pub fn from_settings(
        sessions: SessionManager,
        config: PipelineConfig,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(config.api.user_agent.clone())
            .build()?;
        Ok(Self::new(client, sessions, config))
    }

    /// The session manager this pipeline authorizes with.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Dispatch `request`.
    ///
    /// A 401 with a session present triggers one shared refresh and one
    /// retry. If the retry is also a 401 it is returned as-is. Other 4xx are
    /// returned as responses; 5xx, timeouts and network failures are errors.
    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, PipelineError> {
        if request.skip_auth {
            return Ok(ApiResponse::new(self.dispatch(&request, None).await?));
        }

        let token = self.access_token().await?;
        let resp = self.dispatch(&request, token.as_deref()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(ApiResponse::new(resp));
        }

        let Some(sent) = token else {
            debug!("401 without a session, passing through");
            return Ok(ApiResponse::new(resp));
        };

        debug!("401, repairing session");
        let session = self.sessions.refresh_after(&sent).await?;
        let retry = self.dispatch(&request, Some(&session.access_token)).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!("still unauthorized after refresh");
        }
        Ok(ApiResponse::new(retry))
    }

    /// `GET path` and decode a 2xx JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PipelineError> {
        let resp = self.execute(ApiRequest::get(path)).await?;
        Ok(resp.error_for_status().await?.json().await?)
    }

    /// `POST path` with a JSON body and decode a 2xx JSON body.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, PipelineError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)
            .map_err(|e| TransportError::Protocol(format!("unencodable body: {e}")))?;
        let resp = self.execute(ApiRequest::post(path).json(body)).await?;
        Ok(resp.error_for_status().await?.json().await?)
    }

    async fn access_token(&self) -> Result<Option<String>, PipelineError> {
        if self.config.proactive_refresh {
            match self.sessions.ensure_fresh().await {
                Ok(session) => return Ok(session.map(|s| s.access_token)),
                Err(AuthError::SessionExpired) => return Err(AuthError::SessionExpired.into()),
                Err(e) => warn!(error = %e, "proactive refresh failed, using current token"),
            }
        }
        Ok(self.sessions.current().map(|s| s.access_token))
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.config.api.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.default_timeout());
        if !request.streaming {
            builder = builder.timeout(timeout);
        }

        let resp = tokio::time::timeout(timeout, builder.send())
            .await
            .map_err(|_| TransportError::Timeout)??;

        let status = resp.status();
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "server error");
            return Err(TransportError::server(status.as_u16(), body));
        }
        Ok(resp)
    }
}
