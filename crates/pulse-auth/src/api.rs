//! The `/auth/*` REST surface.
//!
//! [`AuthApi`] is the seam the session manager depends on; [`HttpAuthApi`] is
//! the reqwest implementation. Status codes are classified here so the
//! manager only ever sees the [`AuthError`] taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::{AuthError, Tier, TransportError, UserId};
use pulse_settings::ApiSettings;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Login credentials.
#[derive(Clone, Serialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Build credentials.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// New account details.
#[derive(Clone, Serialize)]
pub struct RegistrationDetails {
    /// Account email.
    pub email: String,
    /// Chosen password.
    pub password: String,
    /// Optional display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl RegistrationDetails {
    /// Credentials to log in with once registered.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.email.clone(), self.password.clone())
    }
}

impl std::fmt::Debug for RegistrationDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationDetails")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Token payload returned by login and refresh.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    /// New access token.
    pub access_token: String,
    /// New refresh token; the previous one is now dead.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    /// Owning user, when the server includes it.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Plan tier, when the server includes it.
    #[serde(default)]
    pub tier: Option<Tier>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .field("user_id", &self.user_id)
            .field("tier", &self.tier)
            .finish_non_exhaustive()
    }
}

/// `GET /auth/me` response.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    /// User identifier.
    pub user_id: UserId,
    /// Plan tier.
    #[serde(default)]
    pub tier: Tier,
    /// Account email, if the server shares it.
    #[serde(default)]
    pub email: Option<String>,
}

/// Remote authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /auth/login`.
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, AuthError>;

    /// `POST /auth/register`. Does not log in.
    async fn register(&self, details: &RegistrationDetails) -> Result<(), AuthError>;

    /// `POST /auth/refresh`. Rejection maps to [`AuthError::SessionExpired`].
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;

    /// `POST /auth/logout`.
    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), AuthError>;

    /// `GET /auth/me`.
    async fn me(&self, access_token: &str) -> Result<UserProfile, AuthError>;
}

/// [`AuthApi`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpAuthApi {
    client: reqwest::Client,
    settings: ApiSettings,
}

impl HttpAuthApi {
    /// Build a client from API settings.
    pub fn new(settings: &ApiSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;
        Ok(Self::with_client(client, settings.clone()))
    }

    /// Use an existing client (shares its connection pool).
    pub fn with_client(client: reqwest::Client, settings: ApiSettings) -> Self {
        Self { client, settings }
    }

    fn url(&self, path: &str) -> String {
        self.settings.url(path)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    #[tracing::instrument(skip_all)]
    async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, AuthError> {
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(credentials)
            .send()
            .await
            .map_err(TransportError::from)?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json().await.map_err(TransportError::from)?),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AuthError::InvalidCredentials)
            }
            _ => Err(unexpected(resp).await.into()),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn register(&self, details: &RegistrationDetails) -> Result<(), AuthError> {
        let resp = self
            .client
            .post(self.url("/auth/register"))
            .json(details)
            .send()
            .await
            .map_err(TransportError::from)?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(AuthError::Conflict),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(AuthError::InvalidCredentials)
            }
            _ => Err(unexpected(resp).await.into()),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let resp = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(TransportError::from)?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json().await.map_err(TransportError::from)?),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(AuthError::SessionExpired)
            }
            _ => Err(unexpected(resp).await.into()),
        }
    }

    #[tracing::instrument(skip_all)]
    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), AuthError> {
        let resp = self
            .client
            .post(self.url("/auth/logout"))
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(TransportError::from)?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(unexpected(resp).await.into())
        }
    }

    #[tracing::instrument(skip_all)]
    async fn me(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let resp = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(TransportError::from)?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json().await.map_err(TransportError::from)?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::SessionExpired),
            _ => Err(unexpected(resp).await.into()),
        }
    }
}

/// Classify a status the endpoint contract does not name.
async fn unexpected(resp: reqwest::Response) -> TransportError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_server_error() {
        TransportError::server(status.as_u16(), body)
    } else {
        TransportError::Protocol(format!("unexpected status {status}: {body}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
