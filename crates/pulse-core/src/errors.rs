//! Error taxonomy shared by the auth, HTTP, and stream layers.
//!
//! - [`AuthError`]: session lifecycle failures (login, register, refresh)
//! - [`TransportError`]: HTTP-layer failures, classified but never retried here
//! - [`SubscriptionError`]: per-ticker failures that degrade a single ticker
//!
//! Every variant is `Clone` so a single refresh outcome can be handed to all
//! callers waiting on the same refresh cycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Category
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse classification used for logging and caller retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Credentials rejected or session no longer valid.
    Authentication,
    /// The request took longer than its bound.
    Timeout,
    /// Connection refused, reset, DNS failure.
    Network,
    /// 5xx from the server.
    Server,
    /// Payload could not be decoded.
    Protocol,
    /// Caller supplied something invalid.
    InvalidRequest,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Timeout => write!(f, "timeout"),
            Self::Network => write!(f, "network"),
            Self::Server => write!(f, "server"),
            Self::Protocol => write!(f, "protocol"),
            Self::InvalidRequest => write!(f, "invalid_request"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TransportError
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP-layer failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Request or connect attempt exceeded its timeout.
    #[error("request timed out")]
    Timeout,

    /// Network-level failure before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// Server responded with a 5xx status.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Response arrived but its payload was not what the contract promises.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Build a [`TransportError::Server`] from a status and body.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout => ErrorCategory::Timeout,
            Self::Network(_) => ErrorCategory::Network,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Protocol(_) => ErrorCategory::Protocol,
        }
    }

    /// Whether a caller could reasonably retry the same request.
    ///
    /// The request pipeline never retries these itself.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Protocol(err.to_string())
        } else if let Some(status) = err.status().filter(reqwest::StatusCode::is_server_error) {
            Self::server(status.as_u16(), err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AuthError
// ─────────────────────────────────────────────────────────────────────────────

/// Session lifecycle failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Login rejected the supplied credentials.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration collided with an existing account.
    #[error("account already exists")]
    Conflict,

    /// The refresh token was expired or already used; the session is gone.
    ///
    /// Fatal: callers are expected to return to an unauthenticated state.
    #[error("session expired")]
    SessionExpired,

    /// The auth call never reached a verdict.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AuthError {
    /// Error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCredentials | Self::SessionExpired => ErrorCategory::Authentication,
            Self::Conflict => ErrorCategory::InvalidRequest,
            Self::Transport(e) => e.category(),
        }
    }

    /// Whether this error ends the session for good.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SubscriptionError
// ─────────────────────────────────────────────────────────────────────────────

/// Per-ticker subscription failure. Never tears down the shared connection.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Symbol is malformed locally or unknown to the server.
    #[error("invalid ticker {ticker}: {reason}")]
    InvalidTicker {
        /// The offending symbol as supplied.
        ticker: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl SubscriptionError {
    /// Shorthand for [`SubscriptionError::InvalidTicker`].
    #[must_use]
    pub fn invalid_ticker(ticker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTicker {
            ticker: ticker.into(),
            reason: reason.into(),
        }
    }

    /// The ticker this error concerns.
    #[must_use]
    pub fn ticker(&self) -> &str {
        match self {
            Self::InvalidTicker { ticker, .. } => ticker,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
