//! Pipeline error type.

use pulse_core::{AuthError, ErrorCategory, TransportError};
use thiserror::Error;

/// Why a pipeline call produced no usable response.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The session could not be repaired.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The request never produced a usable response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A 4xx the caller asked to treat as an error.
    #[error("request failed ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

impl PipelineError {
    /// Error category for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(e) => e.category(),
            Self::Transport(e) => e.category(),
            Self::Status { status: 401 | 403, .. } => ErrorCategory::Authentication,
            Self::Status { .. } => ErrorCategory::InvalidRequest,
        }
    }

    /// Whether the session is gone and the user must log in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Auth(AuthError::SessionExpired))
    }
}
