//! Session type and token expiry helpers.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Subscription tier reported by the auth server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Free plan.
    #[default]
    Free,
    /// Paid plan.
    Pro,
    /// Organisation plan.
    Enterprise,
    /// Any tier this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An authenticated session: token pair plus identity.
///
/// At most one exists process-wide; the session manager is its only writer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Single-use refresh token (rotated on every refresh).
    pub refresh_token: String,
    /// Absolute access-token expiry in **milliseconds** since Unix epoch.
    pub expires_at: i64,
    /// Owning user.
    pub user_id: UserId,
    /// Plan tier.
    #[serde(default)]
    pub tier: Tier,
}

impl Session {
    /// Whether the access token expires within `buffer_ms` from now.
    #[must_use]
    pub fn expires_within(&self, buffer_ms: i64) -> bool {
        now_ms() > self.expires_at.saturating_sub(buffer_ms)
    }
}

// Tokens must never reach log output.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .field("tier", &self.tier)
            .finish()
    }
}

/// Current time in milliseconds since epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry for a token that lives `expires_in_secs` from now.
#[must_use]
pub fn calculate_expires_at(expires_in_secs: i64) -> i64 {
    now_ms().saturating_add(expires_in_secs.saturating_mul(1000))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
