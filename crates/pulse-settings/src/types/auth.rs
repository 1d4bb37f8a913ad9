//! Session and token storage settings.

use serde::{Deserialize, Serialize};

/// Auth behaviour and where the session file lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Session file path. `None` resolves to `~/.pulse/auth.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    /// Key the session is stored under inside the file.
    pub namespace: String,
    /// Upper bound on one refresh round trip, in milliseconds.
    pub refresh_timeout_ms: u64,
    /// Refresh this many seconds before the access token expires.
    pub expiry_buffer_seconds: u64,
    /// Refresh ahead of expiry instead of waiting for a 401.
    pub proactive_refresh: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            storage_path: None,
            namespace: "pulse.session".to_string(),
            refresh_timeout_ms: 10_000,
            expiry_buffer_seconds: 30,
            proactive_refresh: true,
        }
    }
}

impl AuthSettings {
    /// Expiry buffer in milliseconds, as the session manager consumes it.
    #[must_use]
    pub fn expiry_buffer_ms(&self) -> i64 {
        i64::try_from(self.expiry_buffer_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let auth = AuthSettings::default();
        assert!(auth.storage_path.is_none());
        assert_eq!(auth.expiry_buffer_ms(), 30_000);
        assert!(auth.proactive_refresh);
    }

    #[test]
    fn storage_path_omitted_when_none() {
        let json = serde_json::to_value(AuthSettings::default()).unwrap();
        assert!(json.get("storagePath").is_none());
    }
}
