//! Settings type definitions.
//!
//! Every struct is `camelCase` on the wire and `#[serde(default)]`, so a
//! partial file only overrides the keys it names.

mod api;
mod auth;
mod stream;

pub use api::*;
pub use auth::*;
pub use stream::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "api": { "baseUrl": "https://api.example.com" },
///   "stream": { "reconnect": { "maxRetries": 5 } }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// REST endpoint settings.
    pub api: ApiSettings,
    /// Session and token storage settings.
    pub auth: AuthSettings,
    /// Push channel settings.
    pub stream: StreamSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_defaults() {
        let settings: PulseSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.auth.namespace, "pulse.session");
        assert_eq!(settings.stream.reconnect.max_retries, 8);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(PulseSettings::default()).unwrap();
        assert!(json["api"].get("baseUrl").is_some());
        assert!(json["auth"].get("refreshTimeoutMs").is_some());
        assert!(json["stream"]["reconnect"].get("maxDelayMs").is_some());
    }
}
