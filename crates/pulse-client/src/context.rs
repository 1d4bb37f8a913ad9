//! Process-wide wiring.

use std::path::PathBuf;
use std::sync::Arc;

use pulse_auth::storage::AUTH_FILE_NAME;
use pulse_auth::{HttpAuthApi, ListenerId, SessionConfig, SessionFile, SessionManager, TokenStore};
use pulse_core::TransportError;
use pulse_http::{PipelineConfig, RequestPipeline};
use pulse_settings::{AuthSettings, PulseSettings};
use pulse_stream::{
    ConnectionState, ControllerConfig, PipelineConnector, StreamConnector, SubscriptionMultiplexer,
};
use tracing::{debug, info};

/// Where the durable session mirror lives: `auth.storagePath`, else
/// `~/.pulse/auth.json`.
pub fn session_file_path(auth: &AuthSettings) -> PathBuf {
    auth.storage_path
        .as_ref()
        .map_or_else(|| pulse_settings::loader::pulse_dir().join(AUTH_FILE_NAME), PathBuf::from)
}

/// Owns one of each component and threads them together.
///
/// A new session arriving while the push channel is `Offline` (typically a
/// fresh login after the old session expired) reopens the channel.
pub struct PulseContext {
    settings: PulseSettings,
    sessions: SessionManager,
    pipeline: RequestPipeline,
    multiplexer: Arc<SubscriptionMultiplexer>,
    listener: ListenerId,
}

impl std::fmt::Debug for PulseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseContext")
            .field("sessions", &self.sessions)
            .field("multiplexer", &self.multiplexer)
            .finish_non_exhaustive()
    }
}

impl PulseContext {
    /// Build the full stack from settings and restore any persisted session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_settings(settings: PulseSettings) -> Result<Self, TransportError> {
        let file = SessionFile::new(
            session_file_path(&settings.auth),
            settings.auth.namespace.clone(),
        );
        let store = Arc::new(TokenStore::with_mirror(file));
        let api = Arc::new(HttpAuthApi::new(&settings.api)?);
        let sessions = SessionManager::new(api, store, SessionConfig::from(&settings.auth));
        if let Some(session) = sessions.restore() {
            info!(user = %session.user_id, "restored persisted session");
        }

        let pipeline = RequestPipeline::from_settings(
            sessions.clone(),
            PipelineConfig::from_settings(&settings.api, &settings.auth),
        )?;
        let connector = Arc::new(PipelineConnector::new(
            pipeline.clone(),
            settings.stream.clone(),
        ));
        Ok(Self::new(settings, sessions, pipeline, connector))
    }

    /// Assemble a context from parts built elsewhere.
    pub fn new(
        settings: PulseSettings,
        sessions: SessionManager,
        pipeline: RequestPipeline,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(
            connector,
            ControllerConfig::from(&settings.stream),
            settings.stream.channel_capacity,
        ));

        let weak = Arc::downgrade(&multiplexer);
        let listener = sessions.on_session_change(move |session| {
            let Some(multiplexer) = weak.upgrade() else {
                return;
            };
            if session.is_some() && multiplexer.snapshot().state == ConnectionState::Offline {
                debug!("session available, reopening push channel");
                multiplexer.reconnect();
            }
        });

        Self {
            settings,
            sessions,
            pipeline,
            multiplexer,
            listener,
        }
    }

    /// Settings the context was built from.
    pub fn settings(&self) -> &PulseSettings {
        &self.settings
    }

    /// Session manager.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Authorized request pipeline.
    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// Subscription multiplexer over the shared push channel.
    pub fn multiplexer(&self) -> &SubscriptionMultiplexer {
        &self.multiplexer
    }

    /// Close the push channel and detach from the session manager.
    ///
    /// The session itself is kept (and stays persisted).
    pub async fn shutdown(&self) {
        self.multiplexer.shutdown().await;
        let _ = self.sessions.remove_session_listener(self.listener);
        debug!("context shut down");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
