//! Session lifecycle and single-flight refresh.
//!
//! State machine:
//!
//! ```text
//! Anonymous -> Authenticating -> Authenticated -> Refreshing -> Authenticated
//!                                                          \-> Expired
//! any -> Anonymous (logout)
//! ```
//!
//! A refresh runs on its own task and is shared by every caller that asks
//! for one while it is in flight, so a burst of 401s costs one round trip.
//! The task completes even if every caller is cancelled.
//!
//! Every write to the store bumps a session generation. A refresh cycle
//! belongs to the generation it started in and commits only if that is still
//! current, so a login or logout that lands mid-refresh wins.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use pulse_core::{AuthError, Session, TransportError, calculate_expires_at};
use pulse_settings::AuthSettings;
use tracing::{debug, info, warn};

use crate::api::{AuthApi, Credentials, RegistrationDetails, TokenGrant, UserProfile};
use crate::store::{ListenerId, TokenStore};

type RefreshCycle = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

/// Observable session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No session.
    Anonymous,
    /// Login or registration in progress.
    Authenticating,
    /// A usable session is held.
    Authenticated,
    /// A refresh cycle is in flight.
    Refreshing,
    /// The server rejected the refresh token; the session is gone.
    Expired,
}

/// Session manager tuning.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Upper bound on one refresh (and logout) round trip.
    pub refresh_timeout: Duration,
    /// Treat the access token as stale this long before it expires.
    pub expiry_buffer_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&AuthSettings::default())
    }
}

impl From<&AuthSettings> for SessionConfig {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            refresh_timeout: Duration::from_millis(settings.refresh_timeout_ms),
            expiry_buffer_ms: settings.expiry_buffer_ms(),
        }
    }
}

/// Owns the session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    store: Arc<TokenStore>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    /// Held across the check and the store write.
    generation: Mutex<u64>,
    refresh: Mutex<Option<(u64, RefreshCycle)>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.inner.state.lock())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager over `store`. State starts from whatever the store holds.
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<TokenStore>, config: SessionConfig) -> Self {
        let state = if store.is_empty() {
            SessionState::Anonymous
        } else {
            SessionState::Authenticated
        };
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                config,
                state: Mutex::new(state),
                generation: Mutex::new(0),
                refresh: Mutex::new(None),
            }),
        }
    }

    /// Current session, if any.
    pub fn current(&self) -> Option<Session> {
        self.inner.store.get()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// Register a callback for session changes (`None` on logout or expiry).
    ///
    /// Listeners run inside the session write and must not call `login`,
    /// `logout`, `restore` or `refresh` synchronously.
    pub fn on_session_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&Session>) + Send + Sync + 'static,
    {
        self.inner.store.on_change(listener)
    }

    /// Unregister a callback added with [`Self::on_session_change`].
    pub fn remove_session_listener(&self, id: ListenerId) -> bool {
        self.inner.store.remove_listener(id)
    }

    /// Reload a persisted session, if the store has a mirror holding one.
    pub fn restore(&self) -> Option<Session> {
        let mut generation = self.inner.generation.lock();
        let session = self.inner.store.restore()?;
        *generation += 1;
        self.inner.set_state(SessionState::Authenticated);
        Some(session)
    }

    /// Log in and store the resulting session.
    ///
    /// On failure the store is left exactly as it was.
    #[tracing::instrument(skip_all, fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let previous = self.inner.replace_state(SessionState::Authenticating);
        self.complete_login(credentials, previous).await
    }

    async fn complete_login(
        &self,
        credentials: &Credentials,
        previous: SessionState,
    ) -> Result<Session, AuthError> {
        let result = async {
            let grant = self.inner.api.login(credentials).await?;
            self.inner.session_from_grant(grant, None).await
        }
        .await;

        match result {
            Ok(session) => {
                {
                    let mut generation = self.inner.generation.lock();
                    self.inner.store.set(session.clone());
                    *generation += 1;
                    self.inner.set_state(SessionState::Authenticated);
                }
                info!(user_id = %session.user_id, "logged in");
                Ok(session)
            }
            Err(e) => {
                self.inner.restore_state(previous);
                warn!(error = %e, category = %e.category(), "login failed");
                Err(e)
            }
        }
    }

    /// Create an account, then log in with the same credentials.
    #[tracing::instrument(skip_all, fields(email = %details.email))]
    pub async fn register(&self, details: &RegistrationDetails) -> Result<Session, AuthError> {
        let previous = self.inner.replace_state(SessionState::Authenticating);
        if let Err(e) = self.inner.api.register(details).await {
            self.inner.restore_state(previous);
            warn!(error = %e, "registration failed");
            return Err(e);
        }
        debug!("registered, logging in");
        self.complete_login(&details.credentials(), previous).await
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Concurrent callers share one in-flight cycle. Rejection clears the
    /// session and yields [`AuthError::SessionExpired`]; a transport failure
    /// or timeout keeps the session and yields [`AuthError::Transport`].
    /// A cycle overtaken by a login or logout yields
    /// [`AuthError::SessionExpired`] and leaves the newer session alone.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let cycle = {
            let mut slot = self.inner.refresh.lock();
            let (generation, current) = {
                let generation = self.inner.generation.lock();
                (*generation, self.inner.store.get())
            };
            match slot.as_ref() {
                Some((started, cycle)) if *started == generation => {
                    debug!("joining in-flight refresh");
                    cycle.clone()
                }
                _ => {
                    let Some(current) = current else {
                        return Err(AuthError::SessionExpired);
                    };
                    let cycle = Inner::spawn_refresh(Arc::clone(&self.inner), generation, current);
                    *slot = Some((generation, cycle.clone()));
                    cycle
                }
            }
        };
        cycle.await
    }

    /// Refresh only if the stored access token is still `stale_token`.
    ///
    /// A caller whose 401 arrives after another caller already rotated the
    /// pair gets the stored session back without a second refresh.
    pub async fn refresh_after(&self, stale_token: &str) -> Result<Session, AuthError> {
        match self.inner.store.get() {
            None => Err(AuthError::SessionExpired),
            Some(session) if session.access_token != stale_token => {
                debug!("token already rotated, reusing stored session");
                Ok(session)
            }
            Some(_) => self.refresh().await,
        }
    }

    /// Current session, refreshed first if it expires within the buffer.
    ///
    /// `Ok(None)` when anonymous.
    pub async fn ensure_fresh(&self) -> Result<Option<Session>, AuthError> {
        match self.inner.store.get() {
            None => Ok(None),
            Some(session) if session.expires_within(self.inner.config.expiry_buffer_ms) => {
                debug!(expires_at = session.expires_at, "access token near expiry");
                self.refresh().await.map(Some)
            }
            Some(session) => Ok(Some(session)),
        }
    }

    /// Best-effort server logout. The store is cleared whatever the outcome.
    #[tracing::instrument(skip_all)]
    pub async fn logout(&self) {
        if let Some(session) = self.inner.store.get() {
            let call = self
                .inner
                .api
                .logout(&session.access_token, &session.refresh_token);
            match tokio::time::timeout(self.inner.config.refresh_timeout, call).await {
                Ok(Ok(())) => debug!("server logout acknowledged"),
                Ok(Err(e)) => warn!(error = %e, "server logout failed, clearing locally"),
                Err(_) => warn!("server logout timed out, clearing locally"),
            }
        }
        {
            let mut generation = self.inner.generation.lock();
            self.inner.store.clear();
            *generation += 1;
            self.inner.set_state(SessionState::Anonymous);
        }
        info!("logged out");
    }

    /// Fetch the profile for the current session, refreshing once on rejection.
    pub async fn current_user(&self) -> Result<UserProfile, AuthError> {
        let session = self.inner.store.get().ok_or(AuthError::SessionExpired)?;
        match self.inner.api.me(&session.access_token).await {
            Err(AuthError::SessionExpired) => {
                let fresh = self.refresh_after(&session.access_token).await?;
                self.inner.api.me(&fresh.access_token).await
            }
            other => other,
        }
    }
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    fn replace_state(&self, state: SessionState) -> SessionState {
        std::mem::replace(&mut *self.state.lock(), state)
    }

    /// Refresh-driven transition; a login in progress keeps `Authenticating`.
    fn settle_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != SessionState::Authenticating {
            *current = state;
        }
    }

    /// Undo `Authenticating` after a failed login, accounting for whatever
    /// happened to the session meanwhile.
    fn restore_state(&self, previous: SessionState) {
        let refreshing = {
            let slot = self.refresh.lock();
            let generation = *self.generation.lock();
            slot.as_ref().is_some_and(|(started, cycle)| {
                *started == generation && cycle.peek().is_none()
            })
        };
        let mut current = self.state.lock();
        if *current != SessionState::Authenticating {
            // A logout got there first.
            return;
        }
        *current = if refreshing {
            SessionState::Refreshing
        } else if !self.store.is_empty() {
            SessionState::Authenticated
        } else if previous == SessionState::Anonymous {
            SessionState::Anonymous
        } else {
            SessionState::Expired
        };
    }

    fn spawn_refresh(inner: Arc<Self>, generation: u64, current: Session) -> RefreshCycle {
        let task = tokio::spawn(async move {
            let result = inner.run_refresh(generation, current).await;
            // Cleared only after the store holds the outcome, and only if no
            // newer cycle has taken the slot.
            let mut slot = inner.refresh.lock();
            if slot.as_ref().is_some_and(|(started, _)| *started == generation) {
                *slot = None;
            }
            result
        });
        async move {
            task.await.unwrap_or_else(|e| {
                Err(AuthError::Transport(TransportError::Network(format!(
                    "refresh task failed: {e}"
                ))))
            })
        }
        .boxed()
        .shared()
    }

    #[tracing::instrument(skip_all)]
    async fn run_refresh(&self, generation: u64, current: Session) -> Result<Session, AuthError> {
        self.settle_state(SessionState::Refreshing);

        let call = self.api.refresh(&current.refresh_token);
        let outcome = match tokio::time::timeout(self.config.refresh_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Transport(TransportError::Timeout)),
        };

        let grant = match outcome {
            Ok(grant) => grant,
            Err(AuthError::SessionExpired | AuthError::InvalidCredentials) => {
                metrics::counter!("pulse_refresh_total", "outcome" => "expired").increment(1);
                let mut latest = self.generation.lock();
                if *latest != generation {
                    debug!("refresh rejected for a superseded session");
                    return Err(AuthError::SessionExpired);
                }
                warn!(user_id = %current.user_id, "refresh token rejected, session expired");
                self.store.clear();
                *latest += 1;
                self.settle_state(SessionState::Expired);
                return Err(AuthError::SessionExpired);
            }
            Err(e) => {
                metrics::counter!("pulse_refresh_total", "outcome" => "error").increment(1);
                warn!(error = %e, category = %e.category(), "refresh failed, keeping session");
                if *self.generation.lock() == generation {
                    self.settle_state(SessionState::Authenticated);
                }
                return Err(e);
            }
        };

        let session = self.session_from_grant(grant, Some(&current)).await?;
        {
            let mut latest = self.generation.lock();
            if *latest != generation {
                debug!("discarding refresh result for a superseded session");
                return Err(AuthError::SessionExpired);
            }
            self.store.set(session.clone());
            *latest += 1;
            self.settle_state(SessionState::Authenticated);
        }
        metrics::counter!("pulse_refresh_total", "outcome" => "success").increment(1);
        info!(user_id = %session.user_id, expires_at = session.expires_at, "session refreshed");
        Ok(session)
    }

    /// Build a session from a grant, filling identity from `previous` or `/auth/me`.
    async fn session_from_grant(
        &self,
        grant: TokenGrant,
        previous: Option<&Session>,
    ) -> Result<Session, AuthError> {
        let expires_at = calculate_expires_at(grant.expires_in);
        let (user_id, tier) = match (grant.user_id, grant.tier, previous) {
            (Some(user_id), Some(tier), _) => (user_id, tier),
            (user_id, tier, Some(prev)) => (
                user_id.unwrap_or_else(|| prev.user_id.clone()),
                tier.unwrap_or_else(|| prev.tier.clone()),
            ),
            (user_id, tier, None) => {
                let profile = self.api.me(&grant.access_token).await?;
                (
                    user_id.unwrap_or(profile.user_id),
                    tier.unwrap_or(profile.tier),
                )
            }
        };

        Ok(Session {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at,
            user_id,
            tier,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::{Tier, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted API: refresh waits on a gate so tests control interleaving.
    struct GatedApi {
        refresh_calls: AtomicUsize,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl AuthApi for GatedApi {
        async fn login(&self, credentials: &Credentials) -> Result<TokenGrant, AuthError> {
            if credentials.password != "secret" {
                return Err(AuthError::InvalidCredentials);
            }
            Ok(TokenGrant {
                access_token: "fresh-login".into(),
                refresh_token: "fresh-refresh".into(),
                expires_in: 900,
                user_id: Some(UserId::from("u2")),
                tier: Some(Tier::Free),
            })
        }
        async fn register(&self, _: &RegistrationDetails) -> Result<(), AuthError> {
            Ok(())
        }
        async fn refresh(&self, _: &str) -> Result<TokenGrant, AuthError> {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.gate.notified().await;
            Ok(TokenGrant {
                access_token: format!("a{}", n + 1),
                refresh_token: format!("r{}", n + 1),
                expires_in: 900,
                user_id: None,
                tier: None,
            })
        }
        async fn logout(&self, _: &str, _: &str) -> Result<(), AuthError> {
            Ok(())
        }
        async fn me(&self, _: &str) -> Result<UserProfile, AuthError> {
            Err(AuthError::SessionExpired)
        }
    }

    fn seeded_store() -> Arc<TokenStore> {
        let store = Arc::new(TokenStore::new());
        store.set(Session {
            access_token: "a1".into(),
            refresh_token: "r1".into(),
            expires_at: pulse_core::now_ms() + 600_000,
            user_id: UserId::from("u1"),
            tier: Tier::Pro,
        });
        store
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_cycle() {
        let api = Arc::new(GatedApi {
            refresh_calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let manager = SessionManager::new(api.clone(), seeded_store(), SessionConfig::default());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.refresh().await })
            })
            .collect();

        // Let every waiter attach before releasing the server.
        while api.refresh_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.state(), SessionState::Refreshing);
        api.gate.notify_one();

        for w in waiters {
            let session = w.await.unwrap().unwrap();
            assert_eq!(session.access_token, "a2");
            assert_eq!(session.user_id, UserId::from("u1"));
            assert_eq!(session.tier, Tier::Pro);
        }
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn refresh_after_skips_when_rotated() {
        let api = Arc::new(GatedApi {
            refresh_calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let manager = SessionManager::new(api.clone(), seeded_store(), SessionConfig::default());

        let session = manager.refresh_after("a0").await.unwrap();
        assert_eq!(session.access_token, "a1");
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_without_session_is_expired() {
        let api = Arc::new(GatedApi {
            refresh_calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let manager =
            SessionManager::new(api, Arc::new(TokenStore::new()), SessionConfig::default());
        assert_eq!(manager.refresh().await, Err(AuthError::SessionExpired));
        assert_eq!(manager.refresh_after("a1").await, Err(AuthError::SessionExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timeout_keeps_session() {
        let api = Arc::new(GatedApi {
            refresh_calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let config = SessionConfig {
            refresh_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(api, seeded_store(), config);

        let err = manager.refresh().await.unwrap_err();
        assert_eq!(err, AuthError::Transport(TransportError::Timeout));
        assert_eq!(manager.current().unwrap().access_token, "a1");
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn ensure_fresh_leaves_valid_token_alone() {
        let api = Arc::new(GatedApi {
            refresh_calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let manager = SessionManager::new(api.clone(), seeded_store(), SessionConfig::default());
        let session = manager.ensure_fresh().await.unwrap().unwrap();
        assert_eq!(session.access_token, "a1");
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_login_restores_prior_state() {
        let api = Arc::new(GatedApi {
            refresh_calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let manager = SessionManager::new(api, seeded_store(), SessionConfig::default());
        let err = manager
            .login(&Credentials::new("a@b.c", "bad"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(manager.state(), SessionState::Authenticated);
        assert_eq!(manager.current().unwrap().access_token, "a1");
    }

    async fn wait_for_refresh_calls(api: &GatedApi, n: usize) {
        while api.refresh_calls.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn refresh_landing_after_relogin_is_discarded() {
        let api = Arc::new(GatedApi {
            refresh_calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let manager = SessionManager::new(api.clone(), seeded_store(), SessionConfig::default());

        let pending = {
            let m = manager.clone();
            tokio::spawn(async move { m.refresh().await })
        };
        wait_for_refresh_calls(&api, 1).await;

        manager.logout().await;
        let session = manager
            .login(&Credentials::new("b@c.d", "secret"))
            .await
            .unwrap();
        assert_eq!(session.access_token, "fresh-login");

        api.gate.notify_one();
        assert_eq!(pending.await.unwrap(), Err(AuthError::SessionExpired));

        let stored = manager.current().unwrap();
        assert_eq!(stored.access_token, "fresh-login");
        assert_eq!(stored.user_id, UserId::from("u2"));
        assert_eq!(manager.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn login_during_refresh_supersedes_the_cycle() {
        let api = Arc::new(GatedApi {
            refresh_calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let manager = SessionManager::new(api.clone(), seeded_store(), SessionConfig::default());

        let stale = {
            let m = manager.clone();
            tokio::spawn(async move { m.refresh().await })
        };
        wait_for_refresh_calls(&api, 1).await;
        assert_eq!(manager.state(), SessionState::Refreshing);

        let _ = manager
            .login(&Credentials::new("b@c.d", "secret"))
            .await
            .unwrap();
        assert_eq!(manager.state(), SessionState::Authenticated);

        // A refresh for the new session starts its own cycle.
        let fresh = {
            let m = manager.clone();
            tokio::spawn(async move { m.refresh().await })
        };
        wait_for_refresh_calls(&api, 2).await;

        api.gate.notify_one();
        api.gate.notify_one();
        assert_eq!(stale.await.unwrap(), Err(AuthError::SessionExpired));
        let session = fresh.await.unwrap().unwrap();
        assert_eq!(session.access_token, "a3");
        assert_eq!(session.user_id, UserId::from("u2"));
        assert_eq!(session.tier, Tier::Free);

        assert_eq!(manager.current().unwrap().access_token, "a3");
        assert_eq!(manager.state(), SessionState::Authenticated);
    }
}
