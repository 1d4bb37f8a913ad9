//! In-memory session holder.
//!
//! The store never fails from a caller's point of view. Mirror errors are
//! logged and the in-memory value stays authoritative.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use pulse_core::Session;
use tracing::{debug, warn};

use crate::storage::SessionFile;

/// Handle returned by [`TokenStore::on_change`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(Option<&Session>) + Send + Sync>;

/// Holds at most one [`Session`] and notifies listeners when it changes.
pub struct TokenStore {
    session: RwLock<Option<Session>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    mirror: Option<SessionFile>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("session", &*self.session.read())
            .field("listeners", &self.listeners.lock().len())
            .field("mirror", &self.mirror)
            .finish()
    }
}

impl TokenStore {
    /// Memory-only store.
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            mirror: None,
        }
    }

    /// Store that writes every change through to `mirror`.
    pub fn with_mirror(mirror: SessionFile) -> Self {
        Self {
            mirror: Some(mirror),
            ..Self::new()
        }
    }

    /// Current session, if any.
    pub fn get(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Whether no session is held.
    pub fn is_empty(&self) -> bool {
        self.session.read().is_none()
    }

    /// Replace the session and notify listeners.
    pub fn set(&self, session: Session) {
        *self.session.write() = Some(session.clone());
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.save(&session) {
                warn!(path = %mirror.path().display(), "failed to persist session: {e}");
            }
        }
        self.notify(Some(&session));
    }

    /// Drop the session. No-op (no notification, no mirror write) when empty.
    pub fn clear(&self) {
        if self.session.write().take().is_none() {
            return;
        }
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.clear() {
                warn!(path = %mirror.path().display(), "failed to clear session file: {e}");
            }
        }
        self.notify(None);
    }

    /// Load the mirrored session into memory. Returns what was loaded.
    ///
    /// Does not write back to the mirror.
    pub fn restore(&self) -> Option<Session> {
        let session = self.mirror.as_ref()?.load()?;
        debug!(user_id = %session.user_id, "restored session from file");
        *self.session.write() = Some(session.clone());
        self.notify(Some(&session));
        Some(session)
    }

    /// Register a change listener. Called with `None` when the session is cleared.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<&Session>) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, session: Option<&Session>) {
        // Snapshot so a listener may (un)register without deadlocking.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(session);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{Tier, UserId};
    use std::sync::atomic::AtomicUsize;

    fn session(token: &str) -> Session {
        Session {
            access_token: token.into(),
            refresh_token: "r".into(),
            expires_at: 0,
            user_id: UserId::from("u1"),
            tier: Tier::Free,
        }
    }

    #[test]
    fn set_get_clear() {
        let store = TokenStore::new();
        assert!(store.is_empty());
        store.set(session("a1"));
        assert_eq!(store.get().unwrap().access_token, "a1");
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn listeners_see_changes() {
        let store = TokenStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = store.on_change(move |s| sink.lock().push(s.map(|s| s.access_token.clone())));

        store.set(session("a1"));
        store.set(session("a2"));
        store.clear();

        assert_eq!(
            *seen.lock(),
            vec![Some("a1".to_string()), Some("a2".to_string()), None]
        );
    }

    #[test]
    fn clear_on_empty_does_not_notify() {
        let store = TokenStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let _ = store.on_change(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        store.clear();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removed_listener_is_silent() {
        let store = TokenStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let id = store.on_change(move |_| {
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(store.remove_listener(id));
        assert!(!store.remove_listener(id));
        store.set(session("a1"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_can_read_store() {
        let store = Arc::new(TokenStore::new());
        let inner = Arc::clone(&store);
        let observed = Arc::new(Mutex::new(None));
        let o = Arc::clone(&observed);
        let _ = store.on_change(move |_| *o.lock() = inner.get().map(|s| s.access_token));
        store.set(session("a1"));
        assert_eq!(observed.lock().as_deref(), Some("a1"));
    }

    #[test]
    fn mirror_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("auth.json");

        let store = TokenStore::with_mirror(SessionFile::new(&path, "ns"));
        store.set(session("a1"));

        let reloaded = TokenStore::with_mirror(SessionFile::new(&path, "ns"));
        assert!(reloaded.is_empty());
        assert_eq!(reloaded.restore().unwrap().access_token, "a1");
        assert_eq!(reloaded.get().unwrap().access_token, "a1");

        reloaded.clear();
        assert!(SessionFile::new(&path, "ns").load().is_none());
    }

    #[test]
    fn restore_without_mirror_is_none() {
        assert!(TokenStore::new().restore().is_none());
    }
}
