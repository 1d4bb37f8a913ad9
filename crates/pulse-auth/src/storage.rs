//! Durable session mirror.
//!
//! One JSON file can hold sessions for several namespaces:
//!
//! ```json
//! { "version": 1, "entries": { "pulse.session": { ... } }, "lastUpdated": "..." }
//! ```
//!
//! Writes go to a temp file in the same directory and are renamed into place,
//! so a crash never leaves a half-written file. The file is `0600`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use pulse_core::Session;
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;

/// Current on-disk format version.
const STORAGE_VERSION: u32 = 1;

/// Default session file name under `~/.pulse`.
pub const AUTH_FILE_NAME: &str = "auth.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionStorage {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, Session>,
    #[serde(default)]
    last_updated: String,
}

/// A namespaced slot in the session file.
#[derive(Clone, Debug)]
pub struct SessionFile {
    path: PathBuf,
    namespace: String,
}

impl SessionFile {
    /// Mirror the session under `namespace` in the file at `path`.
    pub fn new(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.into(),
        }
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the session stored under this namespace.
    ///
    /// A missing file, unknown version, or corrupt JSON yields `None`; the last
    /// two are logged.
    pub fn load(&self) -> Option<Session> {
        self.read_storage()?.entries.remove(&self.namespace)
    }

    /// Store `session` under this namespace, keeping other namespaces intact.
    pub fn save(&self, session: &Session) -> Result<(), StorageError> {
        let mut storage = self.read_storage().unwrap_or_else(|| SessionStorage {
            version: STORAGE_VERSION,
            ..SessionStorage::default()
        });
        let _ = storage
            .entries
            .insert(self.namespace.clone(), session.clone());
        self.write_storage(&mut storage)
    }

    /// Remove this namespace's session. A missing file is already clear.
    pub fn clear(&self) -> Result<(), StorageError> {
        let Some(mut storage) = self.read_storage() else {
            return Ok(());
        };
        if storage.entries.remove(&self.namespace).is_none() {
            return Ok(());
        }
        self.write_storage(&mut storage)
    }

    fn read_storage(&self) -> Option<SessionStorage> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to read session file: {e}");
                return None;
            }
        };

        match serde_json::from_str::<SessionStorage>(&data) {
            Ok(storage) if storage.version == STORAGE_VERSION => Some(storage),
            Ok(storage) => {
                tracing::warn!("unsupported session file version: {}", storage.version);
                None
            }
            Err(e) => {
                tracing::warn!("failed to parse session file: {e}");
                None
            }
        }
    }

    fn write_storage(&self, storage: &mut SessionStorage) -> Result<(), StorageError> {
        storage.version = STORAGE_VERSION;
        storage.last_updated = chrono::Utc::now().to_rfc3339();

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        // NamedTempFile is created 0600 on unix, so the rename keeps it private.
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), storage)?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        let _ = tmp.persist(&self.path)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
