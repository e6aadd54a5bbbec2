use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, FleetBackend};

/// Opaque backend-issued token required on every fleet and rover call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum SessionStorageError {
    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session file {path} is not valid json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<SessionId>, SessionStorageError>;
    fn save(&self, session: &SessionId) -> Result<(), SessionStorageError>;
    fn clear(&self) -> Result<(), SessionStorageError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    session_id: SessionId,
    created_at: DateTime<Utc>,
}

/// Keeps the session id in a small JSON file so it survives restarts.
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SessionStorageError {
        SessionStorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> Result<Option<SessionId>, SessionStorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };

        let stored: StoredSession =
            serde_json::from_slice(&bytes).map_err(|source| SessionStorageError::Json {
                path: self.path.clone(),
                source,
            })?;

        if stored.session_id.as_str().is_empty() {
            return Ok(None);
        }
        Ok(Some(stored.session_id))
    }

    fn save(&self, session: &SessionId) -> Result<(), SessionStorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }

        let stored = StoredSession {
            session_id: session.clone(),
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&stored).map_err(|source| SessionStorageError::Json {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, bytes).map_err(|err| self.io_error(err))
    }

    fn clear(&self) -> Result<(), SessionStorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    pub(crate) slot: StdMutex<Option<SessionId>>,
}

impl MemorySessionStorage {
    pub fn with_session(session: SessionId) -> Self {
        Self {
            slot: StdMutex::new(Some(session)),
        }
    }

    /// Poisoned locks are recovered; the slot is a plain value.
    fn slot(&self) -> MutexGuard<'_, Option<SessionId>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> Result<Option<SessionId>, SessionStorageError> {
        Ok(self.slot().clone())
    }

    fn save(&self, session: &SessionId) -> Result<(), SessionStorageError> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStorageError> {
        *self.slot() = None;
        Ok(())
    }
}

/// Sole owner of the session id: loads it, creates it, persists it.
pub struct SessionManager {
    storage: Box<dyn SessionStorage>,
    cached: Mutex<Option<SessionId>>,
}

impl SessionManager {
    pub fn new(storage: impl SessionStorage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
            cached: Mutex::new(None),
        }
    }

    pub async fn current(&self) -> Option<SessionId> {
        self.cached.lock().await.clone()
    }

    /// Return the cached session, else the persisted one, else a fresh one
    /// from the backend. Concurrent callers share a single creation.
    pub async fn ensure_session(
        &self,
        backend: &dyn FleetBackend,
    ) -> Result<SessionId, BackendError> {
        let mut cached = self.cached.lock().await;
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }

        match self.storage.load() {
            Ok(Some(session)) => {
                debug!(session = %session, "restored persisted session");
                *cached = Some(session.clone());
                return Ok(session);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "ignoring unreadable session storage"),
        }

        let session = backend.start_session().await?;
        info!(session = %session, "started new backend session");
        if let Err(err) = self.storage.save(&session) {
            warn!(error = %err, "failed to persist session id");
        }
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Forget the current session in memory and in storage. The next
    /// `ensure_session` call creates a new one.
    pub async fn reset(&self) -> Result<(), SessionStorageError> {
        let mut cached = self.cached.lock().await;
        *cached = None;
        self.storage.clear()
    }
}
