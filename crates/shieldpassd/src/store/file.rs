//! JSON file store shared between processes on one device.
//!
//! Layout under the data directory:
//!
//! ```text
//! current.json   -- the current session record, absent when idle
//! history.json   -- array of closed session records
//! ```
//!
//! Every write goes to a temp file in the same directory and is renamed over
//! the target, so readers in other processes see either the old or the new
//! record and never a torn one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use shieldpass_core::Session;

use super::{SessionStore, StoreError, StoreResult};

const CURRENT_FILE: &str = "current.json";
const HISTORY_FILE: &str = "history.json";

/// File-backed `SessionStore`. Holds no cache; every read hits disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// `StoreError::Io` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE)
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }
}

impl SessionStore for JsonFileStore {
    fn get_current(&self) -> StoreResult<Option<Session>> {
        read_json(&self.current_path())
    }

    fn set_current(&self, session: &Session) -> StoreResult<()> {
        write_json_atomic(&self.current_path(), session)
    }

    fn clear_current(&self) -> StoreResult<()> {
        let path = self.current_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn append_to_history(&self, session: &Session) -> StoreResult<()> {
        let path = self.history_path();
        let mut history: Vec<Session> = read_json(&path)?.unwrap_or_default();

        if history.iter().any(|s| s.id == session.id) {
            debug!(session_id = %session.id, "history already contains session, skipping append");
            return Ok(());
        }

        history.push(session.clone());
        write_json_atomic(&path, &history)
    }

    fn all_history(&self) -> StoreResult<Vec<Session>> {
        Ok(read_json(&self.history_path())?.unwrap_or_default())
    }
}

/// Reads and parses a JSON file. A missing file is `Ok(None)`.
fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Serializes `value` and atomically replaces `path` with it.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Unavailable(format!("no parent directory for {}", path.display())))?;

    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&json).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
