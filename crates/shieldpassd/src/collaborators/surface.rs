//! Countdown surface: an external display of the remaining pause time.
//!
//! The surface is optional. When it is missing or reports `Unsupported`,
//! the countdown keeps running and only the display is skipped.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shieldpass_core::format_clock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("countdown surface not supported here")]
    Unsupported,

    #[error("countdown surface io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("countdown surface encode error: {0}")]
    Encode(String),
}

pub trait CountdownSurface: Send + Sync {
    /// Begins displaying a countdown toward `end`.
    fn start(&self, label: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), SurfaceError>;

    /// Pushes a fresh remaining-time value.
    fn update(&self, end: DateTime<Utc>, remaining_secs: u64) -> Result<(), SurfaceError>;

    /// Removes the countdown. Ending when nothing is shown is a no-op.
    fn end(&self) -> Result<(), SurfaceError>;
}

/// What `FileCountdownSurface` writes on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownSnapshot {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub remaining_secs: u64,
    /// "9:05" style, ready for a status bar
    pub display: String,
}

/// Writes the countdown to a JSON file for status bars to poll.
///
/// The file exists exactly while a countdown is showing.
#[derive(Debug, Clone)]
pub struct FileCountdownSurface {
    path: PathBuf,
}

impl FileCountdownSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot currently on disk.
    pub fn read(&self) -> Result<Option<CountdownSnapshot>, SurfaceError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| SurfaceError::Encode(e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SurfaceError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write(&self, snapshot: &CountdownSnapshot) -> Result<(), SurfaceError> {
        let json =
            serde_json::to_vec(snapshot).map_err(|e| SurfaceError::Encode(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| SurfaceError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| SurfaceError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl CountdownSurface for FileCountdownSurface {
    fn start(&self, label: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), SurfaceError> {
        let remaining_secs = (end - start).num_seconds().max(0) as u64;
        self.write(&CountdownSnapshot {
            label: label.to_string(),
            start,
            end,
            remaining_secs,
            display: format_clock(remaining_secs),
        })
    }

    fn update(&self, end: DateTime<Utc>, remaining_secs: u64) -> Result<(), SurfaceError> {
        // Updates after `end()` are dropped rather than resurrecting the file.
        let Some(mut snapshot) = self.read()? else {
            return Ok(());
        };
        snapshot.end = end;
        snapshot.remaining_secs = remaining_secs;
        snapshot.display = format_clock(remaining_secs);
        self.write(&snapshot)
    }

    fn end(&self) -> Result<(), SurfaceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SurfaceError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
