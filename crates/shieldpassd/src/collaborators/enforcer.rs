//! Restriction enforcer: the thing that actually blocks targets.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EnforcerError {
    #[error("enforcer io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("enforcer state unreadable: {0}")]
    State(String),

    #[error("enforcer hook `{command}` failed: {reason}")]
    Hook { command: String, reason: String },
}

/// Applies or removes the block on a set of targets.
pub trait RestrictionEnforcer: Send + Sync {
    /// Engages the block. Applying twice is harmless.
    fn apply(&self, targets: &[String]) -> Result<(), EnforcerError>;

    /// Lifts the block.
    fn remove(&self, targets: &[String]) -> Result<(), EnforcerError>;

    /// Reports whether the block is currently engaged.
    fn currently_blocked(&self) -> Result<bool, EnforcerError>;
}

/// Contents of the shield state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldState {
    pub blocked: bool,
    #[serde(default)]
    pub targets: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Enforcer that publishes the shield state as a JSON file and optionally
/// runs a hook command on every change.
///
/// The hook receives `apply` or `remove` followed by the target names, e.g.
/// `shieldctl apply ShopApp Social`. A fresh install writes an engaged
/// state so the block starts up.
#[derive(Debug, Clone)]
pub struct ShieldFileEnforcer {
    path: PathBuf,
    hook: Option<String>,
}

impl ShieldFileEnforcer {
    /// Opens the state file, writing an engaged state if none exists.
    pub fn open(
        path: impl Into<PathBuf>,
        initial_targets: &[String],
        hook: Option<String>,
    ) -> Result<Self, EnforcerError> {
        let enforcer = Self {
            path: path.into(),
            hook,
        };
        if enforcer.read_state()?.is_none() {
            info!(path = %enforcer.path.display(), "No shield state found, engaging shield");
            enforcer.write_state(true, initial_targets)?;
        }
        Ok(enforcer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state file. Missing file is `Ok(None)`.
    pub fn read_state(&self) -> Result<Option<ShieldState>, EnforcerError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| EnforcerError::State(e.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(EnforcerError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write_state(&self, blocked: bool, targets: &[String]) -> Result<(), EnforcerError> {
        let state = ShieldState {
            blocked,
            targets: targets.to_vec(),
            updated_at: Utc::now(),
        };
        let json =
            serde_json::to_vec_pretty(&state).map_err(|e| EnforcerError::State(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| EnforcerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Rename over the old file so readers never see a partial write.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| EnforcerError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| EnforcerError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn run_hook(&self, verb: &str, targets: &[String]) -> Result<(), EnforcerError> {
        let Some(command) = &self.hook else {
            return Ok(());
        };

        debug!(command = %command, verb, "Running enforcer hook");
        let status = Command::new(command)
            .arg(verb)
            .args(targets)
            .status()
            .map_err(|e| EnforcerError::Hook {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(EnforcerError::Hook {
                command: command.clone(),
                reason: format!("exited with {status}"),
            })
        }
    }
}

impl RestrictionEnforcer for ShieldFileEnforcer {
    fn apply(&self, targets: &[String]) -> Result<(), EnforcerError> {
        // Write the state first: an engaged state file is the safe outcome
        // even if the hook fails.
        self.write_state(true, targets)?;
        self.run_hook("apply", targets)
    }

    fn remove(&self, targets: &[String]) -> Result<(), EnforcerError> {
        self.run_hook("remove", targets)?;
        self.write_state(false, targets)
    }

    fn currently_blocked(&self) -> Result<bool, EnforcerError> {
        match self.read_state()? {
            Some(state) => Ok(state.blocked),
            None => {
                warn!(path = %self.path.display(), "Shield state file missing");
                Ok(false)
            }
        }
    }
}
