//! TOML configuration.
//!
//! Stored at `~/.config/shieldpass/config.toml`. Every field has a default,
//! so a missing file or a partial one is fine:
//!
//! ```toml
//! targets = ["ShopApp", "Social"]
//! default_pause_minutes = 5
//! max_pause_minutes = 60
//! notification_restore_actions = ["restore", "default"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use shieldpass_protocol::{DEFAULT_SOCKET_PATH, SOCKET_ENV_VAR};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application set the shield covers
    pub targets: Vec<String>,
    pub default_pause_minutes: u64,
    pub max_pause_minutes: u64,
    /// Items logged this long after a pause still count toward it
    pub follow_up_minutes: u64,
    pub tick_interval_ms: u64,
    /// Write the countdown file for status bars
    pub countdown_surface: bool,
    /// Notification action identifiers that mean "restore now"
    pub notification_restore_actions: Vec<String>,
    /// Command run with title and body when a notification fires
    pub notify_command: Option<String>,
    /// Command run with `apply`/`remove` and the targets on every change
    pub enforcer_hook: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub socket_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            default_pause_minutes: 5,
            max_pause_minutes: 60,
            follow_up_minutes: 30,
            tick_interval_ms: 1000,
            countdown_surface: true,
            notification_restore_actions: vec!["restore".to_string(), "default".to_string()],
            notify_command: None,
            enforcer_hook: None,
            data_dir: None,
            socket_path: None,
        }
    }
}

impl Config {
    /// `~/.config/shieldpass/config.toml`, if a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shieldpass").join("config.toml"))
    }

    /// Loads from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads from the default path, or defaults if there is none.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Directory for the store, shield state, countdown and analytics files.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("shieldpass")
        })
    }

    /// Socket path: `SHIELDPASS_SOCKET`, then the config value, then the default.
    pub fn socket_path(&self) -> PathBuf {
        if let Ok(path) = std::env::var(SOCKET_ENV_VAR) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        self.socket_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
    }

    pub fn shield_state_path(&self) -> PathBuf {
        self.data_dir().join("shield.json")
    }

    pub fn countdown_path(&self) -> PathBuf {
        self.data_dir().join("countdown.json")
    }

    pub fn analytics_path(&self) -> PathBuf {
        self.data_dir().join("analytics.jsonl")
    }

    /// Settings the coordinator actor needs.
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            targets: self.targets.clone(),
            default_duration: minutes(self.default_pause_minutes.max(1)),
            max_duration: minutes(self.max_pause_minutes.max(1)),
            follow_up_window: minutes(self.follow_up_minutes),
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(10)),
            restore_actions: self.notification_restore_actions.clone(),
        }
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

/// Runtime settings for the coordinator, derived from `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub targets: Vec<String>,
    pub default_duration: Duration,
    pub max_duration: Duration,
    pub follow_up_window: Duration,
    pub tick_interval: Duration,
    pub restore_actions: Vec<String>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Config::default().coordinator_settings()
    }
}

impl CoordinatorSettings {
    /// Clamps a requested pause into `1s..=max_duration`.
    pub fn clamp_duration(&self, requested: Option<Duration>) -> Duration {
        let requested = requested.unwrap_or(self.default_duration);
        requested.clamp(Duration::from_secs(1), self.max_duration)
    }

    /// Targets the enforcer acts on for a session labelled `target`.
    ///
    /// The configured set when there is one, else just `target`.
    pub fn targets_for(&self, target: &str) -> Vec<String> {
        if self.targets.is_empty() {
            vec![target.to_string()]
        } else {
            self.targets.clone()
        }
    }

    pub fn is_restore_action(&self, action: &str) -> bool {
        self.restore_actions.iter().any(|a| a == action)
    }
}
