//! Analytics recorder.
//!
//! Append-only record of what happened: closed sessions with their trigger,
//! orphan repairs, shield appearances and the user's response, and items
//! logged shortly after a pause. Nothing here feeds back into restoration
//! decisions.
//!
//! Interaction events are stored as two records (shown, then completed) and
//! folded back together on read, so the log itself never rewrites a line.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shieldpass_core::{InteractionEvent, InteractionId, Session, SessionId, Trigger, UserAction};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("analytics io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("analytics encode error: {0}")]
    Encode(String),

    #[error("analytics log unavailable")]
    Unavailable,
}

/// One line of the analytics log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyticsRecord {
    SessionClosed {
        session: Session,
        trigger: Trigger,
        recorded_at: DateTime<Utc>,
    },
    OrphanRepaired {
        session: Session,
        recorded_at: DateTime<Utc>,
    },
    InteractionShown {
        event: InteractionEvent,
    },
    InteractionCompleted {
        id: InteractionId,
        action: UserAction,
        responded_at: DateTime<Utc>,
    },
    ItemLoggedAfter {
        session_id: SessionId,
        recorded_at: DateTime<Utc>,
    },
}

pub trait AnalyticsRecorder: Send + Sync {
    fn record(&self, record: &AnalyticsRecord) -> Result<(), AnalyticsError>;

    /// Every record, oldest first.
    fn records(&self) -> Result<Vec<AnalyticsRecord>, AnalyticsError>;
}

/// Records as JSON lines in a single file.
#[derive(Debug, Clone)]
pub struct JsonlRecorder {
    path: PathBuf,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> AnalyticsError {
        AnalyticsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl AnalyticsRecorder for JsonlRecorder {
    fn record(&self, record: &AnalyticsRecord) -> Result<(), AnalyticsError> {
        let mut line =
            serde_json::to_string(record).map_err(|e| AnalyticsError::Encode(e.to_string()))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        file.write_all(line.as_bytes()).map_err(|e| self.io_err(e))
    }

    fn records(&self) -> Result<Vec<AnalyticsRecord>, AnalyticsError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.io_err(e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(line = index + 1, error = %e, "Skipping malformed analytics record")
                }
            }
        }
        Ok(records)
    }
}

/// In-memory recorder. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    records: Arc<Mutex<Vec<AnalyticsRecord>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnalyticsRecorder for MemoryRecorder {
    fn record(&self, record: &AnalyticsRecord) -> Result<(), AnalyticsError> {
        self.records
            .lock()
            .map_err(|_| AnalyticsError::Unavailable)?
            .push(record.clone());
        Ok(())
    }

    fn records(&self) -> Result<Vec<AnalyticsRecord>, AnalyticsError> {
        Ok(self
            .records
            .lock()
            .map_err(|_| AnalyticsError::Unavailable)?
            .clone())
    }
}

// ============================================================================
// Folding
// ============================================================================

/// Rebuilds interaction events from shown/completed record pairs.
///
/// A completion for an unknown id is ignored, as is any completion after
/// the first for the same id.
pub fn fold_interactions(records: &[AnalyticsRecord]) -> Vec<InteractionEvent> {
    let mut order = Vec::new();
    let mut events: HashMap<InteractionId, InteractionEvent> = HashMap::new();

    for record in records {
        match record {
            AnalyticsRecord::InteractionShown { event } => {
                if !events.contains_key(&event.id) {
                    order.push(event.id.clone());
                    events.insert(event.id.clone(), event.clone());
                }
            }
            AnalyticsRecord::InteractionCompleted {
                id,
                action,
                responded_at,
            } => {
                if let Some(event) = events.get_mut(id) {
                    let _ = event.complete(*action, *responded_at);
                }
            }
            _ => {}
        }
    }

    order
        .into_iter()
        .filter_map(|id| events.remove(&id))
        .collect()
}

/// Counts post-pause item records.
pub fn count_items_after(records: &[AnalyticsRecord]) -> u32 {
    records
        .iter()
        .filter(|r| matches!(r, AnalyticsRecord::ItemLoggedAfter { .. }))
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_jsonl_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonlRecorder::new(dir.path().join("analytics.jsonl"));
        assert!(recorder.records().unwrap().is_empty());

        let now = Utc::now();
        let mut session = Session::new("ShopApp", now, Duration::minutes(5));
        session.close(now + Duration::minutes(5), None);

        recorder
            .record(&AnalyticsRecord::SessionClosed {
                session: session.clone(),
                trigger: Trigger::TimerExpired,
                recorded_at: now,
            })
            .unwrap();
        recorder
            .record(&AnalyticsRecord::ItemLoggedAfter {
                session_id: session.id.clone(),
                recorded_at: now,
            })
            .unwrap();

        let records = recorder.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(count_items_after(&records), 1);
    }

    #[test]
    fn test_jsonl_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.jsonl");
        let recorder = JsonlRecorder::new(&path);

        recorder
            .record(&AnalyticsRecord::ItemLoggedAfter {
                session_id: SessionId::new("abc"),
                recorded_at: Utc::now(),
            })
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{garbage").unwrap();

        assert_eq!(recorder.records().unwrap().len(), 1);
    }

    #[test]
    fn test_fold_interactions_first_completion_wins() {
        let now = Utc::now();
        let event = InteractionEvent::shown("ShopApp", 3, now);
        let id = event.id.clone();

        let records = vec![
            AnalyticsRecord::InteractionShown { event },
            AnalyticsRecord::InteractionCompleted {
                id: id.clone(),
                action: UserAction::KeptBlocked,
                responded_at: now + Duration::seconds(2),
            },
            AnalyticsRecord::InteractionCompleted {
                id: id.clone(),
                action: UserAction::RequestedPause,
                responded_at: now + Duration::seconds(9),
            },
            AnalyticsRecord::InteractionCompleted {
                id: InteractionId::new("unknown"),
                action: UserAction::Dismissed,
                responded_at: now,
            },
        ];

        let events = fold_interactions(&records);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, UserAction::KeptBlocked);
        assert_eq!(events[0].response_duration_ms(), Some(2000));
    }
}
