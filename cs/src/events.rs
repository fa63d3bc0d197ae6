//! Sync event log - one JSON object per applied mutation
//!
//! Events are appended to `<root>/.cast/sync.log`. The log is informational;
//! failing to append never fails a sync.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use castcore::registry::CAST_DIR;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const LOG_FILE: &str = "sync.log";

/// A mutation applied by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Push { id: String, peer: String, path: String },
    Pull { id: String, peer: String, path: String },
    /// Moved inside `cast`
    Rename { id: String, cast: String, from: String, to: String },
    /// Removed from `cast`
    Delete { id: String, cast: String, path: String },
    BaselineCleared { id: String, peer: String },
    Conflict { id: String, peer: String, resolution: String },
    Sidecar { id: String, path: String },
    Collision { id: String, peer: String, path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SyncEvent,
}

impl EventLogEntry {
    pub fn new(event: SyncEvent) -> Self {
        Self { ts: Utc::now(), event }
    }
}

/// Appends events for one cast
#[derive(Debug, Clone)]
pub struct EventLogger {
    path: PathBuf,
}

impl EventLogger {
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: root.join(CAST_DIR).join(LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event, logging (not returning) failures
    pub fn write_event(&self, event: SyncEvent) {
        if let Err(e) = self.append(&EventLogEntry::new(event)) {
            debug!(path = %self.path.display(), error = %e, "Failed to write sync event");
        }
    }

    fn append(&self, entry: &EventLogEntry) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", json)
    }
}

/// Read back a cast's event log, skipping lines that do not parse
pub fn read_events(root: &Path) -> Vec<EventLogEntry> {
    let path = root.join(CAST_DIR).join(LOG_FILE);
    let Ok(content) = fs::read_to_string(&path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(line, error = %e, "Skipping unparseable sync log line");
                None
            }
        })
        .collect()
}
