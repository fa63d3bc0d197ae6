//! Baseline Store - last mutually synchronized state per (document, peer)
//!
//! Each cast keeps its baselines in `<root>/.cast/syncstate.json`:
//!
//! ```text
//! {
//!   "version": 1,
//!   "updated_at": "2025-01-01 10:00",
//!   "baselines": {
//!     "<cast-id>": {
//!       "Beta":       { "digest": "...", "path": "Notes/a.md", "ts": "...", "mode": "live" },
//!       "cb:backend": { "digest": "...", "path": "Notes/a.md", "ts": "...", "mode": "live" }
//!     }
//!   }
//! }
//! ```
//!
//! Ordinary peers are keyed by cast name and codebases by `cb:<name>`, so the
//! two namespaces never collide.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use castcore::registry::CAST_DIR;
use castcore::{DocId, PeerMode, atomic_write};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SyncError};

pub const STATE_FILE: &str = "syncstate.json";
pub const LOCK_FILE: &str = "sync.lock";
pub const STATE_VERSION: u32 = 1;

const CODEBASE_PREFIX: &str = "cb:";

/// Who a baseline is shared with
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerKey {
    Cast(String),
    Codebase(String),
}

impl PeerKey {
    pub fn cast(name: impl Into<String>) -> Self {
        Self::Cast(name.into())
    }

    pub fn codebase(name: impl Into<String>) -> Self {
        Self::Codebase(name.into())
    }

    /// Parse a stored key
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix(CODEBASE_PREFIX) {
            Some(name) => Self::Codebase(name.to_string()),
            None => Self::Cast(key.to_string()),
        }
    }

    pub fn is_codebase(&self) -> bool {
        matches!(self, Self::Codebase(_))
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cast(name) => write!(f, "{}", name),
            Self::Codebase(name) => write!(f, "{}{}", CODEBASE_PREFIX, name),
        }
    }
}

/// Last mutually agreed state of one (document, peer) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub digest: String,

    /// Where the owning cast's copy sat at the time of the sync
    pub path: String,

    #[serde(default)]
    pub ts: String,

    /// Effective mode of the pair; watch if either side watches
    #[serde(default = "default_mode")]
    pub mode: PeerMode,
}

fn default_mode() -> PeerMode {
    PeerMode::Live
}

impl BaselineRecord {
    pub fn new(digest: impl Into<String>, path: impl Into<String>, mode: PeerMode) -> Self {
        Self {
            digest: digest.into(),
            path: path.into(),
            ts: now(),
            mode,
        }
    }
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M").to_string()
}

/// Full baseline set of one cast
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub version: u32,

    #[serde(default)]
    pub updated_at: String,

    /// cast-id -> peer key -> record
    #[serde(default)]
    pub baselines: BTreeMap<String, BTreeMap<String, BaselineRecord>>,
}

impl SyncState {
    pub fn get(&self, id: &DocId, peer: &PeerKey) -> Option<&BaselineRecord> {
        self.baselines.get(id.as_str())?.get(&peer.to_string())
    }

    pub fn put(&mut self, id: &DocId, peer: &PeerKey, record: BaselineRecord) {
        self.baselines
            .entry(id.as_str().to_string())
            .or_default()
            .insert(peer.to_string(), record);
    }

    pub fn clear(&mut self, id: &DocId, peer: &PeerKey) -> Option<BaselineRecord> {
        let peers = self.baselines.get_mut(id.as_str())?;
        let removed = peers.remove(&peer.to_string());
        if peers.is_empty() {
            self.baselines.remove(id.as_str());
        }
        removed
    }

    /// Peers this document has a baseline with
    pub fn peers_of(&self, id: &DocId) -> Vec<PeerKey> {
        self.baselines
            .get(id.as_str())
            .map(|peers| peers.keys().map(|k| PeerKey::parse(k)).collect())
            .unwrap_or_default()
    }

    /// Identities with at least one cast-peer baseline
    pub fn cast_peer_ids(&self) -> Vec<DocId> {
        self.baselines
            .iter()
            .filter(|(_, peers)| peers.keys().any(|k| !PeerKey::parse(k).is_codebase()))
            .map(|(id, _)| DocId::from(id.as_str()))
            .collect()
    }

    /// Identities with a baseline for `peer`
    pub fn ids_for(&self, peer: &PeerKey) -> Vec<DocId> {
        let key = peer.to_string();
        self.baselines
            .iter()
            .filter(|(_, peers)| peers.contains_key(&key))
            .map(|(id, _)| DocId::from(id.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.baselines.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }
}

/// Sync state of one cast, loaded once per run and flushed explicitly
#[derive(Debug)]
pub struct BaselineStore {
    path: PathBuf,
    state: SyncState,
    dirty: bool,
}

impl BaselineStore {
    pub fn state_path(root: &Path) -> PathBuf {
        root.join(CAST_DIR).join(STATE_FILE)
    }

    /// Load the state of the cast rooted at `root`; a missing file is an empty state
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::state_path(root);
        let state = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| SyncError::CorruptState {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SyncState::default(),
            Err(e) => return Err(SyncError::io(&path, e)),
        };
        debug!(path = %path.display(), "Loaded sync state");
        Ok(Self {
            path,
            state,
            dirty: false,
        })
    }

    pub fn get(&self, id: &DocId, peer: &PeerKey) -> Option<&BaselineRecord> {
        self.state.get(id, peer)
    }

    pub fn put(&mut self, id: &DocId, peer: &PeerKey, record: BaselineRecord) {
        if self.state.get(id, peer) != Some(&record) {
            self.state.put(id, peer, record);
            self.dirty = true;
        }
    }

    pub fn clear(&mut self, id: &DocId, peer: &PeerKey) -> Option<BaselineRecord> {
        let removed = self.state.clear(id, peer);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Atomically rewrite the state file if anything changed
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.state.version = STATE_VERSION;
        self.state.updated_at = now();
        let content = serde_json::to_string_pretty(&self.state).map_err(|source| SyncError::CorruptState {
            path: self.path.clone(),
            source,
        })?;
        atomic_write(&self.path, content.as_bytes())?;
        self.dirty = false;
        info!(path = %self.path.display(), records = self.state.len(), "Flushed sync state");
        Ok(())
    }
}

/// Exclusive advisory lock on a cast's state directory, held until dropped
#[derive(Debug)]
pub struct CastLock {
    _file: File,
    path: PathBuf,
}

impl CastLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        let dir = root.join(CAST_DIR);
        fs::create_dir_all(&dir).map_err(|e| SyncError::io(&dir, e))?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| SyncError::io(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| SyncError::Locked(root.to_path_buf()))?;
        debug!(path = %path.display(), "Acquired cast lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(digest: &str) -> BaselineRecord {
        BaselineRecord::new(digest, "Notes/a.md", PeerMode::Live)
    }

    #[test]
    fn test_peer_key_namespaces() {
        assert_eq!(PeerKey::cast("Beta").to_string(), "Beta");
        assert_eq!(PeerKey::codebase("backend").to_string(), "cb:backend");
        assert_eq!(PeerKey::parse("cb:backend"), PeerKey::codebase("backend"));
        assert_eq!(PeerKey::parse("Beta"), PeerKey::cast("Beta"));
    }

    #[test]
    fn test_cast_and_codebase_baselines_are_independent() {
        let mut state = SyncState::default();
        let id = DocId::from("doc");
        state.put(&id, &PeerKey::cast("backend"), record("one"));
        state.put(&id, &PeerKey::codebase("backend"), record("two"));

        assert_eq!(state.get(&id, &PeerKey::cast("backend")).unwrap().digest, "one");
        assert_eq!(state.get(&id, &PeerKey::codebase("backend")).unwrap().digest, "two");

        state.clear(&id, &PeerKey::cast("backend"));
        assert!(state.get(&id, &PeerKey::cast("backend")).is_none());
        assert!(state.cast_peer_ids().is_empty());
        assert_eq!(state.ids_for(&PeerKey::codebase("backend")), vec![id.clone()]);

        state.clear(&id, &PeerKey::codebase("backend"));
        assert!(state.is_empty());
    }

    #[test]
    fn test_store_round_trips_through_disk() {
        let temp = TempDir::new().unwrap();
        let id = DocId::from("doc");

        let mut store = BaselineStore::load(temp.path()).unwrap();
        assert!(store.state().is_empty());
        store.put(&id, &PeerKey::cast("Beta"), record("abc"));
        assert!(store.is_dirty());
        store.flush().unwrap();
        assert!(!store.is_dirty());

        let reloaded = BaselineStore::load(temp.path()).unwrap();
        let rec = reloaded.get(&id, &PeerKey::cast("Beta")).unwrap();
        assert_eq!(rec.digest, "abc");
        assert_eq!(rec.mode, PeerMode::Live);
        assert_eq!(reloaded.state().version, STATE_VERSION);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = BaselineStore::state_path(temp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let err = BaselineStore::load(temp.path()).unwrap_err();
        assert!(matches!(err, SyncError::CorruptState { .. }));
    }

    #[test]
    fn test_missing_mode_defaults_to_live() {
        let json = r#"{"baselines":{"doc":{"Beta":{"digest":"d","path":"a.md"}}}}"#;
        let state: SyncState = serde_json::from_str(json).unwrap();
        let rec = state.get(&DocId::from("doc"), &PeerKey::cast("Beta")).unwrap();
        assert_eq!(rec.mode, PeerMode::Live);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let lock = CastLock::acquire(temp.path()).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(CastLock::acquire(temp.path()), Err(SyncError::Locked(_))));
        drop(lock);
        assert!(CastLock::acquire(temp.path()).is_ok());
    }
}
