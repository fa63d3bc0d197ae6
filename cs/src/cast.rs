//! Casts taking part in a run
//!
//! A [`Cast`] bundles what the engine needs for one root: its name, its vault
//! index and its baseline store. [`CastSet`] loads peers lazily by name through
//! the registry, once per run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use castcore::{CastConfig, CastEntry, CastIndex, IndexOptions, Registry};
use tracing::{debug, info, warn};

use crate::baseline::BaselineStore;
use crate::error::Result;
use crate::events::EventLogger;

/// One cast loaded for the current run
#[derive(Debug)]
pub struct Cast {
    pub name: String,
    pub cast_id: String,
    pub root: PathBuf,
    pub index: CastIndex,
    pub baselines: BaselineStore,
    pub events: EventLogger,
}

impl Cast {
    /// Load the cast at `root`, indexing its vault with `options`
    pub fn open(root: &Path, options: &IndexOptions) -> Result<Self> {
        let config = CastConfig::load(root)?;
        let vault = config.vault_path(root);
        let index = CastIndex::build(&vault, options)?;
        let baselines = BaselineStore::load(root)?;
        debug!(name = %config.cast_name, documents = index.len(), "Opened cast");
        Ok(Self {
            name: config.cast_name,
            cast_id: config.cast_id,
            root: root.to_path_buf(),
            index,
            baselines,
            events: EventLogger::for_root(root),
        })
    }

    /// Load a registered cast read-only (no fixup)
    pub fn open_entry(entry: &CastEntry) -> Result<Self> {
        Self::open(&entry.root, &IndexOptions::default())
    }

    pub fn vault(&self) -> &Path {
        self.index.vault_path()
    }
}

/// The originating cast plus every peer loaded so far
#[derive(Debug)]
pub struct CastSet {
    registry: Registry,
    casts: Vec<Cast>,
    by_name: HashMap<String, usize>,
    /// Names that failed to resolve or load, with the reason
    missing: HashMap<String, String>,
}

impl CastSet {
    pub fn new(registry: Registry, origin: Cast) -> Self {
        let mut by_name = HashMap::new();
        by_name.insert(origin.name.clone(), 0);
        Self {
            registry,
            casts: vec![origin],
            by_name,
            missing: HashMap::new(),
        }
    }

    pub fn get(&self, slot: usize) -> &Cast {
        &self.casts[slot]
    }

    /// Slot of cast `name`, loading it on first use; `Err(reason)` if it cannot be used
    pub fn resolve(&mut self, name: &str) -> std::result::Result<usize, String> {
        if let Some(&slot) = self.by_name.get(name) {
            return Ok(slot);
        }
        if let Some(reason) = self.missing.get(name) {
            return Err(reason.clone());
        }

        let loaded = match self.registry.resolve_by_name(name) {
            None => Err("unknown cast".to_string()),
            Some(entry) => Cast::open_entry(&entry).map_err(|e| e.to_string()),
        };
        match loaded {
            Ok(cast) => {
                info!(name, root = %cast.root.display(), "Loaded peer cast");
                let slot = self.casts.len();
                self.casts.push(cast);
                self.by_name.insert(name.to_string(), slot);
                Ok(slot)
            }
            Err(reason) => {
                warn!(name, %reason, "Peer cast unavailable");
                self.missing.insert(name.to_string(), reason.clone());
                Err(reason)
            }
        }
    }

    /// Two distinct casts, mutably
    pub fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut Cast, &mut Cast)> {
        if a == b || a >= self.casts.len() || b >= self.casts.len() {
            return None;
        }
        if a < b {
            let (left, right) = self.casts.split_at_mut(b);
            Some((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.casts.split_at_mut(a);
            Some((&mut right[0], &mut left[b]))
        }
    }

    pub fn casts_mut(&mut self) -> impl Iterator<Item = &mut Cast> {
        self.casts.iter_mut()
    }
}
