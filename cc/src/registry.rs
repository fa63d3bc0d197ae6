//! Cast configuration and the machine registry
//!
//! Every cast root carries `.cast/config.yaml` naming the cast and locating its
//! vault. The per-user registry (`$CAST_HOME/registry.json`, default
//! `~/.cast/registry.json`) maps installed casts and codebases so peers can be
//! resolved by name.
//!
//! ```text
//! <root>/
//! ├── .cast/
//! │   ├── config.yaml      # cast-id, cast-name, cast-location
//! │   ├── syncstate.json   # baselines
//! │   ├── sync.log         # JSONL mutation log
//! │   └── conflicts/       # rejected conflict versions
//! └── 01 Vault/            # documents
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::fsutil::atomic_write;

pub const CAST_DIR: &str = ".cast";
pub const CONFIG_FILE: &str = "config.yaml";
pub const REGISTRY_FILE: &str = "registry.json";
pub const DEFAULT_VAULT_LOCATION: &str = "01 Vault";
pub const REGISTRY_VERSION: u32 = 1;

/// Environment variable overriding the registry home
pub const CAST_HOME_ENV: &str = "CAST_HOME";

fn default_vault_location() -> String {
    DEFAULT_VAULT_LOCATION.to_string()
}

fn default_cast_version() -> u32 {
    1
}

/// Contents of `.cast/config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastConfig {
    #[serde(rename = "cast-version", default = "default_cast_version")]
    pub cast_version: u32,

    #[serde(rename = "cast-id")]
    pub cast_id: String,

    #[serde(rename = "cast-name")]
    pub cast_name: String,

    /// Vault directory relative to the root
    #[serde(rename = "cast-location", default = "default_vault_location")]
    pub cast_location: String,
}

impl CastConfig {
    pub fn path(root: &Path) -> PathBuf {
        root.join(CAST_DIR).join(CONFIG_FILE)
    }

    /// Load the config of the cast rooted at `root`
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Err(CoreError::NotInitialized(path));
        }
        let content = fs::read_to_string(&path).map_err(|e| CoreError::io(&path, e))?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| CoreError::Yaml {
            path: path.clone(),
            source,
        })?;
        if config.cast_id.trim().is_empty() {
            return Err(CoreError::MissingField { path, field: "cast-id" });
        }
        if config.cast_name.trim().is_empty() {
            return Err(CoreError::MissingField {
                path,
                field: "cast-name",
            });
        }
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        let content = serde_yaml::to_string(self).map_err(|source| CoreError::Yaml {
            path: path.clone(),
            source,
        })?;
        atomic_write(&path, content.as_bytes())
    }

    /// Create `.cast/config.yaml` and the vault directory under `root`
    pub fn init(root: &Path, name: &str, location: &str) -> Result<Self> {
        let config = Self {
            cast_version: 1,
            cast_id: uuid::Uuid::new_v4().to_string(),
            cast_name: name.to_string(),
            cast_location: location.to_string(),
        };
        config.save(root)?;
        let vault = root.join(location);
        fs::create_dir_all(&vault).map_err(|e| CoreError::io(&vault, e))?;
        info!(name, root = %root.display(), "Initialized cast");
        Ok(config)
    }

    pub fn vault_path(&self, root: &Path) -> PathBuf {
        root.join(&self.cast_location)
    }
}

/// An installed cast as seen through the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastEntry {
    pub cast_id: String,
    pub name: String,
    pub root: PathBuf,
    pub vault_location: String,
}

impl CastEntry {
    pub fn vault_path(&self) -> PathBuf {
        self.root.join(&self.vault_location)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegisteredCast {
    name: String,
    root: PathBuf,
    #[serde(default = "default_vault_location")]
    vault_location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegisteredCodebase {
    /// Directory holding the codebase's cast documents
    path: PathBuf,
}

/// How to pick a cast to uninstall
#[derive(Debug, Clone)]
pub enum CastSelector {
    Id(String),
    Name(String),
    Root(PathBuf),
}

/// Machine registry of installed casts and codebases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default = "default_cast_version")]
    version: u32,

    #[serde(default)]
    updated_at: String,

    /// cast-id -> installed cast
    #[serde(default)]
    casts: BTreeMap<String, RegisteredCast>,

    /// codebase name -> docs directory
    #[serde(default)]
    codebases: BTreeMap<String, RegisteredCodebase>,

    #[serde(skip)]
    path: PathBuf,
}

impl Registry {
    /// Registry home: `$CAST_HOME` or `~/.cast`
    pub fn home_dir() -> Result<PathBuf> {
        if let Ok(home) = std::env::var(CAST_HOME_ENV)
            && !home.trim().is_empty()
        {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir().map(|h| h.join(CAST_DIR)).ok_or(CoreError::NoHomeDir)
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join(REGISTRY_FILE))
    }

    /// An empty registry that will be saved to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            version: REGISTRY_VERSION,
            updated_at: String::new(),
            casts: BTreeMap::new(),
            codebases: BTreeMap::new(),
            path: path.into(),
        }
    }

    /// Load the registry at `path`; a missing file yields an empty registry
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "Registry not found, starting empty");
            return Ok(Self::empty(path));
        }
        let content = fs::read_to_string(&path).map_err(|e| CoreError::io(&path, e))?;
        let mut registry: Self = serde_json::from_str(&content).map_err(|source| CoreError::Json {
            path: path.clone(),
            source,
        })?;
        registry.path = path;
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist atomically
    pub fn save(&mut self) -> Result<()> {
        self.version = REGISTRY_VERSION;
        self.updated_at = chrono::Local::now().format("%Y-%m-%d %H:%M").to_string();
        let content = serde_json::to_string_pretty(self).map_err(|source| CoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        atomic_write(&self.path, content.as_bytes())
    }

    /// Register or refresh the cast rooted at `root` (keyed by its cast-id)
    pub fn register_cast(&mut self, root: &Path) -> Result<CastEntry> {
        let root = fs::canonicalize(root).map_err(|e| CoreError::io(root, e))?;
        let config = CastConfig::load(&root)?;
        self.casts.insert(
            config.cast_id.clone(),
            RegisteredCast {
                name: config.cast_name.clone(),
                root: root.clone(),
                vault_location: config.cast_location.clone(),
            },
        );
        info!(name = %config.cast_name, root = %root.display(), "Registered cast");
        Ok(CastEntry {
            cast_id: config.cast_id,
            name: config.cast_name,
            root,
            vault_location: config.cast_location,
        })
    }

    /// Remove a cast from the registry, returning it if it was present
    pub fn unregister(&mut self, selector: &CastSelector) -> Option<CastEntry> {
        let target = match selector {
            CastSelector::Id(id) => self.casts.contains_key(id).then(|| id.clone()),
            CastSelector::Name(name) => self
                .casts
                .iter()
                .find(|(_, c)| &c.name == name)
                .map(|(id, _)| id.clone()),
            CastSelector::Root(root) => {
                let root = fs::canonicalize(root).unwrap_or_else(|_| root.clone());
                self.casts.iter().find(|(_, c)| c.root == root).map(|(id, _)| id.clone())
            }
        }?;
        let removed = self.casts.remove(&target)?;
        Some(entry_from(&target, &removed))
    }

    pub fn list_casts(&self) -> Vec<CastEntry> {
        self.casts.iter().map(|(id, c)| entry_from(id, c)).collect()
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<CastEntry> {
        self.casts
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, c)| entry_from(id, c))
    }

    pub fn resolve_by_id(&self, cast_id: &str) -> Option<CastEntry> {
        self.casts.get(cast_id).map(|c| entry_from(cast_id, c))
    }

    /// Register a codebase docs directory under `name`
    pub fn install_codebase(&mut self, name: &str, path: &Path) -> Result<PathBuf> {
        let path = fs::canonicalize(path).map_err(|e| CoreError::io(path, e))?;
        self.codebases
            .insert(name.to_string(), RegisteredCodebase { path: path.clone() });
        info!(name, path = %path.display(), "Registered codebase");
        Ok(path)
    }

    pub fn uninstall_codebase(&mut self, name: &str) -> Option<PathBuf> {
        self.codebases.remove(name).map(|c| c.path)
    }

    pub fn resolve_codebase(&self, name: &str) -> Option<PathBuf> {
        self.codebases.get(name).map(|c| c.path.clone())
    }

    pub fn list_codebases(&self) -> Vec<(String, PathBuf)> {
        self.codebases
            .iter()
            .map(|(name, c)| (name.clone(), c.path.clone()))
            .collect()
    }
}

fn entry_from(cast_id: &str, cast: &RegisteredCast) -> CastEntry {
    CastEntry {
        cast_id: cast_id.to_string(),
        name: cast.name.clone(),
        root: cast.root.clone(),
        vault_location: cast.vault_location.clone(),
    }
}
