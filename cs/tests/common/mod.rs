//! Shared sandbox for integration tests: a temporary registry plus casts

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use castcore::{CastConfig, Registry};
use castsync::{BaselineRecord, BaselineStore, PeerKey};
use tempfile::TempDir;

pub const VAULT: &str = "01 Vault";

pub struct Sandbox {
    pub temp: TempDir,
    pub registry: Registry,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let registry = Registry::empty(temp.path().join("home").join("registry.json"));
        Self { temp, registry }
    }

    /// Create and register a cast named `name`
    pub fn cast(&mut self, name: &str) -> PathBuf {
        let root = self.temp.path().join(name);
        fs::create_dir_all(&root).expect("Failed to create cast root");
        CastConfig::init(&root, name, VAULT).expect("Failed to init cast");
        self.registry.register_cast(&root).expect("Failed to register cast");
        fs::canonicalize(&root).expect("Failed to canonicalize root")
    }

    /// Create a plain directory and register it as codebase `name`
    pub fn codebase(&mut self, name: &str) -> PathBuf {
        let dir = self.temp.path().join(format!("cb-{}", name));
        fs::create_dir_all(&dir).expect("Failed to create codebase dir");
        self.registry.install_codebase(name, &dir).expect("Failed to install codebase")
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }
}

pub fn vault(root: &Path) -> PathBuf {
    root.join(VAULT)
}

/// Text of a tracked document
pub fn note(id: &str, peers: &[&str], body: &str) -> String {
    let mut text = format!("---\ncast-id: {}\ncast-hsync:\n", id);
    for peer in peers {
        text.push_str(&format!("- {}\n", peer));
    }
    text.push_str("cast-version: 1\n---\n");
    text.push_str(body);
    text
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = vault(root).join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write document");
}

pub fn read(root: &Path, rel: &str) -> Option<String> {
    fs::read_to_string(vault(root).join(rel)).ok()
}

pub fn exists(root: &Path, rel: &str) -> bool {
    vault(root).join(rel).exists()
}

pub fn baseline(root: &Path, id: &str, peer: &str) -> Option<BaselineRecord> {
    let store = BaselineStore::load(root).expect("Failed to load sync state");
    store.get(&id.into(), &PeerKey::parse(peer)).cloned()
}

pub fn sidecars(root: &Path) -> Vec<PathBuf> {
    let dir = root.join(".cast").join("conflicts");
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    out.sort();
    out
}
