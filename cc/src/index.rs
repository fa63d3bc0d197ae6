//! Ephemeral per-run index of a vault
//!
//! The index is rebuilt from disk on every invocation and never cached. Only
//! Markdown files whose front matter carries `cast-*` keys are indexed; hidden
//! directories and in-flight temporary files are skipped.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::digest::fingerprint;
use crate::error::{CoreError, Result};
use crate::frontmatter::CastFile;
use crate::fsutil::{TEMP_PREFIX, atomic_write};
use crate::model::{DocId, PeerEntry};

/// One tracked document
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDoc {
    pub id: DocId,
    /// Vault-relative path with `/` separators
    pub relpath: String,
    pub digest: String,
    pub version: Option<u64>,
    pub peers: Vec<PeerEntry>,
    pub codebases: Vec<String>,
    /// File content exactly as on disk
    pub content: String,
}

impl IndexedDoc {
    /// Build a record from file text; `None` if it is not a tracked cast document
    pub fn from_text(relpath: impl Into<String>, text: &str) -> Option<Self> {
        let mut file = CastFile::parse(text)?;
        if !file.has_cast_fields() {
            return None;
        }
        file.migrate();
        let id = file.id()?;
        Some(Self::from_parts(relpath.into(), id, &file, text.to_string()))
    }

    fn from_parts(relpath: String, id: DocId, file: &CastFile, content: String) -> Self {
        Self {
            id,
            relpath,
            digest: fingerprint(&content),
            version: file.version(),
            peers: file.membership(),
            codebases: file.codebases(),
            content,
        }
    }

    pub fn mode_for(&self, peer: &str) -> Option<crate::model::PeerMode> {
        crate::model::mode_of(&self.peers, peer)
    }

    pub fn in_codebase(&self, name: &str) -> bool {
        self.codebases.iter().any(|c| c == name)
    }
}

/// Problems noticed (and possibly repaired) while indexing
#[derive(Debug, Clone, PartialEq)]
pub enum IndexIssue {
    /// Missing identity assigned during fixup
    Assigned { relpath: String, id: DocId },
    /// Duplicate identity replaced with a fresh one during fixup
    Reassigned { relpath: String, old: DocId, new: DocId },
    /// Duplicate identity left alone; the first path wins
    Duplicate { id: DocId, kept: String, ignored: String },
    /// File could not be read
    Unreadable { relpath: String, error: String },
}

impl fmt::Display for IndexIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assigned { relpath, id } => write!(f, "{}: assigned cast-id {}", relpath, id),
            Self::Reassigned { relpath, old, new } => {
                write!(f, "{}: duplicate cast-id {} replaced with {}", relpath, old, new)
            }
            Self::Duplicate { id, kept, ignored } => {
                write!(f, "{}: duplicate cast-id {} (kept {})", ignored, id, kept)
            }
            Self::Unreadable { relpath, error } => write!(f, "{}: unreadable ({})", relpath, error),
        }
    }
}

/// Options controlling a scan
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Assign identities, fill versions, normalize lists, and write the fixes back
    pub fixup: bool,
    /// Restrict to one document, by vault-relative path or identity
    pub filter: Option<String>,
}

/// In-memory index of one vault
#[derive(Debug, Clone)]
pub struct CastIndex {
    vault: PathBuf,
    by_id: BTreeMap<DocId, IndexedDoc>,
    by_path: HashMap<String, DocId>,
    pub issues: Vec<IndexIssue>,
}

impl CastIndex {
    /// An index with no documents (for vaults that do not exist yet)
    pub fn empty(vault: impl Into<PathBuf>) -> Self {
        Self {
            vault: vault.into(),
            by_id: BTreeMap::new(),
            by_path: HashMap::new(),
            issues: Vec::new(),
        }
    }

    /// Scan `vault` and build an index
    pub fn build(vault: &Path, options: &IndexOptions) -> Result<Self> {
        let mut index = Self::empty(vault);
        if !vault.exists() {
            debug!(vault = %vault.display(), "Vault missing, empty index");
            return Ok(index);
        }

        for path in markdown_files(vault)? {
            let relpath = relpath_of(vault, &path);
            index.ingest(&path, relpath, options)?;
        }

        info!(
            vault = %vault.display(),
            documents = index.by_id.len(),
            issues = index.issues.len(),
            "Indexed vault"
        );
        Ok(index)
    }

    fn ingest(&mut self, path: &Path, relpath: String, options: &IndexOptions) -> Result<()> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                self.issues.push(IndexIssue::Unreadable {
                    relpath,
                    error: e.to_string(),
                });
                return Ok(());
            }
        };

        let Some(mut file) = CastFile::parse(&text) else {
            return Ok(());
        };
        if !file.has_cast_fields() {
            return Ok(());
        }
        let mut dirty = file.migrate();

        if let Some(filter) = &options.filter {
            let id_match = file.id().is_some_and(|id| id.as_str() == filter);
            if !id_match && &relpath != filter {
                return Ok(());
            }
        }

        let id = match (file.id(), options.fixup) {
            (Some(id), true) if self.by_id.contains_key(&id) => {
                let fresh = DocId::generate();
                warn!(%relpath, old = %id, new = %fresh, "Duplicate cast-id, assigning a fresh one");
                self.issues.push(IndexIssue::Reassigned {
                    relpath: relpath.clone(),
                    old: id,
                    new: fresh.clone(),
                });
                file.set_id(&fresh);
                dirty = true;
                fresh
            }
            (Some(id), false) if self.by_id.contains_key(&id) => {
                let kept = self.by_id[&id].relpath.clone();
                warn!(%relpath, %id, %kept, "Duplicate cast-id, ignoring later file");
                self.issues.push(IndexIssue::Duplicate {
                    id,
                    kept,
                    ignored: relpath,
                });
                return Ok(());
            }
            (Some(id), _) => id,
            (None, true) => {
                let fresh = DocId::generate();
                debug!(%relpath, id = %fresh, "Assigning cast-id");
                self.issues.push(IndexIssue::Assigned {
                    relpath: relpath.clone(),
                    id: fresh.clone(),
                });
                file.set_id(&fresh);
                dirty = true;
                fresh
            }
            (None, false) => {
                debug!(%relpath, "No cast-id, not tracked");
                return Ok(());
            }
        };

        let content = if options.fixup {
            if file.version().is_none() {
                file.set_version(1);
                dirty = true;
            }
            dirty |= file.normalize_lists();
            if dirty {
                let rendered = file.render();
                atomic_write(path, rendered.as_bytes())?;
                info!(%relpath, %id, "Wrote front matter fixes");
                rendered
            } else {
                text
            }
        } else {
            text
        };

        self.upsert(IndexedDoc::from_parts(relpath, id, &file, content));
        Ok(())
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault
    }

    /// Absolute path of a vault-relative path
    pub fn abs_path(&self, relpath: &str) -> PathBuf {
        relpath.split('/').fold(self.vault.clone(), |acc, part| acc.join(part))
    }

    pub fn get(&self, id: &DocId) -> Option<&IndexedDoc> {
        self.by_id.get(id)
    }

    pub fn get_by_path(&self, relpath: &str) -> Option<&IndexedDoc> {
        self.by_path.get(relpath).and_then(|id| self.by_id.get(id))
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn docs(&self) -> impl Iterator<Item = &IndexedDoc> {
        self.by_id.values()
    }

    pub fn ids(&self) -> Vec<DocId> {
        self.by_id.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Insert or replace a record, keeping the path table consistent
    pub fn upsert(&mut self, doc: IndexedDoc) {
        if let Some(old) = self.by_id.get(&doc.id)
            && old.relpath != doc.relpath
        {
            self.by_path.remove(&old.relpath);
        }
        self.by_path.insert(doc.relpath.clone(), doc.id.clone());
        self.by_id.insert(doc.id.clone(), doc);
    }

    pub fn remove(&mut self, id: &DocId) -> Option<IndexedDoc> {
        let doc = self.by_id.remove(id)?;
        if self.by_path.get(&doc.relpath) == Some(id) {
            self.by_path.remove(&doc.relpath);
        }
        Some(doc)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|s| s.starts_with('.'))
}

fn is_markdown(path: &Path) -> bool {
    let is_temp = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX));
    !is_temp && path.extension().is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

/// Markdown files under `root` in name order, skipping hidden entries and temp files
pub fn markdown_files(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            CoreError::io(path, std::io::Error::other(e.to_string()))
        })?;
        if entry.file_type().is_file() && is_markdown(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Vault-relative path with `/` separators
pub fn relpath_of(vault: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(vault).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn note(id: Option<&str>, peers: &[&str], body: &str) -> String {
        let mut out = String::from("---\n");
        if let Some(id) = id {
            out.push_str(&format!("cast-id: {}\n", id));
        }
        out.push_str("cast-hsync:\n");
        for p in peers {
            out.push_str(&format!("- {}\n", p));
        }
        out.push_str("cast-version: 1\n---\n");
        out.push_str(body);
        out
    }

    fn write(vault: &Path, rel: &str, text: &str) {
        let path = vault.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_indexes_tracked_documents_only() {
        let temp = TempDir::new().unwrap();
        let vault = temp.path();
        write(vault, "a.md", &note(Some("id-a"), &["Alpha (live)"], "A\n"));
        write(vault, "sub/b.md", &note(Some("id-b"), &["Beta (watch)"], "B\n"));
        write(vault, "plain.md", "# no front matter\n");
        write(vault, "other.md", "---\ntitle: x\n---\nbody\n");
        write(vault, ".obsidian/c.md", &note(Some("id-c"), &[], "C\n"));
        write(vault, "notes.txt", &note(Some("id-d"), &[], "D\n"));

        let index = CastIndex::build(vault, &IndexOptions::default()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get_by_path("sub/b.md").unwrap().id.as_str(), "id-b");
        assert_eq!(index.get(&DocId::from("id-b")).unwrap().peers, vec![PeerEntry::watch("Beta")]);
    }

    #[test]
    fn test_fixup_assigns_identity_and_writes_back() {
        let temp = TempDir::new().unwrap();
        let vault = temp.path();
        write(vault, "new.md", "---\ncast-hsync:\n- Beta (live)\n- Alpha (live)\n---\nfresh\n");

        let without = CastIndex::build(vault, &IndexOptions::default()).unwrap();
        assert!(without.is_empty());

        let index = CastIndex::build(
            vault,
            &IndexOptions {
                fixup: true,
                filter: None,
            },
        )
        .unwrap();
        let doc = index.get_by_path("new.md").unwrap();
        assert_eq!(doc.version, Some(1));
        assert!(matches!(index.issues[0], IndexIssue::Assigned { .. }));

        let on_disk = fs::read_to_string(vault.join("new.md")).unwrap();
        assert_eq!(on_disk, doc.content);
        assert!(on_disk.find("Alpha (live)").unwrap() < on_disk.find("Beta (live)").unwrap());
        assert!(on_disk.contains(doc.id.as_str()));
    }

    #[test]
    fn test_duplicate_identity_handling() {
        let temp = TempDir::new().unwrap();
        let vault = temp.path();
        write(vault, "a.md", &note(Some("same"), &["Alpha (live)"], "A\n"));
        write(vault, "b.md", &note(Some("same"), &["Alpha (live)"], "B\n"));

        let read_only = CastIndex::build(vault, &IndexOptions::default()).unwrap();
        assert_eq!(read_only.len(), 1);
        assert_eq!(read_only.get(&DocId::from("same")).unwrap().relpath, "a.md");
        assert!(matches!(read_only.issues[0], IndexIssue::Duplicate { .. }));

        let fixed = CastIndex::build(
            vault,
            &IndexOptions {
                fixup: true,
                filter: None,
            },
        )
        .unwrap();
        assert_eq!(fixed.len(), 2);
        assert_ne!(fixed.get_by_path("b.md").unwrap().id.as_str(), "same");
    }

    #[test]
    fn test_filter_by_path_and_id() {
        let temp = TempDir::new().unwrap();
        let vault = temp.path();
        write(vault, "a.md", &note(Some("id-a"), &[], "A\n"));
        write(vault, "b.md", &note(Some("id-b"), &[], "B\n"));

        let by_path = CastIndex::build(
            vault,
            &IndexOptions {
                fixup: false,
                filter: Some("b.md".into()),
            },
        )
        .unwrap();
        assert_eq!(by_path.ids(), vec![DocId::from("id-b")]);

        let by_id = CastIndex::build(
            vault,
            &IndexOptions {
                fixup: false,
                filter: Some("id-a".into()),
            },
        )
        .unwrap();
        assert_eq!(by_id.ids(), vec![DocId::from("id-a")]);
    }

    #[test]
    fn test_upsert_moves_path_entry() {
        let temp = TempDir::new().unwrap();
        let vault = temp.path();
        write(vault, "a.md", &note(Some("id-a"), &[], "A\n"));
        let mut index = CastIndex::build(vault, &IndexOptions::default()).unwrap();

        let mut doc = index.get_by_path("a.md").unwrap().clone();
        doc.relpath = "moved/a.md".into();
        index.upsert(doc);
        assert!(index.get_by_path("a.md").is_none());
        assert!(index.get_by_path("moved/a.md").is_some());

        index.remove(&DocId::from("id-a"));
        assert!(index.get_by_path("moved/a.md").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_abs_path_joins_components() {
        let index = CastIndex::empty("/vault");
        assert_eq!(index.abs_path("a/b.md"), PathBuf::from("/vault/a/b.md"));
    }
}
