//! Writer - atomic file mutations inside a vault
//!
//! Every content write goes through a temp file and a rename. Paths occupied
//! by a different document are never overwritten; the incoming content lands
//! under a decorated name instead.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use castcore::registry::CAST_DIR;
use castcore::{CastFile, CastIndex, DocId, atomic_write};
use tracing::{debug, info};

use crate::error::{Result, SyncError};

pub const CONFLICTS_DIR: &str = "conflicts";

/// Who currently holds a vault path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupant {
    Free,
    /// The same document identity
    Same,
    /// Another identity, or a file without one
    Other,
}

/// Inspect `rel` in the vault behind `index`
pub fn occupant(index: &CastIndex, rel: &str, id: &DocId) -> Occupant {
    if let Some(doc) = index.get_by_path(rel) {
        return if &doc.id == id { Occupant::Same } else { Occupant::Other };
    }
    let path = index.abs_path(rel);
    if !path.exists() {
        return Occupant::Free;
    }
    let same = fs::read_to_string(&path)
        .ok()
        .and_then(|text| CastFile::parse(&text))
        .and_then(|file| file.id())
        .is_some_and(|existing| &existing == id);
    if same { Occupant::Same } else { Occupant::Other }
}

/// Path to write document `id` at, avoiding documents that already own `rel`
pub fn safe_path(index: &CastIndex, rel: &str, id: &DocId, origin: &str) -> String {
    match occupant(index, rel, id) {
        Occupant::Free | Occupant::Same => rel.to_string(),
        Occupant::Other => {
            let decorated = decorate(index, rel, &format!("(~from {})", origin), id);
            info!(path = rel, to = %decorated, %id, "Path held by another document, writing alongside");
            decorated
        }
    }
}

/// First variant of `rel` carrying `suffix` that is free or already holds `id`:
/// `<stem> <suffix>.md`, then `<stem> <suffix> 2.md`, ...
pub fn decorate(index: &CastIndex, rel: &str, suffix: &str, id: &DocId) -> String {
    let (dir, stem, ext) = split_rel(rel);
    let mut counter = 1;
    loop {
        let name = if counter == 1 {
            format!("{} {}{}", stem, suffix, ext)
        } else {
            format!("{} {} {}{}", stem, suffix, counter, ext)
        };
        let candidate = if dir.is_empty() { name } else { format!("{}/{}", dir, name) };
        if occupant(index, &candidate, id) != Occupant::Other {
            return candidate;
        }
        counter += 1;
    }
}

fn split_rel(rel: &str) -> (&str, &str, &str) {
    let (dir, file) = rel.rsplit_once('/').unwrap_or(("", rel));
    match file.rfind('.') {
        Some(dot) if dot > 0 => (dir, &file[..dot], &file[dot..]),
        _ => (dir, file, ""),
    }
}

/// File stem of a vault-relative path
pub fn stem_of(rel: &str) -> &str {
    split_rel(rel).1
}

/// Content as it should be written: membership lists normalized, bytes
/// otherwise untouched
pub fn normalized(content: &str) -> Cow<'_, str> {
    let Some(mut file) = CastFile::parse(content) else {
        return Cow::Borrowed(content);
    };
    let migrated = file.migrate();
    if file.normalize_lists() || migrated {
        Cow::Owned(file.render())
    } else {
        Cow::Borrowed(content)
    }
}

/// Copy of `content` carrying a fresh identity
pub fn fork(content: &str, id: &DocId) -> String {
    match CastFile::parse(content) {
        Some(mut file) => {
            file.set_id(id);
            file.render()
        }
        None => content.to_string(),
    }
}

pub fn write(vault: &Path, rel: &str, content: &str) -> Result<()> {
    let path = join(vault, rel);
    atomic_write(&path, content.as_bytes())?;
    debug!(path = %path.display(), bytes = content.len(), "Wrote document");
    Ok(())
}

/// Remove a document; already gone is fine
pub fn remove(vault: &Path, rel: &str) -> Result<()> {
    let path = join(vault, rel);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed document");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

/// Move a document within its vault
pub fn relocate(vault: &Path, from: &str, to: &str) -> Result<()> {
    if from == to {
        return Ok(());
    }
    let src = join(vault, from);
    let dest = join(vault, to);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }
    fs::rename(&src, &dest).map_err(|e| SyncError::io(&src, e))?;
    debug!(from, to, "Moved document");
    Ok(())
}

/// Preserve a rejected version under `<root>/.cast/conflicts/`
pub fn write_sidecar(root: &Path, stem: &str, id: &DocId, label: &str, content: &str) -> Result<PathBuf> {
    let dir = root.join(CAST_DIR).join(CONFLICTS_DIR);
    let mut path = dir.join(format!("{}~{}~{}.md", stem, id, label));
    let mut counter = 2;
    while path.exists() {
        path = dir.join(format!("{}~{}~{}~{}.md", stem, id, label, counter));
        counter += 1;
    }
    atomic_write(&path, content.as_bytes())?;
    info!(path = %path.display(), %id, "Wrote conflict sidecar");
    Ok(path)
}

fn join(vault: &Path, rel: &str) -> PathBuf {
    rel.split('/').fold(vault.to_path_buf(), |acc, part| acc.join(part))
}
