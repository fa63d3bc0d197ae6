//! Codebase sync - one cast against one installed codebase docs directory
//!
//! Same edge rules as hsync with a `cb:<name>` baseline key, always-live mode,
//! and no cascade. Codebase documents that lack cast fields are completed on
//! first contact so they take part in ordinary peer sync afterwards.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use castcore::index::{markdown_files, relpath_of};
use castcore::{CastFile, CastIndex, DocId, IndexOptions, IndexedDoc, PeerEntry, Registry, atomic_write};
use serde_yaml::Mapping;
use tracing::{debug, info, warn};

use crate::baseline::PeerKey;
use crate::cascade::SyncOptions;
use crate::cast::Cast;
use crate::engine::{EdgeContext, Endpoint, Variant, sync_edge};
use crate::error::{Result, SyncError};
use crate::report::{EdgeOutcome, EdgeStatus, SyncReport};
use crate::resolver::ConflictResolver;

/// Sync the cast at `root` with codebase `codebase`
pub fn cbsync(
    root: &Path,
    registry: &Registry,
    codebase: &str,
    options: &SyncOptions,
    resolver: &mut dyn ConflictResolver,
) -> Result<SyncReport> {
    let dir = registry
        .resolve_codebase(codebase)
        .ok_or_else(|| SyncError::UnknownCodebase(codebase.to_string()))?;

    let index_options = IndexOptions {
        fixup: !options.dry_run,
        filter: options.file.clone(),
    };
    let mut cast = Cast::open(root, &index_options)?;
    let mut report = SyncReport::new(cast.name.clone(), options.dry_run);
    report.notes.extend(cast.index.issues.iter().map(ToString::to_string));

    let mut cb_index = codebase_index(&dir, &cast.name, codebase, options)?;
    report.notes.extend(cb_index.issues.iter().map(ToString::to_string));

    let key = PeerKey::codebase(codebase);
    let mut ids: BTreeSet<DocId> = cast.index.docs().filter(|d| d.in_codebase(codebase)).map(|d| d.id.clone()).collect();
    ids.extend(cb_index.ids());
    if options.file.is_none() {
        ids.extend(cast.baselines.state().ids_for(&key));
    }
    info!(cast = %cast.name, codebase, dir = %dir.display(), documents = ids.len(), "Starting cbsync");

    let mut ctx = EdgeContext {
        resolver,
        dry_run: options.dry_run,
        variant: Variant::Codebase,
    };
    let sidecar_root = cast.root.clone();
    let mut local = cast.endpoint();
    let mut peer = Endpoint {
        name: codebase,
        key,
        index: &mut cb_index,
        baselines: None,
        sidecar_root: &sidecar_root,
        events: None,
    };

    for id in &ids {
        let path = local.index.get(id).map(|d| d.relpath.clone());
        if let Err(e) = sync_edge(&mut local, &mut peer, id, &mut ctx, &mut report) {
            warn!(%id, codebase, error = %e, "Edge failed");
            report.record(EdgeOutcome {
                id: id.to_string(),
                cast: local.name.to_string(),
                peer: peer.key.to_string(),
                path,
                action: None,
                status: EdgeStatus::Failed { error: e.to_string() },
            });
        }
    }

    if !options.dry_run {
        cast.baselines.flush()?;
    }
    let counts = report.counts();
    info!(cast = %report.origin, codebase, synced = counts.synced, conflicts = counts.conflicts, failed = counts.failed, "Finished cbsync");
    Ok(report)
}

/// Index a codebase docs directory, completing documents that are missing
/// identity, version, membership or the codebase tag
fn codebase_index(dir: &Path, cast_name: &str, codebase: &str, options: &SyncOptions) -> Result<CastIndex> {
    let mut index = CastIndex::empty(dir);
    if !dir.exists() {
        debug!(dir = %dir.display(), "Codebase directory missing, empty index");
        return Ok(index);
    }

    for path in markdown_files(dir)? {
        let relpath = relpath_of(dir, &path);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable codebase file");
                continue;
            }
        };

        let mut file = CastFile::parse(&text).unwrap_or_else(|| CastFile {
            front_matter: Mapping::new(),
            body: text.clone(),
        });
        let mut changed = complete(&mut file, cast_name, codebase);
        if let Some(id) = file.id()
            && index.contains(&id)
        {
            let fresh = DocId::generate();
            warn!(%relpath, old = %id, new = %fresh, "Duplicate cast-id in codebase, assigning a fresh one");
            file.set_id(&fresh);
            changed = true;
        }
        if let Some(filter) = &options.file
            && &relpath != filter
            && file.id().is_none_or(|id| id.as_str() != filter)
        {
            continue;
        }

        let content = if changed {
            let rendered = file.render();
            if !options.dry_run {
                atomic_write(&path, rendered.as_bytes())?;
                info!(%relpath, codebase, "Completed codebase document front matter");
            }
            rendered
        } else {
            text
        };
        if let Some(doc) = IndexedDoc::from_text(relpath, &content) {
            index.upsert(doc);
        }
    }
    Ok(index)
}

/// Fill in whatever a codebase document needs to take part in sync; returns
/// true if anything changed
fn complete(file: &mut CastFile, cast_name: &str, codebase: &str) -> bool {
    let mut changed = file.migrate();
    if file.id().is_none() {
        file.set_id(&DocId::generate());
        changed = true;
    }
    if file.version().is_none() {
        file.set_version(1);
        changed = true;
    }
    if file.membership().is_empty() {
        file.set_membership(&[PeerEntry::live(cast_name)]);
        changed = true;
    }
    let mut codebases = file.codebases();
    if !codebases.iter().any(|c| c == codebase) {
        codebases.push(codebase.to_string());
        file.set_codebases(&codebases);
        changed = true;
    }
    changed | file.normalize_lists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_fills_missing_fields() {
        let mut file = CastFile::parse("---\ntitle: Api\n---\nbody\n").unwrap();
        assert!(complete(&mut file, "Alpha", "backend"));
        assert!(file.id().is_some());
        assert_eq!(file.version(), Some(1));
        assert_eq!(file.membership(), vec![PeerEntry::live("Alpha")]);
        assert_eq!(file.codebases(), vec!["backend".to_string()]);

        assert!(!complete(&mut file, "Alpha", "backend"));
    }

    #[test]
    fn test_complete_keeps_existing_membership() {
        let text = "---\ncast-id: abc\ncast-version: 4\ncast-hsync:\n- Beta (watch)\ncast-codebases:\n- backend\n---\nbody\n";
        let mut file = CastFile::parse(text).unwrap();
        assert!(!complete(&mut file, "Alpha", "backend"));
        assert_eq!(file.id(), Some(DocId::from("abc")));
        assert_eq!(file.membership(), vec![PeerEntry::watch("Beta")]);
    }
}
