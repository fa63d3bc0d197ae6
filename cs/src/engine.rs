//! Edge executor - classifies one (document, peer) edge and applies the result
//!
//! Both sides are seen through an [`Endpoint`]: a vault index, an optional
//! baseline store and a place for conflict sidecars. Cast peers mirror every
//! baseline change into the peer's store; codebase peers have no store of
//! their own.

use std::fs;
use std::path::Path;

use castcore::{CastIndex, DocId, IndexedDoc, PeerMode, RenameSpec, update_links_for_renames};
use tracing::{debug, info, warn};

use crate::baseline::{BaselineRecord, BaselineStore, PeerKey};
use crate::cast::Cast;
use crate::error::Result;
use crate::events::{EventLogger, SyncEvent};
use crate::merge::{Classification, ConflictKind, DocState, EdgeView, Side, classify, pull_target, push_target};
use crate::report::{EdgeOutcome, EdgeStatus, SyncReport};
use crate::resolver::{ConflictCase, ConflictResolver, Resolution};
use crate::writer;

/// Which sync this edge belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Cast to cast; modes come from membership lists
    Hsync,
    /// Cast to codebase; always live, new codebase documents are pulled
    Codebase,
}

/// One side of an edge
pub struct Endpoint<'a> {
    pub name: &'a str,
    /// Key the other side files this endpoint's baselines under
    pub key: PeerKey,
    pub index: &'a mut CastIndex,
    pub baselines: Option<&'a mut BaselineStore>,
    /// Root whose `.cast/conflicts/` receives this side's rejected versions
    pub sidecar_root: &'a Path,
    pub events: Option<&'a EventLogger>,
}

impl Cast {
    pub fn endpoint(&mut self) -> Endpoint<'_> {
        Endpoint {
            name: &self.name,
            key: PeerKey::cast(self.name.clone()),
            index: &mut self.index,
            baselines: Some(&mut self.baselines),
            sidecar_root: &self.root,
            events: Some(&self.events),
        }
    }
}

impl Endpoint<'_> {
    fn baseline(&self, id: &DocId, peer: &PeerKey) -> Option<&BaselineRecord> {
        self.baselines.as_deref().and_then(|store| store.get(id, peer))
    }

    fn log(&self, event: SyncEvent) {
        if let Some(events) = self.events {
            events.write_event(event);
        }
    }
}

/// Run-wide settings handed to every edge
pub struct EdgeContext<'a> {
    pub resolver: &'a mut dyn ConflictResolver,
    pub dry_run: bool,
    pub variant: Variant,
}

/// Edge and pair modes for a cast-to-cast edge
///
/// The edge mode is what the local document declares for the peer. The pair
/// is watch when either side declares watch; when a side is gone the mode
/// stored with the baseline stands in for it.
pub fn hsync_modes(
    local_name: &str,
    peer_name: &str,
    local: Option<&IndexedDoc>,
    peer: Option<&IndexedDoc>,
    baseline: Option<&BaselineRecord>,
) -> (PeerMode, PeerMode) {
    let declared = local.and_then(|d| d.mode_for(peer_name));
    let reverse = peer.and_then(|d| d.mode_for(local_name));
    let stored = baseline.map(|b| b.mode);

    let edge = declared.or(stored).unwrap_or(PeerMode::Live);
    let side_missing = local.is_none() || peer.is_none();
    let watch = declared == Some(PeerMode::Watch)
        || reverse == Some(PeerMode::Watch)
        || (side_missing && stored == Some(PeerMode::Watch));
    let pair = if watch { PeerMode::Watch } else { PeerMode::Live };
    (edge, pair)
}

/// Classify and apply one edge, recording the outcome in `report`
///
/// An `Err` means the edge failed part way; the caller records it and moves on.
pub fn sync_edge(
    local: &mut Endpoint<'_>,
    peer: &mut Endpoint<'_>,
    id: &DocId,
    ctx: &mut EdgeContext<'_>,
    report: &mut SyncReport,
) -> Result<()> {
    let local_doc = local.index.get(id).cloned();
    let peer_doc = peer.index.get(id).cloned();
    let base = local.baseline(id, &peer.key).cloned();
    let peer_base_path = peer.baseline(id, &local.key).map(|b| b.path.clone());

    let (edge_mode, pair_mode) = match ctx.variant {
        Variant::Codebase => (PeerMode::Live, PeerMode::Live),
        Variant::Hsync => hsync_modes(local.name, peer.name, local_doc.as_ref(), peer_doc.as_ref(), base.as_ref()),
    };

    let view = EdgeView {
        local: local_doc.as_ref().map(|d| DocState::new(&d.digest, &d.relpath)),
        peer: peer_doc.as_ref().map(|d| DocState::new(&d.digest, &d.relpath)),
        baseline: base.as_ref().map(|b| DocState::new(&b.digest, &b.path)),
        peer_base_path: peer_base_path.as_deref(),
        edge: edge_mode,
        pair: pair_mode,
        pull_new: ctx.variant == Variant::Codebase,
    };
    let action = classify(&view);
    debug!(%id, local = local.name, peer = peer.name, ?action, edge = %edge_mode, pair = %pair_mode, "Classified edge");

    let push_to = push_target(&view).map(str::to_string);
    let pull_to = pull_target(&view).map(str::to_string);
    let path = local_doc
        .as_ref()
        .map(|d| d.relpath.clone())
        .or_else(|| peer_doc.as_ref().map(|d| d.relpath.clone()))
        .or_else(|| base.as_ref().map(|b| b.path.clone()));

    let mut outcome = EdgeOutcome {
        id: id.to_string(),
        cast: local.name.to_string(),
        peer: peer.key.to_string(),
        path,
        action: Some(action),
        status: EdgeStatus::InSync,
    };
    if action == Classification::InSync {
        report.record(outcome);
        return Ok(());
    }
    if ctx.dry_run {
        outcome.status = EdgeStatus::Planned;
        report.record(outcome);
        return Ok(());
    }

    let mut edge = Edge {
        local,
        peer,
        id,
        mode: pair_mode,
        report: &mut *report,
    };

    outcome.status = match action {
        Classification::InSync => EdgeStatus::InSync,
        Classification::RecordBaseline => {
            if let (Some(l), Some(p)) = (&local_doc, &peer_doc) {
                edge.record(&l.digest, &l.relpath, &p.relpath);
            }
            EdgeStatus::Applied
        }
        Classification::Push | Classification::CreatePeer => {
            if let (Some(l), Some(target)) = (&local_doc, &push_to) {
                edge.push(l, peer_doc.as_ref(), target)?;
            }
            EdgeStatus::Applied
        }
        Classification::Pull | Classification::CreateLocal => {
            if let (Some(p), Some(target)) = (&peer_doc, &pull_to) {
                edge.pull(p, local_doc.as_ref(), target)?;
            }
            EdgeStatus::Applied
        }
        Classification::RenamePeer => {
            if let (Some(l), Some(p)) = (&local_doc, &peer_doc) {
                edge.rename_peer(l, p)?;
            }
            EdgeStatus::Applied
        }
        Classification::RenameLocal => {
            if let (Some(l), Some(p)) = (&local_doc, &peer_doc) {
                edge.rename_local(l, p)?;
            }
            EdgeStatus::Applied
        }
        Classification::DeleteLocal => {
            if let Some(l) = &local_doc {
                edge.delete_local(l)?;
            }
            edge.clear();
            EdgeStatus::Applied
        }
        Classification::DeletePeer => {
            if let Some(p) = &peer_doc {
                edge.delete_peer(p)?;
            }
            edge.clear();
            EdgeStatus::Applied
        }
        Classification::SuppressDeletion { deleted } => {
            let side = match deleted {
                Side::Local => edge.local.name,
                Side::Peer => edge.peer.name,
            };
            info!(%id, deleted_in = side, "Watch pair, deletion not propagated");
            edge.clear();
            EdgeStatus::Applied
        }
        Classification::ClearBaseline => {
            edge.clear();
            EdgeStatus::Applied
        }
        Classification::Conflict(kind) => {
            let conflict = Conflict {
                kind,
                edge: edge_mode,
                local: local_doc.as_ref(),
                peer: peer_doc.as_ref(),
                push_to: push_to.as_deref(),
                pull_to: pull_to.as_deref(),
            };
            edge.conflict(&conflict, &mut *ctx.resolver)?
        }
    };

    report.record(outcome);
    Ok(())
}

struct Conflict<'c> {
    kind: ConflictKind,
    edge: PeerMode,
    local: Option<&'c IndexedDoc>,
    peer: Option<&'c IndexedDoc>,
    push_to: Option<&'c str>,
    pull_to: Option<&'c str>,
}

struct Edge<'e, 'l, 'p> {
    local: &'e mut Endpoint<'l>,
    peer: &'e mut Endpoint<'p>,
    id: &'e DocId,
    mode: PeerMode,
    report: &'e mut SyncReport,
}

impl Edge<'_, '_, '_> {
    /// Record the agreed digest in both stores, each with its own path
    fn record(&mut self, digest: &str, local_path: &str, peer_path: &str) {
        if let Some(store) = self.local.baselines.as_deref_mut() {
            store.put(self.id, &self.peer.key, BaselineRecord::new(digest, local_path, self.mode));
        }
        if let Some(store) = self.peer.baselines.as_deref_mut() {
            store.put(self.id, &self.local.key, BaselineRecord::new(digest, peer_path, self.mode));
        }
    }

    fn clear(&mut self) {
        let mut cleared = false;
        if let Some(store) = self.local.baselines.as_deref_mut() {
            cleared |= store.clear(self.id, &self.peer.key).is_some();
        }
        if let Some(store) = self.peer.baselines.as_deref_mut() {
            cleared |= store.clear(self.id, &self.local.key).is_some();
        }
        if cleared {
            info!(id = %self.id, local = self.local.name, peer = self.peer.name, "Cleared baseline");
            self.local.log(SyncEvent::BaselineCleared {
                id: self.id.to_string(),
                peer: self.peer.key.to_string(),
            });
        }
    }

    fn push(&mut self, doc: &IndexedDoc, existing: Option<&IndexedDoc>, target: &str) -> Result<()> {
        let dest = transfer(self.peer, self.local.name, doc, existing, target, self.report)?;
        info!(id = %self.id, from = self.local.name, to = self.peer.name, path = %dest, "Pushed document");
        self.local.log(SyncEvent::Push {
            id: self.id.to_string(),
            peer: self.peer.key.to_string(),
            path: dest.clone(),
        });
        if dest != target {
            self.collision(&dest);
        }
        self.record(&doc.digest, &doc.relpath, &dest);
        Ok(())
    }

    fn pull(&mut self, doc: &IndexedDoc, existing: Option<&IndexedDoc>, target: &str) -> Result<()> {
        let dest = transfer(self.local, self.peer.name, doc, existing, target, self.report)?;
        info!(id = %self.id, from = self.peer.name, to = self.local.name, path = %dest, "Pulled document");
        self.local.log(SyncEvent::Pull {
            id: self.id.to_string(),
            peer: self.peer.key.to_string(),
            path: dest.clone(),
        });
        if dest != target {
            self.collision(&dest);
        }
        self.record(&doc.digest, &dest, &doc.relpath);
        Ok(())
    }

    fn collision(&mut self, dest: &str) {
        self.local.log(SyncEvent::Collision {
            id: self.id.to_string(),
            peer: self.peer.key.to_string(),
            path: dest.to_string(),
        });
    }

    /// Move the peer copy to the local path
    fn rename_peer(&mut self, local: &IndexedDoc, peer: &IndexedDoc) -> Result<()> {
        let dest = relocate(self.peer, self.local.name, peer, &local.relpath, self.report)?;
        if dest != peer.relpath {
            self.local.log(SyncEvent::Rename {
                id: self.id.to_string(),
                cast: self.peer.name.to_string(),
                from: peer.relpath.clone(),
                to: dest.clone(),
            });
        }
        self.record(&local.digest, &local.relpath, &dest);
        Ok(())
    }

    /// Move the local copy to the peer path
    fn rename_local(&mut self, local: &IndexedDoc, peer: &IndexedDoc) -> Result<()> {
        let dest = relocate(self.local, self.peer.name, local, &peer.relpath, self.report)?;
        if dest != local.relpath {
            self.local.log(SyncEvent::Rename {
                id: self.id.to_string(),
                cast: self.local.name.to_string(),
                from: local.relpath.clone(),
                to: dest.clone(),
            });
        }
        self.record(&peer.digest, &dest, &peer.relpath);
        Ok(())
    }

    fn delete_local(&mut self, doc: &IndexedDoc) -> Result<()> {
        delete(self.local, doc)?;
        info!(id = %self.id, cast = self.local.name, path = %doc.relpath, "Deleted document");
        self.local.log(SyncEvent::Delete {
            id: self.id.to_string(),
            cast: self.local.name.to_string(),
            path: doc.relpath.clone(),
        });
        Ok(())
    }

    fn delete_peer(&mut self, doc: &IndexedDoc) -> Result<()> {
        delete(self.peer, doc)?;
        info!(id = %self.id, cast = self.peer.name, path = %doc.relpath, "Deleted document");
        self.local.log(SyncEvent::Delete {
            id: self.id.to_string(),
            cast: self.peer.name.to_string(),
            path: doc.relpath.clone(),
        });
        Ok(())
    }

    fn sidecar(&mut self, side: Side, doc: &IndexedDoc) -> Result<()> {
        let (root, label) = match side {
            Side::Local => (self.local.sidecar_root, format!("LOCAL-{}", self.local.name)),
            Side::Peer => (self.peer.sidecar_root, format!("PEER-{}", self.peer.name)),
        };
        let path = writer::write_sidecar(root, writer::stem_of(&doc.relpath), self.id, &label, &doc.content)?;
        self.local.log(SyncEvent::Sidecar {
            id: self.id.to_string(),
            path: path.display().to_string(),
        });
        self.report.sidecars.push(path);
        Ok(())
    }

    /// Copy the peer's version into the peer vault under a fresh identity
    fn fork_peer(&mut self, doc: &IndexedDoc) -> Result<()> {
        let fork_id = DocId::generate();
        let content = writer::fork(&doc.content, &fork_id);
        let suffix = format!("(~conflict {})", self.local.name);
        let dest = writer::decorate(self.peer.index, &doc.relpath, &suffix, &fork_id);
        writer::write(self.peer.index.vault_path(), &dest, &content)?;
        if let Some(forked) = IndexedDoc::from_text(dest.clone(), &content) {
            self.peer.index.upsert(forked);
        }
        info!(id = %self.id, fork = %fork_id, path = %dest, "Kept both versions");
        self.report.sidecars.push(self.peer.index.abs_path(&dest));
        self.local.log(SyncEvent::Sidecar {
            id: fork_id.to_string(),
            path: dest,
        });
        Ok(())
    }

    fn conflict(&mut self, conflict: &Conflict<'_>, resolver: &mut dyn ConflictResolver) -> Result<EdgeStatus> {
        let case = ConflictCase {
            id: self.id,
            kind: conflict.kind,
            local_cast: self.local.name,
            peer_cast: self.peer.name,
            local_path: conflict.local.map(|d| d.relpath.as_str()),
            peer_path: conflict.peer.map(|d| d.relpath.as_str()),
            local: conflict.local.map(|d| d.content.as_str()),
            peer: conflict.peer.map(|d| d.content.as_str()),
            edge: conflict.edge,
        };
        let allowed = case.allowed();
        let mut resolution = resolver.resolve(&case)?;
        if !allowed.contains(&resolution) {
            warn!(id = %self.id, %resolution, "Resolution not allowed on this edge, leaving conflict");
            resolution = Resolution::Skip;
        }
        info!(id = %self.id, local = self.local.name, peer = self.peer.name, kind = ?conflict.kind, %resolution, "Conflict");
        self.local.log(SyncEvent::Conflict {
            id: self.id.to_string(),
            peer: self.peer.key.to_string(),
            resolution: resolution.to_string(),
        });

        match resolution {
            Resolution::Skip => return Ok(EdgeStatus::Unresolved),
            Resolution::KeepLocal => self.keep_local(conflict)?,
            Resolution::KeepPeer => self.keep_peer(conflict)?,
            Resolution::KeepBoth => match conflict.peer {
                Some(peer) if conflict.local.is_some() => {
                    self.fork_peer(peer)?;
                    if let (Some(local), Some(target)) = (conflict.local, conflict.push_to) {
                        self.push(local, Some(peer), target)?;
                    }
                }
                _ => self.keep_local(conflict)?,
            },
        }
        Ok(EdgeStatus::Resolved { resolution })
    }

    fn keep_local(&mut self, conflict: &Conflict<'_>) -> Result<()> {
        if let Some(peer) = conflict.peer {
            self.sidecar(Side::Peer, peer)?;
        }
        match (conflict.local, conflict.push_to) {
            (Some(local), Some(target)) => self.push(local, conflict.peer, target),
            _ => {
                if let Some(peer) = conflict.peer {
                    self.delete_peer(peer)?;
                }
                self.clear();
                Ok(())
            }
        }
    }

    fn keep_peer(&mut self, conflict: &Conflict<'_>) -> Result<()> {
        if let Some(local) = conflict.local {
            self.sidecar(Side::Local, local)?;
        }
        match (conflict.peer, conflict.pull_to) {
            (Some(peer), Some(target)) => self.pull(peer, conflict.local, target),
            _ => {
                if let Some(local) = conflict.local {
                    self.delete_local(local)?;
                }
                self.clear();
                Ok(())
            }
        }
    }
}

/// Write `doc` into `dst` at (a safe variant of) `target`, dropping any copy
/// the document had elsewhere; returns the path written
fn transfer(
    dst: &mut Endpoint<'_>,
    origin: &str,
    doc: &IndexedDoc,
    existing: Option<&IndexedDoc>,
    target: &str,
    report: &mut SyncReport,
) -> Result<String> {
    let dest = writer::safe_path(dst.index, target, &doc.id, origin);
    if dest != target {
        report.collisions.push(dst.index.abs_path(&dest));
    }
    let content = writer::normalized(&doc.content);
    let vault = dst.index.vault_path().to_path_buf();
    writer::write(&vault, &dest, &content)?;

    match IndexedDoc::from_text(dest.clone(), &content) {
        Some(written) => dst.index.upsert(written),
        None => {
            dst.index.remove(&doc.id);
        }
    }
    if let Some(old) = existing
        && old.relpath != dest
    {
        writer::remove(&vault, &old.relpath)?;
        rewrite_links(dst, &old.relpath, &dest)?;
    }
    Ok(dest)
}

/// Move `doc` inside `dst` to (a safe variant of) `target`; returns the final path
fn relocate(
    dst: &mut Endpoint<'_>,
    origin: &str,
    doc: &IndexedDoc,
    target: &str,
    report: &mut SyncReport,
) -> Result<String> {
    let dest = writer::safe_path(dst.index, target, &doc.id, origin);
    if dest == doc.relpath {
        return Ok(dest);
    }
    if dest != target {
        report.collisions.push(dst.index.abs_path(&dest));
    }
    writer::relocate(dst.index.vault_path(), &doc.relpath, &dest)?;
    let mut moved = doc.clone();
    moved.relpath = dest.clone();
    dst.index.upsert(moved);
    info!(id = %doc.id, cast = dst.name, from = %doc.relpath, to = %dest, "Renamed document");
    rewrite_links(dst, &doc.relpath, &dest)?;
    Ok(dest)
}

fn delete(dst: &mut Endpoint<'_>, doc: &IndexedDoc) -> Result<()> {
    writer::remove(dst.index.vault_path(), &doc.relpath)?;
    dst.index.remove(&doc.id);
    Ok(())
}

/// Point links in `dst` at a moved document and refresh the files touched
fn rewrite_links(dst: &mut Endpoint<'_>, from: &str, to: &str) -> Result<()> {
    let vault = dst.index.vault_path().to_path_buf();
    let changed = update_links_for_renames(&vault, &[RenameSpec::new(from, to)], &[to.to_string()])?;
    for (rel, _) in changed.changes {
        let path = dst.index.abs_path(&rel);
        match fs::read_to_string(&path) {
            Ok(text) => {
                if let Some(doc) = IndexedDoc::from_text(rel, &text) {
                    dst.index.upsert(doc);
                }
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Could not re-read rewritten file"),
        }
    }
    Ok(())
}
