//! Cascade Scheduler - hsync from an originating cast across the peer graph
//!
//! Work is a queue of (cast, identity) obligations. Each obligation syncs the
//! document in that cast against every peer it lists; with cascade on, each
//! peer's own obligation is queued next. A visited set keeps every obligation
//! to one execution per run, so cycles in the peer graph terminate. An edge
//! back to a cast whose obligation already ran is not synced again.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::Path;

use castcore::{DocId, IndexOptions, Registry};
use tracing::{debug, info, warn};

use crate::baseline::PeerKey;
use crate::cast::{Cast, CastSet};
use crate::engine::{EdgeContext, Variant, sync_edge};
use crate::error::Result;
use crate::report::{EdgeOutcome, EdgeStatus, SyncReport};
use crate::resolver::ConflictResolver;

/// Knobs for one hsync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Only this document (vault-relative path or cast-id)
    pub file: Option<String>,
    /// Only these peers of the originating cast
    pub peers: Vec<String>,
    /// Follow peers of peers
    pub cascade: bool,
    /// Classify and report without writing anything
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            file: None,
            peers: Vec::new(),
            cascade: true,
            dry_run: false,
        }
    }
}

impl SyncOptions {
    fn allows_peer(&self, name: &str) -> bool {
        self.peers.is_empty() || self.peers.iter().any(|p| p == name)
    }
}

/// Run hsync starting at the cast rooted at `origin_root`
///
/// Only a failure to load the originating cast is an `Err`; edge failures are
/// recorded in the report and the run carries on.
pub fn hsync(
    origin_root: &Path,
    registry: Registry,
    options: &SyncOptions,
    resolver: &mut dyn ConflictResolver,
) -> Result<SyncReport> {
    let index_options = IndexOptions {
        fixup: !options.dry_run,
        filter: options.file.clone(),
    };
    let origin = Cast::open(origin_root, &index_options)?;
    let mut report = SyncReport::new(origin.name.clone(), options.dry_run);
    report.notes.extend(origin.index.issues.iter().map(ToString::to_string));

    let seeds = seed_ids(&origin, options);
    info!(cast = %origin.name, documents = seeds.len(), cascade = options.cascade, dry_run = options.dry_run, "Starting hsync");

    let mut set = CastSet::new(registry, origin);
    let mut ctx = EdgeContext {
        resolver,
        dry_run: options.dry_run,
        variant: Variant::Hsync,
    };

    let mut queue: VecDeque<(usize, DocId)> = seeds.into_iter().map(|id| (0, id)).collect();
    let mut visited: HashSet<(usize, DocId)> = HashSet::new();

    while let Some((slot, id)) = queue.pop_front() {
        if !visited.insert((slot, id.clone())) {
            continue;
        }
        let cast_name = set.get(slot).name.clone();
        for peer_name in peers_of(set.get(slot), &id) {
            if peer_name == cast_name {
                debug!(%id, cast = %cast_name, "Ignoring self edge");
                continue;
            }
            if slot == 0 && !options.allows_peer(&peer_name) {
                debug!(%id, peer = %peer_name, "Peer filtered out");
                continue;
            }

            let peer_slot = match set.resolve(&peer_name) {
                Ok(peer_slot) => peer_slot,
                Err(reason) => {
                    warn!(%id, cast = %cast_name, peer = %peer_name, %reason, "Skipping edge");
                    report.record(EdgeOutcome {
                        id: id.to_string(),
                        cast: cast_name.clone(),
                        peer: peer_name.clone(),
                        path: set.get(slot).index.get(&id).map(|d| d.relpath.clone()),
                        action: None,
                        status: EdgeStatus::Skipped { reason },
                    });
                    continue;
                }
            };

            if visited.contains(&(peer_slot, id.clone())) {
                debug!(%id, cast = %cast_name, peer = %peer_name, "Pair already synced this run");
                continue;
            }

            run_edge(&mut set, slot, peer_slot, &id, &mut ctx, &mut report);

            if options.cascade {
                queue.push_back((peer_slot, id.clone()));
            }
        }

        if !options.dry_run {
            flush_all(&mut set, &mut report);
        }
    }

    let counts = report.counts();
    info!(
        cast = %report.origin,
        synced = counts.synced,
        conflicts = counts.conflicts,
        skipped = counts.skipped,
        failed = counts.failed,
        "Finished hsync"
    );
    Ok(report)
}

/// Identities the origin starts from: its indexed documents plus documents it
/// shares a baseline with but no longer has
fn seed_ids(origin: &Cast, options: &SyncOptions) -> Vec<DocId> {
    let mut seeds = origin.index.ids();
    let gone = origin
        .baselines
        .state()
        .cast_peer_ids()
        .into_iter()
        .filter(|id| !origin.index.contains(id))
        .filter(|id| options.file.as_deref().is_none_or(|f| f == id.as_str()));
    seeds.extend(gone);
    seeds
}

/// Peers a cast syncs `id` with: its membership list, or the baselines it
/// still holds once the document is gone
fn peers_of(cast: &Cast, id: &DocId) -> Vec<String> {
    match cast.index.get(id) {
        Some(doc) => doc.peers.iter().map(|p| p.name.clone()).collect(),
        None => {
            let names: BTreeSet<String> = cast
                .baselines
                .state()
                .peers_of(id)
                .into_iter()
                .filter_map(|key| match key {
                    PeerKey::Cast(name) => Some(name),
                    PeerKey::Codebase(_) => None,
                })
                .collect();
            names.into_iter().collect()
        }
    }
}

fn run_edge(set: &mut CastSet, slot: usize, peer_slot: usize, id: &DocId, ctx: &mut EdgeContext<'_>, report: &mut SyncReport) {
    let Some((local, peer)) = set.pair_mut(slot, peer_slot) else {
        return;
    };
    let cast = local.name.clone();
    let peer_name = peer.name.clone();
    let path = local.index.get(id).map(|d| d.relpath.clone());

    let mut local_end = local.endpoint();
    let mut peer_end = peer.endpoint();
    if let Err(e) = sync_edge(&mut local_end, &mut peer_end, id, ctx, report) {
        warn!(%id, %cast, peer = %peer_name, error = %e, "Edge failed");
        report.record(EdgeOutcome {
            id: id.to_string(),
            cast,
            peer: peer_name,
            path,
            action: None,
            status: EdgeStatus::Failed { error: e.to_string() },
        });
    }
}

fn flush_all(set: &mut CastSet, report: &mut SyncReport) {
    for cast in set.casts_mut() {
        if let Err(e) = cast.baselines.flush() {
            warn!(cast = %cast.name, error = %e, "Failed to write sync state");
            report.notes.push(format!("{}: failed to write sync state: {}", cast.name, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_filter() {
        let all = SyncOptions::default();
        assert!(all.allows_peer("Beta"));

        let only = SyncOptions {
            peers: vec!["Beta".into()],
            ..Default::default()
        };
        assert!(only.allows_peer("Beta"));
        assert!(!only.allows_peer("Gamma"));
        assert!(only.cascade);
    }
}
