//! Merge Engine - three-way classification of one (document, peer) edge
//!
//! Pure: takes the local, peer and baseline states of a document and decides
//! what has to happen. Nothing here touches the filesystem.

use std::fmt;

use castcore::PeerMode;
use serde::Serialize;

/// Digest and path of one side (or of the baseline)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocState<'a> {
    pub digest: &'a str,
    pub path: &'a str,
}

impl<'a> DocState<'a> {
    pub fn new(digest: &'a str, path: &'a str) -> Self {
        Self { digest, path }
    }
}

/// Everything the classifier needs to know about an edge
#[derive(Debug, Clone, Copy)]
pub struct EdgeView<'a> {
    pub local: Option<DocState<'a>>,
    pub peer: Option<DocState<'a>>,
    pub baseline: Option<DocState<'a>>,
    /// Path the peer recorded for its own copy, when the peer keeps baselines
    pub peer_base_path: Option<&'a str>,
    /// Mode the local document declares for the peer; watch forbids writing the peer
    pub edge: PeerMode,
    /// Watch if either side watches; watch pairs never propagate deletions
    pub pair: PeerMode,
    /// Pull documents that exist only at the peer and were never synced
    pub pull_new: bool,
}

/// Which side of a conflict changed how
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Both exist with different content and there is no baseline
    FirstContact,
    /// Both changed since the baseline, to different content
    BothChanged,
    /// Local edited while the peer deleted
    LocalChangedPeerDeleted,
    /// Local deleted while the peer edited
    LocalDeletedPeerChanged,
}

/// Side of an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Peer,
}

/// Outcome of classifying an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Nothing to do
    InSync,
    /// Contents agree; only the baseline needs recording
    RecordBaseline,
    /// Local ahead: write local content to the peer
    Push,
    /// Local only, never synced: create it at the peer
    CreatePeer,
    /// Peer ahead: write peer content locally
    Pull,
    /// Peer only, never synced: create it locally
    CreateLocal,
    /// Same content, peer path follows local
    RenamePeer,
    /// Same content, local path follows peer
    RenameLocal,
    /// Peer deleted, local unchanged
    DeleteLocal,
    /// Local deleted, peer unchanged
    DeletePeer,
    /// Deletion on `deleted` side is not propagated; baseline cleared
    SuppressDeletion { deleted: Side },
    /// Both gone; baseline cleared
    ClearBaseline,
    Conflict(ConflictKind),
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InSync => write!(f, "in sync"),
            Self::RecordBaseline => write!(f, "record baseline"),
            Self::Push => write!(f, "push"),
            Self::CreatePeer => write!(f, "create at peer"),
            Self::Pull => write!(f, "pull"),
            Self::CreateLocal => write!(f, "create locally"),
            Self::RenamePeer => write!(f, "rename at peer"),
            Self::RenameLocal => write!(f, "rename locally"),
            Self::DeleteLocal => write!(f, "delete locally"),
            Self::DeletePeer => write!(f, "delete at peer"),
            Self::SuppressDeletion { deleted: Side::Local } => write!(f, "keep peer copy (watch)"),
            Self::SuppressDeletion { deleted: Side::Peer } => write!(f, "keep local copy (watch)"),
            Self::ClearBaseline => write!(f, "clear baseline"),
            Self::Conflict(_) => write!(f, "conflict"),
        }
    }
}

/// Classify one edge
pub fn classify(view: &EdgeView<'_>) -> Classification {
    let live_pair = view.pair.is_live();

    match (view.local, view.peer, view.baseline) {
        (None, None, Some(_)) => Classification::ClearBaseline,
        (None, None, None) => Classification::InSync,

        (Some(_), None, None) => {
            if view.edge.is_live() {
                Classification::CreatePeer
            } else {
                Classification::InSync
            }
        }
        (Some(local), None, Some(base)) => {
            if !live_pair {
                Classification::SuppressDeletion { deleted: Side::Peer }
            } else if local.digest == base.digest {
                Classification::DeleteLocal
            } else {
                Classification::Conflict(ConflictKind::LocalChangedPeerDeleted)
            }
        }

        (None, Some(_), None) => {
            if view.pull_new {
                Classification::CreateLocal
            } else {
                Classification::InSync
            }
        }
        (None, Some(peer), Some(base)) => {
            if !live_pair {
                Classification::SuppressDeletion { deleted: Side::Local }
            } else if peer.digest == base.digest {
                Classification::DeletePeer
            } else {
                Classification::Conflict(ConflictKind::LocalDeletedPeerChanged)
            }
        }

        (Some(local), Some(peer), None) => {
            if local.digest != peer.digest {
                Classification::Conflict(ConflictKind::FirstContact)
            } else if local.path != peer.path {
                rename(view, local, peer, None).unwrap_or(Classification::RecordBaseline)
            } else {
                Classification::RecordBaseline
            }
        }
        (Some(local), Some(peer), Some(base)) => {
            let local_changed = local.digest != base.digest;
            let peer_changed = peer.digest != base.digest;
            match (local_changed, peer_changed) {
                (true, false) if view.edge.is_live() => Classification::Push,
                (true, false) => Classification::InSync,
                (false, true) => Classification::Pull,
                (true, true) if local.digest != peer.digest => Classification::Conflict(ConflictKind::BothChanged),
                (changed, _) => {
                    let moved = if local.path != peer.path {
                        rename(view, local, peer, Some(base))
                    } else {
                        None
                    };
                    match moved {
                        Some(action) => action,
                        None if changed || base.path != local.path => Classification::RecordBaseline,
                        None => Classification::InSync,
                    }
                }
            }
        }
    }
}

/// Decide which side moves when contents agree but paths differ
///
/// Each side is compared with the path it recorded at the last sync; `None`
/// means neither moved and the paths differ on purpose (a collision). Watch
/// edges always follow the peer; live edges always move the peer to the local
/// path.
fn rename(
    view: &EdgeView<'_>,
    local: DocState<'_>,
    peer: DocState<'_>,
    base: Option<DocState<'_>>,
) -> Option<Classification> {
    let moved = base.map(|b| {
        let peer_base = view.peer_base_path.unwrap_or(b.path);
        (local.path != b.path, peer.path != peer_base)
    });
    match moved {
        Some((false, false)) => None,
        _ if view.edge.is_live() => Some(Classification::RenamePeer),
        _ => Some(Classification::RenameLocal),
    }
}

/// Path the peer copy should end up at after a push
pub fn push_target<'a>(view: &EdgeView<'a>) -> Option<&'a str> {
    let local = view.local?;
    match (view.peer, view.baseline) {
        (Some(peer), Some(base)) if local.path == base.path => Some(peer.path),
        _ => Some(local.path),
    }
}

/// Path the local copy should end up at after a pull
///
/// The local copy follows the peer's path only when the peer moved since the
/// last sync and local did not.
pub fn pull_target<'a>(view: &EdgeView<'a>) -> Option<&'a str> {
    let peer = view.peer?;
    match (view.local, view.baseline) {
        (Some(local), Some(base)) => {
            let peer_moved = peer.path != view.peer_base_path.unwrap_or(base.path);
            if local.path == base.path && peer_moved {
                Some(peer.path)
            } else {
                Some(local.path)
            }
        }
        _ => Some(peer.path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: &str = "digest-a";
    const B: &str = "digest-b";
    const C: &str = "digest-c";

    fn view<'a>(
        local: Option<(&'a str, &'a str)>,
        peer: Option<(&'a str, &'a str)>,
        base: Option<(&'a str, &'a str)>,
    ) -> EdgeView<'a> {
        EdgeView {
            local: local.map(|(d, p)| DocState::new(d, p)),
            peer: peer.map(|(d, p)| DocState::new(d, p)),
            baseline: base.map(|(d, p)| DocState::new(d, p)),
            peer_base_path: None,
            edge: PeerMode::Live,
            pair: PeerMode::Live,
            pull_new: false,
        }
    }

    fn watch(mut v: EdgeView<'_>) -> EdgeView<'_> {
        v.edge = PeerMode::Watch;
        v.pair = PeerMode::Watch;
        v
    }

    #[test]
    fn test_three_way_table() {
        let p = "a.md";
        assert_eq!(classify(&view(Some((A, p)), Some((A, p)), Some((A, p)))), Classification::InSync);
        assert_eq!(classify(&view(Some((B, p)), Some((A, p)), Some((A, p)))), Classification::Push);
        assert_eq!(classify(&view(Some((A, p)), Some((B, p)), Some((A, p)))), Classification::Pull);
        assert_eq!(
            classify(&view(Some((B, p)), Some((B, p)), Some((A, p)))),
            Classification::RecordBaseline
        );
        assert_eq!(
            classify(&view(Some((B, p)), Some((C, p)), Some((A, p)))),
            Classification::Conflict(ConflictKind::BothChanged)
        );
        assert_eq!(classify(&view(None, Some((A, p)), Some((A, p)))), Classification::DeletePeer);
        assert_eq!(classify(&view(Some((A, p)), None, Some((A, p)))), Classification::DeleteLocal);
        assert_eq!(classify(&view(None, None, Some((A, p)))), Classification::ClearBaseline);
    }

    #[test]
    fn test_first_contact() {
        let p = "a.md";
        assert_eq!(classify(&view(Some((A, p)), None, None)), Classification::CreatePeer);
        assert_eq!(classify(&view(Some((A, p)), Some((A, p)), None)), Classification::RecordBaseline);
        assert_eq!(
            classify(&view(Some((A, p)), Some((B, p)), None)),
            Classification::Conflict(ConflictKind::FirstContact)
        );
        assert_eq!(classify(&view(None, Some((A, p)), None)), Classification::InSync);

        let mut pulled = view(None, Some((A, p)), None);
        pulled.pull_new = true;
        assert_eq!(classify(&pulled), Classification::CreateLocal);
    }

    #[test]
    fn test_deletion_against_edits_conflicts_on_live_pairs() {
        let p = "a.md";
        assert_eq!(
            classify(&view(Some((B, p)), None, Some((A, p)))),
            Classification::Conflict(ConflictKind::LocalChangedPeerDeleted)
        );
        assert_eq!(
            classify(&view(None, Some((B, p)), Some((A, p)))),
            Classification::Conflict(ConflictKind::LocalDeletedPeerChanged)
        );
    }

    #[test]
    fn test_watch_never_pushes_or_creates() {
        let p = "a.md";
        assert_eq!(classify(&watch(view(Some((B, p)), Some((A, p)), Some((A, p))))), Classification::InSync);
        assert_eq!(classify(&watch(view(Some((A, p)), None, None))), Classification::InSync);
        assert_eq!(classify(&watch(view(Some((A, p)), Some((B, p)), Some((A, p))))), Classification::Pull);
    }

    #[test]
    fn test_watch_pair_suppresses_deletion_when_only_peer_watches() {
        let p = "a.md";
        let mut v = view(Some((A, p)), None, Some((A, p)));
        v.pair = PeerMode::Watch;
        assert_eq!(classify(&v), Classification::SuppressDeletion { deleted: Side::Peer });
    }

    #[test]
    fn test_rename_direction() {
        // peer moved away from the baseline path: the live peer is put back
        assert_eq!(
            classify(&view(Some((A, "old.md")), Some((A, "new.md")), Some((A, "old.md")))),
            Classification::RenamePeer
        );
        assert_eq!(
            classify(&watch(view(Some((A, "old.md")), Some((A, "new.md")), Some((A, "old.md"))))),
            Classification::RenameLocal
        );
        // local moved
        assert_eq!(
            classify(&view(Some((A, "new.md")), Some((A, "old.md")), Some((A, "old.md")))),
            Classification::RenamePeer
        );
        // no baseline: live peer follows local, watch local follows peer
        assert_eq!(
            classify(&view(Some((A, "p1.md")), Some((A, "p2.md")), None)),
            Classification::RenamePeer
        );
        assert_eq!(
            classify(&watch(view(Some((A, "p1.md")), Some((A, "p2.md")), None))),
            Classification::RenameLocal
        );
        // a watch edge never moves the peer, even if local moved
        assert_eq!(
            classify(&watch(view(Some((A, "new.md")), Some((A, "old.md")), Some((A, "old.md"))))),
            Classification::RenameLocal
        );
    }

    #[test]
    fn test_paths_kept_apart_by_a_collision_are_left_alone() {
        let mut v = view(Some((A, "note.md")), Some((A, "note (~from Alpha).md")), Some((A, "note.md")));
        v.peer_base_path = Some("note (~from Alpha).md");
        assert_eq!(classify(&v), Classification::InSync);

        v.peer_base_path = Some("elsewhere.md");
        assert_eq!(classify(&v), Classification::RenamePeer);
    }

    #[test]
    fn test_baseline_path_refresh() {
        assert_eq!(
            classify(&view(Some((A, "b.md")), Some((A, "b.md")), Some((A, "a.md")))),
            Classification::RecordBaseline
        );
    }

    #[test]
    fn test_push_and_pull_targets_follow_moves() {
        let moved_local = view(Some((B, "new.md")), Some((A, "old.md")), Some((A, "old.md")));
        assert_eq!(push_target(&moved_local), Some("new.md"));

        let stayed = view(Some((B, "old.md")), Some((A, "peer.md")), Some((A, "old.md")));
        assert_eq!(push_target(&stayed), Some("peer.md"));

        let moved_peer = view(Some((A, "old.md")), Some((B, "new.md")), Some((A, "old.md")));
        assert_eq!(pull_target(&moved_peer), Some("new.md"));

        let moved_local_pull = view(Some((A, "mine.md")), Some((B, "old.md")), Some((A, "old.md")));
        assert_eq!(pull_target(&moved_local_pull), Some("mine.md"));

        let fresh = view(None, Some((B, "x.md")), None);
        assert_eq!(pull_target(&fresh), Some("x.md"));

        let mut kept_apart = view(Some((A, "same.md")), Some((B, "same (~from Alpha).md")), Some((A, "same.md")));
        kept_apart.peer_base_path = Some("same (~from Alpha).md");
        assert_eq!(pull_target(&kept_apart), Some("same.md"));
    }

    fn digest() -> impl Strategy<Value = Option<&'static str>> {
        prop_oneof![Just(None), Just(Some(A)), Just(Some(B)), Just(Some(C))]
    }

    proptest! {
        #[test]
        fn prop_watch_pairs_never_delete(local in digest(), peer in digest(), base in digest()) {
            let v = watch(EdgeView {
                local: local.map(|d| DocState::new(d, "a.md")),
                peer: peer.map(|d| DocState::new(d, "a.md")),
                baseline: base.map(|d| DocState::new(d, "a.md")),
                peer_base_path: None,
                edge: PeerMode::Watch,
                pair: PeerMode::Watch,
                pull_new: false,
            });
            let c = classify(&v);
            prop_assert!(!matches!(c, Classification::DeleteLocal | Classification::DeletePeer));
            prop_assert!(!matches!(c, Classification::Push | Classification::CreatePeer | Classification::RenamePeer));
        }

        #[test]
        fn prop_unchanged_sides_are_stable(d in prop_oneof![Just(A), Just(B)]) {
            let v = view(Some((d, "a.md")), Some((d, "a.md")), Some((d, "a.md")));
            prop_assert_eq!(classify(&v), Classification::InSync);
        }
    }
}
