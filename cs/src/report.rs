//! Per-run report: every edge's outcome plus the artifacts created

use std::path::PathBuf;

use serde::Serialize;

use crate::merge::Classification;
use crate::resolver::Resolution;

/// What happened to one (cast, document, peer) edge
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum EdgeStatus {
    /// Nothing needed doing
    InSync,
    /// The classified action was carried out
    Applied,
    /// Dry run: the action would have been carried out
    Planned,
    /// A conflict was settled
    Resolved { resolution: Resolution },
    /// A conflict was left for later
    Unresolved,
    /// The edge could not be attempted
    Skipped { reason: String },
    /// The edge failed part way; other edges continued
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeOutcome {
    pub id: String,
    pub cast: String,
    pub peer: String,
    pub path: Option<String>,
    pub action: Option<Classification>,
    #[serde(flatten)]
    pub status: EdgeStatus,
}

/// Tallies over a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub in_sync: usize,
    pub synced: usize,
    pub planned: usize,
    pub conflicts: usize,
    pub unresolved: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_CONFLICTS: i32 = 3;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub origin: String,
    pub dry_run: bool,
    pub outcomes: Vec<EdgeOutcome>,
    /// Rejected conflict versions written under `.cast/conflicts/`
    pub sidecars: Vec<PathBuf>,
    /// Documents written under a decorated name because their path was taken
    pub collisions: Vec<PathBuf>,
    /// Index fixes and other non-fatal notes
    pub notes: Vec<String>,
}

impl SyncReport {
    pub fn new(origin: impl Into<String>, dry_run: bool) -> Self {
        Self {
            origin: origin.into(),
            dry_run,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: EdgeOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn counts(&self) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for outcome in &self.outcomes {
            match &outcome.status {
                EdgeStatus::InSync => counts.in_sync += 1,
                EdgeStatus::Applied => counts.synced += 1,
                EdgeStatus::Planned => counts.planned += 1,
                EdgeStatus::Resolved { .. } => counts.conflicts += 1,
                EdgeStatus::Unresolved => {
                    counts.conflicts += 1;
                    counts.unresolved += 1;
                }
                EdgeStatus::Skipped { .. } => counts.skipped += 1,
                EdgeStatus::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    /// Outcomes that changed or would change something
    pub fn changes(&self) -> impl Iterator<Item = &EdgeOutcome> {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.status, EdgeStatus::InSync | EdgeStatus::Skipped { .. }))
    }

    pub fn is_clean(&self) -> bool {
        let counts = self.counts();
        counts.failed == 0 && counts.unresolved == 0
    }

    /// 0 clean, 1 any edge failed, 3 conflicts left unresolved
    pub fn exit_code(&self) -> i32 {
        let counts = self.counts();
        if counts.failed > 0 {
            EXIT_ERROR
        } else if counts.unresolved > 0 {
            EXIT_CONFLICTS
        } else {
            EXIT_CLEAN
        }
    }
}
