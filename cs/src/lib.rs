//! castsync - baseline-tracked three-way sync of Markdown documents across casts
//!
//! A cast is a root directory with a vault of Markdown documents. Documents
//! carry a stable `cast-id` and list the peer casts they are shared with.
//! Every (document, peer) pair has a baseline: the fingerprint and path both
//! sides last agreed on. Comparing each side against that baseline tells a
//! one-sided edit from a true conflict.
//!
//! # Architecture
//!
//! ```text
//! <cast-root>/
//! ├── .cast/
//! │   ├── config.yaml       # cast-id, cast-name, cast-location
//! │   ├── syncstate.json    # baselines, keyed by cast-id then peer
//! │   ├── sync.log          # JSONL mutation log
//! │   ├── sync.lock         # held during a run
//! │   └── conflicts/        # sidecars for rejected versions
//! └── 01 Vault/
//!     └── ... *.md
//! ```
//!
//! # Example
//!
//! ```ignore
//! use castsync::{DefaultResolver, SyncOptions, hsync};
//!
//! let registry = castcore::Registry::load(castcore::Registry::default_path()?)?;
//! let report = hsync(root, registry, &SyncOptions::default(), &mut DefaultResolver)?;
//! std::process::exit(report.exit_code());
//! ```

pub mod baseline;
pub mod cast;
pub mod cascade;
pub mod cbsync;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod merge;
pub mod report;
pub mod resolver;
pub mod writer;

pub use baseline::{BaselineRecord, BaselineStore, CastLock, PeerKey, SyncState};
pub use cascade::{SyncOptions, hsync};
pub use cbsync::cbsync;
pub use error::{Result, SyncError};
pub use merge::{Classification, ConflictKind, classify};
pub use report::{EdgeOutcome, EdgeStatus, SyncReport};
pub use resolver::{
    ConflictCase, ConflictResolver, DefaultResolver, InteractiveResolver, Prompter, Resolution, ScriptedPrompter,
    TerminalPrompter,
};
