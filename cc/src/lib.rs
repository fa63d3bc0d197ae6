//! castcore - document model and vault indexing for cast sync
//!
//! # Modules
//!
//! - [`model`] - document identities and peer/codebase membership
//! - [`frontmatter`] - YAML front matter parsing, migration and rendering
//! - [`digest`] - canonical content fingerprints
//! - [`registry`] - per-cast configuration and the machine registry
//! - [`index`] - per-run in-memory vault index
//! - [`links`] - link rewriting after renames

pub mod digest;
pub mod error;
pub mod frontmatter;
pub mod fsutil;
pub mod index;
pub mod links;
pub mod model;
pub mod registry;

pub use digest::fingerprint;
pub use error::{CoreError, Result};
pub use frontmatter::CastFile;
pub use fsutil::atomic_write;
pub use index::{CastIndex, IndexIssue, IndexOptions, IndexedDoc};
pub use links::{LinkRewriteReport, RenameSpec, update_links_for_renames};
pub use model::{DocId, PeerEntry, PeerMode};
pub use registry::{CastConfig, CastEntry, CastSelector, Registry};
