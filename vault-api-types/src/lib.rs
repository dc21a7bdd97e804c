//! Shared data-model, manifest, and RPC message types for vault-backup.
//!
//! This crate has no I/O of its own; it exists so the catalog, block store,
//! protocol codec, and both binaries agree on one set of nominally-typed
//! payloads instead of passing loosely-typed dictionaries across crate
//! boundaries.

pub mod error;
pub mod manifest;
pub mod model;
pub mod protocol;

pub use error::{RepoError, RepoResult};
pub use manifest::{ChunkerParams, KdfParams, RepositoryManifest};
pub use model::{
    Action, AuditFinding, ChunkHash, ChunkRow, ChunkSpan, FileRow, GcReport, RepoPath, RepoStats,
    VersionChunkRow, VersionRow,
};
