//! The RPC message family exchanged between `vault-client` and `vault-agent`.
//!
//! Dynamic ad-hoc dictionaries are deliberately avoided here: every request
//! and response is a nominally-typed, tagged enum variant, so the wire
//! protocol's shape lives entirely in this module rather than scattered
//! `HashMap<String, Value>` payloads.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::RepoError;
use crate::model::{Action, ChunkHash, ChunkSpan, FileRow, GcReport, RepoStats, VersionRow};

/// One-byte opcode prefixed to every frame body, per the wire format in the
/// agent/RPC dispatcher design.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Probe = 1,
    PutChunk = 2,
    GetChunk = 3,
    CommitVersion = 4,
    ListFiles = 5,
    ListVersions = 6,
    Restore = 7,
    DeleteVersion = 8,
    Gc = 9,
    Stats = 10,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            1 => Opcode::Probe,
            2 => Opcode::PutChunk,
            3 => Opcode::GetChunk,
            4 => Opcode::CommitVersion,
            5 => Opcode::ListFiles,
            6 => Opcode::ListVersions,
            7 => Opcode::Restore,
            8 => Opcode::DeleteVersion,
            9 => Opcode::Gc,
            10 => Opcode::Stats,
            _ => return None,
        })
    }
}

/// A sealed record as persisted by the block store:
/// `flags ‖ nonce ‖ ciphertext ‖ tag`.
pub type SealedRecord = Vec<u8>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub hashes: Vec<ChunkHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub present: Vec<ChunkHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutChunkRequest {
    pub hash: ChunkHash,
    pub record: SealedRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChunkRequest {
    pub hash: ChunkHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitVersionRequest {
    pub path: String,
    pub action: Action,
    pub chunks: Vec<ChunkSpan>,
    pub plain_size: u64,
    /// Whether the client sealed at least one contributed chunk with the
    /// GZIP flag (§4.3). Recorded on the Version row for reporting; restore
    /// does not consult it, since decompression is driven per-chunk by the
    /// flag byte each sealed record carries.
    pub is_compressed: bool,
    pub content_hash: Option<ChunkHash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitVersionResponse {
    pub version_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListFilesRequest {
    pub path_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListVersionsRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListVersionsResponse {
    pub versions: Vec<VersionRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub path: String,
    pub version_id: i64,
}

/// One element of the streamed restore response body. `chunk_hash` is the
/// content address the committing client announced for this chunk, carried
/// back so the restoring client can verify the decrypted plaintext against
/// it (§4.8: `put_chunk` "verifies on restore").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreChunk {
    pub sequence: u32,
    pub chunk_hash: ChunkHash,
    pub record: SealedRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteVersionRequest {
    pub version_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcRequest {
    pub retention_days: u32,
    pub dry_run: bool,
}

/// Every request body, tagged by variant so the dispatcher never has to
/// re-derive the opcode from untyped bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    Probe(ProbeRequest),
    PutChunk(PutChunkRequest),
    GetChunk(GetChunkRequest),
    CommitVersion(CommitVersionRequest),
    ListFiles(ListFilesRequest),
    ListVersions(ListVersionsRequest),
    Restore(RestoreRequest),
    DeleteVersion(DeleteVersionRequest),
    Gc(GcRequest),
    Stats,
}

impl RpcRequest {
    pub fn opcode(&self) -> Opcode {
        match self {
            RpcRequest::Probe(_) => Opcode::Probe,
            RpcRequest::PutChunk(_) => Opcode::PutChunk,
            RpcRequest::GetChunk(_) => Opcode::GetChunk,
            RpcRequest::CommitVersion(_) => Opcode::CommitVersion,
            RpcRequest::ListFiles(_) => Opcode::ListFiles,
            RpcRequest::ListVersions(_) => Opcode::ListVersions,
            RpcRequest::Restore(_) => Opcode::Restore,
            RpcRequest::DeleteVersion(_) => Opcode::DeleteVersion,
            RpcRequest::Gc(_) => Opcode::Gc,
            RpcRequest::Stats => Opcode::Stats,
        }
    }

    /// Whether the dispatcher must route this request through the single
    /// writer task (it mutates the catalog or the block store).
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            RpcRequest::PutChunk(_)
                | RpcRequest::CommitVersion(_)
                | RpcRequest::DeleteVersion(_)
                | RpcRequest::Gc(_)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    Probe(ProbeResponse),
    PutChunk,
    GetChunk(SealedRecord),
    CommitVersion(CommitVersionResponse),
    ListFiles(ListFilesResponse),
    ListVersions(ListVersionsResponse),
    Restore(Vec<RestoreChunk>),
    DeleteVersion,
    Gc(GcReport),
    Stats(RepoStats),
    Error(WireError),
}

/// A [`RepoError`] reduced to a wire-safe shape (kind tag + display
/// message), since `RepoError` itself does not implement `Serialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

impl From<&RepoError> for WireError {
    fn from(err: &RepoError) -> Self {
        let kind = match err {
            RepoError::ConfigError(_) => "ConfigError",
            RepoError::PathEscape { .. } => "PathEscape",
            RepoError::NotFound { .. } => "NotFound",
            RepoError::AuthFailure { .. } => "AuthFailure",
            RepoError::MalformedRecord(_) => "MalformedRecord",
            RepoError::HashMismatch { .. } => "HashMismatch",
            RepoError::MissingBlock { .. } => "MissingBlock",
            RepoError::CatalogConflict(_) => "CatalogConflict",
            RepoError::TransportError(_) => "TransportError",
            RepoError::RetryExhausted { .. } => "RetryExhausted",
            RepoError::IntegrityViolation(_) => "IntegrityViolation",
            RepoError::Cancelled => "Cancelled",
        };
        WireError {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<WireError> for RepoError {
    /// Reconstruct a `RepoError` from its wire-safe shape. The specific
    /// variants a caller is expected to `matches!` against (`PathEscape`,
    /// `AuthFailure`, `MissingBlock`, ...) are reconstructed with their
    /// kind intact; the original structured fields are not recoverable
    /// from the wire (only the rendered message is), so they are folded
    /// into the message string.
    fn from(wire: WireError) -> Self {
        match wire.kind.as_str() {
            "ConfigError" => RepoError::ConfigError(wire.message),
            "PathEscape" => RepoError::PathEscape { path: wire.message },
            "NotFound" => RepoError::NotFound { what: wire.message },
            "AuthFailure" => RepoError::AuthFailure { hash: wire.message },
            "MalformedRecord" => RepoError::MalformedRecord(wire.message),
            "HashMismatch" => RepoError::HashMismatch { expected: wire.message },
            "MissingBlock" => RepoError::MissingBlock { hash: wire.message },
            "CatalogConflict" => RepoError::CatalogConflict(wire.message),
            "RetryExhausted" => RepoError::RetryExhausted {
                attempts: 0,
                last_error: wire.message,
            },
            "IntegrityViolation" => RepoError::IntegrityViolation(wire.message),
            "Cancelled" => RepoError::Cancelled,
            _ => RepoError::TransportError(wire.message),
        }
    }
}

/// An envelope carrying the client-assigned `request_id` alongside the
/// request/response body, so responses can be demultiplexed out of FIFO
/// order delivery on the client's reader task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub request_id: u64,
    pub body: T,
}

/// Canonicalize an externally-supplied path into a [`crate::model::RepoPath`]
/// string, rejecting anything that could escape the repository root.
///
/// Rejects: absolute paths, empty components, `..`, and any embedded NUL
/// byte. This is the sole sandboxing gate (I6, P7) — the dispatcher must
/// route every path-carrying request through this function before it
/// reaches the catalog or block store.
pub fn sandbox_path(raw: &str) -> Result<String, RepoError> {
    if raw.as_bytes().contains(&0) {
        return Err(RepoError::PathEscape {
            path: raw.to_string(),
        });
    }

    let path = Path::new(raw);
    let mut normalized = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                normalized.push(part.to_string_lossy().into_owned());
            }
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RepoError::PathEscape {
                    path: raw.to_string(),
                });
            }
        }
    }

    if normalized.is_empty() {
        return Err(RepoError::PathEscape {
            path: raw.to_string(),
        });
    }

    Ok(normalized.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_path_accepts_normal_relative_paths() {
        assert_eq!(sandbox_path("a/b/c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(sandbox_path("./a/./b").unwrap(), "a/b");
    }

    #[test]
    fn sandbox_path_rejects_traversal() {
        assert!(sandbox_path("../etc/passwd").is_err());
        assert!(sandbox_path("a/../../b").is_err());
    }

    #[test]
    fn sandbox_path_rejects_absolute_and_nul() {
        assert!(sandbox_path("/etc/passwd").is_err());
        assert!(sandbox_path("a/b\0c").is_err());
    }
}
