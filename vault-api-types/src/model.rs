use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// SHA-256 digest of a chunk's plaintext. Identifies a Chunk row and the
/// block file that stores it.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, Deserialize, Serialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChunkHash {
    #[serde(with = "hex::serde")]
    bytes: [u8; 32],
}

impl ChunkHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// First two hex-byte prefixes, used to build the `blocks/<aa>/<bb>/`
    /// two-level fan-out directory.
    pub fn dir_prefixes(&self) -> (String, String) {
        (
            hex::encode(&self.bytes[0..1]),
            hex::encode(&self.bytes[1..2]),
        )
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ChunkHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self { bytes })
    }
}

/// The action recorded by a Version (or, for a File row, its most recent
/// action).
#[derive(Debug, Eq, PartialEq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Modified,
    Deleted,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Modified => "modified",
            Action::Deleted => "deleted",
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Action::Created),
            "modified" => Ok(Action::Modified),
            "deleted" => Ok(Action::Deleted),
            other => Err(format!("invalid action: {other}")),
        }
    }
}

/// A repository-relative, already-normalized path: no leading slash, no
/// `..` components, forward slashes only. Construction is the only place
/// path sandboxing is enforced for catalog rows (I6); callers get here
/// through [`crate::protocol::sandbox_path`].
#[derive(Debug, Eq, PartialEq, Hash, Clone, Deserialize, Serialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RepoPath(String);

impl RepoPath {
    /// Build from an already-normalized string. Only used by code that has
    /// gone through `sandbox_path`; kept private-ish by convention (public
    /// because the catalog crate constructs rows from stored strings).
    pub fn from_normalized(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row of the `files` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRow {
    pub path: RepoPath,
    pub first_seen_at: i64,
    pub last_action: Action,
    pub current_size: u64,
}

/// Row of the `versions` table. Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRow {
    pub version_id: i64,
    pub path: RepoPath,
    pub timestamp: i64,
    pub action: Action,
    pub plain_size: u64,
    pub stored_size: u64,
    pub is_compressed: bool,
    pub content_hash: Option<ChunkHash>,
}

/// Row of the `chunks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRow {
    pub chunk_hash: ChunkHash,
    pub plain_size: u64,
    pub stored_size: u64,
    pub refcount: u64,
    pub created_at: i64,
}

/// Row of the `version_chunks` table: one ordered edge from a Version to a
/// Chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionChunkRow {
    pub version_id: i64,
    pub sequence: u32,
    pub chunk_hash: ChunkHash,
    pub offset: u64,
    pub length: u64,
}

/// One entry of a chunk list produced by the chunker / delta engine, prior
/// to any commit: `(sequence, offset, length, hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub sequence: u32,
    pub offset: u64,
    pub length: u64,
    pub hash: ChunkHash,
}

/// Aggregate repository statistics returned by the `stats` RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoStats {
    pub file_count: u64,
    pub version_count: u64,
    pub chunk_count: u64,
    pub total_stored_bytes: u64,
    pub total_plain_bytes: u64,
}

/// Result of a `gc` RPC (or its dry-run projection).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GcReport {
    pub expired_versions: u64,
    pub freed_blocks: u64,
    pub freed_bytes: u64,
    pub dry_run: bool,
}

/// One finding reported by the `audit` subcommand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditFinding {
    /// A block on disk with no referencing Chunk row: reclaimable.
    OrphanBlock { hash: ChunkHash },
    /// A Chunk row with no backing block: should be impossible under I1.
    IntegrityViolation { hash: ChunkHash },
}
