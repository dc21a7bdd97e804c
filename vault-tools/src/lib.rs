//! Crypto, compression, atomic-filesystem, and retry helpers shared across
//! the vault-backup crates. Kept dependency-light and free of any
//! vault-backup-specific policy beyond what's documented per module.

pub mod atomic_fs;
pub mod backoff;
pub mod compression;
pub mod crypto;
pub mod mime_hint;
pub mod record;

use openssl::sha::Sha256;
use vault_api_types::ChunkHash;

/// Plain SHA-256 of `data`, used both for chunk hashes and whole-file
/// `content_hash`.
pub fn sha256(data: &[u8]) -> ChunkHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    ChunkHash::new(hasher.finish())
}
