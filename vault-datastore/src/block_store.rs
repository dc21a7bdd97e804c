//! Content-addressed storage of sealed blocks on the server filesystem.
//!
//! Layout: `blocks/<aa>/<bb>/<hexhash>`, where `aa` and `bb` are the first
//! two hex-byte prefixes of the chunk hash. Each file holds exactly one
//! sealed record (`flags ‖ nonce ‖ ciphertext ‖ tag`).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use vault_api_types::{ChunkHash, RepoError};
use vault_tools::atomic_fs::write_atomic;

pub struct BlockStore {
    blocks_dir: PathBuf,
    staging_dir: PathBuf,
    // Guards the check-then-write race in `put_if_absent`; holding it for
    // the whole call is cheap because writes are local filesystem ops and
    // bounded by the repository's single writer task in practice.
    write_lock: Mutex<()>,
}

impl BlockStore {
    pub fn open(repo_root: &Path) -> Result<Self, RepoError> {
        let blocks_dir = repo_root.join(vault_buildcfg::BLOCKS_DIR);
        let staging_dir = repo_root.join(vault_buildcfg::TMP_DIR);
        fs::create_dir_all(&blocks_dir)
            .map_err(|err| RepoError::ConfigError(format!("create blocks dir: {err}")))?;
        fs::create_dir_all(&staging_dir)
            .map_err(|err| RepoError::ConfigError(format!("create staging dir: {err}")))?;
        Ok(BlockStore {
            blocks_dir,
            staging_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn block_path(&self, hash: &ChunkHash) -> PathBuf {
        let (aa, bb) = hash.dir_prefixes();
        self.blocks_dir.join(aa).join(bb).join(hash.to_hex())
    }

    /// Write `record` for `hash` if no block exists yet. Returns whether a
    /// write occurred. Safe under concurrent calls for the same hash: at
    /// most one write wins, the rest are no-ops (P9).
    pub fn put_if_absent(&self, hash: &ChunkHash, record: &[u8]) -> Result<bool, RepoError> {
        let _guard = self.write_lock.lock().unwrap();
        let path = self.block_path(hash);
        if path.exists() {
            return Ok(false);
        }
        write_atomic(&self.staging_dir, &path, record)?;
        Ok(true)
    }

    pub fn get(&self, hash: &ChunkHash) -> Result<Vec<u8>, RepoError> {
        let path = self.block_path(hash);
        fs::read(&path).map_err(|_| RepoError::NotFound {
            what: format!("block {hash}"),
        })
    }

    pub fn exists(&self, hash: &ChunkHash) -> bool {
        self.block_path(hash).exists()
    }

    /// On-disk length in bytes of the sealed record for `hash`, or `None` if
    /// no block is stored under that hash. Used by the catalog to record a
    /// Version's `stored_size` as the sum of its referenced blocks' actual
    /// sizes, and doubles as the commit-time existence check (I1).
    pub fn stored_len(&self, hash: &ChunkHash) -> Option<u64> {
        fs::metadata(self.block_path(hash)).ok().map(|meta| meta.len())
    }

    /// Enumerate every stored hash. Used by GC audit only — not on any
    /// commit/restore hot path.
    pub fn iter(&self) -> Result<Vec<ChunkHash>, RepoError> {
        let mut hashes = Vec::new();
        for aa_entry in walkdir_hex_dirs(&self.blocks_dir)? {
            for bb_entry in walkdir_hex_dirs(&aa_entry)? {
                for file_entry in fs::read_dir(&bb_entry)
                    .map_err(|err| RepoError::TransportError(format!("read blocks dir: {err}")))?
                {
                    let file_entry = file_entry
                        .map_err(|err| RepoError::TransportError(format!("read blocks dir entry: {err}")))?;
                    if let Some(name) = file_entry.file_name().to_str() {
                        if let Ok(hash) = name.parse::<ChunkHash>() {
                            hashes.push(hash);
                        }
                    }
                }
            }
        }
        Ok(hashes)
    }

    /// Remove the block for `hash`. Fails `NotFound` if it is missing.
    pub fn unlink(&self, hash: &ChunkHash) -> Result<(), RepoError> {
        let path = self.block_path(hash);
        fs::remove_file(&path).map_err(|_| RepoError::NotFound {
            what: format!("block {hash}"),
        })
    }
}

fn walkdir_hex_dirs(parent: &Path) -> Result<Vec<PathBuf>, RepoError> {
    if !parent.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(parent)
        .map_err(|err| RepoError::TransportError(format!("read {}: {err}", parent.display())))?
    {
        let entry = entry.map_err(|err| RepoError::TransportError(format!("read dir entry: {err}")))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hash_of(byte: u8) -> ChunkHash {
        ChunkHash::new([byte; 32])
    }

    #[test]
    fn put_if_absent_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let hash = hash_of(1);

        assert!(store.put_if_absent(&hash, b"sealed-record").unwrap());
        assert!(store.exists(&hash));
        assert_eq!(store.get(&hash).unwrap(), b"sealed-record");
    }

    #[test]
    fn second_put_if_absent_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let hash = hash_of(2);

        assert!(store.put_if_absent(&hash, b"first").unwrap());
        assert!(!store.put_if_absent(&hash, b"second").unwrap());
        assert_eq!(store.get(&hash).unwrap(), b"first");
    }

    #[test]
    fn get_missing_block_is_not_found() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get(&hash_of(3)).unwrap_err(),
            RepoError::NotFound { .. }
        ));
    }

    #[test]
    fn unlink_then_put_restores_the_block() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let hash = hash_of(4);

        store.put_if_absent(&hash, b"v1").unwrap();
        store.unlink(&hash).unwrap();
        assert!(!store.exists(&hash));

        assert!(store.put_if_absent(&hash, b"v2").unwrap());
        assert_eq!(store.get(&hash).unwrap(), b"v2");
    }

    #[test]
    fn stored_len_reports_sealed_record_size_or_none() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let hash = hash_of(8);
        assert_eq!(store.stored_len(&hash), None);
        store.put_if_absent(&hash, b"0123456789").unwrap();
        assert_eq!(store.stored_len(&hash), Some(10));
    }

    #[test]
    fn unlink_missing_block_is_not_found() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.unlink(&hash_of(5)).unwrap_err(),
            RepoError::NotFound { .. }
        ));
    }

    #[test]
    fn iter_enumerates_all_stored_hashes() {
        let dir = tempdir().unwrap();
        let store = BlockStore::open(dir.path()).unwrap();
        let h1 = hash_of(6);
        let h2 = hash_of(7);
        store.put_if_absent(&h1, b"a").unwrap();
        store.put_if_absent(&h2, b"b").unwrap();

        let mut found = store.iter().unwrap();
        found.sort();
        let mut expected = vec![h1, h2];
        expected.sort();
        assert_eq!(found, expected);
    }
}
