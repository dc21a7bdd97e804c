//! Version manager (§4.7): wraps the catalog's commit transaction with the
//! `(path, timestamp)` collision-retry policy from the error propagation
//! table (`CatalogConflict` is retried with a regenerated timestamp up to
//! three times).

use vault_api_types::{Action, ChunkHash, ChunkSpan, RepoError, RepoPath};

use crate::block_store::BlockStore;
use crate::catalog::Catalog;

const MAX_TIMESTAMP_RETRIES: u32 = 3;

pub struct VersionManager<'a> {
    catalog: &'a Catalog,
    block_store: &'a BlockStore,
}

impl<'a> VersionManager<'a> {
    pub fn new(catalog: &'a Catalog, block_store: &'a BlockStore) -> Self {
        VersionManager { catalog, block_store }
    }

    /// Commit a new version for `path`. `now` is the caller's clock reading
    /// in seconds; on a `(path, timestamp)` collision the timestamp is
    /// bumped by one second and retried, up to `MAX_TIMESTAMP_RETRIES`
    /// times, after which the error is surfaced. `stored_size` on the
    /// resulting Version is derived from the actual on-disk size of each
    /// referenced block, not supplied by the caller.
    pub fn commit(
        &self,
        path: &RepoPath,
        now: i64,
        action: Action,
        chunks: &[ChunkSpan],
        plain_size: u64,
        is_compressed: bool,
        content_hash: Option<ChunkHash>,
    ) -> Result<i64, RepoError> {
        let mut timestamp = now;
        let mut attempt = 0;
        loop {
            let result = self.catalog.commit_version(
                path,
                timestamp,
                action,
                chunks,
                plain_size,
                is_compressed,
                content_hash,
                |hash| self.block_store.stored_len(hash),
            );
            match result {
                Ok(version_id) => return Ok(version_id),
                Err(RepoError::CatalogConflict(msg)) if attempt < MAX_TIMESTAMP_RETRIES => {
                    attempt += 1;
                    timestamp += 1;
                    log::warn!("commit_version: {msg}, retrying with timestamp {timestamp}");
                }
                Err(err) => return Err(err),
            }
        }
    }
}
