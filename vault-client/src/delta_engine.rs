//! Delta engine (§4.6): chunk a local file, find out which of its chunks the
//! repository is missing, upload only those, and commit the resulting
//! version.

use std::collections::HashSet;
use std::path::Path;

use vault_api_types::{Action, ChunkHash, ChunkSpan, RepoError};
use vault_datastore::chunker::chunk_all;
use vault_api_types::ChunkerParams;
use vault_tools::backoff::{retry_async, BackoffPolicy};
use vault_tools::compression::FLAG_GZIP;
use vault_tools::crypto::CryptConfig;
use vault_tools::mime_hint::category_for_path;
use vault_tools::record::seal_chunk;
use vault_tools::sha256;

use crate::rpc_client::RpcClient;

/// Maximum number of hashes probed in a single `probe` RPC (§4.6).
const PROBE_BATCH: usize = 1024;
/// Maximum number of chunk uploads pipelined at once for one file (§4.6, §5).
const UPLOAD_WINDOW: usize = 8;

/// Outcome of a successful [`commit_file`] or [`commit_deletion`] call,
/// reported back to the caller (committer loop, one-shot CLI) for logging.
#[derive(Debug, Clone, Copy)]
pub struct CommitOutcome {
    pub version_id: i64,
    pub total_chunks: usize,
    pub uploaded_chunks: usize,
}

/// Chunk `local_path`, upload whatever the repository does not already
/// have, and commit a version for `repo_path` with the given `action`
/// (`Created` or `Modified` — use [`commit_deletion`] for tombstones).
///
/// If any chunk upload exhausts its retry budget, no `commit_version` call
/// is made and the whole operation is abandoned (§4.6): the caller observes
/// the error and may re-run delta sync from scratch later.
pub async fn commit_file(
    client: &RpcClient,
    crypto: &CryptConfig,
    chunker_params: ChunkerParams,
    repo_path: &str,
    local_path: &Path,
    action: Action,
) -> Result<CommitOutcome, RepoError> {
    debug_assert!(action != Action::Deleted, "use commit_deletion for tombstones");

    let data = tokio::fs::read(local_path)
        .await
        .map_err(|err| RepoError::TransportError(format!("read {}: {err}", local_path.display())))?;

    let boundaries = chunk_all(&data, chunker_params);
    let mime_category = category_for_path(local_path);

    let spans: Vec<ChunkSpan> = boundaries
        .iter()
        .enumerate()
        .map(|(seq, b)| ChunkSpan {
            sequence: seq as u32,
            offset: b.offset,
            length: b.length,
            hash: sha256(&data[b.offset as usize..(b.offset + b.length) as usize]),
        })
        .collect();

    let present = probe_all(client, &spans).await?;

    let missing: Vec<&ChunkSpan> = spans.iter().filter(|s| !present.contains(&s.hash)).collect();
    let mut is_compressed = false;
    let mut uploaded = 0usize;

    for window in missing.chunks(UPLOAD_WINDOW) {
        let policy = BackoffPolicy::default();
        let uploads = window.iter().map(|span| {
            let plaintext = &data[span.offset as usize..(span.offset + span.length) as usize];
            let record = seal_chunk(crypto, plaintext, mime_category);
            async move {
                let record = record?;
                let flag_gzip = record.first() == Some(&FLAG_GZIP);
                let hash = span.hash;
                retry_async(
                    policy,
                    |_attempt| {
                        let record = record.clone();
                        async move { client.put_chunk(hash, record).await }
                    },
                    |delay| tokio::time::sleep(delay),
                )
                .await
                .map(|()| flag_gzip)
            }
        });
        let results = futures::future::join_all(uploads).await;
        for result in results {
            if result? {
                is_compressed = true;
            }
            uploaded += 1;
        }
    }

    let content_hash = sha256(&data);
    let version_id = client
        .commit_version(
            repo_path.to_string(),
            action,
            spans.clone(),
            data.len() as u64,
            is_compressed,
            Some(content_hash),
        )
        .await?;

    Ok(CommitOutcome {
        version_id,
        total_chunks: spans.len(),
        uploaded_chunks: uploaded,
    })
}

/// Commit a tombstone version for `repo_path` (I5: no chunks, no content
/// hash).
pub async fn commit_deletion(client: &RpcClient, repo_path: &str) -> Result<i64, RepoError> {
    client
        .commit_version(repo_path.to_string(), Action::Deleted, Vec::new(), 0, false, None)
        .await
}

async fn probe_all(client: &RpcClient, spans: &[ChunkSpan]) -> Result<HashSet<ChunkHash>, RepoError> {
    let mut present = HashSet::new();
    for batch in spans.chunks(PROBE_BATCH) {
        let hashes: Vec<ChunkHash> = batch.iter().map(|s| s.hash).collect();
        let found = client.probe(hashes).await?;
        present.extend(found);
    }
    Ok(present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vault_api_types::manifest::KdfParams;
    use vault_datastore::Repository;
    use vault_protocol::Dispatcher;

    async fn test_agent() -> (RpcClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(
            dir.path(),
            b"passphrase",
            KdfParams::MIN_ITERATIONS,
            ChunkerParams::default(),
            1000,
        )
        .unwrap();
        let dispatcher = Dispatcher::new(repo);

        let (client_side, agent_side) = tokio::io::duplex(1 << 20);
        tokio::spawn(async move {
            dispatcher.serve_connection(agent_side).await;
        });
        (RpcClient::new(client_side), dir)
    }

    fn matching_crypto(repo_root: &Path) -> CryptConfig {
        let manifest = vault_datastore::manifest_io::read_manifest(repo_root).unwrap();
        CryptConfig::derive(b"passphrase", &manifest.kdf).unwrap()
    }

    #[tokio::test]
    async fn commit_then_restore_round_trips_small_file() {
        let (client, dir) = test_agent().await;
        let crypto = matching_crypto(dir.path());

        let source = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(source.path(), b"hello world\n").unwrap();

        let outcome = commit_file(
            &client,
            &crypto,
            ChunkerParams::default(),
            "a.txt",
            source.path(),
            Action::Created,
        )
        .await
        .unwrap();
        assert_eq!(outcome.uploaded_chunks, outcome.total_chunks);

        let restored = client.restore("a.txt".to_string(), outcome.version_id).await.unwrap();
        assert_eq!(restored.len(), outcome.total_chunks);
        let plaintext = vault_tools::record::open_chunk(&crypto, &restored[0].record).unwrap();
        assert_eq!(plaintext, b"hello world\n");
        client.shutdown().await;
    }

    #[tokio::test]
    async fn second_commit_of_identical_content_uploads_nothing_new() {
        let (client, dir) = test_agent().await;
        let crypto = matching_crypto(dir.path());

        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(&vec![0x41u8; 200_000]).unwrap();

        let first = commit_file(
            &client,
            &crypto,
            ChunkerParams::default(),
            "big.bin",
            source.path(),
            Action::Created,
        )
        .await
        .unwrap();
        assert_eq!(first.uploaded_chunks, first.total_chunks);

        let second = commit_file(
            &client,
            &crypto,
            ChunkerParams::default(),
            "big.bin",
            source.path(),
            Action::Modified,
        )
        .await
        .unwrap();
        assert_eq!(second.uploaded_chunks, 0);
        client.shutdown().await;
    }
}
