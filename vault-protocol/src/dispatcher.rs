//! Server-side RPC dispatcher (§4.8, §5 "Server-side").
//!
//! One writer task owns the catalog write lock for the lifetime of the
//! connection and drains a channel of write RPCs in arrival order; pure-read
//! RPCs (`probe`, `get_chunk`, `list_files`, `list_versions`, `stats`) are
//! spawned onto bounded reader tasks and may run concurrently with the
//! writer and each other. Both paths funnel their responses into one output
//! channel so only a single task ever writes to the connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Semaphore};

use vault_api_types::protocol::{
    sandbox_path, CommitVersionResponse, DeleteVersionRequest, Envelope, GcRequest,
    GetChunkRequest, ListFilesRequest, ListFilesResponse, ListVersionsRequest,
    ListVersionsResponse, ProbeRequest, ProbeResponse, PutChunkRequest, RestoreChunk,
    RestoreRequest, RpcRequest, RpcResponse, WireError,
};
use vault_api_types::{Action, RepoError, RepoPath};
use vault_datastore::version_manager::VersionManager;
use vault_datastore::{retention, Repository};

use crate::codec::{read_frame, write_response};

/// How many pure-read RPCs may be in flight concurrently per connection.
pub const DEFAULT_READER_CONCURRENCY: usize = 16;

/// Output channel capacity; bounded so a stalled write side applies
/// backpressure to both the writer task and the reader pool rather than
/// growing without limit.
const OUTBOX_CAPACITY: usize = 256;
const WRITE_QUEUE_CAPACITY: usize = 256;

pub struct Dispatcher {
    repo: Arc<Repository>,
    reader_concurrency: usize,
}

impl Dispatcher {
    pub fn new(repo: Repository) -> Self {
        Dispatcher {
            repo: Arc::new(repo),
            reader_concurrency: DEFAULT_READER_CONCURRENCY,
        }
    }

    pub fn with_reader_concurrency(repo: Repository, reader_concurrency: usize) -> Self {
        Dispatcher {
            repo: Arc::new(repo),
            reader_concurrency,
        }
    }

    /// Serve one connection to completion (until EOF or a fatal I/O error).
    /// A fresh writer task and reader-task pool are created per call, so a
    /// dropped transport cleanly releases the writer lock at the next safe
    /// point (§5 "Timeouts & cancellation").
    pub async fn serve_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut read_half, write_half) = split(stream);

        let (outbox_tx, mut outbox_rx) = mpsc::channel::<(u8, Envelope<RpcResponse>)>(OUTBOX_CAPACITY);
        let (write_tx, mut write_rx) = mpsc::channel::<(u8, Envelope<RpcRequest>)>(WRITE_QUEUE_CAPACITY);

        // Single writer task: serializes every catalog/block-store mutation
        // for the lifetime of this connection.
        let writer_repo = self.repo.clone();
        let writer_outbox = outbox_tx.clone();
        let writer_task = tokio::spawn(async move {
            while let Some((opcode, envelope)) = write_rx.recv().await {
                let response = handle_request(&writer_repo, envelope.body).await;
                let out = Envelope {
                    request_id: envelope.request_id,
                    body: to_wire_response(response),
                };
                if writer_outbox.send((opcode, out)).await.is_err() {
                    break;
                }
            }
        });

        // Single output task: the only task that ever touches the write
        // half, so responses from the writer task and the reader pool can
        // never interleave mid-frame.
        let output_task = tokio::spawn(async move {
            let mut write_half = write_half;
            while let Some((opcode, envelope)) = outbox_rx.recv().await {
                if write_response(&mut write_half, opcode, &envelope).await.is_err() {
                    break;
                }
            }
        });

        let semaphore = Arc::new(Semaphore::new(self.reader_concurrency.max(1)));
        let mut reader_tasks = Vec::new();

        loop {
            let frame = read_frame::<_, Envelope<RpcRequest>>(&mut read_half).await;
            let (opcode, envelope) = match frame {
                Ok(Some(pair)) => pair,
                Ok(None) => break,
                Err(err) => {
                    log::warn!("agent connection read error: {err}");
                    break;
                }
            };

            if envelope.body.is_write() {
                if write_tx.send((opcode, envelope)).await.is_err() {
                    break;
                }
                continue;
            }

            let repo = self.repo.clone();
            let outbox = outbox_tx.clone();
            let reader_slot = semaphore.clone();
            reader_tasks.push(tokio::spawn(async move {
                let _permit = reader_slot.acquire_owned().await;
                let response = handle_request(&repo, envelope.body).await;
                let out = Envelope {
                    request_id: envelope.request_id,
                    body: to_wire_response(response),
                };
                let _ = outbox.send((opcode, out)).await;
            }));
        }

        drop(write_tx);
        let _ = writer_task.await;
        for task in reader_tasks {
            let _ = task.await;
        }
        drop(outbox_tx);
        let _ = output_task.await;
    }
}

fn to_wire_response(result: Result<RpcResponse, RepoError>) -> RpcResponse {
    match result {
        Ok(response) => response,
        Err(err) => RpcResponse::Error(WireError::from(&err)),
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Route one already-decoded request to the repository, returning the
/// matching response variant. Every path-carrying request goes through
/// [`sandbox_path`] before it touches the catalog or block store (I6, P7).
async fn handle_request(repo: &Repository, request: RpcRequest) -> Result<RpcResponse, RepoError> {
    match request {
        RpcRequest::Probe(ProbeRequest { hashes }) => {
            let present = hashes
                .into_iter()
                .filter(|hash| repo.block_store.exists(hash))
                .collect();
            Ok(RpcResponse::Probe(ProbeResponse { present }))
        }

        RpcRequest::PutChunk(PutChunkRequest { hash, record }) => {
            repo.block_store.put_if_absent(&hash, &record)?;
            Ok(RpcResponse::PutChunk)
        }

        RpcRequest::GetChunk(GetChunkRequest { hash }) => {
            let record = repo.block_store.get(&hash)?;
            Ok(RpcResponse::GetChunk(record))
        }

        RpcRequest::CommitVersion(req) => {
            let normalized = sandbox_path(&req.path)?;
            let path = RepoPath::from_normalized(normalized);
            let manager = VersionManager::new(&repo.catalog, &repo.block_store);
            let version_id = manager.commit(
                &path,
                now_micros(),
                req.action,
                &req.chunks,
                req.plain_size,
                req.is_compressed,
                req.content_hash,
            )?;
            Ok(RpcResponse::CommitVersion(CommitVersionResponse { version_id }))
        }

        RpcRequest::ListFiles(ListFilesRequest { path_prefix }) => {
            let mut files = repo.catalog.list_files()?;
            if let Some(prefix) = path_prefix {
                let normalized = sandbox_path(&prefix)?;
                files.retain(|f| f.path.as_str().starts_with(&normalized));
            }
            Ok(RpcResponse::ListFiles(ListFilesResponse { files }))
        }

        RpcRequest::ListVersions(ListVersionsRequest { path }) => {
            let normalized = sandbox_path(&path)?;
            let path = RepoPath::from_normalized(normalized);
            let versions = repo.catalog.list_versions(&path)?;
            Ok(RpcResponse::ListVersions(ListVersionsResponse { versions }))
        }

        RpcRequest::Restore(RestoreRequest { path, version_id }) => {
            let normalized = sandbox_path(&path)?;
            let version = repo.catalog.get_version(version_id)?.ok_or_else(|| RepoError::NotFound {
                what: format!("version {version_id}"),
            })?;
            if version.path.as_str() != normalized {
                return Err(RepoError::NotFound {
                    what: format!("version {version_id} for path {normalized}"),
                });
            }
            if version.action == Action::Deleted {
                return Ok(RpcResponse::Restore(Vec::new()));
            }
            let edges = repo.catalog.version_chunks(version_id)?;
            let mut chunks = Vec::with_capacity(edges.len());
            for edge in edges {
                let record = repo.block_store.get(&edge.chunk_hash)?;
                chunks.push(RestoreChunk {
                    sequence: edge.sequence,
                    chunk_hash: edge.chunk_hash,
                    record,
                });
            }
            Ok(RpcResponse::Restore(chunks))
        }

        RpcRequest::DeleteVersion(DeleteVersionRequest { version_id }) => {
            repo.catalog
                .get_version(version_id)?
                .ok_or_else(|| RepoError::NotFound {
                    what: format!("version {version_id}"),
                })?;
            repo.catalog.expire_version(version_id)?;
            Ok(RpcResponse::DeleteVersion)
        }

        RpcRequest::Gc(GcRequest { retention_days, dry_run }) => {
            let retention_seconds = i64::from(retention_days) * 86_400;
            let report = retention::run_gc(
                &repo.catalog,
                &repo.block_store,
                now_micros() / 1_000_000,
                retention_seconds,
                dry_run,
            )?;
            Ok(RpcResponse::Gc(report))
        }

        RpcRequest::Stats => {
            let stats = repo.catalog.stats()?;
            Ok(RpcResponse::Stats(stats))
        }
    }
}

/// Monotonically-increasing client-assigned request id generator, used by
/// [`crate::rpc_client`]-style callers to pipeline requests over one
/// connection without colliding ids.
#[derive(Default)]
pub struct RequestIdGenerator(AtomicU64);

impl RequestIdGenerator {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_api_types::protocol::{CommitVersionRequest, PutChunkRequest};
    use vault_api_types::{Action, ChunkHash, ChunkSpan};

    fn test_repo() -> (Repository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(
            dir.path(),
            b"passphrase",
            vault_api_types::manifest::KdfParams::MIN_ITERATIONS,
            vault_api_types::ChunkerParams::default(),
            1000,
        )
        .unwrap();
        (repo, dir)
    }

    #[tokio::test]
    async fn probe_reports_only_present_hashes() {
        let (repo, _dir) = test_repo();
        let present_hash = ChunkHash::new([1u8; 32]);
        repo.block_store.put_if_absent(&present_hash, b"record").unwrap();
        let missing_hash = ChunkHash::new([2u8; 32]);

        let response = handle_request(
            &repo,
            RpcRequest::Probe(ProbeRequest {
                hashes: vec![present_hash, missing_hash],
            }),
        )
        .await
        .unwrap();

        match response {
            RpcResponse::Probe(ProbeResponse { present }) => assert_eq!(present, vec![present_hash]),
            _ => panic!("expected Probe response"),
        }
    }

    #[tokio::test]
    async fn commit_then_restore_round_trips_a_single_chunk_file() {
        let (repo, _dir) = test_repo();
        let hash = ChunkHash::new([7u8; 32]);
        let sealed = repo.crypto.seal(b"hello world\n").unwrap();
        let mut record = vec![0u8]; // FLAG_PLAIN
        record.extend_from_slice(&sealed);

        handle_request(
            &repo,
            RpcRequest::PutChunk(PutChunkRequest {
                hash,
                record: record.clone(),
            }),
        )
        .await
        .unwrap();

        let commit_response = handle_request(
            &repo,
            RpcRequest::CommitVersion(CommitVersionRequest {
                path: "a.txt".to_string(),
                action: Action::Created,
                chunks: vec![ChunkSpan {
                    sequence: 0,
                    offset: 0,
                    length: 12,
                    hash,
                }],
                plain_size: 12,
                is_compressed: false,
                content_hash: Some(vault_tools::sha256(b"hello world\n")),
            }),
        )
        .await
        .unwrap();

        let version_id = match commit_response {
            RpcResponse::CommitVersion(CommitVersionResponse { version_id }) => version_id,
            _ => panic!("expected CommitVersion response"),
        };

        let restore_response = handle_request(
            &repo,
            RpcRequest::Restore(RestoreRequest {
                path: "a.txt".to_string(),
                version_id,
            }),
        )
        .await
        .unwrap();

        match restore_response {
            RpcResponse::Restore(chunks) => {
                assert_eq!(chunks.len(), 1);
                assert_eq!(chunks[0].record, record);
            }
            _ => panic!("expected Restore response"),
        }
    }

    #[tokio::test]
    async fn path_traversal_is_rejected_before_any_lookup() {
        let (repo, _dir) = test_repo();
        let err = handle_request(
            &repo,
            RpcRequest::Restore(RestoreRequest {
                path: "../../etc/passwd".to_string(),
                version_id: 1,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::PathEscape { .. }));
    }

    #[tokio::test]
    async fn get_chunk_for_missing_hash_is_not_found() {
        let (repo, _dir) = test_repo();
        let err = handle_request(
            &repo,
            RpcRequest::GetChunk(GetChunkRequest {
                hash: ChunkHash::new([9u8; 32]),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::NotFound { .. }));
    }
}
