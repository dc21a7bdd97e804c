//! Client-side RPC connection (§4.8, §5 "Client-side").
//!
//! One writer task serializes outgoing frames, one reader task demultiplexes
//! incoming responses by `request_id` onto one-shot channels. Callers may
//! issue any number of requests concurrently over the shared connection; the
//! server's FIFO response order does not matter to correctness here, only to
//! latency, since each response is routed back to the call that is actually
//! waiting on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use vault_api_types::protocol::{
    CommitVersionRequest, DeleteVersionRequest, Envelope, GcRequest, GetChunkRequest,
    ListFilesRequest, ListFilesResponse, ListVersionsRequest, ListVersionsResponse,
    ProbeRequest, PutChunkRequest, RestoreChunk, RestoreRequest, RpcRequest, RpcResponse,
    SealedRecord,
};
use vault_api_types::{Action, ChunkHash, ChunkSpan, FileRow, GcReport, RepoError, RepoStats, VersionRow};
use vault_protocol::codec::{read_frame, write_request};
use vault_protocol::dispatcher::RequestIdGenerator;

/// Default client-side timeout for control RPCs (everything but chunk
/// transfer).
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default client-side timeout for `put_chunk`/`get_chunk`.
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(120);

const OUTBOUND_QUEUE_CAPACITY: usize = 256;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>>;

/// A connection to one `vault-agent`, shared by every caller in the process
/// (watcher/debouncer/committer pipeline, one-shot CLI invocations, ...).
pub struct RpcClient {
    ids: RequestIdGenerator,
    pending: PendingMap,
    outbound: mpsc::Sender<Envelope<RpcRequest>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl RpcClient {
    /// Take ownership of an already-authenticated duplex (a Unix socket in
    /// the shipped binaries; anything `AsyncRead + AsyncWrite` in tests) and
    /// start its reader/writer tasks.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut read_half, mut write_half) = split(stream);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (outbound, mut outbound_rx) = mpsc::channel::<Envelope<RpcRequest>>(OUTBOUND_QUEUE_CAPACITY);

        let writer_task = tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if write_request(&mut write_half, &envelope).await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = read_frame::<_, Envelope<RpcResponse>>(&mut read_half).await;
                match frame {
                    Ok(Some((_opcode, envelope))) => {
                        if let Some(tx) = reader_pending.lock().await.remove(&envelope.request_id) {
                            let _ = tx.send(envelope.body);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("rpc client: connection read error: {err}");
                        break;
                    }
                }
            }
        });

        RpcClient {
            ids: RequestIdGenerator::default(),
            pending,
            outbound,
            reader_task,
            writer_task,
        }
    }

    async fn call(&self, request: RpcRequest, budget: Duration) -> Result<RpcResponse, RepoError> {
        let request_id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if self
            .outbound
            .send(Envelope {
                request_id,
                body: request,
            })
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&request_id);
            return Err(RepoError::TransportError("connection closed".to_string()));
        }

        match timeout(budget, rx).await {
            Ok(Ok(response)) => match response {
                RpcResponse::Error(wire) => Err(RepoError::from(wire)),
                other => Ok(other),
            },
            Ok(Err(_)) => Err(RepoError::TransportError(
                "connection closed before response arrived".to_string(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(RepoError::TransportError(format!(
                    "rpc timed out after {budget:?}"
                )))
            }
        }
    }

    pub async fn probe(&self, hashes: Vec<ChunkHash>) -> Result<Vec<ChunkHash>, RepoError> {
        match self
            .call(RpcRequest::Probe(ProbeRequest { hashes }), CONTROL_TIMEOUT)
            .await?
        {
            RpcResponse::Probe(resp) => Ok(resp.present),
            other => Err(unexpected_response("Probe", &other)),
        }
    }

    pub async fn put_chunk(&self, hash: ChunkHash, record: SealedRecord) -> Result<(), RepoError> {
        match self
            .call(RpcRequest::PutChunk(PutChunkRequest { hash, record }), CHUNK_TIMEOUT)
            .await?
        {
            RpcResponse::PutChunk => Ok(()),
            other => Err(unexpected_response("PutChunk", &other)),
        }
    }

    pub async fn get_chunk(&self, hash: ChunkHash) -> Result<SealedRecord, RepoError> {
        match self
            .call(RpcRequest::GetChunk(GetChunkRequest { hash }), CHUNK_TIMEOUT)
            .await?
        {
            RpcResponse::GetChunk(record) => Ok(record),
            other => Err(unexpected_response("GetChunk", &other)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn commit_version(
        &self,
        path: String,
        action: Action,
        chunks: Vec<ChunkSpan>,
        plain_size: u64,
        is_compressed: bool,
        content_hash: Option<ChunkHash>,
    ) -> Result<i64, RepoError> {
        let request = RpcRequest::CommitVersion(CommitVersionRequest {
            path,
            action,
            chunks,
            plain_size,
            is_compressed,
            content_hash,
        });
        match self.call(request, CONTROL_TIMEOUT).await? {
            RpcResponse::CommitVersion(resp) => Ok(resp.version_id),
            other => Err(unexpected_response("CommitVersion", &other)),
        }
    }

    pub async fn list_files(&self, path_prefix: Option<String>) -> Result<Vec<FileRow>, RepoError> {
        let request = RpcRequest::ListFiles(ListFilesRequest { path_prefix });
        match self.call(request, CONTROL_TIMEOUT).await? {
            RpcResponse::ListFiles(ListFilesResponse { files }) => Ok(files),
            other => Err(unexpected_response("ListFiles", &other)),
        }
    }

    pub async fn list_versions(&self, path: String) -> Result<Vec<VersionRow>, RepoError> {
        let request = RpcRequest::ListVersions(ListVersionsRequest { path });
        match self.call(request, CONTROL_TIMEOUT).await? {
            RpcResponse::ListVersions(ListVersionsResponse { versions }) => Ok(versions),
            other => Err(unexpected_response("ListVersions", &other)),
        }
    }

    pub async fn restore(&self, path: String, version_id: i64) -> Result<Vec<RestoreChunk>, RepoError> {
        let request = RpcRequest::Restore(RestoreRequest { path, version_id });
        match self.call(request, CHUNK_TIMEOUT).await? {
            RpcResponse::Restore(chunks) => Ok(chunks),
            other => Err(unexpected_response("Restore", &other)),
        }
    }

    pub async fn delete_version(&self, version_id: i64) -> Result<(), RepoError> {
        let request = RpcRequest::DeleteVersion(DeleteVersionRequest { version_id });
        match self.call(request, CONTROL_TIMEOUT).await? {
            RpcResponse::DeleteVersion => Ok(()),
            other => Err(unexpected_response("DeleteVersion", &other)),
        }
    }

    pub async fn gc(&self, retention_days: u32, dry_run: bool) -> Result<GcReport, RepoError> {
        let request = RpcRequest::Gc(GcRequest {
            retention_days,
            dry_run,
        });
        match self.call(request, CONTROL_TIMEOUT).await? {
            RpcResponse::Gc(report) => Ok(report),
            other => Err(unexpected_response("Gc", &other)),
        }
    }

    pub async fn stats(&self) -> Result<RepoStats, RepoError> {
        match self.call(RpcRequest::Stats, CONTROL_TIMEOUT).await? {
            RpcResponse::Stats(stats) => Ok(stats),
            other => Err(unexpected_response("Stats", &other)),
        }
    }

    /// Close the outbound queue and wait for both tasks to drain. Any
    /// in-flight `call()` still waiting on a response will time out on its
    /// own rather than hang, since dropping `outbound` does not cancel
    /// requests already written to the wire.
    pub async fn shutdown(self) {
        drop(self.outbound);
        let _ = self.writer_task.await;
        let _ = self.reader_task.await;
    }
}

fn unexpected_response(expected: &str, got: &RpcResponse) -> RepoError {
    RepoError::TransportError(format!("expected {expected} response, got {got:?}"))
}
