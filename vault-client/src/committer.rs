//! Committer (§5 "Client-side"): drains the debounced event queue and drives
//! one delta-sync commit at a time. Uploads *within* a commit are pipelined
//! by the delta engine; across commits the committer is strictly
//! sequential, matching "processes one path at a time".

use tokio::sync::mpsc;

use vault_api_types::{Action, ChunkerParams};
use vault_tools::crypto::CryptConfig;

use crate::delta_engine::{self, CommitOutcome};
use crate::rpc_client::RpcClient;
use crate::watcher::ChangeEvent;

/// Drain `events` to completion, committing each one through `client`.
/// Returns once the channel closes (the debouncer and watcher have shut
/// down). A failed commit is logged and does not stop the loop — the next
/// debounced event for that path (or a future watcher re-scan) gets another
/// chance.
pub async fn run(
    mut events: mpsc::Receiver<ChangeEvent>,
    client: &RpcClient,
    crypto: &CryptConfig,
    chunker_params: ChunkerParams,
) {
    while let Some(event) = events.recv().await {
        match process_one(&event, client, crypto, chunker_params).await {
            Ok(Some(outcome)) => {
                log::info!(
                    "committed {} as version {} ({}/{} chunks uploaded)",
                    event.path,
                    outcome.version_id,
                    outcome.uploaded_chunks,
                    outcome.total_chunks
                );
            }
            Ok(None) => {
                log::info!("committed tombstone for {}", event.path);
            }
            Err(err) => {
                log::error!("commit failed for {}: {err}", event.path);
            }
        }
    }
}

async fn process_one(
    event: &ChangeEvent,
    client: &RpcClient,
    crypto: &CryptConfig,
    chunker_params: ChunkerParams,
) -> Result<Option<CommitOutcome>, vault_api_types::RepoError> {
    match event.action {
        Action::Deleted => {
            delta_engine::commit_deletion(client, &event.path).await?;
            Ok(None)
        }
        action => {
            let outcome = delta_engine::commit_file(
                client,
                crypto,
                chunker_params,
                &event.path,
                &event.local_path,
                action,
            )
            .await?;
            Ok(Some(outcome))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_api_types::manifest::KdfParams;
    use vault_datastore::Repository;
    use vault_protocol::Dispatcher;

    #[tokio::test]
    async fn committer_drains_a_created_event_into_a_version() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path(), b"pw", KdfParams::MIN_ITERATIONS, ChunkerParams::default(), 1000)
            .unwrap();
        let manifest = vault_datastore::manifest_io::read_manifest(dir.path()).unwrap();
        let crypto = CryptConfig::derive(b"pw", &manifest.kdf).unwrap();

        let dispatcher = Dispatcher::new(repo);
        let (client_side, agent_side) = tokio::io::duplex(1 << 20);
        tokio::spawn(async move { dispatcher.serve_connection(agent_side).await });
        let client = RpcClient::new(client_side);

        let source = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(source.path(), b"hello\n").unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(ChangeEvent {
            path: "a.txt".to_string(),
            local_path: source.path().to_path_buf(),
            action: Action::Created,
        })
        .await
        .unwrap();
        drop(tx);

        run(rx, &client, &crypto, ChunkerParams::default()).await;

        let versions = client.list_versions("a.txt".to_string()).await.unwrap();
        assert_eq!(versions.len(), 1);
        client.shutdown().await;
    }
}
