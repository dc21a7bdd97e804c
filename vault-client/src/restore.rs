//! Client-side restore orchestration (§2 "Data flow for a restore").
//!
//! The agent streams sealed records in whatever order the catalog returned
//! them; the client is responsible for reordering by `sequence`, decrypting,
//! decompressing, and writing the reassembled file.

use std::path::Path;

use tokio::io::AsyncWriteExt;

use vault_api_types::RepoError;
use vault_tools::crypto::CryptConfig;
use vault_tools::record::open_chunk;

use crate::rpc_client::RpcClient;

/// Restore `(repo_path, version_id)` to `dest` on the local filesystem.
/// Fails with `AuthFailure` on the first block that does not decrypt, or
/// `HashMismatch` if a block decrypts but its plaintext doesn't match the
/// hash the committing client announced for it, aborting the restore for
/// this file per the error propagation policy — a partially-written `dest`
/// is left in place for forensic inspection rather than silently cleaned up.
pub async fn restore_to_path(
    client: &RpcClient,
    crypto: &CryptConfig,
    repo_path: &str,
    version_id: i64,
    dest: &Path,
) -> Result<u64, RepoError> {
    let mut chunks = client.restore(repo_path.to_string(), version_id).await?;
    chunks.sort_by_key(|c| c.sequence);

    let mut out = tokio::fs::File::create(dest)
        .await
        .map_err(|err| RepoError::TransportError(format!("create {}: {err}", dest.display())))?;

    let mut written = 0u64;
    for chunk in chunks {
        let plaintext = open_chunk(crypto, &chunk.record)?;
        if vault_tools::sha256(&plaintext) != chunk.chunk_hash {
            return Err(RepoError::HashMismatch {
                expected: chunk.chunk_hash.to_hex(),
            });
        }
        out.write_all(&plaintext)
            .await
            .map_err(|err| RepoError::TransportError(format!("write {}: {err}", dest.display())))?;
        written += plaintext.len() as u64;
    }
    out.flush()
        .await
        .map_err(|err| RepoError::TransportError(format!("flush {}: {err}", dest.display())))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_api_types::manifest::KdfParams;
    use vault_api_types::{Action, ChunkSpan};
    use vault_datastore::Repository;
    use vault_protocol::Dispatcher;

    #[tokio::test]
    async fn restore_reassembles_chunks_in_sequence_order() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(
            dir.path(),
            b"pw",
            KdfParams::MIN_ITERATIONS,
            vault_api_types::ChunkerParams::default(),
            1000,
        )
        .unwrap();
        let manifest = vault_datastore::manifest_io::read_manifest(dir.path()).unwrap();
        let crypto = CryptConfig::derive(b"pw", &manifest.kdf).unwrap();

        let plaintext_a = b"first-half-".to_vec();
        let plaintext_b = b"second-half".to_vec();
        let hash_a = vault_tools::sha256(&plaintext_a);
        let hash_b = vault_tools::sha256(&plaintext_b);

        let dispatcher = Dispatcher::new(repo);
        let (client_side, agent_side) = tokio::io::duplex(1 << 20);
        tokio::spawn(async move { dispatcher.serve_connection(agent_side).await });
        let client = RpcClient::new(client_side);

        let record_a = vault_tools::record::seal_chunk(&crypto, &plaintext_a, None).unwrap();
        let record_b = vault_tools::record::seal_chunk(&crypto, &plaintext_b, None).unwrap();
        client.put_chunk(hash_a, record_a).await.unwrap();
        client.put_chunk(hash_b, record_b).await.unwrap();

        let version_id = client
            .commit_version(
                "merged.bin".to_string(),
                Action::Created,
                vec![
                    ChunkSpan {
                        sequence: 0,
                        offset: 0,
                        length: plaintext_a.len() as u64,
                        hash: hash_a,
                    },
                    ChunkSpan {
                        sequence: 1,
                        offset: plaintext_a.len() as u64,
                        length: plaintext_b.len() as u64,
                        hash: hash_b,
                    },
                ],
                (plaintext_a.len() + plaintext_b.len()) as u64,
                false,
                Some(vault_tools::sha256(b"first-half-second-half")),
            )
            .await
            .unwrap();

        let dest = tempfile::NamedTempFile::new().unwrap();
        let written = restore_to_path(&client, &crypto, "merged.bin", version_id, dest.path())
            .await
            .unwrap();
        assert_eq!(written, 22);
        assert_eq!(std::fs::read(dest.path()).unwrap(), b"first-half-second-half");
        client.shutdown().await;
    }

    /// A block swapped out from under its announced hash decrypts cleanly
    /// (it is correctly sealed, just for the wrong plaintext), so only the
    /// hash check — not AEAD authentication — catches it.
    #[tokio::test]
    async fn restore_rejects_a_chunk_whose_plaintext_does_not_match_its_hash() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(
            dir.path(),
            b"pw",
            KdfParams::MIN_ITERATIONS,
            vault_api_types::ChunkerParams::default(),
            1000,
        )
        .unwrap();
        let manifest = vault_datastore::manifest_io::read_manifest(dir.path()).unwrap();
        let crypto = CryptConfig::derive(b"pw", &manifest.kdf).unwrap();

        let announced = b"expected-plaintext".to_vec();
        let hash = vault_tools::sha256(&announced);

        let dispatcher = Dispatcher::new(repo);
        let (client_side, agent_side) = tokio::io::duplex(1 << 20);
        tokio::spawn(async move { dispatcher.serve_connection(agent_side).await });
        let client = RpcClient::new(client_side);

        // Seal a different plaintext under the announced hash.
        let swapped_record = vault_tools::record::seal_chunk(&crypto, b"swapped-plaintext", None).unwrap();
        client.put_chunk(hash, swapped_record).await.unwrap();

        let version_id = client
            .commit_version(
                "a.txt".to_string(),
                Action::Created,
                vec![ChunkSpan {
                    sequence: 0,
                    offset: 0,
                    length: announced.len() as u64,
                    hash,
                }],
                announced.len() as u64,
                false,
                Some(hash),
            )
            .await
            .unwrap();

        let dest = tempfile::NamedTempFile::new().unwrap();
        let err = restore_to_path(&client, &crypto, "a.txt", version_id, dest.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::HashMismatch { .. }));
        client.shutdown().await;
    }
}
