//! The single `Repository` value: one per running `vault-agent` process,
//! constructed at startup and handed by reference to every RPC handler
//! (there is no other global process state).

use std::path::{Path, PathBuf};

use vault_api_types::{RepoError, RepositoryManifest};
use vault_tools::crypto::CryptConfig;

use crate::block_store::BlockStore;
use crate::catalog::Catalog;
use crate::manifest_io;

pub struct Repository {
    pub root: PathBuf,
    pub manifest: RepositoryManifest,
    pub crypto: CryptConfig,
    pub block_store: BlockStore,
    pub catalog: Catalog,
}

impl Repository {
    /// Initialize a brand-new repository at `root`: generates a KDF salt,
    /// derives the key from `passphrase`, writes the manifest, and creates
    /// the block store directories and catalog file. Fails if a manifest
    /// already exists.
    pub fn init(
        root: &Path,
        passphrase: &[u8],
        kdf_iterations: u32,
        chunker: vault_api_types::ChunkerParams,
        now: i64,
    ) -> Result<Self, RepoError> {
        if manifest_io::manifest_exists(root) {
            return Err(RepoError::ConfigError(format!(
                "repository already initialized at {}",
                root.display()
            )));
        }
        std::fs::create_dir_all(root)
            .map_err(|err| RepoError::ConfigError(format!("create repo root: {err}")))?;

        let salt = CryptConfig::random_salt()?;
        let kdf = vault_api_types::manifest::KdfParams {
            salt,
            iterations: kdf_iterations,
        };
        let manifest = RepositoryManifest {
            repo_format_version: vault_buildcfg::REPO_FORMAT_VERSION,
            chunker_format_version: vault_buildcfg::CHUNKER_FORMAT_VERSION,
            crypto_format_version: vault_buildcfg::CRYPTO_FORMAT_VERSION,
            chunker,
            kdf,
            created_at: now,
        };
        manifest_io::write_manifest(root, &manifest)?;

        let crypto = CryptConfig::derive(passphrase, &manifest.kdf)?;
        let block_store = BlockStore::open(root)?;
        let catalog = Catalog::open(&root.join(vault_buildcfg::CATALOG_FILE))?;

        Ok(Repository {
            root: root.to_path_buf(),
            manifest,
            crypto,
            block_store,
            catalog,
        })
    }

    /// Open an existing repository, deriving the key from `passphrase`
    /// against the persisted manifest. Fails `AuthFailure`-shaped errors
    /// surface lazily on the first `open()` of a sealed record, since the
    /// manifest carries no way to verify a passphrase up front.
    pub fn open(root: &Path, passphrase: &[u8]) -> Result<Self, RepoError> {
        let manifest = manifest_io::read_manifest(root)?;
        let crypto = CryptConfig::derive(passphrase, &manifest.kdf)?;
        let block_store = BlockStore::open(root)?;
        let catalog = Catalog::open(&root.join(vault_buildcfg::CATALOG_FILE))?;

        Ok(Repository {
            root: root.to_path_buf(),
            manifest,
            crypto,
            block_store,
            catalog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_open_round_trips_manifest_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(
            dir.path(),
            b"correct horse battery staple",
            100_000,
            vault_api_types::ChunkerParams::default(),
            1000,
        )
        .unwrap();
        let sealed = repo.crypto.seal(b"hello").unwrap();

        let reopened = Repository::open(dir.path(), b"correct horse battery staple").unwrap();
        let opened = reopened.crypto.open(&sealed).unwrap();
        assert_eq!(opened, b"hello");
    }

    #[test]
    fn init_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(
            dir.path(),
            b"pw",
            100_000,
            vault_api_types::ChunkerParams::default(),
            1000,
        )
        .unwrap();
        let err = Repository::init(
            dir.path(),
            b"pw",
            100_000,
            vault_api_types::ChunkerParams::default(),
            1000,
        )
        .unwrap_err();
        assert!(matches!(err, RepoError::ConfigError(_)));
    }

    #[test]
    fn open_with_wrong_passphrase_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(
            dir.path(),
            b"right",
            100_000,
            vault_api_types::ChunkerParams::default(),
            1000,
        )
        .unwrap();
        let sealed = repo.crypto.seal(b"secret").unwrap();

        let reopened = Repository::open(dir.path(), b"wrong").unwrap();
        assert!(reopened.crypto.open(&sealed).is_err());
    }
}
