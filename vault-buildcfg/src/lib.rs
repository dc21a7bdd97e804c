//! Path and format-version constants for vault-backup repositories.

/// On-disk repository format version understood by this build. Bumped when
/// the manifest layout or block-store prefixing scheme changes.
pub const REPO_FORMAT_VERSION: u32 = 1;

/// Chunker parameter-set version stored in the manifest; bumped only if the
/// rolling-hash polynomial or default window/size constants change.
pub const CHUNKER_FORMAT_VERSION: u32 = 1;

/// Crypto record format version (flag byte layout, AEAD construction).
pub const CRYPTO_FORMAT_VERSION: u32 = 1;

/// Name of the repository manifest file, relative to the repository root.
pub const MANIFEST_FILE: &str = "manifest";

/// Name of the sqlite metadata catalog, relative to the repository root.
pub const CATALOG_FILE: &str = "catalog.db";

/// Name of the block-store root directory, relative to the repository root.
pub const BLOCKS_DIR: &str = "blocks";

/// Name of the block-store staging directory, relative to the repository root.
pub const TMP_DIR: &str = "tmp";

/// Default Unix socket path used by the reference `vault-agent` binary.
pub const DEFAULT_AGENT_SOCKET: &str = "/run/vault-backup/agent.sock";

/// Prepend the repository root to a relative on-disk component.
///
/// #### Example:
/// ```
/// use vault_buildcfg::repo_path;
/// let p = repo_path("/srv/repo", vault_buildcfg::MANIFEST_FILE);
/// assert_eq!(p, std::path::PathBuf::from("/srv/repo/manifest"));
/// ```
pub fn repo_path(repo_root: impl AsRef<std::path::Path>, component: &str) -> std::path::PathBuf {
    repo_root.as_ref().join(component)
}
