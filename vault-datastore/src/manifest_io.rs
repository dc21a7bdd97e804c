//! Reads and writes the repository manifest file: `<repo_root>/manifest`,
//! JSON via `serde_json`. Written once at `init` and never rewritten.

use std::fs;
use std::path::Path;

use vault_api_types::{RepoError, RepositoryManifest};

pub fn write_manifest(repo_root: &Path, manifest: &RepositoryManifest) -> Result<(), RepoError> {
    let path = repo_root.join(vault_buildcfg::MANIFEST_FILE);
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|err| RepoError::ConfigError(format!("serialize manifest: {err}")))?;
    fs::write(&path, json).map_err(|err| RepoError::ConfigError(format!("write manifest: {err}")))
}

pub fn read_manifest(repo_root: &Path) -> Result<RepositoryManifest, RepoError> {
    let path = repo_root.join(vault_buildcfg::MANIFEST_FILE);
    let json = fs::read_to_string(&path).map_err(|_| RepoError::NotFound {
        what: format!("manifest at {}", path.display()),
    })?;
    serde_json::from_str(&json).map_err(|err| RepoError::MalformedRecord(format!("manifest: {err}")))
}

pub fn manifest_exists(repo_root: &Path) -> bool {
    repo_root.join(vault_buildcfg::MANIFEST_FILE).exists()
}
