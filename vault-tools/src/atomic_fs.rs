//! Durable atomic-rename writes, used by the block store to persist sealed
//! records without ever leaving a half-written file at the final path.

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use vault_api_types::RepoError;

fn io_err(context: &str, err: std::io::Error) -> RepoError {
    RepoError::TransportError(format!("{context}: {err}"))
}

/// Write `data` to a temporary file inside `staging_dir`, `fsync` it, then
/// atomically rename it to `final_path`. The containing directory is
/// `fsync`ed after the rename so the rename itself survives a crash.
///
/// If `final_path` already exists by the time the rename would happen, the
/// caller is expected to have already checked for that (block store
/// `put_if_absent` semantics) — this function always overwrites, matching
/// `rename(2)`'s atomic-replace behavior.
pub fn write_atomic(staging_dir: &Path, final_path: &Path, data: &[u8]) -> Result<(), RepoError> {
    fs::create_dir_all(staging_dir).map_err(|err| io_err("create staging dir", err))?;
    fs::create_dir_all(
        final_path
            .parent()
            .ok_or_else(|| RepoError::ConfigError("final path has no parent".to_string()))?,
    )
    .map_err(|err| io_err("create block dir", err))?;

    let tmp = tempfile::NamedTempFile::new_in(staging_dir).map_err(|err| io_err("create tmp file", err))?;

    {
        let mut file = tmp.as_file();
        file.write_all(data).map_err(|err| io_err("write tmp file", err))?;
        file.sync_all().map_err(|err| io_err("fsync tmp file", err))?;
    }

    let persisted = tmp
        .persist(final_path)
        .map_err(|err| io_err("rename into place", err.error))?;
    persisted.sync_all().map_err(|err| io_err("fsync final file", err))?;
    drop(persisted);

    if let Some(dir) = final_path.parent() {
        let dir_handle = File::open(dir).map_err(|err| io_err("open dir for fsync", err))?;
        nix_fsync(dir_handle.as_raw_fd()).map_err(|err| io_err("fsync dir", err))?;
    }

    Ok(())
}

fn nix_fsync(fd: i32) -> std::io::Result<()> {
    let ret = unsafe { libc::fsync(fd) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_file_with_contents() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("tmp");
        let final_path = dir.path().join("aa").join("bb").join("hash");

        write_atomic(&staging, &final_path, b"hello").unwrap();
        assert_eq!(fs::read(&final_path).unwrap(), b"hello");
    }

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("tmp");
        let final_path = dir.path().join("blk");

        write_atomic(&staging, &final_path, b"first").unwrap();
        write_atomic(&staging, &final_path, b"second").unwrap();
        assert_eq!(fs::read(&final_path).unwrap(), b"second");
    }
}
