//! Metadata catalog: the single-writer transactional store of §3/§4.5,
//! backed by SQLite. Holds the `files`, `versions`, `chunks`, and
//! `version_chunks` tables; every state-mutating operation runs inside a
//! transaction so a crash mid-commit leaves either all of {Version,
//! VersionChunks, refcount increments} or none.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use vault_api_types::{
    Action, ChunkHash, ChunkRow, ChunkSpan, FileRow, RepoError, RepoPath, RepoStats, VersionChunkRow,
    VersionRow,
};

#[derive(Clone)]
pub struct Catalog {
    conn: Arc<Mutex<Connection>>,
}

impl Catalog {
    pub fn open(db_path: &Path) -> Result<Self, RepoError> {
        let conn = Connection::open(db_path)
            .map_err(|err| RepoError::ConfigError(format!("open catalog: {err}")))?;
        let catalog = Catalog {
            conn: Arc::new(Mutex::new(conn)),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, RepoError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| RepoError::ConfigError(format!("open catalog: {err}")))?;
        let catalog = Catalog {
            conn: Arc::new(Mutex::new(conn)),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;",
        )
        .map_err(sql_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                first_seen_at INTEGER NOT NULL,
                last_action TEXT NOT NULL,
                current_size INTEGER NOT NULL
            )",
            [],
        )
        .map_err(sql_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS versions (
                version_id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                action TEXT NOT NULL,
                plain_size INTEGER NOT NULL,
                stored_size INTEGER NOT NULL,
                is_compressed INTEGER NOT NULL,
                content_hash TEXT,
                FOREIGN KEY (path) REFERENCES files(path)
            )",
            [],
        )
        .map_err(sql_err)?;
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_versions_path_timestamp
             ON versions(path, timestamp)",
            [],
        )
        .map_err(sql_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_hash TEXT PRIMARY KEY,
                plain_size INTEGER NOT NULL,
                stored_size INTEGER NOT NULL,
                refcount INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(sql_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS version_chunks (
                version_id INTEGER NOT NULL,
                sequence INTEGER NOT NULL,
                chunk_hash TEXT NOT NULL,
                offset INTEGER NOT NULL,
                length INTEGER NOT NULL,
                PRIMARY KEY (version_id, sequence),
                FOREIGN KEY (version_id) REFERENCES versions(version_id),
                FOREIGN KEY (chunk_hash) REFERENCES chunks(chunk_hash)
            )",
            [],
        )
        .map_err(sql_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_version_chunks_hash
             ON version_chunks(chunk_hash)",
            [],
        )
        .map_err(sql_err)?;

        Ok(())
    }

    /// Steps 1-5 of the commit protocol (§4.7), run in a single transaction.
    /// Retries the caller's timestamp choice is the caller's job; this
    /// returns `CatalogConflict` on a `(path, timestamp)` collision so the
    /// caller can regenerate and retry (up to three times per propagation
    /// policy).
    pub fn commit_version(
        &self,
        path: &RepoPath,
        timestamp: i64,
        action: Action,
        chunks: &[ChunkSpan],
        plain_size: u64,
        is_compressed: bool,
        content_hash: Option<ChunkHash>,
        block_size: impl Fn(&ChunkHash) -> Option<u64>,
    ) -> Result<i64, RepoError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(sql_err)?;

        let already_known: Option<i64> = tx
            .query_row(
                "SELECT first_seen_at FROM files WHERE path = ?1",
                params![path.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        if already_known.is_none() {
            tx.execute(
                "INSERT INTO files (path, first_seen_at, last_action, current_size)
                 VALUES (?1, ?2, ?3, ?4)",
                params![path.as_str(), timestamp, action.as_str(), plain_size],
            )
            .map_err(sql_err)?;
        }

        // stored_size is filled in after the per-chunk loop below, once the
        // actual on-disk block sizes are known; start at 0 and update.
        let insert_result = tx.execute(
            "INSERT INTO versions
             (path, timestamp, action, plain_size, stored_size, is_compressed, content_hash)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
            params![
                path.as_str(),
                timestamp,
                action.as_str(),
                plain_size,
                is_compressed,
                content_hash.map(|h| h.to_hex()),
            ],
        );
        match insert_result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(RepoError::CatalogConflict(format!(
                    "version already exists for {path} at {timestamp}"
                )));
            }
            Err(err) => return Err(sql_err(err)),
        }
        let version_id = tx.last_insert_rowid();

        let mut total_stored_size: u64 = 0;
        if action != Action::Deleted {
            for span in chunks {
                let stored_len = match block_size(&span.hash) {
                    Some(len) => len,
                    None => {
                        return Err(RepoError::MissingBlock {
                            hash: span.hash.to_hex(),
                        })
                    }
                };
                total_stored_size += stored_len;

                let existing_chunk: Option<i64> = tx
                    .query_row(
                        "SELECT refcount FROM chunks WHERE chunk_hash = ?1",
                        params![span.hash.to_hex()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(sql_err)?;
                if existing_chunk.is_none() {
                    tx.execute(
                        "INSERT INTO chunks (chunk_hash, plain_size, stored_size, refcount, created_at)
                         VALUES (?1, ?2, ?3, 0, ?4)",
                        params![span.hash.to_hex(), span.length, stored_len, timestamp],
                    )
                    .map_err(sql_err)?;
                }

                tx.execute(
                    "INSERT INTO version_chunks (version_id, sequence, chunk_hash, offset, length)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![version_id, span.sequence, span.hash.to_hex(), span.offset, span.length],
                )
                .map_err(sql_err)?;

                tx.execute(
                    "UPDATE chunks SET refcount = refcount + 1 WHERE chunk_hash = ?1",
                    params![span.hash.to_hex()],
                )
                .map_err(sql_err)?;
            }
        }

        tx.execute(
            "UPDATE versions SET stored_size = ?1 WHERE version_id = ?2",
            params![total_stored_size, version_id],
        )
        .map_err(sql_err)?;

        tx.execute(
            "UPDATE files SET last_action = ?1, current_size = ?2 WHERE path = ?3",
            params![action.as_str(), plain_size, path.as_str()],
        )
        .map_err(sql_err)?;

        tx.commit().map_err(sql_err)?;
        Ok(version_id)
    }

    pub fn get_file(&self, path: &RepoPath) -> Result<Option<FileRow>, RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT path, first_seen_at, last_action, current_size FROM files WHERE path = ?1",
            params![path.as_str()],
            row_to_file,
        )
        .optional()
        .map_err(sql_err)
    }

    pub fn list_files(&self) -> Result<Vec<FileRow>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT path, first_seen_at, last_action, current_size FROM files ORDER BY path")
            .map_err(sql_err)?;
        stmt.query_map([], row_to_file)
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)
    }

    pub fn list_versions(&self, path: &RepoPath) -> Result<Vec<VersionRow>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT version_id, path, timestamp, action, plain_size, stored_size, is_compressed, content_hash
                 FROM versions WHERE path = ?1 ORDER BY timestamp",
            )
            .map_err(sql_err)?;
        stmt.query_map(params![path.as_str()], row_to_version)
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)
    }

    pub fn get_version(&self, version_id: i64) -> Result<Option<VersionRow>, RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT version_id, path, timestamp, action, plain_size, stored_size, is_compressed, content_hash
             FROM versions WHERE version_id = ?1",
            params![version_id],
            row_to_version,
        )
        .optional()
        .map_err(sql_err)
    }

    pub fn version_chunks(&self, version_id: i64) -> Result<Vec<VersionChunkRow>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT version_id, sequence, chunk_hash, offset, length
                 FROM version_chunks WHERE version_id = ?1 ORDER BY sequence",
            )
            .map_err(sql_err)?;
        stmt.query_map(params![version_id], row_to_version_chunk)
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)
    }

    pub fn get_chunk(&self, hash: &ChunkHash) -> Result<Option<ChunkRow>, RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT chunk_hash, plain_size, stored_size, refcount, created_at
             FROM chunks WHERE chunk_hash = ?1",
            params![hash.to_hex()],
            row_to_chunk,
        )
        .optional()
        .map_err(sql_err)
    }

    pub fn stats(&self) -> Result<RepoStats, RepoError> {
        let conn = self.conn.lock().unwrap();
        let file_count: u64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .map_err(sql_err)?;
        let version_count: u64 = conn
            .query_row("SELECT COUNT(*) FROM versions", [], |row| row.get(0))
            .map_err(sql_err)?;
        let (chunk_count, total_stored_bytes, total_plain_bytes): (u64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(stored_size), 0), COALESCE(SUM(plain_size), 0) FROM chunks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(sql_err)?;
        Ok(RepoStats {
            file_count,
            version_count,
            chunk_count,
            total_stored_bytes: total_stored_bytes as u64,
            total_plain_bytes: total_plain_bytes as u64,
        })
    }

    /// Every Version for `path` except the most recent, with `timestamp`
    /// older than the retention cutoff. Used by GC phase A (§4.9).
    pub fn expirable_versions(
        &self,
        path: &RepoPath,
        cutoff: i64,
    ) -> Result<Vec<i64>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let latest: Option<i64> = conn
            .query_row(
                "SELECT version_id FROM versions WHERE path = ?1 ORDER BY timestamp DESC LIMIT 1",
                params![path.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        let mut stmt = conn
            .prepare("SELECT version_id FROM versions WHERE path = ?1 AND timestamp < ?2")
            .map_err(sql_err)?;
        let ids = stmt
            .query_map(params![path.as_str(), cutoff], |row| row.get::<_, i64>(0))
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?;
        Ok(ids.into_iter().filter(|id| Some(*id) != latest).collect())
    }

    pub fn all_paths(&self) -> Result<Vec<RepoPath>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path FROM files").map_err(sql_err)?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?;
        Ok(paths.into_iter().map(RepoPath::from_normalized).collect())
    }

    /// Delete a Version and its VersionChunks, decrementing referenced
    /// chunks' refcounts. Transactional (§4.9 phase A).
    pub fn expire_version(&self, version_id: i64) -> Result<(), RepoError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(sql_err)?;
        let hashes: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT chunk_hash FROM version_chunks WHERE version_id = ?1")
                .map_err(sql_err)?;
            stmt.query_map(params![version_id], |row| row.get(0))
                .map_err(sql_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_err)?
        };
        tx.execute(
            "DELETE FROM version_chunks WHERE version_id = ?1",
            params![version_id],
        )
        .map_err(sql_err)?;
        for hash in &hashes {
            tx.execute(
                "UPDATE chunks SET refcount = refcount - 1 WHERE chunk_hash = ?1",
                params![hash],
            )
            .map_err(sql_err)?;
        }
        tx.execute("DELETE FROM versions WHERE version_id = ?1", params![version_id])
            .map_err(sql_err)?;
        tx.commit().map_err(sql_err)?;
        Ok(())
    }

    /// Chunk hashes with `refcount = 0`, candidates for GC phase B.
    pub fn zero_refcount_chunks(&self) -> Result<Vec<ChunkHash>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT chunk_hash FROM chunks WHERE refcount = 0")
            .map_err(sql_err)?;
        let hashes = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?;
        hashes
            .into_iter()
            .map(|hex| {
                hex.parse::<ChunkHash>()
                    .map_err(|err| RepoError::MalformedRecord(format!("bad chunk_hash in catalog: {err}")))
            })
            .collect()
    }

    /// Delete the Chunk row for `hash`. Caller deletes the block file after
    /// this succeeds (§4.9 ordering invariant).
    pub fn delete_chunk_row(&self, hash: &ChunkHash) -> Result<(), RepoError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM chunks WHERE chunk_hash = ?1", params![hash.to_hex()])
            .map_err(sql_err)?;
        Ok(())
    }

    pub fn all_chunk_hashes(&self) -> Result<Vec<ChunkHash>, RepoError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT chunk_hash FROM chunks").map_err(sql_err)?;
        let hashes = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?;
        hashes
            .into_iter()
            .map(|hex| {
                hex.parse::<ChunkHash>()
                    .map_err(|err| RepoError::MalformedRecord(format!("bad chunk_hash in catalog: {err}")))
            })
            .collect()
    }
}

fn sql_err(err: rusqlite::Error) -> RepoError {
    RepoError::TransportError(format!("catalog: {err}"))
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileRow> {
    let path: String = row.get(0)?;
    let action: String = row.get(2)?;
    Ok(FileRow {
        path: RepoPath::from_normalized(path),
        first_seen_at: row.get(1)?,
        last_action: action.parse().unwrap_or(Action::Modified),
        current_size: row.get(3)?,
    })
}

fn row_to_version(row: &rusqlite::Row) -> rusqlite::Result<VersionRow> {
    let path: String = row.get(1)?;
    let action: String = row.get(3)?;
    let content_hash: Option<String> = row.get(7)?;
    Ok(VersionRow {
        version_id: row.get(0)?,
        path: RepoPath::from_normalized(path),
        timestamp: row.get(2)?,
        action: action.parse().unwrap_or(Action::Modified),
        plain_size: row.get(4)?,
        stored_size: row.get(5)?,
        is_compressed: row.get(6)?,
        content_hash: content_hash.and_then(|s| s.parse().ok()),
    })
}

fn row_to_version_chunk(row: &rusqlite::Row) -> rusqlite::Result<VersionChunkRow> {
    let hash: String = row.get(2)?;
    Ok(VersionChunkRow {
        version_id: row.get(0)?,
        sequence: row.get(1)?,
        chunk_hash: hash.parse().unwrap_or_else(|_| ChunkHash::new([0u8; 32])),
        offset: row.get(3)?,
        length: row.get(4)?,
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<ChunkRow> {
    let hash: String = row.get(0)?;
    Ok(ChunkRow {
        chunk_hash: hash.parse().unwrap_or_else(|_| ChunkHash::new([0u8; 32])),
        plain_size: row.get(1)?,
        stored_size: row.get(2)?,
        refcount: row.get(3)?,
        created_at: row.get(4)?,
    })
}
