use thiserror::Error;

/// The full error taxonomy the repository engine and its RPC surface can
/// raise. Every user-visible failure carries one of these kinds.
///
/// Display messages are safe to show a caller: they never include the
/// passphrase, derived key material, or raw ciphertext.
#[derive(Error, Debug)]
pub enum RepoError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("path escapes repository root: {path}")]
    PathEscape { path: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("authentication failure decrypting block {hash}")]
    AuthFailure { hash: String },

    #[error("malformed sealed record: {0}")]
    MalformedRecord(String),

    #[error("hash mismatch for chunk {expected}")]
    HashMismatch { expected: String },

    #[error("missing block referenced by commit: {hash}")]
    MissingBlock { hash: String },

    #[error("catalog conflict: {0}")]
    CatalogConflict(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl RepoError {
    /// The stable operator-facing exit code for this error kind, per the
    /// operator surface in the external interfaces section.
    pub fn exit_code(&self) -> i32 {
        match self {
            RepoError::ConfigError(_) => 2,
            RepoError::TransportError(_) => 3,
            RepoError::IntegrityViolation(_) => 4,
            RepoError::CatalogConflict(_) => 5,
            _ => 1,
        }
    }
}

pub type RepoResult<T> = std::result::Result<T, RepoError>;
