use serde::{Deserialize, Serialize};

/// Rolling-hash chunker parameters. Persisted verbatim in the repository
/// manifest at init so a repository remains chunk-compatible across
/// versions of the software even if the compiled-in defaults change later.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkerParams {
    /// Rolling-hash window size in bytes.
    pub window: u32,
    pub min_size: u32,
    pub avg_size: u32,
    pub max_size: u32,
}

impl ChunkerParams {
    pub const DEFAULT_WINDOW: u32 = 48;
    pub const DEFAULT_MIN: u32 = 2 * 1024;
    pub const DEFAULT_AVG: u32 = 8 * 1024;
    pub const DEFAULT_MAX: u32 = 64 * 1024;

    /// `rolling_hash & mask == 0` is the boundary test; `mask = avg_size - 1`.
    pub fn mask(&self) -> u32 {
        self.avg_size - 1
    }
}

impl Default for ChunkerParams {
    fn default() -> Self {
        ChunkerParams {
            window: Self::DEFAULT_WINDOW,
            min_size: Self::DEFAULT_MIN,
            avg_size: Self::DEFAULT_AVG,
            max_size: Self::DEFAULT_MAX,
        }
    }
}

/// PBKDF2-HMAC-SHA-256 key derivation parameters. The salt is generated once
/// at repository init and stored here in cleartext; only the passphrase
/// (never persisted) combines with it to derive the AES-256 key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    #[serde(with = "hex::serde")]
    pub salt: [u8; 16],
    pub iterations: u32,
}

impl KdfParams {
    pub const MIN_ITERATIONS: u32 = 100_000;
}

/// The repository manifest: `<repo_root>/manifest`. Written once at `init`
/// and never rewritten afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryManifest {
    pub repo_format_version: u32,
    pub chunker_format_version: u32,
    pub crypto_format_version: u32,
    pub chunker: ChunkerParams,
    pub kdf: KdfParams,
    pub created_at: i64,
}
