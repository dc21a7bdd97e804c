//! Chunking, content-addressed storage, metadata catalog, version manager,
//! and retention/GC for vault-backup repositories.

pub mod block_store;
pub mod catalog;
pub mod chunker;
pub mod manifest_io;
pub mod repository;
pub mod retention;
pub mod version_manager;

pub use block_store::BlockStore;
pub use catalog::Catalog;
pub use chunker::{ChunkBoundary, Chunker};
pub use repository::Repository;
pub use version_manager::VersionManager;
