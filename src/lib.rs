//! `vault-backup`: a continuous, versioned, deduplicating, encrypting
//! file-backup engine.
//!
//! This crate is a thin umbrella over the workspace members that do the
//! actual work:
//!
//! - [`vault_api_types`] — shared data model, manifest, and RPC message types.
//! - [`vault_tools`] — crypto, compression, atomic filesystem writes, retry.
//! - [`vault_datastore`] — chunker, block store, catalog, version manager, GC.
//! - [`vault_protocol`] — wire framing and the server-side RPC dispatcher.
//! - [`vault_client`] — watcher/debouncer/committer pipeline and RPC client.
//!
//! The two binaries, `vault-agent` and `vault-client`, are the only code in
//! this crate proper.

pub use vault_api_types;
pub use vault_buildcfg;
pub use vault_client;
pub use vault_datastore;
pub use vault_protocol;
pub use vault_tools;
