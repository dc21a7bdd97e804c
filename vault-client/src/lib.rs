//! The continuous-backup client pipeline: filesystem watcher adapter,
//! debouncer, committer, delta-sync engine, restore orchestration, and the
//! RPC connection they share with one `vault-agent`.

pub mod committer;
pub mod debouncer;
pub mod delta_engine;
pub mod restore;
pub mod rpc_client;
pub mod watcher;

pub use rpc_client::RpcClient;
