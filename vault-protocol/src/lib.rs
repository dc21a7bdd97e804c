//! Wire framing and the agent-side RPC dispatcher (§4.8): one writer task
//! serializing catalog/block-store mutations plus a bounded pool of reader
//! tasks servicing pure-read RPCs concurrently, all multiplexed over a
//! single connection via client-assigned `request_id`s.

pub mod codec;
pub mod dispatcher;

pub use dispatcher::Dispatcher;
