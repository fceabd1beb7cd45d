//! Remote backend: privileged browser calls relayed to the real extension
//! over a local WebSocket.

pub mod backend;
pub mod server;
pub mod wire;

pub use backend::RemoteBackend;
