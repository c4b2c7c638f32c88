//! ControlPlane (C10): JSON-RPC 2.0 over NDJSON-framed Unix domain socket
//! connections, dispatching onto a shared `LoopScheduler`.

mod dispatch;
mod listener;
mod messages;

pub use dispatch::dispatch;
pub use listener::{ControlPlane, cleanup_socket, create_listener_at, handle_connection};
pub use messages::{RpcErrorObject, RpcRequest, RpcResponse, event_notification};
