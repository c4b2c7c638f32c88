//! ControlPlane (C10): a JSON-RPC 2.0 server over NDJSON-framed Unix domain
//! socket streams, standing in locally for the overlay-network transport the
//! core is designed against (see `LoopScheduler`'s `ziti_status: "disabled"`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::scheduler::{LoopScheduler, SubscriberId};

use super::dispatch::dispatch;
use super::messages::{INVALID_REQUEST, PARSE_ERROR, RpcErrorObject, RpcRequest, RpcResponse, event_notification};

/// Matches the JSON-RPC request size the teacher's local IPC socket enforces;
/// control-plane payloads (prompts, worktree paths) run larger.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

pub struct ControlPlane {
    socket_path: PathBuf,
    scheduler: Arc<LoopScheduler>,
}

impl ControlPlane {
    pub fn new(socket_path: PathBuf, scheduler: Arc<LoopScheduler>) -> Self {
        Self { socket_path, scheduler }
    }

    /// Bind the socket and accept connections until the process is killed.
    /// Each connection is handled on its own task.
    pub async fn serve(self) -> Result<()> {
        let (listener, path) = create_listener_at(&self.socket_path)?;
        info!(?path, "ControlPlane::serve: listening");

        loop {
            let (stream, _) = listener.accept().await.context("failed to accept control-plane connection")?;
            let scheduler = Arc::clone(&self.scheduler);
            tokio::spawn(async move {
                handle_connection(stream, scheduler).await;
            });
        }
    }
}

pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: creating control-plane socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("failed to bind control-plane socket")?;
    Ok((listener, socket_path.to_path_buf()))
}

pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "cleanup_socket: failed to remove socket file");
        }
    }
}

pub async fn handle_connection(stream: UnixStream, scheduler: Arc<LoopScheduler>) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let mut reader = BufReader::new(read_half);
    let mut subscription: Option<SubscriberId> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "handle_connection: read error, closing connection");
                break;
            }
        };

        if bytes_read > MAX_MESSAGE_SIZE {
            write_response(&writer, RpcResponse::error(Value::Null, RpcErrorObject::new(PARSE_ERROR, "message too large"))).await;
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        debug!(request = %&trimmed[..trimmed.len().min(200)], "handle_connection: received request");

        let request: RpcRequest = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(_) => {
                write_response(&writer, RpcResponse::error(Value::Null, RpcErrorObject::new(PARSE_ERROR, "Parse error"))).await;
                continue;
            }
        };

        if request.jsonrpc.as_deref() != Some("2.0") {
            if let Some(id) = request.id.clone() {
                write_response(&writer, RpcResponse::error(id, RpcErrorObject::new(INVALID_REQUEST, "Invalid JSON-RPC version"))).await;
            }
            continue;
        }

        let Some(method) = request.method.clone() else {
            if let Some(id) = request.id.clone() {
                write_response(&writer, RpcResponse::error(id, RpcErrorObject::new(INVALID_REQUEST, "Missing method"))).await;
            }
            continue;
        };

        let is_notification = request.id.is_none();

        if method == "subscribe_events" {
            if subscription.is_none() {
                let (id, rx) = scheduler.broadcaster().subscribe().await;
                subscription = Some(id);
                tokio::spawn(forward_events(rx, Arc::clone(&writer)));
                debug!("handle_connection: client subscribed to events");
            }
            if !is_notification {
                write_response(&writer, RpcResponse::success(request.id.clone().unwrap(), json!({"subscribed": true}))).await;
            }
            continue;
        }

        let result = dispatch(&scheduler, &method, request.params.clone()).await;
        if is_notification {
            continue;
        }
        let id = request.id.clone().unwrap_or(Value::Null);
        let response = match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(err) => RpcResponse::error(id, err),
        };
        write_response(&writer, response).await;
    }

    if let Some(id) = subscription {
        scheduler.broadcaster().unsubscribe(id).await;
        debug!("handle_connection: client unsubscribed from events on disconnect");
    }
}

async fn forward_events(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<crate::domain::LoopEvent>,
    writer: Arc<Mutex<tokio::net::unix::OwnedWriteHalf>>,
) {
    while let Some(event) = rx.recv().await {
        let params = serde_json::to_value(&event).unwrap_or(Value::Null);
        let line = event_notification(params);
        let mut w = writer.lock().await;
        if w.write_all(line.as_bytes()).await.is_err() || w.flush().await.is_err() {
            debug!("forward_events: write failed, stopping event forwarder");
            return;
        }
    }
}

async fn write_response(writer: &Arc<Mutex<tokio::net::unix::OwnedWriteHalf>>, response: RpcResponse) {
    let line = response.to_line();
    let mut w = writer.lock().await;
    if let Err(e) = w.write_all(line.as_bytes()).await {
        debug!(error = %e, "write_response: failed to write");
        return;
    }
    let _ = w.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    fn test_scheduler(root: &std::path::Path) -> Arc<LoopScheduler> {
        Arc::new(LoopScheduler::new(SchedulerConfig {
            workspace_dir: root.join("workspaces"),
            max_concurrent_loops: 2,
            loop_timeout_hours: 24,
            registry_path: root.join("loop_registry.json"),
        }))
    }

    #[tokio::test]
    async fn create_listener_removes_stale_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("control.sock");
        std::fs::write(&socket_path, "stale").unwrap();
        let result = create_listener_at(&socket_path);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn list_loops_round_trip_over_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("control.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let scheduler = test_scheduler(dir.path());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, scheduler).await;
        });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        client.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"list_loops\",\"params\":{}}\n").await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        let response: Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(response["result"]["count"], 0);

        drop(client);
        let _ = server.await;
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("control.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();
        let scheduler = test_scheduler(dir.path());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, scheduler).await;
        });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        client.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"nonexistent\",\"params\":{}}\n").await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        let response: Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(response["error"]["code"], -32601);

        drop(client);
        let _ = server.await;
    }
}
