//! IPC server
//!
//! Binds a Unix socket, accepts connections, and dispatches JSON-RPC requests
//! to an [`IpcHandler`]. Each connection is served on its own task and may
//! carry any number of requests, answered in order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::protocol::{RpcError, RpcRequest, RpcResponse, PARSE_ERROR};

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send + 'a>>;

/// Trait that services implement to handle IPC requests.
pub trait IpcHandler: Send + Sync + 'static {
    fn handle(&self, method: &str, params: Option<Value>) -> HandlerFuture<'_>;
}

pub struct IpcServer {
    socket_path: String,
}

impl IpcServer {
    pub fn new(socket_path: &str) -> Self {
        Self {
            socket_path: socket_path.to_string(),
        }
    }

    /// Serve connections until `shutdown` reads `true` or its sender is dropped.
    #[cfg(unix)]
    pub async fn run(
        &self,
        handler: Arc<dyn IpcHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        use tokio::net::UnixListener;

        // Remove stale socket
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {}", self.socket_path);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        tokio::spawn(Self::handle_connection(stream, handler.clone()));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("IPC server on {} stopped", self.socket_path);
        Ok(())
    }

    /// Unix sockets are the only transport; elsewhere the server cannot start.
    #[cfg(not(unix))]
    pub async fn run(
        &self,
        _handler: Arc<dyn IpcHandler>,
        _shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("cannot serve {}: unix sockets unavailable", self.socket_path),
        ))
    }

    #[cfg(unix)]
    async fn handle_connection(stream: tokio::net::UnixStream, handler: Arc<dyn IpcHandler>) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("IPC client disconnected");
                    break;
                }
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let response = dispatch(handler.as_ref(), line).await;
                    let json = match serde_json::to_string(&response) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to encode response: {}", e);
                            break;
                        }
                    };
                    if writer.write_all(format!("{}\n", json).as_bytes()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("IPC read error: {}", e);
                    break;
                }
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Parse one request line and run it through `handler`.
pub async fn dispatch(handler: &dyn IpcHandler, line: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(line) {
        Ok(req) => {
            debug!(method = %req.method, id = req.id, "IPC request");
            match handler.handle(&req.method, req.params).await {
                Ok(result) => RpcResponse::success(req.id, result),
                Err(err) => RpcResponse::error(Some(req.id), err),
            }
        }
        Err(e) => {
            warn!("Invalid JSON-RPC request: {}", e);
            RpcResponse::error(None, RpcError::new(PARSE_ERROR, format!("Parse error: {}", e)))
        }
    }
}
