//! IPC client
//!
//! Each call opens a fresh connection to the daemon socket, writes one
//! request line and reads one response line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::protocol::{RpcError, RpcRequest, RpcResponse};

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("daemon not running at {0}")]
    NotRunning(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("daemon error {}: {}", .0.code, .0.message)]
    Remote(RpcError),
    #[error("IPC needs unix sockets, unavailable on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, IpcError>;

/// Client for a daemon's IPC socket.
pub struct IpcClient {
    socket_path: String,
    next_id: AtomicU64,
}

impl IpcClient {
    pub fn new(socket_path: &str) -> Self {
        Self {
            socket_path: socket_path.to_string(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn socket_path(&self) -> &str {
        &self.socket_path
    }

    /// Call `method` and decode its result as `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| IpcError::InvalidResponse(format!("{method}: {e}")))
    }

    /// Call `method` and return its raw result.
    #[cfg(unix)]
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::UnixStream;

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|_| IpcError::NotRunning(self.socket_path.clone()))?;
        let (reader, mut writer) = stream.into_split();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        let mut line = serde_json::to_string(&request)
            .map_err(|e| IpcError::Connection(e.to_string()))?;
        debug!(method, id, "IPC request");
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| IpcError::Connection(e.to_string()))?;

        let mut reply = String::new();
        let read = BufReader::new(reader)
            .read_line(&mut reply)
            .await
            .map_err(|e| IpcError::Connection(e.to_string()))?;
        if read == 0 {
            return Err(IpcError::Connection("closed before responding".into()));
        }

        let response: RpcResponse = serde_json::from_str(reply.trim())
            .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;
        into_result(id, response)
    }

    #[cfg(not(unix))]
    pub async fn call(&self, _method: &str, _params: Option<Value>) -> Result<Value> {
        Err(IpcError::Unsupported)
    }

    /// Whether something accepts connections on the socket.
    #[cfg(unix)]
    pub async fn is_daemon_running(&self) -> bool {
        tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .is_ok()
    }

    #[cfg(not(unix))]
    pub async fn is_daemon_running(&self) -> bool {
        false
    }

    /// Poll until the daemon accepts connections or `timeout` passes.
    pub async fn wait_until_running(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_daemon_running().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn into_result(id: u64, response: RpcResponse) -> Result<Value> {
    if let Some(err) = response.error {
        return Err(IpcError::Remote(err));
    }
    if response.id != Some(id) {
        return Err(IpcError::InvalidResponse(format!(
            "expected id {id}, got {:?}",
            response.id
        )));
    }
    response
        .result
        .ok_or_else(|| IpcError::InvalidResponse("no result".into()))
}
