//! Tally IPC
//!
//! JSON-RPC 2.0 server and client over Unix sockets. Each request and each
//! response is a single line of JSON. On other platforms the server and client
//! compile but every call fails as unsupported.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{IpcClient, IpcError};
pub use protocol::{RpcError, RpcRequest, RpcResponse};
pub use server::{HandlerFuture, IpcHandler, IpcServer};

/// Get the default socket path for a service.
///
/// - Linux: `$XDG_RUNTIME_DIR/{service}.sock` or `/tmp/{service}.sock`
/// - other unix: `/tmp/{service}.sock`
pub fn default_socket_path(service: &str) -> String {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_RUNTIME_DIR")
            .map(|dir| format!("{}/{}.sock", dir, service))
            .unwrap_or_else(|_| format!("/tmp/{}.sock", service))
    }
    #[cfg(not(target_os = "linux"))]
    {
        format!("/tmp/{}.sock", service)
    }
}
