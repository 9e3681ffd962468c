//! Transport seam: one physical JSON-RPC connection at a time.
//!
//! - [`native::WsTransport`] speaks JSON-RPC over `tokio-tungstenite`.
//! - [`memory::MemoryTransport`] is an in-process scripted peer.

pub mod memory;
pub mod native;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::rpc::RpcError;

pub use memory::{MemoryTransport, RecordedCall, Reply};
pub use native::WsTransport;

/// Server-initiated traffic and connection loss, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Notification { method: String, params: Value },
    /// The connection ended without being asked to. Always the last event.
    Closed(TransportError),
}

/// Why a request produced no result.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    Transport(TransportError),
    Remote(RpcError),
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        CallError::Transport(err)
    }
}

/// A live connection. Requests may be issued concurrently.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Send a request and await the reply matched by `id`.
    async fn request(&self, id: u64, method: &str, params: Value) -> Result<Value, CallError>;

    /// Send a notification; no reply is expected.
    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError>;

    /// Close the connection. Pending requests fail with `TransportError::Closed`.
    async fn close(&self);
}

pub struct OpenedConnection {
    pub connection: Arc<dyn Connection>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for OpenedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedConnection").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self) -> Result<OpenedConnection, TransportError>;
}
