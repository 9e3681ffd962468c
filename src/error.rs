//! Unified session error types.

use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::rpc::RpcError;
use crate::session::state::{SessionState, Trigger};

/// Top-level session error.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport fault: {0}")]
    TransportFault(#[from] TransportError),

    #[error("Connection lost while the call was in flight")]
    ConnectionLost,

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Timeout")]
    Timeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Trigger {trigger} is not permitted in state {state}")]
    InvalidTransition {
        state: SessionState,
        trigger: Trigger,
    },

    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(String),

    #[error("Unexpected response to {method}: {body}")]
    UnexpectedResponse { method: String, body: Value },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether this is the exchange's "too many requests" signal.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            SessionError::Remote { code, message, .. } => {
                crate::rpc::is_too_many_requests(*code, message)
            }
            _ => false,
        }
    }
}

impl From<RpcError> for SessionError {
    fn from(err: RpcError) -> Self {
        SessionError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Errors raised by a [`Transport`](crate::transport::Transport) or one of its connections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed ({code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub(crate) fn closed(reason: impl Into<String>) -> Self {
        TransportError::Closed {
            code: None,
            reason: reason.into(),
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::closed(err.to_string())
            }
            tungstenite::Error::Io(e) => TransportError::Connect(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
