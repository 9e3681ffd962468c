//! JSON-RPC 2.0 envelopes as spoken by the Deribit WebSocket API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error code returned when the matching engine or gateway throttles a client.
pub const TOO_MANY_REQUESTS_CODE: i64 = 10028;

/// Error message paired with [`TOO_MANY_REQUESTS_CODE`].
pub const TOO_MANY_REQUESTS_MESSAGE: &str = "too_many_requests";

/// Outgoing request or notification. Notifications carry no `id`.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> RpcRequest<'a> {
    pub fn call(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params,
        }
    }

    pub fn notification(method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn too_many_requests() -> Self {
        Self::new(TOO_MANY_REQUESTS_CODE, TOO_MANY_REQUESTS_MESSAGE)
    }

    pub fn is_too_many_requests(&self) -> bool {
        is_too_many_requests(self.code, &self.message)
    }
}

pub fn is_too_many_requests(code: i64, message: &str) -> bool {
    code == TOO_MANY_REQUESTS_CODE || message == TOO_MANY_REQUESTS_MESSAGE
}

/// Methods under `private/` require an authenticated session.
pub fn is_private(method: &str) -> bool {
    method.starts_with("private/")
}

#[derive(Debug, Deserialize)]
struct RawIncoming {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Incoming {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let raw: RawIncoming = serde_json::from_str(text)?;
        match (raw.id, raw.method) {
            (Some(id), _) => {
                let outcome = match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(Incoming::Response { id, outcome })
            }
            (None, Some(method)) => Ok(Incoming::Notification {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (None, None) => Err(TransportError::Protocol(format!(
                "frame has neither id nor method: {}",
                text
            ))),
        }
    }
}
