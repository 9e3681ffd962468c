//! Typed wrappers over Deribit method groups.
//!
//! Each sub-module holds a borrowed sub-client (`client.supporting()`,
//! `client.trading()`, ...) plus the response types it decodes. Anything
//! not wrapped here is reachable through
//! [`DeribitClient::invoke`](crate::client::DeribitClient::invoke).

pub mod account;
pub mod market_data;
pub mod session_management;
pub mod supporting;
pub mod trading;

use serde_json::Value;

use crate::error::{SessionError, SessionResult};

/// Methods that acknowledge with the bare string `"ok"`.
pub(crate) fn expect_ok(method: &str, value: Value) -> SessionResult<()> {
    match value.as_str() {
        Some("ok") => Ok(()),
        _ => Err(SessionError::UnexpectedResponse {
            method: method.to_string(),
            body: value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expect_ok() {
        assert!(expect_ok("public/set_heartbeat", json!("ok")).is_ok());
        let err = expect_ok("public/set_heartbeat", json!({"x": 1})).unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnexpectedResponse { ref method, .. } if method == "public/set_heartbeat"
        ));
    }
}
