//! Session management: heartbeats and cancel-on-disconnect.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::expect_ok;
use crate::call::CallOptions;
use crate::client::DeribitClient;
use crate::error::{SessionError, SessionResult};

/// Smallest heartbeat interval the server accepts, in seconds.
pub const MIN_HEARTBEAT_INTERVAL: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelScope {
    #[default]
    Connection,
    Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CancelOnDisconnect {
    pub scope: CancelScope,
    pub enabled: bool,
}

/// Sub-client for session management.
pub struct SessionManagement<'a> {
    pub(crate) client: &'a DeribitClient,
}

impl<'a> SessionManagement<'a> {
    /// Ask the server to send a heartbeat every `interval_secs`. The session
    /// answers each `test_request` on its own.
    pub async fn set_heartbeat(&self, interval_secs: u64) -> SessionResult<()> {
        if interval_secs < MIN_HEARTBEAT_INTERVAL {
            return Err(SessionError::Config(format!(
                "heartbeat interval must be at least {}s, got {}s",
                MIN_HEARTBEAT_INTERVAL, interval_secs
            )));
        }
        let method = "public/set_heartbeat";
        let value = self
            .client
            .invoke_raw(method, json!({ "interval": interval_secs }), CallOptions::new())
            .await?;
        expect_ok(method, value)
    }

    pub async fn disable_heartbeat(&self) -> SessionResult<()> {
        let method = "public/disable_heartbeat";
        let value = self
            .client
            .invoke_raw(method, json!({}), CallOptions::new())
            .await?;
        expect_ok(method, value)
    }

    pub async fn enable_cancel_on_disconnect(&self, scope: CancelScope) -> SessionResult<()> {
        let method = "private/enable_cancel_on_disconnect";
        let value = self
            .client
            .invoke_raw(method, json!({ "scope": scope }), CallOptions::new())
            .await?;
        expect_ok(method, value)
    }

    pub async fn disable_cancel_on_disconnect(&self, scope: CancelScope) -> SessionResult<()> {
        let method = "private/disable_cancel_on_disconnect";
        let value = self
            .client
            .invoke_raw(method, json!({ "scope": scope }), CallOptions::new())
            .await?;
        expect_ok(method, value)
    }

    pub async fn get_cancel_on_disconnect(&self, scope: CancelScope) -> SessionResult<CancelOnDisconnect> {
        self.client
            .invoke(
                "private/get_cancel_on_disconnect",
                json!({ "scope": scope }),
                CallOptions::new(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_scope_wire_names() {
        assert_eq!(serde_json::to_value(CancelScope::Account).unwrap(), json!("account"));
        let parsed: CancelOnDisconnect =
            serde_json::from_value(json!({"scope": "connection", "enabled": true})).unwrap();
        assert_eq!(parsed.scope, CancelScope::Connection);
        assert!(parsed.enabled);
    }
}
