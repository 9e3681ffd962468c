//! Supporting methods: server time, version handshake and platform status.

use serde::{Deserialize, Deserializer};
use serde_json::json;

use crate::call::CallOptions;
use crate::client::DeribitClient;
use crate::error::SessionResult;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerVersion {
    pub version: String,
}

/// Result of `public/status`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlatformStatus {
    #[serde(deserialize_with = "bool_or_string")]
    pub locked: bool,
    #[serde(default)]
    pub locked_indices: Vec<String>,
}

impl PlatformStatus {
    pub fn is_locked(&self) -> bool {
        self.locked || !self.locked_indices.is_empty()
    }
}

/// `locked` arrives as `true`/`false` or as `"true"`/`"false"`/`"partial"`.
fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(b) => b,
        Raw::Text(s) => s != "false",
    })
}

/// Sub-client for supporting methods.
pub struct Supporting<'a> {
    pub(crate) client: &'a DeribitClient,
}

impl<'a> Supporting<'a> {
    /// Server time in milliseconds since the Unix epoch.
    pub async fn get_time(&self) -> SessionResult<i64> {
        self.client
            .invoke("public/get_time", json!({}), CallOptions::new())
            .await
    }

    /// Introduce the client to the server.
    pub async fn hello(&self, client_name: &str, client_version: &str) -> SessionResult<ServerVersion> {
        self.client
            .invoke(
                "public/hello",
                json!({ "client_name": client_name, "client_version": client_version }),
                CallOptions::new(),
            )
            .await
    }

    pub async fn status(&self) -> SessionResult<PlatformStatus> {
        self.client
            .invoke("public/status", json!({}), CallOptions::new())
            .await
    }

    /// Round-trip check; also the reply to a heartbeat `test_request`.
    pub async fn test(&self) -> SessionResult<ServerVersion> {
        self.client
            .invoke("public/test", json!({}), CallOptions::new())
            .await
    }
}
