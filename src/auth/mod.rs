//! Authentication: credentials, grant requests, tokens and the session that owns them.

pub mod session;
pub mod signer;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionResult;

pub use session::{AuthenticationSession, SessionEvent};
pub use signer::{RequestSigner, SignatureData};

/// API key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    ClientSignature,
    RefreshToken,
}

/// Grant material. Signatures are produced when the request is sent,
/// so a remembered request stays valid across reconnects.
#[derive(Clone)]
pub enum Grant {
    ClientCredentials(Credentials),
    ClientSignature {
        signer: Arc<RequestSigner>,
        data: String,
    },
    RefreshToken(String),
}

impl Grant {
    pub fn grant_type(&self) -> GrantType {
        match self {
            Grant::ClientCredentials(_) => GrantType::ClientCredentials,
            Grant::ClientSignature { .. } => GrantType::ClientSignature,
            Grant::RefreshToken(_) => GrantType::RefreshToken,
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::ClientCredentials(credentials) => {
                f.debug_tuple("ClientCredentials").field(credentials).finish()
            }
            Grant::ClientSignature { signer, data } => f
                .debug_struct("ClientSignature")
                .field("signer", signer)
                .field("data", data)
                .finish(),
            Grant::RefreshToken(_) => f.write_str("RefreshToken(..)"),
        }
    }
}

/// A `public/auth` request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub grant: Grant,
    pub state: Option<String>,
    pub scope: Option<String>,
}

impl AuthRequest {
    pub fn new(grant: Grant) -> Self {
        Self {
            grant,
            state: None,
            scope: None,
        }
    }

    pub fn client_credentials(credentials: Credentials) -> Self {
        Self::new(Grant::ClientCredentials(credentials))
    }

    pub fn client_signature(signer: Arc<RequestSigner>) -> Self {
        Self::new(Grant::ClientSignature {
            signer,
            data: String::new(),
        })
    }

    pub fn refresh_token(token: impl Into<String>) -> Self {
        Self::new(Grant::RefreshToken(token.into()))
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn grant_type(&self) -> GrantType {
        self.grant.grant_type()
    }

    /// Wire parameters, signing now when the grant needs it.
    pub fn to_params(&self) -> SessionResult<Value> {
        let mut params = AuthParams {
            grant_type: self.grant_type(),
            client_id: None,
            client_secret: None,
            refresh_token: None,
            timestamp: None,
            nonce: None,
            signature: None,
            data: None,
            state: self.state.clone(),
            scope: self.scope.clone(),
        };
        match &self.grant {
            Grant::ClientCredentials(credentials) => {
                params.client_id = Some(credentials.client_id.clone());
                params.client_secret = Some(credentials.client_secret.clone());
            }
            Grant::ClientSignature { signer, data } => {
                let signed = signer.sign(data)?;
                params.client_id = Some(signed.client_id);
                params.timestamp = Some(signed.timestamp);
                params.nonce = Some(signed.nonce);
                params.signature = Some(signed.signature);
                params.data = Some(signed.data);
            }
            Grant::RefreshToken(token) => {
                params.refresh_token = Some(token.clone());
            }
        }
        Ok(serde_json::to_value(params)?)
    }
}

#[derive(Serialize)]
struct AuthParams {
    grant_type: GrantType,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

/// Result of a successful `public/auth`.
#[derive(Clone, PartialEq, Deserialize)]
pub struct AuthToken {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(rename = "sid", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: u64,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl AuthToken {
    /// How long the token is treated as valid: one second short of `expires_in`.
    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.expires_in.saturating_sub(1))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + chrono::Duration::seconds(self.expires_in as i64)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("session_id", &self.session_id)
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_credentials_params() {
        let request = AuthRequest::client_credentials(Credentials::new("id", "secret"))
            .with_scope("session:main");
        let params = request.to_params().unwrap();
        assert_eq!(
            params,
            json!({
                "grant_type": "client_credentials",
                "client_id": "id",
                "client_secret": "secret",
                "scope": "session:main"
            })
        );
    }

    #[test]
    fn test_refresh_token_params() {
        let params = AuthRequest::refresh_token("r1").to_params().unwrap();
        assert_eq!(params, json!({"grant_type": "refresh_token", "refresh_token": "r1"}));
    }

    #[test]
    fn test_client_signature_resigns_each_time() {
        let signer = Arc::new(RequestSigner::with_seed("id", "secret", 100));
        let request = AuthRequest::client_signature(signer);
        let first = request.to_params().unwrap();
        let second = request.to_params().unwrap();
        assert_eq!(first["grant_type"], "client_signature");
        assert_eq!(first["client_id"], "id");
        assert_eq!(first["nonce"], "101");
        assert_eq!(second["nonce"], "102");
        assert!(first.get("client_secret").is_none());
    }

    #[test]
    fn test_auth_token_deserialize() {
        let token: AuthToken = serde_json::from_value(json!({
            "access_token": "acc",
            "expires_in": 31536000,
            "refresh_token": "ref",
            "scope": "connection mainaccount",
            "sid": "sid-1",
            "state": "s",
            "token_type": "bearer"
        }))
        .unwrap();
        assert_eq!(token.access_token, "acc");
        assert_eq!(token.session_id.as_deref(), Some("sid-1"));
        assert_eq!(token.validity(), Duration::from_secs(31535999));
        assert_eq!(
            token.expires_at() - token.issued_at,
            chrono::Duration::seconds(31536000)
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let request = AuthRequest::client_credentials(Credentials::new("id", "hunter2"));
        assert!(!format!("{:?}", request).contains("hunter2"));
        let request = AuthRequest::refresh_token("refresh-secret");
        assert!(!format!("{:?}", request).contains("refresh-secret"));
    }
}
