//! High-level client: `DeribitClient` with nested sub-client accessors.
//!
//! The client owns one session: a state machine task, the request gate, the
//! rate limiter, the token lifecycle and the subscription registry. Typed
//! method wrappers live in `api/<name>.rs`; this module keeps the builder,
//! lifecycle operations and accessors.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::api::account::Account;
use crate::api::market_data::MarketData;
use crate::api::session_management::SessionManagement;
use crate::api::supporting::Supporting;
use crate::api::trading::Trading;
use crate::auth::{AuthRequest, AuthToken, Credentials, RequestSigner, SessionEvent};
use crate::call::CallOptions;
use crate::config::{PostAuthProbe, RateLimitConfig, ReconnectConfig, SessionConfig};
use crate::error::{SessionError, SessionResult};
use crate::session::machine::Fired;
use crate::session::{SessionCore, SessionState};
use crate::subscription::{spawn_listener, ChannelStream, SubscriptionMessage, SubscriptionRegistry};
use crate::transport::{Transport, WsTransport};

// Re-export sub-client types for convenience.
pub use crate::api::account::Account as AccountClient;
pub use crate::api::market_data::MarketData as MarketDataClient;
pub use crate::api::session_management::SessionManagement as SessionManagementClient;
pub use crate::api::supporting::Supporting as SupportingClient;
pub use crate::api::trading::Trading as TradingClient;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The primary entry point: one long-lived, reconnecting session.
///
/// Provides nested sub-client accessors for method groups:
/// `client.supporting()`, `client.account()`, etc.
pub struct DeribitClient {
    pub(crate) core: Arc<SessionCore>,
    registry: Arc<SubscriptionRegistry>,
    machine: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl DeribitClient {
    pub fn builder() -> DeribitClientBuilder {
        DeribitClientBuilder::default()
    }

    // ── Sub-client accessors ─────────────────────────────────────────────

    pub fn supporting(&self) -> Supporting<'_> {
        Supporting { client: self }
    }

    pub fn session_management(&self) -> SessionManagement<'_> {
        SessionManagement { client: self }
    }

    pub fn account(&self) -> Account<'_> {
        Account { client: self }
    }

    pub fn market_data(&self) -> MarketData<'_> {
        MarketData { client: self }
    }

    pub fn trading(&self) -> Trading<'_> {
        Trading { client: self }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Open the connection. Resolves once the session is connected,
    /// or with the transport error if the first attempt fails (reconnects
    /// continue in the background).
    pub async fn connect(&self) -> SessionResult<()> {
        self.core.fire_and_wait(Fired::Connect).await
    }

    /// Authenticate the live connection. The request is remembered and
    /// replayed after every reconnect until [`logout`](Self::logout).
    pub async fn authenticate(&self, request: AuthRequest) -> SessionResult<AuthToken> {
        if !self.state().is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.core.fire_and_wait(Fired::Authenticate(request)).await?;
        self.core
            .auth
            .current_token()
            .ok_or(SessionError::NotAuthenticated)
    }

    /// Authenticate with the configured credentials using a signed grant.
    pub async fn login(&self) -> SessionResult<AuthToken> {
        let credentials = self
            .core
            .config
            .credentials
            .clone()
            .ok_or_else(|| SessionError::Config("no credentials configured".into()))?;
        let signer = Arc::new(RequestSigner::new(
            credentials.client_id,
            credentials.client_secret,
        ));
        self.authenticate(AuthRequest::client_signature(signer)).await
    }

    /// Drop the token and stop replaying authentication. The connection
    /// stays up and the session returns to `Connected`.
    pub async fn logout(&self) -> SessionResult<()> {
        self.core.forget_auth();
        if !self.core.auth.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        let options = CallOptions::new().wait_for_connection(false);
        let sent = self.core.notify("private/logout", json!({}), options).await;
        if let Err(err) = self.core.fire_and_wait(Fired::LoggedOut).await {
            // Not in `Authenticated` (re-authenticating or already torn down).
            tracing::debug!("Logout outside Authenticated: {}", err);
            self.core.auth.set_logged_out();
        }
        sent
    }

    /// Close the connection without reconnecting. Subscriptions are kept
    /// and replayed on the next [`connect`](Self::connect).
    pub async fn disconnect(&self) -> SessionResult<()> {
        if self.state() == SessionState::Disconnected {
            return Ok(());
        }
        self.core.fire_and_wait(Fired::Disconnect).await
    }

    /// Stop the session for good. Pending and future calls fail with `NotConnected`.
    pub async fn shutdown(&self) {
        self.core.shutdown.cancel();
        let handles = [
            self.machine.lock().unwrap_or_else(PoisonError::into_inner).take(),
            self.listener.lock().unwrap_or_else(PoisonError::into_inner).take(),
        ];
        for handle in handles.into_iter().flatten() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Session task did not stop within {:?}", SHUTDOWN_TIMEOUT);
            }
        }
    }

    // ── State ────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.core.current_state()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.core.state.subscribe()
    }

    /// Wait until the session reaches `target`.
    pub async fn wait_for_state(&self, target: SessionState) -> SessionResult<()> {
        if self.core.wait_for(|state| state == target).await {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.core.auth.is_authenticated()
    }

    pub fn current_token(&self) -> Option<AuthToken> {
        self.core.auth.current_token()
    }

    /// Token lifecycle notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.auth.subscribe()
    }

    // ── Calls ────────────────────────────────────────────────────────────

    pub async fn invoke<T, P>(&self, method: &str, params: P, options: CallOptions) -> SessionResult<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let params = serde_json::to_value(params)?;
        let value = self.core.call(method, params, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn invoke_raw(
        &self,
        method: &str,
        params: Value,
        options: CallOptions,
    ) -> SessionResult<Value> {
        self.core.call(method, params, options).await
    }

    /// Send a notification; nothing is awaited beyond the write.
    pub async fn notify<P: Serialize>(
        &self,
        method: &str,
        params: P,
        options: CallOptions,
    ) -> SessionResult<()> {
        let params = serde_json::to_value(params)?;
        self.core.notify(method, params, options).await
    }

    // ── Subscriptions ────────────────────────────────────────────────────

    /// Subscribe; returns the channels the server confirmed.
    pub async fn subscribe<S: AsRef<str>>(&self, channels: &[S]) -> SessionResult<Vec<String>> {
        let channels: Vec<String> = channels.iter().map(|c| c.as_ref().to_string()).collect();
        self.registry.subscribe(&self.core, &channels).await
    }

    pub async fn unsubscribe<S: AsRef<str>>(&self, channels: &[S]) -> SessionResult<Vec<String>> {
        let channels: Vec<String> = channels.iter().map(|c| c.as_ref().to_string()).collect();
        self.registry.unsubscribe(&self.core, &channels).await
    }

    pub async fn unsubscribe_all(&self) -> SessionResult<()> {
        self.registry.unsubscribe_all(&self.core).await
    }

    /// Channels currently tracked for replay.
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.snapshot()
    }

    /// Live messages for `channel`, without subscribing.
    pub fn channel_stream<T>(&self, channel: impl Into<String>) -> ChannelStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        ChannelStream::new(self.core.inbound.subscribe(), channel.into())
    }

    /// Subscribe to one channel and stream its messages.
    pub async fn subscribe_channel<T>(&self, channel: impl Into<String>) -> SessionResult<ChannelStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let channel = channel.into();
        let stream = self.channel_stream(channel.clone());
        let confirmed = self.subscribe(&[channel.as_str()]).await?;
        if !confirmed.contains(&channel) {
            return Err(SessionError::SubscriptionRejected(channel));
        }
        Ok(stream)
    }

    /// Every subscription message, for all channels.
    pub fn inbound_events(&self) -> broadcast::Receiver<SubscriptionMessage> {
        self.core.inbound.subscribe()
    }
}

impl Drop for DeribitClient {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct DeribitClientBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl DeribitClientBuilder {
    pub fn url(mut self, url: &str) -> Self {
        self.config.url = url.to_string();
        self
    }

    pub fn testnet(self) -> Self {
        self.url(crate::network::TESTNET_WS_URL)
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn default_weight(mut self, weight: u32) -> Self {
        self.config.default_weight = weight;
        self
    }

    pub fn matching_weight(mut self, weight: u32) -> Self {
        self.config.matching_weight = weight;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    pub fn post_auth_probe(mut self, probe: PostAuthProbe) -> Self {
        self.config.post_auth_probe = Some(probe);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of a WebSocket to `url`.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Build the client and start its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> SessionResult<DeribitClient> {
        self.config.validate()?;
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(WsTransport::new(self.config.url.clone())),
        };

        let (core, machine) = SessionCore::start(self.config, transport);
        let registry = Arc::new(SubscriptionRegistry::new());
        let listener = spawn_listener(Arc::clone(&core), Arc::clone(&registry));

        Ok(DeribitClient {
            core,
            registry,
            machine: Mutex::new(Some(machine)),
            listener: Mutex::new(Some(listener)),
        })
    }
}
