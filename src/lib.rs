//! # Deribit session client
//!
//! A long-lived client for the Deribit JSON-RPC API over WebSocket.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core**: Errors, configuration, JSON-RPC framing, per-call options
//! 2. **Transport**: `tokio-tungstenite` connections plus an in-memory transport for tests
//! 3. **Auth**: Grants, signed requests, and the token lifecycle
//! 4. **Session**: State machine, request gate, and rate limiter that every call passes through
//! 5. **Subscriptions**: Confirmed-channel registry replayed after reconnects, typed streams
//! 6. **High-Level Client**: `DeribitClient` with nested method-group sub-clients
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deribit_session::prelude::*;
//!
//! let client = DeribitClient::builder()
//!     .testnet()
//!     .credentials(Credentials::new("client_id", "client_secret"))
//!     .build()?;
//!
//! client.connect().await?;
//! client.login().await?;
//!
//! let mut ticks = client
//!     .subscribe_channel::<serde_json::Value>(channel::ticker("BTC-PERPETUAL", Interval::Ms100))
//!     .await?;
//! let summary = client.account().get_account_summary("BTC", false).await?;
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Unified session error types.
pub mod error;

/// Network URL constants.
pub mod network;

/// Session configuration and environment loading.
pub mod config;

/// JSON-RPC 2.0 framing.
pub mod rpc;

/// Per-call options: weight, deadline, cancellation.
pub mod call;

// ── Layer 2: Transport ───────────────────────────────────────────────────────

/// Connection abstraction with WebSocket and in-memory implementations.
pub mod transport;

// ── Layer 3: Auth ────────────────────────────────────────────────────────────

/// Authentication grants, request signing, and token lifecycle.
pub mod auth;

// ── Layer 4: Session ─────────────────────────────────────────────────────────

/// Weighted token bucket and rate-limit retries.
pub mod throttle;

/// Connection state machine and request gate.
pub mod session;

// ── Layer 5: Subscriptions ───────────────────────────────────────────────────

/// Subscription registry, channel names, and typed streams.
pub mod subscription;

// ── Layer 6: High-Level Client ───────────────────────────────────────────────

/// Typed wrappers over method groups.
pub mod api;

/// `DeribitClient`, the primary entry point.
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Client + sub-clients
    pub use crate::client::{
        AccountClient, DeribitClient, DeribitClientBuilder, MarketDataClient,
        SessionManagementClient, SupportingClient, TradingClient,
    };

    // Response types
    pub use crate::api::account::{AccountSummary, Position};
    pub use crate::api::market_data::{BookSummary, Instrument, InstrumentKind, OrderBook, Ticker};
    pub use crate::api::session_management::{CancelOnDisconnect, CancelScope};
    pub use crate::api::supporting::{PlatformStatus, ServerVersion};
    pub use crate::api::trading::{
        AdvancedType, Direction, EditOrderRequest, OpenOrdersFilter, Order, OrderResult, OrderType,
        PlaceOrderRequest, TimeInForce, Trade, TriggerType,
    };

    // Auth
    pub use crate::auth::{AuthRequest, AuthToken, Credentials, GrantType, RequestSigner, SessionEvent};

    // Calls + config
    pub use crate::call::{CallOptions, Deadline, Weight};
    pub use crate::config::{PostAuthProbe, ProbePolicy, RateLimitConfig, ReconnectConfig, SessionConfig};

    // Errors
    pub use crate::error::{SessionError, SessionResult, TransportError};

    // Network
    pub use crate::network::{DEFAULT_WS_URL, MAINNET_WS_URL, TESTNET_WS_URL};

    // Session
    pub use crate::session::SessionState;

    // Subscriptions
    pub use crate::subscription::channel;
    pub use crate::subscription::{ChannelStream, Interval, SubscriptionMessage};

    // Transports
    pub use crate::transport::{MemoryTransport, Reply, Transport, WsTransport};
}
