//! Network URL constants for the Deribit WebSocket API.

/// Production WebSocket endpoint.
pub const MAINNET_WS_URL: &str = "wss://www.deribit.com/ws/api/v2";

/// Testnet WebSocket endpoint.
pub const TESTNET_WS_URL: &str = "wss://test.deribit.com/ws/api/v2";

/// Default WebSocket URL.
pub const DEFAULT_WS_URL: &str = MAINNET_WS_URL;
