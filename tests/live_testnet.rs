//! Integration tests against the Deribit testnet.
//!
//! All tests are `#[ignore]` because they require network access. The
//! authenticated ones also need `DERIBIT_CLIENT_ID` and `DERIBIT_CLIENT_SECRET`,
//! read from the environment or a `.env` file.
//!
//! Run with:
//! ```bash
//! cargo test --test live_testnet -- --ignored
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::timeout;

use deribit_session::prelude::*;

const TEST_TIMEOUT: Duration = Duration::from_secs(15);

fn testnet_config() -> SessionConfig {
    dotenvy::dotenv().ok();
    let mut config = SessionConfig::from_env().expect("environment should be consistent");
    config.url = TESTNET_WS_URL.to_string();
    config
}

async fn connected_client() -> DeribitClient {
    let client = DeribitClient::builder()
        .config(testnet_config())
        .build()
        .expect("build should succeed");
    timeout(TEST_TIMEOUT, client.connect())
        .await
        .expect("timed out connecting")
        .expect("connect should succeed");
    client
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore]
async fn test_public_calls() {
    let client = connected_client().await;

    let version = client
        .supporting()
        .hello("deribit-session", env!("CARGO_PKG_VERSION"))
        .await
        .expect("hello should succeed");
    assert!(!version.version.is_empty());

    let time = client.supporting().get_time().await.expect("get_time should succeed");
    assert!(time > 0);

    client.supporting().status().await.expect("status should succeed");
    client.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn test_ticker_stream() {
    let client = connected_client().await;
    let channel = channel::ticker("BTC-PERPETUAL", Interval::Ms100);

    let mut ticks = client
        .subscribe_channel::<Value>(channel.clone())
        .await
        .expect("subscribe should succeed");

    let tick = timeout(TEST_TIMEOUT, ticks.next())
        .await
        .expect("timed out waiting for a tick")
        .expect("stream ended");
    assert_eq!(tick["instrument_name"], "BTC-PERPETUAL");

    let removed = client.unsubscribe(&[channel]).await.expect("unsubscribe should succeed");
    assert_eq!(removed.len(), 1);
    client.shutdown().await;
}

#[tokio::test]
#[ignore]
async fn test_login_and_account_summary() {
    let client = connected_client().await;
    if client.config().credentials.is_none() {
        eprintln!("DERIBIT_CLIENT_ID / DERIBIT_CLIENT_SECRET not set; skipping");
        return;
    }

    let token = timeout(TEST_TIMEOUT, client.login())
        .await
        .expect("timed out authenticating")
        .expect("login should succeed");
    assert!(token.expires_in > 0);
    assert_eq!(client.state(), SessionState::Authenticated);

    let summary = client
        .account()
        .get_account_summary("BTC", false)
        .await
        .expect("account summary should succeed");
    assert_eq!(summary.currency, "BTC");

    client.session_management().set_heartbeat(30).await.expect("set_heartbeat should succeed");
    client.logout().await.expect("logout should succeed");
    client.shutdown().await;
}
