//! Channel subscriptions that survive reconnects.
//!
//! The registry only records what the server confirmed. After every
//! disconnect it schedules a single resubscribe of the whole set, which runs
//! once the session is connected again and any replayed authentication has
//! settled.

pub mod channel;
pub mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::auth::SessionEvent;
use crate::call::CallOptions;
use crate::error::{SessionError, SessionResult};
use crate::session::SessionCore;

pub use channel::Interval;
pub use stream::ChannelStream;

/// A `subscription` notification: one message on one channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscriptionMessage {
    pub channel: String,
    pub data: Value,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: Mutex<Vec<String>>,
    resubscribe_pending: AtomicBool,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribed channels in the order they were first confirmed.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.lock().iter().any(|c| c == channel)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_resubscribe_pending(&self) -> bool {
        self.resubscribe_pending.load(Ordering::SeqCst)
    }

    fn add_confirmed(&self, confirmed: &[String]) {
        let mut channels = self.lock();
        for channel in confirmed {
            if !channels.iter().any(|c| c == channel) {
                tracing::debug!("Tracking subscription: {}", channel);
                channels.push(channel.clone());
            }
        }
    }

    fn remove_confirmed(&self, confirmed: &[String]) {
        let mut channels = self.lock();
        let before = channels.len();
        channels.retain(|c| !confirmed.contains(c));
        let removed = before - channels.len();
        if removed > 0 {
            tracing::debug!("Removed {} subscription(s) from tracking", removed);
        }
    }

    fn clear(&self) {
        self.lock().clear();
    }

    /// Channels in `confirmed` that are no longer tracked.
    fn untracked(&self, confirmed: &[String]) -> Vec<String> {
        let channels = self.lock();
        confirmed
            .iter()
            .filter(|c| !channels.contains(c))
            .cloned()
            .collect()
    }

    /// Returns false if a resubscribe was already pending.
    fn mark_pending(&self) -> bool {
        !self.resubscribe_pending.swap(true, Ordering::SeqCst)
    }

    // ── Server round trips ───────────────────────────────────────────────

    async fn request_channels(
        core: &SessionCore,
        name: &str,
        channels: &[String],
    ) -> SessionResult<Vec<String>> {
        let method = scoped(core, name);
        let value = core
            .call(method, json!({ "channels": channels }), CallOptions::new())
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) async fn subscribe(
        &self,
        core: &SessionCore,
        channels: &[String],
    ) -> SessionResult<Vec<String>> {
        let confirmed = Self::request_channels(core, "subscribe", channels).await?;
        if confirmed.len() < channels.len() {
            tracing::warn!(
                "Server confirmed {} of {} requested channel(s)",
                confirmed.len(),
                channels.len()
            );
        }
        self.add_confirmed(&confirmed);
        Ok(confirmed)
    }

    pub(crate) async fn unsubscribe(
        &self,
        core: &SessionCore,
        channels: &[String],
    ) -> SessionResult<Vec<String>> {
        let confirmed = Self::request_channels(core, "unsubscribe", channels).await?;
        self.remove_confirmed(&confirmed);
        Ok(confirmed)
    }

    /// Re-send a tracked set without re-tracking anything. Channels the
    /// caller unsubscribed while the request was in flight are dropped on
    /// the server again.
    pub(crate) async fn resubscribe(
        &self,
        core: &SessionCore,
        channels: &[String],
    ) -> SessionResult<Vec<String>> {
        let confirmed = Self::request_channels(core, "subscribe", channels).await?;
        let stale = self.untracked(&confirmed);
        if !stale.is_empty() {
            tracing::info!(
                "Dropping {} channel(s) unsubscribed during resubscribe",
                stale.len()
            );
            if let Err(e) = Self::request_channels(core, "unsubscribe", &stale).await {
                tracing::warn!("Failed to drop stale channel(s): {}", e);
            }
        }
        Ok(confirmed)
    }

    pub(crate) async fn unsubscribe_all(&self, core: &SessionCore) -> SessionResult<()> {
        let method = scoped(core, "unsubscribe_all");
        let value = core.call(method, json!({}), CallOptions::new()).await?;
        match value.as_str() {
            Some("ok") => {
                self.clear();
                Ok(())
            }
            _ => Err(SessionError::UnexpectedResponse {
                method: method.to_string(),
                body: value,
            }),
        }
    }
}

/// `private/` once authenticated, `public/` otherwise.
fn scoped(core: &SessionCore, name: &str) -> &'static str {
    let private = core.auth.is_authenticated();
    match (name, private) {
        ("subscribe", true) => "private/subscribe",
        ("subscribe", false) => "public/subscribe",
        ("unsubscribe", true) => "private/unsubscribe",
        ("unsubscribe", false) => "public/unsubscribe",
        (_, true) => "private/unsubscribe_all",
        (_, false) => "public/unsubscribe_all",
    }
}

// ─── Resubscribe on reconnect ────────────────────────────────────────────────

/// Watch session events and replay subscriptions after each disconnect.
pub(crate) fn spawn_listener(
    core: Arc<SessionCore>,
    registry: Arc<SubscriptionRegistry>,
) -> JoinHandle<()> {
    let mut events = core.auth.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = core.shutdown.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Ok(SessionEvent::Disconnected) => schedule_resubscribe(&core, &registry),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    // A missed Disconnected would leave the set stale.
                    tracing::warn!("Session events lagged by {}; resubscribing", missed);
                    schedule_resubscribe(&core, &registry);
                }
                Err(RecvError::Closed) => return,
            }
        }
    })
}

fn schedule_resubscribe(core: &Arc<SessionCore>, registry: &Arc<SubscriptionRegistry>) {
    if !registry.mark_pending() {
        tracing::debug!("Resubscribe already pending");
        return;
    }
    let core = Arc::clone(core);
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        if !core.wait_until_settled().await {
            return;
        }
        registry.resubscribe_pending.store(false, Ordering::SeqCst);

        let channels = registry.snapshot();
        if channels.is_empty() {
            return;
        }
        tracing::info!("Resubscribing to {} tracked channel(s)", channels.len());
        if let Err(e) = registry.resubscribe(&core, &channels).await {
            tracing::warn!("Failed to resubscribe: {}", e);
        }
    });
}
