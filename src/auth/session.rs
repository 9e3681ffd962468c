//! Token lifecycle: current token, expiry countdown, lifecycle notifications.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthToken;

/// Lifecycle notifications, delivered in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Authenticated(AuthToken),
    LoggedOut,
    Disconnected,
    TokenExpired,
}

struct TokenState {
    token: Option<AuthToken>,
    /// Bumped whenever the token is replaced or cleared.
    generation: u64,
    expiry: Option<CancellationToken>,
}

struct Inner {
    state: Mutex<TokenState>,
    events: broadcast::Sender<SessionEvent>,
    disposed: CancellationToken,
}

/// Owns the current [`AuthToken`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuthenticationSession {
    inner: Arc<Inner>,
}

impl Default for AuthenticationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticationSession {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TokenState {
                    token: None,
                    generation: 0,
                    expiry: None,
                }),
                events,
                disposed: CancellationToken::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().token.is_some()
    }

    pub fn current_token(&self) -> Option<AuthToken> {
        self.lock().token.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.is_cancelled()
    }

    /// Replace the token and restart the expiry countdown at `expires_in - 1` seconds.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_authenticated(&self, token: AuthToken) {
        let mut state = self.lock();
        if self.is_disposed() {
            return;
        }
        if let Some(previous) = state.expiry.take() {
            previous.cancel();
        }
        state.generation += 1;
        let generation = state.generation;
        let expiry = self.inner.disposed.child_token();
        state.expiry = Some(expiry.clone());
        state.token = Some(token.clone());

        let validity = token.validity();
        tracing::debug!(
            expires_in = token.expires_in,
            "Authenticated; token treated as valid for {}s",
            validity.as_secs()
        );
        let _ = self.inner.events.send(SessionEvent::Authenticated(token));

        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = expiry.cancelled() => {}
                _ = tokio::time::sleep(validity) => session.expire(generation),
            }
        });
    }

    fn expire(&self, generation: u64) {
        let mut state = self.lock();
        if self.is_disposed() || state.generation != generation || state.token.is_none() {
            return;
        }
        state.token = None;
        state.expiry = None;
        state.generation += 1;
        tracing::info!("Access token expired");
        let _ = self.inner.events.send(SessionEvent::TokenExpired);
    }

    fn clear(&self, event: SessionEvent) {
        let mut state = self.lock();
        if self.is_disposed() {
            return;
        }
        if let Some(expiry) = state.expiry.take() {
            expiry.cancel();
        }
        state.token = None;
        state.generation += 1;
        let _ = self.inner.events.send(event);
    }

    /// The connection carrying the token is gone.
    pub fn set_disconnected(&self) {
        self.clear(SessionEvent::Disconnected);
    }

    /// The token was given up on purpose.
    pub fn set_logged_out(&self) {
        self.clear(SessionEvent::LoggedOut);
    }

    /// Stop all timers silently. Idempotent; nothing is emitted afterwards.
    pub fn dispose(&self) {
        let mut state = self.lock();
        self.inner.disposed.cancel();
        state.token = None;
        state.expiry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn token(expires_in: u64) -> AuthToken {
        serde_json::from_value(serde_json::json!({
            "access_token": "acc",
            "refresh_token": "ref",
            "token_type": "bearer",
            "scope": "connection",
            "expires_in": expires_in
        }))
        .unwrap()
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_expires_one_second_early() {
        let session = AuthenticationSession::new();
        let mut events = session.subscribe();

        session.set_authenticated(token(10));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Authenticated(_)));
        settle().await;

        tokio::time::advance(Duration::from_millis(8_999)).await;
        settle().await;
        assert!(session.is_authenticated());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        tokio::time::advance(Duration::from_millis(1)).await;
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SessionEvent::TokenExpired);
        assert!(!session.is_authenticated());
        assert!(session.current_token().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reauthentication_supersedes_countdown() {
        let session = AuthenticationSession::new();
        let mut events = session.subscribe();

        session.set_authenticated(token(5));
        settle().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        session.set_authenticated(token(5));
        settle().await;

        // First countdown would have fired at 4s.
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(session.is_authenticated());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| matches!(e, SessionEvent::Authenticated(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_and_logout_are_distinct() {
        let session = AuthenticationSession::new();
        let mut events = session.subscribe();

        session.set_authenticated(token(60));
        session.set_disconnected();
        assert!(!session.is_authenticated());
        session.set_authenticated(token(60));
        session.set_logged_out();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], SessionEvent::Authenticated(_)));
        assert_eq!(seen[1], SessionEvent::Disconnected);
        assert!(matches!(seen[2], SessionEvent::Authenticated(_)));
        assert_eq!(seen[3], SessionEvent::LoggedOut);

        // Cleared tokens never expire later.
        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_is_silent_and_idempotent() {
        let session = AuthenticationSession::new();
        let mut events = session.subscribe();

        session.set_authenticated(token(2));
        let _ = events.recv().await;
        session.dispose();
        session.dispose();
        assert!(session.is_disposed());

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        session.set_disconnected();
        session.set_authenticated(token(2));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert!(!session.is_authenticated());
    }
}
