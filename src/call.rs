//! Per-call options: weight, deadline, cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{SessionError, SessionResult};

/// How long a call may take, measured from the moment it is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deadline {
    /// The session's configured request timeout.
    #[default]
    Default,
    At(Instant),
    Unbounded,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline::At(Instant::now() + timeout)
    }

    pub(crate) fn resolve(self, default_timeout: Duration) -> Option<Instant> {
        match self {
            Deadline::Default => Some(Instant::now() + default_timeout),
            Deadline::At(at) => Some(at),
            Deadline::Unbounded => None,
        }
    }
}

/// Token weight charged against the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Weight {
    #[default]
    Default,
    /// Calls that reach the matching engine (order entry, cancels).
    Matching,
    Custom(u32),
}

#[derive(Debug, Clone)]
pub struct CallOptions {
    pub weight: Weight,
    pub cancellation: Option<CancellationToken>,
    pub deadline: Deadline,
    /// When false, a call issued while the session is not connected fails
    /// with `NotConnected` instead of waiting.
    pub wait_for_connection: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            weight: Weight::Default,
            cancellation: None,
            deadline: Deadline::Default,
            wait_for_connection: true,
        }
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight(mut self, weight: Weight) -> Self {
        self.weight = weight;
        self
    }

    pub fn matching(self) -> Self {
        self.weight(Weight::Matching)
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Deadline::after(timeout))
    }

    pub fn wait_for_connection(mut self, wait: bool) -> Self {
        self.wait_for_connection = wait;
        self
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// Run `fut` unless `cancel` fires or `deadline` passes first.
pub(crate) async fn bounded<F: Future>(
    deadline: Option<Instant>,
    cancel: &CancellationToken,
    fut: F,
) -> SessionResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        _ = until(deadline) => Err(SessionError::Timeout),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_options_defaults() {
        let options = CallOptions::default();
        assert_eq!(options.weight, Weight::Default);
        assert_eq!(options.deadline, Deadline::Default);
        assert!(options.wait_for_connection);
        assert!(options.cancellation.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_resolution() {
        let now = Instant::now();
        let resolved = Deadline::Default.resolve(Duration::from_secs(30)).unwrap();
        assert_eq!(resolved - now, Duration::from_secs(30));
        assert!(Deadline::Unbounded.resolve(Duration::from_secs(30)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let cancel = CancellationToken::new();
        let deadline = Some(Instant::now() + Duration::from_millis(50));
        let result = bounded(deadline, &cancel, std::future::pending::<()>()).await;
        assert!(matches!(result, Err(SessionError::Timeout)));
    }

    #[tokio::test]
    async fn test_bounded_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = bounded(None, &cancel, async { 1 }).await;
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_bounded_completes() {
        let cancel = CancellationToken::new();
        let result = bounded(None, &cancel, async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
