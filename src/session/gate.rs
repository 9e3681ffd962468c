//! Request admission: calls wait here until the session is connected.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::call::bounded;
use crate::error::{SessionError, SessionResult};
use crate::transport::Connection;

/// Binding of an admitted call to one connection epoch.
#[derive(Clone)]
pub struct Admission {
    pub epoch: u64,
    pub connection: Arc<dyn Connection>,
    /// Cancelled when this epoch's connection is torn down.
    pub cancel: CancellationToken,
}

pub struct RequestGate {
    tx: watch::Sender<Option<Admission>>,
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn open(&self, admission: Admission) {
        tracing::debug!(epoch = admission.epoch, "Request gate open");
        self.tx.send_replace(Some(admission));
    }

    /// Close the gate and cancel the epoch it was admitting into.
    pub fn close(&self) -> Option<Admission> {
        let previous = self.tx.send_replace(None);
        if let Some(admission) = &previous {
            tracing::debug!(epoch = admission.epoch, "Request gate closed");
            admission.cancel.cancel();
        }
        previous
    }

    pub fn is_open(&self) -> bool {
        self.current().is_some()
    }

    pub fn current(&self) -> Option<Admission> {
        self.tx
            .borrow()
            .as_ref()
            .filter(|a| !a.cancel.is_cancelled())
            .cloned()
    }

    /// Wait until the gate is open.
    pub async fn admit(
        &self,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
        deadline: Option<Instant>,
    ) -> SessionResult<Admission> {
        let mut rx = self.tx.subscribe();
        let wait = async move {
            loop {
                let current = rx
                    .borrow_and_update()
                    .as_ref()
                    .filter(|a| !a.cancel.is_cancelled())
                    .cloned();
                if let Some(admission) = current {
                    return Ok(admission);
                }
                if rx.changed().await.is_err() {
                    return Err(SessionError::NotConnected);
                }
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(SessionError::NotConnected),
            admitted = bounded(deadline, cancel, wait) => admitted.and_then(|r| r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, Reply, Transport};
    use std::time::Duration;

    async fn admission(epoch: u64) -> Admission {
        let transport = MemoryTransport::new(|_, _| Reply::Result(serde_json::Value::Null));
        let opened = transport.open().await.unwrap();
        Admission {
            epoch,
            connection: opened.connection,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_admit_when_open() {
        let gate = RequestGate::new();
        gate.open(admission(1).await);
        let admitted = gate
            .admit(&CancellationToken::new(), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(admitted.epoch, 1);
    }

    #[tokio::test]
    async fn test_admit_waits_for_open() {
        let gate = Arc::new(RequestGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.admit(&CancellationToken::new(), &CancellationToken::new(), None)
                    .await
                    .map(|a| a.epoch)
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.open(admission(7).await);
        assert_eq!(waiter.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_close_cancels_epoch() {
        let gate = RequestGate::new();
        let admission = admission(1).await;
        let epoch_token = admission.cancel.clone();
        gate.open(admission);
        assert!(gate.is_open());

        gate.close();
        assert!(epoch_token.is_cancelled());
        assert!(!gate.is_open());
    }

    #[tokio::test]
    async fn test_admit_cancelled_by_caller() {
        let gate = RequestGate::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = gate.admit(&cancel, &CancellationToken::new(), None).await;
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_admit_fails_on_shutdown() {
        let gate = RequestGate::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let result = gate.admit(&CancellationToken::new(), &shutdown, None).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_deadline() {
        let gate = RequestGate::new();
        let deadline = Some(Instant::now() + Duration::from_millis(100));
        let result = gate
            .admit(&CancellationToken::new(), &CancellationToken::new(), deadline)
            .await;
        assert!(matches!(result, Err(SessionError::Timeout)));
    }
}
