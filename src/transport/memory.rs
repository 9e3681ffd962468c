//! In-process transport driven by a scripted responder.
//!
//! Every request is recorded and answered by a closure, so a full session can
//! run without a network. Connection loss, open failures and server
//! notifications are injected through the transport handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::rpc::RpcError;
use crate::transport::{CallError, Connection, OpenedConnection, Transport, TransportEvent};

/// How the scripted peer answers a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Value),
    Error(RpcError),
    /// Never answer; the request ends only when the connection does.
    Hang,
    /// Drop the connection instead of answering.
    Close(String),
    /// Answer with `reply` after `after`, unless the connection closes first.
    Delay { after: Duration, reply: Box<Reply> },
}

impl Reply {
    pub fn delayed(after: Duration, reply: Reply) -> Self {
        Reply::Delay {
            after,
            reply: Box::new(reply),
        }
    }
}

type Responder = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// 1-based index of the connection that carried the call.
    pub connection: usize,
    pub method: String,
    pub params: Value,
    pub notification: bool,
}

struct Link {
    id: usize,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: CancellationToken,
}

struct Shared {
    responder: Mutex<Responder>,
    calls: Mutex<Vec<RecordedCall>>,
    opens: AtomicUsize,
    failing_opens: AtomicUsize,
    live: Mutex<Option<Arc<Link>>>,
}

impl Shared {
    fn record(&self, link: &Link, method: &str, params: &Value, notification: bool) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                connection: link.id,
                method: method.to_string(),
                params: params.clone(),
                notification,
            });
    }

    /// Detach `link` if it is still the live one, then close it.
    fn sever(&self, link: &Link, event: Option<TransportError>) {
        {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            if live.as_ref().map(|l| l.id) == Some(link.id) {
                *live = None;
            }
        }
        if link.closed.is_cancelled() {
            return;
        }
        link.closed.cancel();
        if let Some(err) = event {
            let _ = link.events.send(TransportEvent::Closed(err));
        }
    }
}

/// Scripted transport; clones share the same peer.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                responder: Mutex::new(Arc::new(responder)),
                calls: Mutex::new(Vec::new()),
                opens: AtomicUsize::new(0),
                failing_opens: AtomicUsize::new(0),
                live: Mutex::new(None),
            }),
        }
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        *self
            .shared
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(responder);
    }

    /// Make the next `count` opens fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.shared.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Successful opens so far.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.shared
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded requests and notifications for `method`.
    pub fn calls_to(&self, method: &str) -> usize {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    fn live(&self) -> Option<Arc<Link>> {
        self.shared
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver a server notification on the live connection.
    pub fn push_notification(&self, method: &str, params: Value) -> bool {
        match self.live() {
            Some(link) => link
                .events
                .send(TransportEvent::Notification {
                    method: method.to_string(),
                    params,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Simulate the server dropping the live connection.
    pub fn drop_connection(&self, reason: &str) -> bool {
        match self.live() {
            Some(link) => {
                self.shared.sever(
                    &link,
                    Some(TransportError::Closed {
                        code: Some(1006),
                        reason: reason.to_string(),
                    }),
                );
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> Result<OpenedConnection, TransportError> {
        let scripted_failure = self
            .shared
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(TransportError::Connect("scripted open failure".into()));
        }

        let id = self.shared.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let (events, events_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Link {
            id,
            events,
            closed: CancellationToken::new(),
        });

        let previous = self
            .shared
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&link));
        if let Some(previous) = previous {
            previous.closed.cancel();
        }

        Ok(OpenedConnection {
            connection: Arc::new(MemoryConnection {
                link,
                shared: Arc::clone(&self.shared),
            }),
            events: events_rx,
        })
    }
}

struct MemoryConnection {
    link: Arc<Link>,
    shared: Arc<Shared>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.link.closed.is_cancelled() {
            return Err(TransportError::closed("connection closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn request(&self, _id: u64, method: &str, params: Value) -> Result<Value, CallError> {
        self.ensure_open()?;
        self.shared.record(&self.link, method, &params, false);

        let responder = Arc::clone(
            &*self
                .shared
                .responder
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut reply = responder(method, &params);
        loop {
            return match reply {
                Reply::Result(value) => Ok(value),
                Reply::Error(err) => Err(CallError::Remote(err)),
                Reply::Hang => {
                    self.link.closed.cancelled().await;
                    Err(CallError::Transport(TransportError::closed("connection closed")))
                }
                Reply::Close(reason) => {
                    let err = TransportError::Closed {
                        code: Some(1006),
                        reason,
                    };
                    self.shared.sever(&self.link, Some(err.clone()));
                    Err(CallError::Transport(err))
                }
                Reply::Delay { after, reply: next } => {
                    tokio::select! {
                        _ = self.link.closed.cancelled() => {
                            return Err(CallError::Transport(TransportError::closed("connection closed")));
                        }
                        _ = tokio::time::sleep(after) => {}
                    }
                    reply = *next;
                    continue;
                }
            };
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.record(&self.link, method, &params, true);
        Ok(())
    }

    async fn close(&self) {
        self.shared.sever(&self.link, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> MemoryTransport {
        MemoryTransport::new(|method, params| match method {
            "public/fail" => Reply::Error(RpcError::new(10009, "not_enough_funds")),
            _ => Reply::Result(params.clone()),
        })
    }

    #[tokio::test]
    async fn test_request_records_and_replies() {
        let transport = echo();
        let opened = transport.open().await.unwrap();
        let result = opened
            .connection
            .request(1, "public/echo", json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(result, json!({"a": 1}));
        assert_eq!(transport.calls_to("public/echo"), 1);
        assert_eq!(transport.calls()[0].connection, 1);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let transport = echo();
        let opened = transport.open().await.unwrap();
        let result = opened.connection.request(1, "public/fail", json!({})).await;
        assert!(matches!(result, Err(CallError::Remote(e)) if e.code == 10009));
    }

    #[tokio::test]
    async fn test_scripted_open_failures() {
        let transport = echo();
        transport.fail_next_opens(2);
        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_ok());
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_connection_emits_closed_and_releases_hung_calls() {
        let transport = MemoryTransport::new(|_, _| Reply::Hang);
        let mut opened = transport.open().await.unwrap();
        let connection = Arc::clone(&opened.connection);
        let call = tokio::spawn(async move { connection.request(1, "public/test", json!({})).await });
        tokio::task::yield_now().await;

        assert!(transport.drop_connection("reset"));
        let event = opened.events.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Closed(TransportError::Closed { .. })));

        let result = call.await.unwrap();
        assert!(matches!(result, Err(CallError::Transport(_))));
        assert!(!transport.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply() {
        let transport = MemoryTransport::new(|_, _| {
            Reply::delayed(Duration::from_millis(100), Reply::Result(json!("late")))
        });
        let opened = transport.open().await.unwrap();
        let started = tokio::time::Instant::now();
        let result = opened.connection.request(1, "public/test", json!({})).await;
        assert_eq!(result.unwrap(), json!("late"));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply_cut_short_by_close() {
        let transport = MemoryTransport::new(|_, _| {
            Reply::delayed(Duration::from_secs(60), Reply::Result(json!("late")))
        });
        let opened = transport.open().await.unwrap();
        let connection = Arc::clone(&opened.connection);
        let call = tokio::spawn(async move { connection.request(1, "public/test", json!({})).await });
        tokio::task::yield_now().await;

        assert!(transport.drop_connection("reset"));
        let result = call.await.unwrap();
        assert!(matches!(result, Err(CallError::Transport(_))));
    }

    #[tokio::test]
    async fn test_push_notification() {
        let transport = echo();
        assert!(!transport.push_notification("heartbeat", json!({})));
        let mut opened = transport.open().await.unwrap();
        assert!(transport.push_notification("heartbeat", json!({"type": "heartbeat"})));
        let event = opened.events.recv().await.unwrap();
        assert_eq!(
            event,
            TransportEvent::Notification {
                method: "heartbeat".into(),
                params: json!({"type": "heartbeat"})
            }
        );
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let transport = echo();
        let opened = transport.open().await.unwrap();
        opened.connection.close().await;
        let result = opened.connection.request(1, "public/echo", json!({})).await;
        assert!(matches!(result, Err(CallError::Transport(_))));
        assert_eq!(transport.calls_to("public/echo"), 0);
    }
}
