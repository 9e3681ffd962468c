//! Native WebSocket transport over `tokio-tungstenite`.
//!
//! Each open connection gets a background task that owns the socket:
//! - writes requests and notifications handed over by [`WsConnection`]
//! - matches replies to pending requests by id
//! - forwards notifications as [`TransportEvent`]s
//! - answers protocol-level pings
//! - fails every pending request once the socket is gone

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::rpc::{Incoming, RpcRequest};
use crate::transport::{CallError, Connection, OpenedConnection, Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingReply = oneshot::Sender<Result<Value, CallError>>;

// ─── Commands from connection handle to background task ─────────────────────

enum Command {
    Request {
        id: u64,
        frame: String,
        reply: PendingReply,
    },
    Notify {
        frame: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Close,
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Opens JSON-RPC connections over a WebSocket URL.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<OpenedConnection, TransportError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (sink, stream) = ws_stream.split();

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(sink, stream, cmd_rx, event_tx));

        tracing::info!(url = %self.url, "WebSocket connected");

        Ok(OpenedConnection {
            connection: Arc::new(WsConnection {
                cmd_tx,
                task: Mutex::new(Some(task)),
            }),
            events: event_rx,
        })
    }
}

// ─── Connection handle ───────────────────────────────────────────────────────

pub struct WsConnection {
    cmd_tx: mpsc::Sender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn task_ended() -> TransportError {
    TransportError::closed("Connection task ended")
}

#[async_trait]
impl Connection for WsConnection {
    async fn request(&self, id: u64, method: &str, params: Value) -> Result<Value, CallError> {
        let frame = serde_json::to_string(&RpcRequest::call(id, method, &params))
            .map_err(TransportError::from)?;
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request { id, frame, reply })
            .await
            .map_err(|_| task_ended())?;
        rx.await
            .unwrap_or_else(|_| Err(CallError::Transport(task_ended())))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let frame = serde_json::to_string(&RpcRequest::notification(method, &params))?;
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Notify { frame, reply })
            .await
            .map_err(|_| task_ended())?;
        rx.await.unwrap_or_else(|_| Err(task_ended()))
    }

    async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        let handle = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_connection(
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    mut cmd_rx: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut pending: HashMap<u64, PendingReply> = HashMap::new();

    // `None` means the close was requested locally.
    let failure: Option<TransportError> = loop {
        tokio::select! {
            // ── a) Incoming WS message ───────────────────────────────────
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        match Incoming::parse(text_str) {
                            Ok(Incoming::Response { id, outcome }) => {
                                match pending.remove(&id) {
                                    Some(reply) => {
                                        let _ = reply.send(outcome.map_err(CallError::Remote));
                                    }
                                    None => tracing::debug!("Reply for unknown request id {}", id),
                                }
                            }
                            Ok(Incoming::Notification { method, params }) => {
                                let _ = events.send(TransportEvent::Notification { method, params });
                            }
                            Err(e) => {
                                tracing::warn!("Undecodable frame: {} (raw: {})", e, text_str);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        tracing::info!(code, %reason, "WebSocket closed by server");
                        break Some(TransportError::Closed { code: Some(code), reason });
                    }
                    Some(Ok(_)) => {} // Binary, Pong, Frame
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break Some(e.into());
                    }
                    None => break Some(TransportError::closed("Stream ended")),
                }
            }

            // ── b) Command from connection handle ────────────────────────
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Request { id, frame, reply }) => {
                        match sink.send(Message::Text(frame.into())).await {
                            Ok(()) => {
                                pending.insert(id, reply);
                            }
                            Err(e) => {
                                let err = TransportError::Send(e.to_string());
                                let _ = reply.send(Err(CallError::Transport(err.clone())));
                                break Some(err);
                            }
                        }
                    }
                    Some(Command::Notify { frame, reply }) => {
                        match sink.send(Message::Text(frame.into())).await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                let err = TransportError::Send(e.to_string());
                                let _ = reply.send(Err(err.clone()));
                                break Some(err);
                            }
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        break None;
                    }
                }
            }
        }
    };

    let cause = failure.clone().unwrap_or(TransportError::Closed {
        code: Some(1000),
        reason: "Client disconnect".into(),
    });
    if !pending.is_empty() {
        tracing::debug!("Failing {} pending request(s): {}", pending.len(), cause);
    }
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(CallError::Transport(cause.clone())));
    }
    if let Some(err) = failure {
        let _ = events.send(TransportEvent::Closed(err));
    }
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}
