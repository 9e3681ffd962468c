//! Session core: state machine, request gate, and the call path every RPC takes.
//!
//! A call goes through three steps:
//! 1. precondition checks (shutdown, private method without a token)
//! 2. the [`RequestGate`], which binds it to the live connection epoch
//! 3. the rate limiter, which runs one request per admitted attempt
//!
//! Transport failures seen by a call are reported to the state machine,
//! scoped to the epoch the call was admitted under.

pub mod gate;
pub(crate) mod machine;
pub mod state;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthRequest, AuthToken, AuthenticationSession};
use crate::call::{CallOptions, Weight};
use crate::config::{ProbePolicy, SessionConfig};
use crate::error::{SessionError, SessionResult, TransportError};
use crate::rpc;
use crate::subscription::SubscriptionMessage;
use crate::throttle::RateLimitedThrottler;
use crate::transport::{CallError, Transport};

pub use gate::{Admission, RequestGate};
pub use state::{SessionState, Trigger};

use machine::{Fired, Guard, Queued};

struct Admitted {
    admission: Admission,
    weight: u32,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

pub(crate) struct SessionCore {
    pub(crate) config: SessionConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) auth: AuthenticationSession,
    pub(crate) throttler: RateLimitedThrottler,
    pub(crate) gate: RequestGate,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) inbound: broadcast::Sender<SubscriptionMessage>,
    pub(crate) shutdown: CancellationToken,
    triggers: mpsc::UnboundedSender<Queued>,
    request_ids: AtomicU64,
    /// Authentication to replay after every reconnect.
    replay: Mutex<Option<AuthRequest>>,
    /// Set while a reconnect is waiting on the replayed authentication.
    replay_pending: AtomicBool,
}

impl SessionCore {
    /// Build the core and spawn its state machine.
    pub(crate) fn start(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (triggers, trigger_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (inbound, _) = broadcast::channel(config.inbound_capacity);

        let core = Arc::new(Self {
            throttler: RateLimitedThrottler::new(&config.rate_limit),
            config,
            transport,
            auth: AuthenticationSession::new(),
            gate: RequestGate::new(),
            state,
            inbound,
            shutdown: CancellationToken::new(),
            triggers,
            request_ids: AtomicU64::new(0),
            replay: Mutex::new(None),
            replay_pending: AtomicBool::new(false),
        });

        let handle = tokio::spawn(machine::run(Arc::clone(&core), trigger_rx));
        (core, handle)
    }

    pub(crate) fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    // ── Triggers ─────────────────────────────────────────────────────────

    pub(crate) fn fire(&self, fired: Fired, guard: Guard) {
        let _ = self.triggers.send(Queued {
            fired,
            guard,
            reply: None,
        });
    }

    /// Fire and wait for the entry actions the trigger causes to finish.
    pub(crate) async fn fire_and_wait(&self, fired: Fired) -> SessionResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::NotConnected);
        }
        let (reply, rx) = oneshot::channel();
        self.triggers
            .send(Queued {
                fired,
                guard: Guard::None,
                reply: Some(reply),
            })
            .map_err(|_| SessionError::NotConnected)?;
        rx.await.unwrap_or(Err(SessionError::NotConnected))
    }

    // ── Authentication replay ────────────────────────────────────────────

    pub(crate) fn remembered_auth(&self) -> Option<AuthRequest> {
        self.replay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn remember_auth(&self, request: AuthRequest) {
        *self.replay.lock().unwrap_or_else(PoisonError::into_inner) = Some(request);
    }

    pub(crate) fn forget_auth(&self) {
        *self.replay.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn set_replay_pending(&self, pending: bool) {
        self.replay_pending.store(pending, Ordering::SeqCst);
    }

    pub(crate) fn is_replay_pending(&self) -> bool {
        self.replay_pending.load(Ordering::SeqCst)
    }

    // ── Waiting on state ─────────────────────────────────────────────────

    /// Wait until `ready` holds for the current state. False on shutdown.
    pub(crate) async fn wait_for<F>(&self, ready: F) -> bool
    where
        F: Fn(SessionState) -> bool,
    {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if ready(state) {
                return true;
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Connected, and not about to re-authenticate.
    pub(crate) async fn wait_until_settled(&self) -> bool {
        self.wait_for(|state| {
            state == SessionState::Authenticated
                || (state == SessionState::Connected && !self.is_replay_pending())
        })
        .await
    }

    // ── Call path ────────────────────────────────────────────────────────

    fn weight(&self, weight: Weight) -> u32 {
        match weight {
            Weight::Default => self.config.default_weight,
            Weight::Matching => self.config.matching_weight,
            Weight::Custom(w) => w,
        }
    }

    async fn admit(&self, method: &str, options: &CallOptions) -> SessionResult<Admitted> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::NotConnected);
        }
        if rpc::is_private(method) && !self.auth.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }

        let deadline = options.deadline.resolve(self.config.request_timeout);
        let cancel = options.cancellation.clone().unwrap_or_default();
        let admission = if options.wait_for_connection {
            self.gate.admit(&cancel, &self.shutdown, deadline).await?
        } else {
            self.gate.current().ok_or(SessionError::NotConnected)?
        };

        Ok(Admitted {
            admission,
            weight: self.weight(options.weight),
            deadline,
            cancel,
        })
    }

    pub(crate) async fn call(
        &self,
        method: &str,
        params: Value,
        options: CallOptions,
    ) -> SessionResult<Value> {
        let admitted = self.admit(method, &options).await?;
        let admission = &admitted.admission;
        self.throttler
            .execute(admitted.weight, admitted.deadline, &admitted.cancel, || {
                self.request_once(admission, method, params.clone())
            })
            .await
    }

    pub(crate) async fn notify(
        &self,
        method: &str,
        params: Value,
        options: CallOptions,
    ) -> SessionResult<()> {
        let admitted = self.admit(method, &options).await?;
        let admission = &admitted.admission;
        self.throttler
            .execute(admitted.weight, admitted.deadline, &admitted.cancel, || {
                self.notify_once(admission, method, params.clone())
            })
            .await
    }

    async fn request_once(
        &self,
        admission: &Admission,
        method: &str,
        params: Value,
    ) -> SessionResult<Value> {
        let id = self.request_ids.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(id, method, epoch = admission.epoch, "Sending request");

        let outcome = tokio::select! {
            biased;
            _ = admission.cancel.cancelled() => return Err(SessionError::ConnectionLost),
            outcome = admission.connection.request(id, method, params) => outcome,
        };
        match outcome {
            Ok(value) => Ok(value),
            Err(CallError::Remote(err)) => Err(err.into()),
            Err(CallError::Transport(err)) => Err(self.transport_failed(admission.epoch, err)),
        }
    }

    async fn notify_once(
        &self,
        admission: &Admission,
        method: &str,
        params: Value,
    ) -> SessionResult<()> {
        let outcome = tokio::select! {
            biased;
            _ = admission.cancel.cancelled() => return Err(SessionError::ConnectionLost),
            outcome = admission.connection.notify(method, params) => outcome,
        };
        outcome.map_err(|err| self.transport_failed(admission.epoch, err))
    }

    /// Escalate to the state machine and map to the caller-facing error.
    fn transport_failed(&self, epoch: u64, err: TransportError) -> SessionError {
        tracing::warn!(epoch, "Transport failure during call: {}", err);
        self.fire(Fired::Failure(err.clone()), Guard::Epoch(epoch));
        match err {
            TransportError::Closed { .. } => SessionError::ConnectionLost,
            other => SessionError::TransportFault(other),
        }
    }

    // ── Authentication ───────────────────────────────────────────────────

    /// One `public/auth` round trip on the live connection, then the post-auth probe.
    pub(crate) async fn perform_auth(&self, request: &AuthRequest) -> SessionResult<AuthToken> {
        let params = request.to_params()?;
        let options = CallOptions::new().wait_for_connection(false);
        let value = self
            .call("public/auth", params, options.clone())
            .await
            .map_err(|err| match err {
                SessionError::Remote { code, message, .. } => {
                    SessionError::AuthenticationFailed(format!("{} ({})", message, code))
                }
                other => other,
            })?;
        let token: AuthToken = serde_json::from_value(value)?;
        self.auth.set_authenticated(token.clone());
        tracing::info!(grant = ?request.grant_type(), scope = %token.scope, "Authenticated");

        if let Some(probe) = &self.config.post_auth_probe {
            if let Err(err) = self.call(&probe.method, probe.params.clone(), options).await {
                match probe.policy {
                    ProbePolicy::BestEffort => {
                        tracing::warn!("Post-auth probe {} failed: {}", probe.method, err);
                    }
                    ProbePolicy::Required => {
                        self.auth.set_logged_out();
                        return Err(SessionError::AuthenticationFailed(format!(
                            "post-auth probe {} failed: {}",
                            probe.method, err
                        )));
                    }
                }
            }
        }
        Ok(token)
    }

    // ── Inbound routing ──────────────────────────────────────────────────

    pub(crate) fn route_notification(self: &Arc<Self>, epoch: u64, method: &str, params: Value) {
        match method {
            "subscription" => match serde_json::from_value::<SubscriptionMessage>(params) {
                Ok(message) => {
                    // No receivers is fine.
                    let _ = self.inbound.send(message);
                }
                Err(e) => tracing::warn!("Malformed subscription notification: {}", e),
            },
            "heartbeat" => {
                let kind = params.get("type").and_then(Value::as_str).unwrap_or_default();
                if kind == "test_request" {
                    tracing::debug!(epoch, "Answering heartbeat test_request");
                    let core = Arc::clone(self);
                    tokio::spawn(async move {
                        let options = CallOptions::new().wait_for_connection(false);
                        if let Err(e) = core.call("public/test", json!({}), options).await {
                            tracing::warn!("Heartbeat reply failed: {}", e);
                        }
                    });
                }
            }
            other => tracing::debug!(epoch, "Unhandled notification {}", other),
        }
    }
}
