//! The connection state machine actor.
//!
//! All triggers go through one queue and are handled one at a time. Entry
//! actions run to completion before the next trigger is looked at; a trigger
//! raised by an entry action is queued ahead of external ones rather than
//! handled recursively.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthRequest;
use crate::error::{SessionError, SessionResult, TransportError};
use crate::session::gate::Admission;
use crate::session::state::{self, SessionState, Trigger};
use crate::session::SessionCore;
use crate::transport::{Connection, OpenedConnection, TransportEvent};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Queue items ─────────────────────────────────────────────────────────────

pub(crate) enum Fired {
    Connect,
    Connected(OpenedConnection),
    Authenticate(AuthRequest),
    Authenticated(AuthRequest),
    AuthenticationFailed(SessionError),
    LoggedOut,
    Disconnect,
    Failure(TransportError),
}

impl Fired {
    fn trigger(&self) -> Trigger {
        match self {
            Fired::Connect => Trigger::Connect,
            Fired::Connected(_) => Trigger::Connected,
            Fired::Authenticate(_) => Trigger::Authenticate,
            Fired::Authenticated(_) => Trigger::Authenticated,
            Fired::AuthenticationFailed(_) => Trigger::AuthenticationFailed,
            Fired::LoggedOut => Trigger::LoggedOut,
            Fired::Disconnect => Trigger::Disconnect,
            Fired::Failure(_) => Trigger::Failure,
        }
    }
}

/// Condition under which a queued trigger still applies.
pub(crate) enum Guard {
    None,
    /// Only while this connection epoch is live.
    Epoch(u64),
    /// Only if no transition happened since the trigger was scheduled.
    Transition(u64),
}

type Reply = oneshot::Sender<SessionResult<()>>;

pub(crate) struct Queued {
    pub(crate) fired: Fired,
    pub(crate) guard: Guard,
    pub(crate) reply: Option<Reply>,
}

fn respond(reply: Option<Reply>, result: SessionResult<()>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

struct Live {
    epoch: u64,
    connection: Arc<dyn Connection>,
    cancel: CancellationToken,
}

struct Machine {
    core: Arc<SessionCore>,
    state: SessionState,
    live: Option<Live>,
    epochs: u64,
    transitions: u64,
    reconnect_attempts: u32,
    follow_ups: VecDeque<Queued>,
}

pub(crate) async fn run(core: Arc<SessionCore>, mut rx: mpsc::UnboundedReceiver<Queued>) {
    let mut machine = Machine {
        core: Arc::clone(&core),
        state: SessionState::Disconnected,
        live: None,
        epochs: 0,
        transitions: 0,
        reconnect_attempts: 0,
        follow_ups: VecDeque::new(),
    };

    loop {
        if core.shutdown.is_cancelled() {
            break;
        }
        let queued = match machine.follow_ups.pop_front() {
            Some(queued) => queued,
            None => tokio::select! {
                biased;
                _ = core.shutdown.cancelled() => break,
                queued = rx.recv() => match queued {
                    Some(queued) => queued,
                    None => break,
                },
            },
        };
        machine.handle(queued).await;
    }

    machine.shut_down(&mut rx).await;
}

impl Machine {
    fn set_state(&mut self, state: SessionState) {
        tracing::debug!(from = %self.state, to = %state, "State transition");
        self.state = state;
        self.transitions += 1;
        self.core.state.send_replace(state);
    }

    fn follow_up(&mut self, fired: Fired, reply: Option<Reply>) {
        self.follow_ups.push_back(Queued {
            fired,
            guard: Guard::None,
            reply,
        });
    }

    fn guard_holds(&self, guard: &Guard) -> bool {
        match guard {
            Guard::None => true,
            Guard::Epoch(epoch) => self.live.as_ref().map(|l| l.epoch) == Some(*epoch),
            Guard::Transition(seen) => *seen == self.transitions,
        }
    }

    async fn handle(&mut self, queued: Queued) {
        let Queued {
            fired,
            guard,
            reply,
        } = queued;
        let trigger = fired.trigger();

        if !self.guard_holds(&guard) {
            tracing::debug!("Dropping stale {} trigger", trigger);
            respond(reply, Ok(()));
            return;
        }

        let Some(target) = state::next(self.state, trigger) else {
            tracing::warn!("Trigger {} not permitted in state {}", trigger, self.state);
            respond(
                reply,
                Err(SessionError::InvalidTransition {
                    state: self.state,
                    trigger,
                }),
            );
            return;
        };

        // Observers of the new state must already see whether a replay follows.
        match &fired {
            Fired::Connected(_) => self
                .core
                .set_replay_pending(self.core.remembered_auth().is_some()),
            Fired::Authenticated(_) | Fired::AuthenticationFailed(_) => {
                self.core.set_replay_pending(false)
            }
            _ => {}
        }

        let from = self.state;
        self.set_state(target);
        self.enter(from, fired, reply).await;
    }

    async fn enter(&mut self, from: SessionState, fired: Fired, reply: Option<Reply>) {
        match fired {
            Fired::Connect => self.on_connecting(reply).await,
            Fired::Connected(opened) => {
                self.on_connected(opened);
                respond(reply, Ok(()));
            }
            Fired::Authenticate(request) => self.on_authenticating(request, reply).await,
            Fired::Authenticated(request) => {
                self.core.remember_auth(request);
                respond(reply, Ok(()));
            }
            Fired::AuthenticationFailed(err) => {
                tracing::warn!("Authentication failed: {}", err);
                respond(reply, Err(err));
            }
            Fired::LoggedOut => {
                self.core.forget_auth();
                self.core.auth.set_logged_out();
                tracing::info!("Logged out");
                respond(reply, Ok(()));
            }
            Fired::Disconnect => {
                self.teardown().await;
                self.reconnect_attempts = 0;
                tracing::info!("Session disconnected");
                respond(reply, Ok(()));
            }
            Fired::Failure(err) => {
                tracing::error!(from = %from, "Session failure: {}", err);
                if from != SessionState::Disconnected {
                    self.teardown().await;
                    self.schedule_reconnect();
                }
                respond(reply, Err(SessionError::TransportFault(err)));
            }
        }
    }

    // ── Entry actions ────────────────────────────────────────────────────

    async fn on_connecting(&mut self, reply: Option<Reply>) {
        let timeout = self.core.config.connect_timeout;
        let opened = tokio::select! {
            biased;
            _ = self.core.shutdown.cancelled() => {
                respond(reply, Err(SessionError::NotConnected));
                return;
            }
            opened = tokio::time::timeout(timeout, self.core.transport.open()) => opened,
        };

        let next = match opened {
            Ok(Ok(opened)) => Fired::Connected(opened),
            Ok(Err(err)) => Fired::Failure(err),
            Err(_) => Fired::Failure(TransportError::Timeout),
        };
        self.follow_up(next, reply);
    }

    fn on_connected(&mut self, opened: OpenedConnection) {
        self.epochs += 1;
        let epoch = self.epochs;
        self.reconnect_attempts = 0;

        let cancel = self.core.shutdown.child_token();
        tokio::spawn(receive_loop(
            Arc::clone(&self.core),
            epoch,
            opened.events,
            cancel.clone(),
        ));
        self.core.gate.open(Admission {
            epoch,
            connection: Arc::clone(&opened.connection),
            cancel: cancel.clone(),
        });
        self.live = Some(Live {
            epoch,
            connection: opened.connection,
            cancel,
        });
        tracing::info!(epoch, "Session connected");

        if let Some(request) = self.core.remembered_auth() {
            tracing::info!(grant = ?request.grant_type(), "Replaying authentication");
            self.follow_up(Fired::Authenticate(request), None);
        }
    }

    async fn on_authenticating(&mut self, request: AuthRequest, reply: Option<Reply>) {
        let next = match self.core.perform_auth(&request).await {
            Ok(_) => Fired::Authenticated(request),
            Err(err) => Fired::AuthenticationFailed(err),
        };
        self.follow_up(next, reply);
    }

    // ── Teardown and reconnect ───────────────────────────────────────────

    async fn teardown(&mut self) {
        self.core.gate.close();
        self.core.set_replay_pending(false);
        if let Some(live) = self.live.take() {
            live.cancel.cancel();
            if tokio::time::timeout(CLOSE_TIMEOUT, live.connection.close())
                .await
                .is_err()
            {
                tracing::warn!(epoch = live.epoch, "Connection close timed out");
            }
            tracing::debug!(epoch = live.epoch, "Connection torn down");
        }
        self.core.auth.set_disconnected();
    }

    fn schedule_reconnect(&mut self) {
        if self.core.shutdown.is_cancelled() {
            return;
        }
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        let delay = self
            .core
            .config
            .reconnect
            .delay_for_attempt(self.reconnect_attempts);
        tracing::info!(
            "Reconnect attempt {} in {}ms",
            self.reconnect_attempts,
            delay.as_millis()
        );

        let guard = Guard::Transition(self.transitions);
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            tokio::select! {
                _ = core.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => core.fire(Fired::Connect, guard),
            }
        });
    }

    async fn shut_down(mut self, rx: &mut mpsc::UnboundedReceiver<Queued>) {
        self.teardown().await;
        if self.state != SessionState::Disconnected {
            self.set_state(SessionState::Disconnected);
        }
        self.core.auth.dispose();

        rx.close();
        for queued in self.follow_ups.drain(..) {
            respond(queued.reply, Err(SessionError::NotConnected));
        }
        while let Ok(queued) = rx.try_recv() {
            respond(queued.reply, Err(SessionError::NotConnected));
        }
        tracing::info!("Session shut down");
    }
}

// ─── Receive loop ────────────────────────────────────────────────────────────

async fn receive_loop(
    core: Arc<SessionCore>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Some(TransportEvent::Notification { method, params }) => {
                core.route_notification(epoch, &method, params);
            }
            Some(TransportEvent::Closed(err)) => {
                tracing::warn!(epoch, "Connection closed: {}", err);
                core.fire(Fired::Failure(err), Guard::Epoch(epoch));
                return;
            }
            None => {
                core.fire(
                    Fired::Failure(TransportError::closed("event stream ended")),
                    Guard::Epoch(epoch),
                );
                return;
            }
        }
    }
}
