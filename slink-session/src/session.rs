//! Session state machine
//!
//! Lifts the raw byte pipe of a [`Transport`] into a logical session with a
//! stable server-issued identity: it performs the `session.create` handshake,
//! probes liveness with keepalives under inbound silence, and recycles the
//! connection on failure within a bounded reconnect budget.
//!
//! The session runs as its own task with run-to-completion event handling.
//! Commands arrive over a channel from the owning worker; status changes and
//! application frames flow back over the event channel. Session-management
//! replies are consumed here and never forwarded; frames carrying a stale
//! session id are dropped with a warning.
//!
//! # States
//!
//! ```text
//! Disconnected → Connecting → SessionInit → Connected
//!        ↑            ↑  ↓ (backoff)           ↓
//!        └────────────┴──────────── KeepaliveFailed
//! ```
//!
//! Reconnect budget rules: the budget decrements once per reconnect attempt
//! started, is restored in full by a successful `session.create` reply, and
//! is also restored when keepalive failure recycles the connection (a stale
//! socket is evidence of a dead link, not of exhausted policy). A plain
//! transport close preserves whatever budget remains.

use crate::config::SessionConfig;
use crate::transport::{Transport, TransportEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use slink_core::types::{ops, SessionCreateReplyBody};
use slink_core::{codec, Error, Frame, FrameKind, ReplyFrame, RequestIdAllocator, Result, SessionId};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Lifecycle states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// No connection, no session
    Disconnected,
    /// Transport connection being established (including backoff waits)
    Connecting,
    /// Transport open, `session.create` in flight
    SessionInit,
    /// Session established; requests may flow
    Connected,
    /// Keepalives went unanswered; the connection is being recycled
    KeepaliveFailed,
    /// Unrecoverable failure
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::SessionInit => "session-init",
            SessionStatus::Connected => "connected",
            SessionStatus::KeepaliveFailed => "keepalive-failed",
            SessionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Events the session emits to its owner
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The status changed; `session_id` is present exactly when Connected
    Status {
        status: SessionStatus,
        session_id: Option<SessionId>,
        reconnect_attempts_left: u32,
    },
    /// An application frame, already validated against the current session
    Inbound(Frame),
}

/// Commands the owner sends to the session task
#[derive(Debug)]
enum SessionCommand {
    Connect(SessionConfig),
    Disconnect,
    Send(Vec<u8>),
}

/// Owner-side handle to a running session task
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Begin connecting with the given configuration
    pub async fn connect(&self, config: SessionConfig) -> Result<()> {
        self.commands
            .send(SessionCommand::Connect(config))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Tear the session down; best-effort `session.destroy` when connected
    pub async fn disconnect(&self) -> Result<()> {
        self.commands
            .send(SessionCommand::Disconnect)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Transmit pre-encoded frame bytes on the live connection
    pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        self.commands
            .send(SessionCommand::Send(bytes))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// Spawn a session task over the given transport
///
/// Returns the command handle and the event stream. The task ends when the
/// handle is dropped or the event receiver goes away.
pub fn spawn_session<T: Transport>(
    transport: T,
    ids: RequestIdAllocator,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(256);
    let session = Session::new(transport, ids, event_tx);
    tokio::spawn(session.run(command_rx));
    (
        SessionHandle {
            commands: command_tx,
        },
        event_rx,
    )
}

struct Session<T: Transport> {
    transport: T,
    ids: RequestIdAllocator,
    events: mpsc::Sender<SessionEvent>,
    pending_events: VecDeque<SessionEvent>,

    config: Option<SessionConfig>,
    status: SessionStatus,
    session_id: Option<SessionId>,
    /// Client-chosen correlation id sent in `session.create`
    client_session_id: String,
    create_request_id: Option<slink_core::RequestId>,

    reconnect_attempts_left: u32,
    reconnect_at: Option<Instant>,

    keepalive_deadline: Option<Instant>,
    keepalive_failures: u32,
    last_received_at: Instant,
    last_keepalive_sent_at: Option<Instant>,

    transport_events: Option<mpsc::Receiver<TransportEvent>>,
}

enum Arm {
    Command(Option<SessionCommand>),
    Transport(Option<TransportEvent>),
    Timer,
}

impl<T: Transport> Session<T> {
    fn new(transport: T, ids: RequestIdAllocator, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            transport,
            ids,
            events,
            pending_events: VecDeque::new(),
            config: None,
            status: SessionStatus::Disconnected,
            session_id: None,
            client_session_id: uuid::Uuid::new_v4().to_string(),
            create_request_id: None,
            reconnect_attempts_left: 0,
            reconnect_at: None,
            keepalive_deadline: None,
            keepalive_failures: 0,
            last_received_at: Instant::now(),
            last_keepalive_sent_at: None,
            transport_events: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            if !self.flush_events().await {
                return;
            }

            let deadline = self.reconnect_at.or(self.keepalive_deadline);
            let mut transport_rx = self.transport_events.take();

            let arm = {
                let transport = async {
                    match transport_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                };
                let timer = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::select! {
                    command = commands.recv() => Arm::Command(command),
                    event = transport => Arm::Transport(event),
                    _ = timer => Arm::Timer,
                }
            };
            self.transport_events = transport_rx;

            match arm {
                Arm::Command(Some(SessionCommand::Connect(config))) => self.begin(config).await,
                Arm::Command(Some(SessionCommand::Disconnect)) => self.disconnect().await,
                Arm::Command(Some(SessionCommand::Send(bytes))) => self.send_bytes(bytes).await,
                Arm::Command(None) => {
                    // Owner went away: orderly teardown, then stop.
                    self.disconnect().await;
                    self.flush_events().await;
                    return;
                }
                Arm::Transport(Some(TransportEvent::Frame(bytes))) => self.on_frame(bytes).await,
                Arm::Transport(Some(TransportEvent::Error(message))) => {
                    // Advisory only; the authoritative signal is Closed.
                    tracing::warn!(error = %message, "transport error");
                }
                Arm::Transport(Some(TransportEvent::Closed)) | Arm::Transport(None) => {
                    self.transport_events = None;
                    self.connection_lost().await;
                }
                Arm::Timer => self.on_timer().await,
            }
        }
    }

    /// Deliver queued events; false when the consumer is gone
    async fn flush_events(&mut self) -> bool {
        while let Some(event) = self.pending_events.pop_front() {
            if self.events.send(event).await.is_err() {
                return false;
            }
        }
        true
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status == status {
            return;
        }
        tracing::debug!(from = %self.status, to = %status, "session status changed");
        self.status = status;
        self.pending_events.push_back(SessionEvent::Status {
            status,
            session_id: self.session_id.clone(),
            reconnect_attempts_left: self.reconnect_attempts_left,
        });
    }

    async fn begin(&mut self, config: SessionConfig) {
        if self.status != SessionStatus::Disconnected {
            tracing::warn!(status = %self.status, "ignoring connect while session is active");
            return;
        }
        self.reconnect_attempts_left = config.max_reconnect_attempts;
        self.config = Some(config);
        // The initial attempt does not draw on the reconnect budget.
        self.start_attempt().await;
    }

    async fn start_attempt(&mut self) {
        let Some(config) = self.config.clone() else {
            return;
        };
        self.set_status(SessionStatus::Connecting);
        tracing::info!(
            url = %config.url,
            attempts_left = self.reconnect_attempts_left,
            "connecting"
        );
        match self.transport.connect(&config.url).await {
            Ok(rx) => {
                self.transport_events = Some(rx);
                self.last_received_at = Instant::now();
                self.begin_session_init().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection attempt failed");
                self.connection_lost().await;
            }
        }
    }

    async fn begin_session_init(&mut self) {
        self.set_status(SessionStatus::SessionInit);
        let request_id = self.ids.next();
        self.create_request_id = Some(request_id);
        let frame = Frame::request(
            None,
            request_id,
            ops::SESSION_CREATE,
            json!({ "client_session_id": self.client_session_id }),
        );
        if let Err(e) = self.send_frame(&frame).await {
            tracing::warn!(error = %e, "failed to send session create");
            self.connection_lost().await;
        }
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = codec::encode(frame)?;
        self.transport.send(bytes).await
    }

    async fn send_bytes(&mut self, bytes: Vec<u8>) {
        if self.status != SessionStatus::Connected {
            tracing::warn!(status = %self.status, "dropping outbound frame while not connected");
            return;
        }
        if let Err(e) = self.transport.send(bytes).await {
            // The close event will follow through the transport channel.
            tracing::warn!(error = %e, "send failed");
        }
    }

    async fn on_frame(&mut self, bytes: Vec<u8>) {
        self.last_received_at = Instant::now();
        let frame = match codec::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame.kind {
            FrameKind::Reply(ref reply) if ops::is_session_op(&reply.op) => {
                let reply = reply.clone();
                self.on_session_reply(frame.session_id, reply).await;
            }
            _ => {
                if let Some(current) = &self.session_id {
                    if frame.session_id.as_ref() != Some(current) {
                        tracing::warn!(
                            frame_session = ?frame.session_id,
                            current_session = %current,
                            error = %Error::SessionMismatch,
                            "dropping frame for stale session"
                        );
                        return;
                    }
                }
                self.pending_events.push_back(SessionEvent::Inbound(frame));
            }
        }
    }

    async fn on_session_reply(&mut self, frame_session_id: Option<SessionId>, reply: ReplyFrame) {
        match reply.op.as_str() {
            ops::SESSION_CREATE => self.on_session_create_reply(reply).await,
            ops::SESSION_KEEPALIVE => self.on_keepalive_reply(frame_session_id, reply),
            ops::SESSION_DESTROY => {
                tracing::debug!("session destroy acknowledged");
            }
            _ => unreachable!("non-session op routed to session handler"),
        }
    }

    async fn on_session_create_reply(&mut self, reply: ReplyFrame) {
        if self.create_request_id != Some(reply.request_id) {
            tracing::warn!(request_id = %reply.request_id, "unexpected session create reply");
            return;
        }
        self.create_request_id = None;

        if !reply.status.is_success() {
            tracing::warn!(code = %reply.status.code, "session create rejected");
            self.connection_lost().await;
            return;
        }

        let Some(body) = codec::body_as::<SessionCreateReplyBody>(&reply.body) else {
            tracing::warn!("malformed session create reply body");
            self.connection_lost().await;
            return;
        };

        let Some(config) = self.config.clone() else {
            return;
        };
        self.session_id = Some(body.session_id);
        self.reconnect_attempts_left = config.max_reconnect_attempts;
        self.keepalive_failures = 0;
        self.last_keepalive_sent_at = None;
        self.keepalive_deadline = Some(Instant::now() + config.keepalive_interval());
        self.set_status(SessionStatus::Connected);
        tracing::info!(session_id = ?self.session_id, "session established");
    }

    fn on_keepalive_reply(&mut self, frame_session_id: Option<SessionId>, _reply: ReplyFrame) {
        if frame_session_id != self.session_id {
            // A reply for some other session is not evidence of liveness.
            tracing::warn!(
                frame_session = ?frame_session_id,
                current_session = ?self.session_id,
                "ignoring keepalive reply for stale session"
            );
            return;
        }
        self.keepalive_failures = 0;
        if let Some(config) = &self.config {
            self.reconnect_attempts_left = config.max_reconnect_attempts;
        }
    }

    async fn on_timer(&mut self) {
        if self.reconnect_at.take().is_some() {
            self.begin_reconnect_attempt().await;
        } else if self.keepalive_deadline.take().is_some() {
            self.keepalive_tick().await;
        }
    }

    async fn begin_reconnect_attempt(&mut self) {
        self.reconnect_attempts_left = self.reconnect_attempts_left.saturating_sub(1);
        self.start_attempt().await;
    }

    async fn keepalive_tick(&mut self) {
        let Some(config) = self.config.clone() else {
            return;
        };
        if self.status != SessionStatus::Connected {
            return;
        }

        let now = Instant::now();
        let interval = config.keepalive_interval();
        let silent = now.duration_since(self.last_received_at) >= interval;
        let spaced = self
            .last_keepalive_sent_at
            .is_none_or(|at| now.duration_since(at) >= interval);

        if silent && spaced {
            self.send_keepalive().await;
            if self.keepalive_failures >= config.max_keepalive_failures {
                self.keepalive_exhausted().await;
                return;
            }
        }
        self.keepalive_deadline = Some(Instant::now() + interval);
    }

    async fn send_keepalive(&mut self) {
        let request_id = self.ids.next();
        let frame = Frame::request(
            self.session_id.clone(),
            request_id,
            ops::SESSION_KEEPALIVE,
            Value::Null,
        );
        self.last_keepalive_sent_at = Some(Instant::now());
        self.keepalive_failures += 1;
        tracing::debug!(
            outstanding = self.keepalive_failures,
            "sending keepalive probe"
        );
        if let Err(e) = self.send_frame(&frame).await {
            tracing::warn!(error = %e, "keepalive send failed");
        }
    }

    async fn keepalive_exhausted(&mut self) {
        tracing::warn!(
            failures = self.keepalive_failures,
            "keepalive failures exceeded threshold, recycling connection"
        );
        self.set_status(SessionStatus::KeepaliveFailed);
        self.drop_connection().await;
        // A stale socket is not exhausted policy: restore the full budget
        // and reconnect without backoff.
        if let Some(config) = &self.config {
            self.reconnect_attempts_left = config.max_reconnect_attempts;
        }
        self.begin_reconnect_attempt().await;
    }

    async fn connection_lost(&mut self) {
        if self.status == SessionStatus::Disconnected {
            return;
        }
        self.drop_connection().await;
        let Some(config) = self.config.clone() else {
            self.set_status(SessionStatus::Disconnected);
            return;
        };
        if self.reconnect_attempts_left > 0 {
            self.set_status(SessionStatus::Connecting);
            self.arm_reconnect(config.reconnect_interval());
        } else {
            tracing::info!("reconnect budget exhausted");
            self.set_status(SessionStatus::Disconnected);
        }
    }

    fn arm_reconnect(&mut self, interval: std::time::Duration) {
        if self.reconnect_at.is_none() {
            self.reconnect_at = Some(Instant::now() + interval);
        }
    }

    /// Clear all per-connection state; no status change
    async fn drop_connection(&mut self) {
        self.transport.disconnect().await;
        self.transport_events = None;
        self.session_id = None;
        self.create_request_id = None;
        self.reconnect_at = None;
        self.keepalive_deadline = None;
        self.keepalive_failures = 0;
        self.last_keepalive_sent_at = None;
    }

    async fn disconnect(&mut self) {
        if self.status == SessionStatus::Connected {
            // Best-effort teardown; the reply is not awaited.
            let request_id = self.ids.next();
            let frame = Frame::request(
                self.session_id.clone(),
                request_id,
                ops::SESSION_DESTROY,
                Value::Null,
            );
            if let Err(e) = self.send_frame(&frame).await {
                tracing::debug!(error = %e, "session destroy not delivered");
            }
        }
        self.drop_connection().await;
        self.config = None;
        self.set_status(SessionStatus::Disconnected);
    }
}
