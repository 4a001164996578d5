//! Worker shell
//!
//! Hosts the session, correlator, and registries in a background task and
//! bridges them to the host facade through a command/event protocol.
//!
//! # Execution Model
//!
//! The worker is a single task looping over three inputs:
//!
//! ```text
//! host commands ──┐
//! session events ─┼─► worker loop ──► host events
//! timer expiries ─┘
//! ```
//!
//! Each input is handled to completion before the next is taken, so every
//! mutation of worker state happens on this task and no locks are needed.
//! Only owned plain values cross the channels in either direction; nothing
//! is shared with the host by reference.
//!
//! # Command Protocol
//!
//! The command set is a closed enum (Connect, Disconnect, SendRequest,
//! Subscribe, Unsubscribe); unknown command kinds are impossible by
//! construction. Every command carries the host-side `request_id` its
//! outcome is reported under.
//!
//! # Ordering
//!
//! One FIFO event channel carries every outcome: replies resolve in the
//! order the worker resolves them (which is wire order for matched ids),
//! notifications stay in wire order, and state changes interleave in
//! temporal order with the traffic around them.
//!
//! # Disposal
//!
//! Dropping the command sender is the dispose signal: the worker tears the
//! session down, rejects everything pending with `ConnectionClosed`, closes
//! every subscription, emits a final Disconnected state, and exits.

use crate::correlator::{Correlator, ReplyDecoder, RequestOutcome};
use crate::metrics::ClientMetrics;
use crate::registry::Registry;
use serde_json::{json, Value};
use slink_core::{
    codec, Error, ErrorPayload, Frame, FrameKind, RequestId, RequestIdAllocator, Result,
    SessionId, SubscriptionId,
};
use slink_session::{spawn_session, SessionConfig, SessionEvent, SessionHandle, SessionStatus, Transport};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Timeout for subscribe requests, which carry no caller-chosen timeout
const SUBSCRIBE_TIMEOUT_MS: u64 = 10_000;
/// Timeout for fire-and-forget unsubscribe requests; expiry is only logged
const UNSUBSCRIBE_TIMEOUT_MS: u64 = 10_000;

/// Commands the host facade sends to the worker
///
/// Every command names the host-side `request_id` its outcome will be
/// reported under in a [`WorkerEvent::Reply`].
#[derive(Debug)]
pub enum Command {
    /// Begin connecting; resolves on the first transition to Connected and
    /// rejects if Disconnected or Error is reached first
    Connect {
        request_id: u64,
        config: SessionConfig,
    },
    /// Tear the session down; resolves once Disconnected
    Disconnect {
        request_id: u64,
    },
    /// Issue a registered command through the correlator
    ///
    /// The worker reconstructs the typed call from `command` plus `params`
    /// via the command registry.
    SendRequest {
        request_id: u64,
        command: String,
        params: Value,
        timeout_ms: u64,
    },
    /// Create a subscription; the reply carries the server-assigned
    /// `subscription_id`
    ///
    /// `internal_id` is the host-chosen stable key notifications for this
    /// stream are delivered under.
    Subscribe {
        request_id: u64,
        subscription: String,
        params: Value,
        internal_id: u64,
    },
    /// Remove routing for a subscription and fire the server-side
    /// unsubscribe without awaiting it
    Unsubscribe {
        request_id: u64,
        subscription_id: SubscriptionId,
    },
}

/// Events the worker emits to the host facade
///
/// Delivered over one FIFO channel, so the host observes outcomes in the
/// order the worker produced them.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Outcome of a command, keyed by its host-side request id
    Reply {
        request_id: u64,
        result: std::result::Result<Value, ErrorPayload>,
    },
    /// A decoded notification for the subscription registered under
    /// `internal_id`
    Notification {
        internal_id: u64,
        data: Value,
    },
    /// The session status changed
    ///
    /// `session_id` is present exactly while Connected.
    StateChanged {
        status: SessionStatus,
        session_id: Option<SessionId>,
        reconnect_attempts_left: u32,
    },
}

/// Spawn a worker over the given transport
///
/// Wires up the session task, the correlator, and the channels, then spawns
/// the worker loop.
///
/// # Arguments
///
/// * `transport` - The connection adapter the session will drive
/// * `registry` - Command and subscription specs the worker dispatches on
/// * `metrics` - Optional client metrics recorded by the worker
///
/// # Returns
///
/// The command sender, the event receiver, and the worker's join handle.
/// Dropping the sender disposes the worker.
pub fn spawn_worker<T: Transport>(
    transport: T,
    registry: Arc<Registry>,
    metrics: Option<Arc<ClientMetrics>>,
) -> (mpsc::Sender<Command>, mpsc::Receiver<WorkerEvent>, JoinHandle<()>) {
    let ids = RequestIdAllocator::new();
    let (session, session_events) = spawn_session(transport, ids.clone());
    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    let (expiry_tx, expiry_rx) = mpsc::channel(64);

    let worker = Worker {
        session,
        correlator: Correlator::new(ids),
        registry,
        events: event_tx,
        expiries: expiry_tx,
        status: SessionStatus::Disconnected,
        session_id: None,
        pending_connect: None,
        pending_disconnect: None,
        pending_subscribes: HashMap::new(),
        active_subscriptions: HashMap::new(),
        fire_and_forget: HashSet::new(),
        inflight_started: HashMap::new(),
        next_background_id: u64::MAX,
        metrics,
    };
    let handle = tokio::spawn(worker.run(command_rx, session_events, expiry_rx));
    (command_tx, event_rx, handle)
}

struct PendingSubscribe {
    internal_id: u64,
    name: String,
    deserialize: crate::correlator::NotificationDecoder,
}

struct Worker {
    session: SessionHandle,
    correlator: Correlator,
    registry: Arc<Registry>,
    events: mpsc::Sender<WorkerEvent>,
    expiries: mpsc::Sender<RequestId>,

    status: SessionStatus,
    session_id: Option<SessionId>,
    pending_connect: Option<u64>,
    pending_disconnect: Option<u64>,
    /// Host ids of subscribe requests awaiting their subscribe reply
    pending_subscribes: HashMap<u64, PendingSubscribe>,
    /// Active server-assigned subscription ids and their spec names
    active_subscriptions: HashMap<SubscriptionId, String>,
    /// Host ids with no host-side future; outcomes are only logged
    fire_and_forget: HashSet<u64>,
    inflight_started: HashMap<u64, std::time::Instant>,
    /// Ids for worker-originated requests, counted down from the top so they
    /// never collide with facade-allocated ids
    next_background_id: u64,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut session_events: mpsc::Receiver<SessionEvent>,
        mut expiries: mpsc::Receiver<RequestId>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = session_events.recv() => match event {
                    Some(event) => self.handle_session_event(event).await,
                    None => {
                        tracing::error!("session task ended unexpectedly");
                        break;
                    }
                },
                Some(request_id) = expiries.recv() => self.handle_expiry(request_id).await,
            }
        }
        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { request_id, config } => self.handle_connect(request_id, config).await,
            Command::Disconnect { request_id } => self.handle_disconnect(request_id).await,
            Command::SendRequest {
                request_id,
                command,
                params,
                timeout_ms,
            } => self.handle_send_request(request_id, command, params, timeout_ms).await,
            Command::Subscribe {
                request_id,
                subscription,
                params,
                internal_id,
            } => self.handle_subscribe(request_id, subscription, params, internal_id).await,
            Command::Unsubscribe {
                request_id,
                subscription_id,
            } => self.handle_unsubscribe(request_id, subscription_id).await,
        }
    }

    async fn handle_connect(&mut self, request_id: u64, config: SessionConfig) {
        if self.status == SessionStatus::Connected {
            self.emit_reply(request_id, Ok(Value::Null)).await;
            return;
        }
        if let Some(previous) = self.pending_connect.replace(request_id) {
            self.emit_reply(
                previous,
                Err(Error::Internal("superseded by a newer connect".into())),
            )
            .await;
        }
        if self.session.connect(config).await.is_err() {
            if let Some(id) = self.pending_connect.take() {
                self.emit_reply(id, Err(Error::ConnectionClosed)).await;
            }
        }
    }

    async fn handle_disconnect(&mut self, request_id: u64) {
        if self.status == SessionStatus::Disconnected {
            self.emit_reply(request_id, Ok(Value::Null)).await;
            return;
        }
        if let Some(previous) = self.pending_disconnect.replace(request_id) {
            self.emit_reply(
                previous,
                Err(Error::Internal("superseded by a newer disconnect".into())),
            )
            .await;
        }
        if self.session.disconnect().await.is_err() {
            if let Some(id) = self.pending_disconnect.take() {
                self.emit_reply(id, Ok(Value::Null)).await;
            }
        }
    }

    async fn handle_send_request(
        &mut self,
        request_id: u64,
        command: String,
        params: Value,
        timeout_ms: u64,
    ) {
        let Some(spec) = self.registry.command(&command).cloned() else {
            self.deliver_result(
                request_id,
                &command,
                Err(Error::Internal(format!("unknown command {command}"))),
            )
            .await;
            return;
        };
        let body = spec.encode(&params);
        let op = spec.op().to_string();
        self.issue_request(request_id, &command, &op, body, spec.decoder(), timeout_ms)
            .await;
    }

    async fn handle_subscribe(
        &mut self,
        request_id: u64,
        subscription: String,
        params: Value,
        internal_id: u64,
    ) {
        let Some(spec) = self.registry.subscription(&subscription).cloned() else {
            self.deliver_result(
                request_id,
                &subscription,
                Err(Error::Internal(format!("unknown subscription {subscription}"))),
            )
            .await;
            return;
        };

        let body = spec.subscribe_body(&params);
        let op = spec.subscribe_op().to_string();
        let id_extractor = spec.clone();
        let decoder: ReplyDecoder = Arc::new(move |reply| {
            id_extractor
                .subscription_id_from_reply(reply)
                .map(|sid| json!({ "subscription_id": sid.as_str() }))
        });

        self.pending_subscribes.insert(
            request_id,
            PendingSubscribe {
                internal_id,
                name: subscription.clone(),
                deserialize: spec.deserializer(),
            },
        );
        let label = format!("subscribe:{subscription}");
        self.issue_request(request_id, &label, &op, body, decoder, SUBSCRIBE_TIMEOUT_MS)
            .await;
    }

    async fn handle_unsubscribe(&mut self, request_id: u64, subscription_id: SubscriptionId) {
        // Remove routing first so late notifications are dropped immediately.
        let removed = self.correlator.remove_route(&subscription_id);
        if !removed {
            tracing::warn!(%subscription_id, "unsubscribe for unknown subscription");
        }

        if let Some(name) = self.active_subscriptions.remove(&subscription_id) {
            if let Some(spec) = self.registry.subscription(&name).cloned() {
                let background_id = self.allocate_background_id();
                self.fire_and_forget.insert(background_id);
                let body = spec.unsubscribe_body(&subscription_id);
                let op = spec.unsubscribe_op().to_string();
                let decoder: ReplyDecoder = Arc::new(|reply| Some(reply.body.clone()));
                let label = format!("unsubscribe:{name}");
                self.issue_request(
                    background_id,
                    &label,
                    &op,
                    body,
                    decoder,
                    UNSUBSCRIBE_TIMEOUT_MS,
                )
                .await;
            }
        }

        self.emit_reply(request_id, Ok(Value::Null)).await;
    }

    /// Register a pending request, start its timeout, and transmit it
    ///
    /// Fails fast with `NotConnected` when no session is established;
    /// nothing is queued for later. The timeout is a spawned sleep that
    /// posts the wire id back into the loop, where an already-resolved
    /// entry makes the expiry a no-op.
    ///
    /// # Arguments
    ///
    /// * `host_id` - Id the outcome is demultiplexed on
    /// * `label` - Command name for logs, metrics, and timeout errors
    /// * `op` - Wire operation name
    /// * `body` - Encoded request body
    /// * `decoder` - Applied to the successful reply
    /// * `timeout_ms` - Reply deadline
    async fn issue_request(
        &mut self,
        host_id: u64,
        label: &str,
        op: &str,
        body: Value,
        decoder: ReplyDecoder,
        timeout_ms: u64,
    ) {
        if self.status != SessionStatus::Connected {
            self.deliver_result(host_id, label, Err(Error::NotConnected)).await;
            return;
        }

        let wire_id = self.correlator.register(host_id, label, decoder, timeout_ms);
        let frame = Frame::request(self.session_id.clone(), wire_id, op, body);
        let bytes = match codec::encode(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = self.correlator.expire(wire_id);
                self.deliver_result(host_id, label, Err(e)).await;
                return;
            }
        };

        self.inflight_started.insert(host_id, std::time::Instant::now());

        let expiries = self.expiries.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = expiries.send(wire_id).await;
        });

        if let Err(e) = self.session.send(bytes).await {
            let _ = self.correlator.expire(wire_id);
            self.deliver_result(host_id, label, Err(e)).await;
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Status {
                status,
                session_id,
                reconnect_attempts_left,
            } => {
                let previous = self.status;
                self.status = status;
                self.session_id = session_id.clone();

                if let Some(metrics) = &self.metrics {
                    metrics.update_session_state(status);
                    if status == SessionStatus::Connecting && previous != SessionStatus::Disconnected
                    {
                        metrics.record_reconnect_attempt();
                    }
                }

                let _ = self
                    .events
                    .send(WorkerEvent::StateChanged {
                        status,
                        session_id,
                        reconnect_attempts_left,
                    })
                    .await;

                if previous == SessionStatus::Connected && status != SessionStatus::Connected {
                    self.session_dropped().await;
                }

                match status {
                    SessionStatus::Connected => {
                        if let Some(id) = self.pending_connect.take() {
                            self.emit_reply(id, Ok(Value::Null)).await;
                        }
                    }
                    SessionStatus::Disconnected | SessionStatus::Error => {
                        if let Some(id) = self.pending_connect.take() {
                            self.emit_reply(id, Err(Error::ConnectionClosed)).await;
                        }
                        if let Some(id) = self.pending_disconnect.take() {
                            self.emit_reply(id, Ok(Value::Null)).await;
                        }
                    }
                    _ => {}
                }
            }
            SessionEvent::Inbound(frame) => self.handle_inbound(frame).await,
        }
    }

    async fn handle_inbound(&mut self, frame: Frame) {
        match frame.kind {
            FrameKind::Reply(reply) => {
                if let Some(outcome) = self.correlator.on_reply(&reply) {
                    self.deliver(outcome).await;
                }
            }
            FrameKind::Notification(notification) => {
                if let Some((internal_id, data)) = self.correlator.route(&notification) {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_notification();
                    }
                    let _ = self
                        .events
                        .send(WorkerEvent::Notification { internal_id, data })
                        .await;
                }
            }
            FrameKind::Request(request) => {
                tracing::warn!(op = %request.op, "unexpected request from server");
            }
        }
    }

    async fn handle_expiry(&mut self, request_id: RequestId) {
        if let Some(outcome) = self.correlator.expire(request_id) {
            self.deliver(outcome).await;
        }
    }

    /// Reject everything pending and close every subscription
    async fn session_dropped(&mut self) {
        let outcomes = self.correlator.fail_all(Error::ConnectionClosed);
        for outcome in outcomes {
            self.deliver(outcome).await;
        }
        let cleared = self.correlator.clear_routes();
        self.active_subscriptions.clear();
        if cleared > 0 {
            tracing::info!(count = cleared, "subscriptions closed by session drop");
        }
    }

    async fn deliver(&mut self, outcome: RequestOutcome) {
        let RequestOutcome {
            host_id,
            command,
            result,
        } = outcome;
        self.deliver_result(host_id, &command, result).await;
    }

    /// Demultiplex a resolved request to its consumer
    async fn deliver_result(&mut self, host_id: u64, command: &str, result: Result<Value>) {
        if let Some(metrics) = &self.metrics {
            let outcome = if result.is_ok() { "success" } else { "error" };
            metrics.record_request(command, outcome);
            if let Some(started) = self.inflight_started.remove(&host_id) {
                metrics.record_request_duration(command, started.elapsed().as_secs_f64());
            }
            if let Err(e) = &result {
                metrics.record_error(e.code());
            }
        } else {
            self.inflight_started.remove(&host_id);
        }

        if self.fire_and_forget.remove(&host_id) {
            if let Err(e) = result {
                tracing::warn!(command, error = %e, "background request failed");
            }
            return;
        }

        if let Some(pending) = self.pending_subscribes.remove(&host_id) {
            self.complete_subscribe(host_id, pending, result).await;
            return;
        }

        self.emit_reply(host_id, result).await;
    }

    /// Finish a subscribe: register routing, then answer the host
    ///
    /// On success the server-assigned subscription id goes into the routing
    /// table under the caller's internal id before the reply is emitted, so
    /// no notification can arrive ahead of its route.
    async fn complete_subscribe(
        &mut self,
        host_id: u64,
        pending: PendingSubscribe,
        result: Result<Value>,
    ) {
        match result {
            Ok(value) => {
                let Some(subscription_id) =
                    value["subscription_id"].as_str().map(SubscriptionId::from)
                else {
                    self.emit_reply(
                        host_id,
                        Err(Error::DecodeFailure(format!(
                            "subscribe reply for {} carried no subscription id",
                            pending.name
                        ))),
                    )
                    .await;
                    return;
                };
                self.correlator.insert_route(
                    subscription_id.clone(),
                    pending.internal_id,
                    pending.deserialize,
                );
                self.active_subscriptions
                    .insert(subscription_id.clone(), pending.name.clone());
                tracing::debug!(
                    subscription = %pending.name,
                    %subscription_id,
                    internal_id = pending.internal_id,
                    "subscription active"
                );
                self.emit_reply(host_id, Ok(value)).await;
            }
            Err(e) => self.emit_reply(host_id, Err(e)).await,
        }
    }

    async fn emit_reply(&mut self, request_id: u64, result: Result<Value>) {
        let result = result.map_err(|e| ErrorPayload::from(&e));
        let _ = self
            .events
            .send(WorkerEvent::Reply { request_id, result })
            .await;
    }

    fn allocate_background_id(&mut self) -> u64 {
        let id = self.next_background_id;
        self.next_background_id -= 1;
        id
    }

    async fn shutdown(&mut self) {
        tracing::debug!("worker shutting down");
        let _ = self.session.disconnect().await;

        let outcomes = self.correlator.fail_all(Error::ConnectionClosed);
        for outcome in outcomes {
            self.deliver(outcome).await;
        }
        self.correlator.clear_routes();
        self.active_subscriptions.clear();

        if let Some(id) = self.pending_connect.take() {
            self.emit_reply(id, Err(Error::ConnectionClosed)).await;
        }
        if let Some(id) = self.pending_disconnect.take() {
            self.emit_reply(id, Ok(Value::Null)).await;
        }

        let _ = self
            .events
            .send(WorkerEvent::StateChanged {
                status: SessionStatus::Disconnected,
                session_id: None,
                reconnect_attempts_left: 0,
            })
            .await;
    }
}
