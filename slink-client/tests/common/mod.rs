//! Shared test utilities for slink-client integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use slink_client::{ClientBuilder, CommandSpec, SlinkClient, SubscriptionSpec};
use slink_core::types::ops;
use slink_core::{codec, Error, Frame, FrameKind, ReplyStatus, SessionId, SubscriptionId};
use slink_session::{Transport, TransportEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub type Responder = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

#[derive(Default)]
struct FakeState {
    connect_failures: u32,
    connects: u32,
    sent: Vec<Frame>,
    responder: Option<Responder>,
    event_tx: Option<mpsc::Sender<TransportEvent>>,
}

/// Scripted transport: captures outbound frames and lets a responder closure
/// play the server
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Clone)]
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

pub fn fake_transport() -> (FakeTransport, FakeHandle) {
    let state = Arc::new(Mutex::new(FakeState::default()));
    (
        FakeTransport {
            state: state.clone(),
        },
        FakeHandle { state },
    )
}

impl FakeHandle {
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().unwrap().connect_failures = count;
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn sent_ops(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter_map(|frame| match &frame.kind {
                FrameKind::Request(request) => Some(request.op.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn set_responder(&self, responder: impl FnMut(&Frame) -> Vec<Frame> + Send + 'static) {
        self.state.lock().unwrap().responder = Some(Box::new(responder));
    }

    pub async fn push(&self, frame: &Frame) {
        let tx = self.state.lock().unwrap().event_tx.clone();
        let tx = tx.expect("no live connection to push into");
        tx.send(TransportEvent::Frame(codec::encode(frame).unwrap()))
            .await
            .unwrap();
    }

    /// Deliver a notification on the current session
    pub async fn notify(&self, session_id: &str, subscription_id: &str, body: Value) {
        self.push(&Frame::notification(
            Some(SessionId::from(session_id)),
            SubscriptionId::from(subscription_id),
            "flow.update",
            body,
        ))
        .await;
    }

    /// Close the live connection from the server side
    pub async fn close(&self) {
        let tx = self.state.lock().unwrap().event_tx.take();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Closed).await;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&mut self, _url: &str) -> slink_core::Result<mpsc::Receiver<TransportEvent>> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(Error::Transport("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        state.event_tx = Some(tx);
        Ok(rx)
    }

    async fn send(&mut self, bytes: Vec<u8>) -> slink_core::Result<()> {
        let frame = codec::decode(&bytes)?;
        let (replies, tx) = {
            let mut state = self.state.lock().unwrap();
            state.sent.push(frame.clone());
            let replies = match state.responder.as_mut() {
                Some(responder) => responder(&frame),
                None => Vec::new(),
            };
            (replies, state.event_tx.clone())
        };
        if let Some(tx) = tx {
            for reply in replies {
                let _ = tx
                    .send(TransportEvent::Frame(codec::encode(&reply).unwrap()))
                    .await;
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.state.lock().unwrap().event_tx = None;
    }
}

/// Server behavior knobs for [`standard_responder`]
pub struct ServerOptions {
    pub swallow_keepalives: AtomicBool,
    pub silent_ping: AtomicBool,
    pub fail_subscribe: AtomicBool,
}

impl ServerOptions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            swallow_keepalives: AtomicBool::new(false),
            silent_ping: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
        })
    }
}

/// Canned responder covering the session handshake plus the test app ops
///
/// Sessions are issued as "S1", "S2", ... and subscriptions as "sub-7",
/// "sub-8", ...
pub fn standard_responder(options: Arc<ServerOptions>) -> impl FnMut(&Frame) -> Vec<Frame> + Send {
    let mut sessions = 0u32;
    let mut subscriptions = 6u32;
    let mut current: Option<SessionId> = None;
    move |frame: &Frame| {
        let FrameKind::Request(request) = &frame.kind else {
            return Vec::new();
        };
        match request.op.as_str() {
            ops::SESSION_CREATE => {
                sessions += 1;
                let session_id = SessionId::new(format!("S{sessions}"));
                current = Some(session_id.clone());
                vec![Frame::reply(
                    Some(session_id.clone()),
                    request.request_id,
                    ops::SESSION_CREATE,
                    ReplyStatus::success(),
                    json!({ "session_id": session_id.as_str() }),
                )]
            }
            ops::SESSION_KEEPALIVE => {
                if options.swallow_keepalives.load(Ordering::SeqCst) {
                    Vec::new()
                } else {
                    vec![Frame::reply(
                        current.clone(),
                        request.request_id,
                        ops::SESSION_KEEPALIVE,
                        ReplyStatus::success(),
                        Value::Null,
                    )]
                }
            }
            "system.ping" => {
                if options.silent_ping.load(Ordering::SeqCst) {
                    Vec::new()
                } else {
                    vec![Frame::reply(
                        current.clone(),
                        request.request_id,
                        "system.ping",
                        ReplyStatus::success(),
                        json!("pong"),
                    )]
                }
            }
            "system.fail" => vec![Frame::reply(
                current.clone(),
                request.request_id,
                "system.fail",
                ReplyStatus::error("QUOTA_EXCEEDED", "too many flows"),
                Value::Null,
            )],
            "flow.subscribe" => {
                if options.fail_subscribe.load(Ordering::SeqCst) {
                    vec![Frame::reply(
                        current.clone(),
                        request.request_id,
                        "flow.subscribe",
                        ReplyStatus::error("NO_SUCH_FLOW", "unknown flow"),
                        Value::Null,
                    )]
                } else {
                    subscriptions += 1;
                    vec![Frame::reply(
                        current.clone(),
                        request.request_id,
                        "flow.subscribe",
                        ReplyStatus::success(),
                        json!({ "subscription_id": format!("sub-{subscriptions}") }),
                    )]
                }
            }
            "flow.unsubscribe" => vec![Frame::reply(
                current.clone(),
                request.request_id,
                "flow.unsubscribe",
                ReplyStatus::success(),
                Value::Null,
            )],
            _ => Vec::new(),
        }
    }
}

/// Client wired for the test server: ping/fail commands, flow subscription,
/// keepalives parked far away unless a test brings them in
pub fn test_client(transport: FakeTransport) -> SlinkClient {
    test_client_with(transport, |builder| builder)
}

pub fn test_client_with(
    transport: FakeTransport,
    customize: impl FnOnce(ClientBuilder) -> ClientBuilder,
) -> SlinkClient {
    let builder = ClientBuilder::new("ws://test:9000/ws/")
        .keepalive_interval(Duration::from_secs(60))
        .command(CommandSpec::passthrough("ping", "system.ping"))
        .command(CommandSpec::passthrough("fail", "system.fail"))
        .subscription(SubscriptionSpec::passthrough(
            "flow",
            "flow.subscribe",
            "flow.unsubscribe",
        ));
    customize(builder).build_with_transport(transport)
}

/// Poll a condition under paused time until it holds
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
