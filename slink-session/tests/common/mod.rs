//! Shared test utilities for slink-session integration tests
//!
//! Provides a scripted in-memory transport for deterministic session tests
//! and a small mock WebSocket server for exercising the real transport.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use slink_core::types::ops;
use slink_core::{codec, Error, Frame, FrameKind, ReplyStatus, SessionId};
use slink_session::{SessionEvent, SessionStatus, Transport, TransportEvent};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub type Responder = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

#[derive(Default)]
struct FakeState {
    /// Fail this many upcoming connect calls
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

/// Test-side control handle for a [`FakeTransport`]
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

    pub fn sent(&self) -> Vec<Frame> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Operation names of captured outbound requests, in order
    pub fn sent_ops(&self) -> Vec<String> {
        self.sent()
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

    /// Inject an inbound frame on the live connection
    pub async fn push(&self, frame: &Frame) {
        self.push_bytes(codec::encode(frame).unwrap()).await;
    }

    /// Inject raw inbound bytes on the live connection
    pub async fn push_bytes(&self, bytes: Vec<u8>) {
        let tx = self.state.lock().unwrap().event_tx.clone();
        let tx = tx.expect("no live connection to push into");
        tx.send(TransportEvent::Frame(bytes)).await.unwrap();
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

/// Server-side knobs shared with a [`session_responder`]
pub struct ServerOptions {
    pub swallow_keepalives: AtomicBool,
}

impl ServerOptions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            swallow_keepalives: AtomicBool::new(false),
        })
    }
}

/// Canned responder playing a well-behaved session server
///
/// Answers each `session.create` with a fresh id ("S1", "S2", ...) and
/// echoes keepalives unless `swallow_keepalives` is set.
pub fn session_responder(options: Arc<ServerOptions>) -> impl FnMut(&Frame) -> Vec<Frame> + Send {
    let mut sessions = 0u32;
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
            _ => Vec::new(),
        }
    }
}

/// Await the next status event, skipping inbound frames
pub async fn next_status(
    events: &mut mpsc::Receiver<SessionEvent>,
) -> (SessionStatus, Option<SessionId>, u32) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session task ended");
        if let SessionEvent::Status {
            status,
            session_id,
            reconnect_attempts_left,
        } = event
        {
            return (status, session_id, reconnect_attempts_left);
        }
    }
}

/// Await the next inbound application frame, skipping status events
pub async fn next_inbound(events: &mut mpsc::Receiver<SessionEvent>) -> Frame {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session task ended");
        if let SessionEvent::Inbound(frame) = event {
            return frame;
        }
    }
}

/// Mock WebSocket server that echoes binary frames back
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    connections: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl MockWsServer {
    pub async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let connections: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let accept_connections = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let handle = tokio::spawn(async move {
                            let Ok(ws_stream) = accept_async(stream).await else { return };
                            let (mut write, mut read) = ws_stream.split();
                            while let Some(Ok(message)) = read.next().await {
                                if let Message::Binary(bytes) = message {
                                    if write.send(Message::Binary(bytes)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        });
                        accept_connections.lock().unwrap().push(handle);
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/", self.addr)
    }

    /// Stop accepting and drop every live connection
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        for handle in self.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
