//! WebSocket transport adapter
//!
//! Owns one bidirectional byte-framed connection and nothing else: no framing
//! knowledge beyond binary messages, no session state. Lifecycle and inbound
//! frames are delivered through the event channel returned by `connect`;
//! errors on that channel are advisory, `Closed` is the authoritative end of
//! a connection.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use slink_core::{Error, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Events a live connection emits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound binary frame
    Frame(Vec<u8>),
    /// Advisory failure; the connection may still close separately
    Error(String),
    /// The connection is gone; always the final event
    Closed,
}

/// One bidirectional byte-framed connection
///
/// Implementations own at most one live connection. `connect` tears down any
/// prior connection first; `disconnect` is idempotent.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Open a connection; a successful return is the open signal
    async fn connect(&mut self, url: &str) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Transmit one binary frame; `NotConnected` when no connection is open
    async fn send(&mut self, bytes: Vec<u8>) -> Result<()>;

    /// Close the connection and discard the handle
    async fn disconnect(&mut self);
}

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    Message,
>;

/// Transport over `tokio-tungstenite`
///
/// A reader task forwards inbound binary frames into the event channel; text
/// and control frames are ignored. The task ends with a final `Closed` event
/// whether the peer closed cleanly or the stream errored.
pub struct WsTransport {
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            sink: None,
            reader: None,
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self, url: &str) -> Result<mpsc::Receiver<TransportEvent>> {
        self.disconnect().await;

        tracing::debug!(url, "opening connection");
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let (sink, mut stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel(64);

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Binary(bytes)) => {
                        if tx.send(TransportEvent::Frame(bytes.to_vec())).await.is_err() {
                            // Consumer detached; stop reading.
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            let _ = tx.send(TransportEvent::Closed).await;
        });

        self.sink = Some(sink);
        self.reader = Some(reader);
        Ok(rx)
    }

    async fn send(&mut self, bytes: Vec<u8>) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink
                .send(Message::Binary(bytes.into()))
                .await
                .map_err(|e| Error::Transport(e.to_string())),
            None => Err(Error::NotConnected),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let mut transport = WsTransport::new();
        let result = transport.send(vec![1, 2, 3]).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut transport = WsTransport::new();
        transport.disconnect().await;
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut transport = WsTransport::new();
        // Port 1 is never listening.
        let result = transport.connect("ws://127.0.0.1:1/ws/").await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
