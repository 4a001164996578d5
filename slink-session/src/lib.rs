//! Session layer for slink
//!
//! Turns one WebSocket connection at a time into a logical session that
//! survives brief disconnects:
//!
//! - **Transport**: the byte-framed connection adapter and its event stream
//! - **Config**: URL, reconnect budget, keepalive policy
//! - **Session**: the state machine that performs the handshake, keeps the
//!   session alive, and reconnects with a bounded budget
//!
//! The session filters session-management traffic out of the inbound stream;
//! only application frames and status changes reach the layer above.

pub mod config;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use session::{spawn_session, SessionEvent, SessionHandle, SessionStatus};
pub use transport::{Transport, TransportEvent, WsTransport};
