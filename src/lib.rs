//! SLINK - session-oriented RPC and pub/sub over WebSocket
//!
//! This is the convenience crate that re-exports the slink sub-crates. Use
//! it if you want a single dependency for the whole stack.
//!
//! # Architecture
//!
//! slink is organized into modular crates:
//!
//! - **slink-core**: framed wire types, codec, errors, observability bootstrap
//! - **slink-session**: WebSocket transport and the session state machine
//!   (handshake, keepalive, bounded reconnect)
//! - **slink-client**: correlator, registries, background worker, and the
//!   promise-based host facade
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use slink::{ClientBuilder, CommandSpec};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> slink::Result<()> {
//!     let client = ClientBuilder::new("ws://localhost:9000/ws/")
//!         .command(CommandSpec::passthrough("ping", "system.ping"))
//!         .connect()
//!         .await?;
//!
//!     let pong: String = client
//!         .request("ping", json!({"echo": "hi"}), Duration::from_millis(500))
//!         .await?;
//!     println!("{pong}");
//!     Ok(())
//! }
//! ```

// Re-export the sub-crates under stable module names
pub use slink_client as client;
pub use slink_core as core;
pub use slink_session as session;

// Convenience re-exports of the most commonly used types
pub use slink_client::{ClientBuilder, CommandSpec, SlinkClient, SubscriptionSpec};
pub use slink_core::{Error, Result};
pub use slink_session::{SessionConfig, SessionStatus};
