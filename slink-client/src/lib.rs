//! Session client for slink
//!
//! The host-facing half of the stack: a background worker hosts the session
//! and correlator, and [`SlinkClient`] exposes them as promise-based
//! `request → reply` and `subscribe → stream` operations.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use slink_client::{ClientBuilder, CommandSpec, SubscriptionSpec};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> slink_core::Result<()> {
//!     let client = ClientBuilder::new("ws://localhost:9000/ws/")
//!         .command(CommandSpec::passthrough("ping", "system.ping"))
//!         .subscription(SubscriptionSpec::passthrough(
//!             "flow",
//!             "flow.subscribe",
//!             "flow.unsubscribe",
//!         ))
//!         .connect()
//!         .await?;
//!
//!     let pong: String = client
//!         .request("ping", json!({"echo": "hello"}), Duration::from_millis(500))
//!         .await?;
//!     println!("{pong}");
//!
//!     let handle = client
//!         .subscribe(
//!             "flow",
//!             json!({}),
//!             |data| async move { println!("update: {data}") },
//!             |err| async move { eprintln!("subscription closed: {err}") },
//!         )
//!         .await?;
//!
//!     client.unsubscribe(handle).await?;
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod builder;
mod client;
mod correlator;
mod metrics;
mod registry;
mod worker;

pub use builder::ClientBuilder;
pub use client::{DataHandler, ErrorHandler, LifecycleHandler, SlinkClient};
pub use metrics::ClientMetrics;
pub use registry::{CommandSpec, Registry, SubscriptionSpec};
pub use worker::{Command, WorkerEvent};
