//! Core wire types and codec for slink
//!
//! This crate provides the foundation for the slink session transport:
//!
//! - **Types**: the framed tagged-union wire messages (requests, replies,
//!   notifications) and the identifiers that correlate them
//! - **Codec**: serialization of frames to and from wire bytes
//! - **Error handling**: the error kinds surfaced to consumers as
//!   `{code, message}` pairs
//! - **Observability**: OpenTelemetry bootstrap for traces, metrics, and logs
//!
//! The crate is transport-agnostic: it defines what travels on the wire, not
//! how. `slink-session` and `slink-client` build the WebSocket session and
//! the host-facing client on top of it.

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

// Re-export the most commonly used items for convenience
pub use error::{Error, ErrorPayload, Result};
pub use observability::{init_observability, ObservabilityConfig};
pub use types::{
    Frame, FrameKind, NotificationFrame, ReplyFrame, ReplyStatus, RequestFrame, RequestId,
    RequestIdAllocator, SessionId, SubscriptionId,
};
