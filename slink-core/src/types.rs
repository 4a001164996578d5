//! Framed wire messages exchanged with the backend
//!
//! The wire speaks a tagged-union envelope with three top-level variants:
//!
//! 1. **Request**: a call that expects a reply, correlated by `request_id`
//! 2. **Reply**: the outcome of a request (status code + body)
//! 3. **Notification**: an unsolicited server push, routed by `subscription_id`
//!
//! Every frame carries the `session_id` of the logical session it belongs to
//! (absent only during session establishment). The payload of each variant is
//! an opaque `serde_json::Value` body; typed encoding and decoding happens in
//! the command and subscription registries, never here.
//!
//! # Identifiers
//!
//! Three identifier newtypes keep the different correlation spaces apart at
//! the type level:
//!
//! - [`SessionId`]: server-issued, names the logical session
//! - [`RequestId`]: client-allocated, pairs a request with its reply
//! - [`SubscriptionId`]: server-assigned, names a notification stream
//!
//! Mixing them up becomes a compile error instead of a routing bug.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Server-issued identifier of a logical session
///
/// A session spans one or more transport connections; the id is assigned by
/// the backend in the `session.create` reply and stamped on every subsequent
/// frame in both directions. Frames whose session id does not match the
/// current session are dropped by the session layer.
///
/// # Why a Newtype?
///
/// Session ids, subscription ids, and request bodies all travel as strings
/// on the wire. Wrapping the session id keeps it from being compared against
/// the wrong kind of string by accident.
///
/// # Examples
///
/// ```rust
/// use slink_core::SessionId;
///
/// let id = SessionId::from("S1");
/// assert_eq!(id.as_str(), "S1");
/// assert_eq!(id.to_string(), "S1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id from any string-like value
    ///
    /// # Arguments
    ///
    /// * `id` - The raw identifier as received from the backend
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Correlation id of a request/reply pair
///
/// Allocated client-side from a single monotonic counter shared by every
/// component that issues requests on one connection, so an id is never in
/// flight twice. The server echoes the id back on the matching reply.
///
/// # Ordering
///
/// Ids are ordered by allocation, which makes them usable as map keys and
/// lets tests assert on issue order.
///
/// # Examples
///
/// ```rust
/// use slink_core::RequestId;
///
/// let id = RequestId::from(42);
/// assert_eq!(id.value(), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// The raw numeric value of this id
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Shared allocator for wire request ids
///
/// Cloned into every component that sends requests (session management and
/// the correlator), guaranteeing uniqueness without coordination. Clones
/// share one atomic counter, so ids handed out through any clone never
/// collide.
///
/// # Why Shared?
///
/// The session layer issues its own `session.create` and `session.keepalive`
/// requests on the same connection the correlator uses for application
/// requests. A reply is matched purely by id, so both issuers must draw from
/// one sequence.
///
/// # Examples
///
/// ```rust
/// use slink_core::RequestIdAllocator;
///
/// let ids = RequestIdAllocator::new();
/// let clone = ids.clone();
///
/// let a = ids.next();
/// let b = clone.next();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestIdAllocator(Arc<AtomicU64>);

impl RequestIdAllocator {
    /// Create a fresh allocator starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next unused request id
    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Server-assigned identifier of a notification stream
///
/// Returned by a subscribe reply and carried on every notification that
/// belongs to the stream. The client routes notifications to their sinks by
/// this id; after unsubscribing, late notifications bearing it are dropped.
///
/// # Examples
///
/// ```rust
/// use slink_core::SubscriptionId;
///
/// let id = SubscriptionId::from("sub-7");
/// assert_eq!(id.as_str(), "sub-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create a subscription id from any string-like value
    ///
    /// # Arguments
    ///
    /// * `id` - The raw identifier as received in a subscribe reply
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status code literal a reply carries on success
///
/// Anything other than this exact string is an error code surfaced verbatim
/// to the caller.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Outcome status carried on every reply frame
///
/// `code` is `"SUCCESS"` on success; any other value is an error code that is
/// surfaced verbatim to the caller as a `ServerError`. The optional `message`
/// carries human-readable detail and is never interpreted.
///
/// # Examples
///
/// ```rust
/// use slink_core::ReplyStatus;
///
/// assert!(ReplyStatus::success().is_success());
///
/// let status = ReplyStatus::error("NO_SUCH_FLOW", "unknown flow");
/// assert!(!status.is_success());
/// assert_eq!(status.code, "NO_SUCH_FLOW");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyStatus {
    /// Outcome code; `"SUCCESS"` or a server-defined error code
    pub code: String,
    /// Optional human-readable detail for error codes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReplyStatus {
    /// The successful status
    pub fn success() -> Self {
        Self {
            code: STATUS_SUCCESS.to_string(),
            message: None,
        }
    }

    /// An error status with a code and detail message
    ///
    /// # Arguments
    ///
    /// * `code` - The error code echoed to the caller
    /// * `message` - Human-readable detail
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: Some(message.into()),
        }
    }

    /// True when the code is exactly [`STATUS_SUCCESS`]
    pub fn is_success(&self) -> bool {
        self.code == STATUS_SUCCESS
    }
}

/// Operation names of the session-management protocol
///
/// These requests are issued by the session layer itself; their replies are
/// consumed by it and never forwarded to the correlator. Application
/// operations live in the command and subscription registries instead.
pub mod ops {
    /// Establish a session; body carries the client correlation id
    pub const SESSION_CREATE: &str = "session.create";
    /// Liveness probe sent after a period of inbound silence
    pub const SESSION_KEEPALIVE: &str = "session.keepalive";
    /// Best-effort teardown sent on orderly disconnect
    pub const SESSION_DESTROY: &str = "session.destroy";

    /// True for operations whose replies the session layer consumes
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slink_core::types::ops;
    ///
    /// assert!(ops::is_session_op(ops::SESSION_KEEPALIVE));
    /// assert!(!ops::is_session_op("flow.subscribe"));
    /// ```
    pub fn is_session_op(op: &str) -> bool {
        matches!(op, SESSION_CREATE | SESSION_KEEPALIVE | SESSION_DESTROY)
    }
}

/// Body of a `session.create` request
///
/// The client correlation id is chosen by the client before any session
/// exists; the server answers with the authoritative [`SessionId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateBody {
    /// Client-chosen correlation id for the handshake
    pub client_session_id: String,
}

/// Body of a `session.create` reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreateReplyBody {
    /// The server-issued identity of the new session
    pub session_id: SessionId,
}

/// A call expecting a reply
///
/// The `op` names the operation; the registries know how to build and read
/// the `body` for each op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id echoed on the matching reply
    pub request_id: RequestId,
    /// Operation name, e.g. `"flow.subscribe"`
    pub op: String,
    /// Operation parameters; shape is owned by the registries
    #[serde(default)]
    pub body: serde_json::Value,
}

/// The outcome of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// Correlation id of the request this reply answers
    pub request_id: RequestId,
    /// Operation name echoed from the request
    pub op: String,
    /// Success or error outcome
    pub status: ReplyStatus,
    /// Result payload; shape is owned by the registries
    #[serde(default)]
    pub body: serde_json::Value,
}

/// An unsolicited server push on a subscription stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationFrame {
    /// The stream this notification belongs to
    pub subscription_id: SubscriptionId,
    /// Notification kind, e.g. `"flow.update"`
    pub op: String,
    /// Notification payload; shape is owned by the subscription spec
    #[serde(default)]
    pub body: serde_json::Value,
}

/// The three top-level wire variants
///
/// Serialized with an internal `"kind"` tag so a frame on the wire reads as
/// one flat object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameKind {
    Request(RequestFrame),
    Reply(ReplyFrame),
    Notification(NotificationFrame),
}

/// One encoded unit on the wire
///
/// The envelope adds the session id to whichever variant is inside. It is
/// `None` only while the session handshake itself is in flight.
///
/// # Examples
///
/// ```rust
/// use slink_core::{Frame, RequestId, SessionId};
/// use serde_json::json;
///
/// let frame = Frame::request(
///     Some(SessionId::from("S1")),
///     RequestId::from(1),
///     "ping",
///     json!({"echo": "hi"}),
/// );
/// assert!(frame.is_request());
/// assert!(!frame.is_notification());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// The session this frame belongs to; absent during the handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(flatten)]
    pub kind: FrameKind,
}

impl Frame {
    /// Build a request frame
    ///
    /// # Arguments
    ///
    /// * `session_id` - Current session, or `None` during the handshake
    /// * `request_id` - Correlation id for the eventual reply
    /// * `op` - Operation name
    /// * `body` - Operation parameters
    pub fn request(
        session_id: Option<SessionId>,
        request_id: RequestId,
        op: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            session_id,
            kind: FrameKind::Request(RequestFrame {
                request_id,
                op: op.into(),
                body,
            }),
        }
    }

    /// Build a reply frame
    ///
    /// # Arguments
    ///
    /// * `session_id` - Session the reply belongs to
    /// * `request_id` - Correlation id echoed from the request
    /// * `op` - Operation name echoed from the request
    /// * `status` - Success or error outcome
    /// * `body` - Result payload
    pub fn reply(
        session_id: Option<SessionId>,
        request_id: RequestId,
        op: impl Into<String>,
        status: ReplyStatus,
        body: serde_json::Value,
    ) -> Self {
        Self {
            session_id,
            kind: FrameKind::Reply(ReplyFrame {
                request_id,
                op: op.into(),
                status,
                body,
            }),
        }
    }

    /// Build a notification frame
    ///
    /// # Arguments
    ///
    /// * `session_id` - Session the notification belongs to
    /// * `subscription_id` - Stream the notification belongs to
    /// * `op` - Notification kind
    /// * `body` - Notification payload
    pub fn notification(
        session_id: Option<SessionId>,
        subscription_id: SubscriptionId,
        op: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            session_id,
            kind: FrameKind::Notification(NotificationFrame {
                subscription_id,
                op: op.into(),
                body,
            }),
        }
    }

    /// True for the `Request` variant
    pub fn is_request(&self) -> bool {
        matches!(self.kind, FrameKind::Request(_))
    }

    /// True for the `Reply` variant
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, FrameKind::Reply(_))
    }

    /// True for the `Notification` variant
    pub fn is_notification(&self) -> bool {
        matches!(self.kind, FrameKind::Notification(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_allocator_is_monotonic() {
        let ids = RequestIdAllocator::new();
        let a = ids.next();
        let b = ids.next();
        assert!(b > a);

        let clone = ids.clone();
        let c = clone.next();
        assert!(c > b, "clones share the same counter");
    }

    #[test]
    fn test_reply_status_success_literal() {
        assert!(ReplyStatus::success().is_success());
        assert!(!ReplyStatus::error("NO_SUCH_FLOW", "unknown flow").is_success());
        assert_eq!(ReplyStatus::success().code, "SUCCESS");
    }

    #[test]
    fn test_session_ops_classification() {
        assert!(ops::is_session_op(ops::SESSION_CREATE));
        assert!(ops::is_session_op(ops::SESSION_KEEPALIVE));
        assert!(ops::is_session_op(ops::SESSION_DESTROY));
        assert!(!ops::is_session_op("flow.subscribe"));
    }

    #[test]
    fn test_frame_serialization_round_trip() {
        let frame = Frame::request(
            Some(SessionId::from("S1")),
            RequestId::from(7),
            "ping",
            json!({"echo": "hello"}),
        );

        let encoded = serde_json::to_vec(&frame).unwrap();
        let decoded: Frame = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(decoded.session_id, Some(SessionId::from("S1")));
        match decoded.kind {
            FrameKind::Request(req) => {
                assert_eq!(req.request_id, RequestId::from(7));
                assert_eq!(req.op, "ping");
                assert_eq!(req.body["echo"], "hello");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_frame_kind_tag() {
        let frame = Frame::notification(
            Some(SessionId::from("S1")),
            SubscriptionId::from("sub-1"),
            "flow.update",
            json!({"value": 1}),
        );
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"kind\":\"notification\""));
        assert!(text.contains("\"subscription_id\":\"sub-1\""));
    }

    #[test]
    fn test_frame_without_session_id() {
        let frame = Frame::request(None, RequestId::from(0), ops::SESSION_CREATE, json!({}));
        let text = serde_json::to_string(&frame).unwrap();
        assert!(!text.contains("session_id"));

        let decoded: Frame = serde_json::from_str(&text).unwrap();
        assert!(decoded.session_id.is_none());
    }

    #[test]
    fn test_frame_predicates() {
        let req = Frame::request(None, RequestId::from(1), "ping", json!(null));
        assert!(req.is_request());
        assert!(!req.is_reply());

        let reply = Frame::reply(
            None,
            RequestId::from(1),
            "ping",
            ReplyStatus::success(),
            json!(null),
        );
        assert!(reply.is_reply());
        assert!(!reply.is_notification());
    }
}
