//! Error types for slink
//!
//! This module provides the error handling surface for the whole stack. It
//! defines two types:
//!
//! - **Error**: the application-level error enum (uses thiserror)
//! - **ErrorPayload**: the plain `{code, message}` value that crosses the
//!   worker boundary
//!
//! # Error Hierarchy
//!
//! The `Error` enum covers every failure surfaced by the transport, session,
//! correlator, and facade layers, from socket problems to decode mismatches.
//! Each variant maps to a stable code string via [`Error::code`], and the
//! pair of `From` conversions between `Error` and [`ErrorPayload`] carries
//! errors across the worker boundary without losing the variant.
//!
//! # Propagation Policy
//!
//! Recoverable conditions (session mismatches, malformed frames, late
//! notifications) are logged and absorbed inside the worker; all other
//! errors surface to the caller through its pending future or its
//! subscription error sink. The session layer never throws outward; its
//! lifecycle feedback is status changes only.
//!
//! # Examples
//!
//! ```rust
//! use slink_core::Error;
//!
//! let err = Error::ServerError {
//!     code: "NO_SUCH_FLOW".into(),
//!     message: "unknown flow".into(),
//! };
//! // Server codes are echoed verbatim.
//! assert_eq!(err.code(), "NO_SUCH_FLOW");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for slink operations
///
/// This is a convenience type alias that uses the slink [`Error`] type.
/// Used throughout the slink crates for consistent error handling.
pub type Result<T> = std::result::Result<T, Error>;

/// All error conditions surfaced by slink
///
/// # Error Categories
///
/// - **Caller errors**: `NotConnected` (issued at the wrong time)
/// - **Request outcomes**: `Timeout`, `DecodeFailure`, `ServerError`
/// - **Lifecycle**: `ConnectionClosed`, `WorkerLost`
/// - **Internal/ambient**: `SessionMismatch`, `Transport`, `Serialization`,
///   `Internal`
///
/// # Usage with thiserror
///
/// This enum uses the `thiserror` crate to implement `std::error::Error`
/// and provide readable messages.
///
/// # Conversion Across the Worker Boundary
///
/// Errors cross the host/worker channel as [`ErrorPayload`] values; the
/// `From` conversions in both directions keep the variant and, for
/// timeouts, the structured fields.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A request was issued while the session is not connected
    ///
    /// There is no send queue below the facade: callers observing connection
    /// churn must retry at their own layer.
    #[error("not connected")]
    NotConnected,

    /// A request exceeded its timeout without a matching reply
    ///
    /// The pending entry is removed when the timeout fires, so a reply that
    /// arrives later is dropped with a warning instead of resolving anything.
    #[error("request {command} timed out after {timeout_ms} ms")]
    Timeout {
        /// Name of the command that timed out
        command: String,
        /// The timeout that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// A reply arrived but could not be decoded into the expected shape
    ///
    /// For replies this rejects the pending future; for notifications the
    /// frame is logged and dropped instead.
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// The server answered with a non-success status code
    ///
    /// The original code is echoed verbatim; slink never interprets it.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Server-defined error code, passed through unchanged
        code: String,
        /// Human-readable detail from the reply status
        message: String,
    },

    /// A pending request was aborted because the session dropped
    ///
    /// Fired for every outstanding request when the session leaves the
    /// connected state, and for everything pending on dispose.
    #[error("connection closed")]
    ConnectionClosed,

    /// A session-scoped message arrived for a different session
    ///
    /// Internal only; such frames are dropped with a warning and never
    /// surface through a future.
    #[error("session id mismatch")]
    SessionMismatch,

    /// The background worker terminated unexpectedly
    ///
    /// Facade-level only: pending requests reject with this and every
    /// subscription is closed through its error sink.
    #[error("worker lost")]
    WorkerLost,

    /// Transport-level failure (connect, send, socket teardown)
    ///
    /// Advisory in most paths; the authoritative lifecycle signal is the
    /// transport close event.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization or deserialization failure outside the reply path
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal condition
    ///
    /// Used sparingly, e.g. for requests naming an unregistered command.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable code string surfaced to consumers as part of `{code, message}`
    ///
    /// Every variant maps to a fixed code except `ServerError`, which echoes
    /// the server's own code.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slink_core::Error;
    ///
    /// assert_eq!(Error::NotConnected.code(), "NOT_CONNECTED");
    /// assert_eq!(Error::ConnectionClosed.code(), "CONNECTION_CLOSED");
    ///
    /// let server = Error::ServerError {
    ///     code: "QUOTA_EXCEEDED".into(),
    ///     message: "too many flows".into(),
    /// };
    /// assert_eq!(server.code(), "QUOTA_EXCEEDED");
    /// ```
    pub fn code(&self) -> &str {
        match self {
            Error::NotConnected => "NOT_CONNECTED",
            Error::Timeout { .. } => "TIMEOUT",
            Error::DecodeFailure(_) => "DECODE_FAILURE",
            Error::ServerError { code, .. } => code,
            Error::ConnectionClosed => "CONNECTION_CLOSED",
            Error::SessionMismatch => "SESSION_MISMATCH",
            Error::WorkerLost => "WORKER_LOST",
            Error::Transport(_) => "TRANSPORT",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

/// Wire shape of an error crossing the worker boundary
///
/// Always a `{code, message}` pair; timeouts additionally carry their
/// structured fields so the host can rebuild the exact error.
///
/// # Why Not Send `Error` Directly?
///
/// The command/event protocol carries only plain structural values. The
/// payload is that value: serializable, self-describing, and stable even if
/// the `Error` enum grows variants the other side does not know.
///
/// # Examples
///
/// ```rust
/// use slink_core::{Error, ErrorPayload};
///
/// let payload = ErrorPayload::from(&Error::ConnectionClosed);
/// assert_eq!(payload.code, "CONNECTION_CLOSED");
///
/// // The host side rebuilds the typed error from the payload.
/// assert!(matches!(Error::from(payload), Error::ConnectionClosed));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable code string, as produced by [`Error::code`]
    pub code: String,
    /// Human-readable detail; for message-carrying variants this is the
    /// inner detail, not the rendered `Display` text
    pub message: String,
    /// Command name, present only for timeouts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Elapsed timeout in milliseconds, present only for timeouts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl From<&Error> for ErrorPayload {
    /// Flatten a typed error into its boundary representation
    ///
    /// Message variants carry their inner detail, not the rendered Display
    /// text, so reconstruction does not stack prefixes.
    fn from(err: &Error) -> Self {
        let message = match err {
            Error::DecodeFailure(m)
            | Error::Transport(m)
            | Error::Serialization(m)
            | Error::Internal(m) => m.clone(),
            Error::ServerError { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let (command, timeout_ms) = match err {
            Error::Timeout {
                command,
                timeout_ms,
            } => (Some(command.clone()), Some(*timeout_ms)),
            _ => (None, None),
        };
        Self {
            code: err.code().to_string(),
            message,
            command,
            timeout_ms,
        }
    }
}

impl From<ErrorPayload> for Error {
    /// Reconstruct a typed error on the host side of the boundary
    ///
    /// Codes minted by `Error::code` map back to their variant; anything else
    /// is a server code and becomes `ServerError`.
    fn from(payload: ErrorPayload) -> Self {
        match payload.code.as_str() {
            "NOT_CONNECTED" => Error::NotConnected,
            "CONNECTION_CLOSED" => Error::ConnectionClosed,
            "SESSION_MISMATCH" => Error::SessionMismatch,
            "WORKER_LOST" => Error::WorkerLost,
            "DECODE_FAILURE" => Error::DecodeFailure(payload.message),
            "TIMEOUT" => Error::Timeout {
                command: payload.command.unwrap_or(payload.message),
                timeout_ms: payload.timeout_ms.unwrap_or_default(),
            },
            "TRANSPORT" => Error::Transport(payload.message),
            "SERIALIZATION" => Error::Serialization(payload.message),
            "INTERNAL" => Error::Internal(payload.message),
            code => Error::ServerError {
                code: code.to_string(),
                message: payload.message,
            },
        }
    }
}
