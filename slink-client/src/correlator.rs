//! Request/reply correlation and notification routing
//!
//! Tracks every outstanding request by its wire id until a matching reply,
//! a timeout, or a session drop resolves it, and routes inbound
//! notifications to subscription sinks by their server-assigned id.
//!
//! # Request Lifecycle
//!
//! 1. **Register**: allocate a wire id, remember the caller and decoder
//! 2. **Send**: the worker transmits the encoded frame over the session
//! 3. **Resolve**: a matching reply removes the entry and produces an
//!    outcome (decoded value, server error, or decode failure)
//! 4. **Expire**: if the timeout fires first, the entry is removed and the
//!    outcome is a timeout rejection
//! 5. **Abort**: a session drop fails everything pending at once
//!
//! # Why Outcomes Instead of Callbacks?
//!
//! The correlator is owned and mutated exclusively by the worker loop; it
//! never blocks and holds no timers of its own. Every operation returns a
//! plain [`RequestOutcome`] for the worker to deliver, which keeps all
//! channel traffic in one place and makes the map trivially unit-testable.
//!
//! # Timeouts
//!
//! Timeouts are delivered to the correlator by the worker as expiry events
//! (one spawned sleep per request). Because resolution removes the entry,
//! an expiry firing after the reply is a no-op rather than a double
//! resolution; the same holds in the other order.
//!
//! # Notification Routing
//!
//! Active subscriptions form a second map, keyed by the server-assigned
//! subscription id. Each inbound notification is decoded by its
//! subscription's deserializer and handed to the worker together with the
//! host-side internal id; unknown ids and undecodable payloads are logged
//! and dropped, never surfaced as errors.

use slink_core::{
    Error, NotificationFrame, ReplyFrame, RequestId, RequestIdAllocator, Result, SubscriptionId,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Decodes a reply body into the value handed to the caller
///
/// `None` marks a decode failure and rejects the pending request.
pub type ReplyDecoder = Arc<dyn Fn(&ReplyFrame) -> Option<serde_json::Value> + Send + Sync>;

/// Decodes a notification body into the value handed to the sink
///
/// `None` marks a decode failure; the notification is logged and dropped.
pub type NotificationDecoder =
    Arc<dyn Fn(&NotificationFrame) -> Option<serde_json::Value> + Send + Sync>;

struct PendingRequest {
    host_id: u64,
    command: String,
    decode: ReplyDecoder,
    timeout_ms: u64,
}

struct SubscriptionRoute {
    internal_id: u64,
    decode: NotificationDecoder,
}

/// A resolved pending request, ready to be reported to the host
///
/// Carries the host-side request id the worker demultiplexes on, the
/// command name (for logs and metrics), and the decoded value or rejection.
pub struct RequestOutcome {
    /// Host-side id of the caller awaiting this request
    pub host_id: u64,
    /// Command name the request was issued under
    pub command: String,
    /// Decoded reply value, or the rejection reason
    pub result: Result<serde_json::Value>,
}

/// Pending-request map and subscription routing table
///
/// # Invariants
///
/// - At most one pending entry exists per outstanding wire id
/// - Every resolution (reply, expiry, or fail-all) removes exactly one
///   entry; a second resolution attempt for the same id is a no-op
/// - A routing entry exists exactly while its subscription is active
pub struct Correlator {
    ids: RequestIdAllocator,
    pending: HashMap<RequestId, PendingRequest>,
    routes: HashMap<SubscriptionId, SubscriptionRoute>,
}

impl Correlator {
    /// Create an empty correlator drawing wire ids from `ids`
    ///
    /// The allocator is shared with the session layer so that session
    /// management and application requests never collide on an id.
    pub fn new(ids: RequestIdAllocator) -> Self {
        Self {
            ids,
            pending: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    /// Register an outstanding request and allocate its wire id
    ///
    /// # Arguments
    ///
    /// * `host_id` - Host-side id the outcome is demultiplexed on
    /// * `command` - Command name, kept for logs, metrics, and timeouts
    /// * `decode` - Decoder applied to the successful reply
    /// * `timeout_ms` - Timeout recorded for the eventual expiry rejection
    ///
    /// # Returns
    ///
    /// The wire id to stamp on the outgoing request frame.
    pub fn register(
        &mut self,
        host_id: u64,
        command: impl Into<String>,
        decode: ReplyDecoder,
        timeout_ms: u64,
    ) -> RequestId {
        let request_id = self.ids.next();
        self.pending.insert(
            request_id,
            PendingRequest {
                host_id,
                command: command.into(),
                decode,
                timeout_ms,
            },
        );
        request_id
    }

    /// Resolve a pending request against an inbound reply
    ///
    /// A matched reply removes its entry and produces exactly one outcome:
    /// a non-success status becomes `ServerError` with the code echoed
    /// verbatim, a decoder returning `None` becomes `DecodeFailure`, and
    /// everything else resolves with the decoded value.
    ///
    /// # Returns
    ///
    /// `None` for unmatched replies, which are logged and discarded.
    pub fn on_reply(&mut self, reply: &ReplyFrame) -> Option<RequestOutcome> {
        let Some(pending) = self.pending.remove(&reply.request_id) else {
            tracing::warn!(
                request_id = %reply.request_id,
                op = %reply.op,
                "dropping reply with no pending request"
            );
            return None;
        };

        let result = if !reply.status.is_success() {
            Err(Error::ServerError {
                code: reply.status.code.clone(),
                message: reply
                    .status
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} failed", pending.command)),
            })
        } else {
            match (pending.decode)(reply) {
                Some(value) => Ok(value),
                None => Err(Error::DecodeFailure(format!(
                    "reply to {} did not decode",
                    pending.command
                ))),
            }
        };

        Some(RequestOutcome {
            host_id: pending.host_id,
            command: pending.command,
            result,
        })
    }

    /// Expire a pending request whose timeout elapsed
    ///
    /// Removes the entry and produces a `Timeout` rejection carrying the
    /// command name and the elapsed timeout.
    ///
    /// # Returns
    ///
    /// `None` when the request already resolved; the late expiry is a no-op.
    pub fn expire(&mut self, request_id: RequestId) -> Option<RequestOutcome> {
        let pending = self.pending.remove(&request_id)?;
        Some(RequestOutcome {
            host_id: pending.host_id,
            result: Err(Error::Timeout {
                command: pending.command.clone(),
                timeout_ms: pending.timeout_ms,
            }),
            command: pending.command,
        })
    }

    /// Abort every pending request, e.g. on session drop
    ///
    /// # Arguments
    ///
    /// * `error` - The rejection every drained entry is failed with
    ///
    /// # Returns
    ///
    /// One outcome per previously pending request; the map is empty after.
    pub fn fail_all(&mut self, error: Error) -> Vec<RequestOutcome> {
        self.pending
            .drain()
            .map(|(_, pending)| RequestOutcome {
                host_id: pending.host_id,
                command: pending.command,
                result: Err(error.clone()),
            })
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Activate routing for a server-assigned subscription id
    ///
    /// # Arguments
    ///
    /// * `subscription_id` - The id notifications will arrive under
    /// * `internal_id` - Host-side key the sink callbacks are stored under
    /// * `decode` - Deserializer applied to each notification body
    pub fn insert_route(
        &mut self,
        subscription_id: SubscriptionId,
        internal_id: u64,
        decode: NotificationDecoder,
    ) {
        self.routes.insert(
            subscription_id,
            SubscriptionRoute {
                internal_id,
                decode,
            },
        );
    }

    /// Remove routing; late notifications for the id are dropped afterwards
    pub fn remove_route(&mut self, subscription_id: &SubscriptionId) -> bool {
        self.routes.remove(subscription_id).is_some()
    }

    /// Drop all routes, returning how many were active
    pub fn clear_routes(&mut self) -> usize {
        let count = self.routes.len();
        self.routes.clear();
        count
    }

    /// Route a notification to its sink's internal id with a decoded payload
    ///
    /// # Returns
    ///
    /// `Some((internal_id, value))` when the subscription is known and the
    /// payload decodes; otherwise `None`, with the drop reason logged.
    /// Unknown subscription ids are a warning, not an error.
    pub fn route(&self, notification: &NotificationFrame) -> Option<(u64, serde_json::Value)> {
        let Some(route) = self.routes.get(&notification.subscription_id) else {
            tracing::warn!(
                subscription_id = %notification.subscription_id,
                "dropping notification for unknown subscription"
            );
            return None;
        };
        match (route.decode)(notification) {
            Some(value) => Some((route.internal_id, value)),
            None => {
                tracing::warn!(
                    subscription_id = %notification.subscription_id,
                    "dropping notification that did not decode"
                );
                None
            }
        }
    }
}
