//! Client metrics definitions
//!
//! OpenTelemetry instruments for monitoring session health and request
//! traffic. Recorded automatically by the worker when metrics are enabled on
//! the builder; exported by the meter provider installed via
//! `slink_core::init_observability`.

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};
use slink_session::SessionStatus;

/// Client metrics for monitoring
pub struct ClientMetrics {
    /// Session status (0=disconnected, 1=connecting, 2=session-init,
    /// 3=connected, 4=keepalive-failed, 5=error)
    pub session_state: Gauge<i64>,
    /// Total requests dispatched
    pub requests_total: Counter<u64>,
    /// Request duration in seconds
    pub request_duration: Histogram<f64>,
    /// Total errors surfaced to callers
    pub errors_total: Counter<u64>,
    /// Reconnect attempts started
    pub reconnect_attempts: Counter<u64>,
    /// Notifications delivered to sinks
    pub notifications_total: Counter<u64>,
}

impl ClientMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            session_state: meter
                .i64_gauge("slink.client.session.state")
                .with_description(
                    "Session status (0=disconnected, 1=connecting, 2=session-init, 3=connected, 4=keepalive-failed, 5=error)",
                )
                .build(),
            requests_total: meter
                .u64_counter("slink.client.requests.total")
                .with_description("Total requests dispatched")
                .build(),
            request_duration: meter
                .f64_histogram("slink.client.request.duration")
                .with_description("Request duration in seconds")
                .build(),
            errors_total: meter
                .u64_counter("slink.client.errors.total")
                .with_description("Total errors surfaced to callers")
                .build(),
            reconnect_attempts: meter
                .u64_counter("slink.client.reconnect.attempts")
                .with_description("Reconnect attempts started")
                .build(),
            notifications_total: meter
                .u64_counter("slink.client.notifications.total")
                .with_description("Notifications delivered to sinks")
                .build(),
        }
    }

    pub fn update_session_state(&self, status: SessionStatus) {
        self.session_state.record(status_value(status), &[]);
    }

    pub fn record_request(&self, command: &str, outcome: &str) {
        self.requests_total.add(
            1,
            &[
                KeyValue::new("command", command.to_string()),
                KeyValue::new("outcome", outcome.to_string()),
            ],
        );
    }

    pub fn record_request_duration(&self, command: &str, seconds: f64) {
        self.request_duration
            .record(seconds, &[KeyValue::new("command", command.to_string())]);
    }

    pub fn record_error(&self, code: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("code", code.to_string())]);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.add(1, &[]);
    }

    pub fn record_notification(&self) {
        self.notifications_total.add(1, &[]);
    }
}

fn status_value(status: SessionStatus) -> i64 {
    match status {
        SessionStatus::Disconnected => 0,
        SessionStatus::Connecting => 1,
        SessionStatus::SessionInit => 2,
        SessionStatus::Connected => 3,
        SessionStatus::KeepaliveFailed => 4,
        SessionStatus::Error => 5,
    }
}
