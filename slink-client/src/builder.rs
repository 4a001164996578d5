//! Client builder
//!
//! Fluent configuration of a [`SlinkClient`] before it starts: session
//! parameters, the command and subscription registries, and optional
//! metrics. `build()` spawns the worker without connecting; `connect()` is
//! the convenience that also awaits the first connection.

use crate::client::SlinkClient;
use crate::metrics::ClientMetrics;
use crate::registry::{CommandSpec, Registry, SubscriptionSpec};
use crate::worker::spawn_worker;
use slink_core::Result;
use slink_session::{SessionConfig, Transport, WsTransport};
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating a [`SlinkClient`]
pub struct ClientBuilder {
    config: SessionConfig,
    registry: Registry,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ClientBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: SessionConfig::new(url),
            registry: Registry::new(),
            metrics: None,
        }
    }

    /// Replace the whole session configuration
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_reconnect_interval(interval);
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_keepalive_interval(interval);
        self
    }

    pub fn max_keepalive_failures(mut self, failures: u32) -> Self {
        self.config.max_keepalive_failures = failures;
        self
    }

    /// Register a command callable through `SlinkClient::request`
    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.registry.register_command(spec);
        self
    }

    /// Register a subscription kind callable through `SlinkClient::subscribe`
    pub fn subscription(mut self, spec: SubscriptionSpec) -> Self {
        self.registry.register_subscription(spec);
        self
    }

    /// Enable OpenTelemetry client metrics under the given service name
    pub fn with_metrics(mut self, service_name: impl Into<String>) -> Self {
        self.metrics = Some(Arc::new(ClientMetrics::new(service_name.into())));
        self
    }

    /// Spawn the worker without connecting
    pub fn build(self) -> SlinkClient {
        self.build_with_transport(WsTransport::new())
    }

    /// Spawn the worker over a caller-supplied transport
    ///
    /// The seam used by tests to substitute a scripted transport.
    pub fn build_with_transport<T: Transport>(self, transport: T) -> SlinkClient {
        let (commands, events, worker) =
            spawn_worker(transport, Arc::new(self.registry), self.metrics);
        SlinkClient::from_parts(commands, events, worker, self.config)
    }

    /// Build and connect in one step
    pub async fn connect(self) -> Result<SlinkClient> {
        let client = self.build();
        client.connect().await?;
        Ok(client)
    }
}
