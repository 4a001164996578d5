//! OpenTelemetry observability configuration and initialization
//!
//! Sets up the telemetry pipeline for slink-based applications: distributed
//! tracing and metrics exported over OTLP, bridged into Rust's `tracing`
//! ecosystem so that `tracing::info!` and `#[tracing::instrument]` flow to
//! the configured collector alongside local console output.
//!
//! # Architecture
//!
//! The pipeline has three pieces:
//!
//! 1. **Tracer provider**: batches spans and exports them over OTLP/gRPC
//! 2. **Meter provider**: aggregates metrics and exports them periodically
//! 3. **Tracing subscriber**: bridges the `tracing` macros into both, plus a
//!    local fmt layer for console output
//!
//! # Usage Pattern
//!
//! Initialize once at application startup, before building a client:
//!
//! ```rust,no_run
//! use slink_core::ObservabilityConfig;
//!
//! let config = ObservabilityConfig::new("flow-ui")
//!     .with_endpoint("http://localhost:4317")
//!     .with_log_level("debug");
//! slink_core::init_observability(config).expect("observability init");
//! ```
//!
//! # Environment Variables
//!
//! Configuration also honors the standard environment variables:
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector endpoint
//! - `RUST_LOG`: log level filter (e.g. "info", "debug")

use opentelemetry::{global, KeyValue};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Observability configuration
///
/// Traces and metrics can be toggled independently; logging to the local
/// console is always on, filtered by `log_level`.
///
/// # Defaults
///
/// The default configuration:
/// - Service name: "slink"
/// - Service version: the crate version
/// - OTLP endpoint: `$OTEL_EXPORTER_OTLP_ENDPOINT` or "http://localhost:4317"
/// - Traces and metrics enabled
/// - Log level: `$RUST_LOG` or "info"
///
/// # Examples
///
/// ```rust
/// use slink_core::ObservabilityConfig;
///
/// // Use defaults
/// let config = ObservabilityConfig::default();
///
/// // Customize
/// let custom = ObservabilityConfig::new("flow-ui")
///     .with_endpoint("http://collector:4317")
///     .with_log_level("debug")
///     .with_metrics(false);
/// ```
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name stamped on all telemetry
    ///
    /// Appears on every span and metric to identify the source. Pick a name
    /// that is unique within your environment.
    pub service_name: String,
    /// Service version stamped on all telemetry
    ///
    /// Useful for correlating telemetry with deployments. Defaults to the
    /// crate version.
    pub service_version: String,
    /// OTLP collector endpoint (gRPC)
    ///
    /// Common options: a local collector on "http://localhost:4317" or the
    /// collector service name inside a compose/cluster network.
    pub otlp_endpoint: String,
    /// Export spans
    ///
    /// Disable if you only need metrics or local logs.
    pub enable_traces: bool,
    /// Export metrics
    ///
    /// Disable if you only need traces or local logs.
    pub enable_metrics: bool,
    /// Log level filter when `RUST_LOG` is unset
    ///
    /// Standard values: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    /// Create a default configuration
    ///
    /// Designed to work out of the box with a local OpenTelemetry collector
    /// on the standard port, and to respect the standard environment
    /// variables where they are set.
    fn default() -> Self {
        Self {
            service_name: "slink".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl ObservabilityConfig {
    /// Create a new configuration with a custom service name
    ///
    /// All other settings use defaults. Use the builder methods to
    /// customize further.
    ///
    /// # Arguments
    ///
    /// * `service_name` - Unique identifier for your service
    ///
    /// # Examples
    ///
    /// ```rust
    /// use slink_core::ObservabilityConfig;
    ///
    /// let config = ObservabilityConfig::new("flow-ui").with_log_level("debug");
    /// ```
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Full URL including protocol, e.g. "http://collector:4317"
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    /// Set the log level filter
    ///
    /// # Arguments
    ///
    /// * `level` - Level string: "error", "warn", "info", "debug", "trace"
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the service version
    ///
    /// # Arguments
    ///
    /// * `version` - Version string, e.g. "1.2.3" or a commit hash
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable or disable span export
    ///
    /// # Arguments
    ///
    /// * `enable` - true to export traces, false to disable
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Enable or disable metrics export
    ///
    /// # Arguments
    ///
    /// * `enable` - true to export metrics, false to disable
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }
}

/// Initialize OpenTelemetry with the given configuration
///
/// This is the entry point for setting up observability. It configures all
/// enabled telemetry providers and connects them to the specified OTLP
/// collector.
///
/// # What This Does
///
/// 1. **Tracer provider**: distributed tracing with a batch OTLP exporter
/// 2. **Meter provider**: metrics with periodic export (every 30 s)
/// 3. **Tracing subscriber**: bridges the `tracing` macros to both, plus a
///    console fmt layer
/// 4. **Global registration**: providers become available via
///    `opentelemetry::global`
///
/// # When to Call
///
/// Call this **once** at application startup, before building clients.
/// Calling it twice panics, because global providers can only be installed
/// once per process.
///
/// # Arguments
///
/// * `config` - What to enable and where to export
///
/// # Errors
///
/// Returns an error when an exporter cannot be built (bad endpoint, missing
/// transport) or when a tracing subscriber is already installed.
///
/// # Examples
///
/// ```rust,no_run
/// use slink_core::ObservabilityConfig;
///
/// let config = ObservabilityConfig::new("flow-ui");
/// slink_core::init_observability(config).expect("observability init");
///
/// // From here on the tracing macros export to the collector:
/// tracing::info!("application started");
/// ```
pub fn init_observability(
    config: ObservabilityConfig,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        "observability initialized"
    );

    Ok(())
}

/// Resource attributes identifying this service on all telemetry
///
/// `service.name` and `service.version` let observability backends filter
/// and group data per service and per deployment.
fn resource(config: &ObservabilityConfig) -> opentelemetry_sdk::Resource {
    opentelemetry_sdk::Resource::builder_empty()
        .with_attributes(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                config.service_version.clone(),
            ),
        ])
        .build()
}

/// Initialize the tracer provider and return a tracer
///
/// Spans are batched before export for efficiency and sampled with
/// `AlwaysOn`; adjust the sampler for high-traffic production systems. The
/// tracer is returned (rather than only registered globally) because the
/// tracing subscriber needs it to build its OpenTelemetry layer.
fn init_tracer(
    config: &ObservabilityConfig,
) -> std::result::Result<opentelemetry_sdk::trace::Tracer, Box<dyn std::error::Error + Send + Sync>>
{
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource(config))
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    use opentelemetry::trace::TracerProvider as _;
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);

    Ok(tracer)
}

/// Initialize the meter provider for metrics collection
///
/// Metrics are aggregated and exported every 30 seconds, which balances
/// export overhead against freshness. The provider is registered globally so
/// any code can create meters and instruments.
fn init_metrics(
    config: &ObservabilityConfig,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(30))
        .build();

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource(config))
        .build();

    global::set_meter_provider(provider);
    Ok(())
}

/// Initialize the tracing subscriber with the OpenTelemetry layer
///
/// Three layers, each with its own job:
///
/// - **EnvFilter**: level filtering from `RUST_LOG` or the config
/// - **OpenTelemetry layer** (when traces are enabled): converts tracing
///   spans into exported OTLP spans
/// - **fmt layer**: local console output with targets and thread ids
fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    match tracer {
        Some(tracer) => {
            let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(telemetry)
                .with(fmt_layer)
                .try_init()?;
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}
