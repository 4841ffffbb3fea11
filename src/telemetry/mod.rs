//! Logging, tracing and metrics setup.
//!
//! Everything goes through `tracing`. Log lines always reach stderr; with an
//! OTLP endpoint, spans, metrics and log records are exported as well.
//! Without one, metric instruments stay no-ops.

pub mod metrics;
pub mod queue;

use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Instrumentation scope for spans emitted by this crate.
const TRACER_NAME: &str = "shopflow";

/// Configuration for telemetry initialization.
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. "http://localhost:4317".
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset, e.g. "info" or "shopflow=debug".
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn new(endpoint: Option<String>, log_level: impl Into<String>) -> Self {
        Self {
            endpoint,
            service_name: "shopflow".to_string(),
            log_level: log_level.into(),
        }
    }

    /// `RUST_LOG` wins over the configured level.
    fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .map_err(|e| Error::Config(format!("invalid LOG_LEVEL {:?}: {e}", self.log_level)))
    }
}

/// The three OTLP pipelines, built together against one endpoint.
struct Exporters {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl Exporters {
    fn build(endpoint: &str, service_name: String) -> Result<Self> {
        use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig as _};

        let resource = opentelemetry_sdk::Resource::builder()
            .with_service_name(service_name)
            .with_attribute(opentelemetry::KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ))
            .build();

        let spans = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("span"))?;
        let metrics = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("metric"))?;
        let logs = LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(exporter_error("log"))?;

        Ok(Self {
            tracer: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            meter: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource.clone())
                .build(),
            logger: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource)
                .build(),
        })
    }

    fn flush(&self) {
        let _ = self.tracer.force_flush();
        let _ = self.meter.force_flush();
        let _ = self.logger.force_flush();
    }

    /// Logs first, so records emitted while spans close still go out.
    fn shutdown(self) {
        let _ = self.logger.shutdown();
        let _ = self.meter.shutdown();
        let _ = self.tracer.shutdown();
    }
}

fn exporter_error<E: std::fmt::Display>(signal: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Other(format!("failed to create OTLP {signal} exporter: {e}"))
}

/// Keeps the OTLP pipelines alive. Dropping it flushes and shuts them down,
/// so hold it for the lifetime of the process.
pub struct TelemetryGuard {
    exporters: Option<Exporters>,
}

impl TelemetryGuard {
    /// Push out everything buffered so far. A no-op without an endpoint.
    pub fn force_flush(&self) {
        if let Some(exporters) = &self.exporters {
            exporters.flush();
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.exporters.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(exporters) = self.exporters.take() {
            exporters.shutdown();
        }
    }
}

/// Install the global subscriber (and meter provider, when exporting).
///
/// # Errors
///
/// `Error::Config` for an unparsable log filter; `Error::Other` when an
/// exporter cannot be built or a global subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = config.filter()?;
    let exporters = config
        .endpoint
        .as_deref()
        .map(|endpoint| Exporters::build(endpoint, config.service_name.clone()))
        .transpose()?;

    if let Some(exporters) = &exporters {
        opentelemetry::global::set_meter_provider(exporters.meter.clone());
    }
    let trace_layer = exporters
        .as_ref()
        .map(|e| tracing_opentelemetry::layer().with_tracer(e.tracer.tracer(TRACER_NAME)));
    let log_layer = exporters
        .as_ref()
        .map(|e| OpenTelemetryTracingBridge::new(&e.logger));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    Ok(TelemetryGuard { exporters })
}
