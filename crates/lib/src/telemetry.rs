//! OpenTelemetry tracer provider setup.
//!
//! Spans go to an OTLP collector when an endpoint is configured
//! (`OTEL_EXPORTER_OTLP_ENDPOINT` / `telemetry.otlpEndpoint`), otherwise to stdout.
//! Every span carries the `service.name` resource from `telemetry.serviceName`.

use opentelemetry::global;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the tracer provider alive. Call [`TelemetryGuard::shutdown`] before exit to
/// flush buffered spans; dropping it does not flush.
pub struct TelemetryGuard {
    provider: SdkTracerProvider,
}

impl TelemetryGuard {
    pub fn shutdown(self) -> Result<(), TelemetryError> {
        self.provider.shutdown()?;
        Ok(())
    }
}

/// Build a batching provider for `service_name`. OTLP over gRPC when `otlp_endpoint`
/// is set, stdout otherwise. Must be called inside a tokio runtime.
pub fn build_provider(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<SdkTracerProvider, TelemetryError> {
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();
    let builder = SdkTracerProvider::builder().with_resource(resource);
    let provider = match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()?;
            builder.with_batch_exporter(exporter).build()
        }
        None => builder
            .with_batch_exporter(opentelemetry_stdout::SpanExporter::default())
            .build(),
    };
    Ok(provider)
}

/// Install the global tracer provider and the W3C trace-context propagator.
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<TelemetryGuard, TelemetryError> {
    let provider = build_provider(service_name, otlp_endpoint)?;
    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider.clone());
    match otlp_endpoint {
        Some(endpoint) => log::info!("tracing: exporting spans to {}", endpoint),
        None => log::info!("tracing: exporting spans to stdout"),
    }
    Ok(TelemetryGuard { provider })
}
