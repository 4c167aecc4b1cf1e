use crate::error::{Error, Result};

use opentelemetry::trace::{TraceId, TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

/// Fetch the trace id of the current span, zero when tracing is disabled.
pub fn get_trace_id() -> TraceId {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}

fn init_tracer_provider(url: &str, sample_ratio: f64) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(url)
        .build()
        .map_err(|e| Error::TelemetryInit(format!("failed to build span exporter: {e}")))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            sample_ratio,
        ))))
        .with_resource(
            Resource::builder()
                .with_service_name(env!("CARGO_PKG_NAME"))
                .build(),
        )
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

/// Initialize logging and, when `tracing_url` is set, OpenTelemetry trace export.
pub async fn init(
    log_filter: &str,
    log_format: LogFormat,
    tracing_url: Option<&str>,
    sample_ratio: f64,
) -> Result<()> {
    let filter = EnvFilter::try_new(log_filter)
        .map_err(|e| Error::TelemetryInit(format!("invalid log filter {log_filter}: {e}")))?;

    let fmt_layer = match log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    let otel_layer = match tracing_url {
        Some(url) => {
            let provider = init_tracer_provider(url, sample_ratio)?;
            Some(tracing_opentelemetry::layer().with_tracer(provider.tracer("podenv-webhook")))
        }
        None => None,
    };

    Registry::default()
        .with(otel_layer)
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::TelemetryInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_without_tracer_is_invalid() {
        assert_eq!(get_trace_id(), TraceId::INVALID);
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_filter() {
        let result = init("podenv=notalevel[", LogFormat::Text, None, 0.1).await;
        assert!(matches!(result, Err(Error::TelemetryInit(_))));
    }
}
