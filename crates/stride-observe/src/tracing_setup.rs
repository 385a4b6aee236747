//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! Stride is a library workspace, so initialization is an explicit call
//! the host makes once at startup rather than something hidden in a
//! constructor:
//!
//! ```no_run
//! use stride_observe::tracing_setup::{init_tracing, LogFormat, TracingOptions};
//!
//! // Human-readable logs for a development terminal
//! init_tracing(TracingOptions::default()).unwrap();
//!
//! // JSON lines + OTel stdout export for an aggregated deployment
//! init_tracing(TracingOptions {
//!     format: LogFormat::Json,
//!     enable_otel: true,
//! }).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use std::sync::OnceLock;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Filter applied when `RUST_LOG` is unset: everything at info, with the
/// chatty HTTP and database dependencies capped at warn so coaching-turn
/// logs stay readable.
const DEFAULT_DIRECTIVES: &str = "info,sqlx=warn,reqwest=warn,hyper_util=warn";

/// Log output format for the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for development terminals.
    #[default]
    Text,
    /// One JSON object per line, for log aggregation pipelines.
    Json,
}

/// Options for [`init_tracing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOptions {
    pub format: LogFormat,
    /// Bridge tracing spans to OpenTelemetry with a stdout exporter
    /// (suitable for local development; swap the exporter for OTLP in
    /// production).
    pub enable_otel: bool,
}

/// Initialize the global tracing subscriber.
///
/// Installs a structured `fmt` layer (text or JSON per
/// [`TracingOptions::format`]) with target visibility and span close
/// timing, so the GenAI completion spans emitted by the orchestration
/// core carry their duration. Respects `RUST_LOG`; without it, the
/// stride default directives apply.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set or if
/// the OTel pipeline fails to initialize.
pub fn init_tracing(options: TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let otel_layer = if options.enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("stride");

        // Store the provider for shutdown and register it globally.
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    match options.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?,
    }

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Call this before process exit to ensure all buffered spans are exported.
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_single_use() {
        assert!(init_tracing(TracingOptions::default()).is_ok());
        // The global subscriber slot is taken now
        let second = init_tracing(TracingOptions {
            format: LogFormat::Json,
            enable_otel: false,
        });
        assert!(second.is_err());
    }
}
