//! Logging and OpenTelemetry initialization for gatekeeper.
//!
//! Console output always; a plain-text log file when `LOG_TO_FILE` is on; OTLP
//! traces and logs when an endpoint is configured.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use gateconf::LoggingConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps the OTLP providers alive; flushes them on shutdown.
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush traces: {:?}", e);
            }
        }
        if let Some(provider) = self.logger_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush logs: {:?}", e);
            }
        }
    }
}

/// Accepts the conventional `WARNING`/`CRITICAL` spellings as well.
fn normalize_level(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

/// Filter from the configured level, extended by `RUST_LOG` directives.
pub fn env_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter> {
    let mut directives = normalize_level(level);
    if let Some(extra) = rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        directives.push(',');
        directives.push_str(extra);
    }
    EnvFilter::try_new(&directives).with_context(|| format!("Invalid log filter '{}'", directives))
}

/// Open the log file for appending, creating parent directories.
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

fn otlp_providers(endpoint: &str, environment: &str) -> Result<(SdkTracerProvider, SdkLoggerProvider)> {
    let resource = Resource::builder_empty()
        .with_service_name("gatekeeper")
        .with_attributes(vec![
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.to_string()),
        ])
        .build();

    let endpoint = if endpoint.starts_with("http") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build())
        .with_resource(resource)
        .build();

    Ok((tracer_provider, logger_provider))
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig, environment: &str) -> Result<TelemetryGuard> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = env_filter(&config.level, rust_log.as_deref())?;

    let file_layer = if config.to_file {
        let file = open_log_file(&config.file_path)?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    let mut guard = TelemetryGuard::default();
    let (otel_layer, log_bridge) = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let (tracer_provider, logger_provider) = otlp_providers(endpoint, environment)?;
            let tracer = tracer_provider.tracer("gatekeeper");
            global::set_tracer_provider(tracer_provider.clone());

            let bridge =
                opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

            guard.tracer_provider = Some(tracer_provider);
            guard.logger_provider = Some(logger_provider);
            (Some(tracing_opentelemetry::layer().with_tracer(tracer)), Some(bridge))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(otel_layer)
        .with(log_bridge)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        level = %config.level,
        to_file = config.to_file,
        otlp = config.otlp_endpoint.as_deref().unwrap_or("disabled"),
        "Telemetry initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_filter_lowercases_level() {
        let filter = env_filter("INFO", None).unwrap();
        assert!(filter.to_string().contains("info"));
    }

    #[test]
    fn test_env_filter_appends_rust_log() {
        let filter = env_filter("WARNING", Some("toolbox=debug")).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("toolbox=debug"));
        assert!(rendered.contains("warn"));
        assert!(!rendered.contains("warning"));
    }

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level(" Debug "), "debug");
        assert_eq!(normalize_level("CRITICAL"), "error");
        assert_eq!(normalize_level("trace"), "trace");
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gatekeeper.log");

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "first").unwrap();
        drop(file);

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "second").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }
}
