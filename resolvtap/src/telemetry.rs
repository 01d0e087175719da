//! OpenTelemetry metrics export
//!
//! Metrics are exported only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//! Every `record_*` helper is a no-op otherwise.

use anyhow::{Context, Result};
use log::info;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metric export interval in seconds
const METRIC_EXPORT_INTERVAL_SECS: u64 = 30;

static METRICS: OnceLock<ResolvTapMetrics> = OnceLock::new();

/// Global MeterProvider for graceful shutdown
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Read by the `attached_probes` gauge callback
static ATTACHED_PROBES: AtomicU64 = AtomicU64::new(0);

/// Note: Do NOT add _total suffix to Counter names (Prometheus adds it automatically)
pub struct ResolvTapMetrics {
    pub lookup_events: Counter<u64>,
    pub lookup_decode_failures: Counter<u64>,
    pub probe_symbols_missing: Counter<u64>,
}

impl ResolvTapMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            lookup_events: meter
                .u64_counter("lookup_events")
                .with_description("Number of decoded name lookups")
                .with_unit("events")
                .build(),
            lookup_decode_failures: meter
                .u64_counter("lookup_decode_failures")
                .with_description("Number of lookup records that failed to decode")
                .with_unit("events")
                .build(),
            probe_symbols_missing: meter
                .u64_counter("probe_symbols_missing")
                .with_description("Declared probes skipped because the symbol is missing")
                .with_unit("probes")
                .build(),
        }
    }
}

/// Priority:
/// 1. OTEL_EXPORTER_OTLP_ENDPOINT environment variable
/// 2. If not set, metrics are disabled (no default fallback)
fn get_otlp_endpoint() -> Option<String> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    if endpoint.is_empty() {
        return None;
    }

    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        Some(format!("http://{}", endpoint))
    } else {
        Some(endpoint)
    }
}

/// Initialize OpenTelemetry metrics provider
///
/// Must be called from within a tokio runtime.
pub fn init_metrics() -> Result<()> {
    let endpoint = match get_otlp_endpoint() {
        Some(ep) => ep,
        None => {
            info!("OTEL_EXPORTER_OTLP_ENDPOINT not set. Metrics export disabled.");
            return Ok(());
        }
    };

    info!("Initializing OpenTelemetry metrics exporter");
    info!("OTLP endpoint: {}", endpoint);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(Duration::from_secs(METRIC_EXPORT_INTERVAL_SECS))
        .build();

    let resource = Resource::default().merge(&Resource::new(vec![
        KeyValue::new("service.name", "resolvtap"),
        KeyValue::new("telemetry.sdk.language", "rust"),
    ]));

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);

    let meter = global::meter("resolvtap");

    let _attached_probes_gauge = meter
        .u64_observable_gauge("attached_probes")
        .with_description("Number of uprobes attached to the runtime library")
        .with_unit("probes")
        .with_callback(|observer| {
            observer.observe(ATTACHED_PROBES.load(Ordering::Relaxed), &[]);
        })
        .build();

    let _ = METRICS.set(ResolvTapMetrics::new(&meter));

    info!("OpenTelemetry metrics initialized successfully");
    Ok(())
}

pub fn metrics() -> Option<&'static ResolvTapMetrics> {
    METRICS.get()
}

pub fn record_attached_probes(count: u64) {
    ATTACHED_PROBES.store(count, Ordering::Relaxed);
}

pub fn record_missing_symbol(function: &str) {
    if let Some(m) = metrics() {
        m.probe_symbols_missing
            .add(1, &[KeyValue::new("function", function.to_string())]);
    }
}

pub fn record_lookup_event(address_family: u32) {
    if let Some(m) = metrics() {
        let family = if address_family == resolvtap_common::AF_INET {
            "ipv4"
        } else {
            "ipv6"
        };
        m.lookup_events
            .add(1, &[KeyValue::new("family", family)]);
    }
}

pub fn record_decode_failure() {
    if let Some(m) = metrics() {
        m.lookup_decode_failures.add(1, &[]);
    }
}

/// Flushes pending metrics and shuts down the MeterProvider
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        info!("Shutting down OpenTelemetry metrics...");
        if let Err(e) = provider.shutdown() {
            log::warn!("Failed to shutdown MeterProvider: {}", e);
        } else {
            info!("OpenTelemetry metrics shutdown complete");
        }
    }
}
