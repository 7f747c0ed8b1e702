//! Prometheus-backed metrics registry.
//!
//! # Design
//! - Collector registration stays private; callers get one method per event.
//! - Label values are fixed vocabularies chosen by callers (`image`/`video`,
//!   `processed`/`original`/...), never user input.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared across the proxy.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    uploads_total: IntCounterVec,
    conversions_total: IntCounterVec,
    conversion_slots_in_use: IntGaugeVec,
    rewrites_total: IntCounterVec,
    bytes_saved_total: IntCounter,
}

/// Point-in-time view of the upload counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Uploads forwarded after conversion.
    pub uploads_processed: u64,
    /// Uploads forwarded unchanged after a conversion that did not shrink them.
    pub uploads_original: u64,
    /// Uploads forwarded without attempting conversion.
    pub uploads_passthrough: u64,
    /// Uploads rejected because the same file was already in flight.
    pub uploads_conflict: u64,
    /// Uploads that failed inside the proxy.
    pub uploads_failed: u64,
    /// Bytes not sent upstream thanks to conversion.
    pub bytes_saved: u64,
}

impl Metrics {
    /// Construct a new registry with every collector registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            "http_requests_total",
            "Total HTTP requests handled by route class and status",
            &["route", "code"],
        )?;
        let uploads_total = counter_vec(
            "uploads_total",
            "Asset uploads by outcome",
            &["outcome"],
        )?;
        let conversions_total = counter_vec(
            "conversions_total",
            "Converter runs by media class and status",
            &["class", "status"],
        )?;
        let conversion_slots_in_use = IntGaugeVec::new(
            Opts::new(
                "conversion_slots_in_use",
                "Conversion permits currently held by media class",
            ),
            &["class"],
        )
        .map_err(|source| TelemetryError::collector("build", "conversion_slots_in_use", source))?;
        let rewrites_total = counter_vec(
            "rewrites_total",
            "Response hash rewrites by route class and outcome",
            &["route", "outcome"],
        )?;
        let bytes_saved_total = IntCounter::with_opts(Opts::new(
            "bytes_saved_total",
            "Bytes not sent upstream because a converted file was smaller",
        ))
        .map_err(|source| TelemetryError::collector("build", "bytes_saved_total", source))?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "uploads_total", &uploads_total)?;
        register(&registry, "conversions_total", &conversions_total)?;
        register(
            &registry,
            "conversion_slots_in_use",
            &conversion_slots_in_use,
        )?;
        register(&registry, "rewrites_total", &rewrites_total)?;
        register(&registry, "bytes_saved_total", &bytes_saved_total)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                uploads_total,
                conversions_total,
                conversion_slots_in_use,
                rewrites_total,
                bytes_saved_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route class and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        let code = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[route, code.as_str()])
            .inc();
    }

    /// Count one finished upload.
    pub fn inc_upload(&self, outcome: &str) {
        self.inner.uploads_total.with_label_values(&[outcome]).inc();
    }

    /// Count one converter run.
    pub fn inc_conversion(&self, class: &str, status: &str) {
        self.inner
            .conversions_total
            .with_label_values(&[class, status])
            .inc();
    }

    /// A conversion permit was acquired.
    pub fn slot_acquired(&self, class: &str) {
        self.inner
            .conversion_slots_in_use
            .with_label_values(&[class])
            .inc();
    }

    /// A conversion permit was released.
    pub fn slot_released(&self, class: &str) {
        self.inner
            .conversion_slots_in_use
            .with_label_values(&[class])
            .dec();
    }

    /// Permits currently held for `class`.
    #[must_use]
    pub fn slots_in_use(&self, class: &str) -> i64 {
        self.inner
            .conversion_slots_in_use
            .with_label_values(&[class])
            .get()
    }

    /// Count one response rewrite attempt.
    pub fn inc_rewrite(&self, route: &str, outcome: &str) {
        self.inner
            .rewrites_total
            .with_label_values(&[route, outcome])
            .inc();
    }

    /// Record bytes saved by forwarding a smaller converted file.
    pub fn add_bytes_saved(&self, bytes: u64) {
        self.inner.bytes_saved_total.inc_by(bytes);
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or the buffer is not UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::Exposition { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::ExpositionUtf8 { source })
    }

    /// Take a snapshot of the upload counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uploads = |outcome: &str| self.inner.uploads_total.with_label_values(&[outcome]).get();
        MetricsSnapshot {
            uploads_processed: uploads("processed"),
            uploads_original: uploads("original"),
            uploads_passthrough: uploads("passthrough"),
            uploads_conflict: uploads("conflict"),
            uploads_failed: uploads("failed"),
            bytes_saved: self.inner.bytes_saved_total.get(),
        }
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> TelemetryResult<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::collector("build", name, source))
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::collector("register", name, source))
}
