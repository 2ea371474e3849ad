//! Prometheus metrics for count fetching and refresh passes

use crate::config::Provider;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// State of stored counts observed by a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Fresh,
    Stale,
    Missing,
}

impl ReadState {
    fn label(&self) -> &'static str {
        match self {
            ReadState::Fresh => "fresh",
            ReadState::Stale => "stale",
            ReadState::Missing => "missing",
        }
    }
}

/// Metrics for provider calls, refresh passes and reads
#[derive(Clone)]
pub struct CountMetrics {
    registry: Registry,

    /// Provider requests by provider and result (success/failure)
    pub provider_requests_total: IntCounterVec,

    /// Refresh passes by result (success/failure/skipped)
    pub refreshes_total: IntCounterVec,

    /// Duration of complete refresh passes
    pub refresh_duration_seconds: Histogram,

    /// Reads by the state of the stored counts
    pub reads_total: IntCounterVec,

    /// Items added to a refresh queue
    pub enqueued_total: IntCounter,
}

impl CountMetrics {
    /// Create metrics registered in a private registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(&Registry::new())
    }

    /// Create metrics registered in the given registry
    pub fn with_registry(registry: &Registry) -> Result<Self, prometheus::Error> {
        let provider_requests_total = IntCounterVec::new(
            Opts::new(
                "share_counts_provider_requests_total",
                "Total number of share count provider requests",
            ),
            &["provider", "result"],
        )?;

        let refreshes_total = IntCounterVec::new(
            Opts::new(
                "share_counts_refreshes_total",
                "Total number of item refresh passes",
            ),
            &["result"],
        )?;

        let refresh_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "share_counts_refresh_duration_seconds",
                "Duration of item refresh passes in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        let reads_total = IntCounterVec::new(
            Opts::new(
                "share_counts_reads_total",
                "Total number of count reads by stored state",
            ),
            &["state"],
        )?;

        let enqueued_total = IntCounter::with_opts(Opts::new(
            "share_counts_enqueued_total",
            "Total number of items queued for deferred refresh",
        ))?;

        registry.register(Box::new(provider_requests_total.clone()))?;
        registry.register(Box::new(refreshes_total.clone()))?;
        registry.register(Box::new(refresh_duration_seconds.clone()))?;
        registry.register(Box::new(reads_total.clone()))?;
        registry.register(Box::new(enqueued_total.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            provider_requests_total,
            refreshes_total,
            refresh_duration_seconds,
            reads_total,
            enqueued_total,
        })
    }

    pub fn record_provider(&self, provider: Provider, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.provider_requests_total
            .with_label_values(&[provider.name(), result])
            .inc();
    }

    pub fn record_refresh(&self, result: &str, duration: Duration) {
        self.refreshes_total.with_label_values(&[result]).inc();
        self.refresh_duration_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_read(&self, state: ReadState) {
        self.reads_total.with_label_values(&[state.label()]).inc();
    }

    pub fn record_enqueue(&self) {
        self.enqueued_total.inc();
    }

    /// Number of recorded requests for one provider and result
    pub fn provider_requests(&self, provider: Provider, success: bool) -> u64 {
        let result = if success { "success" } else { "failure" };
        self.provider_requests_total
            .with_label_values(&[provider.name(), result])
            .get()
    }

    pub fn refreshes(&self, result: &str) -> u64 {
        self.refreshes_total.with_label_values(&[result]).get()
    }

    pub fn reads(&self, state: ReadState) -> u64 {
        self.reads_total.with_label_values(&[state.label()]).get()
    }

    /// Encode every registered metric in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
