//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger. Everything is registered in a private
//! [`Registry`], so several ledgers (tests, embedded use) can coexist in one process.
//!
//! # Metrics
//!
//! - `ipcoin_transfers_total` - Transfers committed
//! - `ipcoin_transfers_insufficient_total` - Transfers rejected for insufficient balance
//! - `ipcoin_transfer_duration_seconds` - Histogram of lock-to-commit latencies
//! - `ipcoin_comments_total` - Comments appended
//! - `ipcoin_rate_limited_total{class}` - Requests denied by a rate limiter
//! - `ipcoin_cancelled_total` - Calls that gave up waiting on a lock or limiter
//! - `ipcoin_leaderboard_refresh_total` - Successful leaderboard refreshes
//! - `ipcoin_leaderboard_refresh_failures_total` - Failed leaderboard refreshes
//! - `ipcoin_leaderboard_addresses` - Addresses in the last leaderboard snapshot

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transfers committed
    pub transfers_total: IntCounter,

    /// Transfers rejected for insufficient balance
    pub transfers_insufficient_total: IntCounter,

    /// Lock-to-commit latency
    pub transfer_duration: Histogram,

    /// Comments appended
    pub comments_total: IntCounter,

    /// Rate limiter denials, by class
    pub rate_limited_total: IntCounterVec,

    /// Calls cancelled while waiting
    pub cancelled_total: IntCounter,

    /// Successful leaderboard refreshes
    pub leaderboard_refresh_total: IntCounter,

    /// Failed leaderboard refreshes
    pub leaderboard_refresh_failures_total: IntCounter,

    /// Addresses in the last leaderboard snapshot
    pub leaderboard_addresses: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transfers_total", &self.transfers_total.get())
            .field("comments_total", &self.comments_total.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_total =
            IntCounter::new("ipcoin_transfers_total", "Transfers committed")?;
        registry.register(Box::new(transfers_total.clone()))?;

        let transfers_insufficient_total = IntCounter::new(
            "ipcoin_transfers_insufficient_total",
            "Transfers rejected for insufficient balance",
        )?;
        registry.register(Box::new(transfers_insufficient_total.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ipcoin_transfer_duration_seconds",
                "Histogram of lock-to-commit latencies",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0,
            ]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        let comments_total = IntCounter::new("ipcoin_comments_total", "Comments appended")?;
        registry.register(Box::new(comments_total.clone()))?;

        let rate_limited_total = IntCounterVec::new(
            Opts::new(
                "ipcoin_rate_limited_total",
                "Requests denied by a rate limiter",
            ),
            &["class"],
        )?;
        registry.register(Box::new(rate_limited_total.clone()))?;

        let cancelled_total = IntCounter::new(
            "ipcoin_cancelled_total",
            "Calls that gave up waiting on a lock or limiter",
        )?;
        registry.register(Box::new(cancelled_total.clone()))?;

        let leaderboard_refresh_total = IntCounter::new(
            "ipcoin_leaderboard_refresh_total",
            "Successful leaderboard refreshes",
        )?;
        registry.register(Box::new(leaderboard_refresh_total.clone()))?;

        let leaderboard_refresh_failures_total = IntCounter::new(
            "ipcoin_leaderboard_refresh_failures_total",
            "Failed leaderboard refreshes",
        )?;
        registry.register(Box::new(leaderboard_refresh_failures_total.clone()))?;

        let leaderboard_addresses = IntGauge::new(
            "ipcoin_leaderboard_addresses",
            "Addresses in the last leaderboard snapshot",
        )?;
        registry.register(Box::new(leaderboard_addresses.clone()))?;

        Ok(Self {
            transfers_total,
            transfers_insufficient_total,
            transfer_duration,
            comments_total,
            rate_limited_total,
            cancelled_total,
            leaderboard_refresh_total,
            leaderboard_refresh_failures_total,
            leaderboard_addresses,
            registry,
        })
    }

    /// Record committed transfer
    pub fn record_transfer(&self, duration_seconds: f64) {
        self.transfers_total.inc();
        self.transfer_duration.observe(duration_seconds);
    }

    /// Record transfer rejected for insufficient balance
    pub fn record_insufficient(&self) {
        self.transfers_insufficient_total.inc();
    }

    /// Record appended comment
    pub fn record_comment(&self) {
        self.comments_total.inc();
    }

    /// Record rate limiter denial
    pub fn record_rate_limited(&self, class: &str) {
        self.rate_limited_total.with_label_values(&[class]).inc();
    }

    /// Record call cancelled while waiting
    pub fn record_cancelled(&self) {
        self.cancelled_total.inc();
    }

    /// Record leaderboard refresh outcome
    pub fn record_leaderboard_refresh(&self, ranked: Option<usize>) {
        match ranked {
            Some(count) => {
                self.leaderboard_refresh_total.inc();
                self.leaderboard_addresses.set(count as i64);
            }
            None => self.leaderboard_refresh_failures_total.inc(),
        }
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn gather_text(&self) -> crate::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::Error::Config(format!("Metrics output is not UTF-8: {}", e)))
    }
}
