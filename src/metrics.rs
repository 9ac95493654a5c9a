//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `ledger_accounts_created_total` - Accounts provisioned
//! - `ledger_transfers_total` - Transfers committed
//! - `ledger_transfers_rejected_total` - Transfers rejected by validation
//! - `ledger_transfer_conflicts_total` - Index races observed (each one is a retry)
//! - `ledger_transfer_duration_seconds` - End-to-end transfer latency

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Accounts provisioned
    pub accounts_created_total: IntCounter,

    /// Transfers committed
    pub transfers_total: IntCounter,

    /// Transfers rejected by validation or funds checks
    pub transfers_rejected_total: IntCounter,

    /// Optimistic-concurrency conflicts observed
    pub transfer_conflicts_total: IntCounter,

    /// Transfer latency histogram
    pub transfer_duration: Histogram,

    /// Prometheus registry
    registry: Arc<Registry>,
}

impl Metrics {
    /// Create a metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let accounts_created_total = IntCounter::new(
            "ledger_accounts_created_total",
            "Total number of accounts provisioned",
        )?;
        registry.register(Box::new(accounts_created_total.clone()))?;

        let transfers_total = IntCounter::new(
            "ledger_transfers_total",
            "Total number of transfers committed",
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let transfers_rejected_total = IntCounter::new(
            "ledger_transfers_rejected_total",
            "Total number of transfers rejected by validation",
        )?;
        registry.register(Box::new(transfers_rejected_total.clone()))?;

        let transfer_conflicts_total = IntCounter::new(
            "ledger_transfer_conflicts_total",
            "Total number of per-source index races observed",
        )?;
        registry.register(Box::new(transfer_conflicts_total.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_transfer_duration_seconds",
                "Histogram of end-to-end transfer latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        Ok(Self {
            accounts_created_total,
            transfers_total,
            transfers_rejected_total,
            transfer_conflicts_total,
            transfer_duration,
            registry,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        let mut buffer = String::new();
        TextEncoder::new().encode_utf8(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metrics registry construction cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.transfers_total.get(), 0);
        assert_eq!(metrics.transfer_conflicts_total.get(), 0);
    }

    #[test]
    fn test_counters_increment() {
        let metrics = Metrics::new().unwrap();
        metrics.transfers_total.inc();
        metrics.transfers_total.inc();
        metrics.accounts_created_total.inc();
        assert_eq!(metrics.transfers_total.get(), 2);
        assert_eq!(metrics.accounts_created_total.get(), 1);
    }

    #[test]
    fn test_export_contains_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.transfers_total.inc();
        let text = metrics.export().unwrap();
        assert!(text.contains("ledger_transfers_total"));
        assert!(text.contains("ledger_transfer_conflicts_total"));
    }

    #[test]
    fn test_registries_are_independent() {
        // Two collectors must not clash on metric names
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.transfers_total.inc();
        assert_eq!(second.transfers_total.get(), 0);
    }
}
