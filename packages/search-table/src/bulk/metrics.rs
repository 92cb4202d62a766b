//! Prometheus metrics for bulk dispatch
//!
//! Every series carries a `table` const label so several tables can share
//! one registry.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};

/// Bulk Processor Metrics
#[derive(Clone)]
pub struct BulkMetrics {
    pub enqueued: IntCounter,
    pub dispatches: IntCounter,
    pub operations: IntCounter,
    pub failed_operations: IntCounter,
    pub retries: IntCounter,
    pub fatal_dispatches: IntCounter,
    pub pending: IntGauge,
    pub in_flight: IntGauge,
    pub dispatch_duration: Histogram,
    pub index_creations: IntCounter,
}

impl BulkMetrics {
    pub fn new(registry: &Registry, table_id: &str) -> prometheus::Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("table", table_id.to_string())
        };

        Ok(Self {
            enqueued: register_int_counter_with_registry!(
                opts("bulk_enqueued_operations_total", "Operations accepted into the buffer"),
                registry
            )?,
            dispatches: register_int_counter_with_registry!(
                opts("bulk_dispatches_total", "Bulk requests sent"),
                registry
            )?,
            operations: register_int_counter_with_registry!(
                opts("bulk_operations_total", "Operations sent in bulk requests"),
                registry
            )?,
            failed_operations: register_int_counter_with_registry!(
                opts(
                    "bulk_failed_operations_total",
                    "Operations rejected inside successful bulk requests"
                ),
                registry
            )?,
            retries: register_int_counter_with_registry!(
                opts("bulk_retries_total", "Bulk request retries"),
                registry
            )?,
            fatal_dispatches: register_int_counter_with_registry!(
                opts(
                    "bulk_fatal_dispatches_total",
                    "Batches dropped after exhausting retries"
                ),
                registry
            )?,
            pending: register_int_gauge_with_registry!(
                opts("bulk_pending_operations", "Operations buffered and not yet sent"),
                registry
            )?,
            in_flight: register_int_gauge_with_registry!(
                opts("bulk_in_flight_requests", "Bulk requests currently executing"),
                registry
            )?,
            dispatch_duration: register_histogram_with_registry!(
                HistogramOpts::new(
                    "bulk_dispatch_duration_seconds",
                    "Wall time of one bulk dispatch including retries"
                )
                .const_label("table", table_id.to_string())
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
                registry
            )?,
            index_creations: register_int_counter_with_registry!(
                opts("index_creations_total", "Indices created by this table"),
                registry
            )?,
        })
    }

    /// Metrics on a private registry
    pub fn unregistered(table_id: &str) -> prometheus::Result<Self> {
        Self::new(&Registry::new(), table_id)
    }

    pub fn failure_rate(&self) -> f64 {
        let total = self.operations.get() as f64;
        if total > 0.0 {
            self.failed_operations.get() as f64 / total
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_tables_share_registry() {
        let registry = Registry::new();
        let a = BulkMetrics::new(&registry, "A").unwrap();
        let b = BulkMetrics::new(&registry, "B").unwrap();
        a.dispatches.inc();
        assert_eq!(a.dispatches.get(), 1);
        assert_eq!(b.dispatches.get(), 0);
    }

    #[test]
    fn test_same_table_twice_is_rejected() {
        let registry = Registry::new();
        let _a = BulkMetrics::new(&registry, "A").unwrap();
        assert!(BulkMetrics::new(&registry, "A").is_err());
    }

    #[test]
    fn test_failure_rate() {
        let metrics = BulkMetrics::unregistered("A").unwrap();
        assert_eq!(metrics.failure_rate(), 0.0);
        metrics.operations.inc_by(4);
        metrics.failed_operations.inc();
        assert!((metrics.failure_rate() - 0.25).abs() < f64::EPSILON);
    }
}
