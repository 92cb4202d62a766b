//! Bulk write path
//!
//! - `BulkProcessor`: buffers operations, dispatches batches by count, size
//!   and age under a concurrency cap
//! - `BackoffPolicy`: retry delays for failed dispatches
//! - `BulkListener`: dispatch lifecycle callbacks
//! - `BulkMetrics`: prometheus counters and gauges

pub mod backoff;
pub mod listener;
pub mod metrics;
pub mod processor;

pub use backoff::BackoffPolicy;
pub use listener::{BulkListener, LoggingBulkListener};
pub use metrics::BulkMetrics;
pub use processor::{BulkProcessor, BulkSettings};
