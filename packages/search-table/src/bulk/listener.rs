//! Bulk dispatch lifecycle callbacks

use tracing::{debug, error, warn};

use crate::domain::ports::BulkResponse;
use crate::error::TableError;

/// Observer of bulk dispatches
///
/// Called from the dispatch task; implementations must not block.
pub trait BulkListener: Send + Sync {
    /// A batch is about to be sent for the first time
    fn before_dispatch(&self, execution_id: u64, operations: usize);

    /// The backend answered; item failures (if any) are in `response`
    fn after_dispatch(&self, execution_id: u64, operations: usize, response: &BulkResponse);

    /// The batch was dropped after exhausting retries
    fn after_dispatch_fatal(&self, execution_id: u64, operations: usize, error: &TableError);
}

/// Default listener: writes dispatch outcomes to the log
#[derive(Debug, Clone)]
pub struct LoggingBulkListener {
    table_id: String,
}

impl LoggingBulkListener {
    pub fn new(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
        }
    }
}

impl BulkListener for LoggingBulkListener {
    fn before_dispatch(&self, execution_id: u64, operations: usize) {
        debug!(
            "Executing bulk [{}] with {} requests (table={})",
            execution_id, operations, self.table_id
        );
    }

    fn after_dispatch(&self, execution_id: u64, operations: usize, response: &BulkResponse) {
        if response.has_failures() {
            warn!(
                "Bulk [{}] executed with failures (table={}):\n{}",
                execution_id,
                self.table_id,
                response.failure_message()
            );
        } else {
            debug!(
                "Bulk [{}] completed {} requests in {} ms (table={})",
                execution_id,
                operations,
                response.took.as_millis(),
                self.table_id
            );
        }
    }

    fn after_dispatch_fatal(&self, execution_id: u64, operations: usize, error: &TableError) {
        error!(
            "Failed to execute bulk [{}] with {} requests (table={}): {}",
            execution_id, operations, self.table_id, error
        );
    }
}
