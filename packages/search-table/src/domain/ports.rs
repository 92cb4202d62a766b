//! Backend Port (Trait Interface)
//!
//! Port/Adapter pattern for backend flexibility:
//! - Production: HTTP (Elasticsearch-compatible REST API)
//! - Testing: InMemory (fast unit tests, failure injection)

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::models::{CompiledCondition, PendingOperation, StoredDocument};
use crate::error::Result;

/// Search Backend Port (Primary Interface)
///
/// All document index backends must implement this trait
#[async_trait]
pub trait SearchBackend: Send + Sync {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Index Management
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Whether an index (or alias) with this name exists
    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Create an index from a create-index body (settings, mappings, aliases)
    ///
    /// Must fail with `ErrorKind::IndexAlreadyExists` when the index exists.
    async fn create_index(&self, index: &str, body: &Value) -> Result<()>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Execute one bulk request
    ///
    /// `Err` means the request as a whole failed (network / protocol).
    /// Rejections of single operations are reported in the response.
    async fn bulk(&self, operations: &[PendingOperation]) -> Result<BulkResponse>;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Documents of `index` matching `condition`, at most `limit`
    async fn search(
        &self,
        index: &str,
        condition: &CompiledCondition,
        limit: usize,
    ) -> Result<Vec<StoredDocument>>;
}

/// Outcome of one operation inside a bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemOutcome {
    /// Position of the operation in the request
    pub position: usize,
    pub action: &'static str,
    pub index: String,
    pub id: Option<String>,
    pub status: u16,
    pub failure: Option<String>,
}

impl BulkItemOutcome {
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Per-item rejection inside an otherwise successful bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemFailure {
    pub position: usize,
    pub action: &'static str,
    pub index: String,
    pub id: Option<String>,
    pub status: u16,
    pub reason: String,
}

/// Bulk Response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    /// Time the backend reports for executing the request
    pub took: Duration,
    pub items: Vec<BulkItemOutcome>,
}

impl BulkResponse {
    pub fn has_failures(&self) -> bool {
        self.items.iter().any(BulkItemOutcome::is_failure)
    }

    pub fn failures(&self) -> Vec<BulkItemFailure> {
        self.items
            .iter()
            .filter_map(|item| {
                item.failure.as_ref().map(|reason| BulkItemFailure {
                    position: item.position,
                    action: item.action,
                    index: item.index.clone(),
                    id: item.id.clone(),
                    status: item.status,
                    reason: reason.clone(),
                })
            })
            .collect()
    }

    /// Human readable summary of item failures
    pub fn failure_message(&self) -> String {
        self.failures()
            .iter()
            .map(|f| {
                format!(
                    "[{}]: index [{}], id [{}], message [{}]",
                    f.position,
                    f.index,
                    f.id.as_deref().unwrap_or("-"),
                    f.reason
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
