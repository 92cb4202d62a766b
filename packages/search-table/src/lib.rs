//! search-table: event table over a remote document index
//!
//! Turns per-record table calls (add / find / contains / delete / update /
//! update-or-add) into batched bulk requests against an Elasticsearch-style
//! backend.
//!
//! ## Core Pieces
//!
//! 1. **Bulk processor**: buffers operations and dispatches them by count,
//!    size or age, with a concurrency cap and a backoff policy for failed
//!    dispatches
//! 2. **Index lifecycle**: create-if-absent per index name, tolerant of
//!    concurrent creators in other processes
//! 3. **Index routing**: one fixed index, or the index named by a record field
//! 4. **Document identity**: ids derived from declared primary key values,
//!    so re-inserting a key overwrites instead of duplicating
//!
//! ## Usage
//!
//! ```rust,ignore
//! use search_table::{
//!     Attribute, AttributeSchema, CompiledCondition, SearchEventTable, SemanticType,
//!     TableConfig, TableDefinition,
//! };
//!
//! let schema = AttributeSchema::new(vec![
//!     Attribute::new("symbol", SemanticType::String),
//!     Attribute::new("price", SemanticType::Float),
//! ])?;
//! let definition = TableDefinition::new("StockTable", schema).with_primary_keys(["symbol"]);
//! let config = TableConfig::from_options([("index.name", "stock"), ("bulk.actions", "100")])?;
//!
//! let table = SearchEventTable::connect(definition, config).await?;
//! table.add(&[vec!["IBM".into(), 100.0f32.into()]]).await?;
//! table.flush().await?;
//!
//! let hits = table.find(&CompiledCondition::term("symbol.keyword", "IBM"), 10).await?;
//! table.destroy().await?;
//! ```

pub mod application;
pub mod bulk;
pub mod config;
pub mod domain;
pub mod error;
pub mod index;
pub mod infrastructure;

pub use error::{ErrorKind, Result, TableError};

pub use application::{RecordRejection, SearchEventTable, WriteSummary};
pub use bulk::{BackoffPolicy, BulkListener, BulkMetrics, BulkProcessor, BulkSettings, LoggingBulkListener};
pub use config::{BackoffPolicyKind, ConfigError, ConfigResult, TableConfig};
pub use domain::{
    Attribute, AttributeSchema, BulkItemFailure, BulkItemOutcome, BulkResponse, CompiledCondition,
    Document, DocumentId, DocumentIdentityResolver, FieldValue, IndexSchemaBuilder,
    PendingOperation, Record, RecordMap, SearchBackend, SemanticType, StoredDocument,
    TableDefinition,
};
pub use index::{
    IndexEnsureOutcome, IndexLifecycleManager, IndexLifecycleState, IndexRouter, IndexRouting,
    IndexSettings, IndexTarget,
};
pub use infrastructure::InMemorySearchBackend;
#[cfg(feature = "http")]
pub use infrastructure::HttpSearchBackend;
