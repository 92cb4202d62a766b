//! Table Domain Layer
//!
//! Port/Adapter pattern for the document index backend
//!
//! # Domain Models
//!
//! - `AttributeSchema` / `TableDefinition`: table layout and declared keys
//! - `FieldValue` / `Record`: host values
//! - `PendingOperation`: one buffered mutation
//!
//! # Services
//!
//! - `DocumentIdentityResolver`: document id from primary key values
//! - `IndexSchemaBuilder`: field mapping and create-index body
//!
//! # Port Trait
//!
//! - `SearchBackend`: index management, bulk writes and search

pub mod identity;
pub mod models;
pub mod ports;
pub mod schema;

pub use identity::DocumentIdentityResolver;
pub use models::{
    partial_document, record_document, Attribute, AttributeSchema, AttributeValues,
    CompiledCondition, Document, DocumentId, FieldValue, PendingOperation, Record, RecordMap,
    SemanticType, StoredDocument, TableDefinition,
};
pub use ports::{BulkItemFailure, BulkItemOutcome, BulkResponse, SearchBackend};
pub use schema::IndexSchemaBuilder;
