//! Infrastructure layer - Search backend adapters
//!
//! - `InMemorySearchBackend`: tests and embedding
//! - `HttpSearchBackend`: Elasticsearch-compatible REST API (feature `http`)

pub mod memory_backend;
pub use memory_backend::InMemorySearchBackend;

#[cfg(feature = "http")]
pub mod http_backend;
#[cfg(feature = "http")]
pub use http_backend::HttpSearchBackend;
