//! Application layer - table use cases

pub mod table;

pub use table::{RecordRejection, SearchEventTable, WriteSummary};
