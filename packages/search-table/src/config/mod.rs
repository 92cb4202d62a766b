//! Table configuration
//!
//! Options are validated in two passes: `TableConfig::validate` checks ranges
//! and option combinations, `TableConfig::validate_for` checks options that
//! refer to table attributes (payload position, type overrides, keys).

pub mod error;
pub mod table_config;

pub use error::{ConfigError, ConfigResult};
pub use table_config::{BackoffPolicyKind, TableConfig, KNOWN_OPTIONS, TYPE_MAPPING_PREFIX};
