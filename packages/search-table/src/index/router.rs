//! Target index resolution
//!
//! A table routes either to one fixed index or, in payload mode, to the
//! index named by a string attribute of each inserted record. The router
//! only proposes a target; the table commits it as active once the index is
//! confirmed.

use parking_lot::RwLock;

use crate::config::TableConfig;
use crate::domain::models::{FieldValue, TableDefinition};
use crate::error::{Result, TableError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRouting {
    Fixed(String),
    /// Record position holding the index name
    Payload(usize),
}

/// Resolved target of an insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTarget {
    pub index: String,
    /// Differs from the active index (which must be ensured before use)
    pub switched: bool,
}

#[derive(Debug)]
pub struct IndexRouter {
    routing: IndexRouting,
    active: RwLock<Option<String>>,
}

impl IndexRouter {
    pub fn new(routing: IndexRouting) -> Self {
        let active = match &routing {
            IndexRouting::Fixed(name) => Some(name.clone()),
            IndexRouting::Payload(_) => None,
        };
        Self {
            routing,
            active: RwLock::new(active),
        }
    }

    /// Fixed mode names the index after the table unless `index.name` is set
    pub fn from_config(config: &TableConfig, definition: &TableDefinition) -> Self {
        let routing = match (config.payload_index_position(), &config.index_name) {
            (Some(position), _) => IndexRouting::Payload(position),
            (None, Some(name)) => IndexRouting::Fixed(name.clone()),
            (None, None) => IndexRouting::Fixed(definition.id.clone()),
        };
        Self::new(routing)
    }

    pub fn routing(&self) -> &IndexRouting {
        &self.routing
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.routing, IndexRouting::Payload(_))
    }

    /// Last committed index
    pub fn active(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Active index or an error when payload mode has not routed anything yet
    pub fn require_active(&self) -> Result<String> {
        self.active().ok_or_else(|| {
            TableError::index_routing("No index has been resolved for the table yet")
        })
    }

    /// Target index of a positional record
    ///
    /// Names are compared case-insensitively; a name matching the active
    /// index keeps the active spelling.
    pub fn route(&self, record: &[FieldValue]) -> Result<IndexTarget> {
        let position = match &self.routing {
            IndexRouting::Fixed(name) => {
                return Ok(IndexTarget {
                    index: name.clone(),
                    switched: false,
                })
            }
            IndexRouting::Payload(position) => *position,
        };

        let name = match record.get(position) {
            Some(FieldValue::String(name)) if !name.trim().is_empty() => name.trim(),
            Some(other) => {
                return Err(TableError::index_routing(format!(
                    "Record value at position {} is not an index name: {}",
                    position, other
                )))
            }
            None => {
                return Err(TableError::index_routing(format!(
                    "Record has no value at index name position {}",
                    position
                )))
            }
        };

        if let Some(reason) = invalid_index_name(name) {
            return Err(TableError::index_routing(format!(
                "Record value at position {} is not a valid index name '{}': {}",
                position, name, reason
            )));
        }

        match self.active.read().as_deref() {
            Some(active) if active.eq_ignore_ascii_case(name) => Ok(IndexTarget {
                index: active.to_string(),
                switched: false,
            }),
            _ => Ok(IndexTarget {
                index: name.to_string(),
                switched: true,
            }),
        }
    }

    /// Make `index` the active index
    pub fn commit(&self, index: &str) {
        let mut active = self.active.write();
        if active.as_deref() != Some(index) {
            *active = Some(index.to_string());
        }
    }
}

/// Characters the backend refuses in index names
const FORBIDDEN_INDEX_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ',', '#', ' '];

fn invalid_index_name(name: &str) -> Option<&'static str> {
    if name == "." || name == ".." {
        return Some("'.' and '..' are reserved");
    }
    if name.starts_with(['_', '-', '+']) {
        return Some("must not start with '_', '-' or '+'");
    }
    if name.contains(FORBIDDEN_INDEX_CHARS) {
        return Some("must not contain \\ / * ? \" < > | , # or spaces");
    }
    None
}
