//! Document identity derived from declared primary key attributes
//!
//! Key values are rendered to strings, escaped, and joined with `:` in key
//! order. Escaping keeps the encoding injective: `("a:b", "c")` and
//! `("a", "b:c")` never share an id.

use super::models::{AttributeSchema, AttributeValues, DocumentId, FieldValue};
use crate::error::{Result, TableError};

/// Separator between key parts
pub const KEY_DELIMITER: char = ':';

const ESCAPE: char = '\\';

/// Rendering of a null key value; cannot be produced by an escaped string
const NULL_PART: &str = "\\0";

/// Resolves document identities for one table
#[derive(Debug, Clone)]
pub struct DocumentIdentityResolver {
    primary_keys: Vec<String>,
}

impl DocumentIdentityResolver {
    /// Keys must all be declared in `schema`
    pub fn new(schema: &AttributeSchema, primary_keys: &[String]) -> Result<Self> {
        for key in primary_keys {
            if !schema.contains(key) {
                return Err(TableError::config(format!(
                    "Primary key '{}' is not an attribute of the table",
                    key
                )));
            }
        }
        Ok(Self {
            primary_keys: primary_keys.to_vec(),
        })
    }

    pub fn has_identity(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// `Ok(None)` when the table declares no primary key
    pub fn resolve<R>(&self, schema: &AttributeSchema, record: &R) -> Result<Option<DocumentId>>
    where
        R: AttributeValues + ?Sized,
    {
        resolve(schema, &self.primary_keys, record)
    }

    /// Like [`resolve`](Self::resolve) but an identity is mandatory
    pub fn require<R>(&self, schema: &AttributeSchema, record: &R) -> Result<DocumentId>
    where
        R: AttributeValues + ?Sized,
    {
        self.resolve(schema, record)?.ok_or_else(|| {
            TableError::missing_identity(
                "Table declares no primary key; update and delete need a document identity",
            )
        })
    }
}

/// Derive the identity of `record` from `primary_keys`
pub fn resolve<R>(
    schema: &AttributeSchema,
    primary_keys: &[String],
    record: &R,
) -> Result<Option<DocumentId>>
where
    R: AttributeValues + ?Sized,
{
    if primary_keys.is_empty() {
        return Ok(None);
    }

    let mut id = String::new();
    for (i, key) in primary_keys.iter().enumerate() {
        let value = record.value_of(schema, key).ok_or_else(|| {
            TableError::missing_identity(format!("Record has no value for primary key '{}'", key))
        })?;
        if i > 0 {
            id.push(KEY_DELIMITER);
        }
        push_part(&mut id, value);
    }
    Ok(Some(id))
}

fn push_part(id: &mut String, value: &FieldValue) {
    if value.is_null() {
        id.push_str(NULL_PART);
        return;
    }
    for c in value.to_string().chars() {
        if c == KEY_DELIMITER || c == ESCAPE {
            id.push(ESCAPE);
        }
        id.push(c);
    }
}
