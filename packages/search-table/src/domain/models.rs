//! Table Domain Models
//!
//! - `AttributeSchema`: ordered, immutable attribute layout of the table
//! - `FieldValue` / `Record`: host values as they arrive from the event table
//! - `PendingOperation`: one buffered mutation addressed at an index

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, TableError};

/// Document identity inside an index
pub type DocumentId = String;

/// Field document (`{"attr": value, ...}`) sent as a document source
pub type Document = Map<String, Value>;

/// Positional record matching the attribute schema
pub type Record = Vec<FieldValue>;

/// Attribute-name keyed record (condition parameters, update sets)
pub type RecordMap = HashMap<String, FieldValue>;

/// Semantic type of a table attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Int,
    Long,
    Float,
    Double,
    Bool,
    Object,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Int => "int",
            SemanticType::Long => "long",
            SemanticType::Float => "float",
            SemanticType::Double => "double",
            SemanticType::Bool => "bool",
            SemanticType::Object => "object",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Table attribute (name + semantic type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub semantic_type: SemanticType,
}

impl Attribute {
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
        }
    }
}

/// Ordered attribute list of a table
///
/// Defines both the positional record layout and the derived index mapping.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSchema {
    attributes: Vec<Attribute>,
}

impl AttributeSchema {
    /// Build a schema, rejecting empty or duplicate attribute names
    pub fn new(attributes: Vec<Attribute>) -> Result<Self> {
        for (i, attribute) in attributes.iter().enumerate() {
            if attribute.name.trim().is_empty() {
                return Err(TableError::config(format!(
                    "Attribute at position {} has an empty name",
                    i
                )));
            }
            if attributes[..i].iter().any(|a| a.name == attribute.name) {
                return Err(TableError::config(format!(
                    "Duplicate attribute name '{}'",
                    attribute.name
                )));
            }
        }
        Ok(Self { attributes })
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Attribute> {
        self.attributes.get(position)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }
}

/// Table definition handed over by the host
#[derive(Debug, Clone)]
pub struct TableDefinition {
    /// Table id (default index name in fixed mode)
    pub id: String,
    pub schema: AttributeSchema,
    /// Declared primary key attributes, in key order
    pub primary_keys: Vec<String>,
}

impl TableDefinition {
    pub fn new(id: impl Into<String>, schema: AttributeSchema) -> Self {
        Self {
            id: id.into(),
            schema,
            primary_keys: Vec::new(),
        }
    }

    pub fn with_primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(|k| k.into().trim().to_string()).collect();
        self
    }
}

/// Host value of one attribute
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Object(Value),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// JSON representation stored in the document source
    ///
    /// Non-finite floating point values have no JSON form and are rejected.
    pub fn to_json(&self) -> Result<Value> {
        Ok(match self {
            FieldValue::Null => Value::Null,
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Int(v) => Value::from(*v),
            FieldValue::Long(v) => Value::from(*v),
            FieldValue::Float(v) => Value::Number(finite_number(f64::from(*v))?),
            FieldValue::Double(v) => Value::Number(finite_number(*v)?),
            FieldValue::Bool(v) => Value::Bool(*v),
            FieldValue::Object(v) => v.clone(),
        })
    }
}

fn finite_number(value: f64) -> Result<Number> {
    Number::from_f64(value).ok_or_else(|| {
        TableError::serialization(format!("Cannot encode non-finite number {}", value))
    })
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::String(s) => write!(f, "{}", s),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Long(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Object(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        FieldValue::Object(v)
    }
}

/// Attribute lookup over either record shape
pub trait AttributeValues {
    fn value_of(&self, schema: &AttributeSchema, name: &str) -> Option<&FieldValue>;
}

impl AttributeValues for [FieldValue] {
    fn value_of(&self, schema: &AttributeSchema, name: &str) -> Option<&FieldValue> {
        schema.position(name).and_then(|pos| self.get(pos))
    }
}

impl AttributeValues for Vec<FieldValue> {
    fn value_of(&self, schema: &AttributeSchema, name: &str) -> Option<&FieldValue> {
        self.as_slice().value_of(schema, name)
    }
}

impl AttributeValues for RecordMap {
    fn value_of(&self, _schema: &AttributeSchema, name: &str) -> Option<&FieldValue> {
        self.get(name)
    }
}

/// Build the full field document of a positional record
pub fn record_document(schema: &AttributeSchema, record: &[FieldValue]) -> Result<Document> {
    if record.len() != schema.len() {
        return Err(TableError::serialization(format!(
            "Record has {} values but the table declares {} attributes",
            record.len(),
            schema.len()
        )));
    }
    let mut doc = Document::new();
    for (attribute, value) in schema.iter().zip(record) {
        let json = value.to_json().map_err(|e| {
            TableError::serialization(format!("Attribute '{}': {}", attribute.name, e.message))
        })?;
        doc.insert(attribute.name.clone(), json);
    }
    Ok(doc)
}

/// Build a partial document holding only the schema attributes present in `values`
pub fn partial_document(schema: &AttributeSchema, values: &RecordMap) -> Result<Document> {
    let mut doc = Document::new();
    for attribute in schema.iter() {
        if let Some(value) = values.get(&attribute.name) {
            let json = value.to_json().map_err(|e| {
                TableError::serialization(format!("Attribute '{}': {}", attribute.name, e.message))
            })?;
            doc.insert(attribute.name.clone(), json);
        }
    }
    Ok(doc)
}

/// One buffered mutation
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOperation {
    /// Insert (or overwrite when `id` is set)
    Index {
        index: String,
        id: Option<DocumentId>,
        source: Document,
    },
    /// Partial update; creates the document from `doc` when `upsert` is set
    Update {
        index: String,
        id: DocumentId,
        doc: Document,
        upsert: bool,
    },
    Delete {
        index: String,
        id: DocumentId,
    },
}

/// Fixed per-action overhead of the bulk action line
const ACTION_LINE_OVERHEAD: usize = 48;

impl PendingOperation {
    pub fn index_name(&self) -> &str {
        match self {
            PendingOperation::Index { index, .. }
            | PendingOperation::Update { index, .. }
            | PendingOperation::Delete { index, .. } => index,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            PendingOperation::Index { id, .. } => id.as_deref(),
            PendingOperation::Update { id, .. } | PendingOperation::Delete { id, .. } => Some(id),
        }
    }

    /// Bulk action name
    pub fn action(&self) -> &'static str {
        match self {
            PendingOperation::Index { .. } => "index",
            PendingOperation::Update { .. } => "update",
            PendingOperation::Delete { .. } => "delete",
        }
    }

    /// Approximate wire size in bytes, used for the size-based flush trigger
    pub fn estimated_size(&self) -> usize {
        let body = match self {
            PendingOperation::Index { source, .. } => json_len(source),
            // {"doc": ..., "doc_as_upsert": true}
            PendingOperation::Update { doc, .. } => json_len(doc) + 32,
            PendingOperation::Delete { .. } => 0,
        };
        ACTION_LINE_OVERHEAD + self.index_name().len() + self.id().map_or(0, str::len) + body
    }
}

fn json_len(doc: &Document) -> usize {
    serde_json::to_vec(doc).map_or(0, |bytes| bytes.len())
}

/// Document returned by a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub index: String,
    pub id: DocumentId,
    pub source: Document,
}

/// Backend query produced by the host's condition compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompiledCondition(pub Value);

impl CompiledCondition {
    pub fn match_all() -> Self {
        Self(serde_json::json!({ "match_all": {} }))
    }

    /// Exact match on one field
    pub fn term(field: &str, value: impl Into<Value>) -> Self {
        Self(serde_json::json!({ "term": { field: value.into() } }))
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }
}
