//! Index Mapping Definition
//!
//! Field mapping rules, first match wins:
//!
//! 1. explicit type override for the attribute
//! 2. `String` → `text` with a `keyword` sub-field (`ignore_above: 256`)
//! 3. numeric / boolean types → their backend counterpart
//! 4. anything else → `object`
//!
//! The mapping is computed once per table. Indices created later (dynamic
//! routing) reuse it; the backend cannot remap an existing index.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::models::{AttributeSchema, SemanticType};
use crate::config::ConfigError;

// Mapping element names
pub const MAPPING_PROPERTIES: &str = "properties";
pub const MAPPING_TYPE: &str = "type";
pub const KEYWORD_SUBFIELD: &str = "keyword";
pub const KEYWORD_IGNORE_ABOVE: u32 = 256;

// Index settings names
pub const SETTING_NUMBER_OF_SHARDS: &str = "number_of_shards";
pub const SETTING_NUMBER_OF_REPLICAS: &str = "number_of_replicas";

/// Backend field type for a semantic type (no override applied)
pub fn default_field_type(semantic_type: SemanticType) -> &'static str {
    match semantic_type {
        SemanticType::String => "text",
        SemanticType::Int => "integer",
        SemanticType::Long => "long",
        SemanticType::Float => "float",
        SemanticType::Double => "double",
        SemanticType::Bool => "boolean",
        _ => "object",
    }
}

/// Builds the field mapping and create-index body for a table
#[derive(Debug, Clone)]
pub struct IndexSchemaBuilder {
    mapping: Value,
}

impl IndexSchemaBuilder {
    /// Every override key must name a schema attribute
    pub fn new(
        schema: &AttributeSchema,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        validate_overrides(schema, overrides)?;
        Ok(Self {
            mapping: build_mapping(schema, overrides),
        })
    }

    /// `{"properties": {...}}`
    pub fn mapping(&self) -> &Value {
        &self.mapping
    }

    /// Body of a create-index request
    pub fn create_index_body(&self, shards: u32, replicas: u32, alias: Option<&str>) -> Value {
        let mut body = json!({
            "settings": {
                SETTING_NUMBER_OF_SHARDS: shards,
                SETTING_NUMBER_OF_REPLICAS: replicas,
            },
            "mappings": self.mapping.clone(),
        });
        if let Some(alias) = alias {
            body["aliases"] = json!({ alias: {} });
        }
        body
    }
}

/// Reject overrides naming attributes the table does not declare
pub fn validate_overrides(
    schema: &AttributeSchema,
    overrides: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for attribute in overrides.keys() {
        if !schema.contains(attribute) {
            return Err(ConfigError::UnknownAttribute {
                option: "type.mappings".to_string(),
                attribute: attribute.clone(),
            });
        }
    }
    Ok(())
}

/// Build the field mapping document
pub fn build_mapping(schema: &AttributeSchema, overrides: &BTreeMap<String, String>) -> Value {
    let mut properties = Map::new();
    for attribute in schema.iter() {
        let field = match overrides.get(&attribute.name) {
            Some(field_type) => json!({ MAPPING_TYPE: field_type }),
            None => match attribute.semantic_type {
                SemanticType::String => json!({
                    MAPPING_TYPE: "text",
                    "fields": {
                        KEYWORD_SUBFIELD: {
                            MAPPING_TYPE: "keyword",
                            "ignore_above": KEYWORD_IGNORE_ABOVE,
                        }
                    }
                }),
                other => json!({ MAPPING_TYPE: default_field_type(other) }),
            },
        };
        properties.insert(attribute.name.clone(), field);
    }
    json!({ MAPPING_PROPERTIES: properties })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Attribute;
    use pretty_assertions::assert_eq;

    fn all_types() -> AttributeSchema {
        AttributeSchema::new(vec![
            Attribute::new("s", SemanticType::String),
            Attribute::new("i", SemanticType::Int),
            Attribute::new("l", SemanticType::Long),
            Attribute::new("f", SemanticType::Float),
            Attribute::new("d", SemanticType::Double),
            Attribute::new("b", SemanticType::Bool),
            Attribute::new("o", SemanticType::Object),
        ])
        .unwrap()
    }

    #[test]
    fn test_default_mapping() {
        let mapping = build_mapping(&all_types(), &BTreeMap::new());
        assert_eq!(
            mapping,
            json!({
                "properties": {
                    "s": {
                        "type": "text",
                        "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
                    },
                    "i": { "type": "integer" },
                    "l": { "type": "long" },
                    "f": { "type": "float" },
                    "d": { "type": "double" },
                    "b": { "type": "boolean" },
                    "o": { "type": "object" }
                }
            })
        );
    }

    #[test]
    fn test_override_wins_for_every_type() {
        let schema = all_types();
        for attribute in schema.iter() {
            let mut overrides = BTreeMap::new();
            overrides.insert(attribute.name.clone(), "keyword".to_string());
            let mapping = build_mapping(&schema, &overrides);
            assert_eq!(
                mapping["properties"][attribute.name.as_str()],
                json!({ "type": "keyword" })
            );
        }
    }

    #[test]
    fn test_unknown_override_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("volume".to_string(), "long".to_string());
        let err = IndexSchemaBuilder::new(&all_types(), &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAttribute { .. }));
    }

    #[test]
    fn test_create_index_body_with_alias() {
        let builder = IndexSchemaBuilder::new(&all_types(), &BTreeMap::new()).unwrap();
        let body = builder.create_index_body(3, 2, Some("stocks"));
        assert_eq!(body["settings"]["number_of_shards"], json!(3));
        assert_eq!(body["settings"]["number_of_replicas"], json!(2));
        assert_eq!(body["aliases"], json!({ "stocks": {} }));
        assert_eq!(&body["mappings"], builder.mapping());
    }

    #[test]
    fn test_create_index_body_without_alias() {
        let builder = IndexSchemaBuilder::new(&all_types(), &BTreeMap::new()).unwrap();
        let body = builder.create_index_body(1, 0, None);
        assert!(body.get("aliases").is_none());
    }
}
