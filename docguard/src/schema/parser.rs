use super::types::{FieldSpec, SchemaDefinition};
use crate::error::{DocGuardError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Parse a schema YAML file into a SchemaDefinition
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema YAML string into a SchemaDefinition.
///
/// Accepts either a full definition with a `fields:` mapping or a bare
/// mapping of field name to field spec.
pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition> {
    let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
    let schema = match raw.as_mapping() {
        Some(mapping) if mapping.contains_key("fields") => {
            serde_yaml::from_value::<SchemaDefinition>(raw)?
        }
        Some(_) => {
            let fields = serde_yaml::from_value::<BTreeMap<String, FieldSpec>>(raw)?;
            SchemaDefinition {
                fields: fields
                    .into_iter()
                    .map(|(name, spec)| (name, spec.into()))
                    .collect(),
                ..Default::default()
            }
        }
        None => {
            return Err(DocGuardError::Schema(
                "Schema must be a YAML mapping".into(),
            ))
        }
    };

    schema.check()?;
    Ok(schema)
}
