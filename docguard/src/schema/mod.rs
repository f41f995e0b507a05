mod parser;
mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use types::{AutoIdStrategy, FieldDefinition, FieldType, SchemaDefinition};

use crate::error::{DocGuardError, Result};
use std::collections::BTreeMap;

impl SchemaDefinition {
    pub fn new(fields: BTreeMap<String, FieldDefinition>) -> Self {
        SchemaDefinition {
            collection: None,
            id: None,
            fields,
        }
    }

    /// Look up a single field definition
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Human label for a field: its declared label, or the field name
    pub fn label<'a>(&'a self, name: &'a str) -> &'a str {
        self.fields
            .get(name)
            .and_then(|f| f.label.as_deref())
            .unwrap_or(name)
    }

    /// Structural checks run once, before a schema is handed to a collection.
    pub fn check(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(DocGuardError::Schema("Schema declares no fields".into()));
        }

        for (name, field) in &self.fields {
            if name.is_empty() || name.starts_with('$') || name.contains('.') {
                return Err(DocGuardError::Schema(format!(
                    "Invalid field name '{name}': names must be non-empty and contain no '$' or '.'"
                )));
            }
            if let (Some(min), Some(max)) = (field.min, field.max) {
                if min > max {
                    return Err(DocGuardError::Schema(format!(
                        "Field '{name}' has min {min} greater than max {max}"
                    )));
                }
            }
            if field.auto_now && field.field_type != FieldType::Date {
                return Err(DocGuardError::Schema(format!(
                    "Field '{name}' uses auto_now but is of type {}, expected date",
                    field.field_type
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shorthand_and_full_specs() {
        let schema = parse_schema_str(
            r#"
name: String
age: { type: number }
createdAt: { type: date, autoNow: true }
"#,
        )
        .unwrap();

        assert_eq!(schema.len(), 3);
        assert_eq!(schema.field("name").unwrap().field_type, FieldType::String);
        assert!(schema.field("name").unwrap().is_required());
        assert_eq!(schema.field("age").unwrap().field_type, FieldType::Number);
        assert!(schema.field("createdAt").unwrap().auto_now);
        assert!(schema.collection.is_none());
    }

    #[test]
    fn test_parse_fields_section() {
        let schema = parse_schema_str(
            r#"
collection: users
id: uuid
fields:
  email: { type: string, regex: "^[^@]+@[^@]+$" }
  role: { type: string, allowed_values: [admin, member], default: member }
  score: { type: integer, min: 0, max: 100, optional: true }
"#,
        )
        .unwrap();

        assert_eq!(schema.collection.as_deref(), Some("users"));
        assert_eq!(schema.id, Some(AutoIdStrategy::Uuid));
        let role = schema.field("role").unwrap();
        assert_eq!(role.default, Some(serde_json::json!("member")));
        assert_eq!(role.allowed_values.as_ref().unwrap().len(), 2);
        let score = schema.field("score").unwrap();
        assert!(score.optional);
        assert_eq!(score.min, Some(0.0));
        assert_eq!(score.max, Some(100.0));
    }

    #[test]
    fn test_field_names_are_sorted() {
        let schema = parse_schema_str("zeta: string\nalpha: number\nmid: boolean").unwrap();
        let names: Vec<&str> = schema.field_names().collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_rejects_operator_field_names() {
        let err = parse_schema_str("$set: string").unwrap_err();
        assert!(err.to_string().contains("$set"));

        let err = parse_schema_str("a.b: string").unwrap_err();
        assert!(err.to_string().contains("a.b"));
    }

    #[test]
    fn test_rejects_auto_now_on_non_date() {
        let err = parse_schema_str("stamp: { type: string, auto_now: true }").unwrap_err();
        assert!(matches!(err, DocGuardError::Schema(_)));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let err = parse_schema_str("n: { type: number, min: 5, max: 1 }").unwrap_err();
        assert!(err.to_string().contains("greater than max"));
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(parse_schema_str("name: uuid").is_err());
    }

    #[test]
    fn test_label_falls_back_to_name() {
        let schema =
            parse_schema_str("first: { type: string, label: First name }\nlast: string").unwrap();
        assert_eq!(schema.label("first"), "First name");
        assert_eq!(schema.label("last"), "last");
    }

    #[test]
    fn test_range_builder_is_checked() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "n".to_string(),
            FieldDefinition::new(FieldType::Number).range(Some(5.0), Some(1.0)),
        );
        let err = SchemaDefinition::new(fields).check().unwrap_err();
        assert!(err.to_string().contains("greater than max"));
    }
}
