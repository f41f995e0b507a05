use crate::document::{self, Document};
use crate::schema::SchemaDefinition;
use crate::validation::convert::format_timestamp;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Apply insert-time directives to a document in place.
///
/// For every field that is absent (missing or null):
/// - `auto_now` fields are set to `now`
/// - fields with a `default` get a copy of it
///
/// Fields the document already supplies are never overwritten. Returns the
/// names of the fields that were populated.
pub fn apply_directives(
    schema: &SchemaDefinition,
    doc: &mut Document,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut populated = Vec::new();

    for (field_name, field_def) in &schema.fields {
        if !field_def.has_directive() || !document::is_absent(doc, field_name) {
            continue;
        }

        let value = if field_def.auto_now {
            Value::String(format_timestamp(now))
        } else if let Some(default) = &field_def.default {
            default.clone()
        } else {
            continue;
        };

        doc.insert(field_name.clone(), value);
        populated.push(field_name.clone());
    }

    populated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema_str, FieldDefinition, FieldType};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use serde_json::json;

    fn test_schema() -> SchemaDefinition {
        parse_schema_str(
            r#"
name: string
role: { type: string, default: member }
createdAt: { type: date, auto_now: true }
"#,
        )
        .unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
    }

    #[test]
    fn test_auto_now_and_default_fill_absent_fields() {
        let schema = test_schema();
        let mut doc = json!({"name": "x"}).as_object().cloned().unwrap();

        let populated = apply_directives(&schema, &mut doc, fixed_now());

        assert_eq!(populated, vec!["createdAt".to_string(), "role".to_string()]);
        assert_eq!(doc["createdAt"], json!("2026-03-04T05:06:07.000Z"));
        assert_eq!(doc["role"], json!("member"));
    }

    #[test]
    fn test_supplied_fields_are_kept() {
        let schema = test_schema();
        let mut doc = json!({"name": "x", "role": "admin", "createdAt": "2020-01-01"})
            .as_object()
            .cloned()
            .unwrap();

        let populated = apply_directives(&schema, &mut doc, fixed_now());

        assert!(populated.is_empty());
        assert_eq!(doc["role"], json!("admin"));
        assert_eq!(doc["createdAt"], json!("2020-01-01"));
    }

    #[test]
    fn test_null_is_replaced() {
        let schema = test_schema();
        let mut doc = json!({"createdAt": null}).as_object().cloned().unwrap();

        apply_directives(&schema, &mut doc, fixed_now());

        assert_eq!(doc["createdAt"], json!("2026-03-04T05:06:07.000Z"));
    }

    #[test]
    fn test_defaults_from_built_schema() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "status".to_string(),
            FieldDefinition::new(FieldType::String).with_default(json!("draft")),
        );
        fields.insert(
            "score".to_string(),
            FieldDefinition::new(FieldType::Number)
                .range(Some(0.0), Some(10.0))
                .with_default(json!(5)),
        );
        let schema = SchemaDefinition::new(fields);
        assert!(schema.check().is_ok());

        let mut doc = json!({"score": 7}).as_object().cloned().unwrap();
        let populated = apply_directives(&schema, &mut doc, fixed_now());

        assert_eq!(populated, vec!["status".to_string()]);
        assert_eq!(doc["status"], json!("draft"));
        assert_eq!(doc["score"], json!(7));
    }
}
