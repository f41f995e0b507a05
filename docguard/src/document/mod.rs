// Document model shared by the engine, the pipeline and the stores

use serde_json::{Map, Value};

/// A document as it flows through the write pipeline: field name to value.
pub type Document = Map<String, Value>;

/// Store-managed identity field, never subject to the schema whitelist
pub const ID_FIELD: &str = "_id";

pub const SET: &str = "$set";
pub const UNSET: &str = "$unset";
pub const INC: &str = "$inc";

/// True if the document is an update modifier (top-level operator keys)
pub fn is_modifier(doc: &Document) -> bool {
    doc.keys().any(|k| k.starts_with('$'))
}

/// True if the modifier sets or unsets fields, i.e. is subject to schema checks
pub fn has_field_set(modifier: &Document) -> bool {
    modifier.contains_key(SET) || modifier.contains_key(UNSET)
}

/// A value counts as absent when missing or null
pub fn is_absent(doc: &Document, field: &str) -> bool {
    matches!(doc.get(field), None | Some(Value::Null))
}

/// Short type name of a JSON value for error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
