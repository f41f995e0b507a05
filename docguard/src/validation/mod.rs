pub mod convert;

use crate::document::{self, Document, ID_FIELD, SET, UNSET};
use crate::error::Result;
use crate::schema::{FieldDefinition, FieldType, SchemaDefinition};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Why a field failed validation
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReason {
    Required,
    ExpectedType { expected: FieldType, found: &'static str },
    MinNumber(f64),
    MaxNumber(f64),
    MinLength(f64),
    MaxLength(f64),
    NotAllowed,
    RegexMismatch,
    KeyNotInSchema,
}

impl InvalidReason {
    /// Stable machine-readable code
    pub fn code(&self) -> String {
        match self {
            InvalidReason::Required => "required".into(),
            InvalidReason::ExpectedType { expected, .. } => {
                let name = expected.as_str();
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => format!("expected{}{}", first.to_ascii_uppercase(), chars.as_str()),
                    None => "expected".into(),
                }
            }
            InvalidReason::MinNumber(_) => "minNumber".into(),
            InvalidReason::MaxNumber(_) => "maxNumber".into(),
            InvalidReason::MinLength(_) => "minLength".into(),
            InvalidReason::MaxLength(_) => "maxLength".into(),
            InvalidReason::NotAllowed => "notAllowed".into(),
            InvalidReason::RegexMismatch => "regEx".into(),
            InvalidReason::KeyNotInSchema => "keyNotInSchema".into(),
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Required => write!(f, "is required"),
            InvalidReason::ExpectedType { expected, found } => {
                write!(f, "expected {expected}, got {found}")
            }
            InvalidReason::MinNumber(min) => write!(f, "must be at least {min}"),
            InvalidReason::MaxNumber(max) => write!(f, "cannot exceed {max}"),
            InvalidReason::MinLength(min) => write!(f, "must have length at least {min}"),
            InvalidReason::MaxLength(max) => write!(f, "cannot have length above {max}"),
            InvalidReason::NotAllowed => write!(f, "is not an allowed value"),
            InvalidReason::RegexMismatch => write!(f, "does not match the required pattern"),
            InvalidReason::KeyNotInSchema => write!(f, "is not allowed by the schema"),
        }
    }
}

/// One entry of the invalid-field record
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidKey {
    pub name: String,
    pub reason: InvalidReason,
    /// Declared schema label, shown in messages instead of the field name
    pub label: Option<String>,
}

impl InvalidKey {
    pub fn new(name: impl Into<String>, reason: InvalidReason) -> Self {
        InvalidKey {
            name: name.into(),
            reason,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.label.as_deref().unwrap_or(&self.name);
        write!(f, "'{}' {}", shown, self.reason)
    }
}

/// The schema engine contract consumed by the write pipeline.
///
/// `validate` is state based: it replaces the engine's current invalid keys,
/// which `valid` and `invalid_keys` then report until the next call.
pub trait SchemaEngine {
    fn schema(&self) -> &SchemaDefinition;

    /// Drop fields not declared in the schema
    fn filter(&self, doc: Document) -> Document;

    /// Coerce raw values toward their declared types
    fn auto_type_convert(&self, doc: Document) -> Document;

    fn validate(&mut self, doc: &Document);

    fn valid(&self) -> bool {
        self.invalid_keys().is_empty()
    }

    fn invalid_keys(&self) -> &[InvalidKey];
}

/// Built-in engine for the field types of [`FieldType`].
///
/// Plain documents are checked field by field. Update modifiers are checked
/// by operator: `$set` values are type checked (absent fields are not
/// required), `$unset` of a required field is reported as `required`.
pub struct FieldSchemaEngine {
    schema: Arc<SchemaDefinition>,
    patterns: HashMap<String, Regex>,
    invalid: Vec<InvalidKey>,
}

impl FieldSchemaEngine {
    pub fn new(schema: Arc<SchemaDefinition>) -> Result<Self> {
        let mut patterns = HashMap::new();
        for (name, field) in &schema.fields {
            if let Some(pattern) = &field.regex {
                patterns.insert(name.clone(), Regex::new(pattern)?);
            }
        }

        Ok(FieldSchemaEngine {
            schema,
            patterns,
            invalid: Vec::new(),
        })
    }

    fn invalid_key(&self, name: &str, reason: InvalidReason) -> InvalidKey {
        let key = InvalidKey::new(name, reason);
        match self.schema.label(name) {
            label if label != name => key.with_label(label),
            _ => key,
        }
    }

    fn filter_fields(&self, fields: Document) -> Document {
        fields
            .into_iter()
            .filter(|(key, _)| {
                let keep = key == ID_FIELD || self.schema.contains(key);
                if !keep {
                    log::debug!("Dropping field '{key}' not declared in the schema");
                }
                keep
            })
            .collect()
    }

    fn convert_fields(&self, fields: Document) -> Document {
        fields
            .into_iter()
            .map(|(key, value)| match self.schema.field(&key) {
                Some(def) => {
                    let converted = convert::coerce(value, def.field_type);
                    (key, converted)
                }
                None => (key, value),
            })
            .collect()
    }

    fn check_document(&self, doc: &Document, issues: &mut Vec<InvalidKey>) {
        for (name, def) in &self.schema.fields {
            match doc.get(name) {
                None | Some(Value::Null) => {
                    if def.is_required() {
                        issues.push(self.invalid_key(name, InvalidReason::Required));
                    }
                }
                Some(value) => {
                    if let Some(reason) = self.check_value(name, def, value) {
                        issues.push(self.invalid_key(name, reason));
                    }
                }
            }
        }

        for key in doc.keys() {
            if key != ID_FIELD && !self.schema.contains(key) {
                issues.push(self.invalid_key(key, InvalidReason::KeyNotInSchema));
            }
        }
    }

    fn check_modifier(&self, modifier: &Document, issues: &mut Vec<InvalidKey>) {
        if let Some(set) = modifier.get(SET).and_then(Value::as_object) {
            for (key, value) in set {
                let Some(def) = self.schema.field(key) else {
                    if key != ID_FIELD {
                        issues.push(self.invalid_key(key, InvalidReason::KeyNotInSchema));
                    }
                    continue;
                };
                if value.is_null() {
                    if def.is_required() {
                        issues.push(self.invalid_key(key, InvalidReason::Required));
                    }
                } else if let Some(reason) = self.check_value(key, def, value) {
                    issues.push(self.invalid_key(key, reason));
                }
            }
        }

        if let Some(unset) = modifier.get(UNSET).and_then(Value::as_object) {
            for key in unset.keys() {
                match self.schema.field(key) {
                    Some(def) if def.is_required() => {
                        issues.push(self.invalid_key(key, InvalidReason::Required));
                    }
                    Some(_) => {}
                    None => issues.push(self.invalid_key(key, InvalidReason::KeyNotInSchema)),
                }
            }
        }
    }

    fn check_value(&self, name: &str, def: &FieldDefinition, value: &Value) -> Option<InvalidReason> {
        let type_ok = match def.field_type {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Date => value
                .as_str()
                .map(|s| convert::parse_timestamp(s).is_some())
                .unwrap_or(false),
            FieldType::Object => value.is_object(),
            FieldType::List => value.is_array(),
        };
        if !type_ok {
            return Some(InvalidReason::ExpectedType {
                expected: def.field_type,
                found: document::type_name(value),
            });
        }

        let measure = match value {
            Value::Number(n) => n.as_f64().map(|n| (n, false)),
            Value::String(s) if def.field_type == FieldType::String => {
                Some((s.chars().count() as f64, true))
            }
            Value::Array(items) => Some((items.len() as f64, true)),
            _ => None,
        };
        if let Some((amount, is_length)) = measure {
            if let Some(min) = def.min.filter(|min| amount < *min) {
                return Some(if is_length {
                    InvalidReason::MinLength(min)
                } else {
                    InvalidReason::MinNumber(min)
                });
            }
            if let Some(max) = def.max.filter(|max| amount > *max) {
                return Some(if is_length {
                    InvalidReason::MaxLength(max)
                } else {
                    InvalidReason::MaxNumber(max)
                });
            }
        }

        if let Some(allowed) = &def.allowed_values {
            if !allowed.iter().any(|a| values_equal(a, value)) {
                return Some(InvalidReason::NotAllowed);
            }
        }

        if let (Some(pattern), Some(s)) = (self.patterns.get(name), value.as_str()) {
            if !pattern.is_match(s) {
                return Some(InvalidReason::RegexMismatch);
            }
        }

        None
    }
}

impl SchemaEngine for FieldSchemaEngine {
    fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    fn filter(&self, doc: Document) -> Document {
        if !document::is_modifier(&doc) {
            return self.filter_fields(doc);
        }

        // Operator keys stay even when emptied, so a filtered modifier is never
        // mistaken for a replacement document.
        doc.into_iter()
            .map(|(op, payload)| match payload {
                Value::Object(fields) => (op, Value::Object(self.filter_fields(fields))),
                other => (op, other),
            })
            .collect()
    }

    fn auto_type_convert(&self, doc: Document) -> Document {
        if !document::is_modifier(&doc) {
            return self.convert_fields(doc);
        }

        doc.into_iter()
            .map(|(op, payload)| {
                let payload = match payload {
                    Value::Object(fields) if op == SET => Value::Object(self.convert_fields(fields)),
                    other => other,
                };
                (op, payload)
            })
            .collect()
    }

    fn validate(&mut self, doc: &Document) {
        let mut issues = Vec::new();
        if document::is_modifier(doc) {
            self.check_modifier(doc, &mut issues);
        } else {
            self.check_document(doc, &mut issues);
        }
        self.invalid = issues;
    }

    fn invalid_keys(&self) -> &[InvalidKey] {
        &self.invalid
    }
}

/// Numbers compare by value so that `5` matches an allowed `5.0`
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
