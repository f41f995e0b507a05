use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Top-level schema definition for one collection.
///
/// Field order is the sorted field name order; validation reports and
/// dependency handles follow it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Collection name the schema file is meant for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Id generation strategy for stores created from this schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AutoIdStrategy>,
    #[serde(deserialize_with = "deserialize_fields")]
    pub fields: BTreeMap<String, FieldDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoIdStrategy {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

/// Definition of a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Fields are required unless marked optional
    #[serde(default)]
    pub optional: bool,
    /// Populate with the current timestamp on insert when absent
    #[serde(default, alias = "autoNow")]
    pub auto_now: bool,
    /// Populate with this value on insert when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Lower bound: value for numbers, length for strings and lists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound: value for numbers, length for strings and lists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(
        default,
        alias = "allowedValues",
        skip_serializing_if = "Option::is_none"
    )]
    pub allowed_values: Option<Vec<serde_json::Value>>,
    #[serde(default, alias = "regEx", skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        FieldDefinition {
            field_type,
            optional: false,
            auto_now: false,
            default: None,
            min: None,
            max: None,
            allowed_values: None,
            regex: None,
            label: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn auto_now(mut self) -> Self {
        self.auto_now = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn is_required(&self) -> bool {
        !self.optional
    }

    /// True if the field carries a directive applied before validation on insert
    pub fn has_directive(&self) -> bool {
        self.auto_now || self.default.is_some()
    }
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[serde(alias = "String")]
    String,
    #[serde(alias = "Number")]
    Number,
    #[serde(alias = "Integer")]
    Integer,
    #[serde(alias = "Boolean")]
    Boolean,
    #[serde(alias = "Date")]
    Date,
    #[serde(alias = "Object")]
    Object,
    #[serde(alias = "List", alias = "array", alias = "Array")]
    List,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Object => "object",
            FieldType::List => "list",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field spec as written in a schema file: either `name: string` or a full mapping.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum FieldSpec {
    Shorthand(FieldType),
    Full(FieldDefinition),
}

impl From<FieldSpec> for FieldDefinition {
    fn from(spec: FieldSpec) -> Self {
        match spec {
            FieldSpec::Shorthand(field_type) => FieldDefinition::new(field_type),
            FieldSpec::Full(def) => def,
        }
    }
}

pub(crate) fn deserialize_fields<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, FieldDefinition>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, FieldSpec>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(name, spec)| (name, spec.into())).collect())
}
