mod sqlite;

pub use sqlite::SqliteStore;

use crate::document::{self, Document, ID_FIELD, INC, SET, UNSET};
use crate::error::{DocGuardError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The two write operations the pipeline intercepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Insert,
    Update,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteKind::Insert => f.write_str("insert"),
            WriteKind::Update => f.write_str("update"),
        }
    }
}

impl FromStr for WriteKind {
    type Err = DocGuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(WriteKind::Insert),
            "update" => Ok(WriteKind::Update),
            other => Err(DocGuardError::Argument(format!(
                "Invalid operation type '{other}', expected insert or update"
            ))),
        }
    }
}

/// What the store reported for a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Inserted { id: String },
    Updated { count: u64 },
}

impl WriteResult {
    pub fn id(&self) -> Option<&str> {
        match self {
            WriteResult::Inserted { id } => Some(id),
            WriteResult::Updated { .. } => None,
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            WriteResult::Inserted { .. } => 1,
            WriteResult::Updated { count } => *count,
        }
    }
}

/// Top-level equality selector. An empty selector matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    criteria: Document,
}

impl Selector {
    pub fn all() -> Self {
        Selector::default()
    }

    pub fn id(id: impl Into<String>) -> Self {
        let mut criteria = Document::new();
        criteria.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Selector { criteria }
    }

    pub fn fields(criteria: Document) -> Self {
        Selector { criteria }
    }

    /// A string selects by id, an object by field equality, null selects everything.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Selector::all()),
            Value::String(id) => Ok(Selector::id(id.clone())),
            Value::Object(criteria) => {
                if let Some(op) = criteria.keys().find(|k| k.starts_with('$')) {
                    return Err(DocGuardError::Argument(format!(
                        "Unsupported selector operator '{op}'"
                    )));
                }
                Ok(Selector::fields(criteria.clone()))
            }
            other => Err(DocGuardError::Argument(format!(
                "Selector must be an id string or an object, got {}",
                document::type_name(other)
            ))),
        }
    }

    pub fn criteria(&self) -> &Document {
        &self.criteria
    }

    /// The id this selector targets, if it selects by id
    pub fn target_id(&self) -> Option<&str> {
        self.criteria.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.criteria
            .iter()
            .all(|(key, expected)| doc.get(key).unwrap_or(&Value::Null) == expected)
    }
}

/// Options accepted by `update`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first
    #[serde(default)]
    pub multi: bool,
    /// Insert a document built from selector and modifier when nothing matches
    #[serde(default)]
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        match value {
            None | Some(Value::Null) => Ok(UpdateOptions::default()),
            Some(v @ Value::Object(_)) => UpdateOptions::deserialize(v)
                .map_err(|e| DocGuardError::Argument(format!("Invalid update options: {e}"))),
            Some(other) => Err(DocGuardError::Argument(format!(
                "Update options must be an object, got {}",
                document::type_name(other)
            ))),
        }
    }
}

pub type RulePredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Client write permission rules, recorded by the store and not evaluated here
#[derive(Clone, Default)]
pub struct AccessRules {
    pub insert: Option<RulePredicate>,
    pub update: Option<RulePredicate>,
    pub remove: Option<RulePredicate>,
}

impl AccessRules {
    pub fn new() -> Self {
        AccessRules::default()
    }

    pub fn on_insert(mut self, rule: impl Fn(&Document) -> bool + Send + Sync + 'static) -> Self {
        self.insert = Some(Arc::new(rule));
        self
    }

    pub fn on_update(mut self, rule: impl Fn(&Document) -> bool + Send + Sync + 'static) -> Self {
        self.update = Some(Arc::new(rule));
        self
    }

    pub fn on_remove(mut self, rule: impl Fn(&Document) -> bool + Send + Sync + 'static) -> Self {
        self.remove = Some(Arc::new(rule));
        self
    }
}

impl fmt::Debug for AccessRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessRules")
            .field("insert", &self.insert.is_some())
            .field("update", &self.update.is_some())
            .field("remove", &self.remove.is_some())
            .finish()
    }
}

/// The underlying document store a collection delegates to.
pub trait DocumentStore {
    /// Create a fresh collection with the given name
    fn open_named(name: &str) -> Result<Self>
    where
        Self: Sized;

    fn name(&self) -> &str;

    /// Insert a document and return its id
    fn insert(&mut self, doc: Document) -> Result<String>;

    /// Apply a modifier to matching documents and return how many changed
    fn update(
        &mut self,
        selector: &Selector,
        modifier: &Document,
        options: &UpdateOptions,
    ) -> Result<u64>;

    fn remove(&mut self, selector: &Selector) -> Result<u64>;

    fn find(&self, selector: &Selector) -> Result<Vec<Document>>;

    fn find_one(&self, selector: &Selector) -> Result<Option<Document>> {
        Ok(self.find(selector)?.into_iter().next())
    }

    fn allow(&mut self, rules: AccessRules);

    fn deny(&mut self, rules: AccessRules);
}

/// Apply an update modifier to a stored document.
///
/// A modifier without operator keys replaces the document, keeping its id.
pub fn apply_modifier(doc: &mut Document, modifier: &Document) -> Result<()> {
    if !document::is_modifier(modifier) {
        let id = doc.remove(ID_FIELD);
        *doc = modifier.clone();
        if let Some(id) = id {
            doc.insert(ID_FIELD.to_string(), id);
        }
        return Ok(());
    }

    for (op, payload) in modifier {
        let fields = payload.as_object().ok_or_else(|| {
            DocGuardError::Store(format!("Modifier '{op}' must map fields to values"))
        })?;

        match op.as_str() {
            SET => {
                for (key, value) in fields {
                    doc.insert(key.clone(), value.clone());
                }
            }
            UNSET => {
                for key in fields.keys() {
                    doc.remove(key);
                }
            }
            INC => {
                for (key, amount) in fields {
                    let next = increment(doc.get(key), amount).ok_or_else(|| {
                        DocGuardError::Store(format!(
                            "Cannot apply $inc to non-numeric field '{key}'"
                        ))
                    })?;
                    doc.insert(key.clone(), next);
                }
            }
            other => {
                return Err(DocGuardError::Store(format!(
                    "Unsupported modifier '{other}'"
                )))
            }
        }
    }

    Ok(())
}

fn increment(current: Option<&Value>, amount: &Value) -> Option<Value> {
    let zero = Value::from(0);
    let current = match current {
        None | Some(Value::Null) => &zero,
        Some(v) => v,
    };
    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        return a.checked_add(b).map(Value::from);
    }
    let sum = current.as_f64()? + amount.as_f64()?;
    serde_json::Number::from_f64(sum).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_write_kind_parse() {
        assert_eq!("insert".parse::<WriteKind>().unwrap(), WriteKind::Insert);
        assert_eq!("update".parse::<WriteKind>().unwrap(), WriteKind::Update);
        assert!(matches!(
            "upsert".parse::<WriteKind>(),
            Err(DocGuardError::Argument(_))
        ));
    }

    #[test]
    fn test_selector_from_value() {
        let by_id = Selector::from_value(&json!("abc")).unwrap();
        assert_eq!(by_id.target_id(), Some("abc"));

        let by_field = Selector::from_value(&json!({"name": "x"})).unwrap();
        assert!(by_field.matches(&doc(json!({"name": "x", "age": 1}))));
        assert!(!by_field.matches(&doc(json!({"name": "y"}))));

        assert!(Selector::from_value(&Value::Null).unwrap().matches(&doc(json!({}))));
        assert!(Selector::from_value(&json!(5)).is_err());
        assert!(Selector::from_value(&json!({"$or": []})).is_err());
    }

    #[test]
    fn test_selector_null_matches_missing() {
        let selector = Selector::from_value(&json!({"deleted": null})).unwrap();
        assert!(selector.matches(&doc(json!({"name": "x"}))));
    }

    #[test]
    fn test_update_options() {
        let opts = UpdateOptions::from_value(Some(&json!({"multi": true}))).unwrap();
        assert!(opts.multi);
        assert!(!opts.upsert);
        assert_eq!(UpdateOptions::from_value(None).unwrap(), UpdateOptions::default());
        assert!(UpdateOptions::from_value(Some(&json!("multi"))).is_err());
    }

    #[test]
    fn test_apply_set_unset_inc() {
        let mut d = doc(json!({"_id": "1", "a": 1, "b": "x", "n": 2}));
        apply_modifier(
            &mut d,
            &doc(json!({"$set": {"a": 5}, "$unset": {"b": ""}, "$inc": {"n": 3, "m": 1}})),
        )
        .unwrap();
        assert_eq!(d, doc(json!({"_id": "1", "a": 5, "n": 5, "m": 1})));
    }

    #[test]
    fn test_apply_replacement_keeps_id() {
        let mut d = doc(json!({"_id": "1", "a": 1}));
        apply_modifier(&mut d, &doc(json!({"b": 2}))).unwrap();
        assert_eq!(d, doc(json!({"_id": "1", "b": 2})));
    }

    #[test]
    fn test_apply_inc_non_numeric_fails() {
        let mut d = doc(json!({"a": "x"}));
        let err = apply_modifier(&mut d, &doc(json!({"$inc": {"a": 1}}))).unwrap_err();
        assert!(matches!(err, DocGuardError::Store(_)));
    }

    #[test]
    fn test_apply_unknown_operator_fails() {
        let mut d = doc(json!({}));
        assert!(apply_modifier(&mut d, &doc(json!({"$push": {"a": 1}}))).is_err());
    }
}
