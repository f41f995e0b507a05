use crate::store::WriteKind;
use crate::validation::InvalidKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocGuardError {
    #[error("Argument error: {0}")]
    Argument(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("{0}")]
    Other(String),
}

/// A write rejected by the schema engine.
/// Carries every invalid field of the attempt, in the order the engine reported them.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation} failed validation: {}", describe(.invalid_keys))]
pub struct ValidationError {
    pub operation: WriteKind,
    pub invalid_keys: Vec<InvalidKey>,
}

impl ValidationError {
    pub fn new(operation: WriteKind, invalid_keys: Vec<InvalidKey>) -> Self {
        ValidationError {
            operation,
            invalid_keys,
        }
    }

    /// Names of the invalid fields
    pub fn field_names(&self) -> Vec<&str> {
        self.invalid_keys.iter().map(|k| k.name.as_str()).collect()
    }

    pub fn reason_for(&self, field: &str) -> Option<&InvalidKey> {
        self.invalid_keys.iter().find(|k| k.name == field)
    }
}

fn describe(keys: &[InvalidKey]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, DocGuardError>;
