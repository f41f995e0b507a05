pub mod collection;
pub mod directive;
pub mod document;
pub mod error;
pub mod hooks;
pub mod schema;
pub mod store;
pub mod tracker;
pub mod validation;

pub use collection::{Collection, CollectionOptions, CollectionTarget, ExecutionMode, WriteCallback};
pub use document::Document;
pub use error::{DocGuardError, Result, ValidationError};
pub use hooks::HookOutcome;
pub use schema::SchemaDefinition;
pub use store::{DocumentStore, Selector, SqliteStore, WriteResult};
pub use validation::{FieldSchemaEngine, InvalidKey, InvalidReason, SchemaEngine};
