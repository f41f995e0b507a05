use crate::directive;
use crate::document::{self, Document};
use crate::error::{DocGuardError, Result, ValidationError};
use crate::hooks::{AfterWriteHook, BeforeInsertHook, BeforeUpdateHook, HookOutcome, HookSet};
use crate::schema::{FieldDefinition, SchemaDefinition};
use crate::store::{AccessRules, DocumentStore, Selector, UpdateOptions, WriteKind, WriteResult};
use crate::tracker::{Dependency, InvalidationTracker, Subscription};
use crate::validation::{FieldSchemaEngine, InvalidKey, SchemaEngine};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// How write outcomes reach a caller that passed no callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Failures are returned as errors
    #[default]
    Blocking,
    /// Failures are only reported through callbacks; a missing callback is
    /// replaced by one that logs the failure
    NonBlocking,
}

/// Receives the outcome of a validated write
pub type WriteCallback = Box<dyn FnOnce(std::result::Result<WriteResult, ValidationError>)>;

/// Computes a field added to every document read through the collection
pub type VirtualField = Box<dyn Fn(&Document) -> Value>;

pub type Transform = Box<dyn Fn(Document) -> Document>;

/// What a collection wraps: a fresh store created by name, or one the caller already has
pub enum CollectionTarget<S> {
    Name(String),
    Existing(S),
}

/// Construction options for [`Collection`]
pub struct CollectionOptions {
    schema: SchemaDefinition,
    virtual_fields: BTreeMap<String, VirtualField>,
    transform: Option<Transform>,
    hooks: HookSet,
    mode: ExecutionMode,
}

impl CollectionOptions {
    pub fn new(schema: SchemaDefinition) -> Self {
        CollectionOptions {
            schema,
            virtual_fields: BTreeMap::new(),
            transform: None,
            hooks: HookSet::new(),
            mode: ExecutionMode::default(),
        }
    }

    pub fn virtual_field(
        mut self,
        name: impl Into<String>,
        compute: impl Fn(&Document) -> Value + 'static,
    ) -> Self {
        self.virtual_fields.insert(name.into(), Box::new(compute));
        self
    }

    /// Transform applied to read documents after virtual fields are computed
    pub fn transform(mut self, transform: impl Fn(Document) -> Document + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn before_insert(
        mut self,
        hook: impl Fn(&Document, &SchemaDefinition) -> HookOutcome + 'static,
    ) -> Self {
        self.hooks.before_insert = Some(Box::new(hook) as BeforeInsertHook);
        self
    }

    pub fn before_update(
        mut self,
        hook: impl Fn(&Document, &SchemaDefinition, &Selector) -> HookOutcome + 'static,
    ) -> Self {
        self.hooks.before_update = Some(Box::new(hook) as BeforeUpdateHook);
        self
    }

    pub fn after_insert(
        mut self,
        hook: impl Fn(&WriteResult, &Document) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.after_insert = Some(Box::new(hook) as AfterWriteHook);
        self
    }

    pub fn after_update(
        mut self,
        hook: impl Fn(&WriteResult, &Document) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.after_update = Some(Box::new(hook) as AfterWriteHook);
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A schema-checked collection in front of a [`DocumentStore`].
///
/// Inserts and `$set`/`$unset` updates run through the write pipeline:
/// before-hook, insert directives, whitelist filter, type coercion,
/// validation, invalid-field signalling, then the store write and the
/// after-hook. Reads, removes and permission rules go straight to the store.
pub struct Collection<S, E = FieldSchemaEngine> {
    store: S,
    schema: Arc<SchemaDefinition>,
    engine: E,
    tracker: InvalidationTracker,
    hooks: HookSet,
    virtual_fields: BTreeMap<String, VirtualField>,
    transform: Option<Transform>,
    mode: ExecutionMode,
}

impl<S: DocumentStore> Collection<S> {
    /// Create a collection using the built-in schema engine
    pub fn new(target: CollectionTarget<S>, options: CollectionOptions) -> Result<Self> {
        options.schema.check()?;
        let schema = Arc::new(options.schema.clone());
        let engine = FieldSchemaEngine::new(Arc::clone(&schema))?;
        Self::assemble(target, options, schema, engine)
    }
}

impl<S: DocumentStore, E: SchemaEngine> Collection<S, E> {
    /// Create a collection around a caller-supplied schema engine.
    /// The engine's schema is the collection's schema.
    pub fn with_engine(
        target: CollectionTarget<S>,
        options: CollectionOptions,
        engine: E,
    ) -> Result<Self> {
        if engine.schema() != &options.schema {
            return Err(DocGuardError::Schema(
                "Engine schema differs from the collection schema".into(),
            ));
        }
        let schema = Arc::new(options.schema.clone());
        Self::assemble(target, options, schema, engine)
    }

    fn assemble(
        target: CollectionTarget<S>,
        options: CollectionOptions,
        schema: Arc<SchemaDefinition>,
        engine: E,
    ) -> Result<Self> {
        let store = match target {
            CollectionTarget::Name(name) => S::open_named(&name)?,
            CollectionTarget::Existing(store) => store,
        };
        let tracker = InvalidationTracker::new(schema.field_names());

        Ok(Collection {
            store,
            schema,
            engine,
            tracker,
            hooks: options.hooks,
            virtual_fields: options.virtual_fields,
            transform: options.transform,
            mode: options.mode,
        })
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// The wrapped store
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Insert a document. Returns the new id, or `None` when a validation
    /// failure was reported through a callback.
    pub fn insert(&mut self, doc: Value, callback: Option<WriteCallback>) -> Result<Option<String>> {
        let mut args = vec![doc];
        let result = self.insert_or_update("insert", &mut args, callback)?;
        Ok(result.and_then(|r| r.id().map(str::to_string)))
    }

    /// Update matching documents. Returns the number of documents changed,
    /// or `None` when a validation failure was reported through a callback.
    pub fn update(
        &mut self,
        selector: Value,
        modifier: Value,
        options: Option<Value>,
        callback: Option<WriteCallback>,
    ) -> Result<Option<u64>> {
        let mut args = vec![selector, modifier];
        args.extend(options);
        let result = self.insert_or_update("update", &mut args, callback)?;
        Ok(result.map(|r| r.count()))
    }

    /// Run the write pipeline for `operation` over positional `args`
    /// (insert: `[doc]`, update: `[selector, modifier, options?]`).
    ///
    /// On success the transformed document replaces its slot in `args`.
    pub fn insert_or_update(
        &mut self,
        operation: &str,
        args: &mut Vec<Value>,
        callback: Option<WriteCallback>,
    ) -> Result<Option<WriteResult>> {
        if args.is_empty() {
            return Err(DocGuardError::Argument(format!(
                "{operation} requires an argument"
            )));
        }
        let kind: WriteKind = operation.parse()?;

        let (slot, selector, options) = match kind {
            WriteKind::Insert => (0, None, UpdateOptions::default()),
            WriteKind::Update => {
                let selector = Selector::from_value(&args[0])?;
                let options = UpdateOptions::from_value(args.get(2))?;
                let modifier = match args.get(1) {
                    Some(Value::Object(modifier)) => modifier,
                    _ => {
                        return Err(DocGuardError::Argument(
                            "update requires a modifier object".into(),
                        ))
                    }
                };
                if !document::has_field_set(modifier) {
                    log::debug!(
                        "update on '{}' has no $set or $unset, passing through unvalidated",
                        self.store.name()
                    );
                    let count = self.store.update(&selector, modifier, &options)?;
                    let result = WriteResult::Updated { count };
                    if let Some(callback) = callback {
                        callback(Ok(result.clone()));
                    }
                    return Ok(Some(result));
                }
                (1, Some(selector), options)
            }
        };

        let target = match &args[slot] {
            Value::Object(doc) => doc.clone(),
            other => {
                return Err(DocGuardError::Argument(format!(
                    "{kind} requires a document object, got {}",
                    document::type_name(other)
                )))
            }
        };

        let callback = callback.or_else(|| self.default_callback(kind));

        let mut target = match &selector {
            None => self.hooks.run_before_insert(target, &self.schema),
            Some(selector) => self.hooks.run_before_update(target, &self.schema, selector),
        };
        if kind == WriteKind::Insert {
            directive::apply_directives(&self.schema, &mut target, Utc::now());
        }
        let target = self.engine.filter(target);
        if kind == WriteKind::Update && !document::is_modifier(&target) {
            return Err(DocGuardError::Argument(
                "update target has no modifier operators left after hooks and filtering".into(),
            ));
        }
        let target = self.engine.auto_type_convert(target);

        self.engine.validate(&target);
        let invalid = self.engine.invalid_keys().to_vec();
        self.tracker.record(invalid.clone());

        if !invalid.is_empty() {
            let error = ValidationError::new(kind, invalid);
            return match callback {
                Some(callback) => {
                    callback(Err(error));
                    Ok(None)
                }
                None => Err(error.into()),
            };
        }

        args[slot] = Value::Object(target.clone());
        let result = match &selector {
            None => WriteResult::Inserted {
                id: self.store.insert(target.clone())?,
            },
            Some(selector) => WriteResult::Updated {
                count: self.store.update(selector, &target, &options)?,
            },
        };

        self.hooks.run_after(kind, &result, &target)?;
        if let Some(callback) = callback {
            callback(Ok(result.clone()));
        }
        Ok(Some(result))
    }

    fn default_callback(&self, kind: WriteKind) -> Option<WriteCallback> {
        match self.mode {
            ExecutionMode::Blocking => None,
            ExecutionMode::NonBlocking => {
                let name = self.store.name().to_string();
                Some(Box::new(move |outcome: std::result::Result<WriteResult, ValidationError>| {
                    if let Err(e) = outcome {
                        log::error!("{kind} on '{name}' failed: {e}");
                    }
                }))
            }
        }
    }

    /// Check a document against the schema without writing or touching the
    /// invalid-field record. Runs directives, filter and coercion first.
    pub fn check(&mut self, doc: &Value) -> Result<Vec<InvalidKey>> {
        let Value::Object(doc) = doc else {
            return Err(DocGuardError::Argument(format!(
                "check requires a document object, got {}",
                document::type_name(doc)
            )));
        };
        let mut doc = doc.clone();
        directive::apply_directives(&self.schema, &mut doc, Utc::now());
        let doc = self.engine.auto_type_convert(self.engine.filter(doc));

        self.engine.validate(&doc);
        Ok(self.engine.invalid_keys().to_vec())
    }

    pub fn remove(&mut self, selector: Value) -> Result<u64> {
        let selector = Selector::from_value(&selector)?;
        self.store.remove(&selector)
    }

    pub fn find(&self, selector: Value) -> Result<Vec<Document>> {
        let selector = Selector::from_value(&selector)?;
        Ok(self
            .store
            .find(&selector)?
            .into_iter()
            .map(|doc| self.apply_transform(doc))
            .collect())
    }

    pub fn find_one(&self, selector: Value) -> Result<Option<Document>> {
        let selector = Selector::from_value(&selector)?;
        Ok(self
            .store
            .find_one(&selector)?
            .map(|doc| self.apply_transform(doc)))
    }

    pub fn allow(&mut self, rules: AccessRules) {
        self.store.allow(rules);
    }

    pub fn deny(&mut self, rules: AccessRules) {
        self.store.deny(rules);
    }

    fn apply_transform(&self, mut doc: Document) -> Document {
        for (name, compute) in &self.virtual_fields {
            let value = compute(&doc);
            doc.insert(name.clone(), value);
        }
        match &self.transform {
            Some(transform) => transform(doc),
            None => doc,
        }
    }

    /// Clear the invalid-field record, signalling every field that was invalid
    pub fn reset_validation(&mut self) {
        let cleared = self.tracker.reset();
        if !cleared.is_empty() {
            log::debug!(
                "Cleared stale validation state on '{}' for {}",
                self.store.name(),
                cleared.join(", ")
            );
        }
    }

    /// Invalid fields from the most recent validated write attempt
    pub fn invalid_fields(&self) -> &[InvalidKey] {
        self.tracker.invalid_keys()
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    pub fn field_schema(&self, field: &str) -> Option<&FieldDefinition> {
        self.schema.field(field)
    }

    pub fn dependency(&self, field: &str) -> Option<&Dependency> {
        self.tracker.dependency(field)
    }

    /// Listen for validity changes of one field
    pub fn subscribe(
        &self,
        field: &str,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.tracker.subscribe(field, listener)
    }
}
