//! User-supplied lifecycle hooks around validated writes.
//!
//! Before-hooks see the incoming document (or update modifier) and may swap
//! it for another; after-hooks observe a completed write. Hook errors are
//! returned to the caller as-is.

use crate::document::Document;
use crate::error::Result;
use crate::schema::SchemaDefinition;
use crate::store::{Selector, WriteKind, WriteResult};

/// What a before-hook decided about the incoming document
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Continue with the original document
    Keep,
    /// Continue with this document instead
    Replace(Document),
}

pub type BeforeInsertHook = Box<dyn Fn(&Document, &SchemaDefinition) -> HookOutcome>;
pub type BeforeUpdateHook = Box<dyn Fn(&Document, &SchemaDefinition, &Selector) -> HookOutcome>;
pub type AfterWriteHook = Box<dyn Fn(&WriteResult, &Document) -> Result<()>>;

#[derive(Default)]
pub struct HookSet {
    pub before_insert: Option<BeforeInsertHook>,
    pub before_update: Option<BeforeUpdateHook>,
    pub after_insert: Option<AfterWriteHook>,
    pub after_update: Option<AfterWriteHook>,
}

impl HookSet {
    pub fn new() -> Self {
        HookSet::default()
    }

    pub fn run_before_insert(&self, doc: Document, schema: &SchemaDefinition) -> Document {
        match &self.before_insert {
            Some(hook) => resolve(WriteKind::Insert, hook(&doc, schema), doc),
            None => doc,
        }
    }

    pub fn run_before_update(
        &self,
        modifier: Document,
        schema: &SchemaDefinition,
        selector: &Selector,
    ) -> Document {
        match &self.before_update {
            Some(hook) => resolve(WriteKind::Update, hook(&modifier, schema, selector), modifier),
            None => modifier,
        }
    }

    /// Run the after-hook registered for `kind`, if any
    pub fn run_after(&self, kind: WriteKind, result: &WriteResult, doc: &Document) -> Result<()> {
        let hook = match kind {
            WriteKind::Insert => &self.after_insert,
            WriteKind::Update => &self.after_update,
        };
        match hook {
            Some(hook) => hook(result, doc),
            None => Ok(()),
        }
    }
}

fn resolve(kind: WriteKind, outcome: HookOutcome, original: Document) -> Document {
    match outcome {
        HookOutcome::Keep => original,
        HookOutcome::Replace(replacement) => {
            log::debug!("before-{kind} hook replaced the document");
            replacement
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocGuardError;
    use crate::schema::parse_schema_str;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_no_hooks_pass_through() {
        let hooks = HookSet::new();
        let schema = parse_schema_str("name: string").unwrap();
        let original = doc(json!({"name": "x"}));
        assert_eq!(hooks.run_before_insert(original.clone(), &schema), original);
        assert!(hooks
            .run_after(WriteKind::Insert, &WriteResult::Inserted { id: "1".into() }, &original)
            .is_ok());
    }

    #[test]
    fn test_keep_and_replace() {
        let schema = parse_schema_str("name: string").unwrap();
        let mut hooks = HookSet::new();
        hooks.before_insert = Some(Box::new(|doc: &Document, _: &SchemaDefinition| {
            if doc.contains_key("name") {
                HookOutcome::Keep
            } else {
                HookOutcome::Replace(json!({"name": "anonymous"}).as_object().cloned().unwrap())
            }
        }));

        let kept = hooks.run_before_insert(doc(json!({"name": "x"})), &schema);
        assert_eq!(kept, doc(json!({"name": "x"})));

        let replaced = hooks.run_before_insert(doc(json!({})), &schema);
        assert_eq!(replaced, doc(json!({"name": "anonymous"})));
    }

    #[test]
    fn test_empty_replacement_is_honored() {
        let schema = parse_schema_str("name: string").unwrap();
        let mut hooks = HookSet::new();
        hooks.before_update = Some(Box::new(|_: &Document, _: &SchemaDefinition, _: &Selector| {
            HookOutcome::Replace(Document::new())
        }));

        let out = hooks.run_before_update(doc(json!({"$set": {"name": "x"}})), &schema, &Selector::all());
        assert!(out.is_empty());
    }

    #[test]
    fn test_before_update_sees_selector() {
        let schema = parse_schema_str("name: string").unwrap();
        let seen = Rc::new(RefCell::new(None));
        let seen_in_hook = Rc::clone(&seen);
        let mut hooks = HookSet::new();
        hooks.before_update = Some(Box::new(move |_: &Document, _: &SchemaDefinition, sel: &Selector| {
            *seen_in_hook.borrow_mut() = sel.target_id().map(str::to_string);
            HookOutcome::Keep
        }));

        hooks.run_before_update(doc(json!({"$set": {}})), &schema, &Selector::id("abc"));
        assert_eq!(seen.borrow().as_deref(), Some("abc"));
    }

    #[test]
    fn test_after_hook_error_propagates() {
        let mut hooks = HookSet::new();
        hooks.after_update = Some(Box::new(|_: &WriteResult, _: &Document| {
            Err(DocGuardError::Hook("audit log unavailable".into()))
        }));

        let err = hooks
            .run_after(WriteKind::Update, &WriteResult::Updated { count: 1 }, &Document::new())
            .unwrap_err();
        assert!(err.to_string().contains("audit log unavailable"));
        assert!(hooks
            .run_after(WriteKind::Insert, &WriteResult::Inserted { id: "1".into() }, &Document::new())
            .is_ok());
    }
}
