//! Per-field validity signals.
//!
//! Every declared field owns one [`Dependency`]. A write attempt hands the
//! tracker the engine's new invalid keys; each field whose validity changed
//! is signalled once, then the record is replaced.
//!
//! Listener lists use `parking_lot::Mutex` and are snapshotted before
//! listeners run, so a listener may subscribe or unsubscribe while being
//! notified.

use crate::error::{DocGuardError, Result};
use crate::validation::InvalidKey;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub type ListenerId = u64;

/// Closure type for field listeners; receives the field name
pub type ListenerFn = dyn Fn(&str) + Send + Sync;

/// Change signal for one schema field
pub struct Dependency {
    name: String,
    version: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<ListenerFn>)>>,
    next_id: AtomicU64,
}

impl Dependency {
    fn new(name: &str) -> Self {
        Dependency {
            name: name.to_string(),
            version: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times this field has been signalled
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Mark the field as changed and call every listener registered at this point
    pub fn changed(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
        let snapshot: Vec<Arc<ListenerFn>> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(&self.name);
        }
    }

    fn on(&self, listener: Arc<ListenerFn>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));
        id
    }

    fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }
}

/// Handle returned by [`InvalidationTracker::subscribe`].
/// The listener stays registered until `unsubscribe` is called.
pub struct Subscription {
    dependency: Weak<Dependency>,
    id: ListenerId,
}

impl Subscription {
    pub fn field(&self) -> Option<String> {
        self.dependency.upgrade().map(|d| d.name.clone())
    }

    pub fn unsubscribe(self) {
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.off(self.id);
        }
    }
}

/// Owns the invalid-field record and one dependency per declared field.
pub struct InvalidationTracker {
    deps: BTreeMap<String, Arc<Dependency>>,
    invalid: Vec<InvalidKey>,
}

impl InvalidationTracker {
    pub fn new<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        let deps = fields
            .into_iter()
            .map(|name| (name.to_string(), Arc::new(Dependency::new(name))))
            .collect();
        InvalidationTracker {
            deps,
            invalid: Vec::new(),
        }
    }

    pub fn dependency(&self, field: &str) -> Option<&Dependency> {
        self.deps.get(field).map(Arc::as_ref)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.deps.keys().map(String::as_str)
    }

    /// The current invalid-field record
    pub fn invalid_keys(&self) -> &[InvalidKey] {
        &self.invalid
    }

    pub fn subscribe(
        &self,
        field: &str,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let dependency = self.deps.get(field).ok_or_else(|| {
            DocGuardError::Argument(format!("No field '{field}' in the schema"))
        })?;
        let id = dependency.on(Arc::new(listener));
        Ok(Subscription {
            dependency: Arc::downgrade(dependency),
            id,
        })
    }

    /// Signal one field. Returns false if the field is not declared.
    pub fn notify(&self, field: &str) -> bool {
        match self.deps.get(field) {
            Some(dependency) => {
                dependency.changed();
                true
            }
            None => {
                log::debug!("Ignoring change signal for undeclared field '{field}'");
                false
            }
        }
    }

    /// Replace the invalid-field record with `next`, signalling every field
    /// that became valid, became invalid, or changed reason. Fields invalid
    /// for the same reason before and after are not signalled.
    /// Returns the signalled field names in signal order.
    pub fn record(&mut self, next: Vec<InvalidKey>) -> Vec<String> {
        let mut changed = Vec::new();
        let mut seen = HashSet::new();

        for old in &self.invalid {
            let same = next.iter().any(|k| k == old);
            if !same && seen.insert(old.name.clone()) {
                changed.push(old.name.clone());
            }
        }
        for new in &next {
            let same = self.invalid.iter().any(|k| k == new);
            if !same && seen.insert(new.name.clone()) {
                changed.push(new.name.clone());
            }
        }

        for name in &changed {
            self.notify(name);
        }
        if !changed.is_empty() {
            log::debug!("Validity changed for fields: {}", changed.join(", "));
        }

        self.invalid = next;
        changed
    }

    /// Clear the record, signalling each previously invalid field once
    pub fn reset(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        let mut seen = HashSet::new();
        for key in std::mem::take(&mut self.invalid) {
            if seen.insert(key.name.clone()) {
                changed.push(key.name);
            }
        }
        for name in &changed {
            self.notify(name);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::InvalidReason;
    use std::sync::atomic::AtomicUsize;

    fn tracker() -> InvalidationTracker {
        InvalidationTracker::new(["age", "email", "name"])
    }

    fn versions(t: &InvalidationTracker) -> Vec<u64> {
        t.field_names()
            .map(|f| t.dependency(f).unwrap().version())
            .collect()
    }

    #[test]
    fn test_one_dependency_per_field() {
        let t = InvalidationTracker::new(["a", "b", "a"]);
        assert_eq!(t.field_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(t.dependency("c").is_none());
    }

    #[test]
    fn test_record_signals_added_and_removed() {
        let mut t = tracker();
        let changed = t.record(vec![InvalidKey::new("name", InvalidReason::Required)]);
        assert_eq!(changed, vec!["name".to_string()]);
        assert_eq!(versions(&t), vec![0, 0, 1]);

        let changed = t.record(vec![InvalidKey::new("age", InvalidReason::MinNumber(0.0))]);
        assert_eq!(changed, vec!["name".to_string(), "age".to_string()]);
        assert_eq!(versions(&t), vec![1, 0, 2]);
        assert_eq!(t.invalid_keys().len(), 1);
    }

    #[test]
    fn test_unchanged_invalid_field_not_signalled() {
        let mut t = tracker();
        t.record(vec![InvalidKey::new("name", InvalidReason::Required)]);
        let changed = t.record(vec![InvalidKey::new("name", InvalidReason::Required)]);
        assert!(changed.is_empty());
        assert_eq!(t.dependency("name").unwrap().version(), 1);
    }

    #[test]
    fn test_reason_change_signalled_once() {
        let mut t = tracker();
        t.record(vec![InvalidKey::new("name", InvalidReason::Required)]);
        let changed = t.record(vec![InvalidKey::new("name", InvalidReason::MinLength(2.0))]);
        assert_eq!(changed, vec!["name".to_string()]);
        assert_eq!(t.dependency("name").unwrap().version(), 2);
    }

    #[test]
    fn test_duplicate_keys_signal_once() {
        let mut t = tracker();
        t.record(vec![
            InvalidKey::new("name", InvalidReason::Required),
            InvalidKey::new("name", InvalidReason::Required),
        ]);
        assert_eq!(t.dependency("name").unwrap().version(), 1);
    }

    #[test]
    fn test_reset() {
        let mut t = tracker();
        assert!(t.reset().is_empty());
        assert_eq!(versions(&t), vec![0, 0, 0]);

        t.record(vec![
            InvalidKey::new("email", InvalidReason::RegexMismatch),
            InvalidKey::new("name", InvalidReason::Required),
        ]);
        let changed = t.reset();
        assert_eq!(changed, vec!["email".to_string(), "name".to_string()]);
        assert_eq!(versions(&t), vec![0, 2, 2]);
        assert!(t.invalid_keys().is_empty());
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let t = tracker();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_listener = Arc::clone(&hits);
        let sub = t
            .subscribe("email", move |field| {
                assert_eq!(field, "email");
                hits_in_listener.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(sub.field().as_deref(), Some("email"));

        assert!(t.notify("email"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        assert!(t.notify("email"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(t.dependency("email").unwrap().listener_count(), 0);
    }

    #[test]
    fn test_subscribe_unknown_field_fails() {
        let t = tracker();
        assert!(matches!(
            t.subscribe("nope", |_| {}),
            Err(DocGuardError::Argument(_))
        ));
        assert!(!t.notify("nope"));
    }

    #[test]
    fn test_undeclared_invalid_key_is_recorded_not_signalled() {
        let mut t = tracker();
        let changed = t.record(vec![InvalidKey::new("extra", InvalidReason::KeyNotInSchema)]);
        assert_eq!(changed, vec!["extra".to_string()]);
        assert_eq!(versions(&t), vec![0, 0, 0]);
        assert_eq!(t.invalid_keys()[0].name, "extra");
    }
}
