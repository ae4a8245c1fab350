//! Observable Containers
//!
//! An [`Observable`] is the intercepting facade over one raw container.
//! Every read goes through an accessor that records a dependency for the
//! running reaction, and every write goes through one that notifies the
//! reactions that read the written key.
//!
//! # How Reads Work
//!
//! - `get`/`has` record `(target, key)`.
//! - `keys`/`len`/`values`/`entries` record the container's iteration entry
//!   (the length entry for lists), and `values`/`entries` also record every
//!   key they return.
//! - A nested container is wrapped on first read. Reading it again returns
//!   the same facade, so wrappers are referentially stable.
//!
//! # How Writes Work
//!
//! Writes store the raw container behind any wrapper they are handed, then
//! publish an [`Operation`]. A write that stores a same-value replacement
//! publishes nothing. List edits are diffed per index and published in one
//! batch.

use std::fmt;
use std::sync::Arc;

use super::observe::{Operation, OperationKind};
use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::registry::Facade;
use crate::graph::DepKey;
use crate::value::{
    write_index, Container, ContainerKind, Key, Raw, SameValue, TargetId, Value,
};

/// Reactive facade over a raw container.
///
/// Cloning is cheap and yields the same facade.
#[derive(Clone)]
pub struct Observable {
    facade: Arc<Facade>,
    runtime: Runtime,
}

impl Observable {
    pub(crate) fn from_facade(facade: Arc<Facade>, runtime: Runtime) -> Self {
        Self { facade, runtime }
    }

    /// Identity shared with the raw container.
    pub fn id(&self) -> TargetId {
        self.facade.raw.id()
    }

    /// The container behind the facade. Writes through it notify nobody.
    pub fn raw(&self) -> &Raw {
        &self.facade.raw
    }

    /// The runtime this facade reports to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn kind(&self) -> ContainerKind {
        self.facade.raw.kind()
    }

    /// Whether nested reads come back unwrapped.
    pub fn is_shallow(&self) -> bool {
        self.facade.shallow
    }

    /// Whether both handles are the same facade.
    pub fn ptr_eq(&self, other: &Observable) -> bool {
        Arc::ptr_eq(&self.facade, &other.facade)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Read `key`, wrapping a nested container on the way out.
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        self.runtime.bind(self.id(), DepKey::Prop(key.clone()));
        let value = self.raw().get(key.clone())?;
        Some(self.wrap_child(&key, value))
    }

    /// Whether `key` exists. Tracks the key even when it is absent.
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        self.runtime.bind(self.id(), DepKey::Prop(key.clone()));
        self.raw().lock().contains_key(&key)
    }

    /// Keys in iteration order.
    pub fn keys(&self) -> Vec<Key> {
        self.bind_iteration();
        self.raw().lock().keys()
    }

    pub fn len(&self) -> usize {
        self.bind_iteration();
        self.raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values in iteration order. Sets yield their members as values.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// Key/value pairs in iteration order.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.bind_iteration();
        let snapshot = self.raw().snapshot();
        let entries: Vec<(Key, Value)> = match snapshot {
            Container::Record(entries) => entries.into_iter().collect(),
            Container::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (Key::Index(index), item))
                .collect(),
            Container::Set(members) => members
                .into_iter()
                .map(|member| {
                    let value = key_to_value(&member);
                    (member, value)
                })
                .collect(),
        };
        entries
            .into_iter()
            .map(|(key, value)| {
                self.runtime.bind(self.id(), DepKey::Prop(key.clone()));
                let value = self.wrap_child(&key, value);
                (key, value)
            })
            .collect()
    }

    /// Plain snapshot of the container and everything nested in it.
    /// Records no dependencies.
    pub fn to_json(&self) -> serde_json::Value {
        self.raw().to_json()
    }

    fn bind_iteration(&self) {
        let key = match self.kind() {
            ContainerKind::List => DepKey::Length,
            ContainerKind::Record | ContainerKind::Set => DepKey::Iteration,
        };
        self.runtime.bind(self.id(), key);
    }

    fn wrap_child(&self, key: &Key, value: Value) -> Value {
        self.runtime
            .wrap_nested(self.id(), key, value, self.is_shallow())
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Store `value` under `key`.
    ///
    /// On a list, writing past the end pads with `Null`; an index more than
    /// [`MAX_LIST_PADDING`](crate::value::MAX_LIST_PADDING) past the end fails with
    /// [`ReactiveError::InvalidKey`]. Sets have no values to set; use
    /// [`Observable::add`].
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into().into_stored();
        match self.kind() {
            ContainerKind::Set => Err(ReactiveError::Unsupported {
                operation: "set",
                kind: ContainerKind::Set,
            }),
            ContainerKind::List => {
                let index = key.as_index().ok_or_else(|| ReactiveError::InvalidKey {
                    key: key.clone(),
                    kind: ContainerKind::List,
                })?;
                self.rewrite_list("set", move |items| {
                    write_index(items, index, value).map(drop)
                })?
            }
            ContainerKind::Record => {
                let previous = {
                    let mut data = self.raw().lock();
                    let Container::Record(entries) = &mut *data else {
                        return Ok(());
                    };
                    if entries.get(&key).is_some_and(|old| old.same_value(&value)) {
                        return Ok(());
                    }
                    entries.insert(key.clone(), value.clone())
                };
                self.publish_write(key, previous, value, false);
                Ok(())
            }
        }
    }

    /// Remove `key`. Returns whether it was present.
    ///
    /// On a list the following items shift down, as with
    /// [`Observable::remove`].
    pub fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        match self.kind() {
            ContainerKind::List => {
                let index = key.as_index().ok_or_else(|| ReactiveError::InvalidKey {
                    key: key.clone(),
                    kind: ContainerKind::List,
                })?;
                Ok(self.remove(index)?.is_some())
            }
            ContainerKind::Record => {
                let removed = match &mut *self.raw().lock() {
                    Container::Record(entries) => entries.shift_remove(&key),
                    _ => None,
                };
                let Some(old_value) = removed else {
                    return Ok(false);
                };
                self.runtime.notify(Operation::write(
                    OperationKind::Delete,
                    self.id(),
                    key.clone(),
                    old_value.clone(),
                    Value::Null,
                    false,
                ));
                self.runtime.disown(self.id(), &key, &old_value);
                Ok(true)
            }
            ContainerKind::Set => {
                let removed = match &mut *self.raw().lock() {
                    Container::Set(members) => members.shift_remove(&key),
                    _ => false,
                };
                if removed {
                    let old_value = key_to_value(&key);
                    self.runtime.notify(Operation::write(
                        OperationKind::Delete,
                        self.id(),
                        key,
                        old_value,
                        Value::Null,
                        false,
                    ));
                }
                Ok(removed)
            }
        }
    }

    /// Insert a member into a set. Returns whether it was new.
    pub fn add(&self, member: impl Into<Key>) -> Result<bool> {
        let member = member.into();
        let added = match &mut *self.raw().lock() {
            Container::Set(members) => members.insert(member.clone()),
            other => {
                return Err(ReactiveError::Unsupported {
                    operation: "add",
                    kind: other.kind(),
                })
            }
        };
        if added {
            let value = key_to_value(&member);
            self.runtime.notify(Operation::write(
                OperationKind::Add,
                self.id(),
                member,
                Value::Null,
                value,
                false,
            ));
        }
        Ok(added)
    }

    /// Append to a list. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into().into_stored();
        self.rewrite_list("push", move |items| {
            items.push(value);
            items.len()
        })
    }

    /// Remove and return the last item of a list.
    pub fn pop(&self) -> Result<Option<Value>> {
        self.rewrite_list("pop", |items| items.pop())
    }

    /// Insert into a list at `index`, shifting later items up.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into().into_stored();
        let len = self.raw().len();
        if index > len {
            return Err(ReactiveError::InvalidKey {
                key: Key::Index(index),
                kind: self.kind(),
            });
        }
        self.rewrite_list("insert", move |items| items.insert(index, value))
    }

    /// Remove from a list at `index`, shifting later items down.
    pub fn remove(&self, index: usize) -> Result<Option<Value>> {
        self.rewrite_list("remove", move |items| {
            (index < items.len()).then(|| items.remove(index))
        })
    }

    /// Remove every key. Publishes one operation naming all of them.
    pub fn clear(&self) {
        let (removed, sequence) = {
            let mut data = self.raw().lock();
            let sequence = data.kind() == ContainerKind::List;
            let removed: Vec<(Key, Value)> = match &mut *data {
                Container::Record(entries) => entries.drain(..).collect(),
                Container::List(items) => items
                    .drain(..)
                    .enumerate()
                    .map(|(index, value)| (Key::Index(index), value))
                    .collect(),
                Container::Set(members) => members
                    .drain(..)
                    .map(|member| (member, Value::Null))
                    .collect(),
            };
            (removed, sequence)
        };
        if removed.is_empty() {
            return;
        }
        let cleared = removed.iter().map(|(key, _)| key.clone()).collect();
        self.runtime
            .notify(Operation::clear(self.id(), cleared, sequence));
        for (key, value) in &removed {
            self.runtime.disown(self.id(), key, value);
        }
    }

    fn publish_write(&self, key: Key, previous: Option<Value>, value: Value, sequence: bool) {
        self.runtime
            .adopt(self.id(), &key, &value, self.is_shallow());
        let (kind, old_value) = match previous {
            Some(old) => (OperationKind::Set, old),
            None => (OperationKind::Add, Value::Null),
        };
        self.runtime.notify(Operation::write(
            kind,
            self.id(),
            key.clone(),
            old_value.clone(),
            value,
            sequence,
        ));
        self.runtime.disown(self.id(), &key, &old_value);
    }

    /// Apply `edit` to a list, then publish one operation per index whose
    /// value appeared, vanished or changed.
    fn rewrite_list<T>(
        &self,
        operation: &'static str,
        edit: impl FnOnce(&mut Vec<Value>) -> T,
    ) -> Result<T> {
        let (before, after, output) = {
            let mut data = self.raw().lock();
            let kind = data.kind();
            let Container::List(items) = &mut *data else {
                return Err(ReactiveError::Unsupported { operation, kind });
            };
            let before = items.clone();
            let output = edit(items);
            (before, items.clone(), output)
        };

        self.runtime.batch(|| {
            for index in 0..before.len().max(after.len()) {
                let key = Key::Index(index);
                match (before.get(index), after.get(index)) {
                    (None, Some(value)) => {
                        self.publish_write(key, None, value.clone(), true);
                    }
                    (Some(old), Some(value)) if !old.same_value(value) => {
                        self.publish_write(key, Some(old.clone()), value.clone(), true);
                    }
                    (Some(old), None) => {
                        self.runtime.notify(Operation::write(
                            OperationKind::Delete,
                            self.id(),
                            key.clone(),
                            old.clone(),
                            Value::Null,
                            true,
                        ));
                        self.runtime.disown(self.id(), &key, old);
                    }
                    _ => {}
                }
            }
        });
        Ok(output)
    }
}

/// A set member seen as a value.
fn key_to_value(key: &Key) -> Value {
    match key {
        Key::Index(index) => Value::from(*index),
        Key::Name(name) => Value::Text(name.clone()),
    }
}

impl PartialEq for Observable {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("shallow", &self.is_shallow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn count_runs(runtime: &Runtime, body: impl Fn() + Send + Sync + 'static) -> Arc<AtomicI32> {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let _ = runtime.autorun(move || {
            body();
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn nested_wrappers_are_stable() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("inner", Raw::record([("x", 1)]))]));

        let first = state.get("inner").unwrap();
        let second = state.get("inner").unwrap();

        let (first, second) = (first.as_observable().unwrap(), second.as_observable().unwrap());
        assert!(first.ptr_eq(second));
    }

    #[test]
    fn wrapping_is_idempotent() {
        let runtime = Runtime::new();
        let raw = Raw::record([("a", 1)]);
        assert!(runtime.observable(raw.clone()).ptr_eq(&runtime.observable(raw)));
    }

    #[test]
    fn same_value_write_is_silent() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("n", f64::NAN)]));
        let reader = state.clone();
        let count = count_runs(&runtime, move || {
            reader.get("n");
        });

        state.set("n", f64::NAN).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        state.set("n", 1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn adding_a_key_notifies_iteration() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));
        let reader = state.clone();
        let count = count_runs(&runtime, move || {
            reader.keys();
        });

        state.set("a", 5).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        state.set("b", 2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        state.delete("a").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clear_notifies_every_previous_key() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1), ("b", 2)]));
        let reader = state.clone();
        let count = count_runs(&runtime, move || {
            reader.get("b");
        });

        state.clear();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(state.raw().is_empty());

        state.clear();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn push_notifies_length_readers_once() {
        let runtime = Runtime::new();
        let list = runtime.observable(Raw::list([1, 2]));
        let reader = list.clone();
        let count = count_runs(&runtime, move || {
            reader.len();
        });

        assert_eq!(list.push(3).unwrap(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        list.set(0usize, 10).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn list_edits_notify_shifted_indices() {
        let runtime = Runtime::new();
        let list = runtime.observable(Raw::list(["a", "b", "c"]));
        let reader = list.clone();
        let count = count_runs(&runtime, move || {
            reader.get(1usize);
        });

        list.remove(0).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(list.raw().get(1usize), Some(Value::from("c")));

        list.insert(0, "z").unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(list.pop().unwrap(), Some(Value::from("c")));
    }

    #[test]
    fn set_past_the_end_pads_with_null() {
        let runtime = Runtime::new();
        let list = runtime.observable(Raw::list([1]));
        list.set(3usize, 4).unwrap();

        assert_eq!(list.raw().len(), 4);
        assert_eq!(list.get(2usize), Some(Value::Null));
    }

    #[test]
    fn unreachable_indices_are_rejected() {
        let runtime = Runtime::new();
        let list = runtime.observable(Raw::list([1]));
        let reader = list.clone();
        let count = count_runs(&runtime, move || {
            reader.len();
        });

        assert!(matches!(
            list.set(usize::MAX, 2),
            Err(ReactiveError::InvalidKey { key: Key::Index(usize::MAX), .. })
        ));
        let too_far = 2 + crate::value::MAX_LIST_PADDING;
        assert!(matches!(list.set(too_far, 2), Err(ReactiveError::InvalidKey { .. })));

        assert_eq!(list.raw().len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_children_leave_the_tree() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("child", Raw::record([("x", 1)]))]));
        let list = runtime.observable(Raw::list([Raw::record([("y", 2)])]));

        let child = state.get("child").unwrap();
        let item = list.get(0usize).unwrap();
        assert!(runtime.contains(&state, &child));
        assert!(runtime.contains(&list, &item));

        assert!(state.delete("child").unwrap());
        list.clear();

        assert!(!runtime.contains(&state, &child));
        assert!(!runtime.contains(&list, &item));
    }

    #[test]
    fn kind_mismatches_are_errors() {
        let runtime = Runtime::new();
        let record = runtime.observable(Raw::record([("a", 1)]));
        let set = runtime.observable(Raw::set_of(["x"]));
        let list = runtime.observable(Raw::list([1]));

        assert!(matches!(record.push(1), Err(ReactiveError::Unsupported { operation: "push", .. })));
        assert!(matches!(set.set("x", 1), Err(ReactiveError::Unsupported { operation: "set", .. })));
        assert!(matches!(record.add("x"), Err(ReactiveError::Unsupported { operation: "add", .. })));
        assert!(matches!(list.set("name", 1), Err(ReactiveError::InvalidKey { .. })));
        assert!(matches!(list.insert(5, 1), Err(ReactiveError::InvalidKey { .. })));
    }

    #[test]
    fn set_membership_is_tracked() {
        let runtime = Runtime::new();
        let set = runtime.observable(Raw::set_of(["x"]));
        let reader = set.clone();
        let count = count_runs(&runtime, move || {
            reader.has("y");
        });

        assert!(set.add("y").unwrap());
        assert!(!set.add("y").unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(set.delete("y").unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(set.values(), vec![Value::from("x")]);
    }

    #[test]
    fn writes_store_raw_containers() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));
        let child = runtime.observable(Raw::record([("b", 2)]));

        state.set("child", child.clone()).unwrap();

        assert!(matches!(state.raw().get("child"), Some(Value::Raw(_))));
        assert!(state.get("child").unwrap().as_observable().unwrap().ptr_eq(&child));
        assert!(runtime.contains(&state, &child));
    }

    #[test]
    fn ref_fields_are_never_wrapped() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("payload", Raw::record([("x", 1)]))]));
        runtime.define(&state, [("payload", crate::graph::Annotation::Ref)]);

        let payload = state.get("payload").unwrap();
        assert!(!payload.is_observable());
        assert!(!runtime.contains(&state, &payload));
    }
}
