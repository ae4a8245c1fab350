//! Dynamic Data Model
//!
//! Reactive state is a tree of plain mutable containers. A container is held
//! behind a [`Raw`] handle; reading it through an
//! [`Observable`](crate::reactive::Observable) records dependencies, reading
//! it directly does not.
//!
//! # Identity
//!
//! Every raw container owns a [`TargetId`]. The dependency graph, the
//! wrapper registry and the containment tree are all keyed by it, so two
//! `Raw` handles are "the same value" exactly when their ids match.
//!
//! # Equality
//!
//! Writes are gated by [`SameValue`], which differs from `PartialEq` in two
//! places: `NaN` equals `NaN`, and `+0.0` does not equal `-0.0`. Primitive
//! values compare by content; containers compare by identity, and a wrapper
//! is the same value as the raw container it wraps.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{ReactiveError, Result};
use crate::reactive::Observable;

/// Largest number of `Null` slots a single list write may pad with.
pub const MAX_LIST_PADDING: usize = 1 << 16;

/// Identity of anything that can own dependency entries: raw containers,
/// computed values and boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

/// A property name or list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Index(usize),
    Name(Arc<str>),
}

impl Key {
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(_) => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Key::Name(name) => Some(name),
            Key::Index(_) => None,
        }
    }

    /// The key under which boxes and computed values publish themselves.
    pub(crate) fn value() -> Self {
        Key::Name(Arc::from("value"))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(Arc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(Arc::from(name))
    }
}

impl From<Arc<str>> for Key {
    fn from(name: Arc<str>) -> Self {
        Key::Name(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// The shape of a raw container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Insertion-ordered key/value map. Also serves as the map collection.
    Record,
    /// Ordered sequence addressed by [`Key::Index`].
    List,
    /// Insertion-ordered set of keys.
    Set,
}

/// The plain data behind a [`Raw`] handle.
#[derive(Debug, Clone)]
pub enum Container {
    Record(IndexMap<Key, Value>),
    List(Vec<Value>),
    Set(IndexSet<Key>),
}

impl Container {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Container::Record(_) => ContainerKind::Record,
            Container::List(_) => ContainerKind::List,
            Container::Set(_) => ContainerKind::Set,
        }
    }

    /// Value stored under `key`. Sets store no values and always yield `None`.
    pub fn get(&self, key: &Key) -> Option<Value> {
        match self {
            Container::Record(entries) => entries.get(key).cloned(),
            Container::List(items) => key.as_index().and_then(|i| items.get(i).cloned()),
            Container::Set(_) => None,
        }
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        match self {
            Container::Record(entries) => entries.contains_key(key),
            Container::List(items) => key.as_index().is_some_and(|i| i < items.len()),
            Container::Set(members) => members.contains(key),
        }
    }

    pub fn keys(&self) -> Vec<Key> {
        match self {
            Container::Record(entries) => entries.keys().cloned().collect(),
            Container::List(items) => (0..items.len()).map(Key::Index).collect(),
            Container::Set(members) => members.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Container::Record(entries) => entries.len(),
            Container::List(items) => items.len(),
            Container::Set(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handle to a plain mutable container.
///
/// Cloning the handle does not clone the data. Mutating through `Raw`
/// bypasses the reactive engine entirely: nothing is notified.
#[derive(Clone)]
pub struct Raw {
    inner: Arc<RawInner>,
}

struct RawInner {
    id: TargetId,
    data: Mutex<Container>,
}

impl Raw {
    pub fn new(container: Container) -> Self {
        Self {
            inner: Arc::new(RawInner {
                id: TargetId::new(),
                data: Mutex::new(container),
            }),
        }
    }

    /// Build a record from key/value pairs.
    pub fn record<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Value>,
    {
        Self::new(Container::Record(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into().into_stored()))
                .collect(),
        ))
    }

    /// Build a list from its items.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(Container::List(
            items
                .into_iter()
                .map(|item| item.into().into_stored())
                .collect(),
        ))
    }

    /// Build a set from its members.
    pub fn set_of<I, K>(members: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Self::new(Container::Set(members.into_iter().map(Into::into).collect()))
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// A handle that does not keep the container alive.
    pub fn downgrade(&self) -> WeakRaw {
        WeakRaw {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn kind(&self) -> ContainerKind {
        self.lock().kind()
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.lock().get(&key.into())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Write without notifying anyone. Returns the value it replaced.
    ///
    /// Lists grow with `Null` padding when `key` is past the end, by at most
    /// [`MAX_LIST_PADDING`] slots. Sets ignore `value` and insert the key.
    pub fn insert(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        let value = value.into().into_stored();
        match &mut *self.lock() {
            Container::Record(entries) => Ok(entries.insert(key, value)),
            Container::List(items) => match key.as_index() {
                Some(index) => write_index(items, index, value),
                None => Err(ReactiveError::InvalidKey {
                    key,
                    kind: ContainerKind::List,
                }),
            },
            Container::Set(members) => {
                members.insert(key);
                Ok(None)
            }
        }
    }

    /// A shallow copy of the current contents.
    pub fn snapshot(&self) -> Container {
        self.lock().clone()
    }

    /// Deep plain-data copy. Cycles are cut with `null`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_inner(&mut HashSet::new())
    }

    /// Build a raw container from a JSON object or array.
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match Value::from_json(json) {
            Value::Raw(raw) => Some(raw),
            _ => None,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Container> {
        self.inner.data.lock()
    }

    fn to_json_inner(&self, seen: &mut HashSet<TargetId>) -> serde_json::Value {
        if !seen.insert(self.id()) {
            return serde_json::Value::Null;
        }
        let json = match self.snapshot() {
            Container::Record(entries) => serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.to_string(), value.to_json_inner(seen)))
                    .collect(),
            ),
            Container::List(items) => serde_json::Value::Array(
                items.iter().map(|item| item.to_json_inner(seen)).collect(),
            ),
            Container::Set(members) => serde_json::Value::Array(
                members
                    .iter()
                    .map(|key| match key {
                        Key::Index(index) => serde_json::Value::from(*index),
                        Key::Name(name) => serde_json::Value::from(name.as_ref()),
                    })
                    .collect(),
            ),
        };
        seen.remove(&self.id());
        json
    }
}

/// Write `value` at `index`, padding the list with `Null` up to it.
///
/// Fails without touching the list when the padding would exceed
/// [`MAX_LIST_PADDING`].
pub(crate) fn write_index(items: &mut Vec<Value>, index: usize, value: Value) -> Result<Option<Value>> {
    if let Some(slot) = items.get_mut(index) {
        return Ok(Some(std::mem::replace(slot, value)));
    }
    if index - items.len() > MAX_LIST_PADDING {
        return Err(ReactiveError::InvalidKey {
            key: Key::Index(index),
            kind: ContainerKind::List,
        });
    }
    items.resize(index, Value::Null);
    items.push(value);
    Ok(None)
}

/// Non-owning handle to a raw container.
///
/// The registry and the containment tree hold these, so a container lives
/// exactly as long as somebody outside the runtime holds it.
#[derive(Clone)]
pub struct WeakRaw {
    id: TargetId,
    inner: Weak<RawInner>,
}

impl WeakRaw {
    pub fn id(&self) -> TargetId {
        self.id
    }

    /// The container, if it still exists.
    pub fn upgrade(&self) -> Option<Raw> {
        self.inner.upgrade().map(|inner| Raw { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakRaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRaw")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for Raw {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Raw {}

impl std::hash::Hash for Raw {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raw")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}

/// A dynamically typed reactive value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(Arc<str>),
    /// An unwrapped container: reading it records nothing.
    Raw(Raw),
    /// A wrapped container: reading it records dependencies.
    Observable(Observable),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Raw(_) | Value::Observable(_))
    }

    pub fn is_observable(&self) -> bool {
        matches!(self, Value::Observable(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_observable(&self) -> Option<&Observable> {
        match self {
            Value::Observable(observable) => Some(observable),
            _ => None,
        }
    }

    /// The raw container behind this value, unwrapping a wrapper if needed.
    pub fn as_raw(&self) -> Option<Raw> {
        match self {
            Value::Raw(raw) => Some(raw.clone()),
            Value::Observable(observable) => Some(observable.raw().clone()),
            _ => None,
        }
    }

    pub fn target_id(&self) -> Option<TargetId> {
        match self {
            Value::Raw(raw) => Some(raw.id()),
            Value::Observable(observable) => Some(observable.id()),
            _ => None,
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Raw(_) => "raw container",
            Value::Observable(_) => "observable",
        }
    }

    /// Containers are stored raw; wrappers are re-derived on read.
    pub(crate) fn into_stored(self) -> Value {
        match self {
            Value::Observable(observable) => Value::Raw(observable.raw().clone()),
            other => other,
        }
    }

    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => {
                Value::Number(number.as_f64().unwrap_or(f64::NAN))
            }
            serde_json::Value::String(text) => Value::Text(Arc::from(text)),
            serde_json::Value::Array(items) => {
                Value::Raw(Raw::list(items.into_iter().map(Value::from_json)))
            }
            serde_json::Value::Object(entries) => Value::Raw(Raw::record(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from_json(value))),
            )),
        }
    }

    /// Plain-data snapshot; reads nothing through the reactive engine.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_inner(&mut HashSet::new())
    }

    fn to_json_inner(&self, seen: &mut HashSet<TargetId>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Number(value) => number_to_json(*value),
            Value::Text(value) => serde_json::Value::String(value.to_string()),
            Value::Raw(raw) => raw.to_json_inner(seen),
            Value::Observable(observable) => observable.raw().to_json_inner(seen),
        }
    }
}

fn number_to_json(value: f64) -> serde_json::Value {
    // Integral values within the exact-integer range serialize as integers.
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return serde_json::Value::from(value as i64);
    }
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! value_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Number(value as f64)
                }
            }
        )*
    };
}

value_from_number!(i32, i64, u32, u64, usize, f32, f64);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::Text(value)
    }
}

impl From<Raw> for Value {
    fn from(raw: Raw) -> Self {
        Value::Raw(raw)
    }
}

impl From<Observable> for Value {
    fn from(observable: Observable) -> Self {
        Value::Observable(observable)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Same-value equality used to decide whether a write is a change.
pub trait SameValue {
    fn same_value(&self, other: &Self) -> bool;
}

macro_rules! same_value_by_eq {
    ($($ty:ty),*) => {
        $(
            impl SameValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_value_by_eq!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, String,
    &'static str, Key
);

impl SameValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        (self.is_nan() && other.is_nan()) || self.to_bits() == other.to_bits()
    }
}

impl SameValue for f32 {
    fn same_value(&self, other: &Self) -> bool {
        (self.is_nan() && other.is_nan()) || self.to_bits() == other.to_bits()
    }
}

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: SameValue> SameValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

/// Shared allocations compare by identity, like containers.
impl<T: ?Sized> SameValue for Arc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl SameValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.same_value(b),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => match (self.target_id(), other.target_id()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nan_is_the_same_value_as_nan() {
        assert!(f64::NAN.same_value(&f64::NAN));
        assert!(Value::from(f64::NAN).same_value(&Value::from(f64::NAN)));
        assert!(!f64::NAN.same_value(&1.0));
    }

    #[test]
    fn signed_zeroes_are_different_values() {
        assert!(!0.0_f64.same_value(&-0.0));
        assert!(0.0_f64.same_value(&0.0));
    }

    #[test]
    fn text_compares_by_content() {
        assert!(Value::from("a").same_value(&Value::from(String::from("a"))));
        assert!(!Value::from("a").same_value(&Value::from("b")));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Raw::record([("x", 1)]);
        let b = Raw::record([("x", 1)]);

        assert!(Value::from(a.clone()).same_value(&Value::from(a.clone())));
        assert!(!Value::from(a).same_value(&Value::from(b)));
    }

    #[test]
    fn arcs_compare_by_identity() {
        let a = Arc::new(vec![1]);
        let b = Arc::new(vec![1]);
        assert!(a.same_value(&a.clone()));
        assert!(!a.same_value(&b));
    }

    #[test]
    fn mixed_kinds_are_never_the_same() {
        assert!(!Value::from(1).same_value(&Value::from("1")));
        assert!(!Value::Null.same_value(&Value::from(false)));
    }

    #[test]
    fn raw_insert_pads_lists() {
        let list = Raw::list([1]);
        assert_eq!(list.insert(3usize, 4).unwrap(), None);

        assert_eq!(list.len(), 4);
        assert_eq!(list.get(1usize), Some(Value::Null));
        assert_eq!(list.get(3usize), Some(Value::from(4)));
        assert_eq!(list.insert(0usize, 9).unwrap(), Some(Value::from(1)));
    }

    #[test]
    fn raw_insert_rejects_unreachable_indices() {
        let list = Raw::list([1]);

        assert!(matches!(
            list.insert(usize::MAX, 2),
            Err(ReactiveError::InvalidKey { .. })
        ));
        assert!(matches!(
            list.insert(2 + MAX_LIST_PADDING, 2),
            Err(ReactiveError::InvalidKey { .. })
        ));
        assert!(matches!(
            list.insert("name", 2),
            Err(ReactiveError::InvalidKey { .. })
        ));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn weak_handles_do_not_keep_containers_alive() {
        let raw = Raw::record([("a", 1)]);
        let weak = raw.downgrade();
        assert_eq!(weak.id(), raw.id());
        assert_eq!(weak.upgrade(), Some(raw.clone()));

        drop(raw);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn json_round_trip_keeps_structure() {
        let source = json!({ "a": 1, "b": [true, "x", null], "c": { "d": 1.5 } });
        let raw = Raw::from_json(source.clone()).unwrap();
        assert_eq!(raw.to_json(), source);
    }

    #[test]
    fn to_json_cuts_cycles() {
        let raw = Raw::record([("n", 1)]);
        raw.insert("me", raw.clone()).unwrap();
        assert_eq!(raw.to_json(), json!({ "n": 1, "me": null }));
    }

    #[test]
    fn target_ids_are_unique() {
        assert_ne!(TargetId::new(), TargetId::new());
        assert_ne!(Raw::list(Vec::<Value>::new()).id(), Raw::list(Vec::<Value>::new()).id());
    }
}
