//! Computed Values
//!
//! A computed value caches the result of a getter and recomputes it lazily.
//!
//! # How Computed Values Work
//!
//! 1. A new computed value starts dirty. Nothing runs until the first read.
//!
//! 2. Reading a dirty value runs the getter inside the computed's own
//!    reaction, so the getter's reads subscribe that reaction. The result is
//!    cached and the value becomes clean.
//!
//! 3. When an upstream entry changes, the reaction's scheduler marks the
//!    value dirty and notifies the computed's own `value` entry. This
//!    notification is not equality-gated: the new value is unknown until
//!    somebody reads it.
//!
//! 4. Outer reactions that read the computed value subscribe to that
//!    `value` entry and re-run, which reads (and recomputes) the value.
//!
//! Inside an untracked region a read runs the getter directly and touches no
//! subscriptions.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::observe::{Operation, OperationKind};
use super::reaction::{Reaction, ReactionKind, Scheduler};
use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::DepKey;
use crate::value::{Key, TargetId, Value};

type Getter<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Setter<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A lazily recomputed, cached derived value.
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    target: TargetId,
    runtime: Runtime,
    reaction: Reaction,
    getter: Getter<T>,
    setter: Option<Setter<T>>,
    value: Mutex<Option<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Computed<T> {
    /// Identity of the computed value's own dependency entry.
    pub fn id(&self) -> TargetId {
        self.inner.target
    }
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Body of the computed reaction: recompute under tracking.
    fn evaluate(&self, runtime: &Runtime, reaction: &Reaction) {
        let computed = runtime.run_tracked(reaction, || (self.getter)());
        if let Some(value) = computed {
            *self.value.lock() = Some(value);
            if !reaction.is_disposed() {
                reaction.set_dirty(false);
            }
        }
    }
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn build(runtime: &Runtime, getter: Getter<T>, setter: Option<Setter<T>>) -> Self {
        let target = TargetId::new();
        let inner = Arc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let weak = weak.clone();
            let body = Box::new(move |runtime: &Runtime, reaction: &Reaction| {
                if let Some(inner) = weak.upgrade() {
                    inner.evaluate(runtime, reaction);
                }
            });
            let scheduler: Scheduler = Arc::new(move |reaction: &Reaction| {
                reaction.set_dirty(true);
                if let Some(runtime) = reaction.runtime() {
                    runtime.notify(Operation::write(
                        OperationKind::Set,
                        target,
                        Key::value(),
                        Value::Null,
                        Value::Null,
                        false,
                    ));
                }
            });
            let reaction = Reaction::new(
                runtime,
                ReactionKind::Computed,
                Cow::Borrowed("ComputedReaction"),
                body,
                Some(scheduler),
                Some(target),
            );
            ComputedInner {
                target,
                runtime: runtime.clone(),
                reaction,
                getter,
                setter,
                value: Mutex::new(None),
            }
        });
        Self { inner }
    }

    /// The reaction that tracks the getter's reads.
    pub fn reaction(&self) -> &Reaction {
        &self.inner.reaction
    }

    /// Whether the next read recomputes.
    pub fn is_dirty(&self) -> bool {
        self.inner.reaction.is_dirty()
    }

    /// Whether writes are forwarded to a setter.
    pub fn has_setter(&self) -> bool {
        self.inner.setter.is_some()
    }

    /// Read the value, recomputing it first if it is dirty.
    ///
    /// Fails with [`ReactiveError::CyclicComputed`] if the getter reads the
    /// value it is computing before any result exists.
    pub fn try_get(&self) -> Result<T> {
        let inner = &self.inner;
        let runtime = &inner.runtime;

        runtime.bind_computed(&inner.reaction);
        if runtime.is_untracking() {
            let value = (inner.getter)();
            *inner.value.lock() = Some(value);
        } else if inner.reaction.is_dirty() {
            inner.reaction.run();
        }
        runtime.bind(inner.target, DepKey::Prop(Key::value()));

        inner
            .value
            .lock()
            .clone()
            .ok_or_else(|| ReactiveError::CyclicComputed {
                name: inner.reaction.name().to_string(),
            })
    }

    /// The last computed result, without recomputing or tracking.
    ///
    /// A getter that needs its own previous value reads it through here.
    pub fn cached(&self) -> Option<T> {
        self.inner.value.lock().clone()
    }

    /// Read the value.
    ///
    /// # Panics
    ///
    /// Panics if the getter reads its own value through `get` before any
    /// result exists. Use [`Computed::cached`] for the previous result, or
    /// [`Computed::try_get`] to handle the cycle.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Forward `value` to the setter inside a batch.
    ///
    /// A getter-only computed value rejects writes with
    /// [`ReactiveError::ReadOnlyComputed`].
    pub fn set(&self, value: T) -> Result<()> {
        let setter = self
            .inner
            .setter
            .clone()
            .ok_or_else(|| ReactiveError::ReadOnlyComputed {
                name: self.inner.reaction.name().to_string(),
            })?;
        self.inner.runtime.batch(|| setter(value));
        Ok(())
    }

    /// Stop tracking upstream changes. Later reads recompute every time.
    pub fn dispose(&self) {
        self.inner.reaction.dispose();
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.target)
            .field("dirty", &self.inner.reaction.is_dirty())
            .finish()
    }
}

impl Runtime {
    /// A getter-only computed value.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::build(self, Arc::new(getter), None)
    }

    /// A computed value whose writes are forwarded to `setter`.
    pub fn computed_with<T, F, S>(&self, getter: F, setter: S) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Computed::build(self, Arc::new(getter), Some(Arc::new(setter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Raw;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn number(value: Option<Value>) -> f64 {
        value.and_then(|v| v.as_number()).unwrap_or_default()
    }

    #[test]
    fn computed_is_lazy_and_cached() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 2)]));
        let runs = Arc::new(AtomicI32::new(0));

        let (reader, runs_clone) = (state.clone(), runs.clone());
        let doubled = runtime.computed(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            number(reader.get("a")) * 2.0
        });

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(doubled.is_dirty());

        assert_eq!(doubled.get(), 4.0);
        assert_eq!(doubled.get(), 4.0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        state.set("a", 5).unwrap();
        assert!(doubled.is_dirty());
        assert_eq!(doubled.get(), 10.0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn untracked_read_leaves_state_alone() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));
        let reader = state.clone();
        let plus_one = runtime.computed(move || number(reader.get("a")) + 1.0);

        let value = runtime.untracked(|| plus_one.get());
        assert_eq!(value, 2.0);
        assert!(plus_one.is_dirty());
        assert_eq!(runtime.dependency_count(plus_one.reaction()), 0);
    }

    #[test]
    fn getter_only_rejects_writes() {
        let runtime = Runtime::new();
        let constant = runtime.computed(|| 1);
        assert!(!constant.has_setter());
        assert!(matches!(
            constant.set(2),
            Err(ReactiveError::ReadOnlyComputed { .. })
        ));
    }

    #[test]
    fn setter_writes_flush_once() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("first", "a"), ("last", "b")]));
        let runs = Arc::new(AtomicI32::new(0));

        let (reader, writer) = (state.clone(), state.clone());
        let full = runtime.computed_with(
            move || {
                let first = reader.get("first").unwrap_or_default();
                let last = reader.get("last").unwrap_or_default();
                format!("{} {}", first.as_text().unwrap_or(""), last.as_text().unwrap_or(""))
            },
            move |value: String| {
                let mut parts = value.splitn(2, ' ');
                writer.set("first", parts.next().unwrap_or("")).unwrap();
                writer.set("last", parts.next().unwrap_or("")).unwrap();
            },
        );

        let (full_clone, runs_clone) = (full.clone(), runs.clone());
        let _ = runtime.autorun(move || {
            full_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        full.set("x y".to_string()).unwrap();
        assert_eq!(full.get(), "x y");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn self_reference_is_reported() {
        let runtime = Runtime::new();
        let slot: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let looping = runtime.computed(move || {
            let me = slot_clone.lock().clone();
            me.map_or(0, |me| me.try_get().map_or(-1, |v| v + 1))
        });
        *slot.lock() = Some(looping.clone());

        // The inner read fails, so the getter falls back to -1.
        assert_eq!(looping.get(), -1);
    }

    #[test]
    fn getter_can_read_its_previous_value() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));
        let slot: Arc<Mutex<Option<Computed<f64>>>> = Arc::new(Mutex::new(None));

        let (reader, slot_clone) = (state.clone(), slot.clone());
        let running_total = runtime.computed(move || {
            let previous = slot_clone.lock().as_ref().and_then(Computed::cached);
            previous.unwrap_or(0.0) + number(reader.get("a"))
        });
        *slot.lock() = Some(running_total.clone());

        assert_eq!(running_total.cached(), None);
        assert_eq!(running_total.get(), 1.0);

        state.set("a", 2).unwrap();
        assert_eq!(running_total.get(), 3.0);
        assert_eq!(running_total.cached(), Some(3.0));
    }

    #[test]
    fn disposed_computed_recomputes_on_every_read() {
        let runtime = Runtime::new();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let counted = runtime.computed(move || runs_clone.fetch_add(1, Ordering::SeqCst));

        counted.dispose();
        counted.get();
        counted.get();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
