//! Boxed Values
//!
//! A box is an explicit get/set cell. Only replacing the whole value is
//! tracked; the held value is never wrapped, so mutating a container stored
//! in a box is invisible to the graph.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::observe::{Operation, OperationKind};
use super::runtime::Runtime;
use crate::graph::DepKey;
use crate::value::{Key, SameValue, TargetId, Value};

/// Observable capsule around one value.
pub struct BoxCell<T> {
    inner: Arc<BoxInner<T>>,
}

struct BoxInner<T> {
    target: TargetId,
    runtime: Runtime,
    value: Mutex<T>,
}

impl<T> Clone for BoxCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> BoxCell<T> {
    /// Identity the box's `value` entry lives under.
    pub fn id(&self) -> TargetId {
        self.inner.target
    }
}

impl<T> BoxCell<T>
where
    T: SameValue + Clone + Send + Sync + 'static,
{
    /// Read the value and track the read.
    pub fn get(&self) -> T {
        self.inner
            .runtime
            .bind(self.inner.target, DepKey::Prop(Key::value()));
        self.inner.value.lock().clone()
    }

    /// Replace the value. Notifies only if it is not the same value.
    pub fn set(&self, value: T) {
        let changed = {
            let mut current = self.inner.value.lock();
            if current.same_value(&value) {
                false
            } else {
                *current = value;
                true
            }
        };
        if changed {
            self.inner.runtime.notify(Operation::write(
                OperationKind::Set,
                self.inner.target,
                Key::value(),
                Value::Null,
                Value::Null,
                false,
            ));
        }
    }

    /// Apply `f` to the current value and store the result.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let current = self.inner.value.lock().clone();
        self.set(f(&current));
    }
}

impl<T: fmt::Debug> fmt::Debug for BoxCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxCell")
            .field("id", &self.inner.target)
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

impl Runtime {
    /// An observable box holding `value`.
    pub fn boxed<T>(&self, value: T) -> BoxCell<T>
    where
        T: SameValue + Clone + Send + Sync + 'static,
    {
        let target = TargetId::new();
        BoxCell {
            inner: Arc::new(BoxInner {
                target,
                runtime: self.clone(),
                value: Mutex::new(value),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Raw;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn only_replacement_is_tracked() {
        let runtime = Runtime::new();
        let payload = Raw::record([("x", 1)]);
        let cell = runtime.boxed(Value::from(payload.clone()));
        let runs = Arc::new(AtomicI32::new(0));

        let (reader, runs_clone) = (cell.clone(), runs.clone());
        let _ = runtime.autorun(move || {
            reader.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        payload.insert("x", 2).unwrap();
        cell.set(Value::from(payload.clone()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!cell.get().is_observable());

        cell.set(Value::from(3));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nan_writes_are_ignored() {
        let runtime = Runtime::new();
        let cell = runtime.boxed(f64::NAN);
        let runs = Arc::new(AtomicI32::new(0));

        let (reader, runs_clone) = (cell.clone(), runs.clone());
        let _ = runtime.autorun(move || {
            reader.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(f64::NAN);
        cell.update(|value| *value);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        cell.update(|_| 1.0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
