//! Change Observation
//!
//! `observe` subscribes to raw write operations, independent of dependency
//! tracking. The callback fires for every write to the watched container and,
//! in deep mode, for every write anywhere below it in the containment tree.

use std::sync::Arc;

use super::boxed::BoxCell;
use super::computed::Computed;
use super::observable::Observable;
use super::reaction::Disposer;
use super::runtime::{Listener, Runtime};
use crate::error::{ReactiveError, Result};
use crate::value::{Key, Raw, TargetId, Value};

/// What a write did to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// A key that did not exist before.
    Add,
    /// A new value under an existing key.
    Set,
    Delete,
    /// Every key removed at once.
    Clear,
}

impl OperationKind {
    /// Whether the operation changes which keys exist.
    pub fn is_structural(self) -> bool {
        !matches!(self, OperationKind::Set)
    }
}

/// One write as the runtime publishes it.
#[derive(Debug, Clone)]
pub(crate) struct Operation {
    pub(crate) kind: OperationKind,
    pub(crate) target: TargetId,
    pub(crate) key: Option<Key>,
    pub(crate) old_value: Value,
    pub(crate) value: Value,
    /// Keys present before a `Clear`.
    pub(crate) cleared: Vec<Key>,
    /// Whether the target is a list and carries a length entry.
    pub(crate) sequence: bool,
}

impl Operation {
    pub(crate) fn write(
        kind: OperationKind,
        target: TargetId,
        key: Key,
        old_value: Value,
        value: Value,
        sequence: bool,
    ) -> Self {
        Self {
            kind,
            target,
            key: Some(key),
            old_value,
            value,
            cleared: Vec::new(),
            sequence,
        }
    }

    pub(crate) fn clear(target: TargetId, cleared: Vec<Key>, sequence: bool) -> Self {
        Self {
            kind: OperationKind::Clear,
            target,
            key: None,
            old_value: Value::Null,
            value: Value::Null,
            cleared,
            sequence,
        }
    }
}

/// A write delivered to an `observe` callback.
#[derive(Debug, Clone)]
pub struct DataChange {
    pub kind: OperationKind,
    /// The written key; `None` for `Clear`.
    pub key: Option<Key>,
    /// Path from the root of the containment tree to the written key.
    pub path: Vec<Key>,
    pub old_value: Value,
    pub value: Value,
}

impl DataChange {
    fn from_operation(runtime: &Runtime, operation: &Operation) -> Self {
        let mut path = runtime.tree().path(operation.target);
        path.extend(operation.key.clone());
        Self {
            kind: operation.kind,
            key: operation.key.clone(),
            path,
            old_value: operation.old_value.clone(),
            value: operation.value.clone(),
        }
    }
}

/// Anything with a reactive identity that can be observed.
pub trait Observed {
    /// The identity writes are published under, `None` for primitives.
    fn target_id(&self) -> Option<TargetId>;

    /// Short description used in errors.
    fn type_name(&self) -> &'static str {
        "container"
    }
}

impl Observed for Observable {
    fn target_id(&self) -> Option<TargetId> {
        Some(self.id())
    }

    fn type_name(&self) -> &'static str {
        "observable"
    }
}

impl Observed for Raw {
    fn target_id(&self) -> Option<TargetId> {
        Some(self.id())
    }

    fn type_name(&self) -> &'static str {
        "raw container"
    }
}

impl Observed for Value {
    fn target_id(&self) -> Option<TargetId> {
        Value::target_id(self)
    }

    fn type_name(&self) -> &'static str {
        Value::type_name(self)
    }
}

impl<T> Observed for BoxCell<T> {
    fn target_id(&self) -> Option<TargetId> {
        Some(self.id())
    }

    fn type_name(&self) -> &'static str {
        "box"
    }
}

impl<T> Observed for Computed<T> {
    fn target_id(&self) -> Option<TargetId> {
        Some(self.id())
    }

    fn type_name(&self) -> &'static str {
        "computed"
    }
}

impl Runtime {
    /// Call `callback` for every write to `target`, and with `deep` for
    /// every write nested below it.
    ///
    /// Replacing `target` itself inside its parent also fires. Observing a
    /// primitive fails with [`ReactiveError::NotObservable`].
    pub fn observe<O, F>(&self, target: &O, callback: F, deep: bool) -> Result<Disposer>
    where
        O: Observed + ?Sized,
        F: Fn(&DataChange) + Send + Sync + 'static,
    {
        let watched = target.target_id().ok_or(ReactiveError::NotObservable {
            found: target.type_name(),
        })?;

        let listener: Listener = Arc::new(move |runtime: &Runtime, operation: &Operation| {
            let fires = {
                let tree = runtime.tree();
                if operation.target == watched || (deep && tree.contains(watched, operation.target)) {
                    true
                } else {
                    tree.node(watched).is_some_and(|node| {
                        node.parent == operation.target && Some(&node.key) == operation.key.as_ref()
                    })
                }
            };
            if fires {
                callback(&DataChange::from_operation(runtime, operation));
            }
        });

        let id = self.add_listener(listener);
        tracing::debug!(runtime = %self.name(), listener = id, deep, "observer attached");
        Ok(Disposer::for_listener(self, id))
    }
}
