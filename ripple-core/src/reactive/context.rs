//! Execution Context
//!
//! The execution context tracks which reaction is currently running and how
//! deeply the caller is nested inside batches, scope batches and untracked
//! regions. Reads attribute dependencies to the top of the tracking stack
//! only, so nested tracked computations are attributed correctly.
//!
//! # Implementation
//!
//! Each [`Runtime`] owns one `ExecState` behind a mutex. Entering a scope
//! returns a guard, and the guard restores the state when dropped. This keeps
//! the stack and the counters balanced even if the tracked code panics.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::reaction::Reaction;
use super::runtime::Runtime;
use super::subscriber::ReactionId;
use crate::error::{ReactiveError, Result};

pub(crate) type Endpoint = Box<dyn FnOnce() + Send>;

/// Per-runtime execution state.
#[derive(Default)]
pub(crate) struct ExecState {
    /// Reactions currently tracking, innermost last.
    pub(crate) stack: SmallVec<[Reaction; 8]>,
    pub(crate) untrack_depth: usize,
    pub(crate) batch_depth: usize,
    pub(crate) scope_depth: usize,
    /// Set while the ambient pending pool is being drained.
    pub(crate) flushing: bool,
    /// Whether any tracked read happened since it was last reset.
    pub(crate) collected: bool,
    pub(crate) pending: IndexMap<ReactionId, Reaction>,
    pub(crate) pending_scope: IndexMap<ReactionId, Reaction>,
    pub(crate) endpoints: VecDeque<Endpoint>,
}

/// Guard that pops the tracking stack when dropped.
pub(crate) struct TrackingFrame<'a> {
    runtime: &'a Runtime,
    id: ReactionId,
}

impl<'a> TrackingFrame<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, reaction: &Reaction) -> Self {
        runtime.exec().stack.push(reaction.clone());
        Self {
            runtime,
            id: reaction.id(),
        }
    }
}

impl Drop for TrackingFrame<'_> {
    fn drop(&mut self) {
        let popped = self.runtime.exec().stack.pop();

        // Verify we're popping the right frame.
        if let Some(reaction) = popped {
            debug_assert_eq!(
                reaction.id(),
                self.id,
                "TrackingFrame mismatch: expected {:?}, got {:?}",
                self.id,
                reaction.id()
            );
        }
    }
}

/// Guard for an ambient batch. Closing the outermost batch flushes.
pub(crate) struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> BatchGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        runtime.batch_start();
        Self { runtime }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.runtime.batch_unwind();
        } else {
            self.runtime.batch_end();
        }
    }
}

/// Guard for a scope batch. Closing the outermost scope flushes its pool.
pub(crate) struct ScopeGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> ScopeGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        runtime.exec().scope_depth += 1;
        Self { runtime }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut exec = self.runtime.exec();
            exec.scope_depth = exec.scope_depth.saturating_sub(1);
        } else {
            self.runtime.scope_end();
        }
    }
}

/// Guard for an untracked region.
pub(crate) struct UntrackGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> UntrackGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        runtime.exec().untrack_depth += 1;
        Self { runtime }
    }
}

impl Drop for UntrackGuard<'_> {
    fn drop(&mut self) {
        let mut exec = self.runtime.exec();
        exec.untrack_depth = exec.untrack_depth.saturating_sub(1);
    }
}

/// Lifts any untracked region for the guard's lifetime, then restores it.
///
/// Reactions triggered from inside an untracked region must still track
/// their own reads.
pub(crate) struct UntrackSuspend<'a> {
    runtime: &'a Runtime,
    previous: usize,
}

impl<'a> UntrackSuspend<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        let previous = std::mem::take(&mut runtime.exec().untrack_depth);
        Self { runtime, previous }
    }
}

impl Drop for UntrackSuspend<'_> {
    fn drop(&mut self) {
        self.runtime.exec().untrack_depth = self.previous;
    }
}

/// Clears the flushing flag when dropped.
pub(crate) struct FlushGuard<'a> {
    runtime: &'a Runtime,
}

impl<'a> FlushGuard<'a> {
    pub(crate) fn enter(runtime: &'a Runtime) -> Self {
        runtime.exec().flushing = true;
        Self { runtime }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.runtime.exec().flushing = false;
    }
}

/// A value provided by one tracking context and consumed by the contexts
/// nested inside it.
///
/// Both sides need a running reaction: there is nothing to attach a value to
/// otherwise.
pub struct ContextSlot<T> {
    runtime: Runtime,
    values: Mutex<HashMap<ReactionId, T>>,
    default: Option<T>,
}

impl<T: Clone + Send> ContextSlot<T> {
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            values: Mutex::new(HashMap::new()),
            default: None,
        }
    }

    /// A slot that yields `default` when no enclosing context provided one.
    pub fn with_default(runtime: &Runtime, default: T) -> Self {
        Self {
            default: Some(default),
            ..Self::new(runtime)
        }
    }

    /// Provide `value` to the current reaction and everything nested in it.
    pub fn provide(&self, value: T) -> Result<()> {
        let current = self
            .runtime
            .current_reaction()
            .ok_or(ReactiveError::NoTrackingContext {
                operation: "provide",
            })?;
        self.values.lock().insert(current.id(), value);
        Ok(())
    }

    /// The value provided by the nearest enclosing context.
    pub fn consume(&self) -> Result<Option<T>> {
        let stack = self.runtime.stack_ids();
        if stack.is_empty() {
            return Err(ReactiveError::NoTrackingContext {
                operation: "consume",
            });
        }
        let values = self.values.lock();
        let provided = stack.iter().rev().find_map(|id| values.get(id).cloned());
        Ok(provided.or_else(|| self.default.clone()))
    }

    /// Forget the value provided by `reaction`.
    pub fn release(&self, reaction: &Reaction) {
        self.values.lock().remove(&reaction.id());
    }
}
