//! Reactive Runtime
//!
//! The runtime is the engine-context object that connects wrappers,
//! reactions and computed values. It owns everything that would otherwise be
//! ambient global state: the wrapper registry, the containment tree, the
//! dependency graph, the tracking stack and the batch/untrack counters.
//!
//! # How It Works
//!
//! 1. A reaction runs inside a tracking frame. Every read made through an
//!    [`Observable`], a box or a computed value calls [`Runtime::bind`],
//!    which records `(target, key) → reaction` in the dependency graph.
//!
//! 2. A write that changes a value calls [`Runtime::notify`]. The runtime
//!    opens a batch, looks up the subscribed reactions and:
//!    a. runs computed schedulers immediately (they only mark dirty),
//!    b. queues everything else in the scope pool if a scope batch is open,
//!       otherwise in the ambient pending pool.
//!
//! 3. When the outermost batch closes, the pending pool is drained until it
//!    stays empty. Reactions queued during the drain run in the same drain.
//!
//! # Thread Safety
//!
//! The runtime is `Send + Sync` so it can move between threads, but the
//! graph is only consistent under single-threaded (or externally
//! serialized) use. Locks are never held while user code runs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use super::context::{
    BatchGuard, ExecState, FlushGuard, ScopeGuard, TrackingFrame, UntrackGuard, UntrackSuspend,
};
use super::observable::Observable;
use super::observe::{Observed, Operation, OperationKind};
use super::reaction::Reaction;
use super::subscriber::ReactionId;
use crate::config::RuntimeConfig;
use crate::graph::registry::Registry;
use crate::graph::{Annotation, DataTree, DepKey, DependencyGraph};
use crate::value::{Key, Raw, TargetId, Value};

/// Receives every write operation, independent of tracking.
pub(crate) type Listener = Arc<dyn Fn(&Runtime, &Operation) + Send + Sync>;

/// Handle to one reactive engine. Cloning shares the engine.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    config: RuntimeConfig,
    registry: Mutex<Registry>,
    tree: Mutex<DataTree>,
    graph: Mutex<DependencyGraph<Reaction>>,
    exec: Mutex<ExecState>,
    listeners: Mutex<IndexMap<u64, Listener>>,
    next_listener: AtomicU64,
}

impl Runtime {
    /// A runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// A runtime tuned by `config`.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                registry: Mutex::new(Registry::default()),
                tree: Mutex::new(DataTree::new()),
                graph: Mutex::new(DependencyGraph::new()),
                exec: Mutex::new(ExecState::default()),
                listeners: Mutex::new(IndexMap::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<RuntimeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn exec(&self) -> MutexGuard<'_, ExecState> {
        self.inner.exec.lock()
    }

    pub(crate) fn graph(&self) -> MutexGuard<'_, DependencyGraph<Reaction>> {
        self.inner.graph.lock()
    }

    pub(crate) fn tree(&self) -> MutexGuard<'_, DataTree> {
        self.inner.tree.lock()
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock()
    }

    // ------------------------------------------------------------------------
    // Wrapping
    // ------------------------------------------------------------------------

    /// Deep-wrap a raw container. Nested containers are wrapped lazily, the
    /// first time they are read.
    pub fn observable(&self, raw: Raw) -> Observable {
        self.facade_for(&raw, false)
    }

    /// Wrap only the outermost container; nested reads return raw values.
    pub fn shallow(&self, raw: Raw) -> Observable {
        self.facade_for(&raw, true)
    }

    /// Wrap any value according to `annotation`.
    ///
    /// Primitives, `Ref`-annotated values and containers marked with
    /// [`Runtime::mark_raw`] come back unchanged.
    pub fn wrap(&self, value: impl Into<Value>, annotation: Annotation) -> Value {
        let value = value.into();
        if annotation == Annotation::Ref {
            return value;
        }
        let Some(raw) = value.as_raw() else {
            return value;
        };
        if self.registry().is_marked_raw(raw.id()) {
            return Value::Raw(raw);
        }
        Value::Observable(self.facade_for(&raw, annotation == Annotation::Shallow))
    }

    /// Never wrap `raw`, neither directly through [`Runtime::wrap`] nor when
    /// it is read out of an observable parent.
    pub fn mark_raw(&self, raw: &Raw) {
        self.registry().mark_raw(raw);
    }

    /// Whether a live wrapper of `raw` exists in either mode.
    pub fn is_wrapped(&self, raw: &Raw) -> bool {
        self.registry().is_wrapped(raw.id())
    }

    /// Whether a live shallow wrapper of `raw` exists.
    pub fn is_shallow(&self, raw: &Raw) -> bool {
        self.registry().is_shallow(raw.id())
    }

    /// Annotate individual fields of a record.
    pub fn define<I, K>(&self, target: &Observable, fields: I)
    where
        I: IntoIterator<Item = (K, Annotation)>,
        K: Into<Key>,
    {
        let mut registry = self.registry();
        for (key, annotation) in fields {
            registry.annotate(target.raw(), key.into(), annotation);
        }
    }

    /// Whether `descendant` is `ancestor` or nested anywhere below it.
    pub fn contains<A, D>(&self, ancestor: &A, descendant: &D) -> bool
    where
        A: Observed + ?Sized,
        D: Observed + ?Sized,
    {
        match (ancestor.target_id(), descendant.target_id()) {
            (Some(ancestor), Some(descendant)) => self.tree().contains(ancestor, descendant),
            _ => false,
        }
    }

    /// The raw container behind `value`, or the value itself.
    pub fn raw_of(&self, value: &Value) -> Value {
        value.clone().into_stored()
    }

    pub(crate) fn facade_for(&self, raw: &Raw, shallow: bool) -> Observable {
        let facade = self.registry().facade(raw, shallow);
        Observable::from_facade(facade, self.clone())
    }

    /// Wrap a value read out of `parent` at `key`.
    pub(crate) fn wrap_nested(
        &self,
        parent: TargetId,
        key: &Key,
        value: Value,
        shallow_parent: bool,
    ) -> Value {
        let annotation = self.registry().annotation(parent, key);
        let shallow_child = match annotation {
            Some(Annotation::Ref) => return value,
            Some(Annotation::Shallow) => true,
            Some(Annotation::Deep) => false,
            None if shallow_parent => return value,
            None => false,
        };
        let Value::Raw(raw) = value else {
            return value;
        };
        if self.registry().is_marked_raw(raw.id()) {
            return Value::Raw(raw);
        }
        self.tree().attach(parent, key.clone(), &raw);
        Value::Observable(self.facade_for(&raw, shallow_child))
    }

    /// Record the placement of a container written into `parent` at `key`.
    pub(crate) fn adopt(&self, parent: TargetId, key: &Key, value: &Value, shallow_parent: bool) {
        let annotation = self.registry().annotation(parent, key);
        match annotation {
            Some(Annotation::Ref) => return,
            Some(_) => {}
            None if shallow_parent => return,
            None => {}
        }
        let Some(raw) = value.as_raw() else {
            return;
        };
        if !self.registry().is_marked_raw(raw.id()) {
            self.tree().attach(parent, key.clone(), &raw);
        }
    }

    /// Forget the placement of a container that left `parent` at `key`.
    pub(crate) fn disown(&self, parent: TargetId, key: &Key, value: &Value) {
        if let Some(child) = value.target_id() {
            self.tree().detach(parent, key, child);
        }
    }

    // ------------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------------

    /// Whether a reaction is currently tracking reads.
    pub fn is_tracking(&self) -> bool {
        !self.exec().stack.is_empty()
    }

    /// The innermost running reaction.
    pub fn current_reaction(&self) -> Option<Reaction> {
        self.exec().stack.last().cloned()
    }

    /// Whether reads are currently excluded from tracking.
    pub fn is_untracking(&self) -> bool {
        self.exec().untrack_depth > 0
    }

    /// Whether an ambient batch is open.
    pub fn is_batching(&self) -> bool {
        self.exec().batch_depth > 0
    }

    /// Whether a scope batch (`batch_scope` or `action`) is open.
    pub fn is_scope_batching(&self) -> bool {
        self.exec().scope_depth > 0
    }

    pub(crate) fn stack_ids(&self) -> SmallVec<[ReactionId; 8]> {
        self.exec().stack.iter().map(Reaction::id).collect()
    }

    pub(crate) fn is_on_stack(&self, reaction: &Reaction) -> bool {
        self.exec().stack.iter().any(|entry| entry.id() == reaction.id())
    }

    /// Attribute a read of `(target, key)` to the innermost reaction.
    pub(crate) fn bind(&self, target: TargetId, key: DepKey) {
        let current = {
            let mut exec = self.exec();
            if exec.untrack_depth > 0 {
                return;
            }
            let Some(current) = exec.stack.last().cloned() else {
                return;
            };
            exec.collected = true;
            current
        };
        // A computed value never subscribes to its own entry.
        if current.is_disposed() || current.entry() == Some(target) {
            return;
        }
        tracing::trace!(
            runtime = %self.name(),
            target = target.raw(),
            key = ?key,
            reaction = %current.id(),
            "dependency recorded"
        );
        let id = current.id();
        self.graph().record(target, key, id, current);
    }

    /// Remember that the innermost reaction read `computed`.
    pub(crate) fn bind_computed(&self, computed: &Reaction) {
        let current = self.exec().stack.last().cloned();
        if let Some(current) = current {
            current.add_computed(computed);
        }
    }

    /// Run `body` on top of the tracking stack with fresh dependencies.
    ///
    /// Returns `None` without running if the reaction is already tracking.
    pub(crate) fn run_tracked<T>(&self, reaction: &Reaction, body: impl FnOnce() -> T) -> Option<T> {
        if self.is_on_stack(reaction) {
            return None;
        }
        self.release(reaction);
        let _frame = TrackingFrame::enter(self, reaction);
        Some(body())
    }

    /// Run `f` and report whether it made any tracked read.
    pub fn has_collected(&self, f: impl FnOnce()) -> bool {
        let previous = std::mem::replace(&mut self.exec().collected, false);
        f();
        let mut exec = self.exec();
        let collected = exec.collected;
        exec.collected = previous || collected;
        collected
    }

    /// Number of dependency entries `reaction` currently belongs to.
    pub fn dependency_count(&self, reaction: &Reaction) -> usize {
        self.graph().binding_count(reaction.id())
    }

    /// Number of reactions subscribed to `(target, key)`.
    pub fn subscriber_count(&self, target: TargetId, key: &DepKey) -> usize {
        self.graph().subscriber_count(target, key)
    }

    /// Drop every subscription of `reaction` and unschedule it.
    pub(crate) fn release(&self, reaction: &Reaction) {
        let released = self.graph().release(reaction.id());
        self.unschedule(reaction);
        if released > 0 {
            tracing::trace!(
                runtime = %self.name(),
                reaction = %reaction.id(),
                released,
                "dependencies released"
            );
        }
    }

    /// Take `reaction` out of both pending pools.
    pub(crate) fn unschedule(&self, reaction: &Reaction) {
        let mut exec = self.exec();
        exec.pending.shift_remove(&reaction.id());
        exec.pending_scope.shift_remove(&reaction.id());
    }

    pub(crate) fn dispose_reaction(&self, reaction: &Reaction) {
        if !reaction.mark_disposed() {
            return;
        }
        tracing::debug!(
            runtime = %self.name(),
            reaction = %reaction.id(),
            name = %reaction.name(),
            "reaction disposed"
        );
        self.release(reaction);
        self.suspend_computeds(reaction);
    }

    /// Suspend the computed values `reaction` read that nobody else reads.
    fn suspend_computeds(&self, reaction: &Reaction) {
        for computed in reaction.take_computes() {
            let Some(entry) = computed.entry() else {
                continue;
            };
            let subscribers = self
                .graph()
                .subscriber_count(entry, &DepKey::Prop(Key::value()));
            if subscribers == 0 {
                tracing::debug!(
                    runtime = %self.name(),
                    reaction = %computed.id(),
                    name = %computed.name(),
                    "computed suspended"
                );
                self.release(&computed);
                self.suspend_computeds(&computed);
                computed.set_dirty(true);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------------

    /// Publish a write and schedule every reaction it affects.
    pub(crate) fn notify(&self, operation: Operation) {
        let _batch = BatchGuard::enter(self);
        self.notify_listeners(&operation);

        let target = operation.target;
        if operation.kind == OperationKind::Clear {
            for key in &operation.cleared {
                self.run_reactions(target, &DepKey::Prop(key.clone()));
            }
        } else if let Some(key) = &operation.key {
            self.run_reactions(target, &DepKey::Prop(key.clone()));
        }

        if operation.kind.is_structural() {
            self.run_reactions(target, &DepKey::Iteration);
            if operation.sequence {
                self.run_reactions(target, &DepKey::Length);
            }
        }
    }

    fn run_reactions(&self, target: TargetId, key: &DepKey) {
        let reactions = self.graph().query(target, key);
        if reactions.is_empty() {
            return;
        }
        tracing::trace!(
            runtime = %self.name(),
            target = target.raw(),
            key = ?key,
            count = reactions.len(),
            "notifying reactions"
        );

        let _suspend = UntrackSuspend::enter(self);
        for reaction in reactions {
            if reaction.is_disposed() {
                continue;
            }
            if reaction.is_computed() {
                reaction.trigger();
                continue;
            }
            let run_now = {
                let mut exec = self.exec();
                if exec.scope_depth > 0 {
                    exec.pending_scope
                        .entry(reaction.id())
                        .or_insert_with(|| reaction.clone());
                    false
                } else if exec.batch_depth > 0 {
                    exec.pending
                        .entry(reaction.id())
                        .or_insert_with(|| reaction.clone());
                    false
                } else {
                    true
                }
            };
            if run_now {
                reaction.trigger();
            }
        }
    }

    pub(crate) fn add_listener(&self, listener: Listener) -> u64 {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, listener);
        id
    }

    pub(crate) fn remove_listener(&self, id: u64) -> bool {
        self.inner.listeners.lock().shift_remove(&id).is_some()
    }

    pub(crate) fn has_listener(&self, id: u64) -> bool {
        self.inner.listeners.lock().contains_key(&id)
    }

    fn notify_listeners(&self, operation: &Operation) {
        let listeners: Vec<Listener> = self.inner.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(self, operation);
        }
    }

    // ------------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------------

    /// Defer reactions triggered inside `f` until the outermost batch closes.
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        let _batch = BatchGuard::enter(self);
        f()
    }

    /// Collect reactions triggered inside `f` into the scope pool and flush
    /// them when the outermost scope closes, even if an ambient batch is
    /// still open.
    pub fn batch_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        let _scope = ScopeGuard::enter(self);
        f()
    }

    /// A scope batch whose reads are untracked.
    pub fn action<T>(&self, f: impl FnOnce() -> T) -> T {
        let _scope = ScopeGuard::enter(self);
        let _untrack = UntrackGuard::enter(self);
        f()
    }

    /// Run `f` without recording any dependency.
    pub fn untracked<T>(&self, f: impl FnOnce() -> T) -> T {
        let _untrack = UntrackGuard::enter(self);
        f()
    }

    /// Run `callback` once the current outermost batch has flushed, or right
    /// away when no batch is open.
    pub fn batch_endpoint(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut exec = self.exec();
            if exec.batch_depth > 0 || exec.flushing {
                exec.endpoints.push_back(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Number of reactions waiting in the ambient pool.
    pub fn pending_count(&self) -> usize {
        self.exec().pending.len()
    }

    pub(crate) fn batch_start(&self) {
        self.exec().batch_depth += 1;
    }

    pub(crate) fn batch_end(&self) {
        let should_flush = {
            let mut exec = self.exec();
            debug_assert!(exec.batch_depth > 0, "batch_end without batch_start");
            exec.batch_depth = exec.batch_depth.saturating_sub(1);
            exec.batch_depth == 0 && !exec.flushing
        };
        if !should_flush {
            return;
        }
        let _suspend = UntrackSuspend::enter(self);
        self.flush_pending();
        self.run_endpoints();
    }

    /// Close a batch while a panic unwinds. Rebalances the counter only;
    /// queued reactions wait for the next flush.
    pub(crate) fn batch_unwind(&self) {
        let mut exec = self.exec();
        exec.batch_depth = exec.batch_depth.saturating_sub(1);
        if exec.batch_depth == 0 && !exec.pending.is_empty() {
            tracing::warn!(
                runtime = %self.inner.config.name,
                pending = exec.pending.len(),
                "batch unwound by a panic; pending reactions deferred"
            );
        }
    }

    pub(crate) fn scope_end(&self) {
        let should_flush = {
            let mut exec = self.exec();
            exec.scope_depth = exec.scope_depth.saturating_sub(1);
            exec.scope_depth == 0
        };
        if !should_flush {
            return;
        }
        let _suspend = UntrackSuspend::enter(self);
        self.drain(|exec| exec.pending_scope.shift_remove_index(0).map(|(_, r)| r));
    }

    fn flush_pending(&self) {
        let _flush = FlushGuard::enter(self);
        self.drain(|exec| exec.pending.shift_remove_index(0).map(|(_, r)| r));
    }

    /// Trigger reactions taken from a pool until it stays empty.
    fn drain(&self, mut next: impl FnMut(&mut ExecState) -> Option<Reaction>) {
        let limit = self.inner.config.max_flush_iterations;
        let mut executed = 0usize;
        loop {
            let Some(reaction) = next(&mut *self.exec()) else {
                break;
            };
            if executed == limit {
                let mut dropped = 1;
                while next(&mut *self.exec()).is_some() {
                    dropped += 1;
                }
                tracing::error!(
                    runtime = %self.name(),
                    limit,
                    dropped,
                    "flush iteration limit reached; dropping pending reactions"
                );
                break;
            }
            executed += 1;
            tracing::trace!(
                runtime = %self.name(),
                reaction = %reaction.id(),
                name = %reaction.name(),
                "flushing reaction"
            );
            reaction.trigger();
        }
    }

    fn run_endpoints(&self) {
        loop {
            let Some(endpoint) = self.exec().endpoints.pop_front() else {
                break;
            };
            endpoint();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exec = self.exec();
        f.debug_struct("Runtime")
            .field("name", &self.inner.config.name)
            .field("stack_depth", &exec.stack.len())
            .field("batch_depth", &exec.batch_depth)
            .field("untrack_depth", &exec.untrack_depth)
            .field("pending", &exec.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicI32;

    fn counter_on(runtime: &Runtime, state: &Observable, key: &'static str) -> Arc<AtomicI32> {
        let count = Arc::new(AtomicI32::new(0));
        let (count_clone, state) = (count.clone(), state.clone());
        let _ = runtime.autorun(move || {
            state.get(key);
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn batch_counters_rebalance_after_panic() {
        let runtime = Runtime::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            runtime.batch(|| {
                runtime.untracked(|| panic!("boom"));
            })
        }));

        assert!(result.is_err());
        assert!(!runtime.is_batching());
        assert!(!runtime.is_untracking());
    }

    #[test]
    fn tracking_stack_unwinds_after_panic() {
        let runtime = Runtime::new();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = runtime.autorun(|| panic!("inside reaction"));
        }));

        assert!(result.is_err());
        assert!(!runtime.is_tracking());
        assert!(!runtime.is_batching());
    }

    #[test]
    fn untracked_reads_create_no_subscriptions() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));
        let count = Arc::new(AtomicI32::new(0));

        let (count_clone, state_clone, rt) = (count.clone(), state.clone(), runtime.clone());
        let disposer = runtime.autorun(move || {
            let value = rt.untracked(|| state_clone.get("a"));
            assert!(value.is_some());
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        state.set("a", 2).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.dependency_count(disposer.reaction().unwrap()), 0);
    }

    #[test]
    fn endpoint_runs_after_flush() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));
        let count = counter_on(&runtime, &state, "a");
        let seen_at_endpoint = Arc::new(AtomicI32::new(-1));

        let (seen, count_clone, rt) = (seen_at_endpoint.clone(), count.clone(), runtime.clone());
        runtime.batch(|| {
            state.set("a", 2).unwrap();
            rt.batch_endpoint(move || {
                seen.store(count_clone.load(Ordering::SeqCst), Ordering::SeqCst);
            });
            assert_eq!(count.load(Ordering::SeqCst), 1);
        });

        assert_eq!(seen_at_endpoint.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn endpoint_outside_batch_runs_immediately() {
        let runtime = Runtime::new();
        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();
        runtime.batch_endpoint(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scope_batch_flushes_inside_open_batch() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));
        let count = counter_on(&runtime, &state, "a");

        runtime.batch(|| {
            runtime.batch_scope(|| {
                state.set("a", 2).unwrap();
                assert_eq!(count.load(Ordering::SeqCst), 1);
            });
            // The scope closed: its reactions ran even though the batch is open.
            assert_eq!(count.load(Ordering::SeqCst), 2);
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn action_is_untracked_and_scoped() {
        let runtime = Runtime::new();
        runtime.action(|| {
            assert!(runtime.is_untracking());
            assert!(runtime.is_scope_batching());
        });
        assert!(!runtime.is_untracking());
        assert!(!runtime.is_scope_batching());
    }

    #[test]
    fn has_collected_reports_tracked_reads() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));
        let results = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let (rt, state_clone, results_clone) = (runtime.clone(), state.clone(), results.clone());
        let _ = runtime.autorun(move || {
            let read = rt.has_collected(|| {
                state_clone.get("a");
            });
            let skipped = rt.has_collected(|| {});
            results_clone.lock().push((read, skipped));
        });

        assert_eq!(*results.lock(), vec![(true, false)]);
        assert!(!runtime.has_collected(|| {
            state.get("a");
        }));
    }

    #[test]
    fn flush_limit_drops_the_excess() {
        let runtime = Runtime::with_config(RuntimeConfig {
            max_flush_iterations: 2,
            ..RuntimeConfig::default()
        });
        let state = runtime.observable(Raw::record([("a", 1)]));
        let counts: Vec<_> = (0..4).map(|_| counter_on(&runtime, &state, "a")).collect();

        state.set("a", 2).unwrap();

        let reruns: i32 = counts
            .iter()
            .map(|count| count.load(Ordering::SeqCst) - 1)
            .sum();
        assert_eq!(reruns, 2);
        assert_eq!(runtime.pending_count(), 0);
    }

    #[test]
    fn disposal_suspends_unshared_computeds() {
        let runtime = Runtime::new();
        let state = runtime.observable(Raw::record([("a", 1)]));

        let reader = state.clone();
        let inner = runtime.computed(move || reader.get("a").and_then(|v| v.as_number()).unwrap_or(0.0));
        let inner_clone = inner.clone();
        let outer = runtime.computed(move || inner_clone.get() + 1.0);

        let (outer_a, outer_b) = (outer.clone(), outer.clone());
        let first = runtime.autorun(move || {
            outer_a.get();
        });
        let second = runtime.autorun(move || {
            outer_b.get();
        });
        let first_reaction = first.reaction().unwrap().clone();
        assert_eq!(first_reaction.computed_count(), 1);

        // Still read by `second`: nothing is suspended.
        first.dispose();
        assert!(!outer.is_dirty());
        assert_eq!(first_reaction.computed_count(), 0);

        second.dispose();
        assert!(outer.is_dirty());
        assert!(inner.is_dirty());
        assert_eq!(runtime.dependency_count(outer.reaction()), 0);
        assert_eq!(runtime.dependency_count(inner.reaction()), 0);
        assert_eq!(runtime.graph().entry_count(), 0);

        // Suspended computeds revive on the next read.
        assert_eq!(outer.get(), 2.0);
        state.set("a", 5).unwrap();
        assert_eq!(outer.get(), 6.0);
    }

    #[test]
    fn wrap_is_permissive_for_primitives() {
        let runtime = Runtime::new();
        assert_eq!(runtime.wrap(3, Annotation::Deep), Value::from(3));
        assert!(!runtime.wrap("x", Annotation::Shallow).is_observable());
    }

    #[test]
    fn mark_raw_opts_out_of_wrapping() {
        let runtime = Runtime::new();
        let raw = Raw::record([("a", 1)]);
        runtime.mark_raw(&raw);

        assert!(!runtime.wrap(raw.clone(), Annotation::Deep).is_observable());

        let parent = runtime.observable(Raw::record([("child", raw)]));
        assert!(!parent.get("child").unwrap().is_observable());
    }

    #[test]
    fn replaced_containers_are_not_retained() {
        let runtime = Runtime::new();
        let first = Raw::record([("n", 0)]);
        let state = runtime.observable(Raw::record([("child", first.clone())]));
        assert!(state.get("child").unwrap().is_observable());
        assert!(runtime.contains(&state, &first));

        for n in 1..=1000 {
            state.set("child", Raw::record([("n", n)])).unwrap();
            assert!(state.get("child").unwrap().is_observable());
        }

        assert!(!runtime.is_wrapped(&first));
        assert!(!runtime.contains(&state, &first));
        assert_eq!(runtime.tree().len(), 1);
        assert!(runtime.registry().len() <= 2 * 64 + 1);
    }
}
