//! Reactions
//!
//! A reaction is an executable unit whose reads are tracked. When one of the
//! entries it read is written, the runtime either hands it to its scheduler
//! or runs its body again.
//!
//! Reactions hold only a weak reference to their runtime. The runtime's
//! dependency graph holds the reactions strongly while they are subscribed,
//! so a live subscription never keeps a dropped runtime alive.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::runtime::{Runtime, RuntimeInner};
use super::subscriber::ReactionId;
use crate::value::TargetId;

/// Called instead of re-running the reaction when a dependency changes.
pub type Scheduler = Arc<dyn Fn(&Reaction) + Send + Sync>;

/// What the reaction does when it runs.
pub(crate) type Body = Box<dyn Fn(&Runtime, &Reaction) + Send + Sync>;

/// The flavour of a reaction, used for diagnostics and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    /// Re-runs its body eagerly (`autorun` / `track`).
    Autorun,
    /// Lazy: notifies its scheduler and waits to be tracked again.
    Tracker,
    /// Backs a computed value; triggering only marks it dirty.
    Computed,
    /// Re-evaluates a tracker expression and fires on value change.
    Reaction,
}

/// Shared handle to a reaction.
#[derive(Clone)]
pub struct Reaction {
    inner: Arc<ReactionInner>,
}

struct ReactionInner {
    id: ReactionId,
    name: Cow<'static, str>,
    kind: ReactionKind,
    runtime: Weak<RuntimeInner>,
    body: Body,
    scheduler: Option<Scheduler>,
    /// For computed reactions: the target their own dependency entry lives on.
    entry: Option<TargetId>,
    state: Mutex<ReactionState>,
}

struct ReactionState {
    disposed: bool,
    dirty: bool,
    /// Non-zero while the reaction's own batch is flushing.
    boundary: usize,
    /// Computed reactions read while this reaction was on top of the stack.
    computes: IndexMap<ReactionId, Reaction>,
}

impl Reaction {
    pub(crate) fn new(
        runtime: &Runtime,
        kind: ReactionKind,
        name: impl Into<Cow<'static, str>>,
        body: Body,
        scheduler: Option<Scheduler>,
        entry: Option<TargetId>,
    ) -> Self {
        let reaction = Self {
            inner: Arc::new(ReactionInner {
                id: ReactionId::new(),
                name: name.into(),
                kind,
                runtime: runtime.downgrade(),
                body,
                scheduler,
                entry,
                state: Mutex::new(ReactionState {
                    disposed: false,
                    dirty: true,
                    boundary: 0,
                    computes: IndexMap::new(),
                }),
            }),
        };
        tracing::debug!(
            runtime = %runtime.name(),
            reaction = %reaction.id(),
            name = %reaction.name(),
            kind = ?kind,
            "reaction created"
        );
        reaction
    }

    /// Unique identity, ordered by creation.
    pub fn id(&self) -> ReactionId {
        self.inner.id
    }

    /// Diagnostic name, shown in traces.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// What created the reaction.
    pub fn kind(&self) -> ReactionKind {
        self.inner.kind
    }

    /// Whether the reaction backs a computed value.
    pub fn is_computed(&self) -> bool {
        self.inner.kind == ReactionKind::Computed
    }

    /// Whether the reaction has stopped reacting.
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Whether the reaction has not run since its last trigger. Only
    /// meaningful for computed reactions.
    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    /// Execute the reaction's body now.
    ///
    /// Does nothing once the owning runtime has been dropped.
    pub fn run(&self) {
        if let Some(runtime) = self.runtime() {
            (self.inner.body)(&runtime, self);
        }
    }

    /// React to a dependency change: defer to the scheduler if there is one,
    /// otherwise run.
    pub fn trigger(&self) {
        match &self.inner.scheduler {
            Some(scheduler) => scheduler(self),
            None => self.run(),
        }
    }

    /// Stop reacting. Idempotent.
    pub fn dispose(&self) {
        match self.runtime() {
            Some(runtime) => runtime.dispose_reaction(self),
            None => {
                self.mark_disposed();
            }
        }
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        Runtime::upgrade(&self.inner.runtime)
    }

    pub(crate) fn entry(&self) -> Option<TargetId> {
        self.inner.entry
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.inner.state.lock().dirty = dirty;
    }

    /// Returns `true` if this call is the one that disposed the reaction.
    pub(crate) fn mark_disposed(&self) -> bool {
        let mut state = self.inner.state.lock();
        !std::mem::replace(&mut state.disposed, true)
    }

    pub(crate) fn revive(&self) {
        self.inner.state.lock().disposed = false;
    }

    pub(crate) fn boundary(&self) -> usize {
        self.inner.state.lock().boundary
    }

    pub(crate) fn enter_boundary(&self) -> BoundaryGuard<'_> {
        self.inner.state.lock().boundary += 1;
        BoundaryGuard { reaction: self }
    }

    pub(crate) fn add_computed(&self, computed: &Reaction) {
        if computed.id() == self.id() {
            return;
        }
        self.inner
            .state
            .lock()
            .computes
            .entry(computed.id())
            .or_insert_with(|| computed.clone());
    }

    pub(crate) fn take_computes(&self) -> Vec<Reaction> {
        let mut state = self.inner.state.lock();
        std::mem::take(&mut state.computes).into_values().collect()
    }

    /// Number of computed values read during the last run.
    pub fn computed_count(&self) -> usize {
        self.inner.state.lock().computes.len()
    }
}

impl PartialEq for Reaction {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Reaction {}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Resets the reaction's boundary when dropped.
pub(crate) struct BoundaryGuard<'a> {
    reaction: &'a Reaction,
}

impl Drop for BoundaryGuard<'_> {
    fn drop(&mut self) {
        self.reaction.inner.state.lock().boundary = 0;
    }
}

/// Handle returned by `autorun`, `track`, `reaction` and `observe`.
///
/// Dropping it does not dispose anything; call [`Disposer::dispose`].
#[derive(Clone, Debug)]
pub struct Disposer {
    kind: DisposerKind,
}

#[derive(Clone)]
enum DisposerKind {
    Reaction(Reaction),
    Listener {
        runtime: Weak<RuntimeInner>,
        id: u64,
    },
}

impl fmt::Debug for DisposerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisposerKind::Reaction(reaction) => f.debug_tuple("Reaction").field(reaction).finish(),
            DisposerKind::Listener { id, .. } => f.debug_tuple("Listener").field(id).finish(),
        }
    }
}

impl Disposer {
    pub(crate) fn for_reaction(reaction: Reaction) -> Self {
        Self {
            kind: DisposerKind::Reaction(reaction),
        }
    }

    pub(crate) fn for_listener(runtime: &Runtime, id: u64) -> Self {
        Self {
            kind: DisposerKind::Listener {
                runtime: runtime.downgrade(),
                id,
            },
        }
    }

    /// Dispose the reaction or detach the observer. Idempotent.
    pub fn dispose(&self) {
        match &self.kind {
            DisposerKind::Reaction(reaction) => reaction.dispose(),
            DisposerKind::Listener { runtime, id } => {
                if let Some(runtime) = Runtime::upgrade(runtime) {
                    runtime.remove_listener(*id);
                }
            }
        }
    }

    /// Whether the reaction is disposed or the observer detached.
    pub fn is_disposed(&self) -> bool {
        match &self.kind {
            DisposerKind::Reaction(reaction) => reaction.is_disposed(),
            DisposerKind::Listener { runtime, id } => {
                Runtime::upgrade(runtime).map_or(true, |runtime| !runtime.has_listener(*id))
            }
        }
    }

    /// The reaction behind this disposer, if it disposes one.
    pub fn reaction(&self) -> Option<&Reaction> {
        match &self.kind {
            DisposerKind::Reaction(reaction) => Some(reaction),
            DisposerKind::Listener { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counting(runtime: &Runtime, count: Arc<AtomicI32>, scheduler: Option<Scheduler>) -> Reaction {
        Reaction::new(
            runtime,
            ReactionKind::Autorun,
            "Counting",
            Box::new(move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            }),
            scheduler,
            None,
        )
    }

    #[test]
    fn trigger_runs_body_without_scheduler() {
        let runtime = Runtime::new();
        let count = Arc::new(AtomicI32::new(0));
        let reaction = counting(&runtime, count.clone(), None);

        reaction.trigger();
        reaction.trigger();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn trigger_prefers_scheduler() {
        let runtime = Runtime::new();
        let count = Arc::new(AtomicI32::new(0));
        let scheduled = Arc::new(AtomicI32::new(0));
        let scheduled_clone = scheduled.clone();
        let reaction = counting(
            &runtime,
            count.clone(),
            Some(Arc::new(move |_| {
                scheduled_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );

        reaction.trigger();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_is_idempotent() {
        let runtime = Runtime::new();
        let reaction = counting(&runtime, Arc::new(AtomicI32::new(0)), None);

        reaction.dispose();
        reaction.dispose();
        assert!(reaction.is_disposed());
    }

    #[test]
    fn run_after_runtime_drop_is_a_no_op() {
        let count = Arc::new(AtomicI32::new(0));
        let reaction = {
            let runtime = Runtime::new();
            counting(&runtime, count.clone(), None)
        };

        reaction.run();
        reaction.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(reaction.is_disposed());
    }

    #[test]
    fn boundary_resets_on_drop() {
        let runtime = Runtime::new();
        let reaction = counting(&runtime, Arc::new(AtomicI32::new(0)), None);
        {
            let _guard = reaction.enter_boundary();
            assert_eq!(reaction.boundary(), 1);
        }
        assert_eq!(reaction.boundary(), 0);
    }
}
