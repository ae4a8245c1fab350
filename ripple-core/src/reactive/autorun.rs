//! Autoruns, Trackers and Value Reactions
//!
//! Three ways to bind code to the values it reads:
//!
//! - [`Runtime::autorun`] / [`Runtime::track`]: run now, re-run (or call the
//!   scheduler) whenever something read during the last run changes.
//! - [`Tracker`]: the lazy variant. `track` records dependencies and caches
//!   the result; a change disposes the bindings and calls the scheduler,
//!   which usually calls `track` again.
//! - [`Runtime::reaction`]: re-evaluates an expression on change and calls
//!   the subscriber only when the expression's value changed.
//!
//! # Boundaries
//!
//! Each run opens its own batch. Writes the run made to its own dependencies
//! never queue it again: the reaction is taken out of the pending pools when
//! its body returns, and its boundary stays raised while its batch flushes.
//! This holds whether the run started at top level or from inside another
//! flush.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::context::BatchGuard;
use super::reaction::{Disposer, Reaction, ReactionKind, Scheduler};
use super::runtime::Runtime;
use crate::value::SameValue;

/// Custom equality for [`Runtime::reaction`].
pub type Equals<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Options for [`Runtime::reaction`].
pub struct ReactionOptions<T> {
    pub name: Cow<'static, str>,
    /// Call the subscriber once right after the first evaluation.
    pub fire_immediately: bool,
    /// Replaces same-value comparison when deciding whether to fire.
    pub equals: Option<Equals<T>>,
}

impl<T> Default for ReactionOptions<T> {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("Reaction"),
            fire_immediately: false,
            equals: None,
        }
    }
}

impl<T> fmt::Debug for ReactionOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionOptions")
            .field("name", &self.name)
            .field("fire_immediately", &self.fire_immediately)
            .field("equals", &self.equals.is_some())
            .finish()
    }
}

/// Run `body` as one tracked pass of `reaction`.
fn run_bounded<T>(runtime: &Runtime, reaction: &Reaction, body: impl FnOnce() -> T) -> Option<T> {
    let batch = BatchGuard::enter(runtime);
    let result = runtime.run_tracked(reaction, body);
    runtime.unschedule(reaction);
    let _boundary = reaction.enter_boundary();
    drop(batch);
    result
}

impl Runtime {
    /// Run `f` now and again whenever anything it read changes.
    pub fn autorun<F>(&self, f: F) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.track_named("AutoRun", f, None)
    }

    /// Like [`Runtime::autorun`], but a change calls `scheduler` instead of
    /// re-running `f`. The scheduler re-runs it with [`Reaction::run`].
    pub fn track<F>(&self, f: F, scheduler: Option<Scheduler>) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.track_named("AutoRun", f, scheduler)
    }

    /// [`Runtime::track`] with a diagnostic name for the reaction.
    pub fn track_named<F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        f: F,
        scheduler: Option<Scheduler>,
    ) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        let reaction = Reaction::new(
            self,
            ReactionKind::Autorun,
            name,
            Box::new(move |runtime: &Runtime, reaction: &Reaction| {
                if reaction.is_disposed() || reaction.boundary() > 0 {
                    return;
                }
                run_bounded(runtime, reaction, || f());
            }),
            scheduler,
            None,
        );
        reaction.run();
        Disposer::for_reaction(reaction)
    }

    /// A lazy tracker whose changes are reported to `scheduler`.
    pub fn tracker<T, S>(&self, scheduler: S) -> Tracker<T>
    where
        T: Clone + Send + 'static,
        S: Fn(&Reaction) + Send + Sync + 'static,
    {
        let scheduler: Scheduler = Arc::new(move |reaction: &Reaction| {
            if reaction.boundary() == 0 {
                reaction.dispose();
            }
            scheduler(reaction);
        });
        let reaction = Reaction::new(
            self,
            ReactionKind::Tracker,
            "TrackerReaction",
            Box::new(|_: &Runtime, _: &Reaction| {}),
            Some(scheduler),
            None,
        );
        Tracker {
            runtime: self.clone(),
            reaction,
            results: Arc::new(Mutex::new(None)),
        }
    }

    /// Evaluate `tracker` now and after every change to what it read; call
    /// `subscriber(new, old)` in a batch whenever the value changed.
    ///
    /// `old` is `None` only for the immediate call made with
    /// `fire_immediately`.
    pub fn reaction<T, F, S>(&self, tracker: F, subscriber: S, options: ReactionOptions<T>) -> Disposer
    where
        T: SameValue + Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(&T, Option<&T>) + Send + Sync + 'static,
    {
        let state: Arc<Mutex<ValueState<T>>> = Arc::new(Mutex::new(ValueState::default()));
        let subscriber = Arc::new(subscriber);
        let equals = options.equals;

        let body_state = state.clone();
        let body = Box::new(move |runtime: &Runtime, reaction: &Reaction| {
            if let Some(value) = runtime.run_tracked(reaction, || tracker()) {
                body_state.lock().current = Some(value);
            }
        });

        let (scheduler_state, scheduler_subscriber) = (state.clone(), subscriber.clone());
        let scheduler: Scheduler = Arc::new(move |reaction: &Reaction| {
            let Some(runtime) = reaction.runtime() else {
                return;
            };
            reaction.run();
            let (current, old) = {
                let state = scheduler_state.lock();
                (state.current.clone(), state.old.clone())
            };
            let changed = match (&current, &old) {
                (Some(current), Some(old)) => match &equals {
                    Some(equals) => !equals(old, current),
                    None => !old.same_value(current),
                },
                (current, old) => current.is_some() != old.is_some(),
            };
            if let (true, Some(value)) = (changed, &current) {
                runtime.batch(|| scheduler_subscriber(value, old.as_ref()));
            }
            scheduler_state.lock().old = current;
        });

        let reaction = Reaction::new(
            self,
            ReactionKind::Reaction,
            options.name,
            body,
            Some(scheduler),
            None,
        );
        reaction.run();

        let current = {
            let mut state = state.lock();
            state.old = state.current.clone();
            state.current.clone()
        };
        if let (true, Some(value)) = (options.fire_immediately, &current) {
            self.batch(|| subscriber(value, None));
        }
        Disposer::for_reaction(reaction)
    }
}

struct ValueState<T> {
    current: Option<T>,
    old: Option<T>,
}

impl<T> Default for ValueState<T> {
    fn default() -> Self {
        Self {
            current: None,
            old: None,
        }
    }
}

/// Lazily tracked computation driven by a scheduler.
pub struct Tracker<T> {
    runtime: Runtime,
    reaction: Reaction,
    results: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Tracker<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            reaction: self.reaction.clone(),
            results: self.results.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Tracker<T> {
    /// Run `f` with fresh dependency tracking and cache its result.
    ///
    /// A re-entrant call returns the cached result without running `f`; a
    /// call made while the tracker's own batch flushes returns `None`.
    pub fn track(&self, f: impl FnOnce() -> T) -> Option<T> {
        if self.reaction.boundary() > 0 {
            return None;
        }
        if !self.runtime.is_on_stack(&self.reaction) {
            self.reaction.revive();
            if let Some(result) = run_bounded(&self.runtime, &self.reaction, f) {
                *self.results.lock() = Some(result);
            }
        }
        self.results.lock().clone()
    }

    /// The result of the last completed `track`.
    pub fn results(&self) -> Option<T> {
        self.results.lock().clone()
    }

    /// The reaction that records the tracked reads.
    pub fn reaction(&self) -> &Reaction {
        &self.reaction
    }

    /// Drop the tracked dependencies. A later `track` starts over.
    pub fn dispose(&self) {
        self.reaction.dispose();
    }
}

impl<T> fmt::Debug for Tracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("reaction", &self.reaction)
            .finish()
    }
}
