//! Reactive Primitives
//!
//! This module implements the reactive engine: observable containers,
//! reactions, computed values and boxes, all owned by one [`Runtime`].
//!
//! # Concepts
//!
//! ## Observables
//!
//! An [`Observable`] wraps a raw container. Reading a key inside a running
//! reaction subscribes that reaction to the key; writing a different value
//! to the key re-runs every subscriber.
//!
//! ## Reactions
//!
//! A [`Reaction`] is code whose reads are tracked. `autorun` re-runs it
//! eagerly, `track` hands changes to a scheduler, and [`Tracker`] tracks
//! lazily on demand. `reaction` compares the value of an expression and only
//! fires its subscriber when it changed.
//!
//! ## Computed Values and Boxes
//!
//! A [`Computed`] caches a derived value and recomputes it on the first read
//! after an upstream change. A [`BoxCell`] is an explicit get/set cell that
//! tracks whole-value replacement only.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses an explicit tracking stack stored in the
//! runtime. Reads consult the top of the stack; writes defer the reactions
//! they trigger to the pending pool of the current batch, which is drained to
//! a fixpoint when the outermost batch closes.

mod autorun;
mod boxed;
mod computed;
mod context;
mod observable;
mod observe;
mod reaction;
mod runtime;
mod subscriber;

pub use autorun::{Equals, ReactionOptions, Tracker};
pub use boxed::BoxCell;
pub use computed::Computed;
pub use context::ContextSlot;
pub use observable::Observable;
pub use observe::{DataChange, Observed, OperationKind};
pub use reaction::{Disposer, Reaction, ReactionKind, Scheduler};
pub use runtime::Runtime;
pub use subscriber::ReactionId;
