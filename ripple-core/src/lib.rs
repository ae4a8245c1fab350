//! Ripple Core
//!
//! This crate provides a fine-grained reactive dependency-tracking engine.
//! It wraps plain mutable data in observable facades, records which
//! computations read which keys, and re-runs exactly the affected
//! computations when those keys are written.
//!
//! It implements:
//!
//! - Observable records, lists and sets with deep or shallow wrapping
//! - Autoruns, lazy trackers and value-comparing reactions
//! - Cached computed values and explicit boxes
//! - Batching with fixpoint flushes, scope batches and untracked regions
//! - Change observation independent of tracking
//!
//! # Architecture
//!
//! - `value`: the dynamic data model and same-value equality
//! - `graph`: dependency entries, the containment tree and the wrapper registry
//! - `reactive`: the runtime and every reactive primitive built on it
//! - `config`, `error`: runtime configuration and error types
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use ripple_core::{Raw, Runtime, Value};
//!
//! let runtime = Runtime::new();
//! let state = runtime.observable(Raw::record([("count", 1)]));
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let (reader, sink) = (state.clone(), log.clone());
//! let disposer = runtime.autorun(move || {
//!     sink.lock().push(reader.get("count").unwrap_or_default());
//! });
//!
//! state.set("count", 2).unwrap();
//! state.set("count", 2).unwrap();
//! assert_eq!(*log.lock(), vec![Value::from(1), Value::from(2)]);
//!
//! disposer.dispose();
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use graph::Annotation;
pub use reactive::{
    BoxCell, Computed, ContextSlot, DataChange, Disposer, Observable, Observed, OperationKind,
    Reaction, ReactionOptions, Runtime, Scheduler, Tracker,
};
pub use value::{
    Container, ContainerKind, Key, Raw, SameValue, TargetId, Value, WeakRaw, MAX_LIST_PADDING,
};
