//! Dependency Graph
//!
//! This module holds the bookkeeping structures the runtime consults on
//! every read and write:
//!
//! - `deps`: which reactions read which `(target, key)` entries
//! - `tree`: where each raw container is nested, for deep observation
//! - `registry`: raw ↔ wrapper identity and per-field annotations
//!
//! # Design Decisions
//!
//! 1. Forward edges are insertion-ordered sets, so notification order follows
//!    subscription order and duplicates collapse.
//!
//! 2. Every reaction keeps reverse edges to the entries it belongs to.
//!    Releasing a reaction before it re-runs is proportional to what it read,
//!    not to the size of the graph.
//!
//! 3. Nothing here owns a container. Everything is keyed by
//!    [`TargetId`](crate::value::TargetId), and the tree and registry hold
//!    only weak handles, swept as their containers go away.

mod deps;
pub(crate) mod registry;
mod tree;

pub use deps::{DepKey, DependencyGraph};
pub use registry::Annotation;
pub use tree::{DataTree, TreeNode};
