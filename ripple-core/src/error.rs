//! Error types for the reactive engine.
//!
//! Most of the engine is deliberately permissive: wrapping a primitive
//! returns it untouched and disposing twice is a no-op. The variants below
//! cover the cases where continuing silently would hide a sequencing bug in
//! the caller.

use thiserror::Error;

use crate::value::{ContainerKind, Key};

/// Errors produced by the reactive engine.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A write was attempted on a computed value that has no setter.
    #[error("computed value `{name}` is read-only")]
    ReadOnlyComputed { name: String },

    /// A helper that needs a running reaction was called outside of one.
    #[error("`{operation}` requires an active tracking context")]
    NoTrackingContext { operation: &'static str },

    /// `observe` was handed a value that is not a container.
    #[error("cannot observe a {found} value")]
    NotObservable { found: &'static str },

    /// The key does not address anything in a container of this kind.
    #[error("key `{key}` is not valid for a {kind:?} container")]
    InvalidKey { key: Key, kind: ContainerKind },

    /// The operation does not apply to this container kind.
    #[error("`{operation}` is not supported on a {kind:?} container")]
    Unsupported {
        operation: &'static str,
        kind: ContainerKind,
    },

    /// A computed value was read from inside its own first evaluation.
    #[error("computed value `{name}` depends on itself")]
    CyclicComputed { name: String },

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReactiveError>;
