//! Reaction identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a reaction.
///
/// Each reaction (autorun, tracker, computed, or value reaction) gets a
/// unique ID when created. Dependency entries and pending pools are keyed by
/// it, which is how duplicate subscriptions and duplicate scheduling collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactionId(u64);

impl ReactionId {
    /// Generate a new unique reaction ID.
    ///
    /// Uses an atomic counter so IDs stay unique across runtimes.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ReactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_ids_are_unique() {
        let id1 = ReactionId::new();
        let id2 = ReactionId::new();
        let id3 = ReactionId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn reaction_ids_increase() {
        let first = ReactionId::new();
        let second = ReactionId::new();
        assert!(first < second);
    }
}
