//! Dependency Entries
//!
//! The dependency graph maps `(target, key)` to the ordered set of reactions
//! that read that key during their most recent run. Each reaction also keeps
//! a back-reference set of the entries it belongs to, so releasing a reaction
//! touches only its own entries instead of scanning the whole graph.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};

use crate::reactive::ReactionId;
use crate::value::{Key, TargetId};

/// The key half of a dependency entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A single property or index.
    Prop(Key),
    /// The length of a list.
    Length,
    /// Whole-container enumeration. Structural changes notify it.
    Iteration,
}

impl From<Key> for DepKey {
    fn from(key: Key) -> Self {
        DepKey::Prop(key)
    }
}

/// Subscriptions from `(target, key)` entries to reactions.
///
/// Generic over the stored reaction handle so the bookkeeping can be tested
/// without a runtime.
pub struct DependencyGraph<R> {
    /// Forward edges, insertion-ordered and deduplicated per entry.
    entries: HashMap<TargetId, HashMap<DepKey, IndexMap<ReactionId, R>>>,

    /// Reverse edges: every entry a reaction currently belongs to.
    bindings: HashMap<ReactionId, IndexSet<(TargetId, DepKey)>>,
}

impl<R: Clone> DependencyGraph<R> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            bindings: HashMap::new(),
        }
    }

    /// Subscribe `reaction` to `(target, key)`.
    ///
    /// Returns `false` if it was already subscribed.
    pub fn record(&mut self, target: TargetId, key: DepKey, id: ReactionId, reaction: R) -> bool {
        let subscribers = self
            .entries
            .entry(target)
            .or_default()
            .entry(key.clone())
            .or_default();

        let added = !subscribers.contains_key(&id);
        if added {
            subscribers.insert(id, reaction);
        }

        self.bindings.entry(id).or_default().insert((target, key));
        added
    }

    /// Reactions subscribed to `(target, key)`, in subscription order.
    pub fn query(&self, target: TargetId, key: &DepKey) -> Vec<R> {
        self.entries
            .get(&target)
            .and_then(|keys| keys.get(key))
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, target: TargetId, key: &DepKey) -> usize {
        self.entries
            .get(&target)
            .and_then(|keys| keys.get(key))
            .map_or(0, IndexMap::len)
    }

    pub fn is_subscribed(&self, target: TargetId, key: &DepKey, id: ReactionId) -> bool {
        self.entries
            .get(&target)
            .and_then(|keys| keys.get(key))
            .is_some_and(|subscribers| subscribers.contains_key(&id))
    }

    /// Number of entries the reaction currently belongs to.
    pub fn binding_count(&self, id: ReactionId) -> usize {
        self.bindings.get(&id).map_or(0, IndexSet::len)
    }

    /// Number of live `(target, key)` entries across the graph.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    /// Remove the reaction from every entry it belongs to.
    ///
    /// Empty entries are pruned. Returns how many entries were released.
    pub fn release(&mut self, id: ReactionId) -> usize {
        let Some(bindings) = self.bindings.remove(&id) else {
            return 0;
        };

        let released = bindings.len();
        for (target, key) in bindings {
            let Some(keys) = self.entries.get_mut(&target) else {
                continue;
            };
            if let Some(subscribers) = keys.get_mut(&key) {
                subscribers.shift_remove(&id);
                if subscribers.is_empty() {
                    keys.remove(&key);
                }
            }
            if keys.is_empty() {
                self.entries.remove(&target);
            }
        }
        released
    }
}

impl<R: Clone> Default for DependencyGraph<R> {
    fn default() -> Self {
        Self::new()
    }
}
