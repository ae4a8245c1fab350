//! Containment Tree
//!
//! Records where each raw container was last placed: the parent target and
//! the key it sits under. Deep observers use it to decide whether a change
//! happened somewhere below the value they watch.
//!
//! Nodes live in an arena indexed by [`TargetId`] rather than holding
//! pointers to their parents, so a container and its children never own
//! each other. A node only holds a weak handle to its container; nodes whose
//! container was dropped are swept once the arena has doubled since the last
//! sweep.

use std::collections::HashMap;

use crate::value::{Key, Raw, TargetId, WeakRaw};

/// Arena size below which no sweep happens.
const SWEEP_FLOOR: usize = 64;

/// Placement of one container.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub parent: TargetId,
    pub key: Key,
    child: WeakRaw,
}

impl TreeNode {
    /// Whether the placed container is still alive.
    pub fn is_alive(&self) -> bool {
        self.child.is_alive()
    }
}

#[derive(Debug, Default)]
pub struct DataTree {
    nodes: HashMap<TargetId, TreeNode>,
    sweep_at: usize,
}

impl DataTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `child` under `parent` at `key`.
    ///
    /// A child that was already placed elsewhere moves to the new placement.
    pub fn attach(&mut self, parent: TargetId, key: Key, child: &Raw) {
        if parent == child.id() {
            return;
        }
        self.nodes.insert(
            child.id(),
            TreeNode {
                parent,
                key,
                child: child.downgrade(),
            },
        );
        self.maybe_sweep();
    }

    /// Forget `child`'s placement if it is still the one at `(parent, key)`.
    ///
    /// Returns whether a placement was removed.
    pub fn detach(&mut self, parent: TargetId, key: &Key, child: TargetId) -> bool {
        let placed_here = self
            .nodes
            .get(&child)
            .is_some_and(|node| node.parent == parent && &node.key == key);
        if placed_here {
            self.nodes.remove(&child);
        }
        placed_here
    }

    /// The current placement of `target`; `None` for roots.
    pub fn node(&self, target: TargetId) -> Option<&TreeNode> {
        self.nodes.get(&target)
    }

    pub fn parent(&self, target: TargetId) -> Option<TargetId> {
        self.nodes.get(&target).map(|node| node.parent)
    }

    /// Whether `descendant` is `ancestor` or sits anywhere below it.
    pub fn contains(&self, ancestor: TargetId, descendant: TargetId) -> bool {
        let mut current = Some(descendant);
        // A re-parented cycle would otherwise walk forever.
        let mut remaining = self.nodes.len() + 1;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            if remaining == 0 {
                return false;
            }
            remaining -= 1;
            current = self.parent(id);
        }
        false
    }

    /// Keys from the outermost ancestor down to `target`.
    pub fn path(&self, target: TargetId) -> Vec<Key> {
        let mut path = Vec::new();
        let mut current = target;
        for _ in 0..=self.nodes.len() {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            path.push(node.key.clone());
            current = node.parent;
        }
        path.reverse();
        path
    }

    /// Drop the nodes of containers that no longer exist.
    pub fn sweep(&mut self) {
        self.nodes.retain(|_, node| node.is_alive());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn maybe_sweep(&mut self) {
        if self.nodes.len() > self.sweep_at.max(SWEEP_FLOOR) {
            self.sweep();
            self.sweep_at = 2 * self.nodes.len();
        }
    }
}
