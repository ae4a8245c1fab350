//! Wrapper Registry
//!
//! Keeps the raw ↔ wrapper identity maps. Wrapping the same raw container
//! twice in the same mode hands back the same facade for as long as a handle
//! to it is alive, which is what makes repeated reads of a nested container
//! referentially stable.
//!
//! Every entry is weak. Entries whose facade or container has been dropped
//! are swept once the registry has doubled since the last sweep.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::value::{Key, Raw, TargetId, WeakRaw};

/// Entry count below which no sweep happens.
const SWEEP_FLOOR: usize = 64;

/// How a field (or a whole value) participates in reactivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Annotation {
    /// Wrap recursively, lazily on first read.
    #[default]
    Deep,
    /// Wrap only the outermost container.
    Shallow,
    /// Track replacement of the field but never wrap its value.
    Ref,
}

/// Shared state behind an [`Observable`](crate::reactive::Observable) handle.
#[derive(Debug)]
pub(crate) struct Facade {
    pub(crate) raw: Raw,
    pub(crate) shallow: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    deep: HashMap<TargetId, Weak<Facade>>,
    shallow: HashMap<TargetId, Weak<Facade>>,
    marked_raw: HashMap<TargetId, WeakRaw>,
    annotations: HashMap<TargetId, (WeakRaw, HashMap<Key, Annotation>)>,
    sweep_at: usize,
}

impl Registry {
    /// The facade for `raw` in the requested mode, creating it when no live
    /// one exists.
    pub(crate) fn facade(&mut self, raw: &Raw, shallow: bool) -> Arc<Facade> {
        let map = if shallow {
            &mut self.shallow
        } else {
            &mut self.deep
        };
        if let Some(facade) = map.get(&raw.id()).and_then(Weak::upgrade) {
            return facade;
        }
        let facade = Arc::new(Facade {
            raw: raw.clone(),
            shallow,
        });
        map.insert(raw.id(), Arc::downgrade(&facade));
        self.maybe_sweep();
        facade
    }

    pub(crate) fn is_wrapped(&self, target: TargetId) -> bool {
        is_live(&self.deep, target) || is_live(&self.shallow, target)
    }

    pub(crate) fn is_shallow(&self, target: TargetId) -> bool {
        is_live(&self.shallow, target)
    }

    pub(crate) fn mark_raw(&mut self, raw: &Raw) {
        self.marked_raw.insert(raw.id(), raw.downgrade());
        self.maybe_sweep();
    }

    pub(crate) fn is_marked_raw(&self, target: TargetId) -> bool {
        self.marked_raw
            .get(&target)
            .is_some_and(WeakRaw::is_alive)
    }

    pub(crate) fn annotate(&mut self, target: &Raw, key: Key, annotation: Annotation) {
        self.annotations
            .entry(target.id())
            .or_insert_with(|| (target.downgrade(), HashMap::new()))
            .1
            .insert(key, annotation);
        self.maybe_sweep();
    }

    pub(crate) fn annotation(&self, target: TargetId, key: &Key) -> Option<Annotation> {
        self.annotations
            .get(&target)
            .filter(|(owner, _)| owner.is_alive())
            .and_then(|(_, fields)| fields.get(key))
            .copied()
    }

    /// Drop every entry whose facade or container no longer exists.
    pub(crate) fn sweep(&mut self) {
        self.deep.retain(|_, facade| facade.strong_count() > 0);
        self.shallow.retain(|_, facade| facade.strong_count() > 0);
        self.marked_raw.retain(|_, raw| raw.is_alive());
        self.annotations.retain(|_, (owner, _)| owner.is_alive());
    }

    pub(crate) fn len(&self) -> usize {
        self.deep.len() + self.shallow.len() + self.marked_raw.len() + self.annotations.len()
    }

    fn maybe_sweep(&mut self) {
        let count = self.len();
        if count > self.sweep_at.max(SWEEP_FLOOR) {
            self.sweep();
            self.sweep_at = 2 * self.len();
        }
    }
}

fn is_live(map: &HashMap<TargetId, Weak<Facade>>, target: TargetId) -> bool {
    map.get(&target).is_some_and(|facade| facade.strong_count() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facades_are_idempotent_per_mode() {
        let mut registry = Registry::default();
        let raw = Raw::record([("a", 1)]);

        let deep = registry.facade(&raw, false);
        let again = registry.facade(&raw, false);
        let shallow = registry.facade(&raw, true);

        assert!(Arc::ptr_eq(&deep, &again));
        assert!(!Arc::ptr_eq(&deep, &shallow));
        assert!(registry.is_shallow(raw.id()));
        assert!(registry.is_wrapped(raw.id()));
    }

    #[test]
    fn dropped_facades_are_forgotten() {
        let mut registry = Registry::default();
        let raw = Raw::record([("a", 1)]);

        drop(registry.facade(&raw, false));
        assert!(!registry.is_wrapped(raw.id()));

        for _ in 0..1000 {
            drop(registry.facade(&Raw::record([("a", 1)]), false));
        }
        assert!(registry.len() <= 2 * SWEEP_FLOOR + 1);
    }

    #[test]
    fn annotations_are_per_field() {
        let mut registry = Registry::default();
        let target = Raw::record([("big", 1)]);
        registry.annotate(&target, Key::from("big"), Annotation::Ref);

        assert_eq!(
            registry.annotation(target.id(), &Key::from("big")),
            Some(Annotation::Ref)
        );
        assert_eq!(registry.annotation(target.id(), &Key::from("other")), None);
    }

    #[test]
    fn entries_die_with_their_container() {
        let mut registry = Registry::default();
        let raw = Raw::record([("big", 1)]);
        let id = raw.id();
        registry.annotate(&raw, Key::from("big"), Annotation::Ref);
        registry.mark_raw(&raw);
        drop(raw);

        assert!(!registry.is_marked_raw(id));
        assert_eq!(registry.annotation(id, &Key::from("big")), None);

        registry.sweep();
        assert_eq!(registry.len(), 0);
    }
}
