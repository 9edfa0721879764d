//! Instance identity registry.
//!
//! A parent pass resolves each component element it encounters against this
//! registry. Identity is `(component id, position)`: an explicit key pins
//! the position, otherwise the nth unkeyed occurrence of an identity within
//! the pass gets position n. Entries not touched by a pass are evicted when
//! the pass ends.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::context::RenderContext;
use crate::element::{ComponentId, Key};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum PositionKey {
    Keyed(Key),
    Indexed(u64),
}

struct Entry {
    context: Rc<RenderContext>,
    touched: bool,
}

pub(crate) struct InstanceRegistry {
    entries: HashMap<(ComponentId, PositionKey), Entry, ahash::RandomState>,
    counters: HashMap<ComponentId, u64, ahash::RandomState>,
}

impl InstanceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(ahash::RandomState::new()),
            counters: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub(crate) fn begin_pass(&mut self) {
        self.counters.clear();
        for entry in self.entries.values_mut() {
            entry.touched = false;
        }
    }

    /// Position for the next occurrence of `identity` in the current pass.
    pub(crate) fn next_position(
        &mut self,
        identity: ComponentId,
        key: Option<Key>,
    ) -> PositionKey {
        match key {
            Some(key) => PositionKey::Keyed(key),
            None => {
                let counter = self.counters.entry(identity).or_insert(0);
                let position = PositionKey::Indexed(*counter);
                *counter += 1;
                position
            }
        }
    }

    /// Looks up a live instance and marks it as touched by this pass.
    pub(crate) fn adopt(
        &mut self,
        identity: ComponentId,
        position: PositionKey,
    ) -> Option<Rc<RenderContext>> {
        let entry = self.entries.get_mut(&(identity, position))?;
        entry.touched = true;
        Some(Rc::clone(&entry.context))
    }

    pub(crate) fn insert(
        &mut self,
        identity: ComponentId,
        position: PositionKey,
        context: Rc<RenderContext>,
    ) {
        self.entries.insert(
            (identity, position),
            Entry {
                context,
                touched: true,
            },
        );
    }

    /// Removes and returns every instance the pass did not touch.
    pub(crate) fn end_pass(&mut self) -> Vec<Rc<RenderContext>> {
        let stale: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.touched)
            .map(|(key, _)| *key)
            .collect();
        stale
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .map(|entry| entry.context)
            .collect()
    }

    /// Removes every instance; used when the owner is torn down.
    pub(crate) fn drain_all(&mut self) -> Vec<Rc<RenderContext>> {
        self.counters.clear();
        self.entries
            .drain()
            .map(|(_, entry)| entry.context)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
