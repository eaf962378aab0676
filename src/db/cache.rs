// src/db/cache.rs

//! Bounded memo for `package_info` lookups
//!
//! Entries are keyed by `(name, source)` with the name lowercased, matching
//! the store's `COLLATE NOCASE` identity. When full, the least recently used
//! entry is evicted. Writers invalidate by name.
//!
//! Every invalidation bumps a generation counter. A reader notes the
//! generation before reading the store and inserts with
//! [`InfoCache::insert_if_current`], so a record read before a write can
//! never be cached after that write's invalidation.

use std::collections::HashMap;

type Key = (String, Option<String>);

#[derive(Debug)]
pub struct InfoCache<V> {
    capacity: usize,
    tick: u64,
    generation: u64,
    entries: HashMap<Key, (u64, V)>,
}

impl<V: Clone> InfoCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            generation: 0,
            entries: HashMap::new(),
        }
    }

    fn key(name: &str, source: Option<&str>) -> Key {
        (name.to_lowercase(), source.map(str::to_string))
    }

    pub fn get(&mut self, name: &str, source: Option<&str>) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries
            .get_mut(&Self::key(name, source))
            .map(|(used, value)| {
                *used = tick;
                value.clone()
            })
    }

    pub fn insert(&mut self, name: &str, source: Option<&str>, value: V) {
        if self.capacity == 0 {
            return;
        }

        let key = Self::key(name, source);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.tick += 1;
        self.entries.insert(key, (self.tick, value));
    }

    /// Insert only if nothing was invalidated since `generation`
    pub fn insert_if_current(&mut self, name: &str, source: Option<&str>, value: V, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.insert(name, source, value);
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop every entry for `name`, whatever source it was looked up with
    pub fn invalidate(&mut self, name: &str) {
        self.generation += 1;
        let name = name.to_lowercase();
        self.entries.retain(|(cached, _), _| *cached != name);
    }

    pub fn clear(&mut self) {
        self.generation += 1;
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (used, _))| *used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
