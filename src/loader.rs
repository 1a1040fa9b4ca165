//! Loader identities with generation-checked liveness.
//!
//! A cache must not keep class loaders alive, and must drop what it learned about a loader
//! once the loader is gone. Instead of weak references, every loader is given a slot in an
//! arena: a [`LoaderKey`] is the slot number plus the slot's generation at registration.
//! Retiring a loader bumps the slot generation, which makes every key for it stale, and
//! bumps the registry epoch so caches know a sweep is due.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoaderKey {
    slot: u32,
    generation: u32,
}

impl LoaderKey {
    /// The bootstrap loader. Always live, never retired.
    pub const BOOT: LoaderKey = LoaderKey {
        slot: 0,
        generation: 0,
    };

    pub fn slot(self) -> u32 {
        self.slot
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct Slots {
    generations: Vec<u32>,
    live: Vec<bool>,
    free: Vec<u32>,
}

#[derive(Debug)]
pub struct LoaderRegistry {
    slots: Mutex<Slots>,
    epoch: AtomicU64,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Slots {
                generations: vec![0],
                live: vec![true],
                free: Vec::new(),
            }),
            epoch: AtomicU64::new(0),
        }
    }
}

impl LoaderRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hands out a key for a newly seen loader. Dropping the handle retires the key.
    pub fn register(self: &Arc<Self>) -> LoaderHandle {
        let mut slots = self.slots.lock();
        let slot = match slots.free.pop() {
            Some(slot) => slot,
            None => {
                slots.generations.push(0);
                slots.live.push(false);
                (slots.generations.len() - 1) as u32
            }
        };
        slots.live[slot as usize] = true;
        let key = LoaderKey {
            slot,
            generation: slots.generations[slot as usize],
        };
        drop(slots);
        log::debug!("registered loader {key:?}");
        LoaderHandle {
            key,
            registry: Arc::clone(self),
        }
    }

    pub fn is_live(&self, key: LoaderKey) -> bool {
        let slots = self.slots.lock();
        let slot = key.slot as usize;
        slots.live.get(slot).copied().unwrap_or(false) && slots.generations[slot] == key.generation
    }

    /// Incremented every time a loader is retired.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().live.iter().filter(|&&live| live).count()
    }

    /// Number of slots ever allocated, including the bootstrap slot.
    pub fn capacity(&self) -> usize {
        self.slots.lock().generations.len()
    }

    fn retire(&self, key: LoaderKey) {
        if key == LoaderKey::BOOT {
            return;
        }
        let mut slots = self.slots.lock();
        let slot = key.slot as usize;
        if !slots.live.get(slot).copied().unwrap_or(false) || slots.generations[slot] != key.generation {
            return;
        }
        slots.live[slot] = false;
        slots.generations[slot] = slots.generations[slot].wrapping_add(1);
        slots.free.push(key.slot);
        drop(slots);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        log::debug!("retired loader {key:?}");
    }
}

/// Owner of a registered loader key. Hosts keep one per live loader.
#[derive(Debug)]
pub struct LoaderHandle {
    key: LoaderKey,
    registry: Arc<LoaderRegistry>,
}

impl LoaderHandle {
    pub fn key(&self) -> LoaderKey {
        self.key
    }
}

impl Drop for LoaderHandle {
    fn drop(&mut self) {
        self.registry.retire(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_is_always_live() {
        let registry = LoaderRegistry::new();
        assert!(registry.is_live(LoaderKey::BOOT));
        registry.retire(LoaderKey::BOOT);
        assert!(registry.is_live(LoaderKey::BOOT));
        assert_eq!(registry.epoch(), 0);
    }

    #[test]
    fn dropping_the_handle_retires_the_key() {
        let registry = LoaderRegistry::new();
        let handle = registry.register();
        let key = handle.key();
        assert_ne!(key, LoaderKey::BOOT);
        assert!(registry.is_live(key));
        assert_eq!(registry.live_count(), 2);

        drop(handle);
        assert!(!registry.is_live(key));
        assert_eq!(registry.epoch(), 1);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn reused_slots_get_fresh_identities() {
        let registry = LoaderRegistry::new();
        let first = registry.register().key();
        let second = registry.register();
        assert_eq!(second.key().slot(), first.slot());
        assert_ne!(second.key(), first);
        assert!(!registry.is_live(first));
        assert!(registry.is_live(second.key()));
        assert_eq!(registry.capacity(), 2);
    }

    #[test]
    fn keys_from_another_registry_are_not_live_here() {
        let registry = LoaderRegistry::new();
        let other = LoaderRegistry::new();
        let handle = other.register();
        assert!(other.is_live(handle.key()));
        assert!(!registry.is_live(handle.key()));
    }
}
