//! Per-loader memo of parse results and decisions.
//!
//! Entries are keyed by (loader, class name). Each key owns a slot whose `OnceLock` is the
//! admission gate: the first requester parses, concurrent requesters for the same key wait
//! for that parse and then share its result. Parse failures are remembered the same way so
//! a broken class is not re-parsed on every load. An entry decided under older rules is
//! refreshed through a new slot, so the refresh is admitted the same way.
//!
//! Entries hang off their loader's table, so forgetting a retired loader is one removal.
//! Every lookup checks the registry epoch and sweeps retired loaders when it moved.
//!
//! The cache holds at most `capacity` entries. Slots carry the tick of their last use;
//! going over capacity drops the least recently used eighth.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::ClassFormatError;
use crate::filter::FilterDecision;
use crate::header::ClassHeader;
use crate::loader::{LoaderKey, LoaderRegistry};
use crate::outline::ClassInfo;
use crate::rules::{RuleSet, SharedRules};

pub const MIN_CAPACITY: usize = 1 << 4;
pub const MAX_CAPACITY: usize = 1 << 20;
pub const DEFAULT_CAPACITY: usize = 1 << 16;

/// Outcome of looking at one class under one loader.
#[derive(Debug)]
pub struct ClassEntry {
    info: Result<Arc<ClassInfo>, ClassFormatError>,
    decision: FilterDecision,
    rules_generation: u64,
    created: Instant,
}

impl ClassEntry {
    fn resolved(info: Arc<ClassInfo>, decision: FilterDecision, rules_generation: u64) -> Self {
        Self {
            info: Ok(info),
            decision,
            rules_generation,
            created: Instant::now(),
        }
    }

    fn failed(error: ClassFormatError, rules_generation: u64) -> Self {
        Self {
            info: Err(error),
            decision: FilterDecision::NoMatch,
            rules_generation,
            created: Instant::now(),
        }
    }

    /// Always `NoMatch` when the class could not be parsed.
    pub fn decision(&self) -> FilterDecision {
        self.decision
    }

    pub fn info(&self) -> Option<&ClassInfo> {
        self.info.as_deref().ok()
    }

    pub fn header(&self) -> Option<&ClassHeader> {
        self.info().map(ClassInfo::header)
    }

    pub fn error(&self) -> Option<&ClassFormatError> {
        self.info.as_ref().err()
    }

    /// The parsed class, when the rules selected it for instrumentation.
    pub fn candidate(&self) -> Option<&ClassInfo> {
        match self.decision {
            FilterDecision::Include => self.info(),
            FilterDecision::Exclude | FilterDecision::NoMatch => None,
        }
    }

    pub fn rules_generation(&self) -> u64 {
        self.rules_generation
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

#[derive(Debug, Default)]
struct Slot {
    entry: OnceLock<Arc<ClassEntry>>,
    accessed: AtomicU64,
}

#[derive(Debug, Default)]
struct LoaderClasses {
    classes: DashMap<Arc<str>, Arc<Slot>>,
}

impl LoaderClasses {
    /// The slot for `class_name`, and whether this call added it.
    fn slot(&self, class_name: &str) -> (Arc<Slot>, bool) {
        if let Some(slot) = self.classes.get(class_name) {
            return (Arc::clone(slot.value()), false);
        }
        match self.classes.entry(Arc::from(class_name)) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => (Arc::clone(vacant.insert(Arc::default()).value()), true),
        }
    }

    /// Swaps `stale` for an empty slot. Callers that lose the race get the slot the winner
    /// put in, so every refresher of one entry waits on the same gate.
    fn renew(&self, class_name: &str, stale: &Arc<Slot>) -> (Arc<Slot>, bool) {
        match self.classes.entry(Arc::from(class_name)) {
            Entry::Occupied(mut occupied) => {
                if Arc::ptr_eq(occupied.get(), stale) {
                    let renewed = Arc::new(Slot {
                        entry: OnceLock::new(),
                        accessed: AtomicU64::new(stale.accessed.load(Ordering::Relaxed)),
                    });
                    occupied.insert(renewed);
                }
                (Arc::clone(occupied.get()), false)
            }
            Entry::Vacant(vacant) => (Arc::clone(vacant.insert(Arc::default()).value()), true),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    parses: AtomicU64,
    failures: AtomicU64,
    refreshes: AtomicU64,
    uncached: AtomicU64,
    evictions: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub loaders: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub parses: u64,
    pub failures: u64,
    pub refreshes: u64,
    pub uncached: u64,
    pub evictions: u64,
}

pub struct ClassInfoCache {
    rules: Arc<SharedRules>,
    registry: Arc<LoaderRegistry>,
    loaders: DashMap<LoaderKey, Arc<LoaderClasses>>,
    swept_epoch: AtomicU64,
    capacity: usize,
    entries: AtomicUsize,
    ticks: AtomicU64,
    evicting: Mutex<()>,
    counters: Counters,
}

impl ClassInfoCache {
    pub fn new(rules: Arc<SharedRules>, registry: Arc<LoaderRegistry>) -> Self {
        Self::with_capacity(rules, registry, DEFAULT_CAPACITY)
    }

    /// `capacity` is clamped to `MIN_CAPACITY..=MAX_CAPACITY`.
    pub fn with_capacity(rules: Arc<SharedRules>, registry: Arc<LoaderRegistry>, capacity: usize) -> Self {
        let swept_epoch = AtomicU64::new(registry.epoch());
        Self {
            rules,
            registry,
            loaders: DashMap::new(),
            swept_epoch,
            capacity: capacity.clamp(MIN_CAPACITY, MAX_CAPACITY),
            entries: AtomicUsize::new(0),
            ticks: AtomicU64::new(0),
            evicting: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn rules(&self) -> &Arc<SharedRules> {
        &self.rules
    }

    pub fn registry(&self) -> &Arc<LoaderRegistry> {
        &self.registry
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the entry for `class_name` under `loader`, parsing `bytes()` at most once per
    /// key. `bytes` is not called on a hit.
    ///
    /// Entries decided under an older rule generation are re-decided on access; the class is
    /// only parsed again when the new rules need outline detail. Requests for a loader that
    /// is no longer live are answered without being stored.
    pub fn get_or_compute<F, B>(&self, loader: LoaderKey, class_name: &str, bytes: F) -> Arc<ClassEntry>
    where
        F: FnOnce() -> B,
        B: AsRef<[u8]>,
    {
        self.maybe_sweep();
        let rules = self.rules.current();
        let Some(classes) = self.classes_for(loader) else {
            bump(&self.counters.uncached);
            return Arc::new(self.compute(&rules, class_name, bytes().as_ref()));
        };

        let (mut slot, added) = classes.slot(class_name);
        if added {
            self.admitted(&slot);
        }
        let mut supplier = Some(bytes);
        let mut computed = false;
        let mut entry = Arc::clone(slot.entry.get_or_init(|| {
            computed = true;
            bump(&self.counters.misses);
            let owned = supplier.take().map(|f| f());
            let bytes: &[u8] = owned.as_ref().map_or(&[], |b| b.as_ref());
            Arc::new(self.compute(&rules, class_name, bytes))
        }));

        if !computed && entry.rules_generation < rules.generation() {
            let stale = entry;
            let (renewed, added) = classes.renew(class_name, &slot);
            if added {
                self.admitted(&renewed);
            }
            slot = renewed;
            entry = Arc::clone(slot.entry.get_or_init(|| {
                computed = true;
                Arc::new(self.refresh(&rules, class_name, &stale, &mut supplier))
            }));
        }

        if !computed {
            bump(&self.counters.hits);
            self.touch(&slot);
        }
        entry
    }

    /// Hit-only lookup.
    pub fn peek(&self, loader: LoaderKey, class_name: &str) -> Option<Arc<ClassEntry>> {
        let classes = self.loaders.get(&loader).map(|c| Arc::clone(c.value()))?;
        let slot = classes.classes.get(class_name).map(|s| Arc::clone(s.value()))?;
        let entry = slot.entry.get().cloned()?;
        self.touch(&slot);
        Some(entry)
    }

    /// Hit-only lookup under any live loader, for callers that only know the name.
    pub fn find_any(&self, class_name: &str) -> Option<(LoaderKey, Arc<ClassEntry>)> {
        let tables: Vec<LoaderKey> = self.loaders.iter().map(|c| *c.key()).collect();
        tables
            .into_iter()
            .filter(|key| self.registry.is_live(*key))
            .find_map(|key| self.peek(key, class_name).map(|entry| (key, entry)))
    }

    /// Decides a class whose name is unknown (hidden and anonymous classes) from its own
    /// header. Nothing is stored.
    pub fn compute_anonymous(&self, bytes: &[u8]) -> Arc<ClassEntry> {
        bump(&self.counters.uncached);
        let rules = self.rules.current();
        Arc::new(self.evaluate(&rules, None, bytes))
    }

    /// Forgets one class, e.g. before it is redefined. Returns whether it was cached.
    pub fn invalidate(&self, loader: LoaderKey, class_name: &str) -> bool {
        let removed = self
            .loaders
            .get(&loader)
            .map(|c| Arc::clone(c.value()))
            .is_some_and(|classes| classes.classes.remove(class_name).is_some());
        if removed {
            self.forget(1);
        }
        removed
    }

    /// Replaces whatever is cached for a redefined class with the result for its new bytes.
    pub fn redefine<F, B>(&self, loader: LoaderKey, class_name: &str, bytes: F) -> Arc<ClassEntry>
    where
        F: FnOnce() -> B,
        B: AsRef<[u8]>,
    {
        self.invalidate(loader, class_name);
        self.get_or_compute(loader, class_name, bytes)
    }

    /// Drops everything cached for one loader. Returns the number of classes dropped.
    pub fn evict_loader(&self, loader: LoaderKey) -> usize {
        let dropped = self
            .loaders
            .remove(&loader)
            .map_or(0, |(_, classes)| classes.classes.len());
        self.forget(dropped);
        dropped
    }

    /// Drops the tables of every loader the registry no longer considers live. Returns the
    /// number of loaders dropped.
    pub fn sweep(&self) -> usize {
        let epoch = self.registry.epoch();
        let mut dropped = 0;
        let mut classes = 0;
        self.loaders.retain(|key, table| {
            let live = self.registry.is_live(*key);
            if !live {
                dropped += 1;
                classes += table.classes.len();
            }
            live
        });
        self.swept_epoch.fetch_max(epoch, Ordering::AcqRel);
        self.forget(classes);
        if dropped > 0 {
            log::debug!("swept {dropped} retired loaders ({classes} classes)");
        }
        dropped
    }

    pub fn loader_count(&self) -> usize {
        self.loaders.len()
    }

    pub fn len(&self) -> usize {
        self.loaders.iter().map(|c| c.classes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            capacity: self.capacity,
            loaders: self.loader_count(),
            entries: self.len(),
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            parses: load(&self.counters.parses),
            failures: load(&self.counters.failures),
            refreshes: load(&self.counters.refreshes),
            uncached: load(&self.counters.uncached),
            evictions: load(&self.counters.evictions),
        }
    }

    fn classes_for(&self, loader: LoaderKey) -> Option<Arc<LoaderClasses>> {
        if let Some(classes) = self.loaders.get(&loader) {
            return Some(Arc::clone(classes.value()));
        }
        if !self.registry.is_live(loader) {
            return None;
        }
        Some(Arc::clone(self.loaders.entry(loader).or_default().value()))
    }

    fn maybe_sweep(&self) {
        if self.swept_epoch.load(Ordering::Acquire) != self.registry.epoch() {
            self.sweep();
        }
    }

    /// New slots take a fresh tick; hits take the current one.
    fn admitted(&self, slot: &Slot) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        slot.accessed.store(tick, Ordering::Relaxed);
        if self.entries.fetch_add(1, Ordering::AcqRel) + 1 > self.capacity {
            self.evict_least_recent();
        }
    }

    fn touch(&self, slot: &Slot) {
        slot.accessed
            .store(self.ticks.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    fn forget(&self, count: usize) {
        if count > 0 {
            let _ = self
                .entries
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(count)));
        }
    }

    /// Trims the cache to seven eighths of its capacity, oldest ticks first. One thread
    /// trims at a time; others carry on.
    fn evict_least_recent(&self) {
        let Some(_trimming) = self.evicting.try_lock() else {
            return;
        };
        let tables: Vec<(LoaderKey, Arc<LoaderClasses>)> = self
            .loaders
            .iter()
            .map(|c| (*c.key(), Arc::clone(c.value())))
            .collect();
        let mut aged: Vec<(u64, usize, Arc<str>, Arc<Slot>)> = Vec::new();
        for (index, (_, table)) in tables.iter().enumerate() {
            aged.extend(table.classes.iter().map(|class| {
                let slot = Arc::clone(class.value());
                (slot.accessed.load(Ordering::Relaxed), index, Arc::clone(class.key()), slot)
            }));
        }

        let keep = self.capacity - self.capacity / 8;
        if aged.len() <= keep {
            self.entries.store(aged.len(), Ordering::Release);
            return;
        }
        aged.sort_unstable_by_key(|(tick, ..)| *tick);
        let excess = aged.len() - keep;
        let mut removed = 0;
        for (_, index, class_name, slot) in aged.drain(..excess) {
            let (_, table) = &tables[index];
            if table
                .classes
                .remove_if(&class_name, |_, current| Arc::ptr_eq(current, &slot))
                .is_some()
            {
                removed += 1;
            }
        }
        self.forget(removed);
        self.counters
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        log::debug!("evicted {removed} least recently used classes");
    }

    fn compute(&self, rules: &RuleSet, class_name: &str, bytes: &[u8]) -> ClassEntry {
        self.evaluate(rules, Some(class_name), bytes)
    }

    fn evaluate(&self, rules: &RuleSet, class_name: Option<&str>, bytes: &[u8]) -> ClassEntry {
        bump(&self.counters.parses);
        let shown = class_name.unwrap_or("<anonymous>");
        match rules.evaluate(class_name, bytes) {
            Ok((info, decision)) => {
                log::debug!("{shown}: {decision:?}");
                ClassEntry::resolved(Arc::new(info), decision, rules.generation())
            }
            Err(error) => {
                bump(&self.counters.failures);
                if error.is_unsupported_version() {
                    log::debug!("skipping {shown}: {error}");
                } else {
                    log::warn!("cannot parse {shown}: {error}");
                }
                ClassEntry::failed(error, rules.generation())
            }
        }
    }

    fn refresh<F, B>(
        &self,
        rules: &RuleSet,
        class_name: &str,
        stale: &ClassEntry,
        bytes: &mut Option<F>,
    ) -> ClassEntry
    where
        F: FnOnce() -> B,
        B: AsRef<[u8]>,
    {
        bump(&self.counters.refreshes);
        match &stale.info {
            Ok(info) => {
                let by_name = rules.names().decide(class_name);
                if rules.needs_outline(by_name) {
                    let owned = bytes.take().map(|f| f());
                    let bytes: &[u8] = owned.as_ref().map_or(&[], |b| b.as_ref());
                    return self.compute(rules, class_name, bytes);
                }
                let decision = rules.decide_with(by_name, info);
                ClassEntry::resolved(Arc::clone(info), decision, rules.generation())
            }
            Err(error) => ClassEntry::failed(error.clone(), rules.generation()),
        }
    }
}
