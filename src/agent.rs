//! Host-facing facade: one rule handle, one loader registry, one cache.
//!
//! The host calls [`Agent::on_class_load`] from its class-file load hook and rewrites the
//! class only when the returned entry is a candidate. A process that wants a global agent
//! installs it once with [`install`] and reaches it later through [`installed`].

use std::sync::{Arc, OnceLock};

use crate::cache::{ClassEntry, ClassInfoCache, DEFAULT_CAPACITY};
use crate::loader::{LoaderHandle, LoaderKey, LoaderRegistry};
use crate::rules::{RuleSet, SharedRules};

pub struct Agent {
    rules: Arc<SharedRules>,
    loaders: Arc<LoaderRegistry>,
    cache: ClassInfoCache,
}

impl Agent {
    pub fn new(rules: RuleSet) -> Self {
        Self::with_cache_capacity(rules, DEFAULT_CAPACITY)
    }

    pub fn with_cache_capacity(rules: RuleSet, capacity: usize) -> Self {
        let rules = Arc::new(SharedRules::new(rules));
        let loaders = LoaderRegistry::new();
        let cache = ClassInfoCache::with_capacity(Arc::clone(&rules), Arc::clone(&loaders), capacity);
        Self {
            rules,
            loaders,
            cache,
        }
    }

    /// Key for a loader the host has not seen before. Keep the handle as long as the loader
    /// lives.
    pub fn register_loader(&self) -> LoaderHandle {
        self.loaders.register()
    }

    /// Decides a class being defined. `class_name` is `None` for hidden and anonymous
    /// classes.
    pub fn on_class_load(&self, loader: LoaderKey, class_name: Option<&str>, bytes: &[u8]) -> Arc<ClassEntry> {
        match class_name {
            Some(name) => self.cache.get_or_compute(loader, name, || bytes),
            None => self.cache.compute_anonymous(bytes),
        }
    }

    pub fn on_class_redefine(&self, loader: LoaderKey, class_name: &str, bytes: &[u8]) -> Arc<ClassEntry> {
        self.cache.redefine(loader, class_name, || bytes)
    }

    /// Installs new rules. Cached classes are re-decided the next time they are seen.
    pub fn replace_rules(&self, rules: RuleSet) -> u64 {
        self.rules.replace(rules)
    }

    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.current()
    }

    pub fn cache(&self) -> &ClassInfoCache {
        &self.cache
    }

    pub fn loaders(&self) -> &Arc<LoaderRegistry> {
        &self.loaders
    }
}

static AGENT: OnceLock<Agent> = OnceLock::new();

/// Makes `agent` the process-wide agent. Fails, handing the agent back, when one is
/// already installed.
pub fn install(agent: Agent) -> Result<&'static Agent, Agent> {
    let mut pending = Some(agent);
    let installed = AGENT.get_or_init(|| {
        log::info!("installing process-wide agent");
        pending.take().unwrap_or_else(|| Agent::new(RuleSet::default()))
    });
    match pending {
        None => Ok(installed),
        Some(agent) => Err(agent),
    }
}

pub fn installed() -> Option<&'static Agent> {
    AGENT.get()
}
