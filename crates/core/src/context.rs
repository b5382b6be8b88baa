//! Read-only capabilities handed to every dedup session.

use std::sync::Arc;

use crate::cache::ContentAddressableCache;
use crate::config::DedupConfig;
use crate::lease::Ledger;

/// Configuration, cache, and lease ledger shared by all sessions.
///
/// Cheap to clone; sessions take their own copy.
#[derive(Clone)]
pub struct DedupContext {
    config: Arc<DedupConfig>,
    cache: Arc<dyn ContentAddressableCache>,
    ledger: Ledger,
}

impl DedupContext {
    pub fn new(config: DedupConfig, cache: Arc<dyn ContentAddressableCache>) -> Self {
        Self { config: Arc::new(config), cache, ledger: Ledger::new() }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn cache(&self) -> &dyn ContentAddressableCache {
        self.cache.as_ref()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

impl std::fmt::Debug for DedupContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupContext")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}
