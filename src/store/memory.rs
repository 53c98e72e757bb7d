//! In-process [`CounterStore`] for tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CounterStore, FlushBatch};
use crate::error::Result;
use crate::site::{Counts, Site, SiteId};

/// Two maps behind reader-writer locks, mirroring the `sites` and
/// `counters` relations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sites: RwLock<HashMap<SiteId, Site>>,
    counters: RwLock<HashMap<SiteId, Counts>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sites with a counters row.
    pub fn counter_rows(&self) -> usize {
        self.counters.read().len()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn ensure(&self, site: &Site) -> Result<bool> {
        let created = {
            let mut sites = self.sites.write();
            if sites.contains_key(&site.id) {
                false
            } else {
                sites.insert(site.id.clone(), site.clone());
                true
            }
        };
        // A counters row may already exist from an unguarded flush.
        self.counters.write().entry(site.id.clone()).or_default();
        Ok(created)
    }

    async fn site(&self, id: &SiteId) -> Result<Option<Site>> {
        Ok(self.sites.read().get(id).cloned())
    }

    async fn read(&self, id: &SiteId) -> Result<Option<Counts>> {
        Ok(self.counters.read().get(id).copied())
    }

    async fn apply_batch(&self, batch: &FlushBatch) -> Result<()> {
        let mut counters = self.counters.write();
        for (site, delta) in batch.iter() {
            *counters.entry(site.clone()).or_default() += *delta;
        }
        Ok(())
    }
}
