//! Durable counter storage.
//!
//! Two logical relations are kept: `sites(id, name, created_at)` and
//! `counters(site_id, total, unique)`. Request handling only reads them; the
//! sync worker is the single writer of `counters`, always through
//! [`CounterStore::apply_batch`].

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::site::{Counts, Site, SiteId};

pub use memory::MemoryStore;
#[cfg(feature = "redb")]
pub use self::redb::RedbStore;

/// Deltas committed together by one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushBatch {
    deltas: BTreeMap<SiteId, Counts>,
}

impl FlushBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the site's entry, merging with any existing one.
    pub fn insert(&mut self, site: SiteId, delta: Counts) {
        *self.deltas.entry(site).or_default() += delta;
    }

    pub fn get(&self, site: &SiteId) -> Option<Counts> {
        self.deltas.get(site).copied()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Sum of every delta in the batch.
    pub fn sum(&self) -> Counts {
        self.deltas
            .values()
            .fold(Counts::ZERO, |acc, delta| acc + *delta)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SiteId, &Counts)> {
        self.deltas.iter()
    }
}

impl FromIterator<(SiteId, Counts)> for FlushBatch {
    fn from_iter<I: IntoIterator<Item = (SiteId, Counts)>>(iter: I) -> Self {
        let mut batch = FlushBatch::new();
        for (site, delta) in iter {
            batch.insert(site, delta);
        }
        batch
    }
}

/// Persistent, crash-safe store of cumulative counts.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Creates the site row and a zeroed counters row if absent.
    ///
    /// Returns `true` when the site was created by this call.
    async fn ensure(&self, site: &Site) -> Result<bool>;

    /// Looks up a registered site.
    async fn site(&self, id: &SiteId) -> Result<Option<Site>>;

    /// Reads the cumulative counts, `None` if the site has no counters row.
    async fn read(&self, id: &SiteId) -> Result<Option<Counts>>;

    /// Adds every delta in `batch` as one all-or-nothing transaction.
    ///
    /// Sites without a counters row get one created at zero first.
    async fn apply_batch(&self, batch: &FlushBatch) -> Result<()>;
}

/// Opens the backend selected by `config`.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "redb")]
        StoreBackend::Redb => Ok(Arc::new(RedbStore::open(&config.path)?)),
        #[cfg(not(feature = "redb"))]
        StoreBackend::Redb => Err(crate::error::Error::InvalidConfig(
            "store.backend = \"redb\" requires the `redb` feature".to_string(),
        )),
    }
}
