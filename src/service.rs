//! The assembled counting service.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::buffer::{BufferStore, MemoryBuffer};
use crate::config::Config;
use crate::dedup::{Deduplicator, SketchDeduplicator};
use crate::error::Result;
use crate::ingest::{IngestOutcome, Ingestor};
use crate::read::LiveReader;
use crate::site::{Counts, Site, SiteId};
use crate::snapshot::SiteSnapshot;
use crate::stats::Stats;
use crate::store::{open_store, CounterStore};
use crate::worker::{FlushReport, SyncHandle, SyncWorker};

/// Every component wired together from one [`Config`].
///
/// Components are shared by `Arc`; nothing is global. Scheduled flushing
/// starts only when [`start`](Self::start) is called.
///
/// ```rust
/// use hitcount::{Config, Counts, HitCounter, SiteId};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let counter = HitCounter::open(Config::default()).unwrap();
/// let site = SiteId::new("abc123").unwrap();
/// counter.register_site(site.clone(), "Example").await.unwrap();
///
/// counter.record(&site, "203.0.113.7", "Mozilla/5.0").await;
/// counter.record(&site, "203.0.113.7", "Mozilla/5.0").await;
/// assert_eq!(counter.live_count(&site).await, Counts::new(2, 1));
///
/// counter.flush().await.unwrap();
/// assert_eq!(counter.live_count(&site).await, Counts::new(2, 1));
/// # });
/// ```
pub struct HitCounter {
    config: Config,
    buffer: Arc<dyn BufferStore>,
    dedup: Arc<dyn Deduplicator>,
    store: Arc<dyn CounterStore>,
    stats: Arc<Stats>,
    ingestor: Ingestor,
    reader: LiveReader,
    worker: Arc<SyncWorker>,
}

impl std::fmt::Debug for HitCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitCounter")
            .field("config", &self.config)
            .field("ingestor", &self.ingestor)
            .finish_non_exhaustive()
    }
}

impl HitCounter {
    /// Validates `config` and builds the in-process buffer and sketches on
    /// top of the configured store.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config.store)?;
        let dedup = Arc::new(SketchDeduplicator::new());
        info!(
            backend = ?config.store.backend,
            unknown_site = ?config.ingest.unknown_site,
            interval_ms = config.sync.interval_ms,
            "hit counter ready"
        );
        Ok(Self::with_components(
            config,
            Arc::new(MemoryBuffer::new()),
            dedup,
            store,
        ))
    }

    /// Wires caller-supplied backends. `config.store` is ignored.
    pub fn with_components(
        config: Config,
        buffer: Arc<dyn BufferStore>,
        dedup: Arc<dyn Deduplicator>,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        let stats = Arc::new(Stats::new());
        let ingestor = Ingestor::new(
            Arc::clone(&buffer),
            Arc::clone(&dedup),
            Arc::clone(&store),
            Arc::clone(&stats),
            config.ingest.unknown_site,
        );
        let reader = LiveReader::new(Arc::clone(&buffer), Arc::clone(&store));
        let worker = Arc::new(SyncWorker::new(
            Arc::clone(&buffer),
            Arc::clone(&store),
            Arc::clone(&stats),
        ));

        Self {
            config,
            buffer,
            dedup,
            store,
            stats,
            ingestor,
            reader,
            worker,
        }
    }

    /// Creates the site and its zeroed counters if absent.
    ///
    /// Returns `true` if this call created the site.
    pub async fn register_site(&self, id: SiteId, name: impl Into<String>) -> Result<bool> {
        let site = Site::new(id, name);
        let created = self.store.ensure(&site).await?;
        self.ingestor.mark_known(&site.id);
        if created {
            info!(site = %site.id, name = %site.name, "site registered");
        } else {
            debug!(site = %site.id, "site already registered");
        }
        Ok(created)
    }

    pub async fn site(&self, id: &SiteId) -> Result<Option<Site>> {
        self.store.site(id).await
    }

    /// Records one visit. Never blocks on a flush.
    pub async fn record(
        &self,
        site: &SiteId,
        client_address: &str,
        user_agent: &str,
    ) -> IngestOutcome {
        self.ingestor.record(site, client_address, user_agent).await
    }

    /// Durable plus buffered counts.
    pub async fn live_count(&self, site: &SiteId) -> Counts {
        self.reader.live_count(site).await
    }

    /// Live counts of several sites, in the order given.
    pub async fn live_snapshot(&self, sites: &[SiteId]) -> Vec<SiteSnapshot> {
        let mut out = Vec::with_capacity(sites.len());
        for site in sites {
            out.push(SiteSnapshot::new(site.clone(), self.live_count(site).await));
        }
        out
    }

    /// The sketch's distinct-visitor estimate since this process started.
    pub async fn unique_estimate(&self, site: &SiteId) -> Option<u64> {
        match self.dedup.estimate(site).await {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(site = %site, error = %err, "estimate unavailable");
                None
            }
        }
    }

    /// Flushes now, outside the schedule.
    pub async fn flush(&self) -> Result<FlushReport> {
        self.worker.flush().await
    }

    /// Starts scheduled flushing with the configured interval.
    pub fn start(&self) -> SyncHandle {
        Arc::clone(&self.worker).spawn(
            self.config.sync.interval(),
            self.config.sync.flush_on_shutdown,
        )
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<dyn BufferStore> {
        &self.buffer
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}
