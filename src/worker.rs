//! The sync worker: moves buffered deltas into the durable store.
//!
//! A flush takes the dirty set, drains each listed site's buffer, drops the
//! empty deltas, and commits the rest in one [`CounterStore::apply_batch`].
//! If the commit fails every drained delta is restored into the buffer and
//! its site marked dirty again, so the next flush retries it.
//!
//! Flushes never overlap. The scheduled loop awaits each flush before
//! waiting for the next tick, and a manual [`SyncWorker::flush`] queues
//! behind one already running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::buffer::BufferStore;
use crate::error::Result;
use crate::site::SiteId;
use crate::stats::Stats;
use crate::store::{CounterStore, FlushBatch};

/// What one flush committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Sites whose delta was committed.
    pub sites: usize,
    /// Sum of committed `total` deltas.
    pub visits: u64,
    /// Sum of committed `unique` deltas.
    pub uniques: u64,
    /// Dirty sites whose drained delta was empty.
    pub skipped: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.sites == 0
    }
}

/// Drains the buffer into the store, on demand or on a schedule.
pub struct SyncWorker {
    buffer: Arc<dyn BufferStore>,
    store: Arc<dyn CounterStore>,
    stats: Arc<Stats>,
    flight: Mutex<()>,
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker").finish_non_exhaustive()
    }
}

impl SyncWorker {
    pub fn new(
        buffer: Arc<dyn BufferStore>,
        store: Arc<dyn CounterStore>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            buffer,
            store,
            stats,
            flight: Mutex::new(()),
        }
    }

    /// Runs one flush, waiting for any flush already in progress.
    ///
    /// On a commit failure the drained deltas are back in the buffer when
    /// this returns the error.
    pub async fn flush(&self) -> Result<FlushReport> {
        let _flight = self.flight.lock().await;

        let dirty = match self.buffer.take_dirty().await {
            Ok(dirty) => dirty,
            Err(err) => {
                self.stats.flush_failures.inc();
                return Err(err);
            }
        };

        let mut batch = FlushBatch::new();
        let mut report = FlushReport::default();
        for site in dirty {
            match self.buffer.drain_reset(&site).await {
                Ok(delta) if delta.is_zero() => report.skipped += 1,
                Ok(delta) => batch.insert(site, delta),
                Err(err) => {
                    // Nothing was drained; leave the delta for the next tick.
                    warn!(site = %site, error = %err, "drain failed, will retry");
                    self.remark(&site).await;
                }
            }
        }

        if batch.is_empty() {
            self.stats.flushes.inc();
            return Ok(report);
        }

        if let Err(err) = self.store.apply_batch(&batch).await {
            self.stats.flush_failures.inc();
            error!(sites = batch.len(), error = %err, "counter commit failed, restoring deltas");
            self.restore(&batch).await;
            return Err(err);
        }

        let sum = batch.sum();
        report.sites = batch.len();
        report.visits = sum.total;
        report.uniques = sum.unique;

        self.stats.flushes.inc();
        self.stats.sites_flushed.add(report.sites as u64);
        self.stats.visits_flushed.add(report.visits);
        self.stats.uniques_flushed.add(report.uniques);
        debug!(
            sites = report.sites,
            visits = report.visits,
            uniques = report.uniques,
            skipped = report.skipped,
            "flushed"
        );
        Ok(report)
    }

    async fn restore(&self, batch: &FlushBatch) {
        for (site, delta) in batch.iter() {
            if let Err(err) = self.buffer.restore(site, *delta).await {
                error!(site = %site, delta = %delta, error = %err, "lost drained delta");
                continue;
            }
            self.remark(site).await;
        }
    }

    async fn remark(&self, site: &SiteId) {
        if let Err(err) = self.buffer.mark_dirty(site).await {
            warn!(site = %site, error = %err, "could not re-mark site dirty");
        }
    }

    /// Starts flushing every `interval` on the current tokio runtime.
    ///
    /// The first flush happens one interval after the call. Ticks missed
    /// while a slow flush runs are delayed, not replayed in a burst. Dropping
    /// the returned handle stops the loop as if
    /// [`shutdown`](SyncHandle::shutdown) had been called.
    pub fn spawn(self: Arc<Self>, interval: Duration, flush_on_shutdown: bool) -> SyncHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let interval = interval.max(Duration::from_millis(1));

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(interval_ms = interval.as_millis() as u64, "sync worker started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.flush().await {
                            error!(error = %err, "scheduled flush failed");
                        }
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }

            let last = if flush_on_shutdown {
                Some(self.flush().await)
            } else {
                None
            };
            info!("sync worker stopped");
            last.transpose()
        });

        SyncHandle { shutdown, join }
    }
}

/// Control handle for a running [`SyncWorker`] loop.
#[derive(Debug)]
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<Result<Option<FlushReport>>>,
}

impl SyncHandle {
    /// Stops the loop and waits for it to exit.
    ///
    /// A flush already running completes first. Returns the final flush's
    /// report when the worker was spawned with `flush_on_shutdown`.
    pub async fn shutdown(self) -> Result<Option<FlushReport>> {
        // Err only when the task already exited.
        let _ = self.shutdown.send(true);
        self.join.await?
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Field, MemoryBuffer};
    use crate::counters::Observable;
    use crate::error::Error;
    use crate::site::{Counts, Site};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn site(id: &str) -> SiteId {
        SiteId::new(id).unwrap()
    }

    /// Store whose commits fail while `failing` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl CounterStore for FlakyStore {
        async fn ensure(&self, site: &Site) -> Result<bool> {
            self.inner.ensure(site).await
        }

        async fn site(&self, id: &SiteId) -> Result<Option<Site>> {
            self.inner.site(id).await
        }

        async fn read(&self, id: &SiteId) -> Result<Option<Counts>> {
            self.inner.read(id).await
        }

        async fn apply_batch(&self, batch: &FlushBatch) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::backend("flaky", "connection refused"));
            }
            self.inner.apply_batch(batch).await
        }
    }

    struct Fixture {
        buffer: Arc<MemoryBuffer>,
        store: Arc<FlakyStore>,
        stats: Arc<Stats>,
        worker: Arc<SyncWorker>,
    }

    fn fixture() -> Fixture {
        let buffer = Arc::new(MemoryBuffer::new());
        let store = Arc::new(FlakyStore::default());
        let stats = Arc::new(Stats::new());
        let worker = Arc::new(SyncWorker::new(
            buffer.clone(),
            store.clone(),
            stats.clone(),
        ));
        Fixture {
            buffer,
            store,
            stats,
            worker,
        }
    }

    async fn bump(buffer: &MemoryBuffer, s: &SiteId, total: u64, unique: u64) {
        buffer.increment(s, Field::Total, total).await.unwrap();
        buffer.increment(s, Field::Unique, unique).await.unwrap();
        buffer.mark_dirty(s).await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_moves_deltas() {
        let f = fixture();
        let a = site("a");
        let b = site("b");
        bump(&f.buffer, &a, 5, 3).await;
        bump(&f.buffer, &b, 1, 1).await;

        let report = f.worker.flush().await.unwrap();
        assert_eq!(
            report,
            FlushReport {
                sites: 2,
                visits: 6,
                uniques: 4,
                skipped: 0
            }
        );
        assert_eq!(f.store.read(&a).await.unwrap(), Some(Counts::new(5, 3)));
        assert_eq!(f.buffer.peek(&a).await.unwrap(), Counts::ZERO);
        assert!(!f.buffer.is_dirty(&a).await.unwrap());
        assert_eq!(f.stats.visits_flushed.value(), 6);
        assert_eq!(f.stats.sites_flushed.value(), 2);
        assert_eq!(f.stats.uniques_flushed.value(), 4);
    }

    #[tokio::test]
    async fn test_flush_skips_empty_deltas() {
        let f = fixture();
        let a = site("a");
        f.buffer.mark_dirty(&a).await.unwrap();

        let report = f.worker.flush().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(f.store.read(&a).await.unwrap(), None);
        assert_eq!(f.stats.flushes.value(), 1);
    }

    #[tokio::test]
    async fn test_nothing_dirty_is_a_noop() {
        let f = fixture();
        assert_eq!(f.worker.flush().await.unwrap(), FlushReport::default());
    }

    #[tokio::test]
    async fn test_failed_commit_restores_deltas() {
        let f = fixture();
        let a = site("a");
        bump(&f.buffer, &a, 5, 3).await;

        f.store.failing.store(true, Ordering::SeqCst);
        assert!(f.worker.flush().await.is_err());
        assert_eq!(f.buffer.peek(&a).await.unwrap(), Counts::new(5, 3));
        assert!(f.buffer.is_dirty(&a).await.unwrap());
        assert_eq!(f.store.read(&a).await.unwrap(), None);
        assert_eq!(f.stats.flush_failures.value(), 1);

        // Increments between the failure and the retry are kept too.
        bump(&f.buffer, &a, 2, 1).await;
        f.store.failing.store(false, Ordering::SeqCst);
        let report = f.worker.flush().await.unwrap();
        assert_eq!(report.visits, 7);
        assert_eq!(f.store.read(&a).await.unwrap(), Some(Counts::new(7, 4)));
        assert_eq!(f.buffer.peek(&a).await.unwrap(), Counts::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_flushes() {
        let f = fixture();
        let a = site("a");
        let handle = f.worker.clone().spawn(Duration::from_millis(100), false);

        bump(&f.buffer, &a, 3, 1).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.store.read(&a).await.unwrap(), Some(Counts::new(3, 1)));

        bump(&f.buffer, &a, 2, 0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.store.read(&a).await.unwrap(), Some(Counts::new(5, 1)));

        assert_eq!(handle.shutdown().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_failure_keeps_running() {
        let f = fixture();
        let a = site("a");
        f.store.failing.store(true, Ordering::SeqCst);
        let handle = f.worker.clone().spawn(Duration::from_millis(100), false);

        bump(&f.buffer, &a, 4, 2).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(f.stats.flush_failures.value() >= 1);
        assert!(!handle.is_finished());

        f.store.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.store.read(&a).await.unwrap(), Some(Counts::new(4, 2)));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_runs_final_flush() {
        let f = fixture();
        let a = site("a");
        let handle = f.worker.clone().spawn(Duration::from_secs(3600), true);

        bump(&f.buffer, &a, 9, 4).await;
        let last = handle.shutdown().await.unwrap().unwrap();
        assert_eq!(last.visits, 9);
        assert_eq!(f.store.read(&a).await.unwrap(), Some(Counts::new(9, 4)));
    }

    #[tokio::test]
    async fn test_concurrent_manual_flushes_do_not_double_commit() {
        let f = fixture();
        let a = site("a");
        bump(&f.buffer, &a, 10, 5).await;

        let (r1, r2) = tokio::join!(f.worker.flush(), f.worker.flush());
        let committed = r1.unwrap().visits + r2.unwrap().visits;
        assert_eq!(committed, 10);
        assert_eq!(f.store.read(&a).await.unwrap(), Some(Counts::new(10, 5)));
    }
}
