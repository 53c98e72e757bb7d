//! Volatile per-site buffers and the dirty-site set.
//!
//! Ingestion adds to a site's buffered delta and marks the site dirty. The
//! sync worker takes the dirty set, drains each listed buffer, and commits the
//! drained deltas. Draining removes the site's entry, so memory is bounded by
//! the sites touched since the last flush. Nothing here survives a restart.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::counters::delta::DeltaCounter;
use crate::error::Result;
use crate::site::{Counts, SiteId};

/// Which half of a buffered delta to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Total,
    Unique,
}

/// Shared store of buffered deltas and dirty marks.
///
/// `drain_reset` is the only point where writers and the flusher meet. It
/// must hand every increment to exactly one drain.
#[async_trait]
pub trait BufferStore: Send + Sync + 'static {
    /// Atomically adds `delta` to one field of the site's buffer.
    async fn increment(&self, site: &SiteId, field: Field, delta: u64) -> Result<()>;

    /// Atomically reads and zeroes the site's buffer.
    async fn drain_reset(&self, site: &SiteId) -> Result<Counts>;

    /// Reads the site's buffer without resetting it.
    async fn peek(&self, site: &SiteId) -> Result<Counts>;

    /// Adds a previously drained delta back, after a failed commit.
    async fn restore(&self, site: &SiteId, delta: Counts) -> Result<()>;

    /// Adds the site to the dirty set. Idempotent.
    async fn mark_dirty(&self, site: &SiteId) -> Result<()>;

    /// Returns the dirty set and clears it.
    async fn take_dirty(&self) -> Result<Vec<SiteId>>;

    /// `true` if the site is currently marked dirty.
    async fn is_dirty(&self, site: &SiteId) -> Result<bool>;
}

/// Buffered delta of one site.
#[derive(Debug, Default)]
struct SiteBuffer {
    total: DeltaCounter,
    unique: DeltaCounter,
}

impl SiteBuffer {
    fn counter(&self, field: Field) -> &DeltaCounter {
        match field {
            Field::Total => &self.total,
            Field::Unique => &self.unique,
        }
    }
}

/// In-process [`BufferStore`] built on sharded delta counters.
///
/// Each buffered site costs two sharded counters (16 KiB with 128-byte
/// padding) until its next drain.
///
/// Increments run while holding the map's shard guard for the entry, and a
/// drain removes the entry under the shard's write lock. An increment
/// therefore lands either in the removed entry, before the drain reads it,
/// or in a fresh entry left for the next drain.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    sites: DashMap<SiteId, Box<SiteBuffer>>,
    dirty: Mutex<HashSet<SiteId>>,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sites holding a buffered, not yet drained delta.
    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    /// Runs `f` on the site's buffer, creating it if needed, with the
    /// entry's shard guard held.
    fn with_slot(&self, site: &SiteId, f: impl FnOnce(&SiteBuffer)) {
        if let Some(slot) = self.sites.get(site) {
            f(slot.value());
            return;
        }
        f(self.sites.entry(site.clone()).or_default().value());
    }
}

#[async_trait]
impl BufferStore for MemoryBuffer {
    async fn increment(&self, site: &SiteId, field: Field, delta: u64) -> Result<()> {
        self.with_slot(site, |slot| slot.counter(field).add(delta));
        Ok(())
    }

    async fn drain_reset(&self, site: &SiteId) -> Result<Counts> {
        Ok(match self.sites.remove(site) {
            Some((_, slot)) => Counts::new(slot.total.take(), slot.unique.take()),
            None => Counts::ZERO,
        })
    }

    async fn peek(&self, site: &SiteId) -> Result<Counts> {
        Ok(match self.sites.get(site) {
            Some(slot) => Counts::new(slot.total.value(), slot.unique.value()),
            None => Counts::ZERO,
        })
    }

    async fn restore(&self, site: &SiteId, delta: Counts) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        self.with_slot(site, |slot| {
            slot.total.add(delta.total);
            slot.unique.add(delta.unique);
        });
        Ok(())
    }

    async fn mark_dirty(&self, site: &SiteId) -> Result<()> {
        self.dirty.lock().insert(site.clone());
        Ok(())
    }

    async fn take_dirty(&self) -> Result<Vec<SiteId>> {
        let taken = std::mem::take(&mut *self.dirty.lock());
        let mut sites: Vec<SiteId> = taken.into_iter().collect();
        sites.sort();
        Ok(sites)
    }

    async fn is_dirty(&self, site: &SiteId) -> Result<bool> {
        Ok(self.dirty.lock().contains(site))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn site(id: &str) -> SiteId {
        SiteId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_increment_and_peek() {
        let buffer = MemoryBuffer::new();
        let s = site("abc123");
        buffer.increment(&s, Field::Total, 1).await.unwrap();
        buffer.increment(&s, Field::Total, 1).await.unwrap();
        buffer.increment(&s, Field::Unique, 1).await.unwrap();

        assert_eq!(buffer.peek(&s).await.unwrap(), Counts::new(2, 1));
        // peek does not reset
        assert_eq!(buffer.peek(&s).await.unwrap(), Counts::new(2, 1));
    }

    #[tokio::test]
    async fn test_drain_reset() {
        let buffer = MemoryBuffer::new();
        let s = site("abc123");
        buffer.increment(&s, Field::Total, 5).await.unwrap();
        buffer.increment(&s, Field::Unique, 3).await.unwrap();

        assert_eq!(buffer.drain_reset(&s).await.unwrap(), Counts::new(5, 3));
        assert_eq!(buffer.drain_reset(&s).await.unwrap(), Counts::ZERO);
        assert_eq!(buffer.peek(&s).await.unwrap(), Counts::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_site_reads_zero() {
        let buffer = MemoryBuffer::new();
        let s = site("nobody");
        assert_eq!(buffer.peek(&s).await.unwrap(), Counts::ZERO);
        assert_eq!(buffer.drain_reset(&s).await.unwrap(), Counts::ZERO);
        assert_eq!(buffer.site_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_releases_entries() {
        let buffer = MemoryBuffer::new();
        for i in 0..100 {
            let s = site(&format!("site-{i}"));
            buffer.increment(&s, Field::Total, 1).await.unwrap();
            buffer.mark_dirty(&s).await.unwrap();
        }
        assert_eq!(buffer.site_count(), 100);

        for s in buffer.take_dirty().await.unwrap() {
            assert_eq!(buffer.drain_reset(&s).await.unwrap(), Counts::new(1, 0));
        }
        assert_eq!(buffer.site_count(), 0);

        // A later increment starts a fresh entry.
        let s = site("site-3");
        buffer.increment(&s, Field::Unique, 1).await.unwrap();
        assert_eq!(buffer.peek(&s).await.unwrap(), Counts::new(0, 1));
        assert_eq!(buffer.site_count(), 1);
    }

    #[tokio::test]
    async fn test_restore_adds_back() {
        let buffer = MemoryBuffer::new();
        let s = site("abc123");
        buffer.increment(&s, Field::Total, 2).await.unwrap();
        let drained = buffer.drain_reset(&s).await.unwrap();
        buffer.increment(&s, Field::Total, 1).await.unwrap();
        buffer.restore(&s, drained).await.unwrap();
        assert_eq!(buffer.peek(&s).await.unwrap(), Counts::new(3, 0));
    }

    #[tokio::test]
    async fn test_dirty_set_idempotent() {
        let buffer = MemoryBuffer::new();
        let a = site("a");
        let b = site("b");
        buffer.mark_dirty(&b).await.unwrap();
        buffer.mark_dirty(&a).await.unwrap();
        buffer.mark_dirty(&a).await.unwrap();

        assert!(buffer.is_dirty(&a).await.unwrap());
        assert_eq!(buffer.take_dirty().await.unwrap(), vec![a.clone(), b]);
        assert!(buffer.take_dirty().await.unwrap().is_empty());
        assert!(!buffer.is_dirty(&a).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_drain_never_double_counts() {
        const WRITERS: usize = 8;
        const PER_WRITER: u64 = 5_000;

        let buffer = Arc::new(MemoryBuffer::new());
        let s = site("hot");
        let done = Arc::new(AtomicBool::new(false));

        let drainer = {
            let buffer = Arc::clone(&buffer);
            let done = Arc::clone(&done);
            let s = s.clone();
            tokio::spawn(async move {
                let mut drained = Counts::ZERO;
                while !done.load(Ordering::Acquire) {
                    drained += buffer.drain_reset(&s).await.unwrap();
                    tokio::task::yield_now().await;
                }
                drained
            })
        };

        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                let s = s.clone();
                tokio::spawn(async move {
                    for i in 0..PER_WRITER {
                        buffer.increment(&s, Field::Total, 1).await.unwrap();
                        if i % 2 == 0 {
                            buffer.increment(&s, Field::Unique, 1).await.unwrap();
                        }
                    }
                })
            })
            .collect();

        for w in writers {
            w.await.unwrap();
        }
        done.store(true, Ordering::Release);

        let drained = drainer.await.unwrap() + buffer.drain_reset(&s).await.unwrap();
        assert_eq!(drained.total, WRITERS as u64 * PER_WRITER);
        assert_eq!(drained.unique, WRITERS as u64 * PER_WRITER / 2);
    }
}
