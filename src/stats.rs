//! Process-local activity counters.

use crate::counters::monotone::Monotone;
use crate::counters::Observable;
use crate::snapshot::StatsSnapshot;

/// Ingestion and flush activity since the process started.
///
/// Every field is a sharded [`Monotone`], so bumping one from the hot path
/// costs a single uncontended atomic add.
#[derive(Debug)]
pub struct Stats {
    /// Events buffered.
    pub recorded: Monotone,
    /// Events that raised the site's unique count.
    pub new_visitors: Monotone,
    /// Events lost because the buffer was unavailable.
    pub dropped: Monotone,
    /// Events rejected for an unregistered site.
    pub unknown_site: Monotone,
    /// Events admitted as new because deduplication failed.
    pub dedup_fallbacks: Monotone,
    /// Flushes that committed (including empty ones).
    pub flushes: Monotone,
    /// Flushes whose commit failed and were restored.
    pub flush_failures: Monotone,
    /// Per-site deltas committed.
    pub sites_flushed: Monotone,
    /// Total visits committed.
    pub visits_flushed: Monotone,
    /// Total unique-visitor increments committed.
    pub uniques_flushed: Monotone,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            recorded: Monotone::new().with_name("recorded_total"),
            new_visitors: Monotone::new().with_name("new_visitors_total"),
            dropped: Monotone::new().with_name("dropped_total"),
            unknown_site: Monotone::new().with_name("unknown_site_total"),
            dedup_fallbacks: Monotone::new().with_name("dedup_fallbacks_total"),
            flushes: Monotone::new().with_name("flushes_total"),
            flush_failures: Monotone::new().with_name("flush_failures_total"),
            sites_flushed: Monotone::new().with_name("sites_flushed_total"),
            visits_flushed: Monotone::new().with_name("visits_flushed_total"),
            uniques_flushed: Monotone::new().with_name("uniques_flushed_total"),
        }
    }

    /// Every counter, in a stable order, for the observers.
    pub fn observables(&self) -> Vec<&dyn Observable> {
        vec![
            &self.recorded,
            &self.new_visitors,
            &self.dropped,
            &self.unknown_site,
            &self.dedup_fallbacks,
            &self.flushes,
            &self.flush_failures,
            &self.sites_flushed,
            &self.visits_flushed,
            &self.uniques_flushed,
        ]
    }

    /// Captures every counter with the current timestamp.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot::collect_now(self.observables().into_iter())
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
