//! Sharded atomic counters backing the volatile buffer and process stats.
//!
//! Every counter here spreads its updates across [`NUM_COMPONENTS`]
//! cache-padded atomic slots. A writer touches only the slot assigned to its
//! thread, so thousands of concurrent ingestion tasks can bump the same
//! site's counter without bouncing a single cache line between cores.
//!
//! # Architecture
//!
//! ```text
//!                          ┌─────────────────────────────────────┐
//!                          │          Sharded counter            │
//!                          ├─────────────────────────────────────┤
//!   Worker 0 ──add──►      │ [Slot 0] ████████ (CachePadded)     │
//!   Worker 1 ──add──►      │ [Slot 1] ████████ (CachePadded)     │
//!        ...               │    ...                              │
//!   Worker 63 ─add──►      │ [Slot 63] ███████ (CachePadded)     │
//!                          └─────────────────────────────────────┘
//!                                          │
//!                                          ▼
//!                          value() sums, take() swaps every slot to 0
//! ```
//!
//! Slots are handed out round-robin to threads on first use. Async tasks may
//! migrate between runtime threads; that only changes which slot an update
//! lands in, never whether it is counted.
//!
//! # Drain semantics
//!
//! [`delta::DeltaCounter::take`] empties the counter with one atomic `swap(0)`
//! per slot. An increment is a single `fetch_add` on one slot, so it is
//! observed by exactly one swap: either the current drain or a later one.
//! The sum returned by a drain is therefore never double counted and nothing
//! is lost, even though the slots are not swapped as one snapshot.

pub mod delta;
pub mod monotone;

use atomic_traits::Atomic;
use std::{
    fmt::{Debug, Display},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Number of shards (slots) used by each counter.
///
/// Each slot is cache-line padded, so a counter costs about
/// `64 slots × 64 bytes = 4 KiB`.
pub(crate) const NUM_COMPONENTS: usize = 64;

static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot index assigned to the current thread, stable for its lifetime.
    pub(crate) static THREAD_SLOT_INDEX: usize = next_slot_id();
}

/// Assigns the next slot index in `[0, NUM_COMPONENTS)`.
///
/// Relaxed ordering is enough: two threads sharing a slot costs some
/// contention, never correctness.
fn next_slot_id() -> usize {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed) % NUM_COMPONENTS
}

/// A named counter whose current value can be read for export.
///
/// Implemented by the process [`Stats`](crate::stats::Stats) counters and
/// consumed by the observers.
pub trait Observable: Debug + Send + Sync {
    /// Metric name, empty when unnamed.
    fn name(&self) -> &str;

    /// Current aggregated value across all shards.
    fn value(&self) -> u64;
}

impl Display for dyn Observable + '_ {
    /// Formats the counter as `name:value` if named, or just `value` otherwise.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.name().is_empty() {
            write!(f, "{}:{}", self.name(), self.value())
        } else {
            write!(f, "{}", self.value())
        }
    }
}

/// Access to the current thread's shard of a sharded counter.
pub trait GetComponentCounter {
    /// The atomic type used for individual shards.
    type CounterType: Atomic;

    /// Returns the shard selected by `THREAD_SLOT_INDEX`.
    fn get_component_counter(&self) -> &Self::CounterType;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::monotone::Monotone;

    #[test]
    fn test_slot_ids_in_range() {
        for _ in 0..(NUM_COMPONENTS * 3) {
            assert!(next_slot_id() < NUM_COMPONENTS);
        }
    }

    #[test]
    fn test_dyn_display_named() {
        let counter = Monotone::new().with_name("visits");
        counter.add(3);
        assert_eq!(format!("{}", &counter as &dyn Observable), "visits:3");
    }

    #[test]
    fn test_dyn_display_unnamed() {
        let counter = Monotone::new();
        counter.add(7);
        assert_eq!(format!("{}", &counter as &dyn Observable), "7");
    }
}
