//! Drainable delta counter with sharded atomic storage.
//!
//! [`DeltaCounter`] holds the not-yet-flushed part of a site's visit counts.
//! Ingestion only ever adds to it; the sync worker empties it with
//! [`take`](DeltaCounter::take) and folds the result into durable storage.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::counters::{GetComponentCounter, NUM_COMPONENTS, THREAD_SLOT_INDEX};

/// An additive counter that can be atomically drained.
///
/// # Examples
///
/// ```rust
/// use hitcount::counters::delta::DeltaCounter;
///
/// let pending = DeltaCounter::new();
/// pending.add(2);
/// pending.add(3);
/// assert_eq!(pending.value(), 5);
///
/// // Drain returns everything added so far and leaves zero behind.
/// assert_eq!(pending.take(), 5);
/// assert_eq!(pending.value(), 0);
/// ```
pub struct DeltaCounter {
    components: [CachePadded<AtomicU64>; NUM_COMPONENTS],
}

impl GetComponentCounter for DeltaCounter {
    type CounterType = AtomicU64;

    #[inline]
    fn get_component_counter(&self) -> &AtomicU64 {
        THREAD_SLOT_INDEX.with(|idx| &self.components[*idx])
    }
}

impl DeltaCounter {
    /// Creates a counter with every shard at zero.
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
        DeltaCounter {
            components: [ZERO; NUM_COMPONENTS],
        }
    }

    /// Adds `value` to the current thread's shard. Lock-free.
    #[inline]
    pub fn add(&self, value: u64) {
        self.get_component_counter()
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Sums all shards without resetting them.
    ///
    /// Concurrent adds may or may not be included; the result is never
    /// larger than what a drain started at the same moment could return.
    #[inline]
    pub fn value(&self) -> u64 {
        self.components
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .fold(0u64, u64::saturating_add)
    }

    /// Atomically swaps every shard to zero and returns the sum of what was
    /// there.
    ///
    /// Each `add` is a single `fetch_add` on one shard, so it is returned by
    /// exactly one call to `take`.
    #[inline]
    pub fn take(&self) -> u64 {
        self.components
            .iter()
            .map(|slot| slot.swap(0, Ordering::AcqRel))
            .fold(0u64, u64::saturating_add)
    }

    /// `true` when every shard currently reads zero.
    pub fn is_zero(&self) -> bool {
        self.components
            .iter()
            .all(|slot| slot.load(Ordering::Relaxed) == 0)
    }
}

impl Default for DeltaCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for DeltaCounter {
    /// Formats the non-zero shards as `{ [slot]:value ... }`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, slot) in self.components.iter().enumerate() {
            let val = slot.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}
