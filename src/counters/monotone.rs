//! Monotone counter with sharded atomic storage.
//!
//! [`Monotone`] only ever grows. It backs the process-level
//! [`Stats`](crate::stats::Stats) that describe ingestion and flush activity,
//! and is exported as a Prometheus counter.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::counters::{GetComponentCounter, Observable, NUM_COMPONENTS, THREAD_SLOT_INDEX};

/// A named, monotonically increasing counter.
///
/// # Examples
///
/// ```rust
/// use hitcount::counters::monotone::Monotone;
/// use hitcount::counters::Observable;
///
/// let flushes = Monotone::new().with_name("flushes_total");
/// flushes.inc();
/// flushes.add(2);
/// assert_eq!(flushes.value(), 3);
/// assert_eq!(flushes.name(), "flushes_total");
/// ```
pub struct Monotone {
    name: &'static str,
    components: [CachePadded<AtomicU64>; NUM_COMPONENTS],
}

impl GetComponentCounter for Monotone {
    type CounterType = AtomicU64;

    #[inline]
    fn get_component_counter(&self) -> &AtomicU64 {
        THREAD_SLOT_INDEX.with(|idx| &self.components[*idx])
    }
}

impl Monotone {
    /// Creates an unnamed counter initialized to zero.
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
        Monotone {
            components: [ZERO; NUM_COMPONENTS],
            name: "",
        }
    }

    /// Sets the metric name, returning `self` for chaining.
    pub const fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Adds `value` to the counter. Lock-free.
    #[inline]
    pub fn add(&self, value: u64) {
        self.get_component_counter()
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Adds one.
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline]
    fn total_value(&self) -> u64 {
        self.components
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .fold(0u64, u64::saturating_add)
    }
}

impl Observable for Monotone {
    #[inline]
    fn name(&self) -> &str {
        self.name
    }

    #[inline]
    fn value(&self) -> u64 {
        self.total_value()
    }
}

impl Default for Monotone {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Monotone {
    /// Output format: `name{ [slot]:value ... }`, non-zero shards only.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, counter) in self.components.iter().enumerate() {
            let val = counter.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}
