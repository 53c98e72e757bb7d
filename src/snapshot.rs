//! Serializable point-in-time captures of stats and site counts.
//!
//! These are the intermediate form the observers render from, and can be
//! serialized with any serde format on their own.
//!
//! ```rust
//! use hitcount::snapshot::{CounterSnapshot, StatsSnapshot};
//!
//! let snapshot = StatsSnapshot::new(vec![
//!     CounterSnapshot::new("recorded_total", 1000),
//!     CounterSnapshot::new("dropped_total", 2),
//! ]);
//! assert_eq!(snapshot.get("dropped_total").map(|c| c.value), Some(2));
//! ```

use serde::{Deserialize, Serialize};

use crate::counters::Observable;
use crate::site::{Counts, SiteId};

/// One named counter value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub name: String,
    pub value: u64,
}

impl CounterSnapshot {
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Reads the current value of `counter`.
    pub fn from_observable(counter: &dyn Observable) -> Self {
        Self {
            name: if counter.name().is_empty() {
                "(unnamed)".to_string()
            } else {
                counter.name().to_string()
            },
            value: counter.value(),
        }
    }
}

/// All process stats captured together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Milliseconds since the Unix epoch, when captured with a timestamp.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp_ms: Option<u64>,
    pub counters: Vec<CounterSnapshot>,
}

impl StatsSnapshot {
    pub fn new(counters: Vec<CounterSnapshot>) -> Self {
        Self {
            timestamp_ms: None,
            counters,
        }
    }

    pub fn with_timestamp(counters: Vec<CounterSnapshot>, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            counters,
        }
    }

    /// Finds a counter by name.
    pub fn get(&self, name: &str) -> Option<&CounterSnapshot> {
        self.counters.iter().find(|c| c.name == name)
    }

    pub fn collect<'a>(counters: impl Iterator<Item = &'a dyn Observable>) -> Self {
        Self::new(counters.map(CounterSnapshot::from_observable).collect())
    }

    /// Like [`collect`](Self::collect), stamped with the current time.
    pub fn collect_now<'a>(counters: impl Iterator<Item = &'a dyn Observable>) -> Self {
        Self::with_timestamp(
            counters.map(CounterSnapshot::from_observable).collect(),
            current_timestamp_ms(),
        )
    }
}

/// Live counts of one site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteSnapshot {
    pub site: SiteId,
    pub total: u64,
    pub unique: u64,
}

impl SiteSnapshot {
    pub fn new(site: SiteId, counts: Counts) -> Self {
        Self {
            site,
            total: counts.total,
            unique: counts.unique,
        }
    }

    pub fn counts(&self) -> Counts {
        Counts::new(self.total, self.unique)
    }
}

pub(crate) fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::monotone::Monotone;

    #[test]
    fn test_counter_snapshot_from_observable() {
        let counter = Monotone::new().with_name("flushes_total");
        counter.add(3);

        let snapshot = CounterSnapshot::from_observable(&counter);
        assert_eq!(snapshot, CounterSnapshot::new("flushes_total", 3));
    }

    #[test]
    fn test_unnamed_counter() {
        let counter = Monotone::new();
        assert_eq!(CounterSnapshot::from_observable(&counter).name, "(unnamed)");
    }

    #[test]
    fn test_collect() {
        let a = Monotone::new().with_name("a");
        let b = Monotone::new().with_name("b");
        a.add(10);
        b.add(20);

        let counters: Vec<&dyn Observable> = vec![&a, &b];
        let snapshot = StatsSnapshot::collect(counters.into_iter());
        assert_eq!(snapshot.counters.len(), 2);
        assert_eq!(snapshot.get("b").unwrap().value, 20);
        assert!(snapshot.get("c").is_none());
        assert!(snapshot.timestamp_ms.is_none());
    }

    #[test]
    fn test_collect_now_is_stamped() {
        let counters: Vec<&dyn Observable> = vec![];
        let snapshot = StatsSnapshot::collect_now(counters.into_iter());
        assert!(snapshot.timestamp_ms.unwrap() > 0);
    }

    #[test]
    fn test_stats_snapshot_serde() {
        let json = r#"{"timestamp_ms":1234567890,"counters":[{"name":"a","value":1}]}"#;
        let snapshot: StatsSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.timestamp_ms, Some(1234567890));
        assert_eq!(serde_json::to_string(&snapshot).unwrap(), json);

        let bare = serde_json::to_string(&StatsSnapshot::new(vec![])).unwrap();
        assert_eq!(bare, r#"{"counters":[]}"#);
    }

    #[test]
    fn test_site_snapshot() {
        let snapshot = SiteSnapshot::new(SiteId::new("abc123").unwrap(), Counts::new(7, 4));
        assert_eq!(snapshot.counts(), Counts::new(7, 4));
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"site":"abc123","total":7,"unique":4}"#);
    }
}
