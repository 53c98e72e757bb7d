//! JSON observer.
//!
//! Stats render as an array of `{"name", "value"}` objects, or wrapped in a
//! [`StatsSnapshot`] with an optional timestamp. Sites render as an array of
//! [`SiteSnapshot`]s.
//!
//! ```rust
//! use hitcount::observers::json::JsonObserver;
//! use hitcount::stats::Stats;
//!
//! let stats = Stats::new();
//! stats.recorded.add(12);
//!
//! let json = JsonObserver::new()
//!     .to_json(stats.observables().into_iter())
//!     .unwrap();
//! assert!(json.contains(r#"{"name":"recorded_total","value":12}"#));
//! ```

use serde::Serialize;

use super::Result;
use crate::counters::Observable;
use crate::snapshot::{current_timestamp_ms, CounterSnapshot, SiteSnapshot, StatsSnapshot};

#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    pub pretty: bool,
    /// Only has effect together with `wrap_in_snapshot`.
    pub include_timestamp: bool,
    pub wrap_in_snapshot: bool,
}

/// Serializes stats and site counts to JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonObserver {
    config: JsonConfig,
}

impl JsonObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: JsonConfig) -> Self {
        Self { config }
    }

    pub fn pretty(mut self, enabled: bool) -> Self {
        self.config.pretty = enabled;
        self
    }

    pub fn include_timestamp(mut self, enabled: bool) -> Self {
        self.config.include_timestamp = enabled;
        self
    }

    /// Wraps stats output in a [`StatsSnapshot`] object.
    pub fn wrap_in_snapshot(mut self, enabled: bool) -> Self {
        self.config.wrap_in_snapshot = enabled;
        self
    }

    pub fn collect<'a>(
        &self,
        counters: impl Iterator<Item = &'a dyn Observable>,
    ) -> Vec<CounterSnapshot> {
        counters.map(CounterSnapshot::from_observable).collect()
    }

    /// Serializes stats counters.
    pub fn to_json<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> Result<String> {
        let snapshots = self.collect(counters);

        if self.config.wrap_in_snapshot {
            let snapshot = if self.config.include_timestamp {
                StatsSnapshot::with_timestamp(snapshots, current_timestamp_ms())
            } else {
                StatsSnapshot::new(snapshots)
            };
            self.encode(&snapshot)
        } else {
            self.encode(&snapshots)
        }
    }

    /// Serializes per-site live counts.
    pub fn sites_to_json(&self, sites: &[SiteSnapshot]) -> Result<String> {
        self.encode(&sites)
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }
}
