//! Exporters for process stats and per-site live counts.
//!
//! - [`table`]: ASCII tables via `tabled` (feature `table`)
//! - [`json`]: JSON via `serde_json` (feature `json`)
//! - [`prometheus`]: text exposition via the `prometheus` crate (feature
//!   `prometheus`)
//!
//! Every observer takes the same inputs: an iterator of
//! [`Observable`](crate::counters::Observable) stats counters, or a slice of
//! [`SiteSnapshot`](crate::snapshot::SiteSnapshot)s, and fails with the one
//! [`ObserverError`] type.
//!
//! ```rust,ignore
//! use hitcount::observers::prometheus::PrometheusObserver;
//!
//! let text = PrometheusObserver::new()
//!     .with_namespace("hitcount")
//!     .render(counter.stats().observables().into_iter())?;
//! ```

mod error;

pub use error::{ObserverError, Result};

#[cfg(feature = "prometheus")]
pub use error::PrometheusError;

#[cfg(feature = "table")]
pub mod table;

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "prometheus")]
pub mod prometheus;
