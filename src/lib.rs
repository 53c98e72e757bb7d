//! # hitcount - Buffered Visit Counting with Approximate Unique Visitors
//!
//! A library for counting page visits per site at high request rates while
//! keeping the durable store out of the request path. Visits land in a fast
//! in-memory buffer; a background worker periodically folds the buffered
//! deltas into durable storage in a single batched transaction. Reads merge
//! both, so counts are live even between flushes.
//!
//! ## The Problem
//!
//! Writing one row per visit, or even one `UPDATE counters SET total = total
//! + 1` per visit, makes the database the bottleneck of every tracked page.
//! Counting distinct visitors exactly is worse: it needs a set of every
//! visitor ever seen, per site.
//!
//! ## The Solution
//!
//! ```text
//!   record(site, addr, ua)
//!          │
//!          ▼
//!   fingerprint = blake3(addr ":" ua)[..16]
//!          │
//!          ├──► buffer.total += 1                 (sharded atomics)
//!          ├──► unique += sketch.add(fp).credit()   (HyperLogLog++, ≤12 KiB)
//!          └──► dirty.insert(site)
//!
//!   every interval (SyncWorker)
//!          take_dirty() ─► drain_reset() each ─► apply_batch() in one txn
//!
//!   live_count(site) = store.read(site) + buffer.peek(site)
//! ```
//!
//! 1. **Sharded buffer**: each site's buffered delta is spread over 64
//!    cache-padded atomic slots (see [`counters`]). Concurrent increments do
//!    not contend, and a drain swaps every slot to zero, so each increment is
//!    handed to exactly one flush.
//!
//! 2. **Approximate dedup**: one `cardinality-estimator` sketch per site.
//!    Each insert credits the site's unique count with however much the
//!    rounded estimate rose, so repeats add nothing and the summed unique
//!    deltas stay within the sketch's error (under 1% at 2^14 registers) of
//!    the true distinct count.
//!
//! 3. **Batched, retried flush**: the [`SyncWorker`] commits all drained
//!    deltas in one transaction. A failed commit puts the deltas back and the
//!    next tick retries them. Only a crash between drain and commit loses
//!    buffered visits.
//!
//! ## Quick Start
//!
//! ```rust
//! use hitcount::{Config, Counts, HitCounter, IngestOutcome, SiteId};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let counter = HitCounter::open(Config::default())?;
//! let site = SiteId::new("abc123")?;
//! counter.register_site(site.clone(), "My Blog").await?;
//!
//! let worker = counter.start();
//!
//! let outcome = counter.record(&site, "203.0.113.7", "Mozilla/5.0").await;
//! assert_eq!(outcome, IngestOutcome::Recorded { new_visitor: true });
//! assert_eq!(counter.live_count(&site).await, Counts::new(1, 1));
//!
//! // Stops the schedule and flushes what is left.
//! worker.shutdown().await?;
//! # Ok::<(), hitcount::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Configuration
//!
//! [`Config`] is read from TOML; every field has a default. See
//! [`config`] for the full layout.
//!
//! ## Storage Backends
//!
//! | Backend | Feature | Notes |
//! |---------|---------|-------|
//! | [`MemoryStore`](store::MemoryStore) | always | Tests, single process, not durable |
//! | [`RedbStore`](store::RedbStore) | `redb` (default) | Embedded, crash-safe, one write txn per flush |
//!
//! Other backends implement [`CounterStore`]; other buffers implement
//! [`BufferStore`]; other dedup engines implement [`Deduplicator`]. Wire
//! them with [`HitCounter::with_components`].
//!
//! ## Observers
//!
//! Process [`Stats`] and per-site [`SiteSnapshot`]s can be exported with the
//! observers in [`observers`]:
//!
//! | Observer | Feature | Output |
//! |----------|---------|--------|
//! | `TableObserver` | `table` | ASCII tables |
//! | `JsonObserver` | `json` | JSON |
//! | `PrometheusObserver` | `prometheus` | Prometheus text exposition |
//!
//! ## Logging
//!
//! The crate emits `tracing` events and never installs a subscriber.
//! Request-path failures are logged at `warn` and degrade instead of
//! erroring; flush failures are logged at `error`.

pub mod buffer;
pub mod config;
pub mod counters;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod observers;
pub mod read;
pub mod service;
pub mod site;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod worker;

pub use buffer::{BufferStore, Field, MemoryBuffer};
pub use config::{Config, StoreBackend, UnknownSitePolicy};
pub use dedup::{Admission, Deduplicator, SketchDeduplicator};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use ingest::IngestOutcome;
pub use service::HitCounter;
pub use site::{Counts, Site, SiteId};
pub use snapshot::{SiteSnapshot, StatsSnapshot};
pub use stats::Stats;
pub use store::{CounterStore, FlushBatch, MemoryStore};
pub use worker::{FlushReport, SyncHandle, SyncWorker};
