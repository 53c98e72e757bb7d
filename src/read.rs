//! Live counts: durable value plus whatever is still buffered.
//!
//! The two reads are independent, so a flush landing between them can make
//! one answer briefly miss or repeat the flushed delta. Callers get eventual
//! consistency, never an error.

use std::sync::Arc;

use tracing::warn;

use crate::buffer::BufferStore;
use crate::site::{Counts, SiteId};
use crate::store::CounterStore;

#[derive(Clone)]
pub struct LiveReader {
    buffer: Arc<dyn BufferStore>,
    store: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for LiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveReader").finish_non_exhaustive()
    }
}

impl LiveReader {
    pub fn new(buffer: Arc<dyn BufferStore>, store: Arc<dyn CounterStore>) -> Self {
        Self { buffer, store }
    }

    /// Durable counts plus buffered deltas, each zero when absent or
    /// unavailable.
    pub async fn live_count(&self, site: &SiteId) -> Counts {
        self.durable(site).await + self.buffered(site).await
    }

    /// Committed counts only.
    pub async fn durable(&self, site: &SiteId) -> Counts {
        match self.store.read(site).await {
            Ok(counts) => counts.unwrap_or_default(),
            Err(err) => {
                warn!(site = %site, error = %err, "durable read failed, using zero");
                Counts::ZERO
            }
        }
    }

    /// Deltas not yet flushed.
    pub async fn buffered(&self, site: &SiteId) -> Counts {
        match self.buffer.peek(site).await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(site = %site, error = %err, "buffer read failed, using zero");
                Counts::ZERO
            }
        }
    }
}
