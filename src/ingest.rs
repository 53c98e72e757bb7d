//! Turns identification events into buffered deltas.
//!
//! The request path never waits on a flush and never surfaces an error.
//! Failures degrade as follows:
//!
//! | failure                 | outcome                                  |
//! |-------------------------|------------------------------------------|
//! | buffer unavailable      | [`IngestOutcome::Dropped`], not counted  |
//! | dedup unavailable       | fingerprint treated as new               |
//! | site lookup unavailable | event accepted, no new sketch allocated  |

use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, trace, warn};

use crate::buffer::{BufferStore, Field};
use crate::config::UnknownSitePolicy;
use crate::dedup::{Admission, Deduplicator};
use crate::fingerprint::Fingerprint;
use crate::site::SiteId;
use crate::stats::Stats;
use crate::store::CounterStore;

/// Result of recording one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Buffered. `new_visitor` is set when the unique count was raised too.
    Recorded { new_visitor: bool },
    /// The site is not registered and the policy rejects it.
    UnknownSite,
    /// The buffer could not take the increment.
    Dropped,
}

impl IngestOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, IngestOutcome::Recorded { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Existence {
    Known,
    Missing,
    /// The store could not answer.
    Unverified,
}

/// Ingestion handler.
pub struct Ingestor {
    buffer: Arc<dyn BufferStore>,
    dedup: Arc<dyn Deduplicator>,
    store: Arc<dyn CounterStore>,
    stats: Arc<Stats>,
    policy: UnknownSitePolicy,
    /// Sites confirmed to exist. Only positive answers are cached.
    known: DashSet<SiteId>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("policy", &self.policy)
            .field("known", &self.known.len())
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(
        buffer: Arc<dyn BufferStore>,
        dedup: Arc<dyn Deduplicator>,
        store: Arc<dyn CounterStore>,
        stats: Arc<Stats>,
        policy: UnknownSitePolicy,
    ) -> Self {
        Self {
            buffer,
            dedup,
            store,
            stats,
            policy,
            known: DashSet::new(),
        }
    }

    pub fn policy(&self) -> UnknownSitePolicy {
        self.policy
    }

    /// Caches `site` as registered, skipping the store lookup on its events.
    pub fn mark_known(&self, site: &SiteId) {
        self.known.insert(site.clone());
    }

    /// Records one visit to `site` by `client_address` / `user_agent`.
    pub async fn record(
        &self,
        site: &SiteId,
        client_address: &str,
        user_agent: &str,
    ) -> IngestOutcome {
        let existence = match self.policy {
            UnknownSitePolicy::Reject => self.existence(site).await,
            UnknownSitePolicy::Accept => Existence::Known,
        };
        if existence == Existence::Missing {
            self.stats.unknown_site.inc();
            debug!(site = %site, "event for unknown site rejected");
            return IngestOutcome::UnknownSite;
        }

        let fingerprint = Fingerprint::new(client_address, user_agent);

        if let Err(err) = self.buffer.increment(site, Field::Total, 1).await {
            self.stats.dropped.inc();
            warn!(site = %site, error = %err, "buffer unavailable, visit dropped");
            return IngestOutcome::Dropped;
        }

        let admission = self.admit(site, &fingerprint, existence).await;

        let mut new_visitor = false;
        if admission.is_new() {
            match self
                .buffer
                .increment(site, Field::Unique, admission.credit())
                .await
            {
                Ok(()) => new_visitor = true,
                Err(err) => warn!(site = %site, error = %err, "unique increment lost"),
            }
        }

        if let Err(err) = self.buffer.mark_dirty(site).await {
            warn!(site = %site, error = %err, "could not mark site dirty");
        }

        self.stats.recorded.inc();
        if new_visitor {
            self.stats.new_visitors.inc();
        }
        trace!(site = %site, fingerprint = ?fingerprint, new_visitor, "recorded");
        IngestOutcome::Recorded { new_visitor }
    }

    /// Asks the dedup engine, falling back to one new visitor when it
    /// fails. Unverified sites only reach a sketch that already exists, so
    /// ids that could not be checked never allocate dedup state.
    async fn admit(
        &self,
        site: &SiteId,
        fingerprint: &Fingerprint,
        existence: Existence,
    ) -> Admission {
        let result = match existence {
            Existence::Unverified => match self.dedup.tracks(site).await {
                Ok(true) => self.dedup.add(site, fingerprint).await,
                Ok(false) => {
                    self.stats.dedup_fallbacks.inc();
                    debug!(site = %site, "unverified site has no sketch, counting as new");
                    return Admission::ONE;
                }
                Err(err) => Err(err),
            },
            Existence::Known | Existence::Missing => self.dedup.add(site, fingerprint).await,
        };
        match result {
            Ok(admission) => admission,
            Err(err) => {
                self.stats.dedup_fallbacks.inc();
                warn!(site = %site, error = %err, "dedup unavailable, counting as new");
                Admission::ONE
            }
        }
    }

    async fn existence(&self, site: &SiteId) -> Existence {
        if self.known.contains(site) {
            return Existence::Known;
        }
        match self.store.site(site).await {
            Ok(Some(_)) => {
                self.known.insert(site.clone());
                Existence::Known
            }
            Ok(None) => Existence::Missing,
            Err(err) => {
                warn!(site = %site, error = %err, "site lookup failed, accepting event");
                Existence::Unverified
            }
        }
    }
}
