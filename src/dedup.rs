//! Per-site visitor deduplication.
//!
//! Each site owns one `cardinality-estimator` sketch (HyperLogLog++ once it
//! is dense: 2^14 six-bit registers, about 12 KiB; exact and much smaller
//! while the site has few visitors). Sketches live for the whole life of the
//! process and are never cleared, so unique counts stay cumulative like the
//! durable `unique` column they feed.
//!
//! A sketch cannot answer "was this fingerprint seen" directly. Instead each
//! site remembers how many uniques it has already credited, and an insert
//! credits however much the rounded estimate rose past that. Repeats never
//! move the estimate, and the credited total tracks the estimate, so the
//! summed `unique_delta`s stay within the sketch's error of the true
//! distinct count at any scale.

use std::hash::DefaultHasher;

use async_trait::async_trait;
use cardinality_estimator::estimator::CardinalityEstimator;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::site::SiteId;

/// Registers in a dense sketch are `2^SKETCH_PRECISION`.
pub const SKETCH_PRECISION: usize = 14;
const REGISTER_WIDTH: usize = 6;

/// Fingerprints are inserted pre-hashed, so the hasher parameter is unused.
type Sketch =
    CardinalityEstimator<Fingerprint, DefaultHasher, SKETCH_PRECISION, REGISTER_WIDTH>;

/// Answer from a deduplication backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The site's distinct-visitor count rose by `credit` (at least 1).
    New { credit: u64 },
    /// Already seen, or an unseen fingerprint the sketch cannot tell apart.
    Seen,
}

impl Admission {
    /// Admission for one genuinely new visitor.
    pub const ONE: Admission = Admission::New { credit: 1 };

    pub fn from_credit(credit: u64) -> Self {
        if credit == 0 {
            Admission::Seen
        } else {
            Admission::New { credit }
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Admission::New { .. })
    }

    /// Amount to add to the site's unique delta.
    pub fn credit(self) -> u64 {
        match self {
            Admission::New { credit } => credit,
            Admission::Seen => 0,
        }
    }
}

/// Approximate-membership backend keyed by site.
#[async_trait]
pub trait Deduplicator: Send + Sync + 'static {
    /// Records `fingerprint` for `site` and reports how much the site's
    /// distinct count rose.
    async fn add(&self, site: &SiteId, fingerprint: &Fingerprint) -> Result<Admission>;

    /// Estimated distinct visitors for `site`, `None` if it has no sketch.
    async fn estimate(&self, site: &SiteId) -> Result<Option<u64>>;

    /// `true` if `site` already has dedup state.
    async fn tracks(&self, site: &SiteId) -> Result<bool> {
        Ok(self.estimate(site).await?.is_some())
    }
}

struct SiteSketch {
    sketch: Sketch,
    /// Uniques already handed out; never above the highest estimate seen.
    credited: u64,
}

impl SiteSketch {
    fn new() -> Self {
        Self {
            sketch: Sketch::new(),
            credited: 0,
        }
    }

    fn insert(&mut self, hash: u64) -> u64 {
        self.sketch.insert_hash(hash);
        let estimate = self.estimate();
        let credit = estimate.saturating_sub(self.credited);
        self.credited += credit;
        credit
    }

    fn estimate(&self) -> u64 {
        self.sketch.estimate() as u64
    }
}

/// In-process deduplicator with one sketch per site.
#[derive(Default)]
pub struct SketchDeduplicator {
    sketches: DashMap<SiteId, Mutex<SiteSketch>>,
}

impl SketchDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sites with a sketch.
    pub fn site_count(&self) -> usize {
        self.sketches.len()
    }

    fn insert(&self, site: &SiteId, hash: u64) -> u64 {
        if let Some(sketch) = self.sketches.get(site) {
            return sketch.lock().insert(hash);
        }
        let sketch = self
            .sketches
            .entry(site.clone())
            .or_insert_with(|| Mutex::new(SiteSketch::new()));
        let credit = sketch.lock().insert(hash);
        credit
    }
}

impl std::fmt::Debug for SketchDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SketchDeduplicator")
            .field("sites", &self.sketches.len())
            .finish()
    }
}

#[async_trait]
impl Deduplicator for SketchDeduplicator {
    async fn add(&self, site: &SiteId, fingerprint: &Fingerprint) -> Result<Admission> {
        Ok(Admission::from_credit(self.insert(site, fingerprint.hash64())))
    }

    async fn estimate(&self, site: &SiteId) -> Result<Option<u64>> {
        Ok(self.sketches.get(site).map(|sketch| sketch.lock().estimate()))
    }

    async fn tracks(&self, site: &SiteId) -> Result<bool> {
        Ok(self.sketches.contains_key(site))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str) -> SiteId {
        SiteId::new(id).unwrap()
    }

    fn visitor(i: u32) -> Fingerprint {
        Fingerprint::new(
            &format!("198.18.{}.{}", (i >> 8) & 0xff, i & 0xff),
            &format!("agent/{}", i >> 16),
        )
    }

    #[tokio::test]
    async fn test_new_then_seen() {
        let dedup = SketchDeduplicator::new();
        let s = site("abc123");
        let fp = Fingerprint::new("10.0.0.1", "agent");

        assert_eq!(dedup.add(&s, &fp).await.unwrap(), Admission::ONE);
        for _ in 0..5 {
            assert_eq!(dedup.add(&s, &fp).await.unwrap(), Admission::Seen);
        }
    }

    #[tokio::test]
    async fn test_sites_are_independent() {
        let dedup = SketchDeduplicator::new();
        let fp = Fingerprint::new("10.0.0.1", "agent");

        assert!(dedup.add(&site("a"), &fp).await.unwrap().is_new());
        assert!(dedup.add(&site("b"), &fp).await.unwrap().is_new());
        assert_eq!(dedup.site_count(), 2);
        assert!(dedup.tracks(&site("a")).await.unwrap());
        assert!(!dedup.tracks(&site("c")).await.unwrap());
    }

    #[tokio::test]
    async fn test_estimate() {
        let dedup = SketchDeduplicator::new();
        let s = site("abc123");
        assert_eq!(dedup.estimate(&s).await.unwrap(), None);

        for i in 0..50 {
            dedup.add(&s, &visitor(i)).await.unwrap();
        }
        let est = dedup.estimate(&s).await.unwrap().unwrap();
        assert!((48..=52).contains(&est), "estimate {est}");
    }

    #[tokio::test]
    async fn test_small_sites_are_near_exact() {
        let dedup = SketchDeduplicator::new();
        let s = site("abc123");
        let mut credited = 0;
        for i in 0..100 {
            credited += dedup.add(&s, &visitor(i)).await.unwrap().credit();
        }
        assert!((98..=100).contains(&credited), "credited {credited}");

        // Later rounds of the same visitors add nothing.
        for _ in 0..2 {
            for i in 0..100 {
                assert_eq!(dedup.add(&s, &visitor(i)).await.unwrap(), Admission::Seen);
            }
        }
    }

    #[tokio::test]
    async fn test_credits_track_distinct_count_at_scale() {
        const DISTINCT: u32 = 100_000;
        let dedup = SketchDeduplicator::new();
        let s = site("abc123");

        let mut credited = 0u64;
        for i in 0..DISTINCT {
            credited += dedup.add(&s, &visitor(i)).await.unwrap().credit();
        }
        let error = (credited as f64 - DISTINCT as f64).abs() / DISTINCT as f64;
        assert!(error < 0.03, "credited {credited} of {DISTINCT}");

        // Replaying every visitor credits nothing more.
        let mut replayed = 0u64;
        for i in (0..DISTINCT).step_by(7) {
            replayed += dedup.add(&s, &visitor(i)).await.unwrap().credit();
        }
        assert_eq!(replayed, 0);
    }

    #[test]
    fn test_admission_credit() {
        assert_eq!(Admission::from_credit(0), Admission::Seen);
        assert_eq!(Admission::from_credit(2).credit(), 2);
        assert!(!Admission::Seen.is_new());
        assert_eq!(Admission::Seen.credit(), 0);
    }
}
