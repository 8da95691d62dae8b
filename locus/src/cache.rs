//! Position cache.
//!
//! Holds at most one fix: the best recent one. Two operations:
//!
//! - [`PositionCache::query`] answers "is the cached fix good enough for this
//!   tier right now". A fix is returned only if it satisfies the tier and is
//!   no older than the tier's freshness window.
//! - [`PositionCache::offer`] replaces the cached fix when the new one is at
//!   least as accurate, or when the cached one has gone stale. A late, coarse
//!   fix never overwrites a fresher, better one.
//!
//! The cache is not synchronized; it lives inside the manager daemon.

use tokio::time::Instant;
use tracing::debug;

use crate::fix::Fix;
use crate::tier::AccuracyTier;

/// Single-slot cache of the best recent fix.
#[derive(Debug, Default)]
pub struct PositionCache {
    fix: Option<Fix>,
}

impl PositionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached fix if it satisfies `min_tier` and is fresh at `now`.
    pub fn query_at(&self, min_tier: AccuracyTier, now: Instant) -> Option<Fix> {
        let fix = self.fix?;
        if !fix.satisfies(min_tier) {
            return None;
        }
        if fix.age_at(now) > min_tier.freshness_window() {
            return None;
        }
        Some(fix)
    }

    /// Return the cached fix if it satisfies `min_tier` and is fresh now.
    pub fn query(&self, min_tier: AccuracyTier) -> Option<Fix> {
        self.query_at(min_tier, Instant::now())
    }

    /// Offer a fix, judged at `now`. Returns true if it was stored.
    pub fn offer_at(&mut self, fix: Fix, now: Instant) -> bool {
        if !fix.is_valid() {
            return false;
        }

        let accept = match self.fix {
            None => true,
            Some(cached) if fix.timestamp < cached.timestamp => false,
            Some(cached) => {
                fix.horizontal_accuracy <= cached.horizontal_accuracy || Self::is_stale(&cached, now)
            }
        };

        if accept {
            self.fix = Some(fix);
        } else {
            debug!(
                accuracy_m = fix.horizontal_accuracy,
                cached_accuracy_m = self.fix.map(|f| f.horizontal_accuracy),
                "Discarding fix, cached fix is better"
            );
        }
        accept
    }

    /// Offer a fix, judged now. Returns true if it was stored.
    pub fn offer(&mut self, fix: Fix) -> bool {
        self.offer_at(fix, Instant::now())
    }

    /// The cached fix regardless of age or accuracy.
    pub fn latest(&self) -> Option<Fix> {
        self.fix
    }

    /// Drop the cached fix.
    pub fn clear(&mut self) {
        self.fix = None;
    }

    /// A fix is stale once older than the freshness window of the finest
    /// tier it satisfies.
    fn is_stale(fix: &Fix, now: Instant) -> bool {
        match fix.tier() {
            Some(tier) => fix.age_at(now) > tier.freshness_window(),
            None => true,
        }
    }
}
