//! Degradation ladder.
//!
//! The ladder is the ordered list of (tier, timeout) steps an acquisition
//! cycle walks through: start at the desired tier and, each time a step's
//! budget expires without a qualifying fix, relax to the next coarser tier.
//!
//! ```text
//! Best ──3s──► NearestTenMeters ──5s──► HundredMeters ──10s──► ... ──► Any ──30s──► timeout
//! ```
//!
//! Every base timeout is multiplied by the interval modifier. A modifier that
//! is zero, negative or not finite falls back to [`DEFAULT_INTERVAL_MODIFIER`].
//! A modifier above [`MAX_INTERVAL_MODIFIER`] is clamped to it, and no scaled
//! step waits longer than [`MAX_STEP_TIMEOUT`].

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::tier::AccuracyTier;

/// Modifier used when the configured one is unusable.
pub const DEFAULT_INTERVAL_MODIFIER: f64 = 1.0;

/// Largest usable interval modifier.
pub const MAX_INTERVAL_MODIFIER: f64 = 100.0;

/// Upper limit on a single scaled step timeout (one day).
pub const MAX_STEP_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// One rung of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegradationStep {
    /// Accuracy a fix must reach to resolve the cycle at this step.
    pub tier: AccuracyTier,
    /// How long to wait at this step before relaxing.
    pub timeout: Duration,
}

impl DegradationStep {
    /// Create a new step.
    pub fn new(tier: AccuracyTier, timeout: Duration) -> Self {
        Self { tier, timeout }
    }
}

/// Errors from validating a custom base table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    /// The table has no steps.
    #[error("degradation ladder must contain at least one step")]
    Empty,

    /// A step is not strictly coarser than the one before it.
    #[error("step {index} ({tier}) is not coarser than the previous step")]
    NotCoarsening { index: usize, tier: AccuracyTier },

    /// A step waits less than the one before it.
    #[error("step {index} ({tier}) has a shorter timeout than the previous step")]
    DecreasingTimeout { index: usize, tier: AccuracyTier },

    /// A step has no time budget.
    #[error("step {index} ({tier}) has a zero timeout")]
    ZeroTimeout { index: usize, tier: AccuracyTier },
}

/// Validated base table of degradation steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderTable {
    steps: Vec<DegradationStep>,
}

impl Default for LadderTable {
    fn default() -> Self {
        Self {
            steps: AccuracyTier::ALL
                .iter()
                .map(|tier| DegradationStep::new(*tier, tier.base_timeout()))
                .collect(),
        }
    }
}

impl LadderTable {
    /// Validate a custom base table.
    pub fn new(steps: Vec<DegradationStep>) -> Result<Self, LadderError> {
        if steps.is_empty() {
            return Err(LadderError::Empty);
        }

        for (index, step) in steps.iter().enumerate() {
            if step.timeout.is_zero() {
                return Err(LadderError::ZeroTimeout {
                    index,
                    tier: step.tier,
                });
            }
            if index == 0 {
                continue;
            }
            let previous = steps[index - 1];
            if step.tier <= previous.tier {
                return Err(LadderError::NotCoarsening {
                    index,
                    tier: step.tier,
                });
            }
            if step.timeout < previous.timeout {
                return Err(LadderError::DecreasingTimeout {
                    index,
                    tier: step.tier,
                });
            }
        }

        Ok(Self { steps })
    }

    /// Base steps, most precise first.
    pub fn steps(&self) -> &[DegradationStep] {
        &self.steps
    }

    /// Build the ladder for a cycle starting at `desired`.
    ///
    /// The ladder holds every table step whose tier is `desired` or coarser.
    /// If the table has no such step (a custom table that stops short of
    /// `desired`), the ladder is the single step `desired` with the table's
    /// last timeout.
    pub fn ladder_for(&self, desired: AccuracyTier, interval_modifier: f64) -> DegradationLadder {
        let modifier = effective_modifier(interval_modifier);

        let mut steps: Vec<DegradationStep> = self
            .steps
            .iter()
            .filter(|step| step.tier >= desired)
            .map(|step| DegradationStep::new(step.tier, scale_timeout(step.timeout, modifier)))
            .collect();

        if steps.is_empty() {
            let timeout = self
                .steps
                .last()
                .map(|step| step.timeout)
                .unwrap_or_else(|| desired.base_timeout());
            steps.push(DegradationStep::new(desired, scale_timeout(timeout, modifier)));
        }

        DegradationLadder { steps }
    }
}

/// Clamp an interval modifier to a usable value.
///
/// Zero, negative and non-finite values become [`DEFAULT_INTERVAL_MODIFIER`];
/// values above [`MAX_INTERVAL_MODIFIER`] become the maximum.
pub fn effective_modifier(interval_modifier: f64) -> f64 {
    if !(interval_modifier.is_finite() && interval_modifier > 0.0) {
        warn!(
            interval_modifier,
            fallback = DEFAULT_INTERVAL_MODIFIER,
            "Unusable interval modifier, using fallback"
        );
        return DEFAULT_INTERVAL_MODIFIER;
    }
    if interval_modifier > MAX_INTERVAL_MODIFIER {
        warn!(
            interval_modifier,
            max = MAX_INTERVAL_MODIFIER,
            "Interval modifier too large, clamping"
        );
        return MAX_INTERVAL_MODIFIER;
    }
    interval_modifier
}

/// Multiply `timeout` by `modifier`, saturating at [`MAX_STEP_TIMEOUT`].
fn scale_timeout(timeout: Duration, modifier: f64) -> Duration {
    Duration::try_from_secs_f64(timeout.as_secs_f64() * modifier)
        .map(|scaled| scaled.min(MAX_STEP_TIMEOUT))
        .unwrap_or(MAX_STEP_TIMEOUT)
}

/// The effective steps for one acquisition cycle.
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradationLadder {
    steps: Vec<DegradationStep>,
}

impl DegradationLadder {
    /// Build the ladder for `desired` from the default table.
    pub fn for_tier(desired: AccuracyTier, interval_modifier: f64) -> Self {
        LadderTable::default().ladder_for(desired, interval_modifier)
    }

    /// Step at `index`.
    pub fn step(&self, index: usize) -> Option<DegradationStep> {
        self.steps.get(index).copied()
    }

    /// First step.
    pub fn first(&self) -> DegradationStep {
        self.steps[0]
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false; a ladder has at least one step.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All steps, most precise first.
    pub fn steps(&self) -> &[DegradationStep] {
        &self.steps
    }

    /// Sum of every step's timeout.
    pub fn total_budget(&self) -> Duration {
        self.steps.iter().map(|step| step.timeout).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn three_step_table() -> LadderTable {
        LadderTable::new(vec![
            DegradationStep::new(AccuracyTier::Best, secs(1)),
            DegradationStep::new(AccuracyTier::HundredMeters, secs(3)),
            DegradationStep::new(AccuracyTier::Any, secs(10)),
        ])
        .unwrap()
    }

    #[test]
    fn test_default_ladder_starts_at_desired_tier() {
        let ladder = DegradationLadder::for_tier(AccuracyTier::HundredMeters, 1.0);
        let tiers: Vec<_> = ladder.steps().iter().map(|s| s.tier).collect();
        assert_eq!(
            tiers,
            vec![
                AccuracyTier::HundredMeters,
                AccuracyTier::Kilometer,
                AccuracyTier::ThreeKilometers,
                AccuracyTier::Any,
            ]
        );
        assert_eq!(ladder.first().timeout, secs(10));
    }

    #[test]
    fn test_modifier_scales_every_timeout() {
        let table = three_step_table();
        let normal = table.ladder_for(AccuracyTier::Best, 1.0);
        let doubled = table.ladder_for(AccuracyTier::Best, 2.0);

        assert_eq!(normal.len(), doubled.len());
        for (a, b) in normal.steps().iter().zip(doubled.steps()) {
            assert_eq!(a.tier, b.tier);
            assert_eq!(a.timeout * 2, b.timeout);
        }
        assert_eq!(normal.total_budget(), secs(14));
        assert_eq!(doubled.total_budget(), secs(28));
    }

    #[test]
    fn test_unusable_modifier_falls_back_to_one() {
        let table = three_step_table();
        let expected = table.ladder_for(AccuracyTier::Best, 1.0);
        for modifier in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            assert_eq!(table.ladder_for(AccuracyTier::Best, modifier), expected);
        }
    }

    #[test]
    fn test_oversized_modifier_is_clamped() {
        assert_eq!(effective_modifier(1e18), MAX_INTERVAL_MODIFIER);
        assert_eq!(effective_modifier(f64::MAX), MAX_INTERVAL_MODIFIER);
        assert_eq!(effective_modifier(MAX_INTERVAL_MODIFIER), MAX_INTERVAL_MODIFIER);

        let ladder = three_step_table().ladder_for(AccuracyTier::Best, 1e18);
        assert_eq!(ladder.first().timeout, secs(100));
        assert_eq!(ladder.total_budget(), secs(1400));
    }

    #[test]
    fn test_scaled_timeout_saturates() {
        let table = LadderTable::new(vec![DegradationStep::new(
            AccuracyTier::Any,
            Duration::from_secs(u64::MAX),
        )])
        .unwrap();

        let ladder = table.ladder_for(AccuracyTier::Any, MAX_INTERVAL_MODIFIER);
        assert_eq!(ladder.first().timeout, MAX_STEP_TIMEOUT);

        let ladder = DegradationLadder::for_tier(AccuracyTier::Any, MAX_INTERVAL_MODIFIER);
        assert!(ladder.first().timeout <= MAX_STEP_TIMEOUT);
    }

    #[test]
    fn test_custom_table_skips_finer_steps() {
        let ladder = three_step_table().ladder_for(AccuracyTier::NearestTenMeters, 1.0);
        let tiers: Vec<_> = ladder.steps().iter().map(|s| s.tier).collect();
        assert_eq!(tiers, vec![AccuracyTier::HundredMeters, AccuracyTier::Any]);
    }

    #[test]
    fn test_table_shorter_than_desired_tier_yields_single_step() {
        let table = LadderTable::new(vec![
            DegradationStep::new(AccuracyTier::Best, secs(2)),
            DegradationStep::new(AccuracyTier::NearestTenMeters, secs(4)),
        ])
        .unwrap();
        let ladder = table.ladder_for(AccuracyTier::Kilometer, 1.5);
        assert_eq!(
            ladder.steps(),
            &[DegradationStep::new(AccuracyTier::Kilometer, secs(6))]
        );
    }

    #[test]
    fn test_table_validation() {
        assert_eq!(LadderTable::new(vec![]), Err(LadderError::Empty));

        let err = LadderTable::new(vec![
            DegradationStep::new(AccuracyTier::HundredMeters, secs(1)),
            DegradationStep::new(AccuracyTier::Best, secs(2)),
        ])
        .unwrap_err();
        assert!(matches!(err, LadderError::NotCoarsening { index: 1, .. }));

        let err = LadderTable::new(vec![
            DegradationStep::new(AccuracyTier::Best, secs(5)),
            DegradationStep::new(AccuracyTier::Any, secs(2)),
        ])
        .unwrap_err();
        assert!(matches!(err, LadderError::DecreasingTimeout { index: 1, .. }));

        let err =
            LadderTable::new(vec![DegradationStep::new(AccuracyTier::Best, Duration::ZERO)])
                .unwrap_err();
        assert!(matches!(err, LadderError::ZeroTimeout { index: 0, .. }));
    }
}
