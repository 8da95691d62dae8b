//! Notifications published by the manager.

use crate::controller::CycleId;
use crate::error::LocationResult;
use crate::fix::Fix;
use crate::tier::AccuracyTier;

/// Event broadcast to [`super::LocationManager::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    /// The cache accepted a new fix.
    Updated(Fix),
    /// An acquisition cycle started at `tier`.
    CycleStarted { cycle: CycleId, tier: AccuracyTier },
    /// A cycle relaxed its accuracy requirement to `tier`.
    TierRelaxed { cycle: CycleId, tier: AccuracyTier },
    /// A cycle resolved and its outcome went to `waiters` callers.
    CycleFinished {
        cycle: CycleId,
        outcome: LocationResult,
        waiters: usize,
    },
}

impl LocationEvent {
    /// The fix carried by an update, if this is one.
    pub fn location(&self) -> Option<&Fix> {
        match self {
            LocationEvent::Updated(fix) => Some(fix),
            _ => None,
        }
    }

    /// The cycle this event belongs to, if any.
    pub fn cycle(&self) -> Option<CycleId> {
        match self {
            LocationEvent::Updated(_) => None,
            LocationEvent::CycleStarted { cycle, .. }
            | LocationEvent::TierRelaxed { cycle, .. }
            | LocationEvent::CycleFinished { cycle, .. } => Some(*cycle),
        }
    }
}
