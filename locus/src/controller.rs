//! Acquisition controller.
//!
//! Drives one acquisition cycle over the degradation ladder.
//!
//! # State Machine
//!
//! ```text
//! Idle --start--> Acquiring(0)
//! Acquiring(i) --fix satisfies ladder[i].tier--> Resolved(fix)
//! Acquiring(i) --timer, ladder[i+1] exists--> Acquiring(i+1)
//! Acquiring(last) --timer--> Resolved(AcquisitionTimeout)
//! Acquiring(i) --denied / restricted--> Resolved(PermissionDenied)
//! Acquiring(i) --source failure--> Resolved(TransientSourceFailure)
//! Acquiring(i) --cancel--> Resolved(Cancelled)
//! Resolved --> Idle, or Acquiring(0) of a new cycle when continuous
//! ```
//!
//! The Position Source is started once per session and is never restarted
//! when the tier relaxes; only the requirement relaxes. It is stopped when a
//! cycle resolves, unless the cycle is continuous. `PermissionDenied` always
//! ends the session.
//!
//! Every cycle has a [`CycleId`]. Timers are armed for a cycle id and an
//! expiry for any other id is ignored, so a timer from a superseded cycle can
//! never move the live one.
//!
//! The controller does not touch the cache or the waiters. It reports what
//! happened as a [`Step`] and the manager daemon acts on it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{LocationError, LocationResult, SourceError};
use crate::fix::Fix;
use crate::ladder::{DegradationLadder, MAX_STEP_TIMEOUT};
use crate::source::{AuthorizationStatus, PositionSource};
use crate::tier::AccuracyTier;

/// Identity of one acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleId(u64);

impl CycleId {
    /// Numeric value, increasing with every cycle.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Live state of a running cycle.
#[derive(Debug, Clone)]
pub struct CycleState {
    id: CycleId,
    ladder: DegradationLadder,
    tier_index: usize,
    deadline: Instant,
    started_at: Instant,
    continuous: bool,
}

impl CycleState {
    /// Cycle identity.
    pub fn id(&self) -> CycleId {
        self.id
    }

    /// Tier a fix must reach to resolve the cycle now.
    pub fn target_tier(&self) -> AccuracyTier {
        self.ladder
            .step(self.tier_index)
            .map(|step| step.tier)
            .unwrap_or(AccuracyTier::Any)
    }

    /// Index of the current ladder step.
    pub fn tier_index(&self) -> usize {
        self.tier_index
    }

    /// When the current step's budget runs out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the cycle loops instead of stopping the source.
    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// The ladder this cycle walks.
    pub fn ladder(&self) -> &DegradationLadder {
        &self.ladder
    }
}

/// Controller state.
#[derive(Debug, Clone)]
pub enum ControllerState {
    /// No cycle running.
    Idle,
    /// A cycle is waiting for a qualifying fix.
    Acquiring(CycleState),
}

/// A resolved cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The cycle that resolved.
    pub cycle: CycleId,
    /// Outcome for every waiter of the cycle.
    pub outcome: LocationResult,
    /// Tier the cycle was at when it resolved.
    pub tier: AccuracyTier,
    /// Time from cycle start to resolution.
    pub elapsed: Duration,
    /// The cycle that replaced it, when continuous.
    pub next_cycle: Option<CycleId>,
}

/// Result of feeding an input to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing changed.
    Unchanged,
    /// The cycle relaxed to a coarser tier.
    Relaxed {
        cycle: CycleId,
        tier: AccuracyTier,
        index: usize,
    },
    /// The cycle resolved.
    Resolved(Resolution),
}

/// The acquisition state machine.
pub struct AcquisitionController {
    source: Arc<dyn PositionSource>,
    state: ControllerState,
    next_id: u64,
    source_active: bool,
}

impl fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("state", &self.state)
            .field("source_active", &self.source_active)
            .finish_non_exhaustive()
    }
}

impl AcquisitionController {
    /// Create an idle controller driving `source`.
    pub fn new(source: Arc<dyn PositionSource>) -> Self {
        Self {
            source,
            state: ControllerState::Idle,
            next_id: 1,
            source_active: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// The running cycle, if any.
    pub fn cycle(&self) -> Option<&CycleState> {
        match &self.state {
            ControllerState::Acquiring(cycle) => Some(cycle),
            ControllerState::Idle => None,
        }
    }

    /// Whether a cycle is running.
    pub fn is_acquiring(&self) -> bool {
        self.cycle().is_some()
    }

    /// Whether the Position Source session is running.
    pub fn is_source_active(&self) -> bool {
        self.source_active
    }

    /// The armed timer: which cycle it belongs to and when it fires.
    pub fn timer(&self) -> Option<(CycleId, Instant)> {
        self.cycle().map(|cycle| (cycle.id, cycle.deadline))
    }

    /// Start a cycle at the ladder's first step.
    ///
    /// If a cycle is already running it is left alone and its id returned.
    pub fn start(&mut self, ladder: DegradationLadder, continuous: bool, now: Instant) -> CycleId {
        if let Some(cycle) = self.cycle() {
            warn!(cycle = %cycle.id, "Cycle already running, not starting another");
            return cycle.id;
        }

        let id = self.allocate_id();
        let first = ladder.first();
        info!(
            cycle = %id,
            tier = %first.tier,
            timeout_ms = first.timeout.as_millis() as u64,
            steps = ladder.len(),
            continuous,
            "Acquisition cycle started"
        );

        self.state = ControllerState::Acquiring(CycleState {
            id,
            deadline: deadline_after(now, first.timeout),
            started_at: now,
            tier_index: 0,
            ladder,
            continuous,
        });
        self.start_source(first.tier);
        id
    }

    /// Promote or demote the running cycle to or from continuous mode.
    pub fn set_continuous(&mut self, continuous: bool) {
        if let ControllerState::Acquiring(cycle) = &mut self.state {
            if cycle.continuous != continuous {
                debug!(cycle = %cycle.id, continuous, "Cycle continuous mode changed");
                cycle.continuous = continuous;
            }
        }
    }

    /// Feed a fix from the Position Source.
    pub fn on_fix(&mut self, fix: &Fix, now: Instant) -> Step {
        let Some(cycle) = self.cycle() else {
            return Step::Unchanged;
        };
        if !fix.is_valid() {
            debug!(cycle = %cycle.id, accuracy_m = fix.horizontal_accuracy, "Ignoring invalid fix");
            return Step::Unchanged;
        }

        let tier = cycle.target_tier();
        if fix.satisfies(tier) {
            debug!(
                cycle = %cycle.id,
                tier = %tier,
                accuracy_m = fix.horizontal_accuracy,
                "Qualifying fix"
            );
            self.finish(Ok(*fix), now)
        } else {
            debug!(
                cycle = %cycle.id,
                tier = %tier,
                accuracy_m = fix.horizontal_accuracy,
                "Fix does not satisfy current tier"
            );
            Step::Unchanged
        }
    }

    /// Resolve the running cycle with a fix found elsewhere (the cache).
    pub fn complete_with(&mut self, fix: Fix, now: Instant) -> Step {
        self.finish(Ok(fix), now)
    }

    /// Feed a timer expiry armed for `cycle`.
    pub fn on_timer(&mut self, cycle_id: CycleId, now: Instant) -> Step {
        let ControllerState::Acquiring(cycle) = &mut self.state else {
            debug!(cycle = %cycle_id, "Timer fired while idle, ignoring");
            return Step::Unchanged;
        };
        if cycle.id != cycle_id {
            debug!(
                stale = %cycle_id,
                live = %cycle.id,
                "Timer from a superseded cycle, ignoring"
            );
            return Step::Unchanged;
        }
        if now < cycle.deadline {
            return Step::Unchanged;
        }

        let next_index = cycle.tier_index + 1;
        match cycle.ladder.step(next_index) {
            Some(step) => {
                cycle.tier_index = next_index;
                cycle.deadline = deadline_after(cycle.deadline, step.timeout);
                info!(
                    cycle = %cycle.id,
                    tier = %step.tier,
                    step = next_index,
                    timeout_ms = step.timeout.as_millis() as u64,
                    "No qualifying fix, relaxing accuracy"
                );
                Step::Relaxed {
                    cycle: cycle.id,
                    tier: step.tier,
                    index: next_index,
                }
            }
            None => {
                let last_tier = cycle.target_tier();
                self.finish(Err(LocationError::AcquisitionTimeout { last_tier }), now)
            }
        }
    }

    /// Feed a failure from the Position Source.
    pub fn on_error(&mut self, error: SourceError, now: Instant) -> Step {
        if !self.is_acquiring() {
            debug!(error = %error, "Source failure while idle");
            return Step::Unchanged;
        }
        self.finish(Err(error.into()), now)
    }

    /// Feed a permission change from the Position Source.
    pub fn on_authorization(&mut self, status: AuthorizationStatus, now: Instant) -> Step {
        if status.is_denied() && self.is_acquiring() {
            return self.finish(Err(LocationError::PermissionDenied), now);
        }
        Step::Unchanged
    }

    /// Cancel the running cycle.
    ///
    /// A continuous cycle resolves with `Cancelled` and loops; otherwise the
    /// source is stopped.
    pub fn cancel(&mut self, now: Instant) -> Step {
        self.finish(Err(LocationError::Cancelled), now)
    }

    /// End any running cycle and stop the source without resolving.
    ///
    /// Returns the cycle that was running.
    pub fn halt(&mut self) -> Option<CycleId> {
        let halted = match std::mem::replace(&mut self.state, ControllerState::Idle) {
            ControllerState::Acquiring(cycle) => Some(cycle.id),
            ControllerState::Idle => None,
        };
        if let Some(id) = halted {
            info!(cycle = %id, "Acquisition cycle halted");
        }
        self.stop_source();
        halted
    }

    fn finish(&mut self, outcome: LocationResult, now: Instant) -> Step {
        let cycle = match std::mem::replace(&mut self.state, ControllerState::Idle) {
            ControllerState::Acquiring(cycle) => cycle,
            ControllerState::Idle => return Step::Unchanged,
        };

        let tier = cycle.target_tier();
        let elapsed = now.saturating_duration_since(cycle.started_at);
        let fatal = matches!(outcome, Err(LocationError::PermissionDenied));

        match &outcome {
            Ok(fix) => info!(
                cycle = %cycle.id,
                tier = %tier,
                accuracy_m = fix.horizontal_accuracy,
                elapsed_ms = elapsed.as_millis() as u64,
                "Acquisition cycle resolved"
            ),
            Err(e) => warn!(
                cycle = %cycle.id,
                tier = %tier,
                error = %e,
                elapsed_ms = elapsed.as_millis() as u64,
                "Acquisition cycle failed"
            ),
        }

        let next_cycle = if cycle.continuous && !fatal {
            let id = self.allocate_id();
            let first = cycle.ladder.first();
            debug!(cycle = %id, tier = %first.tier, "Continuous mode, re-entering first step");
            self.state = ControllerState::Acquiring(CycleState {
                id,
                deadline: deadline_after(now, first.timeout),
                started_at: now,
                tier_index: 0,
                ladder: cycle.ladder,
                continuous: true,
            });
            Some(id)
        } else {
            self.stop_source();
            None
        };

        Step::Resolved(Resolution {
            cycle: cycle.id,
            outcome,
            tier,
            elapsed,
            next_cycle,
        })
    }

    fn allocate_id(&mut self) -> CycleId {
        let id = CycleId(self.next_id);
        self.next_id += 1;
        id
    }

    fn start_source(&mut self, tier: AccuracyTier) {
        if !self.source_active {
            self.source.start(tier);
            self.source_active = true;
        }
    }

    fn stop_source(&mut self) {
        if self.source_active {
            self.source.stop();
            self.source_active = false;
        }
    }
}

/// `from + timeout`, saturating where the clock cannot represent the sum.
fn deadline_after(from: Instant, timeout: Duration) -> Instant {
    from.checked_add(timeout)
        .or_else(|| from.checked_add(MAX_STEP_TIMEOUT))
        .unwrap_or(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ladder::{DegradationStep, LadderTable};
    use crate::source::{source_channel, SimulatedSource, SourceCall};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn three_step_ladder() -> DegradationLadder {
        LadderTable::new(vec![
            DegradationStep::new(AccuracyTier::Best, secs(1)),
            DegradationStep::new(AccuracyTier::HundredMeters, secs(3)),
            DegradationStep::new(AccuracyTier::Any, secs(10)),
        ])
        .unwrap()
        .ladder_for(AccuracyTier::Best, 1.0)
    }

    fn create_controller() -> (AcquisitionController, Arc<SimulatedSource>) {
        let (tx, _rx) = source_channel();
        let source = Arc::new(SimulatedSource::new(tx));
        let controller =
            AcquisitionController::new(Arc::clone(&source) as Arc<dyn PositionSource>);
        (controller, source)
    }

    fn resolution(step: Step) -> Resolution {
        match step {
            Step::Resolved(r) => r,
            other => panic!("Expected resolution, got {:?}", other),
        }
    }

    #[test]
    fn test_initial_state_is_idle() {
        let (controller, source) = create_controller();
        assert!(!controller.is_acquiring());
        assert!(controller.timer().is_none());
        assert_eq!(source.start_count(), 0);
    }

    #[test]
    fn test_start_arms_first_step() {
        let (mut controller, source) = create_controller();
        let now = Instant::now();

        let id = controller.start(three_step_ladder(), false, now);

        assert_eq!(controller.timer(), Some((id, now + secs(1))));
        assert_eq!(controller.cycle().unwrap().target_tier(), AccuracyTier::Best);
        assert_eq!(source.calls(), vec![SourceCall::Start(AccuracyTier::Best)]);
    }

    #[test]
    fn test_second_start_keeps_running_cycle() {
        let (mut controller, source) = create_controller();
        let now = Instant::now();

        let first = controller.start(three_step_ladder(), false, now);
        let second = controller.start(three_step_ladder(), false, now);

        assert_eq!(first, second);
        assert_eq!(source.start_count(), 1);
    }

    #[test]
    fn test_qualifying_fix_resolves_at_first_step() {
        let (mut controller, source) = create_controller();
        let now = Instant::now();
        let id = controller.start(three_step_ladder(), false, now);

        let fix = Fix::with_timestamp(53.5, 10.0, 4.0, now);
        let r = resolution(controller.on_fix(&fix, now + Duration::from_millis(400)));

        assert_eq!(r.cycle, id);
        assert_eq!(r.outcome, Ok(fix));
        assert_eq!(r.tier, AccuracyTier::Best);
        assert_eq!(r.elapsed, Duration::from_millis(400));
        assert!(r.next_cycle.is_none());
        assert!(!controller.is_acquiring());
        assert_eq!(source.stop_count(), 1);
    }

    #[test]
    fn test_non_qualifying_fix_keeps_cycle() {
        let (mut controller, _source) = create_controller();
        let now = Instant::now();
        controller.start(three_step_ladder(), false, now);

        let fix = Fix::with_timestamp(53.5, 10.0, 50.0, now);
        assert_eq!(controller.on_fix(&fix, now), Step::Unchanged);
        assert!(controller.is_acquiring());

        let invalid = Fix::with_timestamp(53.5, 10.0, -1.0, now);
        assert_eq!(controller.on_fix(&invalid, now), Step::Unchanged);
    }

    #[test]
    fn test_timers_walk_ladder_then_time_out() {
        let (mut controller, source) = create_controller();
        let t0 = Instant::now();
        let id = controller.start(three_step_ladder(), false, t0);

        let step = controller.on_timer(id, t0 + secs(1));
        assert_eq!(
            step,
            Step::Relaxed {
                cycle: id,
                tier: AccuracyTier::HundredMeters,
                index: 1
            }
        );
        assert_eq!(controller.timer(), Some((id, t0 + secs(4))));

        let step = controller.on_timer(id, t0 + secs(4));
        assert!(matches!(
            step,
            Step::Relaxed {
                tier: AccuracyTier::Any,
                index: 2,
                ..
            }
        ));
        assert_eq!(controller.timer(), Some((id, t0 + secs(14))));

        let r = resolution(controller.on_timer(id, t0 + secs(14)));
        assert_eq!(
            r.outcome,
            Err(LocationError::AcquisitionTimeout {
                last_tier: AccuracyTier::Any
            })
        );
        assert_eq!(r.elapsed, secs(14));
        // Relaxing never restarts the source
        assert_eq!(source.start_count(), 1);
        assert_eq!(source.stop_count(), 1);
    }

    #[test]
    fn test_relaxed_tier_accepts_coarser_fix() {
        let (mut controller, _source) = create_controller();
        let t0 = Instant::now();
        let id = controller.start(three_step_ladder(), false, t0);
        controller.on_timer(id, t0 + secs(1));

        let fix = Fix::with_timestamp(53.5, 10.0, 50.0, t0 + secs(2));
        let r = resolution(controller.on_fix(&fix, t0 + secs(2)));
        assert_eq!(r.tier, AccuracyTier::HundredMeters);
        assert_eq!(r.outcome, Ok(fix));
    }

    #[test]
    fn test_stale_and_early_timers_are_ignored() {
        let (mut controller, _source) = create_controller();
        let t0 = Instant::now();
        let old = controller.start(three_step_ladder(), false, t0);
        controller.cancel(t0);

        let live = controller.start(three_step_ladder(), false, t0 + secs(1));
        assert_ne!(old, live);

        assert_eq!(controller.on_timer(old, t0 + secs(5)), Step::Unchanged);
        assert_eq!(controller.cycle().unwrap().tier_index(), 0);

        // Live timer, but before its deadline
        assert_eq!(
            controller.on_timer(live, t0 + Duration::from_millis(1_500)),
            Step::Unchanged
        );
    }

    #[test]
    fn test_authorization_denied_is_fatal() {
        let (mut controller, source) = create_controller();
        let now = Instant::now();
        controller.start(three_step_ladder(), true, now);

        assert_eq!(
            controller.on_authorization(AuthorizationStatus::AuthorizedAlways, now),
            Step::Unchanged
        );

        let r = resolution(controller.on_authorization(AuthorizationStatus::Restricted, now));
        assert_eq!(r.outcome, Err(LocationError::PermissionDenied));
        // Even a continuous cycle does not loop after a denial
        assert!(r.next_cycle.is_none());
        assert!(!controller.is_acquiring());
        assert_eq!(source.stop_count(), 1);
    }

    #[test]
    fn test_source_errors_resolve_without_retry() {
        let (mut controller, source) = create_controller();
        let now = Instant::now();
        controller.start(three_step_ladder(), false, now);

        let r = resolution(controller.on_error(SourceError::Transient("no sky".to_string()), now));
        assert_eq!(
            r.outcome,
            Err(LocationError::TransientSourceFailure("no sky".to_string()))
        );
        assert_eq!(source.start_count(), 1);

        assert_eq!(
            controller.on_error(SourceError::Denied, now),
            Step::Unchanged
        );
    }

    #[test]
    fn test_cancel_stops_source_once() {
        let (mut controller, source) = create_controller();
        let now = Instant::now();
        controller.start(three_step_ladder(), false, now);

        let r = resolution(controller.cancel(now));
        assert_eq!(r.outcome, Err(LocationError::Cancelled));
        assert_eq!(controller.cancel(now), Step::Unchanged);
        assert_eq!(source.stop_count(), 1);
    }

    #[test]
    fn test_continuous_cycle_loops_without_stopping_source() {
        let (mut controller, source) = create_controller();
        let t0 = Instant::now();
        let first = controller.start(three_step_ladder(), true, t0);
        controller.on_timer(first, t0 + secs(1));

        let fix = Fix::with_timestamp(53.5, 10.0, 40.0, t0 + secs(2));
        let r = resolution(controller.on_fix(&fix, t0 + secs(2)));

        let next = r.next_cycle.expect("continuous cycle should loop");
        assert_ne!(next, first);
        let cycle = controller.cycle().unwrap();
        assert_eq!(cycle.id(), next);
        assert_eq!(cycle.tier_index(), 0);
        assert_eq!(cycle.deadline(), t0 + secs(3));
        assert_eq!(source.start_count(), 1);
        assert_eq!(source.stop_count(), 0);

        // Cancel in continuous mode resolves but keeps the session
        let r = resolution(controller.cancel(t0 + secs(2)));
        assert!(r.next_cycle.is_some());
        assert_eq!(source.stop_count(), 0);
    }

    #[test]
    fn test_demoting_continuous_cycle_stops_on_resolution() {
        let (mut controller, source) = create_controller();
        let now = Instant::now();
        controller.start(three_step_ladder(), true, now);
        controller.set_continuous(false);

        let fix = Fix::with_timestamp(0.0, 0.0, 2.0, now);
        let r = resolution(controller.on_fix(&fix, now));
        assert!(r.next_cycle.is_none());
        assert_eq!(source.stop_count(), 1);
    }

    #[test]
    fn test_halt() {
        let (mut controller, source) = create_controller();
        let now = Instant::now();
        assert!(controller.halt().is_none());
        assert_eq!(source.stop_count(), 0);

        let id = controller.start(three_step_ladder(), true, now);
        assert_eq!(controller.halt(), Some(id));
        assert!(!controller.is_source_active());
        assert_eq!(source.stop_count(), 1);
    }

    #[test]
    fn test_deadline_arithmetic_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, secs(2)), now + secs(2));
        assert!(deadline_after(now, Duration::MAX) >= now);

        let huge = LadderTable::new(vec![
            DegradationStep::new(AccuracyTier::Best, Duration::from_secs(u64::MAX / 2)),
            DegradationStep::new(AccuracyTier::Any, Duration::from_secs(u64::MAX / 2)),
        ])
        .unwrap();
        let ladder = huge.ladder_for(AccuracyTier::Best, 1.0);

        let (mut controller, _source) = create_controller();
        let id = controller.start(ladder, false, now);
        let (_, deadline) = controller.timer().unwrap();
        assert_eq!(deadline, now + MAX_STEP_TIMEOUT);

        assert!(matches!(
            controller.on_timer(id, deadline),
            Step::Relaxed { index: 1, .. }
        ));
        assert!(controller.timer().unwrap().1 > deadline);
    }
}
