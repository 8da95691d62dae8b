//! Manager daemon: the single task that owns all acquisition state.
//!
//! Caller commands, Position Source reports and the live cycle's timer are
//! all consumed by one `tokio::select!` loop, so the controller, coalescer
//! and cache are only ever touched from this task.
//!
//! ```text
//! Command ────────┐
//!                 │     ┌─────────────┐
//! SourceEvent ────┼───► │ ManagerCore │──► Waiter outcomes (oneshot)
//!                 │     └─────────────┘──► LocationEvent (broadcast)
//! Cycle timer ────┘            │
//!                              ▼
//!                       PositionSource
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::LocationEvent;
use crate::cache::PositionCache;
use crate::coalescer::{RequestCoalescer, Waiter};
use crate::config::ManagerConfig;
use crate::controller::{AcquisitionController, CycleId, Step};
use crate::error::LocationError;
use crate::fix::Fix;
use crate::source::{
    AuthorizationStatus, PositionSource, SourceEvent, SourceEventReceiver,
};
use crate::tier::AccuracyTier;

/// Request from a [`super::LocationManager`] handle.
#[derive(Debug)]
pub(crate) enum Command {
    /// Wait for a fix at `tier` (the desired accuracy when `None`).
    Request {
        tier: Option<AccuracyTier>,
        waiter: Waiter,
    },
    /// Cancel every outstanding query.
    Cancel,
    /// Continuous mode was switched.
    SetContinuous(bool),
}

/// Everything the daemon mutates.
pub(crate) struct ManagerCore {
    settings: Arc<RwLock<ManagerConfig>>,
    source: Arc<dyn PositionSource>,
    controller: AcquisitionController,
    coalescer: RequestCoalescer,
    cache: PositionCache,
    events: broadcast::Sender<LocationEvent>,
    latest: watch::Sender<Option<Fix>>,
}

impl ManagerCore {
    pub(crate) fn new(
        settings: Arc<RwLock<ManagerConfig>>,
        source: Arc<dyn PositionSource>,
        coalescer: RequestCoalescer,
        events: broadcast::Sender<LocationEvent>,
        latest: watch::Sender<Option<Fix>>,
    ) -> Self {
        Self {
            controller: AcquisitionController::new(Arc::clone(&source)),
            settings,
            source,
            coalescer,
            cache: PositionCache::new(),
            events,
            latest,
        }
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Request { tier, waiter } => self.handle_request(tier, waiter, now),
            Command::Cancel => self.handle_cancel(now),
            Command::SetContinuous(enabled) => self.handle_set_continuous(enabled),
        }
    }

    fn handle_request(&mut self, tier: Option<AccuracyTier>, waiter: Waiter, now: Instant) {
        // A running cycle takes every caller, whatever tier it is at
        if self.controller.is_acquiring() {
            self.coalescer.attach_coalesced(waiter);
            return;
        }

        let tier = tier.unwrap_or_else(|| self.settings.read().desired_accuracy);

        if let Some(fix) = self.cache.query_at(tier, now) {
            debug!(tier = %tier, fix = %fix, "Request served from cache");
            self.coalescer.answer_from_cache(waiter, fix);
            return;
        }

        let status = self.source.authorization_status();
        if status.is_denied() {
            debug!(tier = %tier, status = ?status, "Request rejected, location access denied");
            self.coalescer.reject(waiter, LocationError::PermissionDenied);
            return;
        }

        self.coalescer.attach_new(waiter);
        self.start_cycle(tier, status, now);
    }

    fn start_cycle(&mut self, tier: AccuracyTier, status: AuthorizationStatus, now: Instant) {
        let (ladder, continuous, authorization_type) = {
            let settings = self.settings.read();
            (
                settings.ladder.ladder_for(tier, settings.interval_modifier),
                settings.update_continuously,
                settings.authorization_type,
            )
        };

        debug!(
            status = ?status,
            authorized = status.is_authorized(),
            "Authorization at cycle start"
        );
        if status == AuthorizationStatus::NotDetermined {
            if self.source.supports_authorization_type() {
                debug!(kind = %authorization_type, "Requesting location authorization");
                self.source.request_authorization(authorization_type);
            } else {
                debug!("Source ignores the authorization type, not requesting one");
            }
        }

        let first_tier = ladder.first().tier;
        let cycle = self.controller.start(ladder, continuous, now);
        self.emit(LocationEvent::CycleStarted {
            cycle,
            tier: first_tier,
        });
    }

    fn handle_cancel(&mut self, now: Instant) {
        info!(
            waiters = self.coalescer.waiter_count(),
            "Cancelling location queries"
        );
        if self.controller.is_acquiring() {
            let step = self.controller.cancel(now);
            self.apply(step);
        } else {
            self.coalescer.resolve(&Err(LocationError::Cancelled));
        }
    }

    fn handle_set_continuous(&mut self, enabled: bool) {
        self.controller.set_continuous(enabled);
        if !enabled && self.controller.is_acquiring() && self.coalescer.is_empty() {
            // Nobody is waiting on the loop, end it now
            if let Some(cycle) = self.controller.halt() {
                self.emit(LocationEvent::CycleFinished {
                    cycle,
                    outcome: Err(LocationError::Cancelled),
                    waiters: 0,
                });
            }
        }
    }

    fn handle_source_event(&mut self, event: SourceEvent) {
        let now = Instant::now();
        let step = match event {
            SourceEvent::Fix(fix) => {
                if self.cache.offer_at(fix, now) {
                    self.latest.send_replace(Some(fix));
                    self.emit(LocationEvent::Updated(fix));
                }
                self.controller.on_fix(&fix, now)
            }
            SourceEvent::Error(error) => self.controller.on_error(error, now),
            SourceEvent::Authorization(status) => {
                debug!(status = ?status, "Authorization status changed");
                self.controller.on_authorization(status, now)
            }
        };
        self.apply(step);
    }

    fn handle_timer(&mut self, cycle: CycleId) {
        let now = Instant::now();
        match self.controller.on_timer(cycle, now) {
            Step::Relaxed { cycle, tier, .. } => {
                self.emit(LocationEvent::TierRelaxed { cycle, tier });
                // A cached fix may already be good enough for the relaxed tier
                if let Some(fix) = self.cache.query_at(tier, now) {
                    debug!(cycle = %cycle, tier = %tier, "Relaxed tier satisfied from cache");
                    let step = self.controller.complete_with(fix, now);
                    self.apply(step);
                }
            }
            step => self.apply(step),
        }
    }

    fn apply(&mut self, step: Step) {
        let Step::Resolved(resolution) = step else {
            return;
        };

        let waiters = self.coalescer.resolve(&resolution.outcome);
        self.emit(LocationEvent::CycleFinished {
            cycle: resolution.cycle,
            outcome: resolution.outcome,
            waiters,
        });

        if let Some(next) = resolution.next_cycle {
            self.coalescer.record_cycle();
            if let Some(cycle) = self.controller.cycle() {
                let tier = cycle.target_tier();
                self.emit(LocationEvent::CycleStarted { cycle: next, tier });
            }
        }
    }

    fn shutdown(&mut self) {
        let halted = self.controller.halt();
        let cancelled = self.coalescer.resolve(&Err(LocationError::Cancelled));
        if cancelled > 0 {
            info!(waiters = cancelled, "Cancelled outstanding queries on shutdown");
        }
        if let Some(cycle) = halted {
            self.emit(LocationEvent::CycleFinished {
                cycle,
                outcome: Err(LocationError::Cancelled),
                waiters: cancelled,
            });
        }
        self.coalescer.log_stats();
    }

    fn emit(&self, event: LocationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Background task serializing all manager state changes.
pub(crate) struct ManagerDaemon {
    core: ManagerCore,
    commands: mpsc::UnboundedReceiver<Command>,
    source_events: SourceEventReceiver,
}

impl ManagerDaemon {
    pub(crate) fn new(
        core: ManagerCore,
        commands: mpsc::UnboundedReceiver<Command>,
        source_events: SourceEventReceiver,
    ) -> Self {
        Self {
            core,
            commands,
            source_events,
        }
    }

    /// Run until `shutdown` fires or every manager handle is dropped.
    ///
    /// `stopped` is cancelled once the daemon has exited, including on panic.
    pub(crate) async fn run(self, shutdown: CancellationToken, stopped: CancellationToken) {
        let _stopped = stopped.drop_guard();
        info!("Location manager daemon starting");

        let Self {
            mut core,
            mut commands,
            mut source_events,
        } = self;
        let mut source_open = true;

        loop {
            let timer = core.controller.timer();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Location manager daemon shutting down");
                    break;
                }

                command = commands.recv() => match command {
                    Some(command) => core.handle_command(command),
                    None => {
                        debug!("All manager handles dropped");
                        break;
                    }
                },

                event = source_events.recv(), if source_open => match event {
                    Some(event) => core.handle_source_event(event),
                    None => {
                        warn!("Position source channel closed, no further reports");
                        source_open = false;
                    }
                },

                cycle = wait_for(timer) => core.handle_timer(cycle),
            }
        }

        core.shutdown();
        info!("Location manager daemon stopped");
    }
}

/// Sleep until the armed timer fires, or forever if none is armed.
async fn wait_for(timer: Option<(CycleId, Instant)>) -> CycleId {
    match timer {
        Some((cycle, deadline)) => {
            tokio::time::sleep_until(deadline).await;
            cycle
        }
        None => std::future::pending().await,
    }
}
