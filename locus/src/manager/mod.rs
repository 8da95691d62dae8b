//! Location manager facade.
//!
//! [`LocationManager`] is the process-wide entry point. It is a cheap,
//! cloneable handle around one background daemon that owns the controller,
//! the coalescer and the cache. Create it once during application wiring and
//! pass clones to every component that needs a position.
//!
//! # Example
//!
//! ```ignore
//! let (events_tx, events_rx) = source_channel();
//! let source = Arc::new(PlatformSource::new(events_tx));
//! let manager = LocationManager::start(ManagerConfig::default(), source, events_rx)?;
//!
//! // Await a fix
//! let fix = manager.locate().await?;
//!
//! // Or hand the outcome to a callback
//! manager.refresh_with_callback(|outcome| println!("{:?}", outcome));
//! ```

mod daemon;
mod events;

pub use events::LocationEvent;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coalescer::{CoalescerCounters, CoalescerStats, LocationTicket, RequestCoalescer, Waiter};
use crate::config::ManagerConfig;
use crate::error::LocationResult;
use crate::fix::Fix;
use crate::ladder::effective_modifier;
use crate::source::{AuthorizationType, PositionSource, SourceEventReceiver};
use crate::tier::AccuracyTier;
use daemon::{Command, ManagerCore, ManagerDaemon};

/// Errors starting the manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `start` was called outside a tokio runtime.
    #[error("location manager must be started from within a tokio runtime")]
    NoRuntime,
}

/// Shared, coalescing position manager.
#[derive(Clone)]
pub struct LocationManager {
    commands: mpsc::UnboundedSender<Command>,
    settings: Arc<RwLock<ManagerConfig>>,
    events: broadcast::Sender<LocationEvent>,
    latest: watch::Receiver<Option<Fix>>,
    counters: Arc<CoalescerCounters>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    runtime: Handle,
}

impl fmt::Debug for LocationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationManager")
            .field("settings", &*self.settings.read())
            .field("running", &!self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl LocationManager {
    /// Spawn the manager daemon on the current tokio runtime.
    ///
    /// `events` must be the receiving half of the channel `source` reports
    /// through (see [`crate::source::source_channel`]).
    pub fn start(
        mut config: ManagerConfig,
        source: Arc<dyn PositionSource>,
        events: SourceEventReceiver,
    ) -> Result<Self, ManagerError> {
        let runtime = Handle::try_current().map_err(|_| ManagerError::NoRuntime)?;

        config.interval_modifier = effective_modifier(config.interval_modifier);
        info!(
            desired_accuracy = %config.desired_accuracy,
            interval_modifier = config.interval_modifier,
            continuous = config.update_continuously,
            authorization = %config.authorization_type,
            ladder_steps = config.ladder.steps().len(),
            "Starting location manager"
        );

        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (latest_tx, latest_rx) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let settings = Arc::new(RwLock::new(config));
        let coalescer = RequestCoalescer::new();
        let counters = coalescer.counters();
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();

        let core = ManagerCore::new(
            Arc::clone(&settings),
            source,
            coalescer,
            events_tx.clone(),
            latest_tx,
        );
        let daemon = ManagerDaemon::new(core, command_rx, events);
        runtime.spawn(daemon.run(shutdown.clone(), stopped.clone()));

        Ok(Self {
            commands: command_tx,
            settings,
            events: events_tx,
            latest: latest_rx,
            counters,
            shutdown,
            stopped,
            runtime,
        })
    }

    /// Refresh the cached position without waiting for the outcome.
    pub fn refresh(&self) {
        drop(self.submit(None));
    }

    /// Request a position at the desired accuracy.
    pub fn locate(&self) -> LocationTicket {
        self.submit(None)
    }

    /// Request a position at `tier`.
    ///
    /// The tier only matters when this request starts a cycle; a request
    /// joining a running cycle gets that cycle's outcome.
    pub fn locate_with_tier(&self, tier: AccuracyTier) -> LocationTicket {
        self.submit(Some(tier))
    }

    /// Request a position and pass the outcome to `callback`.
    ///
    /// The callback runs on a spawned task, never inside the manager.
    pub fn refresh_with_callback<F>(&self, callback: F)
    where
        F: FnOnce(LocationResult) + Send + 'static,
    {
        let ticket = self.locate();
        self.runtime.spawn(async move {
            callback(ticket.await);
        });
    }

    /// Cancel every outstanding query.
    pub fn cancel_location_query(&self) {
        self.send(Command::Cancel);
    }

    /// Enable or disable continuous updates.
    pub fn set_update_continuously(&self, enabled: bool) {
        self.settings.write().update_continuously = enabled;
        self.send(Command::SetContinuous(enabled));
    }

    /// Whether continuous updates are enabled.
    pub fn is_updating_continuously(&self) -> bool {
        self.settings.read().update_continuously
    }

    /// Set the tier new cycles start at.
    pub fn set_desired_accuracy(&self, tier: AccuracyTier) {
        self.settings.write().desired_accuracy = tier;
    }

    /// Tier new cycles start at.
    pub fn desired_accuracy(&self) -> AccuracyTier {
        self.settings.read().desired_accuracy
    }

    /// Set the ladder timeout multiplier for new cycles.
    pub fn set_interval_modifier(&self, modifier: f64) {
        self.settings.write().interval_modifier = effective_modifier(modifier);
    }

    /// Current ladder timeout multiplier.
    pub fn interval_modifier(&self) -> f64 {
        self.settings.read().interval_modifier
    }

    /// Set the permission type requested from the source.
    pub fn set_authorization_type(&self, kind: AuthorizationType) {
        self.settings.write().authorization_type = kind;
    }

    /// Permission type requested from the source.
    pub fn authorization_type(&self) -> AuthorizationType {
        self.settings.read().authorization_type
    }

    /// Subscribe to location events.
    pub fn subscribe(&self) -> broadcast::Receiver<LocationEvent> {
        self.events.subscribe()
    }

    /// The last fix accepted by the cache.
    pub fn latest_fix(&self) -> Option<Fix> {
        *self.latest.borrow()
    }

    /// Coalescing statistics.
    pub fn stats(&self) -> CoalescerStats {
        self.counters.snapshot()
    }

    /// Stop the daemon. Outstanding queries resolve with `Cancelled` and the
    /// source is stopped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the daemon has exited.
    ///
    /// Once this returns every outstanding query has resolved and the source
    /// has been stopped.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    /// Whether the daemon has stopped accepting requests.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled() || self.stopped.is_cancelled() || self.commands.is_closed()
    }

    fn submit(&self, tier: Option<AccuracyTier>) -> LocationTicket {
        let (waiter, ticket) = Waiter::channel();
        debug!(tier = ?tier, "Submitting location request");
        // On failure the waiter is dropped and the ticket yields Cancelled
        self.send(Command::Request { tier, waiter });
        ticket
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Location manager has shut down, dropping command");
        }
    }
}
