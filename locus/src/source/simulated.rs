//! In-process Position Source.
//!
//! `SimulatedSource` stands in for positioning hardware. It records every
//! command the manager issues, lets callers inject reports directly, and can
//! replay a script of timed reports after each `start`. Tests use it to
//! assert on `start`/`stop` counts; the CLI uses it to run scenarios.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    AuthorizationStatus, AuthorizationType, PositionSource, SourceEvent, SourceEventSender,
};
use crate::error::SourceError;
use crate::fix::Fix;
use crate::tier::AccuracyTier;

/// A command received by the simulated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCall {
    /// `start` at the given tier.
    Start(AccuracyTier),
    /// `stop`.
    Stop,
    /// `request_authorization` for the given type.
    RequestAuthorization(AuthorizationType),
}

#[derive(Debug, Clone, PartialEq)]
enum ScriptedReport {
    Fix {
        latitude: f64,
        longitude: f64,
        accuracy: f64,
    },
    Error(SourceError),
    Authorization(AuthorizationStatus),
}

/// A report replayed a fixed delay after `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedEvent {
    /// Delay after `start`.
    pub after: Duration,
    report: ScriptedReport,
}

impl ScriptedEvent {
    /// A fix, timestamped when it is replayed.
    pub fn fix(after: Duration, latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            after,
            report: ScriptedReport::Fix {
                latitude,
                longitude,
                accuracy,
            },
        }
    }

    /// A source failure.
    pub fn error(after: Duration, error: SourceError) -> Self {
        Self {
            after,
            report: ScriptedReport::Error(error),
        }
    }

    /// A permission change.
    pub fn authorization(after: Duration, status: AuthorizationStatus) -> Self {
        Self {
            after,
            report: ScriptedReport::Authorization(status),
        }
    }

    fn to_event(&self) -> SourceEvent {
        match &self.report {
            ScriptedReport::Fix {
                latitude,
                longitude,
                accuracy,
            } => SourceEvent::Fix(Fix::new(*latitude, *longitude, *accuracy)),
            ScriptedReport::Error(e) => SourceEvent::Error(e.clone()),
            ScriptedReport::Authorization(status) => SourceEvent::Authorization(*status),
        }
    }
}

#[derive(Debug)]
struct SimulatedInner {
    calls: Vec<SourceCall>,
    running: bool,
    status: AuthorizationStatus,
    grant_on_request: Option<AuthorizationStatus>,
    script: Vec<ScriptedEvent>,
    replay: Option<CancellationToken>,
}

/// Recording, scriptable Position Source.
#[derive(Debug)]
pub struct SimulatedSource {
    events: SourceEventSender,
    supports_authorization_type: bool,
    inner: Mutex<SimulatedInner>,
}

impl SimulatedSource {
    /// Create an authorized source with no script.
    pub fn new(events: SourceEventSender) -> Self {
        Self {
            events,
            supports_authorization_type: true,
            inner: Mutex::new(SimulatedInner {
                calls: Vec::new(),
                running: false,
                status: AuthorizationStatus::AuthorizedWhenInUse,
                grant_on_request: None,
                script: Vec::new(),
                replay: None,
            }),
        }
    }

    /// Set the initial permission state.
    pub fn with_authorization(self, status: AuthorizationStatus) -> Self {
        self.inner.lock().status = status;
        self
    }

    /// Answer `request_authorization` by switching to `status`.
    pub fn granting_on_request(self, status: AuthorizationStatus) -> Self {
        self.inner.lock().grant_on_request = Some(status);
        self
    }

    /// Replay `script` after every `start` that begins a session.
    pub fn with_script(self, mut script: Vec<ScriptedEvent>) -> Self {
        script.sort_by_key(|e| e.after);
        self.inner.lock().script = script;
        self
    }

    /// Declare whether the authorization type is honoured.
    pub fn with_authorization_type_support(mut self, supported: bool) -> Self {
        self.supports_authorization_type = supported;
        self
    }

    /// Every command received so far.
    pub fn calls(&self) -> Vec<SourceCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of `start` commands received.
    pub fn start_count(&self) -> usize {
        self.count(|c| matches!(c, SourceCall::Start(_)))
    }

    /// Number of `stop` commands received.
    pub fn stop_count(&self) -> usize {
        self.count(|c| matches!(c, SourceCall::Stop))
    }

    /// Whether a session is running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Report a fix measured now.
    pub fn emit_fix(&self, latitude: f64, longitude: f64, accuracy: f64) {
        self.events.fix(Fix::new(latitude, longitude, accuracy));
    }

    /// Report an arbitrary event.
    pub fn emit(&self, event: SourceEvent) {
        self.events.send(event);
    }

    /// Change the permission state and report it.
    pub fn set_authorization(&self, status: AuthorizationStatus) {
        self.inner.lock().status = status;
        self.events.authorization(status);
    }

    fn count(&self, pred: impl Fn(&SourceCall) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn spawn_replay(&self, script: Vec<ScriptedEvent>) -> Option<CancellationToken> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No tokio runtime, scripted reports will not be replayed");
                return None;
            }
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events.clone();
        let started = Instant::now();
        handle.spawn(async move {
            for scripted in script {
                tokio::select! {
                    _ = cancelled.cancelled() => return,
                    _ = tokio::time::sleep_until(started + scripted.after) => {}
                }
                debug!(after_ms = scripted.after.as_millis() as u64, "Replaying scripted report");
                events.send(scripted.to_event());
            }
        });
        Some(token)
    }
}

impl PositionSource for SimulatedSource {
    fn start(&self, tier: AccuracyTier) {
        let mut inner = self.inner.lock();
        inner.calls.push(SourceCall::Start(tier));
        if inner.running {
            return;
        }
        inner.running = true;
        if !inner.script.is_empty() {
            let script = inner.script.clone();
            inner.replay = self.spawn_replay(script);
        }
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.calls.push(SourceCall::Stop);
        inner.running = false;
        if let Some(token) = inner.replay.take() {
            token.cancel();
        }
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        self.inner.lock().status
    }

    fn request_authorization(&self, kind: AuthorizationType) {
        let granted = {
            let mut inner = self.inner.lock();
            inner.calls.push(SourceCall::RequestAuthorization(kind));
            if let Some(status) = inner.grant_on_request {
                inner.status = status;
            }
            inner.grant_on_request
        };
        if let Some(status) = granted {
            self.events.authorization(status);
        }
    }

    fn supports_authorization_type(&self) -> bool {
        self.supports_authorization_type
    }
}
