//! Position Source boundary.
//!
//! The Position Source is the external collaborator that owns the actual
//! sensor session. The manager only needs it to:
//!
//! - start at an accuracy tier and stop (both idempotent)
//! - report fixes, classified errors and authorization changes, asynchronously
//!
//! Commands go through the [`PositionSource`] trait. Reports go the other way
//! through an unbounded channel created by [`source_channel`]: the source keeps
//! the [`SourceEventSender`] and the manager consumes the
//! [`SourceEventReceiver`]. Sending never blocks, so a source may report from
//! any thread or callback context.
//!
//! # Example
//!
//! ```ignore
//! let (events_tx, events_rx) = source_channel();
//! let source = Arc::new(PlatformSource::new(events_tx));
//! let manager = LocationManager::start(ManagerConfig::default(), source, events_rx);
//! ```

mod simulated;

pub use simulated::{ScriptedEvent, SimulatedSource, SourceCall};

use std::fmt;
use std::str::FromStr;

use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::fix::Fix;
use crate::tier::AccuracyTier;

/// Which permission the manager asks the platform for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationType {
    /// Location access while the application is in use.
    #[default]
    WhenInUse,
    /// Location access at any time.
    Always,
}

impl AuthorizationType {
    /// Configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationType::WhenInUse => "when_in_use",
            AuthorizationType::Always => "always",
        }
    }
}

impl fmt::Display for AuthorizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuthorizationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "when_in_use" => Ok(AuthorizationType::WhenInUse),
            "always" => Ok(AuthorizationType::Always),
            other => Err(format!(
                "unknown authorization type '{}' (expected when_in_use or always)",
                other
            )),
        }
    }
}

/// Current permission state reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationStatus {
    /// The user has not been asked yet.
    #[default]
    NotDetermined,
    /// Access is blocked by policy.
    Restricted,
    /// The user refused access.
    Denied,
    /// Access granted while in use.
    AuthorizedWhenInUse,
    /// Access granted at any time.
    AuthorizedAlways,
}

impl AuthorizationStatus {
    /// Whether this status forbids acquiring a position.
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted
        )
    }

    /// Whether this status allows acquiring a position.
    pub fn is_authorized(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::AuthorizedWhenInUse | AuthorizationStatus::AuthorizedAlways
        )
    }
}

/// Asynchronous report from a Position Source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A new fix. Zero or more per `start`.
    Fix(Fix),
    /// A classified failure.
    Error(SourceError),
    /// Permission state changed. May arrive at any time, even before `start`.
    Authorization(AuthorizationStatus),
}

/// Receiving half of the source event channel, consumed by the manager.
pub type SourceEventReceiver = mpsc::UnboundedReceiver<SourceEvent>;

/// Sending half of the source event channel, held by the source.
#[derive(Debug, Clone)]
pub struct SourceEventSender {
    tx: mpsc::UnboundedSender<SourceEvent>,
}

impl SourceEventSender {
    /// Report an event. Reports after the manager has shut down are dropped.
    pub fn send(&self, event: SourceEvent) {
        let _ = self.tx.send(event);
    }

    /// Report a fix.
    pub fn fix(&self, fix: Fix) {
        self.send(SourceEvent::Fix(fix));
    }

    /// Report a failure.
    pub fn error(&self, error: SourceError) {
        self.send(SourceEvent::Error(error));
    }

    /// Report a permission change.
    pub fn authorization(&self, status: AuthorizationStatus) {
        self.send(SourceEvent::Authorization(status));
    }

    /// Whether the manager is still listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the channel a source reports through.
pub fn source_channel() -> (SourceEventSender, SourceEventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SourceEventSender { tx }, rx)
}

/// Commands the manager issues to the positioning hardware.
///
/// Implementations must not block: `start` and `stop` request a state change
/// and return. Both must be safe to call when already in the requested state.
pub trait PositionSource: Send + Sync {
    /// Begin (or retune) the sensor session at the given accuracy.
    fn start(&self, tier: AccuracyTier);

    /// End the sensor session.
    fn stop(&self);

    /// Permission state at the time of the call.
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask the platform for permission of the given type.
    fn request_authorization(&self, kind: AuthorizationType);

    /// Whether the platform honours the requested [`AuthorizationType`].
    ///
    /// Some platforms only have one kind of permission; there the manager
    /// does not ask for a specific type.
    fn supports_authorization_type(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_status_classification() {
        assert!(AuthorizationStatus::Denied.is_denied());
        assert!(AuthorizationStatus::Restricted.is_denied());
        assert!(!AuthorizationStatus::NotDetermined.is_denied());
        assert!(!AuthorizationStatus::NotDetermined.is_authorized());
        assert!(AuthorizationStatus::AuthorizedAlways.is_authorized());
    }

    #[test]
    fn test_authorization_type_parse() {
        assert_eq!(
            "Always".parse::<AuthorizationType>().unwrap(),
            AuthorizationType::Always
        );
        assert_eq!(
            "when-in-use".parse::<AuthorizationType>().unwrap(),
            AuthorizationType::WhenInUse
        );
        assert!("sometimes".parse::<AuthorizationType>().is_err());
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (tx, mut rx) = source_channel();
        tx.authorization(AuthorizationStatus::AuthorizedWhenInUse);
        tx.error(SourceError::Transient("glitch".to_string()));

        assert_eq!(
            rx.recv().await,
            Some(SourceEvent::Authorization(
                AuthorizationStatus::AuthorizedWhenInUse
            ))
        );
        assert!(matches!(rx.recv().await, Some(SourceEvent::Error(_))));
    }

    #[test]
    fn test_send_after_close_is_ignored() {
        let (tx, rx) = source_channel();
        drop(rx);
        assert!(tx.is_closed());
        tx.fix(Fix::new(0.0, 0.0, 1.0));
    }
}
