//! Error types shared by the manager and the Position Source boundary.

use thiserror::Error;

use crate::tier::AccuracyTier;

/// Error domain reported alongside [`LocationError::code`].
pub const LOCATION_ERROR_DOMAIN: &str = "locus.location";

/// Code for authorization failures.
pub const DENIED_ERROR_CODE: i64 = 1;

/// Code for acquisition failures (timeout or source failure).
pub const LOCATION_FAILURE_ERROR_CODE: i64 = 2;

/// Code for cancelled queries.
pub const CANCELLED_ERROR_CODE: i64 = 3;

/// Failure delivered to every waiter of a failed acquisition cycle.
///
/// `Clone` because one failure is fanned out to many waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    /// Authorization was refused or revoked.
    #[error("location access denied")]
    PermissionDenied,

    /// The degradation ladder was exhausted without a qualifying fix.
    #[error("no fix within the accuracy budget (last tier tried: {last_tier})")]
    AcquisitionTimeout { last_tier: AccuracyTier },

    /// The Position Source reported a hardware or session failure.
    #[error("position source failure: {0}")]
    TransientSourceFailure(String),

    /// The query was cancelled before it resolved.
    #[error("location query cancelled")]
    Cancelled,
}

impl LocationError {
    /// Stable error code within [`LOCATION_ERROR_DOMAIN`].
    pub fn code(&self) -> i64 {
        match self {
            LocationError::PermissionDenied => DENIED_ERROR_CODE,
            LocationError::AcquisitionTimeout { .. } | LocationError::TransientSourceFailure(_) => {
                LOCATION_FAILURE_ERROR_CODE
            }
            LocationError::Cancelled => CANCELLED_ERROR_CODE,
        }
    }

    /// Whether issuing a new request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocationError::AcquisitionTimeout { .. } | LocationError::TransientSourceFailure(_)
        )
    }
}

impl From<SourceError> for LocationError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Denied => LocationError::PermissionDenied,
            SourceError::Transient(msg) => LocationError::TransientSourceFailure(msg),
        }
    }
}

/// Classified failure reported by a Position Source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The platform refused access to location data.
    #[error("access denied by the platform")]
    Denied,

    /// The hardware session failed; a later attempt may succeed.
    #[error("{0}")]
    Transient(String),
}

/// Outcome delivered to a waiter.
pub type LocationResult = Result<crate::fix::Fix, LocationError>;
