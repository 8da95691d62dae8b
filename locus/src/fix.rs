//! Position fixes.
//!
//! A [`Fix`] is one position report from the Position Source: where the
//! device is, how accurate that is, and when it was measured. Fixes are
//! immutable `Copy` values.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::tier::AccuracyTier;

/// Geographic coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// A single position fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Where the device is.
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters (lower is better).
    pub horizontal_accuracy: f64,
    /// When the fix was measured.
    pub timestamp: Instant,
}

impl Fix {
    /// Create a fix measured now.
    pub fn new(latitude: f64, longitude: f64, horizontal_accuracy: f64) -> Self {
        Self::with_timestamp(latitude, longitude, horizontal_accuracy, Instant::now())
    }

    /// Create a fix with an explicit timestamp.
    pub fn with_timestamp(
        latitude: f64,
        longitude: f64,
        horizontal_accuracy: f64,
        timestamp: Instant,
    ) -> Self {
        Self {
            coordinate: Coordinate::new(latitude, longitude),
            horizontal_accuracy,
            timestamp,
        }
    }

    /// Whether the fix carries a usable accuracy.
    ///
    /// Position sources report a negative accuracy for "no valid position".
    pub fn is_valid(&self) -> bool {
        self.horizontal_accuracy.is_finite() && self.horizontal_accuracy >= 0.0
    }

    /// Whether this fix is accurate enough for `tier`.
    pub fn satisfies(&self, tier: AccuracyTier) -> bool {
        tier.is_satisfied_by(self.horizontal_accuracy)
    }

    /// The most precise tier this fix satisfies.
    pub fn tier(&self) -> Option<AccuracyTier> {
        AccuracyTier::finest_for(self.horizontal_accuracy)
    }

    /// Age of the fix at `now`. Fixes from the future have zero age.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    /// Age of the fix right now.
    pub fn age(&self) -> Duration {
        self.age_at(Instant::now())
    }
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (±{:.0}m)", self.coordinate, self.horizontal_accuracy)
    }
}
