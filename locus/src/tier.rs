//! Accuracy tiers.
//!
//! A tier is a discrete accuracy requirement. Tiers are totally ordered from
//! most precise (`Best`) to least precise (`Any`); the derived `Ord` follows
//! declaration order, so `AccuracyTier::Best < AccuracyTier::Any`.
//!
//! Each tier carries three constants:
//!
//! | tier               | max accuracy | freshness window | base ladder timeout |
//! |--------------------|--------------|------------------|---------------------|
//! | `Best`             | 5 m          | 5 s              | 3 s                 |
//! | `NearestTenMeters` | 10 m         | 10 s             | 5 s                 |
//! | `HundredMeters`    | 100 m        | 30 s             | 10 s                |
//! | `Kilometer`        | 1 km         | 60 s             | 15 s                |
//! | `ThreeKilometers`  | 3 km         | 120 s            | 20 s                |
//! | `Any`              | unbounded    | 300 s            | 30 s                |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Discrete accuracy requirement, most precise first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AccuracyTier {
    /// Highest precision the hardware can deliver.
    Best,
    /// Within ten meters.
    #[default]
    NearestTenMeters,
    /// Within a hundred meters.
    HundredMeters,
    /// Within one kilometer.
    Kilometer,
    /// Within three kilometers.
    ThreeKilometers,
    /// Any valid fix.
    Any,
}

impl AccuracyTier {
    /// All tiers, most precise first.
    pub const ALL: [AccuracyTier; 6] = [
        AccuracyTier::Best,
        AccuracyTier::NearestTenMeters,
        AccuracyTier::HundredMeters,
        AccuracyTier::Kilometer,
        AccuracyTier::ThreeKilometers,
        AccuracyTier::Any,
    ];

    /// Largest horizontal accuracy (meters) that satisfies this tier.
    pub fn max_accuracy_m(self) -> f64 {
        match self {
            AccuracyTier::Best => 5.0,
            AccuracyTier::NearestTenMeters => 10.0,
            AccuracyTier::HundredMeters => 100.0,
            AccuracyTier::Kilometer => 1_000.0,
            AccuracyTier::ThreeKilometers => 3_000.0,
            AccuracyTier::Any => f64::INFINITY,
        }
    }

    /// Maximum age at which a cached fix may still answer a query at this tier.
    ///
    /// Coarser tiers tolerate older fixes.
    pub fn freshness_window(self) -> Duration {
        match self {
            AccuracyTier::Best => Duration::from_secs(5),
            AccuracyTier::NearestTenMeters => Duration::from_secs(10),
            AccuracyTier::HundredMeters => Duration::from_secs(30),
            AccuracyTier::Kilometer => Duration::from_secs(60),
            AccuracyTier::ThreeKilometers => Duration::from_secs(120),
            AccuracyTier::Any => Duration::from_secs(300),
        }
    }

    /// Time budget for this tier in the default degradation ladder, before
    /// the interval modifier is applied.
    pub fn base_timeout(self) -> Duration {
        match self {
            AccuracyTier::Best => Duration::from_secs(3),
            AccuracyTier::NearestTenMeters => Duration::from_secs(5),
            AccuracyTier::HundredMeters => Duration::from_secs(10),
            AccuracyTier::Kilometer => Duration::from_secs(15),
            AccuracyTier::ThreeKilometers => Duration::from_secs(20),
            AccuracyTier::Any => Duration::from_secs(30),
        }
    }

    /// Whether a fix with the given horizontal accuracy satisfies this tier.
    pub fn is_satisfied_by(self, accuracy_m: f64) -> bool {
        accuracy_m.is_finite() && accuracy_m >= 0.0 && accuracy_m <= self.max_accuracy_m()
    }

    /// The most precise tier satisfied by the given accuracy, if any.
    pub fn finest_for(accuracy_m: f64) -> Option<AccuracyTier> {
        Self::ALL
            .iter()
            .copied()
            .find(|tier| tier.is_satisfied_by(accuracy_m))
    }

    /// The next coarser tier, or `None` for `Any`.
    pub fn coarser(self) -> Option<AccuracyTier> {
        let index = Self::ALL.iter().position(|t| *t == self)?;
        Self::ALL.get(index + 1).copied()
    }

    /// Configuration/CLI name of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccuracyTier::Best => "best",
            AccuracyTier::NearestTenMeters => "nearest_ten_meters",
            AccuracyTier::HundredMeters => "hundred_meters",
            AccuracyTier::Kilometer => "kilometer",
            AccuracyTier::ThreeKilometers => "three_kilometers",
            AccuracyTier::Any => "any",
        }
    }
}

impl fmt::Display for AccuracyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccuracyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|tier| tier.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown accuracy tier '{}' (expected one of: {})",
                    s,
                    Self::ALL
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}
