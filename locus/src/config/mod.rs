//! Manager configuration.
//!
//! [`ManagerConfig`] is what [`crate::manager::LocationManager::start`] takes.
//! It can be built in code with the `with_*` methods or loaded from an INI
//! file through [`ConfigFile`].

mod file;

pub use file::{
    config_directory, config_file_path, ConfigFile, ConfigFileError, LoggingSettings,
    DEFAULT_LOG_DIRECTORY, DEFAULT_LOG_FILE,
};

use crate::ladder::{effective_modifier, LadderTable, DEFAULT_INTERVAL_MODIFIER};
use crate::source::AuthorizationType;
use crate::tier::AccuracyTier;

/// Default capacity of the location event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for the location manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Tier new cycles start at.
    pub desired_accuracy: AccuracyTier,
    /// Multiplier applied to every ladder timeout.
    pub interval_modifier: f64,
    /// Keep the source running and loop cycles instead of stopping.
    pub update_continuously: bool,
    /// Permission type requested from the source.
    pub authorization_type: AuthorizationType,
    /// Base degradation table.
    pub ladder: LadderTable,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            desired_accuracy: AccuracyTier::default(),
            interval_modifier: DEFAULT_INTERVAL_MODIFIER,
            update_continuously: false,
            authorization_type: AuthorizationType::default(),
            ladder: LadderTable::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ManagerConfig {
    /// Set the starting tier.
    pub fn with_desired_accuracy(mut self, tier: AccuracyTier) -> Self {
        self.desired_accuracy = tier;
        self
    }

    /// Set the interval modifier. Unusable values fall back to 1.0.
    pub fn with_interval_modifier(mut self, modifier: f64) -> Self {
        self.interval_modifier = effective_modifier(modifier);
        self
    }

    /// Enable or disable continuous mode.
    pub fn with_update_continuously(mut self, enabled: bool) -> Self {
        self.update_continuously = enabled;
        self
    }

    /// Set the requested permission type.
    pub fn with_authorization_type(mut self, kind: AuthorizationType) -> Self {
        self.authorization_type = kind;
        self
    }

    /// Replace the base degradation table.
    pub fn with_ladder(mut self, ladder: LadderTable) -> Self {
        self.ladder = ladder;
        self
    }

    /// Set the event channel capacity (at least 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
