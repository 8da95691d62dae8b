//! Configuration file handling for ~/.locus/config.ini.
//!
//! Missing files and missing keys fall back to defaults. Invalid values are
//! reported with the section and key they came from.
//!
//! ```ini
//! [location]
//! desired_accuracy = nearest_ten_meters
//! interval_modifier = 1.0
//! update_continuously = false
//! authorization = when_in_use
//!
//! [ladder]
//! best = 3
//! nearest_ten_meters = 5
//! any = 30
//!
//! [logging]
//! directory = logs
//! file = locus.log
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use super::ManagerConfig;
use crate::ladder::{DegradationStep, LadderTable, MAX_INTERVAL_MODIFIER, MAX_STEP_TIMEOUT};
use crate::tier::AccuracyTier;

/// Default log directory.
pub const DEFAULT_LOG_DIRECTORY: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "locus.log";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read or parse the config file.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Where log output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Directory holding the log file.
    pub directory: PathBuf,
    /// Log file name.
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LOG_DIRECTORY),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    /// `[location]` and `[ladder]` sections.
    pub manager: ManagerConfig,
    /// `[logging]` section.
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load configuration from the default path (~/.locus/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }
}

/// Get the path to the config directory (~/.locus).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".locus")
}

/// Get the path to the config file (~/.locus/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse an `Ini` object into a `ConfigFile`, starting from defaults.
fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [location] section
    if let Some(section) = ini.section(Some("location")) {
        if let Some(v) = section.get("desired_accuracy") {
            config.manager.desired_accuracy = v
                .parse()
                .map_err(|reason: String| invalid("location", "desired_accuracy", v, reason))?;
        }
        if let Some(v) = section.get("interval_modifier") {
            let modifier: f64 = v.trim().parse().map_err(|_| {
                invalid("location", "interval_modifier", v, "must be a number")
            })?;
            if !(modifier.is_finite() && modifier > 0.0) {
                return Err(invalid(
                    "location",
                    "interval_modifier",
                    v,
                    "must be greater than zero",
                ));
            }
            if modifier > MAX_INTERVAL_MODIFIER {
                return Err(invalid(
                    "location",
                    "interval_modifier",
                    v,
                    format!("must be at most {}", MAX_INTERVAL_MODIFIER),
                ));
            }
            config.manager.interval_modifier = modifier;
        }
        if let Some(v) = section.get("update_continuously") {
            config.manager.update_continuously = parse_bool(v).ok_or_else(|| {
                invalid("location", "update_continuously", v, "must be true or false")
            })?;
        }
        if let Some(v) = section.get("authorization") {
            config.manager.authorization_type = v
                .parse()
                .map_err(|reason: String| invalid("location", "authorization", v, reason))?;
        }
    }

    // [ladder] section
    if let Some(section) = ini.section(Some("ladder")) {
        config.manager.ladder = parse_ladder(section)?;
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = PathBuf::from(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

/// Build a ladder table from `tier = seconds` entries.
fn parse_ladder(section: &Properties) -> Result<LadderTable, ConfigFileError> {
    let mut steps = Vec::new();
    for (key, value) in section.iter() {
        let tier: AccuracyTier = key
            .parse()
            .map_err(|reason: String| invalid("ladder", key, value, reason))?;
        let secs: f64 = value
            .trim()
            .parse()
            .map_err(|_| invalid("ladder", key, value, "must be a number of seconds"))?;
        if !(secs.is_finite() && secs > 0.0) {
            return Err(invalid("ladder", key, value, "must be greater than zero"));
        }
        let timeout = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|timeout| *timeout <= MAX_STEP_TIMEOUT)
            .ok_or_else(|| {
                invalid(
                    "ladder",
                    key,
                    value,
                    format!("must be at most {} seconds", MAX_STEP_TIMEOUT.as_secs()),
                )
            })?;
        steps.push(DegradationStep::new(tier, timeout));
    }
    steps.sort_by_key(|step| step.tier);

    LadderTable::new(steps).map_err(|e| invalid("ladder", "*", "", e.to_string()))
}
