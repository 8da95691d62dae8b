//! CLI runner for common setup.
//!
//! Loads the configuration file and initializes logging so command handlers
//! don't repeat it.

use std::path::Path;

use tracing::info;

use locus::config::ConfigFile;
use locus::logging::{init_logging, LoggingGuard};

use crate::error::CliError;

/// Load the configuration from `path`, or from ~/.locus/config.ini.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    _logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Load config and initialize logging.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Explicit config file, or `None` for the default path
    /// * `debug_mode` - Enable debug-level logging regardless of RUST_LOG
    /// * `stdout_logging` - Also print log events to the terminal
    pub fn new(
        config_path: Option<&Path>,
        debug_mode: bool,
        stdout_logging: bool,
    ) -> Result<Self, CliError> {
        let config = load_config(config_path)?;

        let logging_guard = init_logging(
            &config.logging.directory,
            &config.logging.file,
            stdout_logging,
            debug_mode,
        )
        .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("Locus v{}", locus::VERSION);
        info!(
            log = %self.config.logging.directory.join(&self.config.logging.file).display(),
            "Locus CLI: {} command",
            command
        );
    }
}
