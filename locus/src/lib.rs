//! Locus - shared, coalescing position acquisition
//!
//! This library lets many independent callers in one process obtain the
//! device position through a single sensor session. Concurrent requests are
//! coalesced into one acquisition cycle, the accuracy requirement relaxes in
//! timed steps when no precise fix arrives, and the best recent fix is cached
//! so later requests can be answered instantly.
//!
//! # High-Level API
//!
//! The [`manager`] module provides the facade:
//!
//! ```ignore
//! use locus::config::ManagerConfig;
//! use locus::manager::LocationManager;
//! use locus::source::source_channel;
//!
//! let (events_tx, events_rx) = source_channel();
//! let source = Arc::new(PlatformSource::new(events_tx));
//! let manager = LocationManager::start(ManagerConfig::default(), source, events_rx)?;
//!
//! let fix = manager.locate().await?;
//! println!("{}", fix);
//! ```

pub mod cache;
pub mod coalescer;
pub mod config;
pub mod controller;
pub mod error;
pub mod fix;
pub mod ladder;
pub mod logging;
pub mod manager;
pub mod source;
pub mod tier;

pub use error::{LocationError, LocationResult, SourceError};
pub use fix::{Coordinate, Fix};
pub use manager::{LocationEvent, LocationManager};
pub use tier::AccuracyTier;

/// Version of the Locus library and CLI.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
