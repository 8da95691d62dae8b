//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`ladder`] - Print the effective degradation ladder
//! - [`simulate`] - Run a scripted acquisition scenario

pub mod ladder;
pub mod simulate;
