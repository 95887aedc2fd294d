//! CLI module
//!
//! Command-line interface for the relay.

pub mod args;
pub mod config;

pub use args::{CliArgs, DEFAULT_PORT};
pub use config::{clamp_port, Config};
