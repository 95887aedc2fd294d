//! CLI configuration module
//!
//! Turns parsed arguments into the validated settings the relay runs with.

use crate::cli::args::{CliArgs, DEFAULT_PORT};
use crate::error::RelayError;
use crate::net::{ListenerOptions, StaticFiles};
use crate::peer::SessionConfig;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the relay
#[derive(Debug, Clone)]
pub struct Config {
    /// Display name, logged only
    pub name: String,
    /// Listening port
    pub port: u16,
    /// Root directory for the HTTP fallback
    pub root: PathBuf,
    /// Classification prefix timeout
    pub sniff_timeout: Duration,
    /// Forward acknowledgement timeout
    pub forward_timeout: Duration,
    /// Request head timeout for the HTTP fallback
    pub http_timeout: Duration,
    /// Per-peer outgoing queue size
    pub outbox_capacity: usize,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            name: args.name.clone(),
            port: clamp_port(args.port),
            root: args.root.clone(),
            sniff_timeout: Duration::from_secs(args.sniff_timeout),
            forward_timeout: Duration::from_secs(args.forward_timeout),
            http_timeout: Duration::from_secs(args.http_timeout),
            outbox_capacity: args.outbox_capacity,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(RelayError::config_error_with_field("Port cannot be 0", "port").into());
        }

        if self.sniff_timeout.is_zero() {
            return Err(RelayError::config_error_with_field("sniff_timeout must be at least 1 second", "sniff_timeout").into());
        }

        if self.forward_timeout.is_zero() {
            return Err(RelayError::config_error_with_field("forward_timeout must be at least 1 second", "forward_timeout").into());
        }

        if self.http_timeout.is_zero() {
            return Err(RelayError::config_error_with_field("http_timeout must be at least 1 second", "http_timeout").into());
        }

        if self.outbox_capacity == 0 {
            return Err(RelayError::config_error_with_field("outbox_capacity must be at least 1", "outbox_capacity").into());
        }

        Ok(())
    }

    /// Get the listen address for incoming connections
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Settings handed to every accepted connection
    pub fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            sniff_timeout: self.sniff_timeout,
            session: SessionConfig {
                forward_timeout: self.forward_timeout,
                outbox_capacity: self.outbox_capacity,
            },
        }
    }

    /// HTTP fallback serving the configured root
    pub fn static_files(&self) -> StaticFiles {
        StaticFiles::new(self.root.clone()).with_header_timeout(self.http_timeout)
    }
}

/// Map a requested port into the valid TCP range, falling back to the default
pub fn clamp_port(port: i64) -> u16 {
    match u16::try_from(port) {
        Ok(port) if port > 0 => port,
        _ => DEFAULT_PORT,
    }
}
