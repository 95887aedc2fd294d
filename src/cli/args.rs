//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

/// Port used when none (or an invalid one) is given
pub const DEFAULT_PORT: u16 = 35035;

/// CLI arguments for the relay
#[derive(Debug, Parser)]
#[command(name = "p2p-relay")]
#[command(about = "A minimal peer-to-peer chat relay", long_about = None)]
pub struct CliArgs {
    /// Display name of this node
    #[arg(short, long, default_value = "ONE")]
    pub name: String,

    /// Listening port; values outside 1-65535 fall back to the default
    #[arg(short, long, default_value_t = DEFAULT_PORT as i64, allow_negative_numbers = true)]
    pub port: i64,

    /// Directory served to HTTP clients
    #[arg(short, long, value_name = "DIR", default_value = "./front/build")]
    pub root: PathBuf,

    /// Seconds a new connection may take to send its protocol prefix
    #[arg(long, default_value_t = 10)]
    pub sniff_timeout: u64,

    /// Seconds a SEND waits for the destination to accept the message
    #[arg(long, default_value_t = 10)]
    pub forward_timeout: u64,

    /// Seconds an HTTP client may take to send its request head
    #[arg(long, default_value_t = 10)]
    pub http_timeout: u64,

    /// Outgoing messages queued per peer before senders wait
    #[arg(long, default_value_t = 64)]
    pub outbox_capacity: usize,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
