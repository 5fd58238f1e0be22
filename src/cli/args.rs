//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;

/// CLI arguments for the signaling relay server
#[derive(Debug, Parser)]
#[command(name = "peerlink-relay")]
#[command(about = "Signaling relay for peer-to-peer data links", long_about = None)]
pub struct CliArgs {
    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Listening port for client connections
    #[arg(short, long, default_value_t = 9030)]
    pub port: u16,

    /// Maximum accepted frame size in bytes
    #[arg(long, default_value_t = 65_536)]
    pub max_payload: usize,

    /// Notify counterparts when a session disconnects
    #[arg(long)]
    pub notify_disconnect: bool,

    /// Reject join-signaling toward targets that are not online
    #[arg(long)]
    pub require_target: bool,

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

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
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
