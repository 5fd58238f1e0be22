//! CLI configuration module
//!
//! Manages configuration for the relay server binary.

use anyhow::Result;

use crate::cli::args::CliArgs;
use crate::relay::RelayPolicy;

/// Configuration for the signaling relay server
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub bind: String,
    /// Listening port
    pub port: u16,
    /// Maximum accepted frame size in bytes
    pub max_payload: usize,
    /// Relay forwarding policy
    pub policy: RelayPolicy,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            bind: args.bind.clone(),
            port: args.port,
            max_payload: args.max_payload,
            policy: RelayPolicy {
                allow_absent_target: !args.require_target,
                notify_disconnect: args.notify_disconnect,
            },
            verbose: args.verbose,
            quiet: args.quiet,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow::anyhow!("Port cannot be 0"));
        }

        if self.max_payload == 0 {
            return Err(anyhow::anyhow!("max_payload must be at least 1"));
        }

        if self.bind.is_empty() {
            return Err(anyhow::anyhow!("bind address cannot be empty"));
        }

        Ok(())
    }

    /// Get the listen address for incoming connections
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args() -> CliArgs {
        CliArgs {
            bind: "127.0.0.1".to_string(),
            port: 9100,
            max_payload: 32_768,
            notify_disconnect: true,
            require_target: true,
            verbose: true,
            quiet: false,
        }
    }

    #[test]
    fn test_config_from_args() {
        let config = Config::from_args(&sample_args());

        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 9100);
        assert_eq!(config.max_payload, 32_768);
        assert!(config.policy.notify_disconnect);
        assert!(!config.policy.allow_absent_target);
        assert!(config.verbose);
        assert!(!config.quiet);
    }

    #[test]
    fn test_config_validate() {
        let config = Config::from_args(&sample_args());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_invalid_port() {
        let mut args = sample_args();
        args.port = 0;
        let config = Config::from_args(&args);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_zero_payload() {
        let mut args = sample_args();
        args.max_payload = 0;
        let config = Config::from_args(&args);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_listen_addr() {
        let config = Config::from_args(&sample_args());
        assert_eq!(config.listen_addr(), "127.0.0.1:9100");
    }
}
