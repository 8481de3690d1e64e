//! Server configuration and its command-line / environment overrides.

use crate::error::{Error, Result};
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_SERVER_NAME: &str = "mcp-server-example";
pub const DEFAULT_DESCRIPTION: &str = "A scalable MCP server example with tools and resources";

/// Session-lifecycle tuning consumed by the store and the reaper.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Capacity bound of the session store.
    pub max_sessions: usize,
    /// Period of the reaper tick.
    pub cleanup_interval: Duration,
    /// Idle bound after which the reaper evicts a session. Zero disables idle eviction.
    pub session_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            cleanup_interval: Duration::from_millis(30_000),
            session_timeout: Duration::from_millis(300_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub request_logging: bool,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            request_logging: true,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub description: String,
    pub host: String,
    pub port: u16,
    pub protocol_version: String,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    /// Upper bound on the whole shutdown sequence.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            host: "localhost".to_string(),
            port: 3000,
            protocol_version: crate::types::LATEST_PROTOCOL_VERSION.to_string(),
            logging: LoggingConfig::default(),
            session: SessionConfig::default(),
            shutdown_grace: Duration::from_millis(10_000),
        }
    }
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let defaults = ServerConfig::default();
        let config = ServerConfig {
            name: cli.name,
            host: cli.host,
            port: cli.port,
            logging: LoggingConfig {
                level: cli.log_level,
                request_logging: !cli.no_request_logging,
                json: cli.log_json,
            },
            session: SessionConfig {
                max_sessions: cli.max_sessions,
                cleanup_interval: Duration::from_millis(cli.cleanup_interval_ms),
                session_timeout: Duration::from_millis(cli.session_timeout_ms),
            },
            shutdown_grace: Duration::from_millis(cli.shutdown_grace_ms),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the session core cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.session.max_sessions == 0 {
            return Err(Error::Config("max_sessions must be at least 1".to_string()));
        }
        if self.session.cleanup_interval.is_zero() {
            return Err(Error::Config(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Command-line arguments of the server binary.
#[derive(Parser, Debug, Clone)]
#[command(version, about = DEFAULT_DESCRIPTION, long_about = None)]
pub struct Cli {
    /// Server name reported in the handshake and on /health.
    #[arg(long, default_value = DEFAULT_SERVER_NAME)]
    pub name: String,

    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "localhost")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Log level directive (overridden by RUST_LOG when set).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Disable the per-request access log.
    #[arg(long)]
    pub no_request_logging: bool,

    /// Maximum number of concurrent sessions before the oldest is evicted.
    #[arg(long, default_value_t = 100)]
    pub max_sessions: usize,

    /// Reaper tick period in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub cleanup_interval_ms: u64,

    /// Idle timeout in milliseconds; 0 keeps idle sessions forever.
    #[arg(long, default_value_t = 300_000)]
    pub session_timeout_ms: u64,

    /// Deadline for the whole shutdown sequence in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub shutdown_grace_ms: u64,
}
