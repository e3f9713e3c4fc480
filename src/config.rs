//! Configuration management for XwalkDriver

use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum concurrent sessions
    pub max_sessions: usize,

    /// Default asynchronous script timeout in milliseconds
    pub default_script_timeout: u64,

    /// Per-session command queue depth
    pub command_queue_depth: usize,

    /// Per-type log buffer capacity (oldest entries dropped beyond this)
    pub log_buffer_capacity: usize,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9515,
            max_sessions: 16,
            default_script_timeout: 30000,
            command_queue_depth: 64,
            log_buffer_capacity: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(host) = env::var("XWALKDRIVER_HOST") {
            config.host = host;
        }

        if let Ok(port) = env::var("XWALKDRIVER_PORT") {
            config.port = port
                .parse()
                .map_err(|_| Error::configuration("Invalid XWALKDRIVER_PORT"))?;
        }

        if let Ok(max_sessions) = env::var("XWALKDRIVER_MAX_SESSIONS") {
            config.max_sessions = max_sessions
                .parse()
                .map_err(|_| Error::configuration("Invalid XWALKDRIVER_MAX_SESSIONS"))?;
        }

        if let Ok(timeout) = env::var("XWALKDRIVER_SCRIPT_TIMEOUT") {
            config.default_script_timeout = timeout
                .parse()
                .map_err(|_| Error::configuration("Invalid XWALKDRIVER_SCRIPT_TIMEOUT"))?;
        }

        if let Ok(depth) = env::var("XWALKDRIVER_QUEUE_DEPTH") {
            config.command_queue_depth = depth
                .parse()
                .map_err(|_| Error::configuration("Invalid XWALKDRIVER_QUEUE_DEPTH"))?;
        }

        if let Ok(capacity) = env::var("XWALKDRIVER_LOG_CAPACITY") {
            config.log_buffer_capacity = capacity
                .parse()
                .map_err(|_| Error::configuration("Invalid XWALKDRIVER_LOG_CAPACITY"))?;
        }

        if let Ok(log_level) = env::var("XWALKDRIVER_LOG_LEVEL") {
            config.log_level = log_level;
        }

        Ok(config)
    }

    /// Bind address parsed from host + port
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    /// Load configuration from a file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::configuration(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }
}
