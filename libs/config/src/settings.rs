//! Connectivity Configuration Module
//!
//! Provides configuration loading for the connector and topology layers.
//! Supports an optional TOML file with `CLUSTER_`-prefixed environment
//! variables layered on top.

use crate::connectivity;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Prefix shared by every environment override (`CLUSTER_TCP_CLIENT_BUFFER_SIZE`, ...)
pub const ENV_PREFIX: &str = "CLUSTER";

/// Connectivity tunables
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Send and receive buffer size for every connector-opened socket
    pub tcp_client_buffer_size: usize,

    /// Interval between connection attempts to the same peer
    pub retry_interval_ms: u64,

    /// Heartbeat interval handed to protocol handlers through the session context
    pub heartbeat_interval_ms: u64,

    /// Pause applied by the event loop driver after an idle pass
    pub event_loop_idle_pause_us: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            tcp_client_buffer_size: connectivity::tcp::DEFAULT_CLIENT_BUFFER_SIZE,
            retry_interval_ms: connectivity::reconnect::DEFAULT_RETRY_INTERVAL_MS,
            heartbeat_interval_ms: connectivity::session::DEFAULT_HEARTBEAT_INTERVAL_MS,
            event_loop_idle_pause_us: connectivity::event_loop::DEFAULT_IDLE_PAUSE_US,
        }
    }
}

impl ConnectivityConfig {
    /// Load configuration from an optional file with process environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration from the process environment only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load configuration, reading overrides from `env` instead of the
    /// process environment when it is supplied.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            debug!("Loading connectivity config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (CLUSTER_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let config: ConnectivityConfig = builder
            .build()
            .context("Failed to build connectivity configuration")?
            .try_deserialize()
            .context("Failed to deserialize connectivity configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the connector cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.tcp_client_buffer_size == 0 {
            bail!("tcp_client_buffer_size must be greater than zero");
        }
        if self.retry_interval_ms == 0 {
            bail!("retry_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn event_loop_idle_pause(&self) -> Duration {
        Duration::from_micros(self.event_loop_idle_pause_us)
    }
}
