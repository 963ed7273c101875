//! # Cluster Connectivity Configuration
//!
//! This crate provides the tunables and defaults shared by the cluster
//! network layer, so connector and topology code never hardcodes them.
//!
//! ## Features
//!
//! - **Connectivity Defaults**: TCP buffer sizing, retry cadence, heartbeats
//! - **Layered Loading**: optional TOML file plus `CLUSTER_` environment overrides
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cluster_config::{connectivity, ConnectivityConfig};
//!
//! let config = ConnectivityConfig::from_env().unwrap();
//! assert!(config.tcp_client_buffer_size > 0);
//! let _default = connectivity::DEFAULT_TCP_CLIENT_BUFFER_SIZE;
//! ```

pub mod connectivity;
pub mod settings;

// Re-export commonly used types
pub use settings::{ConnectivityConfig, ENV_PREFIX};
