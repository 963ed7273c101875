//! Connectivity defaults
//!
//! Default values used by the connector and topology layers when no
//! configuration file or environment override supplies one.

/// TCP client socket defaults
pub mod tcp {
    /// Send/receive buffer size applied to every connector-opened socket (8 MiB)
    pub const DEFAULT_CLIENT_BUFFER_SIZE: usize = 8 << 20;

    /// Environment variable overriding the client buffer size
    pub const CLIENT_BUFFER_SIZE_ENV: &str = "CLUSTER_TCP_CLIENT_BUFFER_SIZE";
}

/// Reconnect cadence defaults
pub mod reconnect {
    /// Interval between two connection attempts to the same peer (milliseconds)
    pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_000;
}

/// Session defaults handed to protocol handlers
pub mod session {
    /// Heartbeat interval advertised to protocol handlers (milliseconds)
    pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 20_000;
}

/// Event loop defaults
pub mod event_loop {
    /// Pause applied when a full pass over the handlers made no progress (microseconds)
    pub const DEFAULT_IDLE_PAUSE_US: u64 = 100;
}

pub use tcp::DEFAULT_CLIENT_BUFFER_SIZE as DEFAULT_TCP_CLIENT_BUFFER_SIZE;
