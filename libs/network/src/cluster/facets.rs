//! Per-Host Policy Facets
//!
//! Each host in a topology carries up to four policy objects: how often to
//! retry, who tracks its connection state, who hears about changes, and who
//! is told when the host is terminated. The defaults here cover the common
//! deployment; anything else can be installed by a custom cluster context.

use super::HostId;
use cluster_config::connectivity;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Decides how outbound connections to a host are paced
pub trait ConnectionStrategy: Send + Sync {
    fn retry_interval(&self) -> Duration;
}

/// Receives connection up/down events for a host
pub trait ConnectionChangedNotifier: Send + Sync {
    fn on_connection_changed(&self, is_connected: bool, host_id: HostId);
}

/// Owns the connection state of a host and fans changes out to listeners
pub trait ConnectionManager: Send + Sync {
    fn add_listener(&self, listener: Arc<dyn ConnectionChangedNotifier>);

    fn on_connection_changed(&self, is_connected: bool, host_id: HostId);
}

/// Told when a host is taken out of service
pub trait TerminationEventHandler: Send + Sync {
    fn on_terminate(&self, host_id: HostId);

    fn is_terminated(&self) -> bool;
}

/// Retry at a constant interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedIntervalStrategy {
    interval: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedIntervalStrategy {
    fn default() -> Self {
        Self::new(Duration::from_millis(
            connectivity::reconnect::DEFAULT_RETRY_INTERVAL_MS,
        ))
    }
}

impl ConnectionStrategy for FixedIntervalStrategy {
    fn retry_interval(&self) -> Duration {
        self.interval
    }
}

/// Tracks which hosts are up and forwards every change to its listeners
#[derive(Default)]
pub struct ListenerConnectionManager {
    listeners: RwLock<Vec<Arc<dyn ConnectionChangedNotifier>>>,
    connected: RwLock<BTreeSet<HostId>>,
}

impl ListenerConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self, host_id: HostId) -> bool {
        self.connected.read().contains(&host_id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl ConnectionManager for ListenerConnectionManager {
    fn add_listener(&self, listener: Arc<dyn ConnectionChangedNotifier>) {
        self.listeners.write().push(listener);
    }

    fn on_connection_changed(&self, is_connected: bool, host_id: HostId) {
        let changed = if is_connected {
            self.connected.write().insert(host_id)
        } else {
            self.connected.write().remove(&host_id)
        };
        if !changed {
            debug!(host_id, is_connected, "Connection state unchanged");
            return;
        }

        // Listeners may call back into the manager
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_connection_changed(is_connected, host_id);
        }
    }
}

impl std::fmt::Debug for ListenerConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerConnectionManager")
            .field("listeners", &self.listener_count())
            .field("connected", &*self.connected.read())
            .finish()
    }
}

/// Logs connection changes under the cluster's name
#[derive(Debug, Clone)]
pub struct LoggingNotifier {
    cluster_name: String,
}

impl LoggingNotifier {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }
}

impl ConnectionChangedNotifier for LoggingNotifier {
    fn on_connection_changed(&self, is_connected: bool, host_id: HostId) {
        if is_connected {
            info!(cluster = %self.cluster_name, host_id, "Host connected");
        } else {
            info!(cluster = %self.cluster_name, host_id, "Host disconnected");
        }
    }
}

#[derive(Debug, Default)]
pub struct FlagTerminationHandler {
    terminated: AtomicBool,
}

impl FlagTerminationHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TerminationEventHandler for FlagTerminationHandler {
    fn on_terminate(&self, host_id: HostId) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            info!(host_id, "Host terminated");
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}
