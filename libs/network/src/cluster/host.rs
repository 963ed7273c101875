//! Host Records and Cluster Contexts
//!
//! [`HostDetails`] is one peer's entry in a topology; [`ClusterContext`] is
//! the cluster-wide settings object that, once a topology has been decoded,
//! is offered every host so it can install that host's policy facets.
//!
//! [`StandardHostDetails`] and [`StandardClusterContext`] are the stock
//! implementations, decoded from YAML like:
//!
//! ```yaml
//! context:
//!   retry_interval_ms: 500
//! host1:
//!   host_id: 1
//!   connect_uri: "10.0.0.1:9090"
//! ```

use super::facets::{
    ConnectionChangedNotifier, ConnectionManager, ConnectionStrategy, FixedIntervalStrategy,
    FlagTerminationHandler, ListenerConnectionManager, LoggingNotifier, TerminationEventHandler,
};
use super::HostId;
use crate::closeable::Closeable;
use crate::Result;
use cluster_config::connectivity;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One remote peer's configuration and policy bundle
pub trait HostDetails: Closeable + 'static {
    /// Unique within a topology
    fn host_id(&self) -> HostId;

    /// Endpoint name handed to the address resolver
    fn connect_uri(&self) -> &str;

    fn connection_strategy(&self) -> Option<Arc<dyn ConnectionStrategy>>;

    fn connection_manager(&self) -> Option<Arc<dyn ConnectionManager>>;

    fn termination_event_handler(&self) -> Option<Arc<dyn TerminationEventHandler>>;

    fn cluster_notifier(&self) -> Option<Arc<dyn ConnectionChangedNotifier>>;
}

/// Shared configuration applied to every host of a topology
pub trait ClusterContext<H: HostDetails>: Send + Sync + 'static {
    fn cluster_name(&self) -> &str;

    /// Tag the context with the topology that decoded it
    fn set_cluster_name(&mut self, name: &str);

    /// Propagate cluster-wide settings into one host
    fn accept(&self, host: &H);
}

/// Facets installed into a [`StandardHostDetails`]
#[derive(Clone, Default)]
pub struct HostFacets {
    pub connection_strategy: Option<Arc<dyn ConnectionStrategy>>,
    pub connection_manager: Option<Arc<dyn ConnectionManager>>,
    pub termination_event_handler: Option<Arc<dyn TerminationEventHandler>>,
    pub cluster_notifier: Option<Arc<dyn ConnectionChangedNotifier>>,
}

impl std::fmt::Debug for HostFacets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFacets")
            .field("connection_strategy", &self.connection_strategy.is_some())
            .field("connection_manager", &self.connection_manager.is_some())
            .field(
                "termination_event_handler",
                &self.termination_event_handler.is_some(),
            )
            .field("cluster_notifier", &self.cluster_notifier.is_some())
            .finish()
    }
}

/// Host record with an id, an endpoint and installable facets
#[derive(Debug, Serialize, Deserialize)]
pub struct StandardHostDetails {
    pub host_id: HostId,
    pub connect_uri: String,

    #[serde(skip)]
    facets: RwLock<HostFacets>,

    #[serde(skip)]
    closed: AtomicBool,
}

impl StandardHostDetails {
    pub fn new(host_id: HostId, connect_uri: impl Into<String>) -> Self {
        Self {
            host_id,
            connect_uri: connect_uri.into(),
            facets: RwLock::new(HostFacets::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Replace every facet at once
    pub fn set_facets(&self, facets: HostFacets) {
        *self.facets.write() = facets;
    }

    pub fn facets(&self) -> HostFacets {
        self.facets.read().clone()
    }
}

impl Closeable for StandardHostDetails {
    fn try_close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(handler) = self.termination_event_handler() {
            handler.on_terminate(self.host_id);
        }
        debug!(host_id = self.host_id, connect_uri = %self.connect_uri, "Host closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl HostDetails for StandardHostDetails {
    fn host_id(&self) -> HostId {
        self.host_id
    }

    fn connect_uri(&self) -> &str {
        &self.connect_uri
    }

    fn connection_strategy(&self) -> Option<Arc<dyn ConnectionStrategy>> {
        self.facets.read().connection_strategy.clone()
    }

    fn connection_manager(&self) -> Option<Arc<dyn ConnectionManager>> {
        self.facets.read().connection_manager.clone()
    }

    fn termination_event_handler(&self) -> Option<Arc<dyn TerminationEventHandler>> {
        self.facets.read().termination_event_handler.clone()
    }

    fn cluster_notifier(&self) -> Option<Arc<dyn ConnectionChangedNotifier>> {
        self.facets.read().cluster_notifier.clone()
    }
}

/// Cluster-wide settings installing the stock facets into each host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardClusterContext {
    /// Set from the topology, never read from the payload
    #[serde(skip)]
    cluster_name: String,

    pub retry_interval_ms: u64,

    /// Log every connection change through a [`LoggingNotifier`]
    pub log_connection_changes: bool,
}

impl Default for StandardClusterContext {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            retry_interval_ms: connectivity::reconnect::DEFAULT_RETRY_INTERVAL_MS,
            log_connection_changes: true,
        }
    }
}

impl StandardClusterContext {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl ClusterContext<StandardHostDetails> for StandardClusterContext {
    fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn set_cluster_name(&mut self, name: &str) {
        self.cluster_name = name.to_string();
    }

    fn accept(&self, host: &StandardHostDetails) {
        let manager = Arc::new(ListenerConnectionManager::new());

        let notifier: Option<Arc<dyn ConnectionChangedNotifier>> = if self.log_connection_changes {
            let notifier = Arc::new(LoggingNotifier::new(self.cluster_name.clone()));
            manager.add_listener(notifier.clone());
            Some(notifier as Arc<dyn ConnectionChangedNotifier>)
        } else {
            None
        };

        host.set_facets(HostFacets {
            connection_strategy: Some(Arc::new(FixedIntervalStrategy::new(self.retry_interval()))),
            connection_manager: Some(manager),
            termination_event_handler: Some(Arc::new(FlagTerminationHandler::new())),
            cluster_notifier: notifier,
        });

        debug!(cluster = %self.cluster_name, host_id = host.host_id, "Installed host facets");
    }
}
