//! Cluster Topology
//!
//! A [`Cluster`] holds one cluster's host directory and its shared context,
//! decoded from a YAML mapping:
//!
//! - the reserved `context` entry decodes once into the cluster context,
//!   which is then tagged with the cluster's name
//! - every other entry is a host, keyed by host name and built by the
//!   injected [`HostFactory`]
//!
//! A payload without a `context` entry is rejected and leaves the cluster
//! empty. Decoding always starts from a clean slate, so a second payload
//! replaces the first rather than merging into it.
//!
//! Per-host policy lookups go by numeric host id. The host map is published
//! as an immutable snapshot, so lookups never block on or observe a
//! half-built map; a decode in progress may briefly show an empty cluster.

pub mod facets;
pub mod host;


pub use facets::{
    ConnectionChangedNotifier, ConnectionManager, ConnectionStrategy, FixedIntervalStrategy,
    FlagTerminationHandler, ListenerConnectionManager, LoggingNotifier, TerminationEventHandler,
};
pub use host::{ClusterContext, HostDetails, HostFacets, StandardClusterContext, StandardHostDetails};

use crate::connector::{ConnectHandle, Dialer, RemoteConnector};
use crate::context::NetworkContext;
use crate::event_loop::Scheduler;
use crate::{NetworkError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Numeric host identifier, unique within a cluster
pub type HostId = u32;

/// Entry name reserved for the shared cluster context
pub const CONTEXT_KEY: &str = "context";

/// Builds a host record from its name and payload value
pub type HostFactory<H> = Arc<dyn Fn(&str, &Value) -> Result<H> + Send + Sync>;

type HostMap<H> = BTreeMap<String, Arc<H>>;

/// Host directory plus shared context for one named cluster
pub struct Cluster<H: HostDetails, C: ClusterContext<H>> {
    name: String,
    hosts: RwLock<Arc<HostMap<H>>>,
    context: RwLock<Option<Arc<C>>>,
    host_factory: HostFactory<H>,
    closed: AtomicBool,
}

impl<H, C> Cluster<H, C>
where
    H: HostDetails + DeserializeOwned,
    C: ClusterContext<H>,
{
    /// Cluster whose hosts decode straight from their payload values
    pub fn with_serde(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Arc::new(|_name: &str, value: &Value| -> Result<H> {
                Ok(serde_yaml::from_value(value.clone())?)
            }),
        )
    }
}

impl<H, C> Cluster<H, C>
where
    H: HostDetails,
    C: ClusterContext<H>,
{
    pub fn new(name: impl Into<String>, host_factory: HostFactory<H>) -> Self {
        Self {
            name: name.into(),
            hosts: RwLock::new(Arc::new(BTreeMap::new())),
            context: RwLock::new(None),
            host_factory,
            closed: AtomicBool::new(false),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.name
    }

    /// Shared context from the last successful decode
    pub fn context(&self) -> Option<Arc<C>> {
        self.context.read().clone()
    }

    /// Snapshot of the host map, ordered by host name
    pub fn host_details(&self) -> Arc<BTreeMap<String, Arc<H>>> {
        self.hosts.read().clone()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// First host whose id matches, scanning in host-name order
    pub fn find_host(&self, host_id: HostId) -> Option<Arc<H>> {
        self.hosts
            .read()
            .values()
            .find(|host| host.host_id() == host_id)
            .cloned()
    }

    pub fn find_connection_strategy(&self, host_id: HostId) -> Option<Arc<dyn ConnectionStrategy>> {
        self.find_host(host_id)?.connection_strategy()
    }

    pub fn find_connection_manager(&self, host_id: HostId) -> Option<Arc<dyn ConnectionManager>> {
        self.find_host(host_id)?.connection_manager()
    }

    pub fn find_termination_event_handler(
        &self,
        host_id: HostId,
    ) -> Option<Arc<dyn TerminationEventHandler>> {
        self.find_host(host_id)?.termination_event_handler()
    }

    pub fn find_cluster_notifier(
        &self,
        host_id: HostId,
    ) -> Option<Arc<dyn ConnectionChangedNotifier>> {
        self.find_host(host_id)?.cluster_notifier()
    }

    /// Offer every host to the context so it can install per-host policy.
    ///
    /// Returns the number of hosts visited.
    pub fn install(&self) -> Result<usize> {
        if self.is_closed() {
            return Err(NetworkError::closed(format!("cluster '{}'", self.name)));
        }

        let context = self
            .context()
            .ok_or_else(|| NetworkError::required_field_missing(CONTEXT_KEY))?;
        let hosts = self.host_details();

        for host in hosts.values() {
            context.accept(host);
        }

        debug!(cluster = %self.name, hosts = hosts.len(), "Cluster context installed");
        Ok(hosts.len())
    }

    /// Dial the host with `host_id` through `connector`, paced by the host's
    /// connection strategy or, without one, the connector's default interval.
    pub fn connect_host<D: Dialer>(
        &self,
        host_id: HostId,
        connector: &RemoteConnector<D>,
        scheduler: Arc<dyn Scheduler>,
        context: NetworkContext,
    ) -> Result<ConnectHandle> {
        let host = self.find_host(host_id).ok_or_else(|| {
            NetworkError::configuration(
                format!("cluster '{}' has no host with id {}", self.name, host_id),
                Some("host_id"),
            )
        })?;

        let retry_interval = host
            .connection_strategy()
            .map(|strategy| strategy.retry_interval())
            .unwrap_or_else(|| connector.default_retry_interval());

        connector.connect(
            host.connect_uri(),
            scheduler,
            context.with_host_id(host_id),
            retry_interval,
        )
    }

    /// Close every host, continuing past failures. Terminal.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let hosts = {
            let mut published = self.hosts.write();
            *self.context.write() = None;
            std::mem::take(&mut *published)
        };
        close_hosts(&self.name, &hosts);

        info!(cluster = %self.name, hosts = hosts.len(), "Cluster closed");
    }
}

impl<H, C> Cluster<H, C>
where
    H: HostDetails,
    C: ClusterContext<H> + DeserializeOwned,
{
    /// Replace the topology with the one described by `payload`.
    ///
    /// Existing hosts and context are cleared before anything is decoded;
    /// on failure the cluster is left empty.
    pub fn read(&self, payload: &Value) -> Result<()> {
        if self.is_closed() {
            return Err(NetworkError::closed(format!("cluster '{}'", self.name)));
        }

        *self.hosts.write() = Arc::new(BTreeMap::new());
        *self.context.write() = None;

        let empty = Mapping::new();
        let entries = match payload {
            Value::Mapping(entries) => entries,
            Value::Null => &empty,
            _ => {
                return Err(NetworkError::protocol(format!(
                    "cluster '{}' payload must be a mapping",
                    self.name
                )))
            }
        };

        let mut hosts = HostMap::new();
        let mut context = None;

        for (key, value) in entries {
            let entry = match key.as_str() {
                Some(entry) => entry,
                None => {
                    close_hosts(&self.name, &hosts);
                    return Err(NetworkError::protocol(format!(
                        "cluster '{}' has a non-string entry name",
                        self.name
                    )));
                }
            };

            let decoded = if entry == CONTEXT_KEY {
                self.decode_context(value).map(|c| context = Some(c))
            } else {
                (self.host_factory)(entry, value).map(|host| {
                    hosts.insert(entry.to_string(), Arc::new(host));
                })
            };

            if let Err(e) = decoded {
                close_hosts(&self.name, &hosts);
                return Err(NetworkError::protocol_with_source(
                    format!("cluster '{}': cannot decode entry '{}'", self.name, entry),
                    e,
                ));
            }
        }

        let context = match context {
            Some(context) => context,
            None => {
                close_hosts(&self.name, &hosts);
                return Err(NetworkError::required_field_missing(CONTEXT_KEY));
            }
        };

        // Close sets the flag before taking this lock
        let mut published = self.hosts.write();
        if self.is_closed() {
            drop(published);
            close_hosts(&self.name, &hosts);
            return Err(NetworkError::closed(format!("cluster '{}'", self.name)));
        }
        let count = hosts.len();
        *self.context.write() = Some(Arc::new(context));
        *published = Arc::new(hosts);
        drop(published);

        info!(cluster = %self.name, hosts = count, "Cluster topology decoded");
        Ok(())
    }

    pub fn read_yaml(&self, yaml: &str) -> Result<()> {
        let payload: Value = serde_yaml::from_str(yaml)?;
        self.read(&payload)
    }

    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = std::fs::read_to_string(path.as_ref())?;
        self.read_yaml(&content)
    }

    fn decode_context(&self, value: &Value) -> Result<C> {
        let mut context: C = serde_yaml::from_value(value.clone())?;
        context.set_cluster_name(&self.name);
        Ok(context)
    }
}

impl<H, C> Cluster<H, C>
where
    H: HostDetails + Serialize,
    C: ClusterContext<H>,
{
    /// Encode the hosts, one entry per host name.
    ///
    /// The context is not emitted; it is owned by whoever supplies the
    /// payload and must be added back before the result can be decoded.
    pub fn to_value(&self) -> Result<Value> {
        let mut entries = Mapping::new();
        for (name, host) in self.host_details().iter() {
            entries.insert(Value::String(name.clone()), serde_yaml::to_value(host.as_ref())?);
        }
        Ok(Value::Mapping(entries))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_value()?)?)
    }
}

fn close_hosts<H: HostDetails>(cluster: &str, hosts: &HostMap<H>) {
    for (name, host) in hosts {
        if let Err(e) = host.try_close() {
            warn!(cluster, host = %name, error = %e, "Failed to close host, continuing");
        }
    }
}

impl<H: HostDetails, C: ClusterContext<H>> std::fmt::Debug for Cluster<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("hosts", &self.hosts.read().keys().collect::<Vec<_>>())
            .field("has_context", &self.context.read().is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}
