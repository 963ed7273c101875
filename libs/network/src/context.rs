//! Network Session Context
//!
//! Per-attempt session bag handed to the protocol handler factory once a
//! connection exists: the channel, which side initiated it, and sideband
//! settings the handler needs.

use crate::closeable::Channel;
use crate::cluster::HostId;
use crate::publisher::WireOutPublisher;
use cluster_config::{connectivity, ConnectivityConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct NetworkContext {
    channel: Option<Channel>,
    acceptor: bool,
    host_id: Option<HostId>,
    heartbeat_interval: Duration,
    publisher: Option<Arc<dyn WireOutPublisher>>,
    attributes: HashMap<String, String>,
}

impl NetworkContext {
    pub fn new() -> Self {
        Self {
            channel: None,
            acceptor: true,
            host_id: None,
            heartbeat_interval: Duration::from_millis(
                connectivity::session::DEFAULT_HEARTBEAT_INTERVAL_MS,
            ),
            publisher: None,
            attributes: HashMap::new(),
        }
    }

    /// Fresh context carrying the configured heartbeat interval
    pub fn from_config(config: &ConnectivityConfig) -> Self {
        Self::new().with_heartbeat_interval(config.heartbeat_interval())
    }

    pub fn with_host_id(mut self, host_id: HostId) -> Self {
        self.host_id = Some(host_id);
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn WireOutPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn set_channel(&mut self, channel: Channel) {
        self.channel = Some(channel);
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    /// Take ownership of the channel, leaving the context without one
    pub fn take_channel(&mut self) -> Option<Channel> {
        self.channel.take()
    }

    pub fn set_acceptor(&mut self, acceptor: bool) {
        self.acceptor = acceptor;
    }

    /// `true` when the connection was accepted, `false` when this side dialled it
    pub fn is_acceptor(&self) -> bool {
        self.acceptor
    }

    pub fn host_id(&self) -> Option<HostId> {
        self.host_id
    }

    pub fn set_host_id(&mut self, host_id: HostId) {
        self.host_id = Some(host_id);
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn publisher(&self) -> Option<&Arc<dyn WireOutPublisher>> {
        self.publisher.as_ref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl Default for NetworkContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkContext")
            .field("peer", &self.channel.as_ref().and_then(|c| c.peer_addr().ok()))
            .field("acceptor", &self.acceptor)
            .field("host_id", &self.host_id)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("publisher", &self.publisher.is_some())
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::QueuedWireOutPublisher;

    #[test]
    fn test_builder_populates_sideband_fields() {
        let ctx = NetworkContext::new()
            .with_host_id(3)
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_publisher(Arc::new(QueuedWireOutPublisher::new(16)))
            .with_attribute("session", "replication");

        assert_eq!(ctx.host_id(), Some(3));
        assert_eq!(ctx.heartbeat_interval(), Duration::from_secs(5));
        assert!(ctx.publisher().is_some());
        assert_eq!(ctx.attribute("session"), Some("replication"));
        assert!(ctx.channel().is_none());
        assert!(ctx.is_acceptor());
    }

    #[test]
    fn test_heartbeat_from_config() {
        let config = ConnectivityConfig {
            heartbeat_interval_ms: 750,
            ..Default::default()
        };
        let ctx = NetworkContext::from_config(&config);
        assert_eq!(ctx.heartbeat_interval(), Duration::from_millis(750));
    }
}
