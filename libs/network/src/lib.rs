//! Cluster Connectivity
//!
//! Keeps a process connected to a set of named remote peers and serves the
//! per-peer policy objects of a decoded cluster topology.
//!
//! - [`connector`]: reconnecting outbound connector, one cooperative task per
//!   connection intent, retrying at a fixed interval until a single hand-off
//! - [`cluster`]: host directory and shared context decoded from YAML, with
//!   facet lookups by numeric host id
//! - [`tracker`]: bulk release of sockets opened by one-shot attempts
//!
//! The cooperative [`event_loop::EventLoop`] runs the connector tasks and the
//! protocol handlers they hand off to.

pub mod closeable;
pub mod error;
pub mod tracker;

// Collaborators of the connector
pub mod clock;
pub mod context;
pub mod event_loop;
pub mod publisher;
pub mod resolver;

pub mod cluster;
pub mod connector;

// Re-export commonly used types
pub use closeable::{Channel, Closeable, SocketCloser};
pub use error::{NetworkError, Result};
pub use tracker::ResourceTracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::NetworkContext;
pub use event_loop::{EventHandler, EventLoop, HandlerStatus, Scheduler};
pub use publisher::{PublisherRegistry, QueuedWireOutPublisher, WireOutPublisher};
pub use resolver::{AddressResolver, TcpRegistry};

pub use cluster::{
    Cluster, ClusterContext, HostDetails, HostFactory, HostId, StandardClusterContext,
    StandardHostDetails,
};
pub use connector::{
    ConnectHandle, ConnectionHandlerFactory, DialError, Dialer, RemoteConnector, SocketOptions,
    TcpDialer,
};

use cluster_config::{connectivity, ConnectivityConfig};
use once_cell::sync::Lazy;
use tracing::warn;

static TCP_CLIENT_BUFFER_SIZE: Lazy<usize> = Lazy::new(|| match ConnectivityConfig::from_env() {
    Ok(config) => config.tcp_client_buffer_size,
    Err(e) => {
        warn!(
            error = %e,
            default = connectivity::DEFAULT_TCP_CLIENT_BUFFER_SIZE,
            "Invalid connectivity environment, using default TCP buffer size"
        );
        connectivity::DEFAULT_TCP_CLIENT_BUFFER_SIZE
    }
});

/// Send and receive buffer size for every connector-opened socket.
///
/// Read once from `CLUSTER_TCP_CLIENT_BUFFER_SIZE`, default 8 MiB.
pub fn tcp_client_buffer_size() -> usize {
    *TCP_CLIENT_BUFFER_SIZE
}
