//! Reconnecting Remote Connector
//!
//! Maintains a standing intent to reach a named peer. Each call to
//! [`RemoteConnector::connect`] registers a one-shot [`ReconnectHandler`] on
//! an event loop; the handler retries socket establishment at a fixed
//! interval until one attempt succeeds, hands the connection to the
//! protocol handler factory, and then retires.
//!
//! ## Attempt cadence
//!
//! ```text
//! tick ──► closed? ──yes──► Retire
//!            │no
//!            ▼
//!        now < deadline? ──yes──► Idle
//!            │no
//!            ▼
//!        deadline = now + interval; dial
//!            │
//!            ├── duplicate connection ──► Retire (silently)
//!            ├── I/O failure ───────────► Idle (retry after interval)
//!            ├── in progress ───────────► poll on later ticks
//!            └── connected ─────────────► factory ──► track socket ──► register handler ──► Retire
//! ```
//!
//! Two attempts on the same handler are always at least one retry interval
//! apart, however often the loop ticks. A connect still in progress when the
//! next deadline arrives is abandoned and a fresh attempt is made.
//!
//! ## Shutdown
//!
//! Every socket handed off is recorded in the connector's
//! [`ResourceTracker`]. [`RemoteConnector::close`] seals the tracker and
//! shuts those sockets down. An attempt that completes after the seal closes
//! its own protocol handler and socket and never registers them.
//!
//! Reconnecting after a later disconnect is the caller's job: it issues a
//! fresh `connect()`.

pub mod dialer;

#[cfg(test)]
mod tests;

pub use dialer::{DialError, Dialer, PendingConnect, SocketOptions, TcpDialer};

use crate::clock::{Clock, SystemClock};
use crate::closeable::{Channel, Closeable, SocketCloser};
use crate::context::NetworkContext;
use crate::event_loop::{EventHandler, HandlerStatus, Scheduler};
use crate::resolver::AddressResolver;
use crate::tracker::ResourceTracker;
use crate::{NetworkError, Result};
use cluster_config::{connectivity, ConnectivityConfig};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Builds the protocol handler that runs over an established connection
pub trait ConnectionHandlerFactory: Send + Sync {
    fn build(&self, context: NetworkContext) -> Result<Box<dyn EventHandler>>;
}

impl<F> ConnectionHandlerFactory for F
where
    F: Fn(NetworkContext) -> Result<Box<dyn EventHandler>> + Send + Sync,
{
    fn build(&self, context: NetworkContext) -> Result<Box<dyn EventHandler>> {
        self(context)
    }
}

struct ConnectorInner<D: Dialer> {
    dialer: D,
    factory: Arc<dyn ConnectionHandlerFactory>,
    resolver: Arc<dyn AddressResolver>,
    clock: Arc<dyn Clock>,
    /// Used by callers that have no per-peer strategy
    default_retry_interval: Duration,
    resources: ResourceTracker,
    closed: AtomicBool,
}

/// Outbound connector shared by every connection intent it spawns
pub struct RemoteConnector<D: Dialer = TcpDialer> {
    inner: Arc<ConnectorInner<D>>,
}

impl<D: Dialer> Clone for RemoteConnector<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl RemoteConnector<TcpDialer> {
    /// Connector using the default TCP dialer and the system clock
    pub fn new(
        resolver: Arc<dyn AddressResolver>,
        factory: Arc<dyn ConnectionHandlerFactory>,
    ) -> Self {
        Self::with_dialer(resolver, factory, TcpDialer::default(), Arc::new(SystemClock))
    }

    /// Connector whose default retry interval comes from `config`
    pub fn from_config(
        resolver: Arc<dyn AddressResolver>,
        factory: Arc<dyn ConnectionHandlerFactory>,
        config: &ConnectivityConfig,
    ) -> Self {
        Self::build(
            resolver,
            factory,
            TcpDialer::default(),
            Arc::new(SystemClock),
            config.retry_interval(),
        )
    }
}

impl<D: Dialer> RemoteConnector<D> {
    pub fn with_dialer(
        resolver: Arc<dyn AddressResolver>,
        factory: Arc<dyn ConnectionHandlerFactory>,
        dialer: D,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::build(
            resolver,
            factory,
            dialer,
            clock,
            Duration::from_millis(connectivity::reconnect::DEFAULT_RETRY_INTERVAL_MS),
        )
    }

    fn build(
        resolver: Arc<dyn AddressResolver>,
        factory: Arc<dyn ConnectionHandlerFactory>,
        dialer: D,
        clock: Arc<dyn Clock>,
        default_retry_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                dialer,
                factory,
                resolver,
                clock,
                default_retry_interval,
                resources: ResourceTracker::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a reconnect handler for `endpoint` on `scheduler`.
    ///
    /// Fails immediately when the endpoint cannot be resolved; connection
    /// failures after that are retried silently every `retry_interval`.
    pub fn connect(
        &self,
        endpoint: &str,
        scheduler: Arc<dyn Scheduler>,
        context: NetworkContext,
        retry_interval: Duration,
    ) -> Result<ConnectHandle> {
        if self.is_closed() {
            return Err(NetworkError::closed("remote connector"));
        }

        let address = self.inner.resolver.resolve(endpoint)?;
        let closed = Arc::new(AtomicBool::new(false));

        let handler = ReconnectHandler {
            endpoint: endpoint.to_string(),
            address,
            retry_interval,
            next_attempt: None,
            exhausted: false,
            pending: None,
            context: Some(context),
            closed: Arc::clone(&closed),
            connector: Arc::clone(&self.inner),
            scheduler: Arc::clone(&scheduler),
        };

        debug!(endpoint, %address, ?retry_interval, "Registering reconnect handler");
        scheduler.register(Box::new(handler));

        Ok(ConnectHandle {
            endpoint: endpoint.to_string(),
            retry_interval,
            closed,
        })
    }

    /// Close every connection handed off so far. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let released = self.inner.resources.close_all();
        info!(released, "Remote connector closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn default_retry_interval(&self) -> Duration {
        self.inner.default_retry_interval
    }

    /// Sockets currently owned by the connector
    pub fn tracked_resources(&self) -> usize {
        self.inner.resources.len()
    }
}

impl<D: Dialer> std::fmt::Debug for RemoteConnector<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConnector")
            .field("closed", &self.is_closed())
            .field("resources", &self.inner.resources)
            .finish()
    }
}

/// Cancels a single connection intent from any thread
#[derive(Debug, Clone)]
pub struct ConnectHandle {
    endpoint: String,
    retry_interval: Duration,
    closed: Arc<AtomicBool>,
}

impl ConnectHandle {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// The handler retires on its next tick without another attempt
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One-shot event handler retrying a single endpoint
pub struct ReconnectHandler<D: Dialer> {
    endpoint: String,
    address: SocketAddr,
    retry_interval: Duration,
    /// Unset until the first attempt
    next_attempt: Option<Instant>,
    /// Set once the interval overflows the clock; no further attempts
    exhausted: bool,
    pending: Option<D::Pending>,
    /// Consumed by the successful attempt
    context: Option<NetworkContext>,
    closed: Arc<AtomicBool>,
    connector: Arc<ConnectorInner<D>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<D: Dialer> ReconnectHandler<D> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.connector.closed.load(Ordering::Acquire)
    }

    fn attempt_due(&self, now: Instant) -> bool {
        !self.exhausted && self.next_attempt.map_or(true, |deadline| now >= deadline)
    }

    fn schedule_next(&mut self, now: Instant) {
        match now.checked_add(self.retry_interval) {
            Some(deadline) => self.next_attempt = Some(deadline),
            None => {
                debug!(endpoint = %self.endpoint, "Retry interval unbounded, no further attempts");
                self.exhausted = true;
            }
        }
    }

    fn on_dial_error(&self, error: DialError) -> HandlerStatus {
        match error {
            DialError::Duplicate => {
                debug!(endpoint = %self.endpoint, "Peer already connected, retiring");
                HandlerStatus::Retire
            }
            DialError::Io(e) => {
                debug!(
                    endpoint = %self.endpoint,
                    address = %self.address,
                    error = %e,
                    "Connect attempt failed, retrying after interval"
                );
                HandlerStatus::Idle
            }
        }
    }

    fn hand_off(&mut self, stream: TcpStream) -> Result<HandlerStatus> {
        let peer = stream.peer_addr().ok();
        let channel = Channel::from(stream);
        let closer = SocketCloser::new(&channel);

        let mut context = self.context.take().unwrap_or_default();
        context.set_channel(channel);
        context.set_acceptor(false);

        let mut handler = self
            .connector
            .factory
            .build(context)
            .map_err(|e| NetworkError::handler_construction(&self.endpoint, e))?;

        match self.connector.resources.track(Box::new(closer)) {
            Ok(()) => {
                info!(endpoint = %self.endpoint, peer = ?peer, "Connection established");
                self.scheduler.register(handler);
            }
            Err(rejected) => {
                debug!(endpoint = %self.endpoint, "Connector closed during hand-off, dropping connection");
                handler.notify_closing();
                handler.close();
                rejected.close();
            }
        }

        Ok(HandlerStatus::Retire)
    }
}

impl<D: Dialer> EventHandler for ReconnectHandler<D> {
    fn action(&mut self) -> Result<HandlerStatus> {
        if self.is_closed() {
            return Ok(HandlerStatus::Retire);
        }

        let now = self.connector.clock.now();

        if let Some(mut pending) = self.pending.take() {
            match self.connector.dialer.poll(&mut pending) {
                Ok(Some(stream)) => return self.hand_off(stream),
                Ok(None) if !self.attempt_due(now) => {
                    self.pending = Some(pending);
                    return Ok(HandlerStatus::Idle);
                }
                Ok(None) => {
                    debug!(endpoint = %self.endpoint, "Connect still pending at next deadline, abandoning");
                }
                Err(e) => return Ok(self.on_dial_error(e)),
            }
        }

        if !self.attempt_due(now) {
            return Ok(HandlerStatus::Idle);
        }
        self.schedule_next(now);

        let mut pending = match self.connector.dialer.start(self.address) {
            Ok(pending) => pending,
            Err(e) => return Ok(self.on_dial_error(e)),
        };

        match self.connector.dialer.poll(&mut pending) {
            Ok(Some(stream)) => self.hand_off(stream),
            Ok(None) => {
                self.pending = Some(pending);
                Ok(HandlerStatus::Progress)
            }
            Err(e) => Ok(self.on_dial_error(e)),
        }
    }

    fn notify_closing(&mut self) {
        self.closed.store(true, Ordering::Release);
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.pending = None;
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}

impl<D: Dialer> std::fmt::Debug for ReconnectHandler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectHandler")
            .field("endpoint", &self.endpoint)
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}
