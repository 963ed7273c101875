//! Outbound Event Publishers
//!
//! A [`WireOutPublisher`] queues encoded events for a protocol handler to
//! write out. Deployments that want per-key throttling install a throttled
//! variant into a [`PublisherRegistry`] at startup; nothing is looked up by
//! name at runtime, and asking for a variant nobody installed is a
//! configuration error.

use crate::closeable::Closeable;
use crate::{NetworkError, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Sink for encoded outbound events
pub trait WireOutPublisher: Closeable {
    /// Queue an event.
    ///
    /// `key` identifies the event for throttling publishers and is `None`
    /// when throttling is not required.
    fn put(&self, key: Option<&str>, event: Bytes) -> Result<()>;

    fn can_take_more_data(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool;
}

/// Builds a throttled publisher delegating to another publisher
pub type ThrottledPublisherFactory =
    Arc<dyn Fn(Duration, Arc<dyn WireOutPublisher>) -> Arc<dyn WireOutPublisher> + Send + Sync>;

/// In-memory publisher drained by the protocol handler
#[derive(Debug)]
pub struct QueuedWireOutPublisher {
    queue: Mutex<VecDeque<Bytes>>,
    /// Soft limit reported through `can_take_more_data`
    capacity: usize,
    closed: AtomicBool,
}

impl QueuedWireOutPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Take every queued event in arrival order
    pub fn drain(&self) -> Vec<Bytes> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Closeable for QueuedWireOutPublisher {
    fn try_close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.queue.lock().clear();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl WireOutPublisher for QueuedWireOutPublisher {
    fn put(&self, _key: Option<&str>, event: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(NetworkError::closed("publisher"));
        }
        self.queue.lock().push_back(event);
        Ok(())
    }

    fn can_take_more_data(&self) -> bool {
        self.len() < self.capacity
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Statically populated registry of optional publisher variants
#[derive(Default)]
pub struct PublisherRegistry {
    throttled: RwLock<Option<ThrottledPublisherFactory>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the throttled publisher add-on
    pub fn register_throttled(&self, factory: ThrottledPublisherFactory) {
        *self.throttled.write() = Some(factory);
    }

    pub fn has_throttled(&self) -> bool {
        self.throttled.read().is_some()
    }

    /// Create a publisher that coalesces events sharing a key within `period`
    pub fn new_throttled(
        &self,
        period: Duration,
        delegate: Arc<dyn WireOutPublisher>,
    ) -> Result<Arc<dyn WireOutPublisher>> {
        let factory = self.throttled.read().clone();
        match factory {
            Some(factory) => Ok(factory(period, delegate)),
            None => {
                warn!("Throttled publishing requested but no throttled publisher is installed");
                Err(NetworkError::configuration(
                    "throttled publisher add-on is not installed",
                    Some("throttled_publisher"),
                ))
            }
        }
    }
}

impl std::fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherRegistry")
            .field("throttled", &self.has_throttled())
            .finish()
    }
}
