//! Cooperative Event Loop
//!
//! A single-threaded, cooperative task runner. Registered [`EventHandler`]s
//! are polled in turn; each `action()` must return quickly without blocking
//! the shared thread and reports its outcome as a [`HandlerStatus`]:
//!
//! - `Progress`: did useful work, poll again soon
//! - `Idle`: nothing to do this pass
//! - `Retire`: remove me permanently
//!
//! Handlers may register further handlers from inside `action()`; those are
//! queued and join the rotation on the next pass.
//!
//! The loop can be driven manually with [`EventLoop::run_once`] or hosted on
//! a tokio task with [`EventLoop::run`], which pauses after idle passes.

use crate::Result;
use cluster_config::{connectivity, ConnectivityConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a single handler step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    Progress,
    Idle,
    Retire,
}

/// A pollable task owned by an event loop
pub trait EventHandler: Send {
    /// Perform one non-blocking step.
    ///
    /// An `Err` removes the handler just like `Retire`, after logging.
    fn action(&mut self) -> Result<HandlerStatus>;

    /// Called before the loop removes the handler during shutdown
    fn notify_closing(&mut self) {}

    /// Release whatever the handler owns. Called once on removal.
    fn close(&mut self) {}

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Registration point for event handlers
pub trait Scheduler: Send + Sync {
    fn register(&self, handler: Box<dyn EventHandler>);
}

/// Single-threaded cooperative scheduler
pub struct EventLoop {
    name: String,
    /// Handlers registered since the last pass
    incoming: Mutex<Vec<Box<dyn EventHandler>>>,
    /// Handlers in rotation, only touched by the polling thread
    handlers: Mutex<Vec<Box<dyn EventHandler>>>,
    closed: AtomicBool,
    idle_pause: Duration,
}

impl EventLoop {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_idle_pause(
            name,
            Duration::from_micros(connectivity::event_loop::DEFAULT_IDLE_PAUSE_US),
        )
    }

    pub fn with_idle_pause(name: impl Into<String>, idle_pause: Duration) -> Self {
        Self {
            name: name.into(),
            incoming: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            idle_pause,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &ConnectivityConfig) -> Self {
        Self::with_idle_pause(name, config.event_loop_idle_pause())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Poll every handler once.
    ///
    /// Returns `true` if at least one handler reported progress.
    pub fn run_once(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let mut handlers = self.handlers.lock();
        handlers.append(&mut self.incoming.lock());

        let mut progressed = false;
        handlers.retain_mut(|handler| match handler.action() {
            Ok(HandlerStatus::Progress) => {
                progressed = true;
                true
            }
            Ok(HandlerStatus::Idle) => true,
            Ok(HandlerStatus::Retire) => {
                debug!(event_loop = %self.name, handler = handler.name(), "Handler retired");
                handler.close();
                false
            }
            Err(e) => {
                warn!(
                    event_loop = %self.name,
                    handler = handler.name(),
                    error = %e,
                    "Handler failed, removing it from the loop"
                );
                handler.close();
                false
            }
        });

        progressed
    }

    /// Drive the loop until it is closed
    pub async fn run(self: Arc<Self>) {
        info!(event_loop = %self.name, "Event loop started");

        while !self.is_closed() {
            if self.run_once() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.idle_pause).await;
            }
        }

        info!(event_loop = %self.name, "Event loop stopped");
    }

    /// Spawn [`EventLoop::run`] on the current tokio runtime
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Stop polling and close every handler
    pub fn close(&self) {
        let mut handlers = self.handlers.lock();
        {
            let mut incoming = self.incoming.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            handlers.append(&mut incoming);
        }

        for handler in handlers.iter_mut() {
            handler.notify_closing();
        }
        for mut handler in handlers.drain(..) {
            handler.close();
        }

        info!(event_loop = %self.name, "Event loop closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Handlers in rotation plus those waiting to join
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len() + self.incoming.lock().len()
    }
}

impl Scheduler for EventLoop {
    fn register(&self, mut handler: Box<dyn EventHandler>) {
        let mut incoming = self.incoming.lock();
        if self.is_closed() {
            drop(incoming);
            warn!(event_loop = %self.name, handler = handler.name(), "Event loop closed, closing handler");
            handler.notify_closing();
            handler.close();
            return;
        }
        incoming.push(handler);
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
