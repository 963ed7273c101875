//! Closeable Resources
//!
//! Every resource owned by the connector or the topology exposes an
//! idempotent close. Failures while closing are logged and swallowed so
//! one broken resource never stops a cascading shutdown.

use crate::Result;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Idempotent, best-effort close
pub trait Closeable: Send + Sync {
    /// Release the resource, reporting failures to the caller
    fn try_close(&self) -> Result<()>;

    /// Release the resource, logging instead of propagating failures
    fn close(&self) {
        if let Err(e) = self.try_close() {
            warn!(error = %e, "Suppressed error while closing resource");
        }
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Close every resource, continuing past failures
pub fn close_all<'a, I>(resources: I)
where
    I: IntoIterator<Item = &'a dyn Closeable>,
{
    for resource in resources {
        resource.close();
    }
}

/// Connected socket handed to a protocol handler.
///
/// The handler owns the only strong reference; dropping the channel closes
/// the socket. The connector keeps a [`SocketCloser`] that can shut the
/// socket down while the handler still holds it.
pub struct Channel {
    stream: Arc<TcpStream>,
}

impl Channel {
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn shutdown(&self, how: Shutdown) -> std::io::Result<()> {
        self.stream.shutdown(how)
    }
}

impl From<TcpStream> for Channel {
    fn from(stream: TcpStream) -> Self {
        Self {
            stream: Arc::new(stream),
        }
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        (&*self.stream).read(buf)
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        (&*self.stream).write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        (&*self.stream).flush()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.stream.peer_addr().ok())
            .finish()
    }
}

/// Shuts down a connector-opened socket for as long as its [`Channel`] lives.
///
/// Holds no file descriptor of its own, so a handler dropping its channel
/// ends the connection immediately.
pub struct SocketCloser {
    stream: Weak<TcpStream>,
    closed: AtomicBool,
}

impl SocketCloser {
    pub fn new(channel: &Channel) -> Self {
        Self {
            stream: Arc::downgrade(&channel.stream),
            closed: AtomicBool::new(false),
        }
    }
}

impl Closeable for SocketCloser {
    fn try_close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Released by the handler already
        let Some(stream) = self.stream.upgrade() else {
            return Ok(());
        };

        match stream.shutdown(Shutdown::Both) {
            Ok(()) => {
                debug!(peer = ?stream.peer_addr().ok(), "Closed connector socket");
                Ok(())
            }
            // Peer already went away
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.stream.strong_count() == 0
    }
}

impl std::fmt::Debug for SocketCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketCloser")
            .field("peer", &self.stream.upgrade().and_then(|s| s.peer_addr().ok()))
            .field("closed", &self.is_closed())
            .finish()
    }
}
