//! TCP Dialers
//!
//! A [`Dialer`] opens outbound sockets in two phases so a connection attempt
//! never blocks the event loop thread: `start` issues a non-blocking connect
//! and `poll` reports whether the handshake has finished.
//!
//! [`TcpDialer`] tunes every socket it opens for low latency:
//! `TCP_NODELAY`, send/receive buffers sized by the global tunable, no read
//! timeout, linger disabled, non-blocking mode.

use cluster_config::ConnectivityConfig;
use nix::errno::Errno;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream};
use thiserror::Error;

/// Why a connection attempt did not produce a channel
#[derive(Error, Debug)]
pub enum DialError {
    /// Another path already completed this logical connection
    #[error("peer is already connected")]
    Duplicate,

    /// Transient socket failure, worth retrying later
    #[error("connect failed: {0}")]
    Io(#[from] io::Error),
}

impl DialError {
    /// Classify an error reported by `connect`
    pub fn from_connect(error: io::Error) -> Self {
        if error.raw_os_error() == Some(Errno::EISCONN as i32) {
            DialError::Duplicate
        } else {
            DialError::Io(error)
        }
    }
}

/// Two-phase, non-blocking socket establishment
pub trait Dialer: Send + Sync + 'static {
    /// State of a connect that has been issued but not yet completed
    type Pending: Send + 'static;

    /// Issue a connect to `addr` without waiting for the handshake
    fn start(&self, addr: SocketAddr) -> Result<Self::Pending, DialError>;

    /// Check a pending connect. `Ok(None)` means still in progress.
    fn poll(&self, pending: &mut Self::Pending) -> Result<Option<TcpStream>, DialError>;
}

/// Options applied to every socket a [`TcpDialer`] opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Send and receive buffer size in bytes
    pub buffer_size: usize,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
}

impl SocketOptions {
    pub fn from_config(config: &ConnectivityConfig) -> Self {
        Self {
            buffer_size: config.tcp_client_buffer_size,
            nodelay: true,
        }
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            buffer_size: crate::tcp_client_buffer_size(),
            nodelay: true,
        }
    }
}

/// A connect issued by [`TcpDialer::start`]
#[derive(Debug)]
pub struct PendingConnect {
    /// Taken once the handshake completes
    socket: Option<Socket>,
    addr: SocketAddr,
}

impl PendingConnect {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Non-blocking TCP dialer backed by `socket2`
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    options: SocketOptions,
}

impl TcpDialer {
    pub fn new(options: SocketOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> SocketOptions {
        self.options
    }

    fn open_socket(&self, addr: SocketAddr) -> io::Result<Socket> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

        // Buffers must be sized before connect for window scaling to apply
        socket.set_nodelay(self.options.nodelay)?;
        socket.set_recv_buffer_size(self.options.buffer_size)?;
        socket.set_send_buffer_size(self.options.buffer_size)?;
        socket.set_read_timeout(None)?;
        socket.set_linger(None)?;
        socket.set_nonblocking(true)?;

        Ok(socket)
    }
}

fn connect_in_progress(error: &io::Error) -> bool {
    error.raw_os_error() == Some(Errno::EINPROGRESS as i32)
        || error.kind() == io::ErrorKind::WouldBlock
}

impl Dialer for TcpDialer {
    type Pending = PendingConnect;

    fn start(&self, addr: SocketAddr) -> Result<PendingConnect, DialError> {
        let socket = self.open_socket(addr)?;

        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {}
            Err(e) => return Err(DialError::from_connect(e)),
        }

        Ok(PendingConnect {
            socket: Some(socket),
            addr,
        })
    }

    fn poll(&self, pending: &mut PendingConnect) -> Result<Option<TcpStream>, DialError> {
        let connected = match pending.socket.as_ref() {
            None => {
                return Err(DialError::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "connect attempt already completed",
                )))
            }
            Some(socket) => {
                if let Some(e) = socket.take_error()? {
                    return Err(DialError::from_connect(e));
                }
                match socket.peer_addr() {
                    Ok(_) => true,
                    Err(e) if e.kind() == io::ErrorKind::NotConnected => false,
                    Err(e) => return Err(DialError::from_connect(e)),
                }
            }
        };

        if !connected {
            return Ok(None);
        }
        Ok(pending.socket.take().map(TcpStream::from))
    }
}
