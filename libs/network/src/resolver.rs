//! Endpoint Resolution
//!
//! Maps symbolic endpoint names to socket addresses. [`TcpRegistry`] keeps
//! an explicit name table and falls back to parsing `host:port` strings, so
//! deployments can mix logical names and literal addresses.

use crate::{NetworkError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::debug;

/// Resolves a symbolic endpoint name to a concrete socket address
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<SocketAddr>;
}

/// Named endpoint registry with `host:port` fallback
#[derive(Debug, Default)]
pub struct TcpRegistry {
    endpoints: RwLock<HashMap<String, SocketAddr>>,
}

impl TcpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a logical name to an address, replacing any previous binding
    pub fn register(&self, name: impl Into<String>, addr: SocketAddr) -> Option<SocketAddr> {
        let name = name.into();
        debug!(endpoint = %name, %addr, "Registered endpoint");
        self.endpoints.write().insert(name, addr)
    }

    pub fn unregister(&self, name: &str) -> Option<SocketAddr> {
        self.endpoints.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    fn parse_host_port(name: &str) -> Result<SocketAddr> {
        let mut candidates = name
            .to_socket_addrs()
            .map_err(|e| NetworkError::resolution(name, e.to_string()))?;

        candidates
            .next()
            .ok_or_else(|| NetworkError::resolution(name, "no addresses returned"))
    }
}

impl AddressResolver for TcpRegistry {
    fn resolve(&self, name: &str) -> Result<SocketAddr> {
        // Fast path: explicitly registered names
        if let Some(addr) = self.endpoints.read().get(name) {
            return Ok(*addr);
        }

        if !name.contains(':') {
            return Err(NetworkError::resolution(name, "unknown endpoint name"));
        }

        Self::parse_host_port(name)
    }
}
