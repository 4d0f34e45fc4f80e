//! Connection identity handed to handlers.

use std::fmt;
use std::net::SocketAddr;

/// Opaque connection identifier, unique for the lifetime of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client connection as seen by handlers.
#[derive(Debug, Clone)]
pub struct Conn {
    pub id: ConnId,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
}

impl Conn {
    pub fn new(id: ConnId, peer_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            local_addr,
        }
    }
}
