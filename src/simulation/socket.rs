//! Simulated UDP-style sockets and per-node address assignment.
//!
//! Sockets carry addressing state only; moving bytes between nodes is the job
//! of a [`BroadcastTransport`] such as the range-limited medium.

use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;

/// Well-known port the broadcast application listens and sends on.
pub const DEFAULT_PORT: u16 = 80;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Socket is not connected")]
    NotConnected,

    #[error("Broadcast to {0} requires allow_broadcast")]
    BroadcastNotAllowed(SocketAddrV4),

    #[error("No addresses left in {base}/{prefix_len}")]
    AddressSpaceExhausted { base: Ipv4Addr, prefix_len: u8 },

    #[error("Unknown sender node {0}")]
    UnknownNode(u32),
}

/// Outgoing socket: bound to the node address, connected to a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct SendSocket {
    node_id: u32,
    local: SocketAddrV4,
    peer: Option<SocketAddrV4>,
    allow_broadcast: bool,
}

impl SendSocket {
    pub fn new(node_id: u32, local: SocketAddrV4) -> Self {
        Self {
            node_id,
            local,
            peer: None,
            allow_broadcast: false,
        }
    }

    pub fn set_allow_broadcast(&mut self, allow: bool) {
        self.allow_broadcast = allow;
    }

    pub fn connect(&mut self, peer: SocketAddrV4) {
        self.peer = Some(peer);
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local
    }

    /// Destination for the next send, checking the broadcast permission.
    pub fn destination(&self) -> Result<SocketAddrV4, TransportError> {
        let peer = self.peer.ok_or(TransportError::NotConnected)?;
        if peer.ip().is_broadcast() && !self.allow_broadcast {
            return Err(TransportError::BroadcastNotAllowed(peer));
        }
        Ok(peer)
    }
}

/// Incoming socket bound to a local address.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveSocket {
    local: Option<SocketAddrV4>,
}

impl ReceiveSocket {
    pub fn new() -> Self {
        Self { local: None }
    }

    pub fn bind(&mut self, local: SocketAddrV4) {
        self.local = Some(local);
    }

    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.local
    }

    /// Whether a datagram sent to `destination` is accepted by this socket.
    ///
    /// Broadcast datagrams are accepted on a matching port, unicast ones only
    /// when both address and port match.
    pub fn accepts(&self, destination: &SocketAddrV4) -> bool {
        match self.local {
            Some(local) if local.port() == destination.port() => destination.ip().is_broadcast() || local.ip() == destination.ip(),
            _ => false,
        }
    }
}

impl Default for ReceiveSocket {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can put bytes on the shared medium.
pub trait BroadcastTransport {
    fn send(&mut self, socket: &SendSocket, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// Hands out consecutive host addresses from a network, starting at `.1`.
#[derive(Debug, Clone)]
pub struct Ipv4AddressAllocator {
    base: Ipv4Addr,
    prefix_len: u8,
    next_host: u32,
}

impl Ipv4AddressAllocator {
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            base,
            prefix_len: prefix_len.min(32),
            next_host: 1,
        }
    }

    /// Usable host addresses in the network (network and broadcast excluded).
    pub fn capacity(&self) -> u32 {
        let host_bits = 32 - self.prefix_len as u32;
        if host_bits < 2 { 0 } else { (1u32 << host_bits) - 2 }
    }

    pub fn allocate(&mut self) -> Result<Ipv4Addr, TransportError> {
        if self.next_host > self.capacity() {
            return Err(TransportError::AddressSpaceExhausted {
                base: self.base,
                prefix_len: self.prefix_len,
            });
        }
        let mask = if self.prefix_len == 0 { 0 } else { u32::MAX << (32 - self.prefix_len as u32) };
        let network = u32::from(self.base) & mask;
        let address = Ipv4Addr::from(network | self.next_host);
        self.next_host += 1;
        Ok(address)
    }
}
