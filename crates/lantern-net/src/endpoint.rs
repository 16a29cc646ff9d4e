//! Endpoints, neighbors and the transport seam.
//!
//! Socket I/O is a capability the engine consumes: a [`Transport`] opens and
//! closes routes, moves bytes, and exposes a descriptor for the caller's
//! select/poll loop. The engine never blocks; it acts only on the readiness
//! the caller reports through a [`SocketSet`].

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use lantern_codec::{CryptoProvider, PublicKey, SecretKey, NONCE_LEN};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::message::{HelloMessage, StatusMessage};
use crate::state::Route;

/// A 64-byte node identity (the node's uncompressed public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 64]);

impl NodeId {
    /// The identity of a public key.
    #[must_use]
    pub fn from_public_key(key: &PublicKey) -> Self {
        Self(*key.as_bytes())
    }

    /// The public key this identity names.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.0)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("node id must be 64 bytes"))?;
        Ok(NodeId(arr))
    }
}

/// A discovery record for a node: identity plus addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Node identity.
    pub id: NodeId,
    /// Address both routes share.
    pub ip: IpAddr,
    /// Discovery port.
    pub udp_port: u16,
    /// Session port.
    pub tcp_port: u16,
}

impl Neighbor {
    /// Port for a route.
    #[must_use]
    pub fn port(&self, route: Route) -> u16 {
        match route {
            Route::Udp => self.udp_port,
            Route::Tcp => self.tcp_port,
        }
    }

    /// Distance metric between two neighbors: the XOR of the digests of
    /// their identities, compared big-endian.
    #[must_use]
    pub fn distance(&self, other: &Neighbor, provider: &dyn CryptoProvider) -> [u8; 32] {
        let a = provider.keccak256(self.id.as_bytes());
        let b = provider.keccak256(other.id.as_bytes());
        let mut out = [0u8; 32];
        for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
            *o = x ^ y;
        }
        out
    }
}

impl Default for Neighbor {
    fn default() -> Self {
        Self {
            id: NodeId([0u8; 64]),
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: 0,
            tcp_port: 0,
        }
    }
}

/// Our side of every connection: identity keys, handshake nonce, and the
/// Hello/Status we present to each remote.
pub struct LocalEndpoint {
    /// Our own discovery record.
    pub neighbor: Neighbor,
    /// Static identity key.
    pub key: SecretKey,
    /// Ephemeral key for the AUTH exchange.
    pub ephemeral_key: SecretKey,
    /// Handshake nonce.
    pub nonce: [u8; NONCE_LEN],
    /// The Hello presented to every remote.
    pub hello: HelloMessage,
    /// The Status presented to every remote.
    pub status: StatusMessage,
}

/// The remote side: a neighbor record, its transport, and everything the
/// handshake teaches us about the peer.
pub struct RemoteEndpoint<T> {
    /// The remote's discovery record.
    pub neighbor: Neighbor,
    transport: T,
    /// The remote's static public key (its node identity).
    pub key: PublicKey,
    /// Learned from the remote's Hello.
    pub hello: Option<HelloMessage>,
    /// Learned from the remote's Status.
    pub status: Option<StatusMessage>,
    /// Learned from AUTH-ACK.
    pub ephemeral_key: Option<PublicKey>,
    /// Learned from AUTH-ACK.
    pub nonce: Option<[u8; NONCE_LEN]>,
}

impl<T: Transport> RemoteEndpoint<T> {
    /// Wrap a neighbor record and its transport; the identity key comes from
    /// the record.
    pub fn new(neighbor: Neighbor, transport: T) -> Self {
        let key = neighbor.id.public_key();
        Self {
            neighbor,
            transport,
            key,
            hello: None,
            status: None,
            ephemeral_key: None,
            nonce: None,
        }
    }

    /// Open the route on the underlying transport.
    pub fn open(&mut self, route: Route) -> Result<(), TransportError> {
        self.transport.open(route)
    }

    /// Close the route. `clean` requests a graceful shutdown.
    pub fn close(&mut self, route: Route, clean: bool) {
        // Close failures are of no further interest.
        let _ = self.transport.close(route, clean);
    }

    /// The route's descriptor, if open.
    #[must_use]
    pub fn socket(&self, route: Route) -> Option<Socket> {
        self.transport.socket(route)
    }

    /// Send all of `bytes` on the route.
    pub fn send(&mut self, route: Route, bytes: &[u8]) -> Result<(), TransportError> {
        self.transport.send(route, bytes)
    }

    /// Fill `buf` exactly from the stream route.
    pub fn recv_exact(&mut self, route: Route, buf: &mut [u8]) -> Result<(), TransportError> {
        self.transport.recv_exact(route, buf)
    }

    /// Receive one datagram into `buf`, returning its length.
    pub fn recv_datagram(
        &mut self,
        route: Route,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        self.transport.recv_datagram(route, buf)
    }
}

/// Transport failures, kept close to errno for state reporting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The route has not been opened.
    #[error("route not open")]
    NotOpen,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// An OS-level error.
    #[error("os error {0}")]
    Os(i32),
}

impl TransportError {
    /// errno-style code for error states.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            TransportError::NotOpen => 9,   // EBADF
            TransportError::Closed => 104,  // ECONNRESET
            TransportError::Os(errno) => *errno,
        }
    }
}

/// The socket I/O capability consumed by the engine.
pub trait Transport {
    /// Open the route (TCP connect / UDP bind).
    fn open(&mut self, route: Route) -> Result<(), TransportError>;

    /// Close the route. `clean` requests a graceful shutdown.
    fn close(&mut self, route: Route, clean: bool) -> Result<(), TransportError>;

    /// The route's descriptor, if open.
    fn socket(&self, route: Route) -> Option<Socket>;

    /// Send all of `bytes`.
    fn send(&mut self, route: Route, bytes: &[u8]) -> Result<(), TransportError>;

    /// Fill `buf` exactly (stream routes).
    fn recv_exact(&mut self, route: Route, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Receive one datagram into `buf`, returning its length.
    fn recv_datagram(&mut self, route: Route, buf: &mut [u8])
        -> Result<usize, TransportError>;
}

/// A transport descriptor, as handed to the caller's select/poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Socket(pub i32);

/// Read/write descriptor interest or readiness.
///
/// The engine fills one of these in `update_descriptors`; the caller runs
/// its select/poll and hands back a set holding the descriptors that are
/// actually ready.
#[derive(Debug, Default, Clone)]
pub struct SocketSet {
    read: BTreeSet<Socket>,
    write: BTreeSet<Socket>,
}

impl SocketSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a descriptor for read interest or readiness.
    pub fn insert_read(&mut self, socket: Socket) {
        self.read.insert(socket);
    }

    /// Mark a descriptor for write interest or readiness.
    pub fn insert_write(&mut self, socket: Socket) {
        self.write.insert(socket);
    }

    /// Whether the descriptor is in the read set.
    #[must_use]
    pub fn contains_read(&self, socket: Socket) -> bool {
        self.read.contains(&socket)
    }

    /// Whether the descriptor is in the write set.
    #[must_use]
    pub fn contains_write(&self, socket: Socket) -> bool {
        self.write.contains(&socket)
    }

    /// Largest descriptor in either set (for select's nfds).
    #[must_use]
    pub fn max_socket(&self) -> Option<Socket> {
        self.read.iter().chain(self.write.iter()).max().copied()
    }

    /// Drop every descriptor from both sets.
    pub fn clear(&mut self) {
        self.read.clear();
        self.write.clear();
    }
}
