//! UDP node-discovery message construction.

use crate::endpoint::{Neighbor, NodeId};
use crate::message::{
    DisEndpoint, DisFindNeighbors, DisMessage, DisPing, DisPong, Hash256,
};

/// Discovery protocol version.
pub const DISCOVERY_VERSION: u64 = 4;

/// How far in the future discovery packets expire. Generous, so that clock
/// skew between peers never invalidates a packet.
pub const DISCOVERY_TTL_SECS: u64 = 1_000_000;

/// Largest discovery datagram we accept.
pub const MAX_DATAGRAM_BYTES: usize = 1500;

fn expiration(now: u64) -> u64 {
    now + DISCOVERY_TTL_SECS
}

/// A ping from `local` to `remote`.
#[must_use]
pub fn ping(local: &Neighbor, remote: &Neighbor, now: u64) -> DisMessage {
    DisMessage::Ping(DisPing {
        version: DISCOVERY_VERSION,
        from: DisEndpoint::from(local),
        to: DisEndpoint::from(remote),
        expiration: expiration(now),
        hash: Hash256::default(),
    })
}

/// A pong answering the ping whose datagram hashed to `ping_hash`.
#[must_use]
pub fn pong(to: DisEndpoint, ping_hash: Hash256, now: u64) -> DisMessage {
    DisMessage::Pong(DisPong {
        to,
        ping_hash,
        expiration: expiration(now),
    })
}

/// A neighbor query for nodes near `target`.
#[must_use]
pub fn find_neighbors(target: NodeId, now: u64) -> DisMessage {
    DisMessage::FindNeighbors(DisFindNeighbors {
        target,
        expiration: expiration(now),
    })
}
