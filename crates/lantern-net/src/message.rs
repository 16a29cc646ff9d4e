//! The message model: P2P base protocol, UDP discovery, and the light-client
//! request/response protocols (LES and PIP share one surface here).
//!
//! Wire encoding lives behind the [`MessageCoder`] seam. The engine only
//! requires that byte 0 of an encoded non-discovery message is the protocol
//! identifier; it applies the negotiated identifier offset itself.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::endpoint::{Neighbor, NodeId};
use crate::error::CoderError;
use crate::state::DisconnectReason;

/// A 32-byte hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({}..)", hex::encode(&self.0[..4]))
    }
}

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

/// A named protocol the peer offers, e.g. `les/2` or `pip/1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Sub-protocol name, e.g. `les`.
    pub name: String,
    /// Sub-protocol version.
    pub version: u32,
}

impl Capability {
    /// A capability from its name and version.
    #[must_use]
    pub fn new(name: &str, version: u32) -> Self {
        Self {
            name: name.to_owned(),
            version,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// The P2P Hello exchanged right after the transport handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    /// P2P protocol version.
    pub version: u64,
    /// Client name and version string.
    pub client_id: String,
    /// Sub-protocols the sender offers.
    pub capabilities: Vec<Capability>,
    /// The sender's listen port.
    pub port: u16,
    /// The sender's identity.
    pub node_id: NodeId,
}

/// Base-protocol messages, present on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum P2pMessage {
    /// Capability announcement, first message on the session.
    Hello(HelloMessage),
    /// The sender is closing the connection.
    Disconnect(DisconnectReason),
    /// Keepalive request.
    Ping,
    /// Keepalive answer.
    Pong,
}

/// A discovery endpoint: where a node listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisEndpoint {
    /// Node address.
    pub ip: IpAddr,
    /// Discovery port.
    pub udp_port: u16,
    /// Session port.
    pub tcp_port: u16,
}

impl From<&Neighbor> for DisEndpoint {
    fn from(neighbor: &Neighbor) -> Self {
        Self {
            ip: neighbor.ip,
            udp_port: neighbor.udp_port,
            tcp_port: neighbor.tcp_port,
        }
    }
}

/// Discovery Ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisPing {
    /// Discovery protocol version.
    pub version: u64,
    /// Where the sender listens.
    pub from: DisEndpoint,
    /// Where the sender believes the recipient listens.
    pub to: DisEndpoint,
    /// Unix time after which the packet is stale.
    pub expiration: u64,
    /// Digest of the datagram carrying this ping; the pong echoes it.
    /// Filled in by the coder on decode, ignored on encode.
    #[serde(skip)]
    pub hash: Hash256,
}

/// Discovery Pong, answering one Ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisPong {
    /// The ping sender's endpoint, echoed back.
    pub to: DisEndpoint,
    /// Digest of the ping datagram being answered.
    pub ping_hash: Hash256,
    /// Unix time after which the packet is stale.
    pub expiration: u64,
}

/// Discovery neighbor query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisFindNeighbors {
    /// Identity to find nodes near.
    pub target: NodeId,
    /// Unix time after which the packet is stale.
    pub expiration: u64,
}

/// Discovery neighbor batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisNeighbors {
    /// Nodes near the queried target.
    pub neighbors: Vec<Neighbor>,
    /// Unix time after which the packet is stale.
    pub expiration: u64,
}

/// UDP node-discovery messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisMessage {
    /// Liveness check.
    Ping(DisPing),
    /// Liveness answer.
    Pong(DisPong),
    /// Ask for nodes near a target.
    FindNeighbors(DisFindNeighbors),
    /// Nodes near the target.
    Neighbors(DisNeighbors),
}

/// Which light-client protocol a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightProtocolKind {
    /// `les/2`, served by Geth.
    Les,
    /// `pip/1`, served by Parity.
    Pip,
}

impl fmt::Display for LightProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LightProtocolKind::Les => write!(f, "les"),
            LightProtocolKind::Pip => write!(f, "pip"),
        }
    }
}

/// The light-client Status handshake message.
///
/// The optional announcements describe what the peer serves; absence means
/// the peer did not say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Light-protocol version.
    pub protocol_version: u64,
    /// Chain the node serves.
    pub chain_id: u64,
    /// Head block number.
    pub head_number: u64,
    /// Head block hash.
    pub head_hash: Hash256,
    /// Total difficulty at the head.
    pub head_total_difficulty: u128,
    /// Genesis block hash.
    pub genesis_hash: Hash256,
    /// Whether the peer serves headers.
    pub serve_headers: Option<bool>,
    /// First block the peer serves state for.
    pub serve_state_since: Option<u64>,
    /// First block the peer serves chain data for.
    pub serve_chain_since: Option<u64>,
    /// Whether the peer relays transactions.
    pub relay_transactions: Option<bool>,
}

/// A new-head announcement from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceMessage {
    /// New head block hash.
    pub head_hash: Hash256,
    /// New head block number.
    pub head_number: u64,
    /// Total difficulty at the new head.
    pub head_total_difficulty: u128,
    /// Blocks rolled back to reach the new head.
    pub reorg_depth: u64,
}

/// An encoded block header, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader(pub Vec<u8>);

/// A Merkle account proof, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProof(pub Vec<u8>);

/// An encoded block body, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody(pub Vec<u8>);

/// The receipts of one block, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipts(pub Vec<u8>);

/// An account's state at some block, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState(pub Vec<u8>);

/// A transaction's inclusion status, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatus(pub Vec<u8>);

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash.
    pub hash: Hash256,
    /// Encoded transaction bytes.
    pub data: Vec<u8>,
}

/// The request half of a light-client exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestCall {
    /// Block headers by range.
    Headers {
        /// First block number.
        start: u64,
        /// Blocks skipped between consecutive headers.
        skip: u64,
        /// Headers requested.
        limit: u64,
        /// Walk the range downward.
        reverse: bool,
    },
    /// Account proofs at the given block numbers.
    Proofs(Vec<u64>),
    /// Block bodies by block hash.
    Bodies(Vec<Hash256>),
    /// Block receipts by block hash.
    Receipts(Vec<Hash256>),
    /// One account's state at each given block hash.
    Accounts {
        /// The account queried.
        address: Address,
        /// Block hashes to query at.
        hashes: Vec<Hash256>,
    },
    /// Transaction statuses by transaction hash.
    Statuses(Vec<Hash256>),
    /// Broadcast a signed transaction.
    SubmitTransaction(Transaction),
}

/// The response half of a light-client exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Headers, in request order.
    Headers(Vec<BlockHeader>),
    /// Account proofs, in request order.
    Proofs(Vec<AccountProof>),
    /// Block bodies, in request order.
    Bodies(Vec<BlockBody>),
    /// Block receipts, in request order.
    Receipts(Vec<TransactionReceipts>),
    /// Account states, in request order.
    Accounts(Vec<AccountState>),
    /// Transaction statuses, in request order.
    Statuses(Vec<TransactionStatus>),
    /// Status of a just-submitted transaction.
    Submission(TransactionStatus),
}

/// Light-client protocol payloads, shared between LES and PIP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightPayload {
    /// Chain-head handshake.
    Status(StatusMessage),
    /// New-head notification.
    Announce(AnnounceMessage),
    /// A data request.
    Request {
        /// Correlates the response.
        request_id: u64,
        /// What is being asked for.
        call: RequestCall,
    },
    /// A data response.
    Response {
        /// The request being answered.
        request_id: u64,
        /// The peer's buffer-value after serving this response, when the
        /// protocol reports one.
        credits: Option<u64>,
        /// The answer.
        data: ResponseData,
    },
    /// The peer is changing its flow-control parameters.
    UpdateCreditParameters {
        /// New buffer ceiling.
        max: u64,
        /// New recharge rate.
        recharge: u64,
    },
    /// Accept a credit-parameter update.
    AcknowledgeUpdate,
}

/// A light-client message tagged with the protocol it travels on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightMessage {
    /// The protocol carrying the payload.
    pub protocol: LightProtocolKind,
    /// The payload itself.
    pub payload: LightPayload,
}

/// Any message the engine sends or receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Base protocol, framed over TCP.
    P2p(P2pMessage),
    /// Discovery, raw over UDP.
    Dis(DisMessage),
    /// Light protocol, framed over TCP.
    Light(LightMessage),
}

impl Message {
    /// A short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Message::P2p(P2pMessage::Hello(_)) => "hello",
            Message::P2p(P2pMessage::Disconnect(_)) => "disconnect",
            Message::P2p(P2pMessage::Ping) => "ping",
            Message::P2p(P2pMessage::Pong) => "pong",
            Message::Dis(DisMessage::Ping(_)) => "dis-ping",
            Message::Dis(DisMessage::Pong(_)) => "dis-pong",
            Message::Dis(DisMessage::FindNeighbors(_)) => "dis-find-neighbors",
            Message::Dis(DisMessage::Neighbors(_)) => "dis-neighbors",
            Message::Light(m) => match &m.payload {
                LightPayload::Status(_) => "status",
                LightPayload::Announce(_) => "announce",
                LightPayload::Request { .. } => "request",
                LightPayload::Response { .. } => "response",
                LightPayload::UpdateCreditParameters { .. } => "update-credit-parameters",
                LightPayload::AcknowledgeUpdate => "acknowledge-update",
            },
        }
    }
}

/// How an incoming payload was classified from its identifier byte.
///
/// Identifiers below the negotiated offset (or any identifier when no offset
/// has been negotiated yet) belong to the base protocol; the rest belong to
/// the light protocol, with the offset removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Base-protocol payload with its identifier.
    P2p(u8),
    /// A whole discovery datagram.
    Dis,
    /// LES payload with its un-offset identifier.
    Les(u8),
    /// PIP payload with its un-offset identifier.
    Pip(u8),
}

/// Wire encoding seam.
///
/// Encoded non-discovery messages carry their protocol identifier in byte 0,
/// without any negotiated offset. Discovery messages encode to a complete
/// datagram.
pub trait MessageCoder {
    /// Encode a message to its wire bytes.
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CoderError>;

    /// Decode the bytes following the identifier byte (or the whole datagram
    /// for discovery).
    fn decode(&self, kind: MessageKind, bytes: &[u8]) -> Result<Message, CoderError>;
}
