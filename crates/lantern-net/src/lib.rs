//! Peer-connection engine for LANTERN.
//!
//! Manages connections to Ethereum light-client nodes across two routes:
//! UDP discovery (ping/pong, neighbor harvesting) and the framed TCP
//! session (AUTH handshake, Hello capability negotiation, light-protocol
//! Status exchange). Connected nodes serve provisions: bulk chain-data
//! requests split into credit-aware protocol messages and reassembled from
//! out-of-order responses.
//!
//! The engine is caller-driven and never blocks: the owner runs a
//! select/poll loop over the descriptors each [`node::Node`] registers and
//! feeds readiness back into [`node::Node::process`]. Cryptography arrives
//! through the [`lantern_codec::CryptoProvider`] seam and wire encoding
//! through [`message::MessageCoder`], so the engine itself is free of both
//! curve arithmetic and RLP.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod node;
pub mod protocol;
pub mod provision;
pub mod state;
pub mod testing;

pub use endpoint::{
    LocalEndpoint, Neighbor, NodeId, RemoteEndpoint, Socket, SocketSet, Transport,
    TransportError,
};
pub use error::CoderError;
pub use message::{
    AnnounceMessage, Capability, DisMessage, Hash256, HelloMessage, LightMessage,
    LightPayload, LightProtocolKind, Message, MessageCoder, MessageKind, P2pMessage,
    RequestCall, ResponseData, StatusMessage, Transaction,
};
pub use node::{Node, NodeEvents, NodePriority, TIMEOUT_RECV_SECS, TIMEOUT_SECS};
pub use protocol::{
    negotiate, status_is_sufficient, GethLes, LightProtocol, NodeType, ParityPip,
    MESSAGE_ID_OFFSET,
};
pub use provision::{
    required_messages, Provision, ProvisionErrorReason, ProvisionKind, ProvisionResult,
};
pub use state::{
    ConnectPhase, DisconnectReason, ErrorReason, NodeState, ProtocolReason, Route,
};
