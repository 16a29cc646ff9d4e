//! Capability negotiation and the light-protocol trait.
//!
//! After the Hello exchange we learn what kind of server the peer is and
//! which light protocol to speak with it. Geth serves `les/2`, Parity serves
//! `pip/1`; the two differ in status semantics and per-request content
//! limits, captured behind [`LightProtocol`].

use crate::message::{Capability, HelloMessage, LightProtocolKind, StatusMessage};
use crate::provision::ProvisionKind;
use crate::state::ProtocolReason;

/// The identifier offset applied to light-protocol messages after Hello.
pub const MESSAGE_ID_OFFSET: u8 = 0x10;

/// What kind of server the remote turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeType {
    /// Hello not yet exchanged.
    #[default]
    Unknown,
    /// Serves `les/2`.
    Geth,
    /// Serves `pip/1`.
    Parity,
}

impl NodeType {
    /// The light protocol a server of this type speaks.
    #[must_use]
    pub fn light_protocol(self) -> Option<Box<dyn LightProtocol>> {
        match self {
            NodeType::Unknown => None,
            NodeType::Geth => Some(Box::new(GethLes)),
            NodeType::Parity => Some(Box::new(ParityPip)),
        }
    }
}

/// The protocol-specific knobs of a light-client dialect.
pub trait LightProtocol: Send + core::fmt::Debug {
    /// Which protocol this is.
    fn kind(&self) -> LightProtocolKind;

    /// Protocol version we present in Status.
    fn version(&self) -> u64;

    /// How many items one request message may carry.
    fn content_limit(&self, kind: ProvisionKind) -> usize;

    /// Parity reports `serve_chain_since` one block late.
    fn chain_since_offset(&self) -> u64 {
        0
    }
}

/// `les/2` as Geth serves it.
#[derive(Debug)]
pub struct GethLes;

impl LightProtocol for GethLes {
    fn kind(&self) -> LightProtocolKind {
        LightProtocolKind::Les
    }

    fn version(&self) -> u64 {
        2
    }

    fn content_limit(&self, kind: ProvisionKind) -> usize {
        match kind {
            ProvisionKind::BlockHeaders => 192,
            ProvisionKind::AccountProofs => 64,
            ProvisionKind::BlockBodies => 32,
            ProvisionKind::TransactionReceipts => 64,
            ProvisionKind::Accounts => 64,
            ProvisionKind::TransactionStatuses => 256,
            ProvisionKind::SubmitTransaction => 1,
        }
    }
}

/// `pip/1` as Parity serves it.
#[derive(Debug)]
pub struct ParityPip;

impl LightProtocol for ParityPip {
    fn kind(&self) -> LightProtocolKind {
        LightProtocolKind::Pip
    }

    fn version(&self) -> u64 {
        1
    }

    fn content_limit(&self, _kind: ProvisionKind) -> usize {
        256
    }

    fn chain_since_offset(&self) -> u64 {
        1
    }
}

fn offers(capabilities: &[Capability], name: &str, version: u32) -> bool {
    capabilities
        .iter()
        .any(|cap| cap.name == name && cap.version == version)
}

/// Classify the remote and pick the light protocol to speak with it.
///
/// The remote must serve full chain data (`eth/62` or `eth/63`), and the two
/// Hellos must agree on at least one capability; the first local capability
/// also offered by the remote wins.
pub fn negotiate(
    local: &HelloMessage,
    remote: &HelloMessage,
) -> Result<(NodeType, Box<dyn LightProtocol>), ProtocolReason> {
    let node_type = if offers(&remote.capabilities, "pip", 1) {
        NodeType::Parity
    } else {
        NodeType::Geth
    };

    if !offers(&remote.capabilities, "eth", 62) && !offers(&remote.capabilities, "eth", 63) {
        return Err(ProtocolReason::CapabilitiesMismatch);
    }

    let matched = local
        .capabilities
        .iter()
        .find(|cap| offers(&remote.capabilities, &cap.name, cap.version));
    if matched.is_none() {
        return Err(ProtocolReason::CapabilitiesMismatch);
    }

    let protocol = node_type
        .light_protocol()
        .ok_or(ProtocolReason::CapabilitiesMismatch)?;
    Ok((node_type, protocol))
}

/// Whether the peer's Status makes it worth keeping.
///
/// The peer must be on our chain, speak the protocol version its node type
/// implies, be ahead of our head, and relay transactions. When we intend to
/// sync through it, it must also serve headers and serve state and chain
/// data reaching back to our head.
#[must_use]
pub fn status_is_sufficient(
    local: &StatusMessage,
    remote: &StatusMessage,
    protocol: &dyn LightProtocol,
    handle_sync: bool,
) -> bool {
    if remote.chain_id != local.chain_id {
        return false;
    }
    if remote.protocol_version != protocol.version() {
        return false;
    }
    if remote.head_number <= local.head_number {
        return false;
    }

    if handle_sync {
        if remote.serve_headers != Some(true) {
            return false;
        }
        match remote.serve_state_since {
            Some(since) if since <= local.head_number => {}
            _ => return false,
        }
        match remote.serve_chain_since {
            Some(since) if since.saturating_sub(protocol.chain_since_offset())
                <= local.head_number => {}
            _ => return false,
        }
    }

    remote.relay_transactions == Some(true)
}
