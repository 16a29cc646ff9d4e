//! Per-route connection state.
//!
//! Every node holds one state per route (UDP for discovery, TCP for the
//! framed session). States move `Available -> Connecting(..) -> Connected`
//! and land in `Error(..)` on any failure; the error reason decides whether
//! the node is ever retried (see [`NodeState::initial`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two endpoint routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Route {
    /// Discovery datagrams.
    Udp,
    /// The framed RLPx session.
    Tcp,
}

impl Route {
    /// Both routes, UDP first.
    pub const ALL: [Route; 2] = [Route::Udp, Route::Tcp];

    /// Number of routes.
    pub const COUNT: usize = 2;

    /// Index into per-route arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Route::Udp => 0,
            Route::Tcp => 1,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Route::Udp => "UDP",
            Route::Tcp => "TCP",
        })
    }
}

/// Substates of a connecting route.
///
/// TCP walks Auth through StatusAck (with the Parity ping/pong detour before
/// Status); UDP walks Ping through DiscoverAckToo. The phase name is the
/// step being performed: send phases wait for write readiness, receive
/// phases for read readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectPhase {
    /// Socket opened, first step not yet taken. Declared for parity with the
    /// persisted-state encoding; `connect` moves straight past it.
    Open,
    /// Send the AUTH blob.
    Auth,
    /// Await the AUTH-ACK blob.
    AuthAck,
    /// Send the P2P Hello.
    Hello,
    /// Await the remote Hello.
    HelloAck,
    /// Await the pre-status ping a Parity node sends.
    PreStatusPingRecv,
    /// Answer that ping before Status.
    PreStatusPongSend,
    /// Send the light-protocol Status.
    Status,
    /// Await the remote Status.
    StatusAck,
    /// Send the discovery Ping.
    Ping,
    /// Await the Pong.
    PingAck,
    /// Send FindNeighbors after the Pong.
    PingAckDiscover,
    /// Await the remote's follow-up before Neighbors arrive.
    PingAckDiscoverAck,
    /// Send FindNeighbors (direct path).
    Discover,
    /// Await the Neighbors batch.
    DiscoverAck,
    /// Await the second Neighbors batch.
    DiscoverAckToo,
}

impl ConnectPhase {
    /// Whether this phase acts on write readiness.
    #[must_use]
    pub fn wants_write(self) -> bool {
        matches!(
            self,
            ConnectPhase::Auth
                | ConnectPhase::Hello
                | ConnectPhase::PreStatusPongSend
                | ConnectPhase::Status
                | ConnectPhase::Ping
                | ConnectPhase::PingAckDiscover
                | ConnectPhase::Discover
        )
    }

    /// Whether this phase acts on read readiness.
    #[must_use]
    pub fn wants_read(self) -> bool {
        matches!(
            self,
            ConnectPhase::AuthAck
                | ConnectPhase::HelloAck
                | ConnectPhase::PreStatusPingRecv
                | ConnectPhase::StatusAck
                | ConnectPhase::PingAck
                | ConnectPhase::PingAckDiscoverAck
                | ConnectPhase::DiscoverAck
                | ConnectPhase::DiscoverAckToo
        )
    }
}

impl fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectPhase::Open => "Open",
            ConnectPhase::Auth => "Auth",
            ConnectPhase::AuthAck => "AuthAck",
            ConnectPhase::Hello => "Hello",
            ConnectPhase::HelloAck => "HelloAck",
            ConnectPhase::PreStatusPingRecv => "PreStatusPingRecv",
            ConnectPhase::PreStatusPongSend => "PreStatusPongSend",
            ConnectPhase::Status => "Status",
            ConnectPhase::StatusAck => "StatusAck",
            ConnectPhase::Ping => "Ping",
            ConnectPhase::PingAck => "PingAck",
            ConnectPhase::PingAckDiscover => "PingAckDiscover",
            ConnectPhase::PingAckDiscoverAck => "PingAckDiscoverAck",
            ConnectPhase::Discover => "Discover",
            ConnectPhase::DiscoverAck => "DiscoverAck",
            ConnectPhase::DiscoverAckToo => "DiscoverAckToo",
        })
    }
}

/// Protocol-level failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolReason {
    /// Retry budget spent.
    Exhausted,
    /// The node advertises port 0.
    NonstandardPort,
    /// Expected a discovery Pong and got something else.
    PingPongMissed,
    /// A datagram exceeded the 1500-byte cap.
    UdpExcessiveByteCount,
    /// AUTH / AUTH-ACK failed.
    TcpAuthentication,
    /// Expected Hello and got something else.
    TcpHelloMissed,
    /// Expected Status and got something else.
    TcpStatusMissed,
    /// No usable capability intersection.
    CapabilitiesMismatch,
    /// The remote's chain head is not usable.
    StatusMismatch,
    /// A message failed to decode.
    RlpParse,
}

impl ProtocolReason {
    /// Reasons that describe the remote node itself rather than a transient
    /// network condition. These survive a persisted-state restore.
    #[must_use]
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            ProtocolReason::NonstandardPort
                | ProtocolReason::CapabilitiesMismatch
                | ProtocolReason::StatusMismatch
                | ProtocolReason::UdpExcessiveByteCount
                | ProtocolReason::RlpParse
        )
    }
}

impl fmt::Display for ProtocolReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolReason::Exhausted => "Exhausted",
            ProtocolReason::NonstandardPort => "Nonstandard Port",
            ProtocolReason::PingPongMissed => "Ping-Pong Missed",
            ProtocolReason::UdpExcessiveByteCount => "UDP Excessive Byte Count",
            ProtocolReason::TcpAuthentication => "TCP Authentication",
            ProtocolReason::TcpHelloMissed => "TCP Hello Missed",
            ProtocolReason::TcpStatusMissed => "TCP Status Missed",
            ProtocolReason::CapabilitiesMismatch => "Capabilities Mismatch",
            ProtocolReason::StatusMismatch => "Status Mismatch",
            ProtocolReason::RlpParse => "RLP Parse",
        })
    }
}

/// The devp2p disconnect reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Disconnect requested (0x00).
    Requested,
    /// TCP subsystem error (0x01).
    TcpError,
    /// Breach of protocol (0x02).
    BreachProtocol,
    /// Useless peer (0x03).
    UselessPeer,
    /// Too many peers (0x04).
    TooManyPeers,
    /// Already connected (0x05).
    AlreadyConnected,
    /// Incompatible P2P version (0x06).
    IncompatibleP2p,
    /// Null node identity (0x07).
    NullNode,
    /// Client quitting (0x08).
    ClientQuit,
    /// Unexpected identity (0x09).
    UnexpectedIdentity,
    /// Connected to self (0x0a).
    SameIdentity,
    /// Read timeout (0x0b).
    Timeout,
    /// Any unrecognized code (0x10).
    Unknown,
}

impl DisconnectReason {
    /// Wire code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            DisconnectReason::Requested => 0x00,
            DisconnectReason::TcpError => 0x01,
            DisconnectReason::BreachProtocol => 0x02,
            DisconnectReason::UselessPeer => 0x03,
            DisconnectReason::TooManyPeers => 0x04,
            DisconnectReason::AlreadyConnected => 0x05,
            DisconnectReason::IncompatibleP2p => 0x06,
            DisconnectReason::NullNode => 0x07,
            DisconnectReason::ClientQuit => 0x08,
            DisconnectReason::UnexpectedIdentity => 0x09,
            DisconnectReason::SameIdentity => 0x0a,
            DisconnectReason::Timeout => 0x0b,
            DisconnectReason::Unknown => 0x10,
        }
    }

    /// Parse a wire code; anything unrecognized is `Unknown`.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => DisconnectReason::Requested,
            0x01 => DisconnectReason::TcpError,
            0x02 => DisconnectReason::BreachProtocol,
            0x03 => DisconnectReason::UselessPeer,
            0x04 => DisconnectReason::TooManyPeers,
            0x05 => DisconnectReason::AlreadyConnected,
            0x06 => DisconnectReason::IncompatibleP2p,
            0x07 => DisconnectReason::NullNode,
            0x08 => DisconnectReason::ClientQuit,
            0x09 => DisconnectReason::UnexpectedIdentity,
            0x0a => DisconnectReason::SameIdentity,
            0x0b => DisconnectReason::Timeout,
            _ => DisconnectReason::Unknown,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisconnectReason::Requested => "Disconnect Requested",
            DisconnectReason::TcpError => "TCP Error",
            DisconnectReason::BreachProtocol => "Breach of Protocol",
            DisconnectReason::UselessPeer => "Useless Peer",
            DisconnectReason::TooManyPeers => "Too Many Peers",
            DisconnectReason::AlreadyConnected => "Already Connected",
            DisconnectReason::IncompatibleP2p => "Incompatible P2P Version",
            DisconnectReason::NullNode => "Null Node Identity",
            DisconnectReason::ClientQuit => "Client Quit",
            DisconnectReason::UnexpectedIdentity => "Unexpected Identity",
            DisconnectReason::SameIdentity => "Same Identity",
            DisconnectReason::Timeout => "Timeout",
            DisconnectReason::Unknown => "Unknown",
        })
    }
}

/// Why a route landed in `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    /// An OS error (errno) from the transport.
    Unix(i32),
    /// The remote sent a Disconnect message.
    Disconnect(DisconnectReason),
    /// A protocol violation or mismatch.
    Protocol(ProtocolReason),
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Unix(errno) => write!(f, "Unix: {errno}"),
            ErrorReason::Disconnect(reason) => write!(f, "Disconnect: {reason}"),
            ErrorReason::Protocol(reason) => write!(f, "Protocol: {reason}"),
        }
    }
}

/// The state of one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Ready for a connect attempt.
    Available,
    /// Mid-handshake.
    Connecting(ConnectPhase),
    /// Handshake complete; exchanging messages.
    Connected,
    /// Failed; the reason decides whether the node is retried.
    Error(ErrorReason),
}

impl NodeState {
    /// The state a persisted route state restores to.
    ///
    /// Transient conditions (timeouts, missed handshake steps, OS errors,
    /// remote disconnects) reset to `Available` so the node is retried;
    /// permanent protocol mismatches are kept so it never is.
    #[must_use]
    pub fn initial(self) -> NodeState {
        match self {
            NodeState::Error(ErrorReason::Protocol(reason)) if reason.is_permanent() => self,
            _ => NodeState::Available,
        }
    }

    /// Whether this state is `Error`.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, NodeState::Error(_))
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Available => f.write_str("Available"),
            NodeState::Connecting(phase) => write!(f, "Connecting: {phase}"),
            NodeState::Connected => f.write_str("Connected"),
            NodeState::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}
