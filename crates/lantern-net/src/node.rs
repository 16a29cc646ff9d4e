//! The node connection engine.
//!
//! One [`Node`] manages a single remote peer across both routes: the UDP
//! discovery exchange and the framed TCP session with its Hello and Status
//! handshakes. The engine is caller-driven: the owner runs a select/poll
//! loop, asks each node for its descriptor interest with
//! [`Node::update_descriptors`], and feeds readiness back through
//! [`Node::process`]. Nothing here blocks.
//!
//! Once connected on TCP, the node serves provisions: bulk data requests
//! split into protocol messages, one sent per writable tick, with responses
//! reassembled and delivered through [`NodeEvents`].

use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use lantern_codec::{
    make_auth, read_auth_ack, CryptoProvider, HandshakeTranscript, Session, ACK_CIPHER_LEN,
    HEADER_LEN,
};
use tracing::{debug, trace, warn};

use crate::discovery::{self, MAX_DATAGRAM_BYTES};
use crate::endpoint::{
    LocalEndpoint, Neighbor, RemoteEndpoint, Socket, SocketSet, Transport,
};
use crate::message::{
    DisMessage, Hash256, LightMessage, LightPayload, Message, MessageCoder, MessageKind,
    P2pMessage, StatusMessage,
};
use crate::protocol::{
    negotiate, status_is_sufficient, LightProtocol, NodeType, MESSAGE_ID_OFFSET,
};
use crate::provision::{
    required_messages, Provision, ProvisionErrorReason, ProvisionResult, Provisioner,
};
use crate::state::{
    ConnectPhase, DisconnectReason, ErrorReason, NodeState, ProtocolReason, Route,
};

/// Seconds a connecting route may sit between handshake steps.
pub const TIMEOUT_SECS: u64 = 10;
/// Seconds a connected route may sit without receiving anything.
pub const TIMEOUT_RECV_SECS: u64 = 60;

/// How a node entered our table; better-provenance nodes are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodePriority {
    /// Configured by the application.
    Local,
    /// From a curated boot list.
    Curated,
    /// Learned through discovery.
    Discovered,
}

/// Callbacks through which a node reports what it learns from its peer.
pub trait NodeEvents {
    /// The peer announced its chain head in a Status exchange.
    fn on_status(&self, head_hash: Hash256, head_number: u64);

    /// The peer announced a new chain head.
    fn on_announce(
        &self,
        head_hash: Hash256,
        head_number: u64,
        head_total_difficulty: u128,
        reorg_depth: u64,
    );

    /// A provision completed (successfully or not).
    fn on_provision_result(&self, result: ProvisionResult);

    /// The peer shared its neighbor table.
    fn on_neighbors(&self, neighbors: Vec<Neighbor>);
}

impl<E: NodeEvents + ?Sized> NodeEvents for Rc<E> {
    fn on_status(&self, head_hash: Hash256, head_number: u64) {
        (**self).on_status(head_hash, head_number);
    }

    fn on_announce(
        &self,
        head_hash: Hash256,
        head_number: u64,
        head_total_difficulty: u128,
        reorg_depth: u64,
    ) {
        (**self).on_announce(head_hash, head_number, head_total_difficulty, reorg_depth);
    }

    fn on_provision_result(&self, result: ProvisionResult) {
        (**self).on_provision_result(result);
    }

    fn on_neighbors(&self, neighbors: Vec<Neighbor>) {
        (**self).on_neighbors(neighbors);
    }
}

enum SendFailure {
    Transport(i32),
    Coder,
}

enum RecvFailure {
    Oversize,
    Transport(i32),
    Decode,
}

/// One remote peer, managed across its UDP and TCP routes.
pub struct Node<T> {
    provider: Arc<dyn CryptoProvider>,
    coder: Box<dyn MessageCoder>,
    events: Box<dyn NodeEvents>,

    local: LocalEndpoint,
    remote: RemoteEndpoint<T>,

    priority: NodePriority,
    node_type: NodeType,
    protocol: Option<Box<dyn LightProtocol>>,
    handle_sync: bool,

    states: [NodeState; Route::COUNT],
    distance: [u8; 32],
    hash: Hash256,
    discovered: bool,

    timeout: Option<u64>,
    timeout_ping_allowed: bool,

    credits: u64,
    message_identifier: Mutex<u64>,
    message_id_offset: u8,
    provisioners: Vec<Provisioner>,

    session: Option<Session>,
    auth_cipher: Vec<u8>,
}

impl<T: Transport> Node<T> {
    /// A node for one remote peer. Routes whose advertised port is 0 start
    /// out in a permanent error state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        coder: Box<dyn MessageCoder>,
        events: Box<dyn NodeEvents>,
        local: LocalEndpoint,
        remote_neighbor: Neighbor,
        transport: T,
        priority: NodePriority,
        handle_sync: bool,
    ) -> Self {
        let distance = local.neighbor.distance(&remote_neighbor, provider.as_ref());
        let hash = Hash256(provider.keccak256(remote_neighbor.id.as_bytes()));

        // A node that does not announce a port on a route can never be
        // reached there.
        let mut states = [NodeState::Available; Route::COUNT];
        for route in Route::ALL {
            if remote_neighbor.port(route) == 0 {
                states[route.index()] = NodeState::Error(ErrorReason::Protocol(
                    ProtocolReason::NonstandardPort,
                ));
            }
        }

        Self {
            provider,
            coder,
            events,
            local,
            remote: RemoteEndpoint::new(remote_neighbor, transport),
            priority,
            node_type: NodeType::Unknown,
            protocol: None,
            handle_sync,
            states,
            distance,
            hash,
            discovered: false,
            timeout: None,
            timeout_ping_allowed: true,
            credits: 0,
            message_identifier: Mutex::new(0),
            message_id_offset: 0,
            provisioners: Vec::new(),
            session: None,
            auth_cipher: Vec::new(),
        }
    }

    // ---- accessors ------------------------------------------------------

    /// The route's current state.
    #[must_use]
    pub fn state(&self, route: Route) -> NodeState {
        self.states[route.index()]
    }

    /// The remote's discovery record.
    #[must_use]
    pub fn neighbor(&self) -> &Neighbor {
        &self.remote.neighbor
    }

    /// What kind of server the remote turned out to be.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// How this node entered our table.
    #[must_use]
    pub fn priority(&self) -> NodePriority {
        self.priority
    }

    /// Whether the UDP discovery exchange has completed.
    #[must_use]
    pub fn discovered(&self) -> bool {
        self.discovered
    }

    /// Mark the discovery exchange complete (or reset it).
    pub fn set_discovered(&mut self, discovered: bool) {
        self.discovered = discovered;
    }

    /// The peer's last reported credit balance.
    #[must_use]
    pub fn credits(&self) -> u64 {
        self.credits
    }

    /// Digest of the remote identity, used for table ordering.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    /// Table ordering: provenance first, then identity distance.
    #[must_use]
    pub fn ordering(&self, other: &Node<T>) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.distance.cmp(&other.distance))
    }

    /// Replace the local chain head presented in Status exchanges.
    pub fn set_local_status(&mut self, status: StatusMessage) {
        self.local.status = status;
    }

    /// After a local head update, a peer rejected for an insufficient
    /// Status is worth another try. Returns whether the route was reset.
    pub fn updated_local_status(&mut self, route: Route) -> bool {
        if self.state(route)
            == NodeState::Error(ErrorReason::Protocol(ProtocolReason::StatusMismatch))
        {
            self.set_state(route, NodeState::Available);
            true
        } else {
            false
        }
    }

    /// Restore a persisted route state, keeping only permanent errors.
    pub fn set_state_initial(&mut self, route: Route, state: NodeState) {
        self.states[route.index()] = state.initial();
    }

    // ---- lifecycle ------------------------------------------------------

    /// Begin connecting on a route. A no-op unless the route is Available.
    pub fn connect(&mut self, route: Route, now: u64) -> NodeState {
        if self.state(route) != NodeState::Available {
            return self.state(route);
        }

        if let Err(error) = self.remote.open(route) {
            return self.process_failure(route, ErrorReason::Unix(error.errno()));
        }
        self.timeout = Some(now + TIMEOUT_SECS);
        self.timeout_ping_allowed = true;

        let phase = match route {
            Route::Tcp => ConnectPhase::Auth,
            Route::Udp => ConnectPhase::Ping,
        };
        debug!(node = %self.remote.neighbor.ip, %route, "connect");
        self.set_state(route, NodeState::Connecting(phase))
    }

    /// Tear a route down into `state`. A clean close is used unless the
    /// state is an error. With `return_to_available`, the route ends up
    /// Available again (after the given state has been observed).
    pub fn disconnect(
        &mut self,
        route: Route,
        state: NodeState,
        return_to_available: bool,
    ) -> NodeState {
        debug!(node = %self.remote.neighbor.ip, %route, %state, "disconnect");
        self.set_state(route, state);
        self.remote.close(route, !state.is_error());
        self.timeout = None;
        if route == Route::Tcp {
            self.session = None;
        }
        if return_to_available && state != NodeState::Available {
            self.set_state(route, NodeState::Available);
        }
        self.state(route)
    }

    /// Register this route's descriptor interest for the caller's poll
    /// loop. Returns the socket that was registered, if any.
    pub fn update_descriptors(&self, route: Route, set: &mut SocketSet) -> Option<Socket> {
        let socket = self.remote.socket(route)?;
        match self.state(route) {
            NodeState::Connecting(phase) => {
                if phase.wants_read() {
                    set.insert_read(socket);
                }
                if phase.wants_write() {
                    set.insert_write(socket);
                }
            }
            NodeState::Connected => {
                set.insert_read(socket);
                if self.provisioners.iter().any(Provisioner::send_pending) {
                    set.insert_write(socket);
                }
            }
            NodeState::Available | NodeState::Error(_) => return None,
        }
        Some(socket)
    }

    /// Drive the route forward given the readiness the caller observed.
    pub fn process(&mut self, route: Route, now: u64, ready: &SocketSet) -> NodeState {
        match self.state(route) {
            NodeState::Available | NodeState::Error(_) => self.state(route),
            NodeState::Connecting(phase) => self.process_connecting(route, phase, now, ready),
            NodeState::Connected => self.process_connected(route, now, ready),
        }
    }

    /// Enforce the route's timeout. On expiry the route is disconnected,
    /// unless `try_ping` allows one keepalive ping first (TCP, connected).
    /// Returns whether the route was disconnected.
    pub fn handle_time(&mut self, route: Route, now: u64, try_ping: bool) -> bool {
        let Some(timeout) = self.timeout else {
            self.timeout_ping_allowed = true;
            return false;
        };
        if now < timeout {
            self.timeout_ping_allowed = true;
            return false;
        }

        let ping_possible = try_ping
            && self.timeout_ping_allowed
            && route == Route::Tcp
            && self.state(route) == NodeState::Connected;
        if !ping_possible {
            self.disconnect(
                route,
                NodeState::Error(ErrorReason::Disconnect(DisconnectReason::Timeout)),
                false,
            );
            return true;
        }

        trace!(node = %self.remote.neighbor.ip, "timeout, pinging");
        self.timeout_ping_allowed = false;
        match self.send_message(route, &Message::P2p(P2pMessage::Ping)) {
            Ok(()) => {
                self.timeout = Some(now + TIMEOUT_RECV_SECS);
                false
            }
            Err(_) => {
                self.disconnect(
                    route,
                    NodeState::Error(ErrorReason::Disconnect(DisconnectReason::Timeout)),
                    false,
                );
                true
            }
        }
    }

    // ---- provisioning ---------------------------------------------------

    /// Whether this node can currently serve provisions.
    #[must_use]
    pub fn can_handle_provision(&self) -> bool {
        self.state(Route::Tcp) == NodeState::Connected && self.protocol.is_some()
    }

    /// Take on a provision. Its request messages go out one per writable
    /// tick; the completed result arrives through [`NodeEvents`].
    pub fn handle_provision(&mut self, identifier: u64, provision: Provision) {
        let Some(protocol) = self.protocol.as_deref() else {
            self.events.on_provision_result(ProvisionResult {
                identifier,
                provision,
                status: Err(ProvisionErrorReason::NodeInactive),
            });
            return;
        };

        let content_limit = protocol.content_limit(provision.kind());
        let count = required_messages(&provision, content_limit) as u64;
        let base = {
            let mut counter = self
                .message_identifier
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let base = *counter;
            *counter += count;
            base
        };
        trace!(identifier, base, count, "provision accepted");
        self.provisioners
            .push(Provisioner::new(identifier, provision, base, protocol));
    }

    /// Abandon all in-flight provisions, handing their definitions back so
    /// the caller can reassign them. No callbacks fire.
    pub fn unhandle_provisions(&mut self) -> Vec<(u64, Provision)> {
        self.provisioners
            .drain(..)
            .map(Provisioner::into_provision)
            .collect()
    }

    // ---- connecting -----------------------------------------------------

    fn set_state(&mut self, route: Route, state: NodeState) -> NodeState {
        trace!(node = %self.remote.neighbor.ip, %route, %state, "state");
        self.states[route.index()] = state;
        state
    }

    fn process_failure(&mut self, route: Route, reason: ErrorReason) -> NodeState {
        warn!(node = %self.remote.neighbor.ip, %route, %reason, "failed");
        self.disconnect(route, NodeState::Error(reason), false)
    }

    fn advance(&mut self, route: Route, phase: ConnectPhase, now: u64) -> NodeState {
        self.timeout = Some(now + TIMEOUT_SECS);
        self.set_state(route, NodeState::Connecting(phase))
    }

    fn process_connecting(
        &mut self,
        route: Route,
        phase: ConnectPhase,
        now: u64,
        ready: &SocketSet,
    ) -> NodeState {
        let Some(socket) = self.remote.socket(route) else {
            return self.state(route);
        };
        let readable = phase.wants_read() && ready.contains_read(socket);
        let writable = phase.wants_write() && ready.contains_write(socket);
        if !readable && !writable {
            return self.state(route);
        }

        match phase {
            ConnectPhase::Open => self.state(route),

            // -- TCP --
            ConnectPhase::Auth => {
                let cipher = match make_auth(
                    self.provider.as_ref(),
                    &self.local.key,
                    &self.local.ephemeral_key,
                    &self.local.nonce,
                    &self.remote.key,
                ) {
                    Ok(cipher) => cipher,
                    Err(_) => {
                        return self.process_failure(
                            route,
                            ErrorReason::Protocol(ProtocolReason::TcpAuthentication),
                        );
                    }
                };
                if let Err(error) = self.remote.send(route, &cipher) {
                    return self.process_failure(route, ErrorReason::Unix(error.errno()));
                }
                self.auth_cipher = cipher;
                self.advance(route, ConnectPhase::AuthAck, now)
            }

            ConnectPhase::AuthAck => {
                let mut ack_cipher = [0u8; ACK_CIPHER_LEN];
                if let Err(error) = self.remote.recv_exact(route, &mut ack_cipher) {
                    return self.process_failure(route, ErrorReason::Unix(error.errno()));
                }
                let ack = match read_auth_ack(self.provider.as_ref(), &self.local.key, &ack_cipher)
                {
                    Ok(ack) => ack,
                    Err(_) => {
                        return self.process_failure(
                            route,
                            ErrorReason::Protocol(ProtocolReason::TcpAuthentication),
                        );
                    }
                };
                self.remote.ephemeral_key = Some(ack.remote_ephemeral);
                self.remote.nonce = Some(ack.remote_nonce);

                let transcript = HandshakeTranscript {
                    local_nonce: &self.local.nonce,
                    remote_nonce: &ack.remote_nonce,
                    auth_cipher: &self.auth_cipher,
                    ack_cipher: &ack_cipher,
                };
                match Session::initiator(
                    self.provider.as_ref(),
                    &self.local.ephemeral_key,
                    &ack.remote_ephemeral,
                    &transcript,
                ) {
                    Ok(session) => {
                        self.session = Some(session);
                        self.advance(route, ConnectPhase::Hello, now)
                    }
                    Err(_) => self.process_failure(
                        route,
                        ErrorReason::Protocol(ProtocolReason::TcpAuthentication),
                    ),
                }
            }

            ConnectPhase::Hello => {
                let hello = Message::P2p(P2pMessage::Hello(self.local.hello.clone()));
                if self.send_message(route, &hello).is_err() {
                    return self.process_failure(
                        route,
                        ErrorReason::Protocol(ProtocolReason::TcpHelloMissed),
                    );
                }
                self.advance(route, ConnectPhase::HelloAck, now)
            }

            ConnectPhase::HelloAck => match self.recv_message(route) {
                Err(failure) => self.recv_failure(route, failure, ProtocolReason::TcpHelloMissed),
                Ok(Message::P2p(P2pMessage::Disconnect(reason))) => {
                    self.process_failure(route, ErrorReason::Disconnect(reason))
                }
                Ok(Message::P2p(P2pMessage::Hello(hello))) => {
                    match negotiate(&self.local.hello, &hello) {
                        Err(reason) => {
                            self.remote.hello = Some(hello);
                            self.process_failure(route, ErrorReason::Protocol(reason))
                        }
                        Ok((node_type, protocol)) => {
                            debug!(node = %self.remote.neighbor.ip, ?node_type,
                                   protocol = %protocol.kind(), "negotiated");
                            self.remote.hello = Some(hello);
                            self.node_type = node_type;
                            self.protocol = Some(protocol);
                            self.message_id_offset = MESSAGE_ID_OFFSET;
                            let next = if node_type == NodeType::Parity {
                                // Parity pings before accepting Status.
                                ConnectPhase::PreStatusPingRecv
                            } else {
                                ConnectPhase::Status
                            };
                            self.advance(route, next, now)
                        }
                    }
                }
                Ok(_) => self.process_failure(
                    route,
                    ErrorReason::Protocol(ProtocolReason::TcpHelloMissed),
                ),
            },

            ConnectPhase::PreStatusPingRecv => match self.recv_message(route) {
                Ok(Message::P2p(P2pMessage::Ping)) => {
                    self.advance(route, ConnectPhase::PreStatusPongSend, now)
                }
                Err(failure) => {
                    self.recv_failure(route, failure, ProtocolReason::TcpStatusMissed)
                }
                Ok(_) => self.process_failure(
                    route,
                    ErrorReason::Protocol(ProtocolReason::TcpStatusMissed),
                ),
            },

            ConnectPhase::PreStatusPongSend => {
                if self
                    .send_message(route, &Message::P2p(P2pMessage::Pong))
                    .is_err()
                {
                    return self.process_failure(
                        route,
                        ErrorReason::Protocol(ProtocolReason::TcpStatusMissed),
                    );
                }
                self.advance(route, ConnectPhase::Status, now)
            }

            ConnectPhase::Status => {
                let Some(protocol) = self.protocol.as_deref() else {
                    return self.process_failure(
                        route,
                        ErrorReason::Protocol(ProtocolReason::TcpStatusMissed),
                    );
                };
                let mut status = self.local.status.clone();
                status.protocol_version = protocol.version();
                let message = Message::Light(LightMessage {
                    protocol: protocol.kind(),
                    payload: LightPayload::Status(status),
                });
                if self.send_message(route, &message).is_err() {
                    return self.process_failure(
                        route,
                        ErrorReason::Protocol(ProtocolReason::TcpStatusMissed),
                    );
                }
                self.advance(route, ConnectPhase::StatusAck, now)
            }

            ConnectPhase::StatusAck => match self.recv_message(route) {
                Err(failure) => {
                    self.recv_failure(route, failure, ProtocolReason::TcpStatusMissed)
                }
                Ok(Message::P2p(P2pMessage::Disconnect(reason))) => {
                    self.process_failure(route, ErrorReason::Disconnect(reason))
                }
                Ok(Message::P2p(P2pMessage::Ping)) => {
                    // Answer and keep waiting for Status.
                    if self
                        .send_message(route, &Message::P2p(P2pMessage::Pong))
                        .is_err()
                    {
                        return self.process_failure(
                            route,
                            ErrorReason::Protocol(ProtocolReason::TcpStatusMissed),
                        );
                    }
                    self.state(route)
                }
                Ok(Message::Light(LightMessage {
                    payload: LightPayload::Status(status),
                    ..
                })) => {
                    self.remote.status = Some(status.clone());
                    let sufficient = self.protocol.as_deref().is_some_and(|protocol| {
                        status_is_sufficient(
                            &self.local.status,
                            &status,
                            protocol,
                            self.handle_sync,
                        )
                    });
                    if !sufficient {
                        return self.process_failure(
                            route,
                            ErrorReason::Protocol(ProtocolReason::StatusMismatch),
                        );
                    }
                    debug!(node = %self.remote.neighbor.ip,
                           head = status.head_number, "connected");
                    self.timeout = Some(now + TIMEOUT_RECV_SECS);
                    self.set_state(route, NodeState::Connected);
                    self.events.on_status(status.head_hash, status.head_number);
                    self.state(route)
                }
                Ok(_) => self.process_failure(
                    route,
                    ErrorReason::Protocol(ProtocolReason::TcpStatusMissed),
                ),
            },

            // -- UDP --
            ConnectPhase::Ping => {
                let ping = Message::Dis(discovery::ping(
                    &self.local.neighbor,
                    &self.remote.neighbor,
                    now,
                ));
                if let Err(failure) = self.send_message(route, &ping) {
                    return self.send_failure(route, failure);
                }
                self.advance(route, ConnectPhase::PingAck, now)
            }

            ConnectPhase::PingAck => match self.recv_message(route) {
                Ok(Message::Dis(DisMessage::Pong(_))) => {
                    self.advance(route, ConnectPhase::PingAckDiscover, now)
                }
                Err(failure) => {
                    self.recv_failure(route, failure, ProtocolReason::PingPongMissed)
                }
                Ok(_) => self.process_failure(
                    route,
                    ErrorReason::Protocol(ProtocolReason::PingPongMissed),
                ),
            },

            // Probe with FindNeighbors; what comes back tells the server
            // kind apart (Parity answers directly, Geth pings us first).
            ConnectPhase::PingAckDiscover => {
                let find =
                    Message::Dis(discovery::find_neighbors(self.local.neighbor.id, now));
                if let Err(failure) = self.send_message(route, &find) {
                    return self.send_failure(route, failure);
                }
                self.advance(route, ConnectPhase::PingAckDiscoverAck, now)
            }

            ConnectPhase::PingAckDiscoverAck => match self.recv_message(route) {
                Ok(Message::Dis(DisMessage::Ping(ping))) => {
                    let pong =
                        Message::Dis(discovery::pong(ping.from, ping.hash, now));
                    if let Err(failure) = self.send_message(route, &pong) {
                        return self.send_failure(route, failure);
                    }
                    self.advance(route, ConnectPhase::Discover, now)
                }
                Ok(Message::Dis(DisMessage::Neighbors(neighbors))) => {
                    self.finish_discovery(route, neighbors.neighbors)
                }
                Err(failure) => {
                    self.recv_failure(route, failure, ProtocolReason::PingPongMissed)
                }
                Ok(_) => self.process_failure(
                    route,
                    ErrorReason::Protocol(ProtocolReason::PingPongMissed),
                ),
            },

            ConnectPhase::Discover => {
                let find =
                    Message::Dis(discovery::find_neighbors(self.local.neighbor.id, now));
                if let Err(failure) = self.send_message(route, &find) {
                    return self.send_failure(route, failure);
                }
                self.advance(route, ConnectPhase::DiscoverAck, now)
            }

            ConnectPhase::DiscoverAck => match self.recv_message(route) {
                Ok(Message::Dis(DisMessage::Neighbors(neighbors))) => {
                    self.discovered = true;
                    self.events.on_neighbors(neighbors.neighbors);
                    // A second neighbors datagram follows.
                    self.advance(route, ConnectPhase::DiscoverAckToo, now)
                }
                Err(failure) => {
                    self.recv_failure(route, failure, ProtocolReason::PingPongMissed)
                }
                Ok(_) => self.process_failure(
                    route,
                    ErrorReason::Protocol(ProtocolReason::PingPongMissed),
                ),
            },

            ConnectPhase::DiscoverAckToo => match self.recv_message(route) {
                Ok(Message::Dis(DisMessage::Neighbors(neighbors))) => {
                    self.finish_discovery(route, neighbors.neighbors)
                }
                Err(failure) => {
                    self.recv_failure(route, failure, ProtocolReason::PingPongMissed)
                }
                Ok(_) => self.process_failure(
                    route,
                    ErrorReason::Protocol(ProtocolReason::PingPongMissed),
                ),
            },
        }
    }

    /// Discovery succeeded: report the neighbors and release the route.
    fn finish_discovery(&mut self, route: Route, neighbors: Vec<Neighbor>) -> NodeState {
        debug!(node = %self.remote.neighbor.ip, count = neighbors.len(), "discovered");
        self.discovered = true;
        self.set_state(route, NodeState::Connected);
        self.events.on_neighbors(neighbors);
        self.disconnect(route, NodeState::Available, false)
    }

    // ---- connected ------------------------------------------------------

    fn process_connected(&mut self, route: Route, now: u64, ready: &SocketSet) -> NodeState {
        let Some(socket) = self.remote.socket(route) else {
            return self.state(route);
        };

        if ready.contains_read(socket) {
            self.timeout = Some(now + TIMEOUT_RECV_SECS);
            match self.recv_message(route) {
                Err(failure) => {
                    return self.recv_failure(route, failure, ProtocolReason::RlpParse);
                }
                Ok(message) => {
                    self.dispatch(route, message, now);
                }
            }
        }

        if self.state(route) == NodeState::Connected && ready.contains_write(socket) {
            self.timeout = Some(now + TIMEOUT_RECV_SECS);
            // One pending provisioner message per tick.
            let message = self
                .provisioners
                .iter_mut()
                .find(|provisioner| provisioner.send_pending())
                .and_then(|provisioner| provisioner.next_message().cloned());
            if let Some(message) = message {
                let message = Message::Light(message);
                if let Err(failure) = self.send_message(route, &message) {
                    return self.send_failure(route, failure);
                }
            }
        }

        self.state(route)
    }

    fn dispatch(&mut self, route: Route, message: Message, now: u64) {
        trace!(node = %self.remote.neighbor.ip, message = message.name(), "recv");
        match message {
            Message::P2p(P2pMessage::Disconnect(reason)) => {
                self.disconnect(route, NodeState::Error(ErrorReason::Disconnect(reason)), false);
            }
            Message::P2p(P2pMessage::Ping) => {
                if self
                    .send_message(route, &Message::P2p(P2pMessage::Pong))
                    .is_err()
                {
                    self.process_failure(
                        route,
                        ErrorReason::Protocol(ProtocolReason::PingPongMissed),
                    );
                }
            }
            Message::P2p(_) => {}

            Message::Dis(DisMessage::Ping(ping)) => {
                let pong = Message::Dis(discovery::pong(ping.from, ping.hash, now));
                if let Err(failure) = self.send_message(route, &pong) {
                    self.send_failure(route, failure);
                }
            }
            Message::Dis(DisMessage::Neighbors(neighbors)) => {
                self.events.on_neighbors(neighbors.neighbors);
            }
            Message::Dis(_) => {}

            Message::Light(light) => self.dispatch_light(route, light),
        }
    }

    fn dispatch_light(&mut self, route: Route, message: LightMessage) {
        match message.payload {
            LightPayload::Status(status) => {
                self.remote.status = Some(status.clone());
                self.events.on_status(status.head_hash, status.head_number);
            }
            LightPayload::Announce(announce) => {
                self.events.on_announce(
                    announce.head_hash,
                    announce.head_number,
                    announce.head_total_difficulty,
                    announce.reorg_depth,
                );
            }
            LightPayload::Response {
                request_id,
                credits,
                data,
            } => {
                if let Some(credits) = credits {
                    self.credits = credits;
                }
                let owner = self
                    .provisioners
                    .iter()
                    .position(|provisioner| provisioner.owns(request_id));
                match owner {
                    Some(index) => {
                        if let Some(result) =
                            self.provisioners[index].handle_response(request_id, data)
                        {
                            self.provisioners.remove(index);
                            self.events.on_provision_result(result);
                        }
                    }
                    None => {
                        trace!(request_id, "response owned by no provision, dropped");
                    }
                }
            }
            LightPayload::UpdateCreditParameters { .. } => {
                let ack = Message::Light(LightMessage {
                    protocol: message.protocol,
                    payload: LightPayload::AcknowledgeUpdate,
                });
                if let Err(failure) = self.send_message(route, &ack) {
                    self.send_failure(route, failure);
                }
            }
            // We never serve requests; stray acknowledgements are noise.
            LightPayload::Request { .. } | LightPayload::AcknowledgeUpdate => {}
        }
    }

    // ---- wire -----------------------------------------------------------

    fn send_failure(&mut self, route: Route, failure: SendFailure) -> NodeState {
        match failure {
            SendFailure::Transport(errno) => {
                self.process_failure(route, ErrorReason::Unix(errno))
            }
            SendFailure::Coder => self.process_failure(
                route,
                ErrorReason::Protocol(ProtocolReason::RlpParse),
            ),
        }
    }

    fn recv_failure(
        &mut self,
        route: Route,
        failure: RecvFailure,
        decode_reason: ProtocolReason,
    ) -> NodeState {
        match failure {
            RecvFailure::Oversize => self.process_failure(
                route,
                ErrorReason::Protocol(ProtocolReason::UdpExcessiveByteCount),
            ),
            RecvFailure::Transport(errno) => {
                self.process_failure(route, ErrorReason::Unix(errno))
            }
            RecvFailure::Decode => {
                self.process_failure(route, ErrorReason::Protocol(decode_reason))
            }
        }
    }

    fn send_message(&mut self, route: Route, message: &Message) -> Result<(), SendFailure> {
        trace!(node = %self.remote.neighbor.ip, message = message.name(), "send");
        let mut payload = self
            .coder
            .encode(message)
            .map_err(|_| SendFailure::Coder)?;
        match route {
            Route::Udp => self
                .remote
                .send(route, &payload)
                .map_err(|error| SendFailure::Transport(error.errno())),
            Route::Tcp => {
                if matches!(message, Message::Light(_)) {
                    payload[0] += self.message_id_offset;
                }
                let session = self.session.as_mut().ok_or(SendFailure::Coder)?;
                let frame = session.encrypt_frame(&payload);
                self.remote
                    .send(route, &frame)
                    .map_err(|error| SendFailure::Transport(error.errno()))
            }
        }
    }

    fn recv_message(&mut self, route: Route) -> Result<Message, RecvFailure> {
        match route {
            Route::Udp => {
                let mut buf = vec![0u8; MAX_DATAGRAM_BYTES + 1];
                let len = self
                    .remote
                    .recv_datagram(route, &mut buf)
                    .map_err(|error| RecvFailure::Transport(error.errno()))?;
                if len > MAX_DATAGRAM_BYTES {
                    return Err(RecvFailure::Oversize);
                }
                self.coder
                    .decode(MessageKind::Dis, &buf[..len])
                    .map_err(|_| RecvFailure::Decode)
            }
            Route::Tcp => {
                let mut header = [0u8; HEADER_LEN];
                self.remote
                    .recv_exact(route, &mut header)
                    .map_err(|error| RecvFailure::Transport(error.errno()))?;

                let session = self.session.as_mut().ok_or(RecvFailure::Decode)?;
                let payload_len = session
                    .decrypt_header(&header)
                    .map_err(|_| RecvFailure::Decode)?;

                let mut body = vec![0u8; Session::frame_body_len(payload_len)];
                self.remote
                    .recv_exact(route, &mut body)
                    .map_err(|error| RecvFailure::Transport(error.errno()))?;
                let session = self.session.as_mut().ok_or(RecvFailure::Decode)?;
                let payload = session
                    .decrypt_frame(&body, payload_len)
                    .map_err(|_| RecvFailure::Decode)?;

                let identifier = *payload.first().ok_or(RecvFailure::Decode)?;
                let kind = self.extract_kind(identifier);
                self.coder
                    .decode(kind, &payload[1..])
                    .map_err(|_| RecvFailure::Decode)
            }
        }
    }

    /// Classify an identifier byte against the negotiated offset.
    fn extract_kind(&self, identifier: u8) -> MessageKind {
        if self.message_id_offset == 0 || identifier < self.message_id_offset {
            MessageKind::P2p(identifier)
        } else {
            let inner = identifier - self.message_id_offset;
            match self.node_type {
                NodeType::Parity => MessageKind::Pip(inner),
                _ => MessageKind::Les(inner),
            }
        }
    }
}
