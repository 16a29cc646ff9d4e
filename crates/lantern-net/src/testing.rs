//! Test doubles: a JSON wire coder, an in-memory transport pair, and a
//! recording event sink.
//!
//! The engine is generic over its coder and transport, so tests drive full
//! handshakes without sockets or an RLP implementation.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use lantern_codec::testing::TestProvider;
use lantern_codec::CryptoProvider;

use crate::endpoint::{Neighbor, Socket, Transport, TransportError};
use crate::error::CoderError;
use crate::message::{
    DisMessage, Hash256, HelloMessage, LightMessage, LightPayload, Message, MessageCoder,
    MessageKind, P2pMessage,
};
use crate::node::NodeEvents;
use crate::provision::ProvisionResult;
use crate::state::{DisconnectReason, Route};

const P2P_HELLO: u8 = 0x00;
const P2P_DISCONNECT: u8 = 0x01;
const P2P_PING: u8 = 0x02;
const P2P_PONG: u8 = 0x03;

fn light_identifier(payload: &LightPayload) -> u8 {
    match payload {
        LightPayload::Status(_) => 0x00,
        LightPayload::Announce(_) => 0x01,
        LightPayload::Request { .. } => 0x02,
        LightPayload::Response { .. } => 0x03,
        LightPayload::UpdateCreditParameters { .. } => 0x04,
        LightPayload::AcknowledgeUpdate => 0x05,
    }
}

/// A [`MessageCoder`] that writes JSON payloads behind the identifier byte.
/// Discovery messages encode to one JSON datagram whose digest stands in
/// for the packet hash.
pub struct JsonCoder {
    provider: TestProvider,
}

impl JsonCoder {
    /// A coder backed by the deterministic test provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: TestProvider::new(),
        }
    }
}

impl Default for JsonCoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCoder for JsonCoder {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CoderError> {
        match message {
            Message::P2p(P2pMessage::Hello(hello)) => {
                let mut out = vec![P2P_HELLO];
                out.extend(serde_json::to_vec(hello).map_err(|_| CoderError::Malformed)?);
                Ok(out)
            }
            Message::P2p(P2pMessage::Disconnect(reason)) => {
                Ok(vec![P2P_DISCONNECT, reason.code()])
            }
            Message::P2p(P2pMessage::Ping) => Ok(vec![P2P_PING]),
            Message::P2p(P2pMessage::Pong) => Ok(vec![P2P_PONG]),
            Message::Dis(dis) => {
                serde_json::to_vec(dis).map_err(|_| CoderError::Malformed)
            }
            Message::Light(light) => {
                let mut out = vec![light_identifier(&light.payload)];
                out.extend(serde_json::to_vec(light).map_err(|_| CoderError::Malformed)?);
                Ok(out)
            }
        }
    }

    fn decode(&self, kind: MessageKind, bytes: &[u8]) -> Result<Message, CoderError> {
        match kind {
            MessageKind::Dis => {
                let mut dis: DisMessage =
                    serde_json::from_slice(bytes).map_err(|_| CoderError::Malformed)?;
                if let DisMessage::Ping(ping) = &mut dis {
                    // The pong must echo the packet digest.
                    ping.hash = Hash256(self.provider.keccak256(bytes));
                }
                Ok(Message::Dis(dis))
            }
            MessageKind::P2p(identifier) => match identifier {
                P2P_HELLO => {
                    let hello: HelloMessage =
                        serde_json::from_slice(bytes).map_err(|_| CoderError::Malformed)?;
                    Ok(Message::P2p(P2pMessage::Hello(hello)))
                }
                P2P_DISCONNECT => {
                    let code = *bytes.first().ok_or(CoderError::Malformed)?;
                    Ok(Message::P2p(P2pMessage::Disconnect(
                        DisconnectReason::from_code(code),
                    )))
                }
                P2P_PING => Ok(Message::P2p(P2pMessage::Ping)),
                P2P_PONG => Ok(Message::P2p(P2pMessage::Pong)),
                other => Err(CoderError::UnknownIdentifier(other)),
            },
            MessageKind::Les(identifier) | MessageKind::Pip(identifier) => {
                let light: LightMessage =
                    serde_json::from_slice(bytes).map_err(|_| CoderError::Malformed)?;
                if light_identifier(&light.payload) != identifier {
                    return Err(CoderError::IdentifierMismatch);
                }
                Ok(Message::Light(light))
            }
        }
    }
}

struct PairShared {
    /// Stream bytes in flight toward each side.
    tcp: [VecDeque<u8>; 2],
    /// Datagrams in flight toward each side.
    udp: [VecDeque<Vec<u8>>; 2],
    open: [[bool; Route::COUNT]; 2],
    sockets: [[Option<i32>; Route::COUNT]; 2],
    next_socket: i32,
}

/// An in-memory [`Transport`] connecting two peers.
///
/// Stream reads of more bytes than are queued fail with `EAGAIN` (Os(11)),
/// matching a non-blocking socket with nothing to read.
pub struct PairTransport {
    side: usize,
    shared: Rc<RefCell<PairShared>>,
}

impl PairTransport {
    /// A connected pair; the first element is side 0.
    #[must_use]
    pub fn pair() -> (PairTransport, PairTransport) {
        let shared = Rc::new(RefCell::new(PairShared {
            tcp: [VecDeque::new(), VecDeque::new()],
            udp: [VecDeque::new(), VecDeque::new()],
            open: [[false; Route::COUNT]; 2],
            sockets: [[None; Route::COUNT]; 2],
            next_socket: 3,
        }));
        (
            PairTransport {
                side: 0,
                shared: Rc::clone(&shared),
            },
            PairTransport {
                side: 1,
                shared,
            },
        )
    }

    fn peer(&self) -> usize {
        1 - self.side
    }
}

impl Transport for PairTransport {
    fn open(&mut self, route: Route) -> Result<(), TransportError> {
        let mut shared = self.shared.borrow_mut();
        shared.open[self.side][route.index()] = true;
        if shared.sockets[self.side][route.index()].is_none() {
            let socket = shared.next_socket;
            shared.next_socket += 1;
            shared.sockets[self.side][route.index()] = Some(socket);
        }
        Ok(())
    }

    fn close(&mut self, route: Route, _clean: bool) -> Result<(), TransportError> {
        let mut shared = self.shared.borrow_mut();
        shared.open[self.side][route.index()] = false;
        shared.sockets[self.side][route.index()] = None;
        Ok(())
    }

    fn socket(&self, route: Route) -> Option<Socket> {
        let shared = self.shared.borrow();
        if shared.open[self.side][route.index()] {
            shared.sockets[self.side][route.index()].map(Socket)
        } else {
            None
        }
    }

    fn send(&mut self, route: Route, bytes: &[u8]) -> Result<(), TransportError> {
        let peer = self.peer();
        let mut shared = self.shared.borrow_mut();
        if !shared.open[self.side][route.index()] {
            return Err(TransportError::NotOpen);
        }
        match route {
            Route::Tcp => shared.tcp[peer].extend(bytes.iter().copied()),
            Route::Udp => shared.udp[peer].push_back(bytes.to_vec()),
        }
        Ok(())
    }

    fn recv_exact(&mut self, route: Route, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut shared = self.shared.borrow_mut();
        if !shared.open[self.side][route.index()] {
            return Err(TransportError::NotOpen);
        }
        let queue = &mut shared.tcp[self.side];
        if queue.len() < buf.len() {
            return Err(TransportError::Os(11));
        }
        for byte in buf.iter_mut() {
            *byte = queue.pop_front().unwrap_or_default();
        }
        Ok(())
    }

    fn recv_datagram(&mut self, route: Route, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut shared = self.shared.borrow_mut();
        if !shared.open[self.side][route.index()] {
            return Err(TransportError::NotOpen);
        }
        let Some(datagram) = shared.udp[self.side].pop_front() else {
            return Err(TransportError::Os(11));
        };
        let copied = datagram.len().min(buf.len());
        buf[..copied].copy_from_slice(&datagram[..copied]);
        Ok(datagram.len())
    }
}

/// A [`NodeEvents`] implementation that records everything it hears.
#[derive(Default)]
pub struct EventSink {
    statuses: RefCell<Vec<(Hash256, u64)>>,
    announces: RefCell<Vec<(Hash256, u64, u128, u64)>>,
    results: RefCell<Vec<ProvisionResult>>,
    neighbors: RefCell<Vec<Vec<Neighbor>>>,
}

impl EventSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every Status head reported so far.
    #[must_use]
    pub fn statuses(&self) -> Vec<(Hash256, u64)> {
        self.statuses.borrow().clone()
    }

    /// Every head announcement reported so far.
    #[must_use]
    pub fn announces(&self) -> Vec<(Hash256, u64, u128, u64)> {
        self.announces.borrow().clone()
    }

    /// Every completed provision reported so far.
    #[must_use]
    pub fn provision_results(&self) -> Vec<ProvisionResult> {
        self.results.borrow().clone()
    }

    /// Every neighbor batch reported so far.
    #[must_use]
    pub fn neighbors(&self) -> Vec<Vec<Neighbor>> {
        self.neighbors.borrow().clone()
    }
}

impl NodeEvents for EventSink {
    fn on_status(&self, head_hash: Hash256, head_number: u64) {
        self.statuses.borrow_mut().push((head_hash, head_number));
    }

    fn on_announce(
        &self,
        head_hash: Hash256,
        head_number: u64,
        head_total_difficulty: u128,
        reorg_depth: u64,
    ) {
        self.announces.borrow_mut().push((
            head_hash,
            head_number,
            head_total_difficulty,
            reorg_depth,
        ));
    }

    fn on_provision_result(&self, result: ProvisionResult) {
        self.results.borrow_mut().push(result);
    }

    fn on_neighbors(&self, neighbors: Vec<Neighbor>) {
        self.neighbors.borrow_mut().push(neighbors);
    }
}
