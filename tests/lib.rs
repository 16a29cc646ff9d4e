//! Shared scaffolding for the integration tests: a scripted peer that
//! serves the responder side of the transport handshake and speaks the
//! JSON test wire format over an in-memory transport pair.

use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::sync::Arc;

use lantern_codec::testing::TestProvider;
use lantern_codec::{
    make_auth_ack, read_auth, CryptoProvider, HandshakeTranscript, SecretKey, Session,
    AUTH_CIPHER_LEN, HEADER_LEN,
};
use lantern_net::testing::{EventSink, JsonCoder, PairTransport};
use lantern_net::{
    Capability, Hash256, HelloMessage, LightMessage, LightPayload, LightProtocolKind,
    LocalEndpoint, Message, MessageCoder, MessageKind, Neighbor, Node, NodeId, NodePriority,
    NodeState, P2pMessage, Route, SocketSet, StatusMessage, Transport, MESSAGE_ID_OFFSET,
};

/// A fixed "wall clock" for tests.
pub const NOW: u64 = 1_700_000_000;

/// The chain head the local endpoint reports.
pub const LOCAL_HEAD: u64 = 100;

pub fn local_status(head_number: u64) -> StatusMessage {
    StatusMessage {
        protocol_version: 2,
        chain_id: 1,
        head_number,
        head_hash: Hash256([0x11; 32]),
        head_total_difficulty: 1_000,
        genesis_hash: Hash256([0x22; 32]),
        serve_headers: None,
        serve_state_since: None,
        serve_chain_since: None,
        relay_transactions: Some(true),
    }
}

/// A Status a well-behaved server of the given dialect would send.
pub fn server_status(kind: LightProtocolKind, head_number: u64) -> StatusMessage {
    StatusMessage {
        protocol_version: match kind {
            LightProtocolKind::Les => 2,
            LightProtocolKind::Pip => 1,
        },
        chain_id: 1,
        head_number,
        head_hash: Hash256([0x33; 32]),
        head_total_difficulty: 2_000,
        genesis_hash: Hash256([0x22; 32]),
        serve_headers: Some(true),
        serve_state_since: Some(0),
        serve_chain_since: Some(0),
        relay_transactions: Some(true),
    }
}

/// The scripted remote peer. It answers the AUTH handshake like a real
/// server and then exchanges framed or datagram messages by hand.
pub struct TestServer {
    pub provider: TestProvider,
    pub coder: JsonCoder,
    pub transport: PairTransport,
    pub kind: LightProtocolKind,
    pub static_key: SecretKey,
    pub ephemeral_key: SecretKey,
    pub nonce: [u8; 32],
    pub session: Option<Session>,
}

impl TestServer {
    pub fn new(mut transport: PairTransport, kind: LightProtocolKind) -> Self {
        transport.open(Route::Tcp).unwrap();
        transport.open(Route::Udp).unwrap();
        Self {
            provider: TestProvider::new(),
            coder: JsonCoder::new(),
            transport,
            kind,
            static_key: SecretKey::from_bytes([11; 32]),
            ephemeral_key: SecretKey::from_bytes([12; 32]),
            nonce: [13; 32],
            session: None,
        }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_public_key(&self.provider.public_key(&self.static_key))
    }

    pub fn neighbor(&self) -> Neighbor {
        Neighbor {
            id: self.node_id(),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            udp_port: 30303,
            tcp_port: 30303,
        }
    }

    pub fn hello(&self, capabilities: &[(&str, u32)]) -> HelloMessage {
        HelloMessage {
            version: 5,
            client_id: "scripted-server".to_owned(),
            capabilities: capabilities
                .iter()
                .map(|(name, version)| Capability::new(name, *version))
                .collect(),
            port: 30303,
            node_id: self.node_id(),
        }
    }

    /// Read the client's AUTH blob, answer with AUTH-ACK, and derive the
    /// responder-side frame session.
    pub fn accept_auth(&mut self) {
        let mut auth = [0u8; AUTH_CIPHER_LEN];
        self.transport.recv_exact(Route::Tcp, &mut auth).unwrap();
        let request = read_auth(&self.provider, &self.static_key, &auth).unwrap();

        let ack = make_auth_ack(
            &self.provider,
            &self.ephemeral_key,
            &self.nonce,
            &request.remote_static,
        )
        .unwrap();
        self.transport.send(Route::Tcp, &ack).unwrap();

        let session = Session::responder(
            &self.provider,
            &self.ephemeral_key,
            &request.remote_ephemeral,
            &HandshakeTranscript {
                local_nonce: &self.nonce,
                remote_nonce: &request.remote_nonce,
                auth_cipher: &auth,
                ack_cipher: &ack,
            },
        )
        .unwrap();
        self.session = Some(session);
    }

    /// Receive and decode one framed message from the client.
    pub fn recv_message(&mut self) -> Message {
        let mut header = [0u8; HEADER_LEN];
        self.transport.recv_exact(Route::Tcp, &mut header).unwrap();
        let session = self.session.as_mut().unwrap();
        let payload_len = session.decrypt_header(&header).unwrap();

        let mut body = vec![0u8; Session::frame_body_len(payload_len)];
        self.transport.recv_exact(Route::Tcp, &mut body).unwrap();
        let session = self.session.as_mut().unwrap();
        let payload = session.decrypt_frame(&body, payload_len).unwrap();

        let identifier = payload[0];
        let message_kind = if identifier < MESSAGE_ID_OFFSET {
            MessageKind::P2p(identifier)
        } else {
            match self.kind {
                LightProtocolKind::Les => MessageKind::Les(identifier - MESSAGE_ID_OFFSET),
                LightProtocolKind::Pip => MessageKind::Pip(identifier - MESSAGE_ID_OFFSET),
            }
        };
        self.coder.decode(message_kind, &payload[1..]).unwrap()
    }

    /// Frame and send one message to the client.
    pub fn send_message(&mut self, message: &Message) {
        let mut payload = self.coder.encode(message).unwrap();
        if matches!(message, Message::Light(_)) {
            payload[0] += MESSAGE_ID_OFFSET;
        }
        let frame = self.session.as_mut().unwrap().encrypt_frame(&payload);
        self.transport.send(Route::Tcp, &frame).unwrap();
    }

    pub fn send_light(&mut self, payload: LightPayload) {
        let message = Message::Light(LightMessage {
            protocol: self.kind,
            payload,
        });
        self.send_message(&message);
    }

    /// Receive one discovery datagram; returns the message and the raw
    /// datagram bytes (whose digest pongs must echo).
    pub fn recv_datagram(&mut self) -> (Message, Vec<u8>) {
        let mut buf = [0u8; 4096];
        let len = self.transport.recv_datagram(Route::Udp, &mut buf).unwrap();
        let raw = buf[..len].to_vec();
        let message = self.coder.decode(MessageKind::Dis, &raw).unwrap();
        (message, raw)
    }

    pub fn send_datagram(&mut self, message: &Message) {
        let datagram = self.coder.encode(message).unwrap();
        self.transport.send(Route::Udp, &datagram).unwrap();
    }

    pub fn send_raw_datagram(&mut self, bytes: &[u8]) {
        self.transport.send(Route::Udp, bytes).unwrap();
    }
}

/// A node wired to the given server over the other end of its transport
/// pair, with a recording event sink.
pub fn make_node(
    server: &TestServer,
    transport: PairTransport,
    handle_sync: bool,
) -> (Node<PairTransport>, Rc<EventSink>) {
    let provider = TestProvider::new();
    let local_key = SecretKey::from_bytes([1; 32]);
    let local_id = NodeId::from_public_key(&provider.public_key(&local_key));
    let local = LocalEndpoint {
        neighbor: Neighbor {
            id: local_id,
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            udp_port: 30303,
            tcp_port: 30303,
        },
        key: local_key,
        ephemeral_key: SecretKey::from_bytes([2; 32]),
        nonce: [3; 32],
        hello: HelloMessage {
            version: 5,
            client_id: "lantern/test".to_owned(),
            capabilities: vec![Capability::new("les", 2), Capability::new("pip", 1)],
            port: 30303,
            node_id: local_id,
        },
        status: local_status(LOCAL_HEAD),
    };

    let events = Rc::new(EventSink::new());
    let node = Node::new(
        Arc::new(TestProvider::new()),
        Box::new(JsonCoder::new()),
        Box::new(Rc::clone(&events)),
        local,
        server.neighbor(),
        transport,
        NodePriority::Curated,
        handle_sync,
    );
    (node, events)
}

/// A readiness set naming the node's socket on the route.
pub fn ready(
    node: &Node<PairTransport>,
    route: Route,
    read: bool,
    write: bool,
) -> SocketSet {
    let mut interest = SocketSet::new();
    let socket = node
        .update_descriptors(route, &mut interest)
        .expect("route has a registered socket");
    let mut set = SocketSet::new();
    if read {
        set.insert_read(socket);
    }
    if write {
        set.insert_write(socket);
    }
    set
}

pub fn drive_read(node: &mut Node<PairTransport>, route: Route, now: u64) -> NodeState {
    let set = ready(node, route, true, false);
    node.process(route, now, &set)
}

pub fn drive_write(node: &mut Node<PairTransport>, route: Route, now: u64) -> NodeState {
    let set = ready(node, route, false, true);
    node.process(route, now, &set)
}

/// Walk a node and server through the complete TCP handshake, up to and
/// including the Status exchange. Panics if any step surprises the server.
pub fn tcp_handshake(
    node: &mut Node<PairTransport>,
    server: &mut TestServer,
    capabilities: &[(&str, u32)],
    server_head: u64,
) {
    node.connect(Route::Tcp, NOW);
    drive_write(node, Route::Tcp, NOW); // AUTH out
    server.accept_auth();
    drive_read(node, Route::Tcp, NOW); // AUTH-ACK in
    drive_write(node, Route::Tcp, NOW); // Hello out

    let Message::P2p(P2pMessage::Hello(_)) = server.recv_message() else {
        panic!("expected client hello");
    };
    let hello = server.hello(capabilities);
    server.send_message(&Message::P2p(P2pMessage::Hello(hello)));
    drive_read(node, Route::Tcp, NOW); // Hello in

    if server.kind == LightProtocolKind::Pip {
        server.send_message(&Message::P2p(P2pMessage::Ping));
        drive_read(node, Route::Tcp, NOW); // Ping in
        drive_write(node, Route::Tcp, NOW); // Pong out
        let Message::P2p(P2pMessage::Pong) = server.recv_message() else {
            panic!("expected pong before status");
        };
    }

    drive_write(node, Route::Tcp, NOW); // Status out
    let Message::Light(LightMessage {
        payload: LightPayload::Status(_),
        ..
    }) = server.recv_message()
    else {
        panic!("expected client status");
    };
    server.send_light(LightPayload::Status(server_status(server.kind, server_head)));
    drive_read(node, Route::Tcp, NOW); // Status in
}
