//! UDP discovery exchanges: ping/pong, the FindNeighbors probe, and both
//! server behaviors (a direct Neighbors answer versus a ping-back followed
//! by two Neighbors datagrams).

use lantern_integration_tests::*;
use lantern_net::testing::PairTransport;
use lantern_net::{
    discovery, ConnectPhase, DisMessage, ErrorReason, LightProtocolKind, Message, NodeState,
    ProtocolReason, Route,
};

fn start_discovery(
    node: &mut lantern_net::Node<PairTransport>,
    server: &mut TestServer,
) -> Vec<u8> {
    node.connect(Route::Udp, NOW);
    drive_write(node, Route::Udp, NOW); // ping out

    let (message, _raw) = server.recv_datagram();
    let Message::Dis(DisMessage::Ping(ping)) = message else {
        panic!("expected discovery ping");
    };
    assert_eq!(ping.expiration, NOW + discovery::DISCOVERY_TTL_SECS);

    server.send_datagram(&Message::Dis(discovery::pong(
        ping.from,
        ping.hash,
        NOW,
    )));
    drive_read(node, Route::Udp, NOW); // pong in
    assert_eq!(
        node.state(Route::Udp),
        NodeState::Connecting(ConnectPhase::PingAckDiscover)
    );

    drive_write(node, Route::Udp, NOW); // find-neighbors out
    let (message, raw) = server.recv_datagram();
    let Message::Dis(DisMessage::FindNeighbors(find)) = message else {
        panic!("expected find-neighbors");
    };
    // The probe asks for nodes near our own identity.
    assert_ne!(find.target, server.node_id());
    raw
}

fn neighbors_datagram(count: u8) -> Message {
    let neighbors = (0..count)
        .map(|i| lantern_net::Neighbor {
            id: lantern_net::NodeId([i + 1; 64]),
            ip: std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 1, i + 1)),
            udp_port: 30303,
            tcp_port: 30303,
        })
        .collect();
    Message::Dis(DisMessage::Neighbors(lantern_net::message::DisNeighbors {
        neighbors,
        expiration: NOW + discovery::DISCOVERY_TTL_SECS,
    }))
}

#[test]
fn direct_neighbors_answer_completes_discovery() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Pip);
    let (mut node, events) = make_node(&server, client, false);

    start_discovery(&mut node, &mut server);
    server.send_datagram(&neighbors_datagram(3));
    drive_read(&mut node, Route::Udp, NOW);

    assert!(node.discovered());
    // The route is released once the neighbors are harvested.
    assert_eq!(node.state(Route::Udp), NodeState::Available);
    assert_eq!(events.neighbors().len(), 1);
    assert_eq!(events.neighbors()[0].len(), 3);
}

#[test]
fn ping_back_server_yields_two_neighbors_batches() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, events) = make_node(&server, client, false);

    start_discovery(&mut node, &mut server);

    // The server pings us back instead of answering.
    let server_ping = Message::Dis(discovery::ping(
        &server.neighbor(),
        node.neighbor(),
        NOW,
    ));
    server.send_datagram(&server_ping);
    drive_read(&mut node, Route::Udp, NOW);
    assert_eq!(
        node.state(Route::Udp),
        NodeState::Connecting(ConnectPhase::Discover)
    );

    // Our pong must echo the digest of the server's ping datagram.
    let (message, _raw) = server.recv_datagram();
    let Message::Dis(DisMessage::Pong(pong)) = message else {
        panic!("expected pong");
    };
    let expected_hash = {
        use lantern_codec::CryptoProvider;
        let encoded = {
            use lantern_net::MessageCoder;
            lantern_net::testing::JsonCoder::new()
                .encode(&server_ping)
                .unwrap()
        };
        lantern_net::Hash256(
            lantern_codec::testing::TestProvider::new().keccak256(&encoded),
        )
    };
    assert_eq!(pong.ping_hash, expected_hash);

    drive_write(&mut node, Route::Udp, NOW); // second find-neighbors
    let (message, _raw) = server.recv_datagram();
    assert!(matches!(message, Message::Dis(DisMessage::FindNeighbors(_))));

    server.send_datagram(&neighbors_datagram(2));
    drive_read(&mut node, Route::Udp, NOW);
    assert_eq!(
        node.state(Route::Udp),
        NodeState::Connecting(ConnectPhase::DiscoverAckToo)
    );

    server.send_datagram(&neighbors_datagram(4));
    drive_read(&mut node, Route::Udp, NOW);

    assert!(node.discovered());
    assert_eq!(node.state(Route::Udp), NodeState::Available);
    let batches = events.neighbors();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[1].len(), 4);
}

#[test]
fn non_pong_answer_to_ping_is_fatal() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);

    node.connect(Route::Udp, NOW);
    drive_write(&mut node, Route::Udp, NOW);
    server.recv_datagram();

    server.send_datagram(&neighbors_datagram(1));
    assert_eq!(
        drive_read(&mut node, Route::Udp, NOW),
        NodeState::Error(ErrorReason::Protocol(ProtocolReason::PingPongMissed))
    );
}

#[test]
fn oversize_datagram_is_permanently_fatal() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);

    node.connect(Route::Udp, NOW);
    drive_write(&mut node, Route::Udp, NOW);
    server.recv_datagram();

    server.send_raw_datagram(&vec![0u8; discovery::MAX_DATAGRAM_BYTES + 1]);
    let state = drive_read(&mut node, Route::Udp, NOW);
    assert_eq!(
        state,
        NodeState::Error(ErrorReason::Protocol(ProtocolReason::UdpExcessiveByteCount))
    );
    // This error survives a state restore: the node is never retried.
    node.set_state_initial(Route::Udp, state);
    assert_eq!(node.state(Route::Udp), state);
}

#[test]
fn udp_timeout_disconnects_without_a_keepalive() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);

    node.connect(Route::Udp, NOW);
    drive_write(&mut node, Route::Udp, NOW);
    server.recv_datagram();

    assert!(node.handle_time(Route::Udp, NOW + lantern_net::TIMEOUT_SECS, true));
    assert_eq!(
        node.state(Route::Udp),
        NodeState::Error(ErrorReason::Disconnect(
            lantern_net::DisconnectReason::Timeout
        ))
    );
}
