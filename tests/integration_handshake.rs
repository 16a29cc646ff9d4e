//! Full TCP session establishment against a scripted peer: AUTH exchange,
//! Hello negotiation, and the Status handshake for both server dialects.

use lantern_integration_tests::*;
use lantern_net::testing::PairTransport;
use lantern_net::{
    ConnectPhase, DisconnectReason, ErrorReason, LightMessage, LightPayload,
    LightProtocolKind, Message, NodeState, NodeType, P2pMessage, ProtocolReason, Route,
};

#[test]
fn geth_handshake_reaches_connected() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, events) = make_node(&server, client, true);

    tcp_handshake(&mut node, &mut server, &[("eth", 63), ("les", 2)], 200);

    assert_eq!(node.state(Route::Tcp), NodeState::Connected);
    assert_eq!(node.node_type(), NodeType::Geth);
    assert!(node.can_handle_provision());
    assert_eq!(events.statuses(), vec![(server_status(LightProtocolKind::Les, 200).head_hash, 200)]);
}

#[test]
fn parity_handshake_pings_before_status() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Pip);
    let (mut node, events) = make_node(&server, client, true);

    tcp_handshake(
        &mut node,
        &mut server,
        &[("eth", 63), ("les", 2), ("pip", 1)],
        200,
    );

    assert_eq!(node.state(Route::Tcp), NodeState::Connected);
    assert_eq!(node.node_type(), NodeType::Parity);
    assert_eq!(events.statuses().len(), 1);
}

#[test]
fn handshake_walks_the_expected_phases() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);

    assert_eq!(
        node.connect(Route::Tcp, NOW),
        NodeState::Connecting(ConnectPhase::Auth)
    );
    assert_eq!(
        drive_write(&mut node, Route::Tcp, NOW),
        NodeState::Connecting(ConnectPhase::AuthAck)
    );
    server.accept_auth();
    assert_eq!(
        drive_read(&mut node, Route::Tcp, NOW),
        NodeState::Connecting(ConnectPhase::Hello)
    );
    assert_eq!(
        drive_write(&mut node, Route::Tcp, NOW),
        NodeState::Connecting(ConnectPhase::HelloAck)
    );
}

#[test]
fn remote_without_full_chain_data_is_a_capabilities_mismatch() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);

    node.connect(Route::Tcp, NOW);
    drive_write(&mut node, Route::Tcp, NOW);
    server.accept_auth();
    drive_read(&mut node, Route::Tcp, NOW);
    drive_write(&mut node, Route::Tcp, NOW);
    server.recv_message();
    let hello = server.hello(&[("les", 2)]);
    server.send_message(&Message::P2p(P2pMessage::Hello(hello)));

    assert_eq!(
        drive_read(&mut node, Route::Tcp, NOW),
        NodeState::Error(ErrorReason::Protocol(ProtocolReason::CapabilitiesMismatch))
    );
}

#[test]
fn stale_server_head_is_a_status_mismatch_until_ours_updates() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);

    // Server head equals ours, so its status is insufficient.
    tcp_handshake(&mut node, &mut server, &[("eth", 63), ("les", 2)], LOCAL_HEAD);
    assert_eq!(
        node.state(Route::Tcp),
        NodeState::Error(ErrorReason::Protocol(ProtocolReason::StatusMismatch))
    );

    // A local head update makes the node worth retrying.
    node.set_local_status(local_status(LOCAL_HEAD - 50));
    assert!(node.updated_local_status(Route::Tcp));
    assert_eq!(node.state(Route::Tcp), NodeState::Available);
}

#[test]
fn remote_disconnect_instead_of_status_is_fatal() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);

    node.connect(Route::Tcp, NOW);
    drive_write(&mut node, Route::Tcp, NOW);
    server.accept_auth();
    drive_read(&mut node, Route::Tcp, NOW);
    drive_write(&mut node, Route::Tcp, NOW);
    server.recv_message();
    let hello = server.hello(&[("eth", 63), ("les", 2)]);
    server.send_message(&Message::P2p(P2pMessage::Hello(hello)));
    drive_read(&mut node, Route::Tcp, NOW);
    drive_write(&mut node, Route::Tcp, NOW); // Status out
    server.recv_message();

    server.send_message(&Message::P2p(P2pMessage::Disconnect(
        DisconnectReason::TooManyPeers,
    )));
    assert_eq!(
        drive_read(&mut node, Route::Tcp, NOW),
        NodeState::Error(ErrorReason::Disconnect(DisconnectReason::TooManyPeers))
    );
}

#[test]
fn ping_while_awaiting_status_is_answered() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);

    node.connect(Route::Tcp, NOW);
    drive_write(&mut node, Route::Tcp, NOW);
    server.accept_auth();
    drive_read(&mut node, Route::Tcp, NOW);
    drive_write(&mut node, Route::Tcp, NOW);
    server.recv_message();
    let hello = server.hello(&[("eth", 63), ("les", 2)]);
    server.send_message(&Message::P2p(P2pMessage::Hello(hello)));
    drive_read(&mut node, Route::Tcp, NOW);
    drive_write(&mut node, Route::Tcp, NOW);
    server.recv_message(); // client status

    server.send_message(&Message::P2p(P2pMessage::Ping));
    assert_eq!(
        drive_read(&mut node, Route::Tcp, NOW),
        NodeState::Connecting(ConnectPhase::StatusAck)
    );
    let Message::P2p(P2pMessage::Pong) = server.recv_message() else {
        panic!("expected pong while awaiting status");
    };

    server.send_light(LightPayload::Status(server_status(
        LightProtocolKind::Les,
        200,
    )));
    assert_eq!(drive_read(&mut node, Route::Tcp, NOW), NodeState::Connected);
}

#[test]
fn connected_node_answers_keepalive_pings() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);
    tcp_handshake(&mut node, &mut server, &[("eth", 63), ("les", 2)], 200);

    server.send_message(&Message::P2p(P2pMessage::Ping));
    assert_eq!(drive_read(&mut node, Route::Tcp, NOW + 1), NodeState::Connected);
    let Message::P2p(P2pMessage::Pong) = server.recv_message() else {
        panic!("expected pong");
    };
}

#[test]
fn announce_reaches_the_event_sink() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, events) = make_node(&server, client, false);
    tcp_handshake(&mut node, &mut server, &[("eth", 63), ("les", 2)], 200);

    server.send_light(LightPayload::Announce(lantern_net::AnnounceMessage {
        head_hash: lantern_net::Hash256([0x44; 32]),
        head_number: 201,
        head_total_difficulty: 2_100,
        reorg_depth: 0,
    }));
    drive_read(&mut node, Route::Tcp, NOW + 1);

    assert_eq!(
        events.announces(),
        vec![(lantern_net::Hash256([0x44; 32]), 201, 2_100, 0)]
    );
}

#[test]
fn remote_disconnect_while_connected_tears_the_route_down() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);
    tcp_handshake(&mut node, &mut server, &[("eth", 63), ("les", 2)], 200);

    server.send_message(&Message::P2p(P2pMessage::Disconnect(
        DisconnectReason::ClientQuit,
    )));
    assert_eq!(
        drive_read(&mut node, Route::Tcp, NOW + 1),
        NodeState::Error(ErrorReason::Disconnect(DisconnectReason::ClientQuit))
    );
}

#[test]
fn recv_timeout_pings_once_then_disconnects() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Les);
    let (mut node, _events) = make_node(&server, client, false);
    tcp_handshake(&mut node, &mut server, &[("eth", 63), ("les", 2)], 200);

    // First expiry: a keepalive ping buys more time.
    let expiry = NOW + lantern_net::TIMEOUT_RECV_SECS;
    assert!(!node.handle_time(Route::Tcp, expiry, true));
    let Message::P2p(P2pMessage::Ping) = server.recv_message() else {
        panic!("expected keepalive ping");
    };
    assert_eq!(node.state(Route::Tcp), NodeState::Connected);

    // Second expiry with no traffic in between: give up.
    let second = expiry + lantern_net::TIMEOUT_RECV_SECS;
    assert!(node.handle_time(Route::Tcp, second, true));
    assert_eq!(
        node.state(Route::Tcp),
        NodeState::Error(ErrorReason::Disconnect(DisconnectReason::Timeout))
    );
}

#[test]
fn credit_parameter_updates_are_acknowledged() {
    let (client, server_end) = PairTransport::pair();
    let mut server = TestServer::new(server_end, LightProtocolKind::Pip);
    let (mut node, _events) = make_node(&server, client, false);
    tcp_handshake(
        &mut node,
        &mut server,
        &[("eth", 63), ("pip", 1)],
        200,
    );

    server.send_light(LightPayload::UpdateCreditParameters {
        max: 10_000,
        recharge: 300,
    });
    drive_read(&mut node, Route::Tcp, NOW + 1);

    let Message::Light(LightMessage {
        payload: LightPayload::AcknowledgeUpdate,
        ..
    }) = server.recv_message()
    else {
        panic!("expected acknowledge-update");
    };
}
