//! Deterministic pipeline tests: the engines are driven by hand and
//! datagrams move through a captured in-memory wire.

mod common;

use bytes::Bytes;
use common::*;
use rudp_tokio::{
    ConnectionState, Packet, PacketFlags, PacketKind, Role, RudpConfig, RudpEvent,
};

#[tokio::test]
async fn test_handshake_establishes_connection() {
    let (mut client, mut server) = pair(RudpConfig::default());

    client.engine.open(server.addr).await.unwrap();
    assert_eq!(client.engine.state().await, ConnectionState::Opening);

    client.engine.flush().await.unwrap();
    let wire = take_wire(&client);
    let packets = decode_wire(&wire);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Syn);
    assert_eq!(packets[0].seq, 100);

    deliver(&server, wire).await;
    server.engine.process().await.unwrap();

    let events = drain_events(&mut server);
    assert!(events
        .iter()
        .any(|e| matches!(e, RudpEvent::ClientConnected(addr) if *addr == client.addr)));
    assert_eq!(server.engine.clients().await, vec![client.addr]);

    // The server replies with an acknowledgement and the SYN|ACK
    server.engine.flush().await.unwrap();
    let wire = take_wire(&server);
    let packets = decode_wire(&wire);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].kind, PacketKind::Ack);
    assert!(packets[0].ack.contains(&100));
    assert_eq!(packets[1].kind, PacketKind::Syn);
    assert!(packets[1].flags.contains(PacketFlags::ACK));
    assert_eq!(packets[0].seq, 200);
    assert_eq!(packets[1].seq, 201);

    deliver(&client, wire).await;
    client.engine.process().await.unwrap();

    assert_eq!(client.engine.state().await, ConnectionState::Open);
    let events = drain_events(&mut client);
    assert!(events
        .iter()
        .any(|e| matches!(e, RudpEvent::Connected(addr) if *addr == server.addr)));

    // The acknowledgement released the client's SYN from retention
    assert!(!client.engine.unconfirmed_seqs().await.contains(&100));
}

#[tokio::test]
async fn test_tiny_payload_delivery() {
    let (mut client, mut server) = pair(RudpConfig::default());
    handshake(&mut client, &mut server).await;

    client.send_data(b"hello").await;
    client.engine.flush().await.unwrap();

    let wire = take_wire(&client);
    let packets = decode_wire(&wire);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Dat);
    assert_eq!(packets[0].qty, 0);
    let dat_seq = packets[0].seq;

    deliver(&server, wire).await;
    server.engine.process().await.unwrap();

    let payloads = drain_payloads(&mut server);
    assert_eq!(payloads, vec![Bytes::from_static(b"hello")]);

    // The next server outbound acknowledges the data packet
    server.engine.flush().await.unwrap();
    let packets = decode_wire(&take_wire(&server));
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Ack);
    assert!(packets[0].ack.contains(&dat_seq));
}

#[tokio::test]
async fn test_fragmentation_reassembles_in_group() {
    let config = RudpConfig::new().max_payload(40);
    let (mut client, mut server) = pair(config);
    handshake(&mut client, &mut server).await;

    // 2.5 x the threshold: three fragments of 40 / 40 / 20 bytes
    let payload: Vec<u8> = (0..100u32).map(|i| (i % 256) as u8).collect();
    client.send_data(&payload).await;
    client.engine.flush().await.unwrap();

    let wire = take_wire(&client);
    let packets = decode_wire(&wire);
    assert_eq!(packets.len(), 3);
    assert!(packets.iter().all(|p| p.kind == PacketKind::Dat));
    assert!(packets.iter().all(|p| p.qty == 3));
    assert!(packets.iter().all(|p| p.id == packets[0].id));
    assert_eq!(packets[1].seq, packets[0].seq + 1);
    assert_eq!(packets[2].seq, packets[0].seq + 2);

    deliver(&server, wire).await;
    server.engine.process().await.unwrap();

    let payloads = drain_payloads(&mut server);
    assert_eq!(payloads.len(), 1);
    assert_eq!(&payloads[0][..], &payload[..]);
}

#[tokio::test]
async fn test_fragments_across_ticks_are_buffered() {
    let config = RudpConfig::new().max_payload(40);
    let (mut client, mut server) = pair(config);
    handshake(&mut client, &mut server).await;

    let payload: Vec<u8> = (0..100u32).map(|i| (i % 256) as u8).collect();
    client.send_data(&payload).await;
    client.engine.flush().await.unwrap();

    let mut wire = take_wire(&client);
    assert_eq!(wire.len(), 3);

    // One fragment per tick: nothing reaches the user until the set
    // completes, then exactly one message does.
    for datagram in wire.drain(..2) {
        deliver(&server, vec![datagram]).await;
        server.engine.process().await.unwrap();
        assert!(drain_payloads(&mut server).is_empty());
    }

    deliver(&server, wire).await;
    server.engine.process().await.unwrap();

    let payloads = drain_payloads(&mut server);
    assert_eq!(payloads.len(), 1);
    assert_eq!(&payloads[0][..], &payload[..]);
}

#[tokio::test]
async fn test_payload_at_threshold_is_a_single_fragment() {
    let config = RudpConfig::new().max_payload(40);
    let (mut client, mut server) = pair(config);
    handshake(&mut client, &mut server).await;

    client.send_data(&[7u8; 39]).await;
    client.send_data(&[8u8; 40]).await;
    client.engine.flush().await.unwrap();

    let packets = decode_wire(&take_wire(&client));
    assert_eq!(packets.len(), 2);
    // Below the threshold: unfragmented. At the threshold: a
    // one-fragment message.
    assert_eq!(packets[0].qty, 0);
    assert_eq!(packets[1].qty, 1);
    assert_ne!(packets[0].id, packets[1].id);
}

#[tokio::test]
async fn test_dropped_ack_keeps_packet_unconfirmed() {
    let (mut client, mut server) = pair(RudpConfig::default());
    handshake(&mut client, &mut server).await;

    client.send_data(b"retained").await;
    client.engine.flush().await.unwrap();
    let wire = take_wire(&client);
    let dat_seq = decode_wire(&wire)[0].seq;
    deliver(&server, wire).await;
    server.engine.process().await.unwrap();

    // The server's acknowledgement is lost on the wire
    server.engine.flush().await.unwrap();
    take_wire(&server);

    assert!(client.engine.unconfirmed_seqs().await.contains(&dat_seq));

    // An acknowledgement listing unrelated sequences releases nothing
    let mut unrelated = Packet::control(PacketKind::Ack);
    unrelated.seq = 202;
    unrelated.ack = vec![9999];
    deliver_raw(&client, server.addr, &unrelated).await;
    client.engine.process().await.unwrap();
    assert!(client.engine.unconfirmed_seqs().await.contains(&dat_seq));

    // Only a packet whose ack array lists the seq releases it
    let mut release = Packet::control(PacketKind::Ack);
    release.seq = 203;
    release.ack = vec![dat_seq];
    deliver_raw(&client, server.addr, &release).await;
    client.engine.process().await.unwrap();
    assert!(!client.engine.unconfirmed_seqs().await.contains(&dat_seq));
}

#[tokio::test]
async fn test_out_of_order_within_one_tick() {
    let (mut client, mut server) = pair(RudpConfig::default());
    handshake(&mut client, &mut server).await;

    client.send_data(b"first").await;
    client.send_data(b"second").await;
    client.engine.flush().await.unwrap();

    let mut wire = take_wire(&client);
    wire.reverse();
    deliver(&server, wire).await;
    server.engine.process().await.unwrap();

    let payloads = drain_payloads(&mut server);
    assert_eq!(
        payloads,
        vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
    );
}

#[tokio::test]
async fn test_missing_predecessor_defers_delivery() {
    let (mut client, mut server) = pair(RudpConfig::default());
    handshake(&mut client, &mut server).await;

    client.send_data(b"first").await;
    client.send_data(b"second").await;
    client.engine.flush().await.unwrap();
    let mut wire = take_wire(&client);
    let first = wire.remove(0);

    // Only the successor arrives: it must wait for its predecessor
    deliver(&server, wire).await;
    server.engine.process().await.unwrap();
    assert!(drain_payloads(&mut server).is_empty());

    deliver(&server, vec![first]).await;
    server.engine.process().await.unwrap();
    let payloads = drain_payloads(&mut server);
    assert_eq!(
        payloads,
        vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
    );
}

#[tokio::test]
async fn test_unknown_peer_non_syn_is_ignored() {
    let mut server = node(Role::Server, "127.0.0.1:5000", None, RudpConfig::default());
    let stranger: std::net::SocketAddr = "127.0.0.1:4999".parse().unwrap();

    let mut packet = Packet::dat(Bytes::from_static(b"sneaky"));
    packet.seq = 100;
    server
        .engine
        .handle_datagram(stranger, packet.encode().unwrap())
        .await;
    server.engine.process().await.unwrap();

    assert!(drain_events(&mut server).is_empty());
    assert!(!server.engine.sequence_known(stranger).await);

    // Not even an acknowledgement goes back
    server.engine.flush().await.unwrap();
    assert!(take_wire(&server).is_empty());
}

#[tokio::test]
async fn test_sequence_limit_triggers_reset() {
    let config = RudpConfig::new().sequence_limit(102);
    let (mut client, mut server) = pair(config);
    handshake(&mut client, &mut server).await;

    // Client seqs 102 and 103; the latter crosses the limit
    client.send_data(b"a").await;
    client.send_data(b"b").await;
    client.engine.flush().await.unwrap();
    transfer(&client, &server).await;
    server.engine.process().await.unwrap();
    assert_eq!(drain_payloads(&mut server).len(), 2);

    // The next outbound to that peer carries the reset flag and the
    // sequence record is dropped with it
    server.engine.flush().await.unwrap();
    let wire = take_wire(&server);
    let packets = decode_wire(&wire);
    assert_eq!(packets.len(), 1);
    assert!(packets[0].flags.contains(PacketFlags::RST));
    assert!(!server.engine.sequence_known(client.addr).await);

    // The client accepts the flagged packet and aborts the rest
    deliver(&client, wire).await;
    client.engine.process().await.unwrap();
}

#[tokio::test]
async fn test_client_reset_replays_unconfirmed() {
    let (mut client, mut server) = pair(RudpConfig::default());
    handshake(&mut client, &mut server).await;

    client.send_data(b"lost-1").await;
    client.send_data(b"lost-2").await;
    client.engine.flush().await.unwrap();
    // Both data packets vanish on the wire
    take_wire(&client);
    let before_reset = client.engine.unconfirmed_seqs().await;
    assert_eq!(before_reset.len(), 3); // handshake ACK + two DATs

    // The server resets the client
    server
        .engine
        .request_connection_reset(client.addr)
        .await
        .unwrap();
    server.engine.flush().await.unwrap();
    let events = drain_events(&mut server);
    assert!(events
        .iter()
        .any(|e| matches!(e, RudpEvent::ClientDisconnected(addr) if *addr == client.addr)));
    assert!(server.engine.clients().await.is_empty());
    assert!(!server.engine.sequence_known(client.addr).await);

    // The RST datagram only latches the flag; recovery runs afterwards
    transfer(&server, &client).await;
    client.engine.recover_from_reset().await;
    assert_eq!(client.engine.state().await, ConnectionState::Opening);

    client.engine.flush().await.unwrap();
    let packets = decode_wire(&take_wire(&client));
    // A fresh SYN leads, then every unconfirmed packet is replayed on
    // fresh sequences
    assert_eq!(packets[0].kind, PacketKind::Syn);
    assert_eq!(packets[0].seq, 100);
    assert_eq!(packets.len(), 1 + before_reset.len());
    let replayed: Vec<_> = packets
        .iter()
        .filter(|p| p.kind == PacketKind::Dat)
        .collect();
    assert_eq!(replayed.len(), 2);
    assert_eq!(&replayed[0].data[..], b"lost-1");
    assert_eq!(&replayed[1].data[..], b"lost-2");

    assert_eq!(client.engine.stats().retransmissions, 3);
}

#[tokio::test]
async fn test_keep_alive_is_not_acknowledged() {
    let (mut client, mut server) = pair(RudpConfig::default());
    handshake(&mut client, &mut server).await;

    server.engine.send_keep_alive().await.unwrap();
    server.engine.flush().await.unwrap();

    let wire = take_wire(&server);
    let packets = decode_wire(&wire);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind, PacketKind::Nul);

    deliver(&client, wire).await;
    client.engine.process().await.unwrap();

    // A NUL-only group produces no acknowledgement packet
    client.engine.flush().await.unwrap();
    assert!(take_wire(&client).is_empty());
}

#[tokio::test]
async fn test_pending_reset_skips_inbound_groups() {
    let config = RudpConfig::new().sequence_limit(101);
    let (mut client, mut server) = pair(config);
    handshake(&mut client, &mut server).await;

    // Seq 102 crosses the limit of 101 during the handshake's final ack
    client.send_data(b"over").await;
    client.engine.flush().await.unwrap();
    transfer(&client, &server).await;
    server.engine.process().await.unwrap();
    drain_payloads(&mut server);

    // While the reset is pending, further groups from the peer are
    // ignored entirely
    client.send_data(b"ignored").await;
    client.engine.flush().await.unwrap();
    transfer(&client, &server).await;
    server.engine.process().await.unwrap();
    assert!(drain_payloads(&mut server).is_empty());
}

/// Encode `packet` and hand it to `to` as if `src` had sent it.
async fn deliver_raw(to: &Node, src: std::net::SocketAddr, packet: &Packet) {
    to.engine
        .handle_datagram(src, packet.encode().unwrap())
        .await;
}
