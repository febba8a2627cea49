//! End-to-end sender/receiver scenarios over real loopback sockets:
//! clean-channel delivery, loss-triggered retransmission, reordering,
//! corruption, duplication, and a combined lossy-link transfer, plus a
//! couple of the protocol's own safety properties (window bound, no
//! duplicate delivery).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::net::UdpSocket;

use strand_rdt::simulator::LinkConfig;
use strand_rdt::{Packet, Receiver, Sender, SimulatedLink};

async fn bound_socket() -> Arc<UdpSocket> {
    Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
}

/// Run a plain sender -> receiver transfer with no impairment and return
/// what the receiver reassembled.
async fn run_clean_transfer(payload: Bytes, window_size: u16, max_packet_size: usize) -> Bytes {
    let server_socket = bound_socket().await;
    let server_addr = server_socket.local_addr().unwrap();
    let client_socket = bound_socket().await;

    let receiver = Receiver::new(server_socket, window_size).unwrap();
    receiver.start();

    let sender = Sender::new(
        client_socket,
        server_addr,
        window_size,
        Duration::from_millis(500),
        max_packet_size,
    )
    .unwrap();
    sender.start();

    sender.send_data(payload).await.unwrap();
    sender.stop().await;

    let received = receiver.receive_all_data(Duration::from_millis(500)).await;
    receiver.stop().await;
    received
}

#[tokio::test]
async fn clean_channel_small_payload() {
    let payload = Bytes::from_static(b"ABCDEFGHIJ");
    let received = run_clean_transfer(payload.clone(), 2, 4).await;
    assert_eq!(received, payload);
}

#[tokio::test]
async fn single_loss_triggers_retransmission() {
    let server_socket = bound_socket().await;
    let server_addr = server_socket.local_addr().unwrap();
    let link_client_side = bound_socket().await;
    let link_addr = link_client_side.local_addr().unwrap();
    let link_server_side = bound_socket().await;

    // Deterministic single-drop link: drop exactly the first forwarded
    // client->server packet by setting loss_rate to 1.0 only transiently
    // is awkward with the probabilistic simulator, so instead this test
    // uses the simulator's general loss handling at a moderate rate and
    // asserts on the *outcome* (at least one retransmission, correct data)
    // rather than pinning the exact dropped sequence number.
    let config = LinkConfig {
        loss_rate: 0.3,
        ..LinkConfig::default()
    };
    let link = SimulatedLink::new(link_client_side, link_server_side, server_addr, config);
    link.start();

    let receiver = Receiver::new(server_socket, 2).unwrap();
    receiver.start();

    let client_socket = bound_socket().await;
    let sender = Sender::new(client_socket, link_addr, 2, Duration::from_millis(300), 4).unwrap();
    sender.start();

    let payload = Bytes::from_static(b"ABCDEFGHIJ");
    sender.send_data(payload.clone()).await.unwrap();
    let sender_stats = sender.stop().await;

    let received = receiver.receive_all_data(Duration::from_millis(800)).await;
    receiver.stop().await;
    link.stop().await;

    assert_eq!(received, payload);
    assert!(sender_stats.retransmissions >= 1);
}

#[tokio::test]
async fn reordered_arrivals_reassemble_in_order() {
    let server_socket = bound_socket().await;
    let server_addr = server_socket.local_addr().unwrap();
    let probe_socket = bound_socket().await;

    let receiver = Receiver::new(server_socket, 3).unwrap();
    receiver.start();

    let p0 = Packet::data(0, 3, Bytes::from_static(b"ABCD"));
    let p1 = Packet::data(1, 3, Bytes::from_static(b"EFGH"));
    let p2 = Packet::data(2, 3, Bytes::from_static(b"IJ"));

    for p in [&p2, &p1, &p0] {
        probe_socket.send_to(&p.encode(), server_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let received = receiver.receive_all_data(Duration::from_millis(500)).await;
    let stats = receiver.stop().await;

    assert_eq!(received, Bytes::from_static(b"ABCDEFGHIJ"));
    assert_eq!(stats.duplicates_received, 0);
}

#[tokio::test]
async fn corrupted_first_packet_yields_no_premature_ack() {
    let server_socket = bound_socket().await;
    let server_addr = server_socket.local_addr().unwrap();
    let probe_socket = bound_socket().await;

    let receiver = Receiver::new(server_socket, 2).unwrap();
    receiver.start();

    let good = Packet::data(0, 2, Bytes::from_static(b"ABCD"));
    let mut encoded = good.encode().to_vec();
    encoded[0] ^= 0x01; // corrupt the header's seq_num byte
    probe_socket.send_to(&encoded, server_addr).await.unwrap();

    // Give the receiver a chance to process and (incorrectly) ACK.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut ack_buf = [0u8; 64];
    let result = tokio::time::timeout(Duration::from_millis(200), probe_socket.recv_from(&mut ack_buf)).await;
    assert!(result.is_err(), "receiver must not ACK a corrupted first packet");

    // Now deliver the real packet and confirm recovery.
    probe_socket
        .send_to(&good.encode(), server_addr)
        .await
        .unwrap();
    let received = receiver.receive_all_data(Duration::from_millis(300)).await;
    receiver.stop().await;
    assert_eq!(received, Bytes::from_static(b"ABCD"));
}

#[tokio::test]
async fn duplicate_seq_zero_counted_not_redelivered() {
    let server_socket = bound_socket().await;
    let server_addr = server_socket.local_addr().unwrap();
    let probe_socket = bound_socket().await;

    let receiver = Receiver::new(server_socket, 2).unwrap();
    receiver.start();

    let p0 = Packet::data(0, 2, Bytes::from_static(b"ABCD"));
    probe_socket.send_to(&p0.encode(), server_addr).await.unwrap();
    probe_socket.send_to(&p0.encode(), server_addr).await.unwrap();

    let received = receiver.receive_all_data(Duration::from_millis(300)).await;
    let stats = receiver.stop().await;

    assert_eq!(received, Bytes::from_static(b"ABCD"));
    assert_eq!(stats.duplicates_received, 1);
}

#[tokio::test]
async fn large_payload_through_impaired_link() {
    let mut rng = rand::rng();
    let payload: Vec<u8> = (0..100_000).map(|_| rng.random::<u8>()).collect();
    let payload = Bytes::from(payload);

    let server_socket = bound_socket().await;
    let server_addr = server_socket.local_addr().unwrap();
    let link_client_side = bound_socket().await;
    let link_addr = link_client_side.local_addr().unwrap();
    let link_server_side = bound_socket().await;

    let config = LinkConfig {
        loss_rate: 0.1,
        corruption_rate: 0.05,
        delay_range: (Duration::ZERO, Duration::from_millis(50)),
        reorder_rate: 0.1,
    };
    let link = SimulatedLink::new(link_client_side, link_server_side, server_addr, config);
    link.start();

    let receiver = Receiver::new(server_socket, 16).unwrap();
    receiver.start();

    let client_socket = bound_socket().await;
    let sender = Sender::new(client_socket, link_addr, 16, Duration::from_millis(300), 512).unwrap();
    sender.start();

    sender.send_data(payload.clone()).await.unwrap();
    sender.stop().await;

    let received = receiver
        .receive_all_data(Duration::from_secs(3))
        .await;
    receiver.stop().await;
    link.stop().await;

    assert_eq!(received, payload);
}

#[tokio::test]
async fn window_bound_never_exceeded() {
    // Use a deliberately tiny window against a destination that never ACKs
    // (nothing is listening on the port), and confirm the sender admits
    // exactly `window_size` packets into flight and then blocks, never more.
    let client_socket = bound_socket().await;
    let dest = "127.0.0.1:1".parse().unwrap(); // nothing listens here
    let window_size: u16 = 3;
    let sender = Sender::new(client_socket, dest, window_size, Duration::from_secs(10), 1).unwrap();
    sender.start();

    // 10 one-byte packets requested, but only `window_size` can ever be
    // admitted since no ACK will ever advance `base`.
    let payload = Bytes::from_static(b"0123456789");
    let send_fut = sender.send_data(payload);
    tokio::pin!(send_fut);

    tokio::select! {
        _ = &mut send_fut => panic!("send_data should block forever waiting for ACKs that never arrive"),
        _ = tokio::time::sleep(Duration::from_millis(300)) => {}
    }

    let stats = sender.stop().await;
    assert_eq!(
        stats.packets_sent, window_size as u64,
        "sender must admit exactly window_size packets in flight and no more"
    );
}

#[tokio::test]
async fn property_no_duplicate_delivery_under_heavy_duplicate_retransmission() {
    let server_socket = bound_socket().await;
    let server_addr = server_socket.local_addr().unwrap();
    let probe_socket = bound_socket().await;

    let receiver = Receiver::new(server_socket, 4).unwrap();
    receiver.start();

    let p0 = Packet::data(0, 4, Bytes::from_static(b"AB"));
    let p1 = Packet::data(1, 4, Bytes::from_static(b"CD"));

    // Flood duplicates of both packets in a scrambled order.
    for p in [&p0, &p1, &p0, &p0, &p1, &p1, &p0] {
        probe_socket.send_to(&p.encode(), server_addr).await.unwrap();
    }

    let received = receiver.receive_all_data(Duration::from_millis(300)).await;
    receiver.stop().await;

    assert_eq!(received, Bytes::from_static(b"ABCD"));
}
