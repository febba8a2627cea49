//! Receiver: in-order reassembly across out-of-order arrivals and cumulative
//! ACK emission.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ReceiverConfig;
use crate::error::Result;
use crate::packet::Packet;
use crate::stats::ReceiverStats;

/// Socket read timeout for the datagram worker, so it can observe `running`.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);
/// How often `receive_all_data` samples for activity.
const ACTIVITY_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
/// Datagram receive buffer size; comfortably above header + MSS.
const RECV_BUF_SIZE: usize = 65536;
/// Bound on `out_of_order`, expressed as a multiple of the window size.
/// Caps memory growth from a sender that skips low sequence numbers for a
/// long stretch, or a peer replaying stale high sequence numbers.
const OUT_OF_ORDER_CAP_FACTOR: usize = 4;

struct ReceiverInner {
    /// Next in-order sequence number awaiting delivery.
    expected: u32,
    /// seq -> payload, for seq >= expected not yet contiguous with `expected`.
    out_of_order: BTreeMap<u32, Bytes>,
    stats: ReceiverStats,
}

/// Reliable receiver half of the RDT engine.
///
/// One-shot: `start()` -> `receive_all_data()` / `try_receive_chunk()` ->
/// `stop()`. The underlying socket is externally owned.
pub struct Receiver {
    socket: Arc<UdpSocket>,
    config: ReceiverConfig,
    inner: Arc<Mutex<ReceiverInner>>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    delivery_tx: mpsc::UnboundedSender<Bytes>,
    delivery_rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl Receiver {
    /// Create a new receiver reading from `socket`.
    pub fn new(socket: Arc<UdpSocket>, window_size: u16) -> Result<Self> {
        let config = ReceiverConfig::new(window_size)?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            socket,
            config,
            inner: Arc::new(Mutex::new(ReceiverInner {
                expected: 0,
                out_of_order: BTreeMap::new(),
                stats: ReceiverStats::default(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            delivery_tx: tx,
            delivery_rx: Mutex::new(rx),
        })
    }

    /// Spawn the datagram worker task.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(Self::recv_loop(
            self.socket.clone(),
            self.inner.clone(),
            self.running.clone(),
            self.delivery_tx.clone(),
            self.config.window_size,
        ));
        *self.task.lock() = Some(handle);

        tracing::debug!("receiver started");
    }

    /// Pop one delivered chunk without blocking, or `None` if none is queued.
    pub fn try_receive_chunk(&self) -> Option<Bytes> {
        self.delivery_rx.lock().try_recv().ok()
    }

    /// Concatenate all delivered payloads, returning once `timeout` has
    /// elapsed since the last sign of activity (a delivered chunk, or the
    /// `packets_received` counter advancing). There is no wire "end of
    /// stream" marker, so this wall-clock inactivity window is the only
    /// completion signal available.
    pub async fn receive_all_data(&self, timeout: Duration) -> Bytes {
        let mut all = BytesMut::new();
        let mut last_activity = Instant::now();
        let mut last_seen_packets_received = { self.inner.lock().stats.packets_received };

        loop {
            let mut progressed = false;
            while let Some(chunk) = self.try_receive_chunk() {
                all.extend_from_slice(&chunk);
                progressed = true;
            }

            let current_packets_received = { self.inner.lock().stats.packets_received };
            if current_packets_received != last_seen_packets_received {
                last_seen_packets_received = current_packets_received;
                progressed = true;
            }

            if progressed {
                last_activity = Instant::now();
            } else if last_activity.elapsed() >= timeout {
                tracing::debug!(bytes = all.len(), "receive_all_data: inactivity timeout reached");
                break;
            }

            tokio::time::sleep(ACTIVITY_SAMPLE_INTERVAL).await;
        }

        all.freeze()
    }

    async fn recv_loop(
        socket: Arc<UdpSocket>,
        inner: Arc<Mutex<ReceiverInner>>,
        running: Arc<AtomicBool>,
        delivery_tx: mpsc::UnboundedSender<Bytes>,
        window_size: u16,
    ) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        while running.load(Ordering::SeqCst) {
            let recv = tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await;
            let (n, from) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "socket error receiving datagram");
                    }
                    continue;
                }
                Err(_) => continue, // read timeout, re-check `running`
            };

            let Some(packet) = Packet::decode(&buf[..n]) else {
                tracing::debug!("discarding malformed datagram");
                continue;
            };
            if !packet.is_data() {
                continue;
            }
            if packet.is_corrupt() {
                tracing::debug!(seq = packet.seq_num, "discarding corrupted datagram");
                continue;
            }

            Self::handle_data_packet(
                &socket,
                &inner,
                &delivery_tx,
                packet,
                from,
                window_size,
            )
            .await;
        }
    }

    async fn handle_data_packet(
        socket: &UdpSocket,
        inner: &Mutex<ReceiverInner>,
        delivery_tx: &mpsc::UnboundedSender<Bytes>,
        packet: Packet,
        from: SocketAddr,
        window_size: u16,
    ) {
        let seq = packet.seq_num;
        let ack_to_send: Option<u32>;

        {
            let mut guard = inner.lock();
            guard.stats.packets_received += 1;

            if seq < guard.expected {
                // Already delivered: count and re-ACK so the sender can
                // recover from a lost ACK. `expected` > 0 is guaranteed
                // here (a seq below 0 cannot exist), so this never emits
                // the ambiguous "ack_num = 0 before anything arrived" ACK.
                guard.stats.duplicates_received += 1;
                ack_to_send = Some(guard.expected - 1);
                tracing::debug!(seq, expected = guard.expected, "duplicate packet");
            } else {
                let cap = OUT_OF_ORDER_CAP_FACTOR * window_size as usize;
                if guard.out_of_order.contains_key(&seq) || guard.out_of_order.len() < cap {
                    guard.out_of_order.entry(seq).or_insert_with(|| packet.data.clone());
                } else {
                    tracing::debug!(seq, cap, "out-of-order buffer full, dropping insertion");
                }

                while let Some(data) = guard.out_of_order.remove(&guard.expected) {
                    let _ = delivery_tx.send(data);
                    guard.expected += 1;
                }

                // Never acknowledge before at least one valid DATA packet
                // has actually been delivered (expected still 0 means seq 0
                // has not arrived yet) -- otherwise ack_num = 0 would read
                // to the sender as "seq 0 acknowledged" before it was.
                ack_to_send = if guard.expected > 0 {
                    Some(guard.expected - 1)
                } else {
                    None
                };
            }
        }

        if let Some(ack_num) = ack_to_send {
            let ack = Packet::ack(ack_num, window_size);
            let encoded = ack.encode();
            match socket.send_to(&encoded, from).await {
                Ok(_) => {
                    inner.lock().stats.acks_sent += 1;
                    tracing::debug!(ack = ack_num, %from, "sent ACK");
                }
                Err(e) => {
                    tracing::warn!(ack = ack_num, error = %e, "socket error sending ACK");
                }
            }
        }
    }

    /// Halt the datagram worker, join it, and return final statistics.
    pub async fn stop(&self) -> ReceiverStats {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.task.lock().take() {
            let _ = handle.await;
        }

        let stats = self.inner.lock().stats;
        tracing::debug!(?stats, "receiver stopped");
        stats
    }
}
