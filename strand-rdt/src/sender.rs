//! Sliding-window sender: segmentation, window admission, ACK ingest, and
//! timer-driven retransmission.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::config::SenderConfig;
use crate::error::Result;
use crate::packet::Packet;
use crate::stats::SenderStats;

/// Window-admission poll granularity: fine enough not to stall segmentation
/// noticeably, coarse enough not to spin.
const WINDOW_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Inter-packet pacing delay, to avoid bursty loss on loopback.
const PACING_DELAY: Duration = Duration::from_millis(10);
/// How often the timeout-scanner checks the send buffer.
const TIMEOUT_SCAN_INTERVAL: Duration = Duration::from_millis(100);
/// How often `send_data`'s final drain loop polls for `base >= next_seq`.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Socket read timeout for the ACK-ingest task, so it can observe `running`.
const ACK_RECV_TIMEOUT: Duration = Duration::from_millis(500);
/// Datagram receive buffer size; comfortably above header + MSS.
const RECV_BUF_SIZE: usize = 65536;

struct SenderInner {
    /// Lowest unacknowledged sequence number.
    base: u32,
    /// Next sequence number to assign.
    next_seq: u32,
    /// seq -> (serialized packet bytes, last-transmission instant).
    buffer: BTreeMap<u32, (Bytes, Instant)>,
    stats: SenderStats,
}

/// Reliable sender half of the RDT engine.
///
/// One-shot: `start()` -> any number of `send_data()` calls -> `stop()`. The
/// underlying socket is externally owned; the sender only uses it.
pub struct Sender {
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    config: SenderConfig,
    inner: Arc<Mutex<SenderInner>>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Sender {
    /// Create a new sender targeting `dest_addr` over `socket`.
    pub fn new(
        socket: Arc<UdpSocket>,
        dest_addr: SocketAddr,
        window_size: u16,
        timeout: Duration,
        max_packet_size: usize,
    ) -> Result<Self> {
        let config = SenderConfig::new(window_size, timeout, max_packet_size)?;
        Ok(Self::with_config(socket, dest_addr, config))
    }

    /// Create a new sender from an already-validated [`SenderConfig`].
    pub fn with_config(socket: Arc<UdpSocket>, dest_addr: SocketAddr, config: SenderConfig) -> Self {
        Self {
            socket,
            dest: dest_addr,
            config,
            inner: Arc::new(Mutex::new(SenderInner {
                base: 0,
                next_seq: 0,
                buffer: BTreeMap::new(),
                stats: SenderStats::default(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the ACK-ingester and timeout-scanner background tasks.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);

        let ack_task = tokio::spawn(Self::ack_ingest_loop(
            self.socket.clone(),
            self.inner.clone(),
            self.running.clone(),
        ));
        let timeout_task = tokio::spawn(Self::timeout_scan_loop(
            self.socket.clone(),
            self.dest,
            self.inner.clone(),
            self.running.clone(),
            self.config.timeout,
        ));

        let mut tasks = self.tasks.lock();
        tasks.push(ack_task);
        tasks.push(timeout_task);

        tracing::debug!(dest = %self.dest, "sender started");
    }

    /// Reliably send `data`, returning once every byte has been cumulatively
    /// acknowledged. May be called once per instance.
    pub async fn send_data(&self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            tracing::debug!("send_data called with empty payload, nothing to do");
            return Ok(());
        }

        let chunks: Vec<Bytes> = data
            .chunks(self.config.max_packet_size)
            .map(|c| Bytes::copy_from_slice(c))
            .collect();
        tracing::debug!(bytes = data.len(), packets = chunks.len(), "segmented payload");

        for chunk in chunks {
            let seq = self.admit_into_window().await;

            let packet = Packet::data(seq, self.config.window_size, chunk);
            let encoded = packet.encode();

            match self.socket.send_to(&encoded, self.dest).await {
                Ok(_) => {
                    tracing::debug!(seq, "sent data packet");
                    self.inner.lock().stats.packets_sent += 1;
                }
                Err(e) => {
                    tracing::warn!(seq, error = %e, "socket error sending data packet");
                }
            }

            // Buffered regardless of the send outcome: the timeout-scanner
            // will retry it either way, and a failed send still occupies a
            // window slot until acknowledged.
            self.inner.lock().buffer.insert(seq, (encoded, Instant::now()));

            tokio::time::sleep(PACING_DELAY).await;
        }

        tracing::debug!("waiting for all outstanding packets to be acknowledged");
        loop {
            let done = {
                let inner = self.inner.lock();
                inner.base >= inner.next_seq
            };
            if done {
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        tracing::debug!("all data acknowledged");
        Ok(())
    }

    /// Block until `next_seq < base + W`, then claim and return the admitted
    /// sequence number (incrementing `next_seq` under the same lock so a
    /// single-writer caller never races itself).
    async fn admit_into_window(&self) -> u32 {
        loop {
            {
                let mut inner = self.inner.lock();
                if inner.next_seq < inner.base + self.config.window_size as u32 {
                    let seq = inner.next_seq;
                    inner.next_seq += 1;
                    return seq;
                }
            }
            tokio::time::sleep(WINDOW_POLL_INTERVAL).await;
        }
    }

    async fn ack_ingest_loop(
        socket: Arc<UdpSocket>,
        inner: Arc<Mutex<SenderInner>>,
        running: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        while running.load(Ordering::SeqCst) {
            let recv = tokio::time::timeout(ACK_RECV_TIMEOUT, socket.recv_from(&mut buf)).await;
            let (n, _from) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "socket error receiving ACK");
                    }
                    continue;
                }
                Err(_) => continue, // read timeout, re-check `running`
            };

            let Some(packet) = Packet::decode(&buf[..n]) else {
                tracing::debug!("discarding malformed datagram on sender side");
                continue;
            };
            if !packet.is_ack() || packet.is_corrupt() {
                continue;
            }

            let a = packet.ack_num;
            let mut guard = inner.lock();
            guard.stats.acks_received += 1;
            if a >= guard.base {
                // Cumulative ACK: everything in [base, a] is now confirmed.
                let to_drop: Vec<u32> = guard
                    .buffer
                    .range(guard.base..=a)
                    .map(|(seq, _)| *seq)
                    .collect();
                for seq in to_drop {
                    guard.buffer.remove(&seq);
                }
                guard.base = a + 1;
                tracing::debug!(ack = a, base = guard.base, "window advanced");
            } else {
                tracing::debug!(ack = a, base = guard.base, "stale ACK ignored");
            }
        }
    }

    async fn timeout_scan_loop(
        socket: Arc<UdpSocket>,
        dest: SocketAddr,
        inner: Arc<Mutex<SenderInner>>,
        running: Arc<AtomicBool>,
        timeout: Duration,
    ) {
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(TIMEOUT_SCAN_INTERVAL).await;

            let now = Instant::now();
            let expired: Vec<(u32, Bytes)> = {
                let inner = inner.lock();
                inner
                    .buffer
                    .iter()
                    .filter(|(_, (_, ts))| now.duration_since(*ts) > timeout)
                    .map(|(seq, (bytes, _))| (*seq, bytes.clone()))
                    .collect()
            };

            if expired.is_empty() {
                continue;
            }

            for (seq, bytes) in expired {
                if let Err(e) = socket.send_to(&bytes, dest).await {
                    tracing::warn!(seq, error = %e, "socket error retransmitting packet");
                    continue;
                }
                tracing::debug!(seq, "retransmitted packet on timeout");

                let mut inner = inner.lock();
                // Only bump the timestamp/counter if still unacknowledged —
                // it may have been ACKed while we were sending.
                if let Some(entry) = inner.buffer.get_mut(&seq) {
                    entry.1 = Instant::now();
                    inner.stats.retransmissions += 1;
                }
            }
        }
    }

    /// Signal the background tasks to halt, join them, and return final
    /// statistics.
    pub async fn stop(&self) -> SenderStats {
        self.running.store(false, Ordering::SeqCst);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }

        let stats = self.inner.lock().stats;
        tracing::debug!(?stats, "sender stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_payload_sends_nothing() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let dest: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let sender = Sender::new(socket, dest, 5, Duration::from_secs(2), 1024).unwrap();
        sender.start();
        sender.send_data(Bytes::new()).await.unwrap();
        let stats = sender.stop().await;
        assert_eq!(stats.packets_sent, 0);
    }

    #[test]
    fn rejects_invalid_config() {
        // Constructing with a zero window should fail without needing a
        // runtime, since `new` validates synchronously.
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
            let dest: SocketAddr = "127.0.0.1:1".parse().unwrap();
            assert!(Sender::new(socket, dest, 0, Duration::from_secs(1), 1024).is_err());
        });
    }
}
