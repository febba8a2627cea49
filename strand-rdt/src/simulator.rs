//! A lossy-link middlebox for exercising the sender/receiver pair under
//! realistic network impairments, instead of trusting loopback alone.
//!
//! Grounded in the reference `NetworkConnector`: two forwarding directions
//! (client->server, server->client) plus a shared delay/reorder buffer
//! drained on a timer. Impairments are applied independently per direction.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Datagram receive buffer size for the relay loops.
const RECV_BUF_SIZE: usize = 65536;
/// How often the delay/reorder buffer is drained.
const REORDER_DRAIN_INTERVAL: Duration = Duration::from_millis(50);
/// Socket read timeout, so relay loops can observe `running`.
const RELAY_RECV_TIMEOUT: Duration = Duration::from_millis(500);
/// Extra delay range added on top of a packet's base delay when the
/// reorder roll succeeds, so it has a real chance of overtaking packets
/// already in flight.
const REORDER_EXTRA_DELAY: (f64, f64) = (0.5, 1.5);

/// Probabilities and delay bounds for one [`SimulatedLink`].
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    /// Probability in `[0.0, 1.0]` that a datagram is dropped outright.
    pub loss_rate: f64,
    /// Probability in `[0.0, 1.0]` that a forwarded datagram is corrupted.
    pub corruption_rate: f64,
    /// Uniform delay range applied to every datagram that isn't dropped.
    pub delay_range: (Duration, Duration),
    /// Probability in `[0.0, 1.0]` that a datagram is additionally held
    /// back to increase its odds of arriving out of order.
    pub reorder_rate: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corruption_rate: 0.0,
            delay_range: (Duration::ZERO, Duration::ZERO),
            reorder_rate: 0.0,
        }
    }
}

/// Counters describing what a [`SimulatedLink`] did to the traffic crossing it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub packets_received: u64,
    pub packets_forwarded: u64,
    pub packets_dropped: u64,
    pub packets_corrupted: u64,
    pub packets_delayed: u64,
    pub packets_reordered: u64,
}

struct PendingPacket {
    deliver_at: Instant,
    data: Vec<u8>,
    dest: SocketAddr,
    via: Arc<UdpSocket>,
}

/// A UDP relay that sits between a client and a server socket and
/// probabilistically drops, corrupts, delays, and reorders the datagrams
/// passing through it in both directions.
pub struct SimulatedLink {
    client_socket: Arc<UdpSocket>,
    server_socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    config: LinkConfig,
    stats: Arc<Mutex<LinkStats>>,
    client_addr: Arc<Mutex<Option<SocketAddr>>>,
    reorder_buffer: Arc<Mutex<Vec<PendingPacket>>>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedLink {
    /// Create a new link. `client_socket` receives from the client and is
    /// also used to relay server->client traffic once a client address has
    /// been observed; `server_socket` is used to reach `server_addr`.
    pub fn new(
        client_socket: Arc<UdpSocket>,
        server_socket: Arc<UdpSocket>,
        server_addr: SocketAddr,
        config: LinkConfig,
    ) -> Self {
        Self {
            client_socket,
            server_socket,
            server_addr,
            config,
            stats: Arc::new(Mutex::new(LinkStats::default())),
            client_addr: Arc::new(Mutex::new(None)),
            reorder_buffer: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the two relay loops and the reorder-buffer drain loop.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);

        let c2s = tokio::spawn(Self::relay_client_to_server(
            self.client_socket.clone(),
            self.server_socket.clone(),
            self.server_addr,
            self.client_addr.clone(),
            self.config,
            self.stats.clone(),
            self.reorder_buffer.clone(),
            self.running.clone(),
        ));
        let s2c = tokio::spawn(Self::relay_server_to_client(
            self.server_socket.clone(),
            self.client_socket.clone(),
            self.client_addr.clone(),
            self.config,
            self.stats.clone(),
            self.reorder_buffer.clone(),
            self.running.clone(),
        ));
        let drain = tokio::spawn(Self::drain_reorder_buffer(
            self.reorder_buffer.clone(),
            self.stats.clone(),
            self.running.clone(),
        ));

        let mut tasks = self.tasks.lock();
        tasks.push(c2s);
        tasks.push(s2c);
        tasks.push(drain);

        tracing::debug!(server = %self.server_addr, "simulated link started");
    }

    async fn relay_client_to_server(
        client_socket: Arc<UdpSocket>,
        server_socket: Arc<UdpSocket>,
        server_addr: SocketAddr,
        client_addr: Arc<Mutex<Option<SocketAddr>>>,
        config: LinkConfig,
        stats: Arc<Mutex<LinkStats>>,
        reorder_buffer: Arc<Mutex<Vec<PendingPacket>>>,
        running: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        while running.load(Ordering::SeqCst) {
            let recv = tokio::time::timeout(RELAY_RECV_TIMEOUT, client_socket.recv_from(&mut buf)).await;
            let (n, from) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "simulated link: client->server recv error");
                    }
                    continue;
                }
                Err(_) => continue,
            };
            *client_addr.lock() = Some(from);
            stats.lock().packets_received += 1;

            Self::process_datagram(
                buf[..n].to_vec(),
                server_addr,
                server_socket.clone(),
                &config,
                &stats,
                &reorder_buffer,
            );
        }
    }

    async fn relay_server_to_client(
        server_socket: Arc<UdpSocket>,
        client_socket: Arc<UdpSocket>,
        client_addr: Arc<Mutex<Option<SocketAddr>>>,
        config: LinkConfig,
        stats: Arc<Mutex<LinkStats>>,
        reorder_buffer: Arc<Mutex<Vec<PendingPacket>>>,
        running: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        while running.load(Ordering::SeqCst) {
            let recv = tokio::time::timeout(RELAY_RECV_TIMEOUT, server_socket.recv_from(&mut buf)).await;
            let (n, _from) = match recv {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "simulated link: server->client recv error");
                    }
                    continue;
                }
                Err(_) => continue,
            };
            stats.lock().packets_received += 1;

            let Some(dest) = *client_addr.lock() else {
                tracing::debug!("simulated link: no client address observed yet, dropping");
                continue;
            };

            Self::process_datagram(
                buf[..n].to_vec(),
                dest,
                client_socket.clone(),
                &config,
                &stats,
                &reorder_buffer,
            );
        }
    }

    /// Apply loss, then corruption, then decide whether to delay/reorder
    /// or forward immediately.
    fn process_datagram(
        mut data: Vec<u8>,
        dest: SocketAddr,
        via: Arc<UdpSocket>,
        config: &LinkConfig,
        stats: &Arc<Mutex<LinkStats>>,
        reorder_buffer: &Mutex<Vec<PendingPacket>>,
    ) {
        let mut rng = rand::rng();

        if rng.random_bool(config.loss_rate.clamp(0.0, 1.0)) {
            stats.lock().packets_dropped += 1;
            return;
        }

        if rng.random_bool(config.corruption_rate.clamp(0.0, 1.0)) {
            Self::corrupt(&mut data, &mut rng);
            stats.lock().packets_corrupted += 1;
        }

        let base_max = config.delay_range.1;
        let will_reorder = rng.random_bool(config.reorder_rate.clamp(0.0, 1.0));
        if will_reorder || base_max > Duration::ZERO {
            let min = config.delay_range.0.as_secs_f64();
            let max = config.delay_range.1.as_secs_f64().max(min);
            let mut delay = if max > min {
                rng.random_range(min..=max)
            } else {
                min
            };

            if will_reorder {
                delay += rng.random_range(REORDER_EXTRA_DELAY.0..=REORDER_EXTRA_DELAY.1);
                stats.lock().packets_reordered += 1;
            }
            if delay > 0.0 {
                stats.lock().packets_delayed += 1;
            }

            reorder_buffer.lock().push(PendingPacket {
                deliver_at: Instant::now() + Duration::from_secs_f64(delay),
                data,
                dest,
                via,
            });
        } else {
            Self::spawn_send(via, data, dest, stats);
        }
    }

    fn corrupt(data: &mut [u8], rng: &mut impl Rng) {
        if data.is_empty() {
            return;
        }
        let count = rng.random_range(1..=3.min(data.len()));
        for _ in 0..count {
            let pos = rng.random_range(0..data.len());
            let bit = rng.random_range(1u8..=255);
            data[pos] ^= bit;
        }
    }

    async fn drain_reorder_buffer(
        reorder_buffer: Arc<Mutex<Vec<PendingPacket>>>,
        stats: Arc<Mutex<LinkStats>>,
        running: Arc<AtomicBool>,
    ) {
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(REORDER_DRAIN_INTERVAL).await;

            let now = Instant::now();
            let ready: Vec<PendingPacket> = {
                let mut buffer = reorder_buffer.lock();
                let (ready, pending): (Vec<_>, Vec<_>) =
                    buffer.drain(..).partition(|p| p.deliver_at <= now);
                *buffer = pending;
                ready
            };

            for packet in ready {
                Self::spawn_send(packet.via, packet.data, packet.dest, &stats);
            }
        }
    }

    fn spawn_send(via: Arc<UdpSocket>, data: Vec<u8>, dest: SocketAddr, stats: &Arc<Mutex<LinkStats>>) {
        let stats = stats.clone();
        tokio::spawn(async move {
            match via.send_to(&data, dest).await {
                Ok(_) => stats.lock().packets_forwarded += 1,
                Err(e) => tracing::warn!(error = %e, "simulated link: forward error"),
            }
        });
    }

    /// Halt all relay tasks, join them, and return final statistics.
    pub async fn stop(&self) -> LinkStats {
        self.running.store(false, Ordering::SeqCst);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }

        let stats = *self.stats.lock();
        tracing::debug!(?stats, "simulated link stopped");
        stats
    }
}
