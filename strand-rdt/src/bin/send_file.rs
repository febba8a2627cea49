//! CLI front-end for [`strand_rdt::Sender`]: reads a file, frames it with
//! [`strand_rdt::transfer::encode_file`], and sends it reliably to a server.
//!
//! Mirrors the reference `FileClient`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::Parser;
use tokio::net::UdpSocket;

use strand_rdt::config::{DEFAULT_MAX_PACKET_SIZE, DEFAULT_TIMEOUT, DEFAULT_WINDOW_SIZE};
use strand_rdt::transfer::encode_file;
use strand_rdt::Sender;

#[derive(Parser, Debug)]
#[command(about = "Send a file reliably over an unreliable datagram channel")]
struct Args {
    /// Path to the file to send.
    #[arg(long)]
    file: PathBuf,

    /// Server host to connect to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port (or a simulated link's client-facing port).
    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// Maximum unacknowledged packets in flight.
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window_size: u16,

    /// Per-packet retransmission timeout, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs_f64())]
    timeout: f64,

    /// Maximum payload bytes per packet.
    #[arg(long, default_value_t = DEFAULT_MAX_PACKET_SIZE)]
    max_packet_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let filename = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file.bin")
        .to_string();
    let content = Bytes::from(tokio::fs::read(&args.file).await?);
    tracing::info!(file = %args.file.display(), bytes = content.len(), "read file");

    let data = encode_file(&filename, &content)?;

    let dest: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
    tracing::info!(%dest, "connecting");

    let sender = Sender::new(
        socket,
        dest,
        args.window_size,
        Duration::from_secs_f64(args.timeout),
        args.max_packet_size,
    )?;
    sender.start();

    let started = Instant::now();
    sender.send_data(data.clone()).await?;
    let elapsed = started.elapsed();

    let stats = sender.stop().await;
    let throughput = if elapsed.as_secs_f64() > 0.0 {
        data.len() as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    tracing::info!(
        elapsed_secs = elapsed.as_secs_f64(),
        throughput_bytes_per_sec = throughput,
        packets_sent = stats.packets_sent,
        retransmissions = stats.retransmissions,
        acks_received = stats.acks_received,
        "file sent"
    );

    Ok(())
}
