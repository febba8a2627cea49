//! CLI front-end for [`strand_rdt::Receiver`]: accepts one reliably-sent
//! file transfer, unframes it with [`strand_rdt::transfer::decode_file`],
//! and writes it to `--save-dir`.
//!
//! Mirrors the reference `FileServer`, minus its `while True` multi-transfer
//! loop -- one process handles one transfer, matching this engine's
//! one-shot `start()`/`stop()` lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UdpSocket;

use strand_rdt::config::DEFAULT_WINDOW_SIZE;
use strand_rdt::transfer::decode_file;
use strand_rdt::Receiver;

#[derive(Parser, Debug)]
#[command(about = "Receive one file reliably over an unreliable datagram channel")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9999)]
    port: u16,

    /// Directory to save the received file into.
    #[arg(long, default_value = "files/received")]
    save_dir: PathBuf,

    /// Advertised window size, carried in outgoing ACKs.
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window_size: u16,

    /// Inactivity timeout before the transfer is declared complete, in seconds.
    #[arg(long, default_value_t = 30.0)]
    timeout: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    tokio::fs::create_dir_all(&args.save_dir).await?;

    let socket = Arc::new(UdpSocket::bind(("0.0.0.0", args.port)).await?);
    tracing::info!(port = args.port, save_dir = %args.save_dir.display(), "listening");

    let receiver = Receiver::new(socket, args.window_size)?;
    receiver.start();

    let data = receiver
        .receive_all_data(Duration::from_secs_f64(args.timeout))
        .await;
    let stats = receiver.stop().await;

    if data.is_empty() {
        tracing::warn!("no data received before timeout");
        return Ok(());
    }

    let (filename, content) = decode_file(&data)?;
    let path = args.save_dir.join(&filename);
    tokio::fs::write(&path, &content).await?;

    tracing::info!(
        path = %path.display(),
        bytes = content.len(),
        packets_received = stats.packets_received,
        acks_sent = stats.acks_sent,
        duplicates_received = stats.duplicates_received,
        "file received and saved"
    );

    Ok(())
}
