//! CLI front-end for [`strand_rdt::SimulatedLink`]: an intermediary between
//! a client and a server that applies configurable loss, corruption, delay,
//! and reordering to the datagrams crossing it.
//!
//! Mirrors the reference `NetworkConnector`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UdpSocket;

use strand_rdt::simulator::LinkConfig;
use strand_rdt::SimulatedLink;

#[derive(Parser, Debug)]
#[command(about = "Simulate a lossy link between a client and a server")]
struct Args {
    /// Port to listen for client packets on.
    #[arg(long, default_value_t = 8888)]
    client_port: u16,

    /// Server port to forward packets to.
    #[arg(long, default_value_t = 9999)]
    server_port: u16,

    /// Server host to forward packets to.
    #[arg(long, default_value = "127.0.0.1")]
    server_host: String,

    /// Probability in 0.0..=1.0 that a packet is dropped.
    #[arg(long, default_value_t = 0.1)]
    loss: f64,

    /// Probability in 0.0..=1.0 that a packet is corrupted.
    #[arg(long, default_value_t = 0.05)]
    corrupt: f64,

    /// Minimum delay applied to every forwarded packet, in seconds.
    #[arg(long, default_value_t = 0.0)]
    delay_min: f64,

    /// Maximum delay applied to every forwarded packet, in seconds.
    #[arg(long, default_value_t = 0.5)]
    delay_max: f64,

    /// Probability in 0.0..=1.0 that a packet is additionally reordered.
    #[arg(long, default_value_t = 0.1)]
    reorder: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let server_addr: SocketAddr = format!("{}:{}", args.server_host, args.server_port).parse()?;
    let client_socket = Arc::new(UdpSocket::bind(("0.0.0.0", args.client_port)).await?);
    let server_socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);

    let config = LinkConfig {
        loss_rate: args.loss,
        corruption_rate: args.corrupt,
        delay_range: (
            Duration::from_secs_f64(args.delay_min),
            Duration::from_secs_f64(args.delay_max),
        ),
        reorder_rate: args.reorder,
    };

    tracing::info!(
        client_port = args.client_port,
        %server_addr,
        loss = args.loss,
        corrupt = args.corrupt,
        delay_min = args.delay_min,
        delay_max = args.delay_max,
        reorder = args.reorder,
        "starting simulated link"
    );

    let link = SimulatedLink::new(client_socket, server_socket, server_addr, config);
    link.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    let stats = link.stop().await;
    tracing::info!(?stats, "final statistics");

    Ok(())
}
