//! The relay daemon.

use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;
use warbler::server::{Config, Server};

#[derive(Parser)]
#[command(name = "warbler-server", about = "UDP voice-and-text chat relay", version)]
struct Args {
    /// Bind address of the signalling socket.
    #[arg(long, default_value = "0.0.0.0:6000")]
    control: SocketAddr,

    /// Bind address of the voice socket.
    #[arg(long, default_value = "0.0.0.0:6001")]
    voice: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config {
        control_addr: args.control,
        voice_addr: args.voice,
        ..Config::default()
    };

    let server = Server::bind(config).await?;
    server.run().await?;
    Ok(())
}
