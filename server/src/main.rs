use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Hexfall turn-based strategy server")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "7777")]
    port: u16,

    /// Maximum number of concurrent sessions
    #[arg(short = 'c', long, default_value = "16")]
    max_clients: usize,

    /// Directory holding `<name>.map` scenarios
    #[arg(long, default_value = "maps")]
    maps_dir: PathBuf,

    /// Scenario to load at startup
    #[arg(short, long, default_value = "default")]
    map: String,

    /// Seed for match randomness (entropy when omitted)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Milliseconds between hazard steps
    #[arg(long, default_value = "1000")]
    hazard_interval_ms: u64,

    /// Never end matches automatically
    #[arg(long)]
    sandbox: bool,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            max_clients: args.max_clients,
            maps_dir: args.maps_dir,
            map_name: args.map,
            seed: args.seed,
            hazard_interval: Duration::from_millis(args.hazard_interval_ms),
            game_over_checks: !args.sandbox,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig::from(args);
    info!("Starting server on {}", config.bind_addr());

    let server = Server::new(config).await?;
    let shutdown = server.shutdown_handle();
    let mut server_task = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
            if let Err(e) = server_task.await {
                error!("Server task panicked: {}", e);
            }
        }
    }

    Ok(())
}
