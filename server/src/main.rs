use clap::{Parser, ValueEnum};
use log::info;
use server::broker::Broker;
use server::network::Server;
use shared::{MatchConfig, MAX_ROOM_SIZE};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Centralized matchmaking and round authority
    Arbiter,
    /// Topic relay for peer-to-peer clients
    Broker,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which server role to run
    #[arg(short, long, value_enum, default_value = "arbiter")]
    mode: Mode,

    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum players per room
    #[arg(short, long, default_value = "4")]
    capacity: usize,

    /// Minimum players before the grace window starts
    #[arg(long, default_value = "2")]
    min_players: usize,

    /// Grace window in milliseconds
    #[arg(long, default_value = "3000")]
    grace_ms: u64,

    /// Interval between countdown steps in milliseconds
    #[arg(long, default_value = "1000")]
    countdown_ms: u64,

    /// Seconds of silence before a client counts as disconnected
    #[arg(short, long, default_value = "5")]
    timeout_secs: u64,

    /// Maximum simultaneous endpoints
    #[arg(long, default_value = "256")]
    max_clients: usize,
}

impl Args {
    fn match_config(&self) -> MatchConfig {
        MatchConfig {
            capacity: self.capacity.clamp(1, MAX_ROOM_SIZE),
            min_players: self.min_players,
            grace_window: Duration::from_millis(self.grace_ms),
            countdown_interval: Duration::from_millis(self.countdown_ms),
            client_timeout: Duration::from_secs(self.timeout_secs),
            ..MatchConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = args.match_config();
    let addr = format!("{}:{}", args.host, args.port);

    match args.mode {
        Mode::Arbiter => {
            info!(
                "Starting arbiter: rooms of {}..={}, grace {:?}",
                config.min_players, config.capacity, config.grace_window
            );
            let mut server = Server::new(&addr, config, args.max_clients).await?;
            server.run().await?;
        }
        Mode::Broker => {
            info!("Starting broker, peer timeout {:?}", config.client_timeout);
            let mut broker = Broker::new(
                &addr,
                config.client_timeout,
                config.heartbeat_interval,
                args.max_clients,
            )
            .await?;
            broker.run().await?;
        }
    }

    Ok(())
}
