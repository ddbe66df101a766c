use clap::{Parser, ValueEnum};
use client::bus::UdpBus;
use client::events::{ClientEvent, ConnectionStatus};
use client::handle::SessionHandle;
use client::network::ArbiterClient;
use client::peer::PeerClient;
use log::{info, warn};
use rand::Rng;
use shared::MatchConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{interval, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Topology {
    /// Join through the central arbiter
    Arbiter,
    /// Coordinate with other peers through a broker
    Peer,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which coordination topology to use
    #[arg(short, long, value_enum, default_value = "arbiter")]
    topology: Topology,

    /// Arbiter or broker address
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Display name
    #[arg(short, long, default_value = "")]
    name: String,

    /// Rounds to play before leaving
    #[arg(short, long, default_value = "3")]
    rounds: u32,

    /// Upper bound of the random time the bot survives each round
    #[arg(long, default_value = "8000")]
    max_life_ms: u64,
}

const REPORT_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = MatchConfig::default();

    info!("Starting {:?} bot against {}", args.topology, args.server);
    let session = match args.topology {
        Topology::Arbiter => ArbiterClient::start(args.server, config).await?,
        Topology::Peer => {
            let (bus, deliveries) = UdpBus::connect(args.server, config.heartbeat_interval).await?;
            PeerClient::start(bus, deliveries, config)
        }
    };

    play(session, &args).await
}

/// Headless stand-in for a player: flies until a random crash, then readies.
async fn play(mut session: SessionHandle, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    session.request_join(&args.name)?;

    let mut report = interval(REPORT_INTERVAL);
    let mut started: Option<Instant> = None;
    let mut death_at = Instant::now();
    let mut rounds_played = 0;

    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else {
                    break;
                };
                info!("{:?}", event);
                match event {
                    ClientEvent::RoundStarted => {
                        let life = rand::thread_rng().gen_range(500..=args.max_life_ms.max(500));
                        started = Some(Instant::now());
                        death_at = Instant::now() + Duration::from_millis(life);
                    }
                    ClientEvent::RoundOver(medal) => {
                        started = None;
                        rounds_played += 1;
                        info!("Round {} over, medal {:?}", rounds_played, medal);
                        if rounds_played >= args.rounds {
                            break;
                        }
                        session.request_ready_restart()?;
                    }
                    ClientEvent::ConnectionStatus(ConnectionStatus::Rejected(reason)) => {
                        warn!("Rejected: {}", reason);
                        break;
                    }
                    ClientEvent::ConnectionStatus(ConnectionStatus::Disconnected) => break,
                    _ => {}
                }
            },

            _ = report.tick() => {
                let Some(since) = started else {
                    continue;
                };
                if Instant::now() >= death_at {
                    started = None;
                    session.report_self_died()?;
                    continue;
                }
                let score = since.elapsed().as_secs() as u32;
                let y = rand::thread_rng().gen_range(0.0..600.0);
                let velocity = rand::thread_rng().gen_range(-8.0..8.0);
                session.report_self_state(y, velocity, score)?;
            },
        }
    }

    session.leave().await?;
    info!("Bot finished after {} round(s)", rounds_played);
    Ok(())
}
