//! # Matchmaking Client Library
//!
//! This library is the member side of room coordination. A presentation
//! layer (renderer, input, sound) drives a session through a
//! [`handle::SessionHandle`] and renders whatever [`events::ClientEvent`]s
//! come back. The same handle works for both deployment topologies.
//!
//! ## Topologies
//!
//! ### Centralized
//! [`network::ArbiterClient`] talks to the server's arbiter over UDP. The
//! arbiter forms rooms, drives countdowns and decides restarts; the client
//! only reports its own state, death and readiness.
//!
//! ### Peer-to-Peer
//! [`peer::PeerClient`] runs the coordination protocol itself over a
//! publish/subscribe [`bus::Bus`]. Peers discover each other in a lobby,
//! elect a leader by smallest id to announce rooms, and mirror the room
//! state so that the lowest remaining player index can drive countdowns and
//! restarts. The bus can be in-process ([`bus::LocalBroker`]) or the
//! server's broker mode ([`bus::UdpBus`]).
//!
//! ## Module Organization
//!
//! ### Events Module (`events`)
//! Commands accepted from and events emitted to the presentation layer.
//!
//! ### Handle Module (`handle`)
//! The topology-independent session handle.
//!
//! ### Round Module (`round`)
//! Per-member round view:
//! - Own liveness and score
//! - Spectating while opponents still play
//! - Medal for the final score
//!
//! ### Network Module (`network`)
//! Arbiter session over UDP with heartbeats.
//!
//! ### Bus and Peer Modules (`bus`, `peer`)
//! Transports and the peer-to-peer session.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::events::ClientEvent;
//! use client::network::ArbiterClient;
//! use shared::MatchConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = "127.0.0.1:8080".parse()?;
//!     let mut session = ArbiterClient::start(server, MatchConfig::default()).await?;
//!     session.request_join("Robin")?;
//!
//!     while let Some(event) = session.next_event().await {
//!         match event {
//!             ClientEvent::RoundStarted => { /* start flying */ }
//!             ClientEvent::RoundOver(medal) => {
//!                 println!("medal: {:?}", medal);
//!                 session.request_ready_restart()?;
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod error;
pub mod events;
pub mod handle;
pub mod network;
pub mod peer;
pub mod round;

pub use error::ClientError;
pub use events::{ClientEvent, Command, ConnectionStatus};
pub use handle::SessionHandle;
