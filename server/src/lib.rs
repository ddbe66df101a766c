//! # Matchmaking Server Library
//!
//! This library provides both server-side halves of the room coordination
//! system. Depending on the topology the deployment uses, the binary runs
//! one of them.
//!
//! ## Centralized Topology: the Arbiter
//!
//! The arbiter is the single authority for matchmaking and round lifecycle.
//! Clients send it join requests, per-tick state reports, deaths and ready
//! signals; it decides when rooms form, drives every countdown, detects the
//! end of a round and restarts rooms once all members agree.
//!
//! ### Single-Threaded Event Loop
//! All coordination state lives in one [`coordinator::Coordinator`] owned by
//! the server loop. Network receive, network send and timeout detection run
//! as separate tasks and talk to the loop through channels, so handlers
//! never run concurrently and need no locks around room state.
//!
//! ### Timers
//! The grace window and per-room countdowns are spawned tasks that post
//! [`coordinator::TimerEvent`]s back into the loop. Their handles are stored
//! with the state they belong to and aborted when that state is dropped.
//! Stale firings that race with cancellation are filtered by epoch or
//! generation.
//!
//! ## Peer-to-Peer Topology: the Broker
//!
//! In the peer-to-peer topology the server only relays. [`broker::Broker`]
//! implements topic publish/subscribe with echo to the publisher and wills
//! released when a peer disconnects or times out. All matchmaking and round
//! decisions are taken by the peers themselves.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! - Endpoint tracking and capacity limits
//! - Binding of client ids to socket addresses
//! - Timeout detection
//!
//! ### Coordinator Module (`coordinator`)
//! - Waiting pool and grace window
//! - Room formation, countdown, liveness and restart
//!
//! ### Network Module (`network`)
//! - UDP socket management and packet (de)serialization
//! - The arbiter event loop
//!
//! ### Broker Module (`broker`)
//! - Topic routing, echo and wills
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::MatchConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", MatchConfig::default(), 256).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod client_manager;
pub mod coordinator;
pub mod network;
