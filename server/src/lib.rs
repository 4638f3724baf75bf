//! # Arena Server Library
//!
//! This library provides the authoritative server for a real-time 3 vs 3
//! volleyball match. Players queue for matchmaking or gather in private rooms,
//! pick teams, and play a ball game in which the server alone decides where
//! the ball goes and who scores.
//!
//! ## Core Responsibilities
//!
//! ### Lobby and Sessions
//! The server tracks every connection and what it is doing:
//! - Registration of a player profile through a character directory
//! - A FIFO matchmaking queue that forms a started session from every six players
//! - Private rooms joined through a four digit code, with host, roster and teams
//! - Bots that fill empty slots and are managed by the host
//!
//! ### Authoritative Simulation
//! Each running session advances its own ball simulation at a fixed 60Hz
//! tick. Ball motion, landings, the three-touch rule and the score are all
//! decided here; player movement is relayed between clients unchecked.
//!
//! ### Event Dispatch
//! Every accepted command produces broadcasts to the members of the affected
//! session. Rejected commands are answered with an error addressed only to
//! the connection that sent them.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Lobby
//! One main loop owns the connection registry, the matchmaking queue and the
//! session table and processes packets sequentially. Queue operations can
//! therefore never interleave, and no lobby state needs a lock.
//!
//! ### Per-Session Tick Tasks
//! A session that enters play gets its own tokio task. The task and the lobby
//! share the session behind a mutex, so hits from players, bot decisions and
//! physics steps for one session are applied one at a time, while different
//! sessions run fully in parallel.
//!
//! ### UDP-Based Communication
//! Uses UDP sockets with one bincode-encoded packet per datagram. Outgoing
//! packets are queued on a channel and written by a dedicated sender task, so
//! no tick ever waits on the network.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! Connections, profiles, lobby status and idle timeouts.
//!
//! ### Matchmaking Module (`matchmaking`)
//! The waiting list and match formation.
//!
//! ### Room Module (`room`)
//! The session state machine: Waiting, InGame, Finished.
//!
//! ### Game Module (`game`)
//! One match: ball physics, touch rules, bots and the respawn timer, advanced
//! tick by tick.
//!
//! ### Physics, Rules and Bot Modules (`physics`, `rules`, `bot`)
//! The ball simulation, the scoring and touch-count rules, and the bot AI.
//!
//! ### Lobby Module (`lobby`)
//! The session table and command dispatch.
//!
//! ### Network Module (`network`)
//! The UDP server, the sender task and the session tick loops.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use arena_server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     })
//!     .await?;
//!
//!     // Runs until the process is interrupted
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod error;
pub mod game;
pub mod lobby;
pub mod matchmaking;
pub mod network;
pub mod physics;
pub mod registry;
pub mod room;
pub mod rules;
