//! # Hexfall Server Library
//!
//! This library provides the authoritative server for Hexfall, a turn-based
//! strategy game played on a hexagonal board. Clients connect over TCP, pick a
//! color in the lobby and then take turns moving pawns and spending powers
//! while the board itself fights back with gravity wells, mines and spreading
//! hazards.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Rules
//! Every move and power use is validated here. Clients only ever receive the
//! results: state updates, destruction notices and presentation hints. A
//! rejected command gets an `AckBadMove` with a reason and changes nothing.
//!
//! ### Session Management
//! Handles the lifecycle of every connection:
//! - Handshake with version and name checks
//! - Color selection and spectators
//! - Departure handling, including mid-match cleanup of the leaver's pawns
//!
//! ### Turn Flow
//! Only the session holding the turn may act. After each move the server
//! runs the environment (gravity, then pickup spawns), checks for a winner
//! and hands the turn to the next session that still has pawns.
//!
//! ## Architecture Design
//!
//! ### Single Reactor
//! One task owns the [`lobby::Lobby`] and with it all game state. Connection
//! tasks only decode and encode frames and talk to the reactor over channels,
//! so game logic never needs a lock and stays deterministic for a given seed.
//!
//! ### Framed TCP
//! Packets are bincode-encoded and sent as length-prefixed frames (see
//! `shared::framing`). Each connection has its own outgoing FIFO queue, so a
//! slow client never stalls the others.
//!
//! ## Module Organization
//!
//! ### Board (`board`) and Movement (`movement`)
//! The tile and pawn grid, and the movement rules over it:
//! - Height, landing pads, holes and status flags
//! - Crushing, pickups and mines on arrival
//! - Forced moves used by gravity and pull effects
//!
//! ### Powers (`powers`)
//! The table of twenty powers with their aiming shape, spawn weight and
//! effect, plus the rules for holding and spending them.
//!
//! ### Environment (`environment`)
//! Gravity from black holes, the pickup spawner and spreading hazards.
//!
//! ### Game (`game`)
//! One running match: turn order, elimination and the outcome check.
//!
//! ### Client Manager (`client_manager`)
//! Session directory with handshake state, names and colors.
//!
//! ### Lobby (`lobby`)
//! The lobby/game state machine that turns packets into queued replies.
//!
//! ### Maps (`maps`) and Configuration (`config`)
//! Scenario loading and saving, the built-in default scenario and the
//! server settings.
//!
//! ### Network (`network`)
//! TCP listener, per-connection reader and writer tasks and the reactor loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ServerConfig {
//!         port: 7777,
//!         seed: Some(42),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs until a shutdown is requested through `Server::shutdown_handle`
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod client_manager;
pub mod config;
pub mod environment;
pub mod game;
pub mod lobby;
pub mod maps;
pub mod movement;
pub mod network;
pub mod powers;
