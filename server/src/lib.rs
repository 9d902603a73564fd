//! # Session Server Library
//!
//! This library provides the real-time session layer of the multiplayer game
//! server. Clients connect over TCP, log in under a player identifier, queue
//! for matchmaking and are paired two at a time into rooms. Inside a room the
//! server relays each occupant's state changes to the other occupant.
//!
//! ## Core Responsibilities
//!
//! ### Sessions
//! Binds player identifiers to the connection their messages go to. A second
//! login under the same identifier moves the session to the new connection.
//!
//! ### Matchmaking
//! A strict FIFO queue. Every time two players are waiting, the two oldest are
//! paired and a room is created for them.
//!
//! ### Room Synchronization
//! Each room holds the authoritative [`shared::PlayerState`] of its two
//! occupants. Updates are applied and then forwarded to everyone in the room
//! except the sender.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! Every accepted connection gets a read loop that decodes frames in order and
//! hands them to the [`router::Router`], plus a writer task draining that
//! connection's outbound queue. Registries never write to sockets themselves;
//! they queue frames while holding their lock, which keeps per-recipient
//! ordering without putting network I/O inside a critical section.
//!
//! ### Locking
//! Each registry owns a single `tokio::sync::Mutex`. When more than one is
//! needed the order is always sessions, then matchmaking, then rooms.
//!
//! ## Module Organization
//!
//! - `config`: listener address and frame size limit
//! - `connection`: per-connection handle and outbound queue
//! - `messenger`: envelope encoding and delivery to connections
//! - `session`: login/logout registry
//! - `matchmaking`: FIFO queue and pairing
//! - `room`: room registry and state relay
//! - `router`: dispatch of decoded envelopes
//! - `network`: TCP listener and connection loops
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(&ServerConfig::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod matchmaking;
pub mod messenger;
pub mod network;
pub mod room;
pub mod router;
pub mod session;
