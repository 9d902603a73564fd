//! # Session Client Library
//!
//! Client side of the session server protocol. [`network::GameClient`] wraps
//! a framed connection and exposes one method per request the server
//! understands; [`bot`] drives a scripted player through login, matchmaking
//! and a burst of movement updates.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::GameClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), client::network::ClientError> {
//!     let mut client = GameClient::connect("127.0.0.1:8888").await?;
//!     client.login("P1").await?;
//!     client.start_matchmaking("P1").await?;
//!     let room = client.wait_for_room().await?;
//!     println!("Joined {}", room.room_id);
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod network;
