//! # Board Server Library
//!
//! This library provides the server side of a massively shared board game: a
//! 32768 x 32768 grid of cells that every connected player uncovers
//! together. The server holds the single authoritative copy of the board,
//! answers chunk snapshots on demand and broadcasts aggregated changes to all
//! players at a fixed tick rate.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Board
//! The board is one bit per cell, packed into atomic words. Any connection
//! may uncover a cell at any time; the atomic OR on the containing word
//! decides exactly one winner per cell without a global lock.
//!
//! ### Player Management
//! Handles the complete lifecycle of player connections including:
//! - Connection upgrade and registration with the hub
//! - Frame decoding and dispatch to the board
//! - Keepalive pings and read/write deadlines
//! - Unregistration and teardown on any I/O failure
//!
//! ### Stats Broadcasting
//! Every tick the hub collects the cells uncovered since the previous tick
//! and sends one stats frame to every registered player.
//!
//! ## Architecture Design
//!
//! ### Hub Actor
//! The player registry is owned by a single task that processes register,
//! unregister and broadcast commands in order, interleaved with its tick
//! timer. Registry access is never concurrent.
//!
//! ### Bounded Fan-out
//! Each player has an outbound queue of fixed depth. Broadcast only ever
//! tries to enqueue; a player whose queue is full is evicted so one slow
//! consumer never delays the rest.
//!
//! ### Two Pumps per Connection
//! A reader task owns the inbound half of the socket and a writer task owns
//! the outbound half. Both watch a per-connection shutdown signal.
//!
//! ## Module Organization
//!
//! - `board`: bit-packed atomic grid and chunk snapshots
//! - `game`: board plus global counter and the per-tick uncover window
//! - `hub`: registry, broadcast with eviction, tick
//! - `player`: outbound queue, shutdown signal, reader/writer pumps
//! - `network`: listener and connection upgrade
//! - `config`: timeouts, limits and tick period
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::game::Game;
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let game = Arc::new(Game::new());
//!     let server = Server::bind("127.0.0.1:8080", game, ServerConfig::default()).await?;
//!
//!     // Accepts upgrades on /websocket until the process exits.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod config;
pub mod game;
pub mod hub;
pub mod network;
pub mod player;
