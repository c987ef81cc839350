//! # Session Peer Library
//!
//! This library provides everything a peer needs to take part in a
//! flag-capture session. A peer keeps a full replica of the session, runs the
//! simulation for whichever entities the host made it responsible for, and
//! reports its state back every tick.
//!
//! ## Architecture Overview
//!
//! There is no game server. The session host only relays, so gameplay runs
//! on the peers themselves, each entity on exactly one of them at a time.
//!
//! ### Authority
//! Every peer owns its own player. One peer, initially the first to join,
//! also owns the game manager, the courses, the flags and the obstacles.
//! When that peer leaves, the host moves them to the lowest remaining peer id
//! and this library picks them up on the next snapshot.
//!
//! ### Tick Loop
//! Each snapshot from the host carries a tick number. For every new tick the
//! peer drains its inbox, steps its entities in a fixed kind order, routes
//! the calls they made, runs a change pass and sends its owned entities back.
//!
//! ### Optimistic Claims
//! Touching a flag owned by someone else shows it as held right away. The
//! guess lives until the flag's owner answers or a timeout passes.
//!
//! ## Module Organization
//!
//! ### Peer Module (`peer`)
//! The synchronous [`peer::Peer`]: packet handling, stepping, outbox routing,
//! phase observers and the render pass.
//!
//! ### Behaviours Module (`behaviours`)
//! Per-kind simulation and call handlers:
//! - Game manager: readiness, countdown, match phases, standings, start slots
//! - Course: raising, lowering and the flag reset cycle
//! - Flag: claims, deposits, drops
//! - Obstacle: sine sweep between two layout points
//! - Player: movement, attacks, explosions, deposits and claims
//!
//! ### Input Module (`input`)
//! The [`input::InputSource`] seam and a headless bot.
//!
//! ### Presentation Module (`presentation`)
//! The [`presentation::Presenter`] seam and a logging presenter.
//!
//! ### Network Module (`network`)
//! The UDP runner driving a peer from a `select!` loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", "bot", 0).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod behaviours;
pub mod input;
pub mod net_stats;
pub mod network;
pub mod peer;
pub mod presentation;
