//! # Session Host Library
//!
//! This library provides the session host for the flag-capture game. The host
//! is a relay, not a game server: it never runs gameplay. Instead it keeps the
//! session tick, decides which peer holds authority over each entity, and
//! moves state and requests between peers.
//!
//! ## Core Responsibilities
//!
//! ### Session Membership
//! Handles the complete lifecycle of peers:
//! - Join with version and capacity checks, answered by `Joined` or `JoinRejected`
//! - Explicit leave and silent timeout, both treated as departure
//! - One reliable link per peer for calls that must arrive in order
//!
//! ### Entity Lifecycle and Authority
//! The game manager, every course with its flag and every obstacle are
//! spawned unassigned when the session is created and handed to the first peer that joins. Each
//! joining peer gets its own player entity. When a peer departs, its player
//! is despawned (releasing any flag it held) and its world entities move to
//! the lowest remaining peer id, frozen for one tick.
//!
//! ### Single-Writer Validation
//! Peers send their owned entities back every tick. The host accepts a state
//! update only from the entity's current authority and drops the rest.
//!
//! ### Call Routing
//! Remote calls are routed by scope: calls for an entity's authority go to
//! whoever owns it at arrival, broadcast calls go to every other peer, and
//! calls restricted to the authority as sender are dropped from anyone else.
//!
//! ### Snapshot Broadcasting
//! Every tick the host advances the session clock and sends each peer a
//! snapshot of every entity, stamped with the tick number. Peers run one
//! simulation step per new tick.
//!
//! ## Module Organization
//!
//! ### Peer Manager Module (`peer_manager`)
//! Peer ids, addresses, liveness and reliable links.
//!
//! ### Session Module (`session`)
//! The synchronous [`session::SessionHost`] holding the authoritative world.
//!
//! ### Network Module (`network`)
//! UDP receiver and sender tasks plus the `select!` loop that ticks the host.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::SessionConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", SessionConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod peer_manager;
pub mod session;
