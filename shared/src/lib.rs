//! # Shared Replication Core
//!
//! Everything the session host and the peers must agree on: identifiers,
//! replicated property values, the tick clock, entity ownership, the wire
//! packets and the rules of the game itself. Nothing in this crate touches a
//! socket; the `server` and `client` crates drive it from their own loops.
//!
//! ## State Authority
//!
//! Every entity has exactly one owner. Only the owner may write its
//! properties, and [`world::World`] rejects everyone else with
//! [`error::ReplicationError::NotAuthority`]. When an owner leaves, its
//! entities go to the lowest remaining peer id and stay frozen for one tick
//! so the old and new owner can never both write in the same tick.
//!
//! ## Replication Flow
//!
//! 1. The host advances the session tick and broadcasts a snapshot of every entity.
//! 2. Each peer adopts the snapshot, keeping its own entities' local values.
//! 3. Each peer steps the entities it owns, in kind order.
//! 4. A [`dispatch::ChangeDispatcher`] pass reports every property that
//!    changed since the peer last looked, exactly once.
//! 5. Peers send their owned entities back to the host as state updates.
//!
//! Requests that cause changes on entities a peer does not own travel as
//! [`rpc::Rpc`] calls, routed by the host according to each call's scopes.
//!
//! ## Module Organization
//!
//! - `ids`, `value`, `property`: entity identity and replicated data
//! - `timer`: tick clock and deadline timers
//! - `authority`, `world`: ownership and the local replica
//! - `dispatch`: change notifications
//! - `rpc`, `channel`, `protocol`: calls, reliable delivery and datagrams
//! - `prediction`: optimistic overlays
//! - `game`: phases, capture states, standings and property names
//! - `config`, `error`: session configuration and error types

pub mod authority;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod ids;
pub mod prediction;
pub mod property;
pub mod protocol;
pub mod rpc;
pub mod timer;
pub mod value;
pub mod world;

pub use config::SessionConfig;
pub use error::{ConfigError, JoinFailure, ReplicationError};
pub use game::{props, CaptureState, GamePhase, Standing};
pub use ids::{EntityId, EntityKind, Lifecycle, PeerId};
pub use property::PropertyStore;
pub use protocol::{Packet, PROTOCOL_VERSION};
pub use rpc::{CourseCommand, Envelope, Rpc};
pub use timer::{Tick, TickClock, TickTimer};
pub use value::{FromProp, PropValue};
pub use world::{EntitySnapshot, World};
