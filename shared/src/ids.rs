//! Identifiers for peers and replicated entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// A participant in the session. Assigned by the session host, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

/// A replicated entity. Only the session host allocates these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// What an entity is, which decides the behaviour its authority runs each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// The session-wide game-phase orchestrator.
    GameManager,
    /// An obstacle course that raises, lowers and resets its flag.
    Course,
    /// A capturable flag belonging to one course.
    Flag,
    /// A hazard sweeping back and forth on a fixed path.
    Obstacle,
    /// A participant's avatar, always owned by that participant.
    Player,
}

impl EntityKind {
    /// Position in the per-tick step order. Lower runs first.
    pub fn step_order(self) -> u8 {
        match self {
            EntityKind::GameManager => 0,
            EntityKind::Course => 1,
            EntityKind::Flag => 2,
            EntityKind::Obstacle => 3,
            EntityKind::Player => 4,
        }
    }

    /// World entities belong to the session coordinator rather than a joining peer.
    pub fn is_world_entity(self) -> bool {
        !matches!(self, EntityKind::Player)
    }
}

/// Lifecycle of an entity as seen by every replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Created, no authority assigned yet.
    Spawning,
    /// Owned and simulated.
    Active,
    /// Torn down; removed from replicas on the next snapshot.
    Despawned,
}
