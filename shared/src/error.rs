//! Error types of the replication core

use crate::ids::{EntityId, PeerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of a replicated write or a message delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// The caller does not hold authority over the entity. Always rejected.
    #[error("{caller:?} is not the authority of {entity}")]
    NotAuthority {
        entity: EntityId,
        caller: Option<PeerId>,
    },

    /// Addressed to an entity that was never spawned or is already gone.
    #[error("{0} is unknown or despawned")]
    UnknownEntity(EntityId),

    /// Authority over the entity is changing hands this tick. The write was
    /// queued and is applied on the next tick.
    #[error("authority over {0} is being handed off, write queued for the next tick")]
    HandoffInProgress(EntityId),
}

/// Terminal reason a peer could not join a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum JoinFailure {
    #[error("session is full ({max_players} players)")]
    SessionFull { max_players: usize },

    #[error("protocol version mismatch: host speaks {expected}, peer sent {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("no answer from the session host")]
    Timeout,
}

impl JoinFailure {
    /// Stable machine-readable code for the failure.
    pub fn reason_code(&self) -> &'static str {
        match self {
            JoinFailure::SessionFull { .. } => "session_full",
            JoinFailure::VersionMismatch { .. } => "version_mismatch",
            JoinFailure::Timeout => "timeout",
        }
    }
}

/// Invalid session configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("tick rate must be positive")]
    ZeroTickRate,

    #[error("{field} must not be negative (got {value})")]
    NegativeDuration { field: &'static str, value: f32 },

    #[error("max players must be at least 1")]
    NoPlayers,

    #[error("max players ({max_players}) exceeds the {limit} addressable start points")]
    TooManyPlayers { max_players: usize, limit: usize },

    #[error("max players ({max_players}) exceeds the {start_points} start points of the layout")]
    NotEnoughStartPoints {
        max_players: usize,
        start_points: usize,
    },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}
