//! Datagrams exchanged between the session host and its peers

use crate::config::SessionConfig;
use crate::error::JoinFailure;
use crate::ids::{EntityId, PeerId};
use crate::property::PropertyStore;
use crate::rpc::{Delivery, Envelope};
use crate::timer::Tick;
use crate::world::EntitySnapshot;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bumped whenever the packet layout changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Receive buffer large enough for a full snapshot.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Peer -> host
    Join {
        client_version: u32,
        name: String,
    },
    Leave,
    StateUpdate {
        tick: Tick,
        entity: EntityId,
        props: PropertyStore,
    },

    // Host -> peer
    Joined {
        peer: PeerId,
        player: EntityId,
        config: SessionConfig,
    },
    JoinRejected {
        reason: JoinFailure,
    },
    Snapshot {
        tick: Tick,
        timestamp: u64,
        entities: Vec<EntitySnapshot>,
    },
    Despawn {
        entity: EntityId,
    },

    // Both directions
    Rpc(Envelope),
    Reliable {
        seq: u32,
        payload: Box<Packet>,
    },
    Ack {
        up_to: u32,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Channel this packet should travel on when sent directly.
    pub fn delivery(&self) -> Delivery {
        match self {
            Packet::Rpc(envelope) => envelope.descriptor().delivery,
            Packet::Despawn { .. } => Delivery::Reliable,
            _ => Delivery::Unreliable,
        }
    }
}

/// Milliseconds since the Unix epoch, zero if the clock is before it.
pub fn timestamp_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u64::MAX as u128) as u64
}
