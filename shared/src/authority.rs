//! Entity ownership and hand-off bookkeeping

use crate::ids::{EntityId, PeerId};
use crate::timer::Tick;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Who may mutate an entity, and whether it is frozen by a hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorityRecord {
    /// `None` while the entity waits for its first owner.
    pub owner: Option<PeerId>,
    /// Tick during which the entity is frozen after changing hands.
    pub handoff_tick: Option<Tick>,
}

impl AuthorityRecord {
    pub fn owned_by(owner: PeerId) -> Self {
        Self {
            owner: Some(owner),
            handoff_tick: None,
        }
    }

    /// Frozen up to and including the hand-off tick.
    pub fn is_frozen(&self, tick: Tick) -> bool {
        matches!(self.handoff_tick, Some(handoff) if tick <= handoff)
    }
}

/// Maps every entity to its current authority.
#[derive(Debug, Clone, Default)]
pub struct AuthorityRegistry {
    records: BTreeMap<EntityId, AuthorityRecord>,
}

impl AuthorityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, entity: EntityId, owner: Option<PeerId>) {
        self.records.insert(
            entity,
            AuthorityRecord {
                owner,
                handoff_tick: None,
            },
        );
    }

    /// Replaces a record wholesale, as received in a snapshot.
    pub fn set_record(&mut self, entity: EntityId, record: AuthorityRecord) {
        self.records.insert(entity, record);
    }

    pub fn remove(&mut self, entity: EntityId) -> Option<AuthorityRecord> {
        self.records.remove(&entity)
    }

    pub fn record(&self, entity: EntityId) -> Option<AuthorityRecord> {
        self.records.get(&entity).copied()
    }

    pub fn owner(&self, entity: EntityId) -> Option<PeerId> {
        self.records.get(&entity).and_then(|record| record.owner)
    }

    pub fn is_authority(&self, entity: EntityId, peer: PeerId) -> bool {
        self.owner(entity) == Some(peer)
    }

    pub fn is_frozen(&self, entity: EntityId, tick: Tick) -> bool {
        self.records
            .get(&entity)
            .map_or(false, |record| record.is_frozen(tick))
    }

    pub fn owned_by(&self, peer: PeerId) -> Vec<EntityId> {
        self.records
            .iter()
            .filter(|(_, record)| record.owner == Some(peer))
            .map(|(entity, _)| *entity)
            .collect()
    }

    pub fn unassigned(&self) -> Vec<EntityId> {
        self.records
            .iter()
            .filter(|(_, record)| record.owner.is_none())
            .map(|(entity, _)| *entity)
            .collect()
    }

    /// Hands everything `departed` owned to `successor`.
    ///
    /// Entities that get a new owner are frozen for the tick after `current_tick`.
    /// With no successor they fall back to unassigned. Returns the moved entities.
    pub fn reassign(
        &mut self,
        departed: PeerId,
        successor: Option<PeerId>,
        current_tick: Tick,
    ) -> Vec<EntityId> {
        let mut moved = Vec::new();
        for (entity, record) in self.records.iter_mut() {
            if record.owner != Some(departed) {
                continue;
            }
            record.owner = successor;
            record.handoff_tick = successor.map(|_| current_tick.wrapping_add(1));
            moved.push(*entity);
        }

        if !moved.is_empty() {
            match successor {
                Some(peer) => info!(
                    "Handing {} entities from {} to {} at tick {}",
                    moved.len(),
                    departed,
                    peer,
                    current_tick.wrapping_add(1)
                ),
                None => info!(
                    "{} left with no successor, {} entities unassigned",
                    departed,
                    moved.len()
                ),
            }
        }

        moved
    }

    /// Forgets hand-off marks whose tick has passed.
    pub fn clear_finished_handoffs(&mut self, current_tick: Tick) {
        for record in self.records.values_mut() {
            if matches!(record.handoff_tick, Some(handoff) if current_tick > handoff) {
                record.handoff_tick = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The peer that inherits a departed peer's entities: the lowest remaining id.
pub fn successor(remaining: impl IntoIterator<Item = PeerId>) -> Option<PeerId> {
    remaining.into_iter().min()
}
