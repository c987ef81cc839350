//! Local replica of every replicated entity
//!
//! The session host and every peer hold one `World`. Writes are checked
//! against the authority registry: only the owner of an entity may change
//! its properties, and an entity that is changing hands is frozen for one
//! tick, with writes queued until the tick after.

use crate::authority::{AuthorityRecord, AuthorityRegistry};
use crate::error::ReplicationError;
use crate::ids::{EntityId, EntityKind, Lifecycle, PeerId};
use crate::property::PropertyStore;
use crate::timer::{Tick, TickClock};
use crate::value::{FromProp, PropValue};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One entity as carried in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub lifecycle: Lifecycle,
    pub authority: AuthorityRecord,
    pub props: PropertyStore,
}

#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub lifecycle: Lifecycle,
    pub props: PropertyStore,
}

/// A write that hit a frozen entity.
#[derive(Debug, Clone, PartialEq)]
struct DeferredWrite {
    writer: Option<PeerId>,
    entity: EntityId,
    name: String,
    value: PropValue,
}

/// What changed when a snapshot was applied.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SnapshotOutcome {
    pub spawned: Vec<EntityId>,
    pub despawned: Vec<EntityId>,
    /// Entities this replica gained authority over.
    pub acquired: Vec<EntityId>,
}

pub struct World {
    local: Option<PeerId>,
    clock: TickClock,
    entities: BTreeMap<EntityId, EntityRecord>,
    authority: AuthorityRegistry,
    deferred: Vec<DeferredWrite>,
    next_id: u32,
}

impl World {
    /// A replica acting for `local`. The session host passes `None`.
    pub fn new(local: Option<PeerId>, tick_rate: u32) -> Self {
        Self {
            local,
            clock: TickClock::new(tick_rate),
            entities: BTreeMap::new(),
            authority: AuthorityRegistry::new(),
            deferred: Vec::new(),
            next_id: 1,
        }
    }

    pub fn local_peer(&self) -> Option<PeerId> {
        self.local
    }

    pub fn set_local_peer(&mut self, peer: PeerId) {
        self.local = Some(peer);
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut TickClock {
        &mut self.clock
    }

    pub fn tick(&self) -> Tick {
        self.clock.tick()
    }

    /// Rebuilds the clock at a new rate, keeping the current tick.
    pub fn set_tick_rate(&mut self, tick_rate: u32) {
        let tick = self.clock.tick();
        self.clock = TickClock::new(tick_rate);
        self.clock.sync_to(tick);
    }

    pub fn authority(&self) -> &AuthorityRegistry {
        &self.authority
    }

    pub fn authority_mut(&mut self) -> &mut AuthorityRegistry {
        &mut self.authority
    }

    // ---- lifecycle ----

    /// Creates an entity with a fresh id. Only the session host allocates ids.
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        owner: Option<PeerId>,
        props: PropertyStore,
    ) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;

        let lifecycle = if owner.is_some() {
            Lifecycle::Active
        } else {
            Lifecycle::Spawning
        };
        self.entities.insert(
            id,
            EntityRecord {
                kind,
                lifecycle,
                props,
            },
        );
        self.authority.assign(id, owner);
        debug!("Spawned {:?} {} owned by {:?}", kind, id, owner);
        id
    }

    /// Gives an entity a new owner outside of a departure hand-off.
    pub fn assign(&mut self, entity: EntityId, owner: Option<PeerId>) -> Result<(), ReplicationError> {
        let record = self
            .entities
            .get_mut(&entity)
            .ok_or(ReplicationError::UnknownEntity(entity))?;
        record.lifecycle = if owner.is_some() {
            Lifecycle::Active
        } else {
            Lifecycle::Spawning
        };
        self.authority.assign(entity, owner);
        Ok(())
    }

    pub fn despawn(&mut self, entity: EntityId) -> Option<EntityRecord> {
        self.authority.remove(entity);
        self.deferred.retain(|write| write.entity != entity);
        self.entities.remove(&entity).map(|mut record| {
            record.lifecycle = Lifecycle::Despawned;
            debug!("Despawned {:?} {}", record.kind, entity);
            record
        })
    }

    /// Moves everything `departed` owned to `successor`, frozen for the next tick.
    pub fn handle_departure(&mut self, departed: PeerId, successor: Option<PeerId>) -> Vec<EntityId> {
        let moved = self
            .authority
            .reassign(departed, successor, self.clock.tick());
        if successor.is_none() {
            for entity in &moved {
                if let Some(record) = self.entities.get_mut(entity) {
                    record.lifecycle = Lifecycle::Spawning;
                }
            }
        }
        moved
    }

    // ---- reads ----

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn kind(&self, entity: EntityId) -> Option<EntityKind> {
        self.entities.get(&entity).map(|record| record.kind)
    }

    pub fn lifecycle(&self, entity: EntityId) -> Option<Lifecycle> {
        self.entities.get(&entity).map(|record| record.lifecycle)
    }

    pub fn props(&self, entity: EntityId) -> Option<&PropertyStore> {
        self.entities.get(&entity).map(|record| &record.props)
    }

    pub fn get<T: FromProp>(&self, entity: EntityId, name: &str) -> Option<T> {
        self.props(entity).and_then(|props| props.read(name))
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities of one kind, in id order.
    pub fn entities_of(&self, kind: EntityKind) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, record)| record.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn first_of(&self, kind: EntityKind) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|(_, record)| record.kind == kind)
            .map(|(id, _)| *id)
    }

    pub fn owner(&self, entity: EntityId) -> Option<PeerId> {
        self.authority.owner(entity)
    }

    /// Whether this replica may write the entity.
    pub fn is_authority(&self, entity: EntityId) -> bool {
        match self.local {
            Some(peer) => self.authority.is_authority(entity, peer),
            None => false,
        }
    }

    pub fn is_frozen(&self, entity: EntityId) -> bool {
        self.authority.is_frozen(entity, self.clock.tick())
    }

    /// Entities this replica owns, in step order.
    pub fn owned_entities(&self) -> Vec<EntityId> {
        let Some(peer) = self.local else {
            return Vec::new();
        };
        let mut owned: Vec<(u8, EntityId)> = self
            .authority
            .owned_by(peer)
            .into_iter()
            .filter_map(|id| self.kind(id).map(|kind| (kind.step_order(), id)))
            .collect();
        owned.sort();
        owned.into_iter().map(|(_, id)| id).collect()
    }

    /// The player entity this replica owns, if any.
    pub fn local_player(&self) -> Option<EntityId> {
        self.entities_of(EntityKind::Player)
            .into_iter()
            .find(|id| self.is_authority(*id))
    }

    // ---- writes ----

    /// Writes as the local peer.
    pub fn set(
        &mut self,
        entity: EntityId,
        name: &str,
        value: impl Into<PropValue>,
    ) -> Result<bool, ReplicationError> {
        self.set_as(self.local, entity, name, value)
    }

    /// Writes on behalf of `caller`. Returns whether the value changed.
    ///
    /// A frozen entity queues the write and answers `HandoffInProgress`.
    pub fn set_as(
        &mut self,
        caller: Option<PeerId>,
        entity: EntityId,
        name: &str,
        value: impl Into<PropValue>,
    ) -> Result<bool, ReplicationError> {
        if !self.entities.contains_key(&entity) {
            return Err(ReplicationError::UnknownEntity(entity));
        }

        let owner = self.authority.owner(entity);
        if caller.is_none() || owner != caller {
            return Err(ReplicationError::NotAuthority { entity, caller });
        }

        let value = value.into();
        if self.is_frozen(entity) {
            self.deferred.push(DeferredWrite {
                writer: caller,
                entity,
                name: name.to_string(),
                value,
            });
            return Err(ReplicationError::HandoffInProgress(entity));
        }

        Ok(self.write_unchecked(entity, name, value))
    }

    /// Host-side write that bypasses authority, used for lifecycle bookkeeping.
    pub fn overwrite(
        &mut self,
        entity: EntityId,
        name: &str,
        value: impl Into<PropValue>,
    ) -> Result<bool, ReplicationError> {
        if !self.entities.contains_key(&entity) {
            return Err(ReplicationError::UnknownEntity(entity));
        }
        Ok(self.write_unchecked(entity, name, value.into()))
    }

    fn write_unchecked(&mut self, entity: EntityId, name: &str, value: PropValue) -> bool {
        self.entities
            .get_mut(&entity)
            .map_or(false, |record| record.props.write(name, value))
    }

    /// Applies writes queued during a hand-off whose writer still owns the entity.
    pub fn flush_deferred(&mut self) -> usize {
        let pending = std::mem::take(&mut self.deferred);
        let mut applied = 0;

        for write in pending {
            if self.is_frozen(write.entity) {
                self.deferred.push(write);
                continue;
            }
            if !self.contains(write.entity) || self.authority.owner(write.entity) != write.writer {
                debug!(
                    "Dropping queued write of {}.{}: writer no longer owns it",
                    write.entity, write.name
                );
                continue;
            }
            self.write_unchecked(write.entity, &write.name, write.value);
            applied += 1;
        }

        applied
    }

    pub fn pending_writes(&self) -> usize {
        self.deferred.len()
    }

    /// Accepts a full property store from `sender` for an entity it owns.
    ///
    /// Returns the number of properties that changed.
    pub fn apply_authoritative(
        &mut self,
        sender: PeerId,
        entity: EntityId,
        props: &PropertyStore,
    ) -> Result<usize, ReplicationError> {
        if !self.entities.contains_key(&entity) {
            return Err(ReplicationError::UnknownEntity(entity));
        }
        if !self.authority.is_authority(entity, sender) {
            return Err(ReplicationError::NotAuthority {
                entity,
                caller: Some(sender),
            });
        }
        if self.is_frozen(entity) {
            return Err(ReplicationError::HandoffInProgress(entity));
        }

        let mut changed = 0;
        for (name, value) in props.iter() {
            if self.write_unchecked(entity, name, value.clone()) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    // ---- snapshots ----

    pub fn snapshot(&self) -> Vec<EntitySnapshot> {
        self.entities
            .iter()
            .map(|(id, record)| EntitySnapshot {
                id: *id,
                kind: record.kind,
                lifecycle: record.lifecycle,
                authority: self.authority.record(*id).unwrap_or_default(),
                props: record.props.clone(),
            })
            .collect()
    }

    /// Adopts the host's view of the session.
    ///
    /// Stale snapshots (older than the local clock) are ignored and return
    /// `None`. Entities missing from the snapshot are removed. Entities this
    /// replica owned before and still owns keep their local properties, since
    /// the local copy is at least as new as the host's.
    pub fn apply_snapshot(&mut self, tick: Tick, entities: &[EntitySnapshot]) -> Option<SnapshotOutcome> {
        if tick < self.clock.tick() {
            debug!("Ignoring stale snapshot for tick {} (at {})", tick, self.clock.tick());
            return None;
        }
        self.clock.sync_to(tick);

        let mut outcome = SnapshotOutcome::default();
        let present: HashSet<EntityId> = entities.iter().map(|entity| entity.id).collect();

        let gone: Vec<EntityId> = self
            .entities
            .keys()
            .copied()
            .filter(|id| !present.contains(id))
            .collect();
        for id in gone {
            self.despawn(id);
            outcome.despawned.push(id);
        }

        for snapshot in entities {
            let owned_before = self.is_authority(snapshot.id);
            self.authority.set_record(snapshot.id, snapshot.authority);
            let owned_now = self.is_authority(snapshot.id);

            match self.entities.get_mut(&snapshot.id) {
                Some(record) => {
                    record.kind = snapshot.kind;
                    record.lifecycle = snapshot.lifecycle;
                    if !(owned_before && owned_now) {
                        record.props = snapshot.props.clone();
                    }
                }
                None => {
                    self.entities.insert(
                        snapshot.id,
                        EntityRecord {
                            kind: snapshot.kind,
                            lifecycle: snapshot.lifecycle,
                            props: snapshot.props.clone(),
                        },
                    );
                    outcome.spawned.push(snapshot.id);
                }
            }

            if owned_now && !owned_before {
                info!("Acquired authority over {:?} {}", snapshot.kind, snapshot.id);
                outcome.acquired.push(snapshot.id);
            }
        }

        self.next_id = self
            .entities
            .keys()
            .map(|id| id.0 + 1)
            .max()
            .unwrap_or(1)
            .max(self.next_id);

        Some(outcome)
    }
}
