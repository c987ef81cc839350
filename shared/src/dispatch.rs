//! Change detection and observer callbacks
//!
//! Every peer keeps a rendered copy of each entity's properties. A dispatch
//! pass compares the world against those copies, updates them, and then hands
//! each difference to the observers registered for it. Observers cannot write
//! the world directly; they queue writes in an [`ObserverContext`] that is
//! applied once the pass is over, so their effects show up on the next pass.

use crate::error::ReplicationError;
use crate::ids::{EntityId, EntityKind};
use crate::property::PropertyStore;
use crate::value::PropValue;
use crate::world::World;
use log::debug;
use std::collections::HashMap;

/// One property that differs from what this peer last rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity: EntityId,
    pub kind: EntityKind,
    pub property: String,
    /// `None` the first time this peer sees the entity.
    pub previous: Option<PropValue>,
    pub current: PropValue,
}

/// Writes requested by observers during a pass.
#[derive(Debug, Default)]
pub struct ObserverContext {
    writes: Vec<(EntityId, String, PropValue)>,
}

impl ObserverContext {
    pub fn set(&mut self, entity: EntityId, name: &str, value: impl Into<PropValue>) {
        self.writes.push((entity, name.to_string(), value.into()));
    }

    pub fn pending(&self) -> usize {
        self.writes.len()
    }
}

pub type Observer = Box<dyn FnMut(&ChangeEvent, &World, &mut ObserverContext) + Send>;

enum Filter {
    Property(EntityKind, String),
    Everything,
}

impl Filter {
    fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            Filter::Property(kind, property) => *kind == event.kind && *property == event.property,
            Filter::Everything => true,
        }
    }
}

/// Result of one dispatch pass.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub events: Vec<ChangeEvent>,
    pub despawned: Vec<EntityId>,
    pub applied_writes: usize,
    pub rejected_writes: Vec<ReplicationError>,
}

#[derive(Default)]
pub struct ChangeDispatcher {
    rendered: HashMap<EntityId, PropertyStore>,
    observers: Vec<(Filter, Observer)>,
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for one property of one entity kind.
    pub fn observe<F>(&mut self, kind: EntityKind, property: &str, observer: F)
    where
        F: FnMut(&ChangeEvent, &World, &mut ObserverContext) + Send + 'static,
    {
        self.observers
            .push((Filter::Property(kind, property.to_string()), Box::new(observer)));
    }

    /// Registers a callback for every change.
    pub fn observe_all<F>(&mut self, observer: F)
    where
        F: FnMut(&ChangeEvent, &World, &mut ObserverContext) + Send + 'static,
    {
        self.observers.push((Filter::Everything, Box::new(observer)));
    }

    pub fn rendered(&self, entity: EntityId) -> Option<&PropertyStore> {
        self.rendered.get(&entity)
    }

    /// Runs one pass: detect, notify, then apply the writes observers queued.
    pub fn dispatch(&mut self, world: &mut World) -> DispatchOutcome {
        let mut outcome = DispatchOutcome {
            events: self.collect_changes(world),
            ..Default::default()
        };

        outcome.despawned = self
            .rendered
            .keys()
            .copied()
            .filter(|id| !world.contains(*id))
            .collect();
        outcome.despawned.sort();
        for id in &outcome.despawned {
            self.rendered.remove(id);
        }

        let mut context = ObserverContext::default();
        for event in &outcome.events {
            for (filter, observer) in self.observers.iter_mut() {
                if filter.matches(event) {
                    observer(event, world, &mut context);
                }
            }
        }

        for (entity, name, value) in context.writes {
            match world.set(entity, &name, value) {
                Ok(_) => outcome.applied_writes += 1,
                Err(error) => {
                    debug!("Observer write to {}.{} rejected: {}", entity, name, error);
                    outcome.rejected_writes.push(error);
                }
            }
        }

        outcome
    }

    fn collect_changes(&mut self, world: &World) -> Vec<ChangeEvent> {
        let mut events = Vec::new();

        for id in world.ids() {
            let (Some(kind), Some(props)) = (world.kind(id), world.props(id)) else {
                continue;
            };
            let rendered = self.rendered.entry(id).or_default();

            for (name, value) in props.iter() {
                let previous = rendered.get(name).cloned();
                if previous.as_ref() == Some(value) {
                    continue;
                }
                rendered.write(name, value.clone());
                events.push(ChangeEvent {
                    entity: id,
                    kind,
                    property: name.clone(),
                    previous,
                    current: value.clone(),
                });
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{props, GamePhase};
    use crate::ids::PeerId;
    use std::sync::{Arc, Mutex};

    fn world_with_player() -> (World, EntityId) {
        let mut world = World::new(Some(PeerId(1)), 30);
        let player = world.spawn(
            EntityKind::Player,
            Some(PeerId(1)),
            PropertyStore::new()
                .with(props::SCORE, 0i64)
                .with(props::IS_WINNER, false),
        );
        (world, player)
    }

    #[test]
    fn test_first_pass_reports_every_property() {
        let (mut world, player) = world_with_player();
        let mut dispatcher = ChangeDispatcher::new();

        let outcome = dispatcher.dispatch(&mut world);
        assert_eq!(outcome.events.len(), 2);
        assert!(outcome.events.iter().all(|e| e.previous.is_none()));
        assert!(dispatcher.rendered(player).is_some());
    }

    #[test]
    fn test_same_value_produces_no_events() {
        let (mut world, player) = world_with_player();
        let mut dispatcher = ChangeDispatcher::new();
        dispatcher.dispatch(&mut world);

        world.set(player, props::SCORE, 0i64).unwrap();
        assert!(dispatcher.dispatch(&mut world).events.is_empty());
    }

    #[test]
    fn test_each_change_fires_once() {
        let (mut world, player) = world_with_player();
        let mut dispatcher = ChangeDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        dispatcher.observe(EntityKind::Player, props::SCORE, move |event, _, _| {
            log.lock().unwrap().push(event.current.clone());
        });
        dispatcher.dispatch(&mut world);

        world.set(player, props::SCORE, 1i64).unwrap();
        world.set(player, props::SCORE, 2i64).unwrap();
        dispatcher.dispatch(&mut world);
        dispatcher.dispatch(&mut world);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![PropValue::Int(0), PropValue::Int(2)]
        );
    }

    #[test]
    fn test_observer_writes_visible_next_pass() {
        let (mut world, player) = world_with_player();
        let manager = world.spawn(
            EntityKind::GameManager,
            Some(PeerId(2)),
            PropertyStore::new().with(props::PHASE, GamePhase::Waiting),
        );
        let mut dispatcher = ChangeDispatcher::new();
        dispatcher.observe(EntityKind::GameManager, props::PHASE, |event, world, ctx| {
            if event.current == PropValue::Phase(GamePhase::Results) {
                if let Some(player) = world.local_player() {
                    ctx.set(player, props::IS_WINNER, true);
                }
            }
        });
        dispatcher.dispatch(&mut world);

        world
            .set_as(Some(PeerId(2)), manager, props::PHASE, GamePhase::Results)
            .unwrap();
        let outcome = dispatcher.dispatch(&mut world);
        assert_eq!(outcome.applied_writes, 1);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(world.get::<bool>(player, props::IS_WINNER), Some(true));

        let next = dispatcher.dispatch(&mut world);
        assert_eq!(next.events.len(), 1);
        assert_eq!(next.events[0].property, props::IS_WINNER);
    }

    #[test]
    fn test_rejected_observer_write() {
        let (mut world, _) = world_with_player();
        let foreign = world.spawn(
            EntityKind::Player,
            Some(PeerId(9)),
            PropertyStore::new().with(props::SCORE, 0i64),
        );
        let mut dispatcher = ChangeDispatcher::new();
        dispatcher.observe_all(move |_, _, ctx| ctx.set(foreign, props::SCORE, 1i64));

        let outcome = dispatcher.dispatch(&mut world);
        assert_eq!(outcome.applied_writes, 0);
        assert!(!outcome.rejected_writes.is_empty());
    }

    #[test]
    fn test_despawn_drops_rendered_copy() {
        let (mut world, player) = world_with_player();
        let mut dispatcher = ChangeDispatcher::new();
        dispatcher.dispatch(&mut world);

        world.despawn(player);
        let outcome = dispatcher.dispatch(&mut world);
        assert_eq!(outcome.despawned, vec![player]);
        assert!(dispatcher.rendered(player).is_none());
    }
}
