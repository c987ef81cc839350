//! Per-entity simulation run by whichever peer holds authority
//!
//! Each tick the peer steps the entities it owns in kind order (game manager,
//! courses, flags, obstacles, players) and runs the handlers of the calls it
//! received.
//! Behaviours only see the world through [`SimContext`]: reads are free,
//! writes go through the authority check, and calls to other entities are
//! queued in the outbox.

pub mod course;
pub mod flag;
pub mod obstacle;
pub mod orchestrator;
pub mod player;

use crate::input::InputFrame;
use crate::presentation::PresentationEvent;
use flag::FlagClaim;
use log::{debug, warn};
use rand::rngs::StdRng;
use shared::prediction::Predicted;
use shared::rpc::TargetScope;
use shared::{
    props, EntityId, EntityKind, Envelope, FromProp, GamePhase, PropValue, ReplicationError, Rpc,
    SessionConfig, TickClock, World,
};
use std::collections::HashMap;

/// State a peer keeps for itself and never replicates.
#[derive(Default)]
pub struct LocalState {
    /// Latest generation collected per flag, to ignore redelivery.
    pub collected: HashMap<EntityId, u32>,
    /// Claims sent but not yet answered by the flag's authority.
    pub predictions: HashMap<EntityId, Predicted<FlagClaim>>,
    pub events: Vec<PresentationEvent>,
}

pub struct SimContext<'a> {
    pub world: &'a mut World,
    pub config: &'a SessionConfig,
    pub input: &'a InputFrame,
    pub outbox: &'a mut Vec<Envelope>,
    pub local: &'a mut LocalState,
    pub rng: &'a mut StdRng,
}

impl<'a> SimContext<'a> {
    pub fn get<T: FromProp>(&self, entity: EntityId, name: &str) -> Option<T> {
        self.world.get(entity, name)
    }

    /// Writes as the local peer. Returns whether the value changed.
    ///
    /// Writes to a frozen entity are queued by the world and report no change.
    pub fn set(&mut self, entity: EntityId, name: &str, value: impl Into<PropValue>) -> bool {
        match self.world.set(entity, name, value) {
            Ok(changed) => changed,
            Err(ReplicationError::HandoffInProgress(_)) => false,
            Err(error) => {
                debug!("Write to {}.{} failed: {}", entity, name, error);
                false
            }
        }
    }

    pub fn send(&mut self, target: EntityId, rpc: Rpc) {
        self.outbox.push(Envelope::new(target, rpc));
    }

    pub fn clock(&self) -> &TickClock {
        self.world.clock()
    }

    pub fn dt(&self) -> f32 {
        self.world.clock().delta_time()
    }

    pub fn game_manager(&self) -> Option<EntityId> {
        self.world.first_of(EntityKind::GameManager)
    }

    pub fn phase(&self) -> GamePhase {
        self.game_manager()
            .and_then(|manager| self.world.get(manager, props::PHASE))
            .unwrap_or_default()
    }
}

/// Runs one tick of an owned entity.
pub fn step_entity(ctx: &mut SimContext, entity: EntityId) {
    match ctx.world.kind(entity) {
        Some(EntityKind::GameManager) => orchestrator::step(ctx, entity),
        Some(EntityKind::Course) => course::step(ctx, entity),
        Some(EntityKind::Flag) => flag::step(ctx, entity),
        Some(EntityKind::Obstacle) => obstacle::step(ctx, entity),
        Some(EntityKind::Player) => player::step(ctx, entity),
        None => {}
    }
}

/// Runs the handler for one delivered call.
pub fn handle_rpc(ctx: &mut SimContext, envelope: Envelope) {
    let target = envelope.target;
    let descriptor = envelope.descriptor();

    let Some(kind) = ctx.world.kind(target) else {
        debug!("{} for unknown {} dropped", descriptor.name, target);
        return;
    };
    if descriptor.target == TargetScope::AuthorityOnly && !ctx.world.is_authority(target) {
        debug!(
            "{} for {} arrived after authority moved, dropping",
            descriptor.name, target
        );
        return;
    }

    match (kind, envelope.rpc) {
        (EntityKind::GameManager, Rpc::PlayerJoined { player }) => {
            orchestrator::on_player_joined(ctx, target, player)
        }
        (EntityKind::Player, Rpc::AssignStartingPoint { index }) => {
            player::on_assign_starting_point(ctx, target, index)
        }
        (EntityKind::Player, Rpc::CollectFlag { flag, generation }) => {
            player::on_collect_flag(ctx, target, flag, generation)
        }
        (EntityKind::Player, Rpc::Attack { origin, direction }) => {
            player::on_attack(ctx, target, origin, direction)
        }
        (EntityKind::Flag, Rpc::ClaimFlag { player }) => flag::on_claim(ctx, target, player),
        (EntityKind::Flag, Rpc::DepositFlag { player, generation }) => {
            flag::on_deposit(ctx, target, player, generation)
        }
        (EntityKind::Flag, Rpc::DropFlag { generation }) => flag::on_drop(ctx, target, generation),
        (EntityKind::Flag, Rpc::ResetFlag { state }) => flag::on_reset(ctx, target, state),
        (EntityKind::Course, Rpc::Course(command)) => course::on_command(ctx, target, command),
        (kind, rpc) => warn!("{:?} {} does not handle {:?}", kind, target, rpc),
    }
}
