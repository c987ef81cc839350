//! The local player's avatar, run by the peer that owns it

use super::flag::{self, FlagClaim};
use super::SimContext;
use crate::presentation::PresentationEvent;
use log::{debug, info};
use shared::prediction::Predicted;
use shared::value::distance;
use shared::{props, CaptureState, EntityId, GamePhase, Rpc, TickTimer};

/// Seconds before the end of the explosion cooldown at which the player is
/// moved back to its start point.
const TELEPORT_LEAD_SECS: f32 = 0.1;

fn home(ctx: &SimContext, player: EntityId) -> Option<[f32; 3]> {
    ctx.get::<i64>(player, props::START_INDEX)
        .filter(|index| *index >= 0)
        .and_then(|index| ctx.config.start_point(index as usize))
}

fn held_flag(ctx: &SimContext, player: EntityId) -> Option<EntityId> {
    ctx.get::<Option<EntityId>>(player, props::HELD_FLAG).flatten()
}

fn held_generation(ctx: &SimContext, player: EntityId) -> u32 {
    ctx.get::<i64>(player, props::HELD_GENERATION)
        .unwrap_or(0)
        .max(0) as u32
}

/// Lets go of whatever the player carries.
fn drop_held_flag(ctx: &mut SimContext, player: EntityId) {
    let Some(held) = held_flag(ctx, player) else {
        return;
    };
    let generation = held_generation(ctx, player);
    ctx.set(player, props::HELD_FLAG, None::<EntityId>);
    release(ctx, held, generation);
}

fn release(ctx: &mut SimContext, flag: EntityId, generation: u32) {
    if ctx.world.is_authority(flag) {
        flag::on_drop(ctx, flag, Some(generation));
    } else {
        ctx.send(
            flag,
            Rpc::DropFlag {
                generation: Some(generation),
            },
        );
    }
}

fn explode(ctx: &mut SimContext, player: EntityId) {
    let timer = TickTimer::from_seconds(ctx.clock(), ctx.config.explosion_cooldown_secs);
    ctx.set(player, props::EXPLODED, true);
    ctx.set(player, props::EXPLOSION_TIMER, timer);
    ctx.set(player, props::ATTACKING, false);
    drop_held_flag(ctx, player);
    info!("{} exploded", player);
}

pub fn step(ctx: &mut SimContext, player: EntityId) {
    let is_master = ctx
        .game_manager()
        .map_or(false, |manager| ctx.world.is_authority(manager));
    ctx.set(player, props::IS_MASTER, is_master);

    if ctx.get::<bool>(player, props::EXPLODED).unwrap_or(false) {
        step_exploded(ctx, player);
        return;
    }

    let phase = ctx.phase();
    let dt = ctx.dt();
    let input = ctx.input;

    let mut position = ctx
        .get::<[f32; 3]>(player, props::POSITION)
        .unwrap_or_default();
    for axis in 0..3 {
        position[axis] += input.movement[axis] * ctx.config.run_speed * dt;
    }
    ctx.set(player, props::POSITION, position);

    // One broadcast per press; holding the button does not repeat it.
    let was_attacking = ctx.get::<bool>(player, props::ATTACKING).unwrap_or(false);
    ctx.set(player, props::ATTACKING, input.attack);
    if input.attack && !was_attacking {
        ctx.send(
            player,
            Rpc::Attack {
                origin: position,
                direction: input.look,
            },
        );
    }

    if input.hazard || position[1] < ctx.config.fall_limit {
        explode(ctx, player);
        return;
    }

    let at_home = home(ctx, player)
        .map_or(false, |home| distance(home, position) <= ctx.config.proximity_radius);
    ctx.set(
        player,
        props::ON_START_POINT,
        at_home && phase != GamePhase::Results,
    );

    if phase != GamePhase::Active {
        return;
    }

    match held_flag(ctx, player) {
        Some(held) if at_home => deposit(ctx, player, held),
        Some(_) => {}
        None => {
            if let Some(touched) = input.contacts.first().copied() {
                claim(ctx, player, touched);
            }
        }
    }
}

fn step_exploded(ctx: &mut SimContext, player: EntityId) {
    drop_held_flag(ctx, player);

    let timer = ctx
        .get::<TickTimer>(player, props::EXPLOSION_TIMER)
        .unwrap_or_default();
    let remaining = timer.remaining_time(ctx.clock());
    if remaining.map_or(true, |secs| secs < TELEPORT_LEAD_SECS) {
        if let Some(home) = home(ctx, player) {
            ctx.set(player, props::POSITION, home);
        }
    }

    if !timer.is_running(ctx.clock()) {
        ctx.set(player, props::EXPLODED, false);
        ctx.set(player, props::EXPLOSION_TIMER, TickTimer::NONE);
        debug!("{} recovered", player);
    }
}

fn deposit(ctx: &mut SimContext, player: EntityId, flag: EntityId) {
    let generation = held_generation(ctx, player);
    let score = ctx.get::<i64>(player, props::SCORE).unwrap_or(0) + 1;
    ctx.set(player, props::SCORE, score);
    ctx.set(player, props::HELD_FLAG, None::<EntityId>);
    info!("{} brought {} home, score {}", player, flag, score);

    if ctx.world.is_authority(flag) {
        flag::on_deposit(ctx, flag, player, generation);
    } else {
        ctx.send(flag, Rpc::DepositFlag { player, generation });
    }
}

fn claim(ctx: &mut SimContext, player: EntityId, flag: EntityId) {
    if ctx.world.kind(flag) != Some(shared::EntityKind::Flag) {
        return;
    }
    if ctx.world.is_authority(flag) {
        flag::on_claim(ctx, flag, player);
        return;
    }

    let authoritative = flag::authoritative_claim(ctx.world, flag);
    let timeout = ctx.config.prediction_timeout_secs;
    let prediction = ctx
        .local
        .predictions
        .entry(flag)
        .or_insert_with(|| Predicted::new(timeout));
    if prediction.is_active() || prediction.resolve(&authoritative).state != CaptureState::Free {
        return;
    }

    prediction.predict(FlagClaim {
        state: CaptureState::Held,
        holder: Some(player),
    });
    ctx.send(flag, Rpc::ClaimFlag { player });
    debug!("{} claims {}", player, flag);
}

pub fn on_assign_starting_point(ctx: &mut SimContext, player: EntityId, index: u8) {
    ctx.set(player, props::START_INDEX, index as i64);
    if let Some(point) = ctx.config.start_point(index as usize) {
        ctx.set(player, props::POSITION, point);
    }
    info!("{} assigned start point {}", player, index);
}

/// The flag's authority granted a claim.
pub fn on_collect_flag(ctx: &mut SimContext, player: EntityId, flag: EntityId, generation: u32) {
    if let Some(seen) = ctx.local.collected.get(&flag).copied() {
        if generation <= seen {
            debug!(
                "{} already collected {} at generation {} (latest {})",
                player, flag, generation, seen
            );
            return;
        }
    }
    ctx.local.collected.insert(flag, generation);

    let exploded = ctx.get::<bool>(player, props::EXPLODED).unwrap_or(false);
    let holding_other = held_flag(ctx, player).map_or(false, |held| held != flag);
    if exploded || holding_other {
        debug!("{} cannot take {}, dropping it", player, flag);
        release(ctx, flag, generation);
        return;
    }

    ctx.set(player, props::HELD_FLAG, flag);
    ctx.set(player, props::HELD_GENERATION, generation as i64);
    info!("{} holds {}", player, flag);
}

pub fn on_attack(ctx: &mut SimContext, player: EntityId, origin: [f32; 3], direction: [f32; 3]) {
    ctx.local.events.push(PresentationEvent::Attack {
        player,
        origin,
        direction,
    });
}
