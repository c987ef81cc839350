//! Flag capture, run by the flag's authority

use super::SimContext;
use log::{debug, info};
use shared::{props, CaptureState, EntityId, GamePhase, Rpc, World};

/// What a flag looks like from the capture protocol's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagClaim {
    pub state: CaptureState,
    pub holder: Option<EntityId>,
}

/// The replicated claim, ignoring any local prediction.
pub fn authoritative_claim(world: &World, flag: EntityId) -> FlagClaim {
    FlagClaim {
        state: world.get(flag, props::CAPTURE).unwrap_or_default(),
        holder: world.get::<Option<EntityId>>(flag, props::HOLDER).flatten(),
    }
}

fn generation(ctx: &SimContext, flag: EntityId) -> u32 {
    ctx.get::<i64>(flag, props::GENERATION).unwrap_or(0).max(0) as u32
}

pub fn step(ctx: &mut SimContext, flag: EntityId) {
    let claim = authoritative_claim(ctx.world, flag);

    if claim.state == CaptureState::Held {
        match claim.holder {
            Some(holder) if ctx.world.contains(holder) => {
                if let Some(position) = ctx.get::<[f32; 3]>(holder, props::POSITION) {
                    ctx.set(flag, props::POSITION, position);
                }
                return;
            }
            _ => {
                info!("Holder of {} is gone, freeing it", flag);
                ctx.set(flag, props::CAPTURE, CaptureState::Free);
                ctx.set(flag, props::HOLDER, None::<EntityId>);
            }
        }
    }

    let course = ctx.get::<Option<EntityId>>(flag, props::COURSE).flatten();
    let Some(course) = course else {
        return;
    };
    let layout_index = ctx.get::<i64>(course, props::LAYOUT_INDEX).unwrap_or(0).max(0) as usize;
    let Some(layout) = ctx.config.layout.courses.get(layout_index) else {
        return;
    };
    let height = ctx.get::<f32>(course, props::HEIGHT).unwrap_or(0.0);

    let mut position = layout.flag_position;
    position[1] += height;
    ctx.set(flag, props::POSITION, position);
}

/// A player touched the flag. Only a free flag can be taken.
pub fn on_claim(ctx: &mut SimContext, flag: EntityId, player: EntityId) {
    if ctx.phase() != GamePhase::Active {
        debug!("Claim on {} by {} outside of a match ignored", flag, player);
        return;
    }
    if !ctx.world.contains(player) {
        debug!("Claim on {} by unknown {} ignored", flag, player);
        return;
    }

    let claim = authoritative_claim(ctx.world, flag);
    if claim.state != CaptureState::Free {
        debug!(
            "Claim on {} by {} refused: {:?} by {:?}",
            flag, player, claim.state, claim.holder
        );
        return;
    }

    let generation = generation(ctx, flag) + 1;
    ctx.set(flag, props::CAPTURE, CaptureState::Held);
    ctx.set(flag, props::HOLDER, player);
    ctx.set(flag, props::GENERATION, generation as i64);
    info!("{} captured {} (generation {})", player, flag, generation);

    ctx.send(player, Rpc::CollectFlag { flag, generation });
}

/// The holder brought the flag home. Anything stale is a duplicate.
pub fn on_deposit(ctx: &mut SimContext, flag: EntityId, player: EntityId, generation: u32) {
    let claim = authoritative_claim(ctx.world, flag);
    let current = self::generation(ctx, flag);

    if claim.state != CaptureState::Held || claim.holder != Some(player) || current != generation
    {
        debug!(
            "Ignoring deposit of {} by {} at generation {} (flag is {:?}, generation {})",
            flag, player, generation, claim.state, current
        );
        return;
    }

    ctx.set(flag, props::CAPTURE, CaptureState::Deposited);
    ctx.set(flag, props::HOLDER, None::<EntityId>);
    info!("{} deposited {}", player, flag);
}

/// Forces the flag back to free, unless the drop names an older capture.
pub fn on_drop(ctx: &mut SimContext, flag: EntityId, generation: Option<u32>) {
    if let Some(generation) = generation {
        let current = self::generation(ctx, flag);
        if current != generation {
            debug!(
                "Ignoring drop of {} for generation {} (now {})",
                flag, generation, current
            );
            return;
        }
    }

    let changed = ctx.set(flag, props::CAPTURE, CaptureState::Free);
    ctx.set(flag, props::HOLDER, None::<EntityId>);
    if changed {
        info!("{} dropped", flag);
    }
}

pub fn on_reset(ctx: &mut SimContext, flag: EntityId, state: CaptureState) {
    ctx.set(flag, props::CAPTURE, state);
    if state != CaptureState::Held {
        ctx.set(flag, props::HOLDER, None::<EntityId>);
    }
}
