//! Swinging hazards that move on a sine curve between two points

use super::SimContext;
use shared::config::ObstacleLayout;
use shared::{props, EntityId};
use std::f32::consts::TAU;

fn layout<'a>(ctx: &SimContext<'a>, obstacle: EntityId) -> Option<&'a ObstacleLayout> {
    let index = ctx.get::<i64>(obstacle, props::LAYOUT_INDEX)?;
    let config = ctx.config;
    usize::try_from(index)
        .ok()
        .and_then(|index| config.layout.obstacles.get(index))
}

/// Advances the replicated phase and moves the obstacle along its path.
///
/// The phase lives in the entity, so whoever holds authority next picks up
/// where the last owner stopped.
pub fn step(ctx: &mut SimContext, obstacle: EntityId) {
    let Some(layout) = layout(ctx, obstacle) else {
        return;
    };
    let phase = ctx.get::<f32>(obstacle, props::OSCILLATION).unwrap_or(0.0);
    let phase = (phase + ctx.dt() * layout.rate).rem_euclid(TAU);

    ctx.set(obstacle, props::OSCILLATION, phase);
    ctx.set(obstacle, props::POSITION, layout.position_at(phase));
}
