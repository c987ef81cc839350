//! Input sources producing one frame of player intent per tick
//!
//! Input capture devices live outside this crate. Anything that can produce
//! an [`InputFrame`] per tick plugs in through [`InputSource`]; the stock
//! binary ships a headless [`BotInput`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::value::distance;
use shared::{props, CaptureState, EntityId, EntityKind, GamePhase, SessionConfig, World};

/// What the local player wants to do this tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputFrame {
    /// Desired velocity as a fraction of the run speed, per axis.
    pub movement: [f32; 3],
    /// Facing direction, used as the attack direction.
    pub look: [f32; 3],
    pub attack: bool,
    /// Touched something that explodes the player.
    pub hazard: bool,
    /// Flags the player collided with this tick.
    pub contacts: Vec<EntityId>,
}

impl InputFrame {
    pub fn idle() -> Self {
        Self::default()
    }
}

pub trait InputSource {
    fn next_frame(&mut self, world: &World, config: &SessionConfig) -> InputFrame;
}

/// Never does anything.
pub struct IdleInput;

impl InputSource for IdleInput {
    fn next_frame(&mut self, _world: &World, _config: &SessionConfig) -> InputFrame {
        InputFrame::idle()
    }
}

/// Flags close enough to `position` to count as touched.
pub fn flags_in_reach(world: &World, position: [f32; 3], reach: f32) -> Vec<EntityId> {
    world
        .entities_of(EntityKind::Flag)
        .into_iter()
        .filter(|flag| {
            world
                .get::<[f32; 3]>(*flag, props::POSITION)
                .map_or(false, |at| distance(at, position) <= reach)
        })
        .collect()
}

/// Headless player: stands on its start point while waiting, runs for free
/// flags during a match and brings them home.
pub struct BotInput {
    rng: StdRng,
    attack_chance: f64,
}

impl BotInput {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            attack_chance: 0.01,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            attack_chance: 0.01,
        }
    }

    fn nearest_free_flag(world: &World, position: [f32; 3]) -> Option<[f32; 3]> {
        world
            .entities_of(EntityKind::Flag)
            .into_iter()
            .filter(|flag| {
                world.get::<CaptureState>(*flag, props::CAPTURE) == Some(CaptureState::Free)
            })
            .filter_map(|flag| world.get::<[f32; 3]>(flag, props::POSITION))
            .min_by(|a, b| {
                distance(*a, position)
                    .partial_cmp(&distance(*b, position))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

impl Default for BotInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for BotInput {
    fn next_frame(&mut self, world: &World, config: &SessionConfig) -> InputFrame {
        let Some(player) = world.local_player() else {
            return InputFrame::idle();
        };
        let position = world
            .get::<[f32; 3]>(player, props::POSITION)
            .unwrap_or_default();
        let home = world
            .get::<i64>(player, props::START_INDEX)
            .filter(|index| *index >= 0)
            .and_then(|index| config.start_point(index as usize));
        let phase = world
            .first_of(EntityKind::GameManager)
            .and_then(|manager| world.get::<GamePhase>(manager, props::PHASE))
            .unwrap_or_default();
        let holding = world
            .get::<Option<EntityId>>(player, props::HELD_FLAG)
            .flatten()
            .is_some();

        let target = match phase {
            GamePhase::Active if !holding => Self::nearest_free_flag(world, position).or(home),
            _ => home,
        };

        let mut frame = InputFrame::idle();
        if let Some(target) = target {
            let offset = [
                target[0] - position[0],
                0.0,
                target[2] - position[2],
            ];
            let length = distance(offset, [0.0; 3]);
            let step = config.run_speed / config.tick_rate.max(1) as f32;
            if length > f32::EPSILON {
                let scale = (length / step).min(1.0) / length;
                frame.movement = [offset[0] * scale, 0.0, offset[2] * scale];
                frame.look = [offset[0] / length, 0.0, offset[2] / length];
            }
        }

        frame.contacts = flags_in_reach(world, position, config.proximity_radius);
        frame.attack = phase == GamePhase::Active && self.rng.gen_bool(self.attack_chance);
        frame
    }
}
