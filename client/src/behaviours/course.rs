//! Obstacle courses: raise for a match, sink to reset their flag

use super::{flag, SimContext};
use log::info;
use shared::config::CourseLayout;
use shared::{props, CaptureState, CourseCommand, EntityId, Rpc};

const IDLE: i64 = 0;
const ASCEND: i64 = 1;
const DESCEND: i64 = -1;
const FAST_DESCEND: i64 = -2;

fn layout(ctx: &SimContext, course: EntityId) -> Option<CourseLayout> {
    let index = ctx.get::<i64>(course, props::LAYOUT_INDEX).unwrap_or(0).max(0) as usize;
    ctx.config.layout.courses.get(index).cloned()
}

/// Sets the state of the course's flag, directly if this peer owns it.
fn set_flag_state(ctx: &mut SimContext, flag: EntityId, state: CaptureState) {
    if ctx.world.is_authority(flag) {
        flag::on_reset(ctx, flag, state);
    } else {
        ctx.send(flag, Rpc::ResetFlag { state });
    }
}

pub fn step(ctx: &mut SimContext, course: EntityId) {
    let Some(layout) = layout(ctx, course) else {
        return;
    };
    let direction = ctx.get::<i64>(course, props::DIRECTION).unwrap_or(IDLE);
    let height = ctx.get::<f32>(course, props::HEIGHT).unwrap_or(0.0);
    let flag = ctx.get::<Option<EntityId>>(course, props::FLAG).flatten();
    let dt = ctx.dt();

    if direction == IDLE {
        let deposited = flag
            .and_then(|flag| ctx.get::<CaptureState>(flag, props::CAPTURE))
            .map_or(false, |state| state == CaptureState::Deposited);
        if let (true, Some(flag)) = (deposited, flag) {
            info!("{} lowering to reset {}", course, flag);
            ctx.set(course, props::DIRECTION, DESCEND);
            set_flag_state(ctx, flag, CaptureState::Resetting);
        }
    } else if direction < IDLE {
        let lowered = height - layout.reset_speed * direction.unsigned_abs() as f32 * dt;
        if lowered > layout.lower_limit {
            ctx.set(course, props::HEIGHT, lowered);
            return;
        }

        ctx.set(course, props::HEIGHT, layout.lower_limit);
        if let Some(flag) = flag {
            set_flag_state(ctx, flag, CaptureState::Free);
        }
        if ctx.get::<bool>(course, props::IN_GAME).unwrap_or(false) {
            let segments = layout.roll_segments(&mut *ctx.rng);
            ctx.set(course, props::SEGMENTS, segments);
            ctx.set(course, props::DIRECTION, ASCEND);
        } else {
            ctx.set(course, props::DIRECTION, IDLE);
        }
    } else {
        let raised = height + layout.reset_speed * dt;
        if raised >= 0.0 {
            ctx.set(course, props::HEIGHT, 0.0f32);
            ctx.set(course, props::DIRECTION, IDLE);
        } else {
            ctx.set(course, props::HEIGHT, raised);
        }
    }
}

pub fn on_command(ctx: &mut SimContext, course: EntityId, command: CourseCommand) {
    match command {
        CourseCommand::StartGame => {
            ctx.set(course, props::IN_GAME, true);
            ctx.set(course, props::DIRECTION, ASCEND);
        }
        CourseCommand::EndGame => {
            ctx.set(course, props::IN_GAME, false);
            ctx.set(course, props::DIRECTION, FAST_DESCEND);
        }
    }
    info!("{} received {:?}", course, command);
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn run(fixture: &mut Fixture, course: EntityId, ticks: u32) {
        for _ in 0..ticks {
            fixture.advance(1);
            step(&mut fixture.ctx(), course);
        }
    }

    #[test]
    fn test_start_game_raises_course() {
        let mut fixture = Fixture::new();
        let (course, _) = fixture.spawn_course(ME);

        on_command(&mut fixture.ctx(), course, CourseCommand::StartGame);
        assert_eq!(fixture.world.get::<bool>(course, props::IN_GAME), Some(true));

        // Three seconds at ten ticks per second, plus one for rounding.
        run(&mut fixture, course, 31);
        assert_approx_eq!(fixture.world.get::<f32>(course, props::HEIGHT).unwrap(), 0.0, 1e-6);
        assert_eq!(fixture.world.get::<i64>(course, props::DIRECTION), Some(IDLE));
    }

    #[test]
    fn test_deposited_flag_is_reset_and_course_rerolled() {
        let mut fixture = Fixture::new();
        let (course, flag) = fixture.spawn_course(ME);
        fixture.world.overwrite(course, props::HEIGHT, 0.0f32).unwrap();
        fixture.world.overwrite(course, props::IN_GAME, true).unwrap();
        fixture.world.overwrite(flag, props::CAPTURE, CaptureState::Deposited).unwrap();

        run(&mut fixture, course, 1);
        assert_eq!(fixture.world.get::<i64>(course, props::DIRECTION), Some(DESCEND));
        assert_eq!(
            fixture.world.get::<CaptureState>(flag, props::CAPTURE),
            Some(CaptureState::Resetting)
        );

        run(&mut fixture, course, 32);
        assert_eq!(
            fixture.world.get::<CaptureState>(flag, props::CAPTURE),
            Some(CaptureState::Free)
        );
        assert_eq!(fixture.world.get::<i64>(course, props::DIRECTION), Some(ASCEND));
        assert_eq!(
            fixture.world.get::<Vec<u8>>(course, props::SEGMENTS).map(|s| s.len()),
            Some(3)
        );
    }

    #[test]
    fn test_end_game_parks_course() {
        let mut fixture = Fixture::new();
        let (course, flag) = fixture.spawn_course(ME);
        fixture.world.overwrite(course, props::HEIGHT, 0.0f32).unwrap();
        fixture.world.overwrite(flag, props::CAPTURE, CaptureState::Held).unwrap();

        on_command(&mut fixture.ctx(), course, CourseCommand::EndGame);
        run(&mut fixture, course, 16);

        assert_approx_eq!(fixture.world.get::<f32>(course, props::HEIGHT).unwrap(), -6.0, 1e-6);
        assert_eq!(fixture.world.get::<i64>(course, props::DIRECTION), Some(IDLE));
        assert_eq!(
            fixture.world.get::<CaptureState>(flag, props::CAPTURE),
            Some(CaptureState::Free)
        );
    }

    #[test]
    fn test_flag_owned_elsewhere_is_reset_by_message() {
        let mut fixture = Fixture::new();
        let (course, flag) = fixture.spawn_course(ME);
        fixture.world.assign(flag, Some(OTHER)).unwrap();
        fixture.world.overwrite(flag, props::CAPTURE, CaptureState::Deposited).unwrap();

        run(&mut fixture, course, 1);
        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, flag);
        assert_eq!(
            sent[0].rpc,
            Rpc::ResetFlag {
                state: CaptureState::Resetting
            }
        );
    }
}
