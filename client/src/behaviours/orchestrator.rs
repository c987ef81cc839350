//! Session-wide game phases, run by whichever peer owns the game manager
//!
//! The phase machine cycles `Waiting → Active → Ending → Results → Waiting`.
//! Every transition is derived from replicated counters and timers, so a
//! peer that inherits the game manager mid-phase carries on where the
//! previous owner stopped.

use super::{course, SimContext};
use log::{info, warn};
use shared::config::MAX_START_POINTS;
use shared::game::compute_standings;
use shared::{
    props, CourseCommand, EntityId, EntityKind, GamePhase, Rpc, Standing, TickTimer,
};

pub fn step(ctx: &mut SimContext, manager: EntityId) {
    let phase = ctx.get::<GamePhase>(manager, props::PHASE).unwrap_or_default();
    match phase {
        GamePhase::Waiting => step_waiting(ctx, manager),
        GamePhase::Active => {
            if timer_expired(ctx, manager, props::MATCH_TIMER) {
                let secs = ctx.config.end_game_secs;
                enter(ctx, manager, GamePhase::Ending, secs);
                command_courses(ctx, CourseCommand::EndGame);
            }
        }
        GamePhase::Ending => {
            if timer_expired(ctx, manager, props::MATCH_TIMER) {
                let secs = ctx.config.results_secs;
                enter(ctx, manager, GamePhase::Results, secs);
                let standings = standings(ctx);
                for standing in standings.iter().filter(|standing| standing.winner) {
                    info!("{} wins with {}", standing.name, standing.score);
                }
                ctx.set(manager, props::STANDINGS, standings);
            }
        }
        GamePhase::Results => {
            if timer_expired(ctx, manager, props::MATCH_TIMER) {
                ctx.set(manager, props::PHASE, GamePhase::Waiting);
                ctx.set(manager, props::MATCH_TIMER, TickTimer::NONE);
                ctx.set(manager, props::STANDINGS, Vec::<Standing>::new());
                info!("Phase: Results -> Waiting");
            }
        }
    }
}

fn timer_expired(ctx: &SimContext, manager: EntityId, name: &str) -> bool {
    ctx.get::<TickTimer>(manager, name)
        .map_or(false, |timer| timer.expired(ctx.clock()))
}

fn enter(ctx: &mut SimContext, manager: EntityId, phase: GamePhase, secs: f32) {
    let previous = ctx.get::<GamePhase>(manager, props::PHASE).unwrap_or_default();
    let timer = TickTimer::from_seconds(ctx.clock(), secs);
    ctx.set(manager, props::PHASE, phase);
    ctx.set(manager, props::MATCH_TIMER, timer);
    info!("Phase: {:?} -> {:?} at tick {}", previous, phase, ctx.clock().tick());
}

fn step_waiting(ctx: &mut SimContext, manager: EntityId) {
    let players = ctx.world.entities_of(EntityKind::Player);
    let total = players.len() as i64;
    let ready = players
        .iter()
        .filter(|player| ctx.get::<bool>(**player, props::ON_START_POINT).unwrap_or(false))
        .count() as i64;

    ctx.set(manager, props::READY_COUNT, ready);
    ctx.set(manager, props::TOTAL_COUNT, total);

    let armed = ctx.get::<bool>(manager, props::ALL_READY).unwrap_or(false);
    let everyone_ready = total > 0 && ready == total;

    if everyone_ready && !armed {
        let countdown = TickTimer::from_seconds(ctx.clock(), ctx.config.countdown_secs);
        ctx.set(manager, props::ALL_READY, true);
        ctx.set(manager, props::COUNTDOWN_TIMER, countdown);
        info!("All {} players ready, countdown started", total);
    } else if everyone_ready && timer_expired(ctx, manager, props::COUNTDOWN_TIMER) {
        start_match(ctx, manager);
    } else if !everyone_ready && armed {
        ctx.set(manager, props::ALL_READY, false);
        ctx.set(manager, props::COUNTDOWN_TIMER, TickTimer::NONE);
        info!("Countdown cancelled ({}/{} ready)", ready, total);
    }
}

fn start_match(ctx: &mut SimContext, manager: EntityId) {
    let secs = ctx.config.match_secs;
    enter(ctx, manager, GamePhase::Active, secs);
    ctx.set(manager, props::READY_COUNT, 0i64);
    ctx.set(manager, props::TOTAL_COUNT, 0i64);
    ctx.set(manager, props::ALL_READY, false);
    ctx.set(manager, props::COUNTDOWN_TIMER, TickTimer::NONE);
    command_courses(ctx, CourseCommand::StartGame);
}

/// Runs a course hook directly when this peer owns the course, remotely otherwise.
fn command_courses(ctx: &mut SimContext, command: CourseCommand) {
    for course in ctx.world.entities_of(EntityKind::Course) {
        if ctx.world.is_authority(course) {
            course::on_command(ctx, course, command);
        } else {
            ctx.send(course, Rpc::Course(command));
        }
    }
}

fn standings(ctx: &SimContext) -> Vec<Standing> {
    let players: Vec<(EntityId, String, i64)> = ctx
        .world
        .entities_of(EntityKind::Player)
        .into_iter()
        .map(|player| {
            (
                player,
                ctx.get::<String>(player, props::NAME).unwrap_or_default(),
                ctx.get::<i64>(player, props::SCORE).unwrap_or(0),
            )
        })
        .collect();
    compute_standings(&players)
}

/// Seats a player. A player that already has a slot gets the same one again.
pub fn on_player_joined(ctx: &mut SimContext, manager: EntityId, player: EntityId) {
    if ctx.world.kind(player) != Some(EntityKind::Player) {
        warn!("PlayerJoined for {} which is not a player", player);
        return;
    }

    let max_players = ctx.config.max_players;
    let mut slots = ctx
        .get::<Vec<Option<EntityId>>>(manager, props::SLOTS)
        .unwrap_or_default();
    slots.resize(max_players, None);

    let index = match slots.iter().position(|slot| *slot == Some(player)) {
        Some(index) => index,
        None => {
            let free = slots.iter().take(MAX_START_POINTS).position(|slot| match slot {
                None => true,
                Some(seated) => ctx.world.kind(*seated) != Some(EntityKind::Player),
            });
            let Some(index) = free else {
                warn!("No free start slot for {}", player);
                return;
            };
            slots[index] = Some(player);
            ctx.set(manager, props::SLOTS, slots);
            info!("Seated {} at slot {}", player, index);
            index
        }
    };

    let Ok(index) = u8::try_from(index) else {
        warn!("Slot {} of {} has no addressable start point", index, player);
        return;
    };
    ctx.send(player, Rpc::AssignStartingPoint { index });
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn ready_players(fixture: &mut Fixture, count: usize) -> Vec<EntityId> {
        (0..count)
            .map(|i| {
                let player = fixture.spawn_player(OTHER, i as i64);
                fixture.world.overwrite(player, props::ON_START_POINT, true).unwrap();
                player
            })
            .collect()
    }

    fn run(fixture: &mut Fixture, manager: EntityId, ticks: u32) {
        for _ in 0..ticks {
            fixture.advance(1);
            step(&mut fixture.ctx(), manager);
        }
    }

    fn phase(fixture: &Fixture, manager: EntityId) -> GamePhase {
        fixture.world.get(manager, props::PHASE).unwrap()
    }

    #[test]
    fn test_countdown_runs_full_length_before_start() {
        let mut fixture = Fixture::new();
        let manager = fixture.spawn_manager(ME);
        fixture.spawn_course(OTHER);
        ready_players(&mut fixture, 3);

        run(&mut fixture, manager, 1);
        assert_eq!(fixture.world.get::<bool>(manager, props::ALL_READY), Some(true));
        assert_eq!(fixture.world.get::<i64>(manager, props::READY_COUNT), Some(3));

        // Countdown of three seconds at ten ticks per second.
        run(&mut fixture, manager, 29);
        assert_eq!(phase(&fixture, manager), GamePhase::Waiting);

        run(&mut fixture, manager, 1);
        assert_eq!(phase(&fixture, manager), GamePhase::Active);
        assert_eq!(fixture.world.get::<bool>(manager, props::ALL_READY), Some(false));
        assert_eq!(
            fixture.world.get::<TickTimer>(manager, props::COUNTDOWN_TIMER),
            Some(TickTimer::NONE)
        );

        let sent = fixture.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].rpc, Rpc::Course(CourseCommand::StartGame));
    }

    #[test]
    fn test_readiness_drop_cancels_countdown() {
        let mut fixture = Fixture::new();
        let manager = fixture.spawn_manager(ME);
        let players = ready_players(&mut fixture, 3);

        run(&mut fixture, manager, 10);
        fixture
            .world
            .overwrite(players[1], props::ON_START_POINT, false)
            .unwrap();
        run(&mut fixture, manager, 1);
        assert_eq!(fixture.world.get::<bool>(manager, props::ALL_READY), Some(false));
        assert_eq!(
            fixture.world.get::<TickTimer>(manager, props::COUNTDOWN_TIMER),
            Some(TickTimer::NONE)
        );

        fixture
            .world
            .overwrite(players[1], props::ON_START_POINT, true)
            .unwrap();
        run(&mut fixture, manager, 25);
        assert_eq!(phase(&fixture, manager), GamePhase::Waiting);
    }

    #[test]
    fn test_no_players_never_ready() {
        let mut fixture = Fixture::new();
        let manager = fixture.spawn_manager(ME);
        run(&mut fixture, manager, 100);
        assert_eq!(phase(&fixture, manager), GamePhase::Waiting);
        assert_eq!(fixture.world.get::<bool>(manager, props::ALL_READY), Some(false));
    }

    #[test]
    fn test_full_cycle_with_tied_winners() {
        let mut fixture = Fixture::new();
        fixture.config.countdown_secs = 0.0;
        fixture.config.match_secs = 1.0;
        fixture.config.end_game_secs = 0.5;
        fixture.config.results_secs = 0.5;
        let manager = fixture.spawn_manager(ME);
        let (course, _) = fixture.spawn_course(ME);
        let players = ready_players(&mut fixture, 2);
        for player in &players {
            fixture.world.overwrite(*player, props::SCORE, 3i64).unwrap();
        }

        let mut seen = vec![phase(&fixture, manager)];
        for _ in 0..40 {
            run(&mut fixture, manager, 1);
            let current = phase(&fixture, manager);
            if seen.last() != Some(&current) {
                seen.push(current);
            }
            if current == GamePhase::Results {
                let standings: Vec<Standing> =
                    fixture.world.get(manager, props::STANDINGS).unwrap();
                assert!(standings.iter().all(|standing| standing.winner));
            }
            if current == GamePhase::Waiting && seen.len() > 1 {
                break;
            }
        }

        assert_eq!(
            seen,
            vec![
                GamePhase::Waiting,
                GamePhase::Active,
                GamePhase::Ending,
                GamePhase::Results,
                GamePhase::Waiting
            ]
        );
        assert_eq!(fixture.world.get::<bool>(course, props::IN_GAME), Some(false));
        assert_eq!(
            fixture.world.get::<Vec<Standing>>(manager, props::STANDINGS),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_player_joined_seats_and_reseats() {
        let mut fixture = Fixture::new();
        let manager = fixture.spawn_manager(ME);
        let first = fixture.spawn_player(OTHER, -1);
        let second = fixture.spawn_player(OTHER, -1);

        on_player_joined(&mut fixture.ctx(), manager, first);
        on_player_joined(&mut fixture.ctx(), manager, second);
        on_player_joined(&mut fixture.ctx(), manager, first);

        let indices: Vec<Rpc> = fixture.sent().into_iter().map(|e| e.rpc).collect();
        assert_eq!(
            indices,
            vec![
                Rpc::AssignStartingPoint { index: 0 },
                Rpc::AssignStartingPoint { index: 1 },
                Rpc::AssignStartingPoint { index: 0 },
            ]
        );
    }

    #[test]
    fn test_slot_of_departed_player_is_reused() {
        let mut fixture = Fixture::new();
        let manager = fixture.spawn_manager(ME);
        let first = fixture.spawn_player(OTHER, -1);
        let second = fixture.spawn_player(OTHER, -1);
        on_player_joined(&mut fixture.ctx(), manager, first);
        on_player_joined(&mut fixture.ctx(), manager, second);
        fixture.world.despawn(first);
        fixture.sent();

        let third = fixture.spawn_player(OTHER, -1);
        on_player_joined(&mut fixture.ctx(), manager, third);
        let sent = fixture.sent();
        assert_eq!(sent[0].target, third);
        assert_eq!(sent[0].rpc, Rpc::AssignStartingPoint { index: 0 });
    }

    #[test]
    fn test_full_session_has_no_slot() {
        let mut fixture = Fixture::new();
        fixture.config.max_players = 1;
        let manager = fixture.spawn_manager(ME);
        let first = fixture.spawn_player(OTHER, -1);
        let second = fixture.spawn_player(OTHER, -1);

        on_player_joined(&mut fixture.ctx(), manager, first);
        on_player_joined(&mut fixture.ctx(), manager, second);
        assert_eq!(fixture.sent().len(), 1);
    }

    #[test]
    fn test_no_seat_beyond_addressable_start_points() {
        let mut fixture = Fixture::new();
        fixture.config.max_players = MAX_START_POINTS + 1;
        let manager = fixture.spawn_manager(ME);
        let seated = fixture.spawn_player(OTHER, 0);
        fixture
            .world
            .overwrite(manager, props::SLOTS, vec![Some(seated); MAX_START_POINTS])
            .unwrap();

        let late = fixture.spawn_player(OTHER, -1);
        on_player_joined(&mut fixture.ctx(), manager, late);
        assert!(fixture.sent().is_empty());
        let slots = fixture
            .world
            .get::<Vec<Option<EntityId>>>(manager, props::SLOTS)
            .unwrap();
        assert!(!slots.contains(&Some(late)));
    }
}
