//! Game vocabulary shared by the session host and every peer

use crate::ids::EntityId;
use serde::{Deserialize, Serialize};

/// Phase of the session-wide state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GamePhase {
    /// Waiting for every player to stand on their start point.
    #[default]
    Waiting,
    /// Match running.
    Active,
    /// Short grace period after the match timer ran out.
    Ending,
    /// Final standings on display.
    Results,
}

impl GamePhase {
    /// Successor in the `Waiting → Active → Ending → Results → Waiting` cycle.
    pub fn next(self) -> Self {
        match self {
            GamePhase::Waiting => GamePhase::Active,
            GamePhase::Active => GamePhase::Ending,
            GamePhase::Ending => GamePhase::Results,
            GamePhase::Results => GamePhase::Waiting,
        }
    }
}

/// Replicated state of a capturable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CaptureState {
    #[default]
    Free,
    Held,
    Deposited,
    Resetting,
}

/// One row of the final results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub player: EntityId,
    pub name: String,
    pub score: i64,
    pub winner: bool,
}

/// Orders players by score and marks everyone sharing the top score as a winner.
///
/// Ties are not broken: several players can win the same round.
pub fn compute_standings(players: &[(EntityId, String, i64)]) -> Vec<Standing> {
    let high_score = players.iter().map(|(_, _, score)| *score).max();

    let mut standings: Vec<Standing> = players
        .iter()
        .map(|(player, name, score)| Standing {
            player: *player,
            name: name.clone(),
            score: *score,
            winner: Some(*score) == high_score,
        })
        .collect();

    standings.sort_by(|a, b| b.score.cmp(&a.score).then(a.player.cmp(&b.player)));
    standings
}

/// Replicated property names.
pub mod props {
    // Game manager
    pub const PHASE: &str = "phase";
    pub const MATCH_TIMER: &str = "match_timer";
    pub const COUNTDOWN_TIMER: &str = "countdown_timer";
    pub const READY_COUNT: &str = "ready_count";
    pub const TOTAL_COUNT: &str = "total_count";
    pub const ALL_READY: &str = "all_ready";
    pub const SLOTS: &str = "slots";
    pub const STANDINGS: &str = "standings";

    // Course
    pub const DIRECTION: &str = "direction";
    pub const IN_GAME: &str = "in_game";
    pub const HEIGHT: &str = "height";
    pub const SEGMENTS: &str = "segments";
    pub const FLAG: &str = "flag";
    pub const LAYOUT_INDEX: &str = "layout_index";

    // Flag
    pub const CAPTURE: &str = "capture";
    pub const HOLDER: &str = "holder";
    pub const GENERATION: &str = "generation";
    pub const COURSE: &str = "course";

    // Obstacle, plus POSITION and LAYOUT_INDEX
    pub const OSCILLATION: &str = "oscillation";

    // Player
    pub const NAME: &str = "name";
    pub const START_INDEX: &str = "start_index";
    pub const POSITION: &str = "position";
    pub const ON_START_POINT: &str = "on_start_point";
    pub const HELD_FLAG: &str = "held_flag";
    pub const HELD_GENERATION: &str = "held_generation";
    pub const SCORE: &str = "score";
    pub const IS_WINNER: &str = "is_winner";
    pub const IS_MASTER: &str = "is_master";
    pub const EXPLODED: &str = "exploded";
    pub const EXPLOSION_TIMER: &str = "explosion_timer";
    pub const ATTACKING: &str = "attacking";
}
