//! Session configuration, owned by the host and shipped to every peer on join

use crate::error::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::path::Path;

/// One obstacle course and the flag sitting on top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseLayout {
    pub flag_position: [f32; 3],
    /// Number of interchangeable variants for each segment of the course.
    pub segment_variants: Vec<u8>,
    /// Height change per second while raising or lowering.
    pub reset_speed: f32,
    /// Height at which a lowered course counts as reset.
    pub lower_limit: f32,
}

impl CourseLayout {
    /// Picks a fresh variant for every segment.
    pub fn roll_segments(&self, rng: &mut impl Rng) -> Vec<u8> {
        self.segment_variants
            .iter()
            .map(|variants| rng.gen_range(0..(*variants).max(1)))
            .collect()
    }
}

/// A hazard swinging between two points on a sine curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleLayout {
    pub from: [f32; 3],
    pub to: [f32; 3],
    /// Phase advance in radians per second.
    pub rate: f32,
}

impl ObstacleLayout {
    /// Position at `phase`: `from` at a sine trough, `to` at a crest.
    pub fn position_at(&self, phase: f32) -> [f32; 3] {
        let percent = 0.5 + 0.5 * phase.sin();
        let mut position = [0.0; 3];
        for axis in 0..3 {
            position[axis] = self.from[axis] + (self.to[axis] - self.from[axis]) * percent;
        }
        position
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub start_points: Vec<[f32; 3]>,
    pub courses: Vec<CourseLayout>,
    pub obstacles: Vec<ObstacleLayout>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            start_points: ring(8, 10.0),
            courses: ring(4, 25.0)
                .into_iter()
                .map(|flag_position| CourseLayout {
                    flag_position,
                    segment_variants: vec![3, 3, 3],
                    reset_speed: 2.0,
                    lower_limit: -6.0,
                })
                .collect(),
            // One sweeper across the gap between each pair of neighbouring courses.
            obstacles: ring(4, 18.0)
                .into_iter()
                .zip(ring(4, 18.0).into_iter().cycle().skip(1))
                .map(|(from, to)| ObstacleLayout {
                    from: [from[0], 1.0, from[2]],
                    to: [to[0], 1.0, to[2]],
                    rate: 1.5,
                })
                .collect(),
        }
    }
}

/// `count` points evenly spaced on a ground-level circle.
fn ring(count: usize, radius: f32) -> Vec<[f32; 3]> {
    (0..count)
        .map(|i| {
            let angle = TAU * i as f32 / count as f32;
            [radius * angle.cos(), 0.0, radius * angle.sin()]
        })
        .collect()
}

/// Start points are addressed by a `u8` index on the wire.
pub const MAX_START_POINTS: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_rate: u32,
    pub countdown_secs: f32,
    pub match_secs: f32,
    pub end_game_secs: f32,
    pub results_secs: f32,
    pub proximity_radius: f32,
    pub max_players: usize,
    pub prediction_timeout_secs: f32,
    pub explosion_cooldown_secs: f32,
    pub run_speed: f32,
    pub fall_limit: f32,
    pub reliable_resend_ticks: u32,
    pub peer_timeout_secs: f32,
    pub layout: Layout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            countdown_secs: 3.0,
            match_secs: 120.0,
            end_game_secs: 5.0,
            results_secs: 5.0,
            proximity_radius: 1.0,
            max_players: 8,
            prediction_timeout_secs: 2.0,
            explosion_cooldown_secs: 3.0,
            run_speed: 6.0,
            fall_limit: -3.0,
            reliable_resend_ticks: 10,
            peer_timeout_secs: 5.0,
            layout: Layout::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.max_players == 0 {
            return Err(ConfigError::NoPlayers);
        }
        if self.max_players > MAX_START_POINTS {
            return Err(ConfigError::TooManyPlayers {
                max_players: self.max_players,
                limit: MAX_START_POINTS,
            });
        }

        let durations = [
            ("countdown_secs", self.countdown_secs),
            ("match_secs", self.match_secs),
            ("end_game_secs", self.end_game_secs),
            ("results_secs", self.results_secs),
            ("proximity_radius", self.proximity_radius),
            ("prediction_timeout_secs", self.prediction_timeout_secs),
            ("explosion_cooldown_secs", self.explosion_cooldown_secs),
            ("peer_timeout_secs", self.peer_timeout_secs),
        ];
        for (field, value) in durations {
            if value < 0.0 {
                return Err(ConfigError::NegativeDuration { field, value });
            }
        }

        if self.layout.start_points.len() < self.max_players {
            return Err(ConfigError::NotEnoughStartPoints {
                max_players: self.max_players,
                start_points: self.layout.start_points.len(),
            });
        }
        Ok(())
    }

    pub fn start_point(&self, index: usize) -> Option<[f32; 3]> {
        self.layout.start_points.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::distance;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_default_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.layout.start_points.len(), 8);
        assert_eq!(config.layout.courses.len(), 4);
        assert_eq!(config.layout.obstacles.len(), 4);
    }

    #[test]
    fn test_default_start_points_on_ring() {
        let config = SessionConfig::default();
        for point in &config.layout.start_points {
            assert_approx_eq!(distance(*point, [0.0, 0.0, 0.0]), 10.0, 1e-4);
        }
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = SessionConfig::default();
        config.tick_rate = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTickRate)));

        let mut config = SessionConfig::default();
        config.match_secs = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeDuration {
                field: "match_secs",
                ..
            })
        ));

        let mut config = SessionConfig::default();
        config.max_players = 9;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotEnoughStartPoints { .. })
        ));
    }

    #[test]
    fn test_max_players_fits_start_index() {
        let mut config = SessionConfig::default();
        config.layout.start_points = vec![[0.0; 3]; 300];

        config.max_players = MAX_START_POINTS;
        assert!(config.validate().is_ok());

        config.max_players = MAX_START_POINTS + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyPlayers {
                max_players: 257,
                limit: 256
            })
        ));
    }

    #[test]
    fn test_roll_segments_stays_in_range() {
        let layout = CourseLayout {
            flag_position: [0.0; 3],
            segment_variants: vec![2, 5, 1, 0],
            reset_speed: 1.0,
            lower_limit: -1.0,
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let segments = layout.roll_segments(&mut rng);
            assert_eq!(segments.len(), 4);
            assert!(segments[0] < 2);
            assert!(segments[1] < 5);
            assert_eq!(segments[2], 0);
            assert_eq!(segments[3], 0);
        }
    }

    #[test]
    fn test_obstacle_position_follows_sine() {
        let obstacle = ObstacleLayout {
            from: [0.0, 1.0, 0.0],
            to: [4.0, 1.0, -2.0],
            rate: 1.0,
        };
        let trough = obstacle.position_at(-FRAC_PI_2);
        assert_approx_eq!(trough[0], 0.0, 1e-5);
        assert_approx_eq!(trough[2], 0.0, 1e-5);

        let middle = obstacle.position_at(0.0);
        assert_approx_eq!(middle[0], 2.0, 1e-5);
        assert_approx_eq!(middle[2], -1.0, 1e-5);

        let crest = obstacle.position_at(FRAC_PI_2);
        assert_approx_eq!(crest[0], 4.0, 1e-5);
        assert_approx_eq!(crest[1], 1.0, 1e-5);
        assert_approx_eq!(crest[2], -2.0, 1e-5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "match_secs": 60.0, "max_players": 4 }"#).unwrap();
        assert_approx_eq!(config.match_secs, 60.0);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.layout, Layout::default());
        assert!(config.validate().is_ok());

        let config: SessionConfig =
            serde_json::from_str(r#"{ "layout": { "obstacles": [] } }"#).unwrap();
        assert!(config.layout.obstacles.is_empty());
        assert_eq!(config.layout.courses.len(), 4);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SessionConfig::from_json_file("/definitely/not/here.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
