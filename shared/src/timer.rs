//! Fixed-rate tick clock and deadline timers
//!
//! Timers are plain values holding an optional deadline tick. They carry no
//! callbacks: whoever owns the entity polls `expired` every tick, and clearing
//! a timer means replacing it with [`TickTimer::NONE`].

use serde::{Deserialize, Serialize};

/// Simulation step number. Tick 0 is the session start.
pub type Tick = u32;

/// Session tick counter advancing at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickClock {
    tick: Tick,
    tick_rate: u32,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick: 0,
            tick_rate: tick_rate.max(1),
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Seconds covered by one tick.
    pub fn delta_time(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Seconds since tick 0.
    pub fn elapsed_secs(&self) -> f32 {
        self.tick as f32 * self.delta_time()
    }

    /// Moves to the next tick and returns it.
    pub fn advance(&mut self) -> Tick {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    /// Adopts a tick reported by the session host. Never moves backwards.
    ///
    /// Returns true if the clock moved.
    pub fn sync_to(&mut self, tick: Tick) -> bool {
        if tick > self.tick {
            self.tick = tick;
            true
        } else {
            false
        }
    }

    /// Number of whole ticks needed to cover `secs`, rounded up.
    pub fn ticks_for(&self, secs: f32) -> u32 {
        if secs <= 0.0 {
            return 0;
        }
        (secs * self.tick_rate as f32).ceil() as u32
    }
}

/// A replicated deadline. `None` means the timer is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickTimer {
    deadline: Option<Tick>,
}

impl TickTimer {
    pub const NONE: TickTimer = TickTimer { deadline: None };

    pub fn from_ticks(clock: &TickClock, ticks: u32) -> Self {
        Self {
            deadline: Some(clock.tick().saturating_add(ticks)),
        }
    }

    pub fn from_seconds(clock: &TickClock, secs: f32) -> Self {
        Self::from_ticks(clock, clock.ticks_for(secs))
    }

    pub fn deadline(&self) -> Option<Tick> {
        self.deadline
    }

    pub fn is_set(&self) -> bool {
        self.deadline.is_some()
    }

    /// True once the current tick reached the deadline. Never true when unset.
    pub fn expired(&self, clock: &TickClock) -> bool {
        matches!(self.deadline, Some(deadline) if clock.tick() >= deadline)
    }

    /// Set and not yet expired.
    pub fn is_running(&self, clock: &TickClock) -> bool {
        self.is_set() && !self.expired(clock)
    }

    pub fn remaining_ticks(&self, clock: &TickClock) -> Option<u32> {
        match self.deadline {
            Some(deadline) if clock.tick() < deadline => Some(deadline - clock.tick()),
            _ => None,
        }
    }

    /// Seconds left before expiry; absent when unset or already expired.
    pub fn remaining_time(&self, clock: &TickClock) -> Option<f32> {
        self.remaining_ticks(clock)
            .map(|ticks| ticks as f32 * clock.delta_time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_clock_advance_and_delta() {
        let mut clock = TickClock::new(20);
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.advance(), 1);
        assert_approx_eq!(clock.delta_time(), 0.05, 1e-6);
        assert_approx_eq!(clock.elapsed_secs(), 0.05, 1e-6);
    }

    #[test]
    fn test_clock_sync_is_monotonic() {
        let mut clock = TickClock::new(30);
        assert!(clock.sync_to(10));
        assert!(!clock.sync_to(4));
        assert!(!clock.sync_to(10));
        assert_eq!(clock.tick(), 10);
    }

    #[test]
    fn test_zero_tick_rate_is_clamped() {
        let clock = TickClock::new(0);
        assert_eq!(clock.tick_rate(), 1);
    }

    #[test]
    fn test_ticks_for_rounds_up() {
        let clock = TickClock::new(10);
        assert_eq!(clock.ticks_for(1.0), 10);
        assert_eq!(clock.ticks_for(0.25), 3);
        assert_eq!(clock.ticks_for(0.0), 0);
        assert_eq!(clock.ticks_for(-2.0), 0);
    }

    #[test]
    fn test_unset_timer() {
        let clock = TickClock::new(30);
        let timer = TickTimer::NONE;
        assert!(!timer.is_set());
        assert!(!timer.expired(&clock));
        assert!(!timer.is_running(&clock));
        assert_eq!(timer.remaining_time(&clock), None);
    }

    #[test]
    fn test_expiry_happens_at_deadline_never_before() {
        let mut clock = TickClock::new(10);
        let timer = TickTimer::from_ticks(&clock, 3);
        assert_eq!(timer.deadline(), Some(3));

        clock.advance();
        clock.advance();
        assert!(!timer.expired(&clock));
        assert!(timer.is_running(&clock));

        clock.advance();
        assert!(timer.expired(&clock));

        clock.advance();
        assert!(timer.expired(&clock));
    }

    #[test]
    fn test_remaining_time_decreases_then_disappears() {
        let mut clock = TickClock::new(10);
        let timer = TickTimer::from_seconds(&clock, 0.5);

        let mut previous = f32::MAX;
        while let Some(remaining) = timer.remaining_time(&clock) {
            assert!(remaining >= 0.0);
            assert!(remaining < previous);
            assert!(!timer.expired(&clock));
            previous = remaining;
            clock.advance();
        }

        assert!(timer.expired(&clock));
        assert_eq!(clock.tick(), 5);
        assert_approx_eq!(previous, 0.1, 1e-6);
    }

    #[test]
    fn test_timer_serialization() {
        let clock = TickClock::new(30);
        let timer = TickTimer::from_seconds(&clock, 2.0);
        let bytes = bincode::serialize(&timer).unwrap();
        let decoded: TickTimer = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, timer);
    }
}
