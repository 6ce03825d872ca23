//! Countdown state machine that drives the commit cycle timer.
//!
//! ```text
//! Idle --tick reaches 0--> Triggering --begin_cycle--> Running --finish_cycle--> Idle
//! ```
//!
//! Ticks are ignored outside `Idle`, which is what keeps cycles from
//! overlapping: the countdown only restarts once the running cycle reports back.

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Counting down to the next cycle.
    Idle,
    /// Countdown hit zero; the tick is paused until the cycle starts.
    Triggering,
    /// A cycle is in flight.
    Running,
}

/// Result of a single one-second tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Still counting down; seconds left until the next cycle.
    Remaining(u64),
    /// Countdown reached zero; a cycle should run now.
    Trigger,
    /// Not idle, tick had no effect.
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    phase: Phase,
    remaining_secs: u64,
}

impl Countdown {
    /// Start idle with a full interval on the clock.
    pub fn new(interval_secs: u64) -> Self {
        Self {
            phase: Phase::Idle,
            remaining_secs: interval_secs,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn tick(&mut self) -> Tick {
        if self.phase != Phase::Idle {
            return Tick::Paused;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.phase = Phase::Triggering;
            return Tick::Trigger;
        }
        Tick::Remaining(self.remaining_secs)
    }

    /// Move from `Triggering` to `Running`. Returns false in any other phase.
    pub fn begin_cycle(&mut self) -> bool {
        if self.phase != Phase::Triggering {
            return false;
        }
        self.phase = Phase::Running;
        true
    }

    /// Cycle finished (in any way); restart the countdown from `interval_secs`.
    pub fn finish_cycle(&mut self, interval_secs: u64) {
        self.phase = Phase::Idle;
        self.remaining_secs = interval_secs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_then_triggers() {
        let mut countdown = Countdown::new(3);
        assert_eq!(countdown.tick(), Tick::Remaining(2));
        assert_eq!(countdown.tick(), Tick::Remaining(1));
        assert_eq!(countdown.tick(), Tick::Trigger);
        assert_eq!(countdown.phase(), Phase::Triggering);
    }

    #[test]
    fn ticks_are_ignored_until_cycle_finishes() {
        let mut countdown = Countdown::new(1);
        assert_eq!(countdown.tick(), Tick::Trigger);
        assert_eq!(countdown.tick(), Tick::Paused);

        assert!(countdown.begin_cycle());
        assert_eq!(countdown.phase(), Phase::Running);
        assert_eq!(countdown.tick(), Tick::Paused);
        assert_eq!(countdown.remaining_secs(), 0);

        countdown.finish_cycle(5);
        assert_eq!(countdown.phase(), Phase::Idle);
        assert_eq!(countdown.tick(), Tick::Remaining(4));
    }

    #[test]
    fn begin_cycle_requires_trigger() {
        let mut countdown = Countdown::new(10);
        assert!(!countdown.begin_cycle());
        assert_eq!(countdown.phase(), Phase::Idle);
    }

    #[test]
    fn zero_interval_triggers_on_first_tick() {
        let mut countdown = Countdown::new(0);
        assert_eq!(countdown.tick(), Tick::Trigger);
    }
}
