//! Auto-close countdown.
//!
//! At most one countdown exists per gate. Starting while already counting
//! down restarts from the full timeout instead of stacking a second timer.

use crate::error::{CoreError, CoreResult};

/// Auto-close timeout used when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u32 = 10;

/// State of the auto-close timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// No countdown active.
    Idle,
    /// Counting down; `remaining` seconds until the gate is closed.
    CountingDown { remaining: u32 },
}

/// Result of advancing the timer by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Timer was idle, nothing happened.
    Idle,
    /// Still counting down.
    Remaining(u32),
    /// The countdown reached zero and the timer is idle again.
    Expired,
}

/// The auto-close timer state machine.
#[derive(Debug, Clone)]
pub struct AutoCloseTimer {
    state: TimerState,
    timeout_secs: u32,
}

impl AutoCloseTimer {
    /// Create an idle timer with the given timeout.
    pub fn new(timeout_secs: u32) -> CoreResult<Self> {
        validate_timeout(timeout_secs)?;
        Ok(AutoCloseTimer {
            state: TimerState::Idle,
            timeout_secs,
        })
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// Change the configured timeout. A running countdown keeps its remaining
    /// time; the new value applies from the next start.
    pub fn set_timeout(&mut self, timeout_secs: u32) -> CoreResult<()> {
        validate_timeout(timeout_secs)?;
        self.timeout_secs = timeout_secs;
        Ok(())
    }

    pub fn is_counting_down(&self) -> bool {
        matches!(self.state, TimerState::CountingDown { .. })
    }

    /// Seconds left, zero when idle.
    pub fn remaining(&self) -> u32 {
        match self.state {
            TimerState::Idle => 0,
            TimerState::CountingDown { remaining } => remaining,
        }
    }

    /// Enter `CountingDown(timeout)`, resetting any countdown in progress.
    pub fn start(&mut self) {
        self.state = TimerState::CountingDown {
            remaining: self.timeout_secs,
        };
    }

    /// Align a running countdown with a remaining time reported by the device.
    /// Has no effect while idle.
    pub fn sync(&mut self, remaining: u32) {
        if let TimerState::CountingDown { .. } = self.state {
            self.state = TimerState::CountingDown { remaining };
        }
    }

    /// Stop the countdown. Returns whether one was active.
    pub fn cancel(&mut self) -> bool {
        let was_active = self.is_counting_down();
        self.state = TimerState::Idle;
        was_active
    }

    /// Advance by one second.
    pub fn tick(&mut self) -> TickOutcome {
        match self.state {
            TimerState::Idle => TickOutcome::Idle,
            TimerState::CountingDown { remaining } if remaining <= 1 => {
                self.state = TimerState::Idle;
                TickOutcome::Expired
            }
            TimerState::CountingDown { remaining } => {
                let remaining = remaining - 1;
                self.state = TimerState::CountingDown { remaining };
                TickOutcome::Remaining(remaining)
            }
        }
    }
}

fn validate_timeout(timeout_secs: u32) -> CoreResult<()> {
    if timeout_secs == 0 {
        return Err(CoreError::InvalidTimeout(timeout_secs));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeout_rejected() {
        assert_eq!(AutoCloseTimer::new(0).unwrap_err(), CoreError::InvalidTimeout(0));
        let mut timer = AutoCloseTimer::new(10).unwrap();
        assert!(timer.set_timeout(0).is_err());
        assert_eq!(timer.timeout_secs(), 10);
    }

    #[test]
    fn test_counts_down_and_expires() {
        let mut timer = AutoCloseTimer::new(3).unwrap();
        assert_eq!(timer.tick(), TickOutcome::Idle);

        timer.start();
        assert_eq!(timer.state(), TimerState::CountingDown { remaining: 3 });
        assert_eq!(timer.tick(), TickOutcome::Remaining(2));
        assert_eq!(timer.tick(), TickOutcome::Remaining(1));
        assert_eq!(timer.tick(), TickOutcome::Expired);
        assert_eq!(timer.state(), TimerState::Idle);
        assert_eq!(timer.tick(), TickOutcome::Idle);
    }

    #[test]
    fn test_restart_resets_instead_of_stacking() {
        let mut timer = AutoCloseTimer::new(10).unwrap();
        timer.start();
        for _ in 0..6 {
            timer.tick();
        }
        assert_eq!(timer.remaining(), 4);

        timer.start();
        assert_eq!(timer.remaining(), 10);
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut timer = AutoCloseTimer::new(10).unwrap();
        assert!(!timer.cancel());
        timer.start();
        assert!(timer.cancel());
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[test]
    fn test_sync_only_when_counting() {
        let mut timer = AutoCloseTimer::new(10).unwrap();
        timer.sync(4);
        assert_eq!(timer.state(), TimerState::Idle);

        timer.start();
        timer.sync(4);
        assert_eq!(timer.remaining(), 4);

        timer.sync(0);
        assert_eq!(timer.tick(), TickOutcome::Expired);
    }

    #[test]
    fn test_timeout_change_applies_on_next_start() {
        let mut timer = AutoCloseTimer::new(10).unwrap();
        timer.start();
        timer.set_timeout(25).unwrap();
        assert_eq!(timer.remaining(), 10);
        timer.start();
        assert_eq!(timer.remaining(), 25);
    }
}
