//! Anomaly detection over the activity clock.
//!
//! Two independent timers, first to fire wins per iteration:
//! - IO_WAIT: short silence while the last chunk looks like an
//!   unanswered prompt (non-empty, no trailing newline).
//! - STALL: long silence regardless of line state.
//!
//! While an intervention is outstanding neither timer fires again; the
//! supervisor calls [`Watchdog::resume`] once the agent hands back
//! control.

use std::time::Duration;

use crate::config::RunnerConfig;
use crate::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    IoWait,
    Stall,
}

impl Anomaly {
    /// Reason string as it appears in the status record.
    pub fn reason(&self) -> &'static str {
        match self {
            Anomaly::IoWait => "IO_WAIT",
            Anomaly::Stall => "STALL",
        }
    }
}

pub struct Watchdog {
    io_wait_timeout: Duration,
    stall_timeout: Duration,
    waiting: bool,
}

impl Watchdog {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            io_wait_timeout: config.io_wait_timeout,
            stall_timeout: config.stall_timeout,
            waiting: false,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Evaluate once after a drain attempt. Returns the anomaly to act
    /// on, having already applied its re-trigger suppression: IO_WAIT
    /// clears the last chunk, STALL moves the clock forward.
    pub fn check(&mut self, state: &SessionState) -> Option<Anomaly> {
        if self.waiting {
            return None;
        }

        let elapsed = state.elapsed_since_activity();
        let chunk = state.last_chunk();

        if elapsed > self.io_wait_timeout && !chunk.is_empty() && !chunk.ends_with('\n') {
            state.clear_last_chunk();
            self.waiting = true;
            return Some(Anomaly::IoWait);
        }

        if elapsed > self.stall_timeout {
            state.reset_activity();
            self.waiting = true;
            return Some(Anomaly::Stall);
        }

        None
    }

    /// The intervention completed: arm both timers again from a fresh
    /// clock so nothing fires immediately after resume.
    pub fn resume(&mut self, state: &SessionState) {
        self.waiting = false;
        state.reset_activity();
        state.clear_last_chunk();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunnerConfig {
        RunnerConfig::default()
            .with_io_wait_timeout(Duration::from_secs(2))
            .with_stall_timeout(Duration::from_secs(30))
    }

    #[test]
    fn test_io_wait_fires_on_incomplete_line() {
        let state = SessionState::new();
        let mut watchdog = Watchdog::new(&config());

        state.mark_activity("Continue? [y/n] ");
        state.advance_clock(Duration::from_secs(3));

        assert_eq!(watchdog.check(&state), Some(Anomaly::IoWait));
    }

    #[test]
    fn test_io_wait_does_not_fire_on_complete_line() {
        let state = SessionState::new();
        let mut watchdog = Watchdog::new(&config());

        state.mark_activity("all done\n");
        state.advance_clock(Duration::from_secs(3));

        assert_eq!(watchdog.check(&state), None);
    }

    #[test]
    fn test_io_wait_fires_exactly_once_per_chunk() {
        let state = SessionState::new();
        let mut watchdog = Watchdog::new(&config());

        state.mark_activity("password: ");
        state.advance_clock(Duration::from_secs(3));

        assert_eq!(watchdog.check(&state), Some(Anomaly::IoWait));
        watchdog.resume(&state);

        // Same silence, but the chunk was consumed by the first trigger
        // and the clock was reset on resume.
        assert_eq!(watchdog.check(&state), None);
    }

    #[test]
    fn test_stall_fires_on_long_silence() {
        let state = SessionState::new();
        let mut watchdog = Watchdog::new(&config());

        state.mark_activity("building...\n");
        state.advance_clock(Duration::from_secs(31));

        assert_eq!(watchdog.check(&state), Some(Anomaly::Stall));
    }

    #[test]
    fn test_silent_child_stalls_without_io_wait() {
        // `sleep 40` shape: no output at all, so the prompt condition
        // never sees a non-empty chunk.
        let state = SessionState::new();
        let mut watchdog = Watchdog::new(&config());

        state.advance_clock(Duration::from_secs(10));
        assert_eq!(watchdog.check(&state), None);

        state.advance_clock(Duration::from_secs(21));
        assert_eq!(watchdog.check(&state), Some(Anomaly::Stall));
    }

    #[test]
    fn test_io_wait_wins_over_stall() {
        let state = SessionState::new();
        let mut watchdog = Watchdog::new(&config());

        state.mark_activity("prompt> ");
        state.advance_clock(Duration::from_secs(40));

        assert_eq!(watchdog.check(&state), Some(Anomaly::IoWait));
    }

    #[test]
    fn test_no_retrigger_while_waiting() {
        let state = SessionState::new();
        let mut watchdog = Watchdog::new(&config());

        state.advance_clock(Duration::from_secs(31));
        assert_eq!(watchdog.check(&state), Some(Anomaly::Stall));
        assert!(watchdog.is_waiting());

        state.advance_clock(Duration::from_secs(120));
        assert_eq!(watchdog.check(&state), None);
        assert_eq!(watchdog.check(&state), None);
    }

    #[test]
    fn test_resume_rearms_both_timers() {
        let state = SessionState::new();
        let mut watchdog = Watchdog::new(&config());

        state.mark_activity("prompt> ");
        state.advance_clock(Duration::from_secs(3));
        assert_eq!(watchdog.check(&state), Some(Anomaly::IoWait));

        watchdog.resume(&state);
        assert!(!watchdog.is_waiting());
        assert_eq!(watchdog.check(&state), None);

        state.mark_activity("next prompt> ");
        state.advance_clock(Duration::from_secs(3));
        assert_eq!(watchdog.check(&state), Some(Anomaly::IoWait));
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(Anomaly::IoWait.reason(), "IO_WAIT");
        assert_eq!(Anomaly::Stall.reason(), "STALL");
    }
}
