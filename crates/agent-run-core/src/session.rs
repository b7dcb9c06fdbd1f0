//! Shared session state.
//!
//! The activity clock and last-chunk are the only mutable state shared
//! between the drain path and the watchdog; the liveness flag is shared
//! with the input gate and the signal handler. Single writer per field,
//! so atomics plus one small mutex are enough.

use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use agent_run_common::mutex_lock_or_recover;

pub struct SessionState {
    running: AtomicBool,
    epoch: Instant,
    // Milliseconds since `epoch` at the time of the last output chunk.
    last_activity_ms: AtomicU64,
    last_chunk: Mutex<String>,
    #[cfg(test)]
    test_clock_skew_ms: AtomicU64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            last_chunk: Mutex::new(String::new()),
            #[cfg(test)]
            test_clock_skew_ms: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Flip the liveness flag; every loop exits on its next poll boundary.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn now_ms(&self) -> u64 {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        #[cfg(test)]
        let elapsed = elapsed + self.test_clock_skew_ms.load(Ordering::Relaxed);
        elapsed
    }

    /// Record a fresh output chunk: clock forward to now, chunk replaced.
    pub fn mark_activity(&self, chunk: &str) {
        let mut last = mutex_lock_or_recover(&self.last_chunk);
        *last = chunk.to_string();
        self.last_activity_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Move the clock forward to now without recording output.
    pub fn reset_activity(&self) {
        self.last_activity_ms.store(self.now_ms(), Ordering::Release);
    }

    pub fn elapsed_since_activity(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub fn last_chunk(&self) -> String {
        mutex_lock_or_recover(&self.last_chunk).clone()
    }

    pub fn clear_last_chunk(&self) {
        mutex_lock_or_recover(&self.last_chunk).clear();
    }

    /// Skew the session clock forward to simulate elapsed silence
    /// without sleeping.
    #[cfg(test)]
    pub(crate) fn advance_clock(&self, by: Duration) {
        self.test_clock_skew_ms
            .fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}
