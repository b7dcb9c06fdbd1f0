use std::env;
use std::time::Duration;

const DEFAULT_IO_WAIT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_STALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_READ_BUFFER_BYTES: usize = 10 * 1024;
const DEFAULT_RUNNER_DIR_NAME: &str = ".agent-run";
const DEFAULT_TRIGGER_INTERVAL: &str = "5m";

/// Supervision tunables.
///
/// The two anomaly timeouts are independent; the poll interval bounds
/// both shutdown and resume latency.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub io_wait_timeout: Duration,
    pub stall_timeout: Duration,
    pub poll_interval: Duration,
    pub read_buffer_bytes: usize,
    pub runner_dir_name: String,
    pub trigger_interval: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        Self {
            io_wait_timeout: Duration::from_millis(
                env::var("AGENT_RUN_IO_WAIT_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_IO_WAIT_TIMEOUT_MS),
            ),
            stall_timeout: Duration::from_millis(
                env::var("AGENT_RUN_STALL_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_STALL_TIMEOUT_MS),
            ),
            poll_interval: Duration::from_millis(
                env::var("AGENT_RUN_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            read_buffer_bytes: env::var("AGENT_RUN_READ_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_READ_BUFFER_BYTES),
            runner_dir_name: env::var("AGENT_RUN_DIR_NAME")
                .unwrap_or_else(|_| DEFAULT_RUNNER_DIR_NAME.to_string()),
            trigger_interval: env::var("AGENT_RUN_TRIGGER_INTERVAL")
                .unwrap_or_else(|_| DEFAULT_TRIGGER_INTERVAL.to_string()),
        }
    }

    pub fn with_io_wait_timeout(mut self, timeout: Duration) -> Self {
        self.io_wait_timeout = timeout;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_read_buffer_bytes(mut self, bytes: usize) -> Self {
        self.read_buffer_bytes = bytes;
        self
    }

    pub fn with_runner_dir_name(mut self, name: impl Into<String>) -> Self {
        self.runner_dir_name = name.into();
        self
    }

    pub fn with_trigger_interval(mut self, interval: impl Into<String>) -> Self {
        self.trigger_interval = interval.into();
        self
    }
}
