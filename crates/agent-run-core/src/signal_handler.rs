//! Signal handling for orderly session shutdown.
//!
//! SIGINT and SIGTERM drop the session's liveness flag; every loop
//! exits on its next poll boundary and the supervisor runs cleanup.

use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGTERM;
use signal_hook::iterator::Signals;
use tracing::info;

use crate::error::RunnerError;
use crate::session::SessionState;

pub struct SignalHandler {
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

impl SignalHandler {
    pub fn setup(state: Arc<SessionState>) -> Result<Self, RunnerError> {
        let mut signals = Signals::new([SIGINT, SIGTERM])
            .map_err(|e| RunnerError::SignalSetup(e.to_string()))?;

        let handle = thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!(signal = sig, "received signal, shutting down session");
                    state.shutdown();
                }
            })
            .map_err(|e| {
                RunnerError::SignalSetup(format!("failed to spawn signal handler: {}", e))
            })?;

        Ok(Self { handle })
    }
}
