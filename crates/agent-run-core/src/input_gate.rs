//! Named-pipe input injection.
//!
//! A dedicated thread opens the session FIFO in read mode -- the open
//! blocks until a writer connects, so there is no busy-waiting between
//! writers -- and forwards every chunk verbatim into the PTY master.
//! This is the only path by which external bytes, control characters
//! included, reach the child's input stream.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::info;
use tracing::warn;

use agent_run_terminal::PtyHandle;

use crate::session::SessionState;

const READ_CHUNK_BYTES: usize = 1024;

pub struct InputGate;

impl InputGate {
    /// Run the gate for the session's lifetime. The loop only ends when
    /// the liveness flag drops; writer disconnects just reopen the pipe
    /// for the next writer.
    pub fn spawn(
        pipe: PathBuf,
        pty: Arc<PtyHandle>,
        state: Arc<SessionState>,
        retry_delay: Duration,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("input-gate".to_string())
            .spawn(move || gate_loop(&pipe, &pty, &state, retry_delay))
    }

    /// Unblock a gate thread stuck in the blocking FIFO open during
    /// shutdown. Opening the write end non-blocking completes the
    /// reader's open; with no bytes written it sees EOF and re-checks
    /// the liveness flag. ENXIO just means no reader was blocked.
    pub fn wake(pipe: &Path) {
        let _ = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(pipe);
    }
}

fn gate_loop(pipe: &Path, pty: &PtyHandle, state: &SessionState, retry_delay: Duration) {
    info!(pipe = %pipe.display(), "input gate listening");

    while state.is_running() {
        match File::open(pipe) {
            Ok(reader) => forward_writer(reader, pty, state, retry_delay),
            Err(e) => {
                if state.is_running() {
                    warn!(pipe = %pipe.display(), error = %e, "input gate open failed");
                    thread::sleep(retry_delay);
                }
            }
        }
    }
}

/// Drain one connected writer until it closes its end.
fn forward_writer(mut reader: File, pty: &PtyHandle, state: &SessionState, retry_delay: Duration) {
    let mut buf = [0u8; READ_CHUNK_BYTES];

    while state.is_running() {
        match reader.read(&mut buf) {
            // EOF: writer disconnected, reopen for the next one.
            Ok(0) => break,
            Ok(n) => {
                let data = &buf[..n];
                match pty.write(data) {
                    Ok(()) => {
                        info!(
                            bytes = n,
                            data = ?String::from_utf8_lossy(data),
                            "injected input"
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "input gate failed to write to PTY");
                        thread::sleep(retry_delay);
                        break;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if state.is_running() {
                    warn!(error = %e, "input gate read failed");
                    thread::sleep(retry_delay);
                }
                break;
            }
        }
    }
}
