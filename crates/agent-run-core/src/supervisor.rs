//! The session control loop.
//!
//! One supervised run: spawn the child under a PTY, drain its output
//! while the watchdog looks for anomalies, pause for the intervention
//! agent when one fires, and clean up the whole process group on exit.
//! Intervention registration happens off the critical path so a slow
//! external call never delays supervision start.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;

use tracing::info;
use tracing::warn;

use agent_run_common::mutex_lock_or_recover;
use agent_run_terminal::PtyHandle;

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::input_gate::InputGate;
use crate::intervention::InterventionService;
use crate::intervention::register_job;
use crate::layout::RunnerLayout;
use crate::session::SessionState;
use crate::status::RunnerState;
use crate::status::StatusFile;
use crate::status::StatusRecord;
use crate::watchdog::Anomaly;
use crate::watchdog::Watchdog;

const PTY_COLS: u16 = 80;
const PTY_ROWS: u16 = 24;

pub struct Supervisor {
    command: String,
    working_dir: PathBuf,
    job_name: String,
    payload: String,
    config: RunnerConfig,
    layout: RunnerLayout,
    state: Arc<SessionState>,
    status: StatusFile,
    service: Arc<dyn InterventionService>,
    job_id: Arc<Mutex<Option<String>>>,
}

impl Supervisor {
    pub fn new(
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        job_name: impl Into<String>,
        payload: impl Into<String>,
        config: RunnerConfig,
        service: Arc<dyn InterventionService>,
    ) -> Self {
        let working_dir = working_dir.into();
        let layout = RunnerLayout::new(&working_dir, &config.runner_dir_name);
        let status = StatusFile::new(&layout.status_path);

        Self {
            command: command.into(),
            working_dir,
            job_name: job_name.into(),
            payload: payload.into(),
            config,
            layout,
            state: Arc::new(SessionState::new()),
            status,
            service,
            job_id: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared liveness/activity state, for signal handlers and tests.
    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    pub fn layout(&self) -> &RunnerLayout {
        &self.layout
    }

    /// Run the session to completion: until the child exits or the
    /// liveness flag drops. Only setup can fail, and all of it runs
    /// before any child or background thread exists; everything after
    /// is fail-soft.
    pub fn run(&self) -> Result<(), RunnerError> {
        self.layout.create_fresh()?;
        let mut log = self.open_log()?;

        let pty = Arc::new(PtyHandle::spawn(
            &self.command,
            Some(&self.working_dir),
            PTY_COLS,
            PTY_ROWS,
        )?);
        let child_pid = pty.pid();
        info!(command = %self.command, pid = ?child_pid, "child process started");

        let startup = self
            .status_record(RunnerState::Monitoring, &pty)
            .with_info("process started");
        if let Err(e) = self.status.write(&startup) {
            warn!(error = %e, "failed to write initial status");
        }

        self.register_in_background(child_pid);

        let gate = match InputGate::spawn(
            self.layout.input_pipe.clone(),
            Arc::clone(&pty),
            Arc::clone(&self.state),
            self.config.poll_interval,
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to start input gate, input injection disabled");
                None
            }
        };

        let mut buf = vec![0u8; self.config.read_buffer_bytes];
        let mut watchdog = Watchdog::new(&self.config);
        self.state.reset_activity();

        info!(pid = ?child_pid, "monitoring");
        while self.state.is_running() && pty.is_running() {
            if let Err(e) = self.drain_once(&pty, &mut buf, &mut log) {
                warn!(error = %e, "PTY read failed, child likely exited");
                break;
            }

            if let Some(anomaly) = watchdog.check(&self.state) {
                if self.pause_for_intervention(anomaly, &pty, &mut buf, &mut log) {
                    watchdog.resume(&self.state);
                }
            }
        }

        self.cleanup(&pty, gate);
        Ok(())
    }

    /// One bounded poll-and-read of the PTY master. On data: echo to
    /// the console, append to the session log, move the activity clock.
    /// Identical in the monitoring loop and the pause loop, so the log
    /// stays a complete ordered record in every state.
    fn drain_once(
        &self,
        pty: &PtyHandle,
        buf: &mut [u8],
        log: &mut File,
    ) -> Result<bool, RunnerError> {
        let n = pty.try_read(buf, self.poll_timeout_ms())?;
        if n == 0 {
            return Ok(false);
        }

        let text = String::from_utf8_lossy(&buf[..n]);

        let mut stdout = io::stdout();
        let _ = stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush());

        if let Err(e) = log.write_all(text.as_bytes()) {
            warn!(error = %e, "failed to append session log");
        }

        self.state.mark_activity(&text);
        Ok(true)
    }

    /// The pause half of the handshake: persist `WAITING_FOR_AI`, poke
    /// the agent, then keep draining until the agent writes back
    /// `AI_DONE`. Returns false only when shutdown interrupts the wait.
    fn pause_for_intervention(
        &self,
        anomaly: Anomaly,
        pty: &PtyHandle,
        buf: &mut [u8],
        log: &mut File,
    ) -> bool {
        info!(reason = anomaly.reason(), "anomaly detected, requesting intervention");

        let record = self
            .status_record(RunnerState::WaitingForAi, pty)
            .with_reason(anomaly.reason());
        if let Err(e) = self.status.write(&record) {
            warn!(error = %e, "failed to persist WAITING_FOR_AI status");
        }

        let job_id = mutex_lock_or_recover(&self.job_id).clone();
        match job_id {
            Some(id) => {
                if let Err(e) = self.service.force_run(&id) {
                    warn!(job_id = %id, error = %e, "intervention force-run failed");
                }
            }
            None => warn!("no intervention job registered yet, waiting anyway"),
        }

        info!("waiting for intervention to complete");
        while self.state.is_running() {
            if let Err(e) = self.drain_once(pty, buf, log) {
                // Transient while paused: the agent may be killing the
                // child as its remediation.
                warn!(error = %e, "PTY read failed while paused");
                thread::sleep(self.config.poll_interval);
            }

            match self.status.load() {
                Ok(rec) if rec.state == RunnerState::AiDone => {
                    info!("intervention finished, resuming");
                    let resumed = self
                        .status_record(RunnerState::Monitoring, pty)
                        .with_info("resumed after intervention");
                    if let Err(e) = self.status.write(&resumed) {
                        warn!(error = %e, "failed to persist resumed status");
                    }
                    return true;
                }
                Ok(_) => {}
                // Missing or partial record: produced by an external,
                // possibly slow, writer. Retry next iteration.
                Err(_) => {}
            }
        }

        false
    }

    fn register_in_background(&self, child_pid: Option<u32>) {
        let service = Arc::clone(&self.service);
        let job_id = Arc::clone(&self.job_id);
        let name = self.job_name.clone();
        let interval = self.config.trigger_interval.clone();
        let payload = self.build_payload(child_pid);

        let spawned = thread::Builder::new()
            .name("intervention-register".to_string())
            .spawn(move || match register_job(service.as_ref(), &name, &interval, &payload) {
                Ok(id) => {
                    *mutex_lock_or_recover(&job_id) = Some(id);
                }
                Err(e) => warn!(error = %e, "intervention registration failed"),
            });

        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn registration thread");
        }
    }

    /// The caller's task context plus a generated trailer telling the
    /// agent where the session artifacts live and how to hand control
    /// back.
    fn build_payload(&self, child_pid: Option<u32>) -> String {
        let child = child_pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let status = self.layout.status_path.display();
        let pipe = self.layout.input_pipe.display();

        format!(
            "{payload}\n\
             ---\n\
             [Process Info]\n\
             - Child PID: {child}\n\
             - Runner PID: {runner}\n\
             - Working dir: {working_dir}\n\
             - Runner dir: {root}\n\
             - Input pipe: {pipe}\n\
             ---\n\
             [Runner Instructions]\n\
             1. Read {status} to check the session state.\n\
             \x20  - \"MONITORING\": heartbeat only, report progress if useful.\n\
             \x20  - \"WAITING_FOR_AI\": action required.\n\
             2. Inspect the tail of {log} to see what the child is doing.\n\
             3. To intervene:\n\
             \x20  - send input: echo \"text\" > {pipe}\n\
             \x20  - send a bare newline: printf \"\\n\" > {pipe}\n\
             \x20  - send Ctrl+C: printf \"\\x03\" > {pipe}\n\
             \x20  - kill the child: kill {child}\n\
             4. When finished, write {{\"state\": \"AI_DONE\"}} to {status}.\n\
             \x20  The runner stays paused until that write happens.",
            payload = self.payload,
            child = child,
            runner = std::process::id(),
            working_dir = self.working_dir.display(),
            root = self.layout.root.display(),
            pipe = pipe,
            status = status,
            log = self.layout.log_path.display(),
        )
    }

    fn status_record(&self, state: RunnerState, pty: &PtyHandle) -> StatusRecord {
        StatusRecord::new(
            state,
            pty.pid(),
            &self.command,
            &self.layout.input_pipe,
        )
    }

    /// Poll timeout in poll(2) form, saturating for intervals beyond
    /// the i32 millisecond range.
    fn poll_timeout_ms(&self) -> i32 {
        i32::try_from(self.config.poll_interval.as_millis()).unwrap_or(i32::MAX)
    }

    fn open_log(&self) -> Result<File, RunnerError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.layout.log_path)
            .map_err(|e| RunnerError::setup("open_log", e))
    }

    /// Orderly teardown; every step is independently fail-soft.
    fn cleanup(&self, pty: &PtyHandle, gate: Option<JoinHandle<()>>) {
        self.state.shutdown();

        if pty.is_running() {
            info!("terminating child process group");
            if let Err(e) = pty.terminate_group() {
                warn!(error = %e, "failed to terminate child process group");
            }
        }

        let job_id = mutex_lock_or_recover(&self.job_id).take();
        if let Some(id) = job_id {
            info!(job_id = %id, "removing intervention job");
            if let Err(e) = self.service.remove_job(&id) {
                warn!(job_id = %id, error = %e, "failed to remove intervention job");
            }
        }

        // A gate blocked in its FIFO open wakes on this; one blocked on
        // an attached external writer may not, so the handle is dropped
        // rather than joined with no bound.
        InputGate::wake(&self.layout.input_pipe);
        drop(gate);

        self.layout.remove_input_pipe();
        info!("session closed");
    }
}
