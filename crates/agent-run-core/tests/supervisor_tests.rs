//! End-to-end supervision tests against real PTYs and real FIFOs.
//!
//! Timeouts are shortened through the config so anomalies fire within
//! test time; the state machine under test is the same one production
//! runs with.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use agent_run_core::RunnerConfig;
use agent_run_core::RunnerState;
use agent_run_core::StatusFile;
use agent_run_core::Supervisor;
use agent_run_core::test_support::MockIntervention;
use tempfile::TempDir;

const DEADLINE: Duration = Duration::from_secs(10);

fn fast_config() -> RunnerConfig {
    RunnerConfig::default()
        .with_io_wait_timeout(Duration::from_millis(300))
        .with_stall_timeout(Duration::from_secs(60))
        .with_poll_interval(Duration::from_millis(50))
}

struct Harness {
    dir: TempDir,
    mock: Arc<MockIntervention>,
    supervisor: Arc<Supervisor>,
    runner: Option<JoinHandle<()>>,
}

impl Harness {
    fn start(command: &str, config: RunnerConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockIntervention::new());
        let supervisor = Arc::new(Supervisor::new(
            command,
            dir.path(),
            "supervise-test",
            "test task",
            config,
            mock.clone() as Arc<dyn agent_run_core::InterventionService>,
        ));

        let runner = {
            let supervisor = Arc::clone(&supervisor);
            thread::spawn(move || supervisor.run().unwrap())
        };

        Self {
            dir,
            mock,
            supervisor,
            runner: Some(runner),
        }
    }

    fn status_file(&self) -> StatusFile {
        StatusFile::new(&self.supervisor.layout().status_path)
    }

    fn wait_for_state(&self, wanted: RunnerState) -> agent_run_core::StatusRecord {
        let status = self.status_file();
        let deadline = Instant::now() + DEADLINE;
        loop {
            if let Ok(record) = status.load() {
                if record.state == wanted {
                    return record;
                }
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for state {:?}",
                wanted
            );
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn wait_for_log(&self, needle: &str) {
        let log_path = &self.supervisor.layout().log_path;
        let deadline = Instant::now() + DEADLINE;
        loop {
            if let Ok(log) = fs::read_to_string(log_path) {
                if log.contains(needle) {
                    return;
                }
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {:?} in {}",
                needle,
                log_path.display()
            );
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn write_ai_done(&self) {
        fs::write(
            &self.supervisor.layout().status_path,
            r#"{"state": "AI_DONE"}"#,
        )
        .unwrap();
    }

    fn inject_input(&self, data: &[u8]) {
        let pipe = &self.supervisor.layout().input_pipe;
        let mut writer = fs::OpenOptions::new().write(true).open(pipe).unwrap();
        writer.write_all(data).unwrap();
    }

    fn shutdown_and_join(&mut self) {
        self.supervisor.state().shutdown();
        if let Some(runner) = self.runner.take() {
            runner.join().unwrap();
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[test]
fn test_output_is_logged_and_session_ends_with_child() {
    let mut harness = Harness::start("printf 'one\\ntwo\\n'; sleep 1", fast_config());

    harness.wait_for_log("one");
    harness.wait_for_log("two");

    // The child exits on its own; run() returns without a shutdown.
    if let Some(runner) = harness.runner.take() {
        runner.join().unwrap();
    }

    let log = fs::read_to_string(&harness.supervisor.layout().log_path).unwrap();
    assert!(log.contains("one"));
    assert!(log.contains("two"));
}

#[test]
fn test_incomplete_prompt_triggers_io_wait_pause_and_resume() {
    let mut harness = Harness::start("printf 'Continue? [y/n] '; sleep 30", fast_config());

    let record = harness.wait_for_state(RunnerState::WaitingForAi);
    assert_eq!(record.reason.as_deref(), Some("IO_WAIT"));
    assert_eq!(record.cmd, "printf 'Continue? [y/n] '; sleep 30");
    assert!(record.child_pid.is_some());

    // Force-run fired against the job registered in the background.
    let deadline = Instant::now() + DEADLINE;
    while harness.mock.forced().is_empty() {
        assert!(Instant::now() < deadline, "force_run never invoked");
        thread::sleep(Duration::from_millis(20));
    }

    harness.write_ai_done();
    let handed_back = Instant::now();
    let resumed = harness.wait_for_state(RunnerState::Monitoring);
    assert_eq!(resumed.info.as_deref(), Some("resumed after intervention"));

    // The pause loop notices AI_DONE on its next poll boundary; 500ms
    // is ten poll intervals of headroom.
    assert!(
        handed_back.elapsed() < Duration::from_millis(500),
        "resume took {:?}",
        handed_back.elapsed()
    );

    harness.shutdown_and_join();
}

#[test]
fn test_silent_child_triggers_stall_not_io_wait() {
    let config = fast_config()
        .with_io_wait_timeout(Duration::from_millis(200))
        .with_stall_timeout(Duration::from_millis(700));
    let mut harness = Harness::start("sleep 30", config);

    // First transition observed must be the STALL: the child never
    // produced output, so the prompt condition has nothing to match.
    let record = harness.wait_for_state(RunnerState::WaitingForAi);
    assert_eq!(record.reason.as_deref(), Some("STALL"));

    harness.write_ai_done();
    harness.wait_for_state(RunnerState::Monitoring);

    harness.shutdown_and_join();
}

#[test]
fn test_output_keeps_flowing_to_log_while_paused() {
    // The child prints a prompt (tripping IO_WAIT), then keeps talking.
    let cmd = "printf 'proceed? '; sleep 1; echo 'still alive'; sleep 30";
    let mut harness = Harness::start(cmd, fast_config());

    harness.wait_for_state(RunnerState::WaitingForAi);
    harness.wait_for_log("still alive");

    harness.write_ai_done();
    harness.wait_for_state(RunnerState::Monitoring);
    harness.shutdown_and_join();
}

#[test]
fn test_input_pipe_reaches_child_across_writer_cycles() {
    let mut harness = Harness::start("cat", fast_config());

    harness.wait_for_state(RunnerState::Monitoring);

    // First writer connects, writes, disconnects.
    harness.inject_input(b"first message\n");
    harness.wait_for_log("first message");

    // The gate reopens the pipe for the next writer.
    harness.inject_input(b"second message\n");
    harness.wait_for_log("second message");

    harness.shutdown_and_join();
}

#[test]
fn test_fresh_start_discards_prior_runner_dir() {
    let dir = TempDir::new().unwrap();
    let config = fast_config();
    let stale_root = dir.path().join(&config.runner_dir_name);
    fs::create_dir_all(&stale_root).unwrap();
    fs::write(stale_root.join("status.json"), "stale garbage").unwrap();
    fs::write(stale_root.join("leftover.txt"), "junk").unwrap();

    let mock = Arc::new(MockIntervention::new());
    let supervisor = Supervisor::new(
        "sleep 1",
        dir.path(),
        "supervise-test",
        "test task",
        config,
        mock as Arc<dyn agent_run_core::InterventionService>,
    );

    let state = supervisor.state();
    let handle = thread::spawn(move || supervisor.run().unwrap());
    thread::sleep(Duration::from_millis(300));

    assert!(!stale_root.join("leftover.txt").exists());
    assert!(stale_root.join("runner.pid").exists());

    state.shutdown();
    handle.join().unwrap();
}

#[test]
fn test_shutdown_terminates_child_group_and_deregisters() {
    let mut harness = Harness::start("sleep 30", fast_config());

    let record = harness.wait_for_state(RunnerState::Monitoring);
    let child_pid = record.child_pid.expect("child pid recorded");
    assert!(pid_alive(child_pid));

    // Registration runs in the background; wait for the handle.
    let deadline = Instant::now() + DEADLINE;
    while harness.mock.added_names().is_empty() {
        assert!(Instant::now() < deadline, "registration never completed");
        thread::sleep(Duration::from_millis(20));
    }
    // The job id is stored just after add_job returns.
    thread::sleep(Duration::from_millis(100));

    harness.shutdown_and_join();

    let deadline = Instant::now() + DEADLINE;
    while pid_alive(child_pid) {
        assert!(Instant::now() < deadline, "child survived shutdown");
        thread::sleep(Duration::from_millis(20));
    }

    // The registered job was removed and the pipe unlinked.
    assert_eq!(harness.mock.removed().len(), 1);
    assert!(!harness.supervisor.layout().input_pipe.exists());
    assert!(Path::new(&harness.supervisor.layout().status_path).exists());
    drop(harness.dir);
}
