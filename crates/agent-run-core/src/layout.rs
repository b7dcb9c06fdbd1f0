//! Runner directory lifecycle.
//!
//! Each session owns a private directory under the working directory
//! holding the status record, the output log, the runner pid file and
//! the input FIFO. The directory is recreated from scratch on every
//! start; whatever a previous run left behind is discarded.

use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use tracing::warn;

use crate::error::RunnerError;

const STATUS_FILE: &str = "status.json";
const LOG_FILE: &str = "output.log";
const PID_FILE: &str = "runner.pid";
const INPUT_PIPE: &str = "input.pipe";

// Owner and group read/write on the FIFO; nothing for others.
const PIPE_MODE: u32 = 0o660;

#[derive(Debug, Clone)]
pub struct RunnerLayout {
    pub root: PathBuf,
    pub status_path: PathBuf,
    pub log_path: PathBuf,
    pub pid_path: PathBuf,
    pub input_pipe: PathBuf,
}

impl RunnerLayout {
    pub fn new(working_dir: &Path, dir_name: &str) -> Self {
        let root = working_dir.join(dir_name);
        Self {
            status_path: root.join(STATUS_FILE),
            log_path: root.join(LOG_FILE),
            pid_path: root.join(PID_FILE),
            input_pipe: root.join(INPUT_PIPE),
            root,
        }
    }

    /// Idempotent fresh start: destroy any prior artifacts, then create
    /// the directory, the input FIFO and the pid file.
    pub fn create_fresh(&self) -> Result<(), RunnerError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .map_err(|e| RunnerError::setup("remove_prior_dir", e))?;
        }

        fs::create_dir_all(&self.root).map_err(|e| RunnerError::setup("create_dir", e))?;

        make_fifo(&self.input_pipe)?;

        fs::write(&self.pid_path, std::process::id().to_string())
            .map_err(|e| RunnerError::setup("write_pid", e))?;

        Ok(())
    }

    /// Best-effort teardown of the FIFO; files stay behind for post-run
    /// inspection.
    pub fn remove_input_pipe(&self) {
        if self.input_pipe.exists() {
            if let Err(e) = fs::remove_file(&self.input_pipe) {
                warn!(pipe = %self.input_pipe.display(), error = %e, "failed to remove input pipe");
            }
        }
    }
}

fn make_fifo(path: &Path) -> Result<(), RunnerError> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| RunnerError::setup("fifo_path", e))?;

    let result = unsafe { libc::mkfifo(c_path.as_ptr(), PIPE_MODE as libc::mode_t) };
    if result != 0 {
        return Err(RunnerError::setup(
            "mkfifo",
            std::io::Error::last_os_error(),
        ));
    }

    // mkfifo's mode argument is filtered through the umask.
    fs::set_permissions(path, fs::Permissions::from_mode(PIPE_MODE))
        .map_err(|e| RunnerError::setup("fifo_permissions", e))?;

    Ok(())
}
