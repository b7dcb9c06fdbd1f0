use std::io;
use std::io::Read;
use std::io::Write;
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use portable_pty::Child;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;

use agent_run_common::mutex_lock_or_recover;

use crate::error::PtyError;

/// A child command running on the slave side of a pseudo-terminal.
///
/// The command is run through `/bin/sh -c`, so stdout and stderr arrive
/// merged on the master side as a single byte stream. The child becomes
/// the leader of its own process group, which lets [`PtyHandle::terminate_group`]
/// signal the whole subtree at once.
///
/// Reads and writes go through independent directions of the PTY, so a
/// drain loop and an input-injection thread can share one handle without
/// extra locking beyond the per-direction mutexes held here.
pub struct PtyHandle {
    // Held for its lifetime only; dropping the master closes the pair.
    // Wrapped in a Mutex so the handle is Sync despite the non-Sync trait object.
    _master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    master_fd: RawFd,
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.terminate_group();
        }
    }
}

impl PtyHandle {
    /// Spawn `command` under a fresh PTY pair.
    ///
    /// Spawn failure is fatal for the session; there is nothing to
    /// supervise without a child.
    pub fn spawn(command: &str, cwd: Option<&Path>, cols: u16, rows: u16) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new("/bin/sh");
        cmd.arg("-c");
        cmd.arg(command);
        cmd.env("TERM", "xterm-256color");

        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        // The slave end stays open inside the child; the parent only
        // ever touches the master.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let master_fd = pair
            .master
            .as_raw_fd()
            .ok_or_else(|| PtyError::Open("Failed to get master fd".to_string()))?;

        set_non_blocking(master_fd)?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Open(e.to_string()))?;

        Ok(Self {
            _master: Mutex::new(pair.master),
            child: Mutex::new(child),
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            master_fd,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        mutex_lock_or_recover(&self.child).process_id()
    }

    pub fn is_running(&self) -> bool {
        mutex_lock_or_recover(&self.child)
            .try_wait()
            .map(|status| status.is_none())
            .unwrap_or(false)
    }

    /// Write all of `data` into the child's input stream.
    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut writer = mutex_lock_or_recover(&self.writer);
        let mut offset = 0;
        while offset < data.len() {
            match writer.write(&data[offset..]) {
                Ok(0) => {
                    return Err(PtyError::Write(
                        "write returned 0 bytes, PTY closed".to_string(),
                    ));
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_for(self.master_fd, libc::POLLOUT, -1)
                        .map_err(|e| PtyError::Write(e.to_string()))?;
                }
                Err(e) => return Err(PtyError::Write(e.to_string())),
            }
        }
        Ok(())
    }

    /// Read whatever is available within `timeout_ms`, up to `buf.len()`
    /// bytes. Returns 0 when nothing became readable in time, which is
    /// what lets the caller observe elapsed silence.
    pub fn try_read(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, PtyError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let revents = wait_for(self.master_fd, libc::POLLIN, timeout_ms)
            .map_err(|e| PtyError::Read(e.to_string()))?;

        if revents & libc::POLLIN == 0 {
            // POLLHUP without data: child side closed, nothing to read.
            return Ok(0);
        }

        let mut reader = mutex_lock_or_recover(&self.reader);
        let mut total = 0;
        loop {
            match reader.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(PtyError::Read(e.to_string())),
            }
        }

        Ok(total)
    }

    /// SIGTERM the child's whole process group, falling back to killing
    /// the direct child if group signaling fails. Best-effort.
    pub fn terminate_group(&self) -> Result<(), PtyError> {
        let mut child = mutex_lock_or_recover(&self.child);

        let exited = child.try_wait().map(|s| s.is_some()).unwrap_or(true);
        if exited {
            return Ok(());
        }

        let pid = child
            .process_id()
            .ok_or_else(|| PtyError::Terminate("child has no pid".to_string()))?;

        // portable-pty makes the child a session leader, so its pid is
        // also its process-group id.
        let result = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGTERM) };
        if result == 0 {
            return Ok(());
        }

        child
            .kill()
            .map_err(|e| PtyError::Terminate(e.to_string()))
    }
}

fn set_non_blocking(fd: RawFd) -> Result<(), PtyError> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(PtyError::Open(io::Error::last_os_error().to_string()));
    }

    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }

    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(PtyError::Open(io::Error::last_os_error().to_string()));
    }

    Ok(())
}

/// poll(2) the fd for `events`, returning the revents mask. A negative
/// timeout blocks until ready.
fn wait_for(fd: RawFd, events: libc::c_short, timeout_ms: i32) -> Result<libc::c_short, io::Error> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    if result == 0 {
        return Ok(0);
    }

    if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        return Err(io::Error::other("poll error on PTY"));
    }

    Ok(pollfd.revents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use std::time::Instant;

    fn read_until(pty: &PtyHandle, needle: &str, timeout: Duration) -> String {
        let mut collected = String::new();
        let mut buf = [0u8; 4096];
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let n = pty.try_read(&mut buf, 100).unwrap_or(0);
            if n > 0 {
                collected.push_str(&String::from_utf8_lossy(&buf[..n]));
                if collected.contains(needle) {
                    break;
                }
            }
        }

        collected
    }

    #[test]
    fn test_spawn_captures_merged_output() {
        let pty = PtyHandle::spawn("echo out; echo err >&2", None, 80, 24).unwrap();
        let output = read_until(&pty, "err", Duration::from_secs(5));
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[test]
    fn test_spawn_reports_pid() {
        let pty = PtyHandle::spawn("sleep 5", None, 80, 24).unwrap();
        assert!(pty.pid().is_some());
        assert!(pty.is_running());
        pty.terminate_group().unwrap();
    }

    #[test]
    fn test_try_read_times_out_on_silence() {
        let pty = PtyHandle::spawn("sleep 5", None, 80, 24).unwrap();
        let mut buf = [0u8; 256];
        let n = pty.try_read(&mut buf, 200).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_write_reaches_child_stdin() {
        let pty = PtyHandle::spawn("cat", None, 80, 24).unwrap();
        pty.write(b"hello gate\n").unwrap();
        let output = read_until(&pty, "hello gate", Duration::from_secs(5));
        assert!(output.contains("hello gate"));
    }

    #[test]
    fn test_terminate_group_stops_child() {
        let pty = PtyHandle::spawn("sleep 30", None, 80, 24).unwrap();
        assert!(pty.is_running());
        pty.terminate_group().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pty.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!pty.is_running());
    }
}
