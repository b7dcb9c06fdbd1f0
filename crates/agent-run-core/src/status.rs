//! The durable status record mediating the pause/resume handshake.
//!
//! The record is the cross-process synchronization primitive between the
//! runner and the external intervention agent: the runner writes it on
//! every state transition, the agent reads it, and the agent hands
//! control back by writing `{"state": "AI_DONE"}`. Every write replaces
//! the file atomically so no reader ever observes a partial record.

use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::error::RunnerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerState {
    #[serde(rename = "MONITORING")]
    Monitoring,
    #[serde(rename = "WAITING_FOR_AI")]
    WaitingForAi,
    #[serde(rename = "AI_DONE")]
    AiDone,
}

/// External contract: the intervention agent may write back as little as
/// `{"state": "AI_DONE"}`, so everything except `state` has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub state: RunnerState,
    #[serde(default)]
    pub updated_at: f64,
    #[serde(default)]
    pub runner_pid: u32,
    #[serde(default)]
    pub child_pid: Option<u32>,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub input_pipe: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl StatusRecord {
    pub fn new(
        state: RunnerState,
        child_pid: Option<u32>,
        cmd: impl Into<String>,
        input_pipe: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state,
            updated_at: epoch_seconds(),
            runner_pid: std::process::id(),
            child_pid,
            cmd: cmd.into(),
            input_pipe: input_pipe.into(),
            reason: None,
            info: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Atomically-replaced JSON file holding a [`StatusRecord`].
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write-temp-then-rename so readers only ever see a whole record.
    pub fn write(&self, record: &StatusRecord) -> Result<(), RunnerError> {
        let temp_path = self.path.with_extension("json.tmp");

        let file =
            File::create(&temp_path).map_err(|e| RunnerError::status("create_temp", e))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, record)
            .map_err(|e| RunnerError::status("write_json", e))?;

        fs::rename(&temp_path, &self.path).map_err(|e| RunnerError::status("rename", e))?;

        Ok(())
    }

    /// Callers treat failures as transient: the file is also written by
    /// an external, possibly slow, process.
    pub fn load(&self) -> Result<StatusRecord, RunnerError> {
        let file = File::open(&self.path).map_err(|e| RunnerError::status("open", e))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| RunnerError::status("parse", e))
    }
}
