//! Narrow contract to the external intervention agent.
//!
//! The core never decides what an intervention does; it only registers
//! one job at startup (deduplicated by name), force-triggers it when the
//! watchdog fires, and removes it on shutdown. The concrete scheduling
//! mechanism lives behind [`InterventionService`] so it stays swappable.

use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;
use tracing::info;
use tracing::warn;

use crate::error::RunnerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
}

pub trait InterventionService: Send + Sync {
    fn list_jobs(&self) -> Result<Vec<JobInfo>, RunnerError>;
    fn remove_job(&self, id: &str) -> Result<(), RunnerError>;
    fn add_job(&self, name: &str, interval: &str, payload: &str) -> Result<String, RunnerError>;
    fn force_run(&self, id: &str) -> Result<(), RunnerError>;
}

/// Register the session's job, removing any stale job with the same
/// name first. Listing failures degrade to "assume no stale job".
pub fn register_job(
    service: &dyn InterventionService,
    name: &str,
    interval: &str,
    payload: &str,
) -> Result<String, RunnerError> {
    match service.list_jobs() {
        Ok(jobs) => {
            for job in jobs.iter().filter(|j| j.name == name) {
                info!(job_id = %job.id, name, "removing stale intervention job");
                if let Err(e) = service.remove_job(&job.id) {
                    warn!(job_id = %job.id, error = %e, "failed to remove stale job");
                }
            }
        }
        Err(e) => warn!(error = %e, "failed to list intervention jobs"),
    }

    let id = service.add_job(name, interval, payload)?;
    info!(job_id = %id, name, "intervention job registered");
    Ok(id)
}

/// Adapter that shells out to the agent's CLI.
///
/// Expected surface: `cron list --json`, `cron rm <id>`,
/// `cron add --name <n> --every <i> --session main --system-event <p> --json`,
/// `cron run --force <id>`. Output parsing is deliberately tolerant --
/// the CLI has shipped both bare arrays and `{"jobs": [...]}`, and both
/// `id` and `jobId` field names.
pub struct CliIntervention {
    program: PathBuf,
}

impl CliIntervention {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, RunnerError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| {
                RunnerError::Intervention(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(RunnerError::Intervention(format!(
                "{} {} exited with {}: {}",
                self.program.display(),
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl InterventionService for CliIntervention {
    fn list_jobs(&self) -> Result<Vec<JobInfo>, RunnerError> {
        let stdout = self.run(&["cron", "list", "--json"])?;
        let value: Value = serde_json::from_str(&stdout)
            .map_err(|e| RunnerError::Intervention(format!("bad job list JSON: {}", e)))?;
        Ok(parse_job_list(&value))
    }

    fn remove_job(&self, id: &str) -> Result<(), RunnerError> {
        self.run(&["cron", "rm", id])?;
        Ok(())
    }

    fn add_job(&self, name: &str, interval: &str, payload: &str) -> Result<String, RunnerError> {
        let stdout = self.run(&[
            "cron",
            "add",
            "--name",
            name,
            "--every",
            interval,
            "--session",
            "main",
            "--system-event",
            payload,
            "--json",
        ])?;

        let value: Value = serde_json::from_str(&stdout)
            .map_err(|e| RunnerError::Intervention(format!("bad add-job JSON: {}", e)))?;

        parse_job_id(&value).ok_or_else(|| {
            RunnerError::Intervention(format!("add-job output carries no job id: {}", stdout))
        })
    }

    fn force_run(&self, id: &str) -> Result<(), RunnerError> {
        self.run(&["cron", "run", "--force", id])?;
        Ok(())
    }
}

fn parse_job_list(value: &Value) -> Vec<JobInfo> {
    let jobs = match value {
        Value::Array(jobs) => jobs.as_slice(),
        Value::Object(map) => match map.get("jobs").and_then(Value::as_array) {
            Some(jobs) => jobs.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    jobs.iter()
        .filter_map(|job| {
            Some(JobInfo {
                id: parse_job_id(job)?,
                name: job.get("name")?.as_str()?.to_string(),
            })
        })
        .collect()
}

fn parse_job_id(value: &Value) -> Option<String> {
    value
        .get("id")
        .or_else(|| value.get("jobId"))
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
