use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use agent_run_common::mutex_lock_or_recover;

use crate::error::RunnerError;
use crate::intervention::InterventionService;
use crate::intervention::JobInfo;

/// Recording intervention service for tests.
#[derive(Default)]
pub struct MockIntervention {
    jobs: Mutex<Vec<JobInfo>>,
    removed: Mutex<Vec<String>>,
    added: Mutex<Vec<JobInfo>>,
    forced: Mutex<Vec<String>>,
    fail_list: AtomicBool,
    next_id: AtomicUsize,
}

impl MockIntervention {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_job(&self, id: &str, name: &str) {
        mutex_lock_or_recover(&self.jobs).push(JobInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::Relaxed);
    }

    pub fn removed(&self) -> Vec<String> {
        mutex_lock_or_recover(&self.removed).clone()
    }

    pub fn added_names(&self) -> Vec<String> {
        mutex_lock_or_recover(&self.added)
            .iter()
            .map(|j| j.name.clone())
            .collect()
    }

    pub fn forced(&self) -> Vec<String> {
        mutex_lock_or_recover(&self.forced).clone()
    }
}

impl InterventionService for MockIntervention {
    fn list_jobs(&self) -> Result<Vec<JobInfo>, RunnerError> {
        if self.fail_list.load(Ordering::Relaxed) {
            return Err(RunnerError::Intervention("list unavailable".into()));
        }
        Ok(mutex_lock_or_recover(&self.jobs).clone())
    }

    fn remove_job(&self, id: &str) -> Result<(), RunnerError> {
        mutex_lock_or_recover(&self.jobs).retain(|j| j.id != id);
        mutex_lock_or_recover(&self.removed).push(id.to_string());
        Ok(())
    }

    fn add_job(&self, name: &str, _interval: &str, _payload: &str) -> Result<String, RunnerError> {
        let id = format!("job-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let job = JobInfo {
            id: id.clone(),
            name: name.to_string(),
        };
        mutex_lock_or_recover(&self.jobs).push(job.clone());
        mutex_lock_or_recover(&self.added).push(job);
        Ok(id)
    }

    fn force_run(&self, id: &str) -> Result<(), RunnerError> {
        mutex_lock_or_recover(&self.forced).push(id.to_string());
        Ok(())
    }
}
