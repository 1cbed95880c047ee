use crate::error::{MigrationError, SchedulerError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::{collections::HashMap, sync::Arc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info};

pub type JobFuture = BoxFuture<'static, Result<(), MigrationError>>;

/// A unit of work the scheduler can run by key.
pub trait JobRunner: Send + Sync {
    fn run(&self) -> JobFuture;
}

#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn register_runner(&self, key: &str, runner: Arc<dyn JobRunner>);

    /// Runs the runner registered under `runner_key` once, as job `job_id`.
    async fn schedule_once(&self, job_id: &str, runner_key: &str) -> Result<(), SchedulerError>;

    /// Forgets the job. A job that is already running is left to observe its own cancellation.
    async fn unschedule(&self, job_id: &str) -> bool;

    async fn job_exists(&self, job_id: &str) -> bool;
}

/// In-process scheduler that runs each job on its own tokio task.
#[derive(Default)]
pub struct LocalScheduler {
    runners: Mutex<HashMap<String, Arc<dyn JobRunner>>>,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobScheduler for LocalScheduler {
    async fn register_runner(&self, key: &str, runner: Arc<dyn JobRunner>) {
        debug!(runner = key, "Registered job runner");
        self.runners.lock().await.insert(key.to_string(), runner);
    }

    async fn schedule_once(&self, job_id: &str, runner_key: &str) -> Result<(), SchedulerError> {
        let runner = self
            .runners
            .lock()
            .await
            .get(runner_key)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownRunner(runner_key.to_string()))?;

        let mut jobs = self.jobs.lock().await;
        if jobs.get(job_id).is_some_and(|handle| !handle.is_finished()) {
            return Err(SchedulerError::AlreadyScheduled(job_id.to_string()));
        }

        let job = runner.run();
        let id = job_id.to_string();
        let handle = tokio::spawn(async move {
            match job.await {
                Ok(()) => info!(job = %id, "Job finished"),
                Err(e) => error!(job = %id, error = %e, "Job failed"),
            }
        });
        jobs.insert(job_id.to_string(), handle);

        info!(job = job_id, runner = runner_key, "Job scheduled");
        Ok(())
    }

    async fn unschedule(&self, job_id: &str) -> bool {
        let removed = self.jobs.lock().await.remove(job_id);
        if removed.is_some() {
            info!(job = job_id, "Job unscheduled");
        }
        removed.is_some()
    }

    async fn job_exists(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .is_some_and(|handle| !handle.is_finished())
    }
}
