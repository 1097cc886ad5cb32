//! The worker pool, draining the queues of the broker.

use crate::{
    broker::{Broker, Job},
    lock::{LockOutcome, TaskLocks},
    queue::WeightedRoundRobin,
    report::Report,
    Error,
};
use openlcs_entity::task_result::Status;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
    time::MissedTickBehavior,
};
use tracing::{instrument, Instrument};

/// The result of a task which ran to completion.
#[derive(Clone, Debug)]
pub struct TaskOutput {
    pub report: Report,
}

/// A failed task, possibly with a partial report.
#[derive(Debug)]
pub struct TaskFailure {
    pub error: Error,
    pub report: Option<Report>,
}

impl From<Error> for TaskFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            report: None,
        }
    }
}

/// The implementation of a named task.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, job: &Job) -> Result<TaskOutput, TaskFailure>;

    /// Called after each attempt, also when `run` got cancelled by the time limit.
    ///
    /// `last` is `true` when the job won't be attempted again.
    async fn cleanup(&self, _job: &Job, _last: bool) {}
}

#[derive(Clone, Debug)]
pub struct PoolOptions {
    pub workers: usize,
    pub time_limit: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    /// queues with their weights
    pub queues: Vec<(String, u32)>,
}

/// A fixed number of workers, fed from the broker.
///
/// Each job runs under the identity lock of its task name and arguments, with a hard time
/// limit. Failed jobs are re-queued with an exponential delay, unless the error is fatal or the
/// retries are used up.
pub struct WorkerPool {
    broker: Broker,
    locks: TaskLocks,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    options: PoolOptions,
}

impl WorkerPool {
    pub fn new(broker: Broker, locks: TaskLocks, options: PoolOptions) -> Self {
        Self {
            broker,
            locks,
            handlers: Default::default(),
            options,
        }
    }

    pub fn register(mut self, task_name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_name.into(), handler);
        self
    }

    /// Run the worker loop, forever.
    #[instrument(skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        self.broker.reset_stale().await?;

        let this = Arc::new(self);
        let semaphore = Arc::new(Semaphore::new(this.options.workers.max(1)));
        let mut schedule = WeightedRoundRobin::new(this.options.queues.clone());
        let mut running = JoinSet::new();

        let mut interval = tokio::time::interval(this.options.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!("Worker pool started with {} workers", this.options.workers);

        loop {
            let permit = semaphore.clone().acquire_owned().await?;

            // reap finished workers
            while running.try_join_next().is_some() {}

            match this.next_job(&mut schedule).await {
                Ok(Some(job)) => {
                    let this = this.clone();
                    running.spawn(async move { this.execute(job, permit).await });
                }
                Ok(None) => {
                    drop(permit);
                    interval.tick().await;
                }
                Err(err) => {
                    log::warn!("Failed to poll for jobs: {err}");
                    drop(permit);
                    interval.tick().await;
                }
            }
        }
    }

    /// Process all jobs which are due, returning once the queues are drained.
    ///
    /// Jobs which get re-queued with a delay are not waited for.
    pub async fn run_until_idle(self: &Arc<Self>) -> Result<usize, Error> {
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut schedule = WeightedRoundRobin::new(self.options.queues.clone());
        let mut running = JoinSet::new();
        let mut processed = 0;

        loop {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(anyhow::Error::from)?;

            match self.next_job(&mut schedule).await? {
                Some(job) => {
                    let this = self.clone();
                    running.spawn(async move { this.execute(job, permit).await });
                    processed += 1;
                }
                None => {
                    drop(permit);
                    // running jobs may fork new ones
                    if running.join_next().await.is_none() {
                        return Ok(processed);
                    }
                }
            }
        }
    }

    /// Claim a job, trying the queues in the order of the schedule.
    async fn next_job(&self, schedule: &mut WeightedRoundRobin<String>) -> Result<Option<Job>, Error> {
        for queue in schedule.next_order() {
            if let Some(job) = self.broker.claim(&queue).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn execute(&self, job: Job, _permit: OwnedSemaphorePermit) {
        let span = tracing::info_span!("job", execution_id = %job.execution_id, task_name = %job.task_name, attempt = job.attempt);
        if let Err(err) = self.execute_job(&job).instrument(span).await {
            log::error!("Failed to record outcome of {}: {err}", job.execution_id);
        }
    }

    async fn execute_job(&self, job: &Job) -> Result<(), Error> {
        let Some(handler) = self.handlers.get(&job.task_name).cloned() else {
            return self
                .broker
                .finish(
                    job.execution_id,
                    Status::Failure,
                    Some(format!("unknown task: {}", job.task_name)),
                    None,
                )
                .await;
        };

        let lock = match self
            .locks
            .acquire(&job.task_name, &job.args, &job.kwargs)
            .await
        {
            Ok(LockOutcome::Acquired(lock)) => lock,
            Ok(LockOutcome::Blocked { key }) => {
                log::info!("Duplicate submission suppressed: {key}");
                return self
                    .broker
                    .finish(job.execution_id, Status::Skipped, None, None)
                    .await;
            }
            Err(err) => {
                log::warn!("Failed to acquire lock for {}: {err}", job.execution_id);
                return self
                    .settle(job, handler.as_ref(), Err(TaskFailure::from(err)))
                    .await;
            }
        };

        let result = match self.broker.start(job.execution_id).await {
            Ok(()) => {
                log::info!("Starting task {}", job.execution_id);

                match tokio::time::timeout(self.options.time_limit, handler.run(job)).await {
                    Ok(result) => result,
                    Err(_) => Err(TaskFailure::from(Error::ProcedureTimeout(format!(
                        "exceeded time limit of {}",
                        humantime::Duration::from(self.options.time_limit)
                    )))),
                }
            }
            Err(err) => Err(TaskFailure::from(err)),
        };

        // released no matter who holds it by now
        if let Err(err) = self.locks.release(&lock.key).await {
            log::warn!("Failed to release lock {}: {err}", lock.key);
        }

        self.settle(job, handler.as_ref(), result).await
    }

    /// Record the outcome of an attempt, re-queueing the job if it may be retried.
    async fn settle(
        &self,
        job: &Job,
        handler: &dyn TaskHandler,
        result: Result<TaskOutput, TaskFailure>,
    ) -> Result<(), Error> {
        match result {
            Ok(output) => {
                handler.cleanup(job, true).await;
                log::info!("Task {} succeeded", job.execution_id);
                self.broker
                    .finish(job.execution_id, Status::Success, None, Some(&output.report))
                    .await
            }
            Err(TaskFailure { error, report }) => {
                let attempt = job.attempt + 1;
                let last = error.is_fatal() || attempt > self.options.max_retries;
                handler.cleanup(job, last).await;

                if last {
                    log::warn!("Task {} failed: {error}", job.execution_id);
                    self.broker
                        .finish(
                            job.execution_id,
                            Status::Failure,
                            Some(error.to_string()),
                            report.as_ref(),
                        )
                        .await
                } else {
                    let delay = self.retry_delay(job.attempt);
                    log::info!(
                        "Task {} failed, retry {attempt}/{} in {}: {error}",
                        job.execution_id,
                        self.options.max_retries,
                        humantime::Duration::from(delay)
                    );
                    self.broker
                        .retry(
                            job.execution_id,
                            attempt,
                            delay,
                            error.to_string(),
                            report.as_ref(),
                        )
                        .await
                }
            }
        }
    }

    fn retry_delay(&self, previous_attempts: u32) -> Duration {
        self.options
            .retry_delay
            .saturating_mul(2u32.saturating_pow(previous_attempts))
    }
}
