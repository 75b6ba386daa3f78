//! Worker pool executing [`StageJob`]s.
//!
//! Jobs go through a bounded `mpsc` queue as JSON. A dispatcher task takes
//! a semaphore permit per job and spawns it, so at most `workers` jobs run
//! at once. Each job gets stage-level retries with a cooldown; when they
//! are exhausted the runner's [`JobRunner::on_exhausted`] hook decides what
//! state to leave behind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::StageError;
use crate::jobs::{JobHandle, JobOutcome, StageJob};

/// Executes decoded jobs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run one attempt. The returned value becomes the job's detail.
    async fn run(&self, job_id: Uuid, job: &StageJob) -> Result<Value, StageError>;

    /// Called once after the final failed attempt.
    async fn on_exhausted(&self, job_id: Uuid, job: &StageJob, error: &StageError);
}

const _: () = {
    fn _assert_object_safe(_: &dyn JobRunner) {}
};

/// Stage-level retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts: retries + 1,
            cooldown,
        }
    }
}

/// Message sent through the queue.
struct Envelope {
    id: Uuid,
    payload: String,
    reply: oneshot::Sender<JobOutcome>,
}

pub struct WorkerPool {
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl WorkerPool {
    /// Start the dispatcher with `workers` concurrent slots.
    pub fn start(runner: Arc<dyn JobRunner>, workers: usize, policy: RetryPolicy) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Envelope>(workers * 16);
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(
            rx,
            runner,
            Arc::new(Semaphore::new(workers)),
            workers as u32,
            policy,
            cancel.clone(),
        ));
        Self {
            tx,
            cancel,
            dispatcher,
        }
    }

    /// Enqueue a job and return its handle.
    pub async fn submit(&self, job: StageJob) -> Result<JobHandle, StageError> {
        let id = Uuid::new_v4();
        let payload = job
            .encode()
            .map_err(|e| StageError::MalformedResponse(format!("job not serializable: {e}")))?;
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(Envelope { id, payload, reply })
            .await
            .map_err(|_| StageError::precondition("worker pool is shut down"))?;
        tracing::debug!(job_id = %id, kind = job.kind(), "job queued");
        Ok(JobHandle::new(id, job.kind(), outcome))
    }

    /// Stop accepting work. Jobs already running finish; queued jobs
    /// resolve as [`JobOutcome::Cancelled`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Shut down and wait until running jobs have finished.
    pub async fn join(self) {
        self.cancel.cancel();
        let _ = self.dispatcher.await;
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<Envelope>,
    runner: Arc<dyn JobRunner>,
    semaphore: Arc<Semaphore>,
    slots: u32,
    policy: RetryPolicy,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            envelope = rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = cancel.cancelled() => break,
        };

        let runner = runner.clone();
        tokio::spawn(async move {
            let outcome = execute(runner.as_ref(), envelope.id, &envelope.payload, policy).await;
            drop(permit);
            let _ = envelope.reply.send(outcome);
        });
    }
    // Remaining queued envelopes are dropped, which resolves their
    // handles as cancelled.
    rx.close();
    // Every slot back means every running job has replied.
    let _ = semaphore.acquire_many(slots).await;
    tracing::debug!("worker pool dispatcher stopped");
}

async fn execute(runner: &dyn JobRunner, id: Uuid, payload: &str, policy: RetryPolicy) -> JobOutcome {
    let job = match StageJob::decode(payload) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "undecodable job payload");
            return JobOutcome::Failed {
                attempts: 0,
                error: format!("undecodable job payload: {e}"),
            };
        }
    };

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        tracing::info!(job_id = %id, kind = job.kind(), attempt, "job started");
        match runner.run(id, &job).await {
            Ok(detail) => {
                tracing::info!(job_id = %id, kind = job.kind(), attempt, "job succeeded");
                return JobOutcome::Succeeded {
                    attempts: attempt,
                    detail,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    job_id = %id,
                    kind = job.kind(),
                    attempt,
                    error = %e,
                    cooldown_secs = policy.cooldown.as_secs(),
                    "job failed, retrying after cooldown"
                );
                tokio::time::sleep(policy.cooldown).await;
            }
            Err(e) => {
                tracing::warn!(job_id = %id, kind = job.kind(), attempt, error = %e, "job failed");
                runner.on_exhausted(id, &job, &e).await;
                return JobOutcome::Failed {
                    attempts: attempt,
                    error: e.to_string(),
                };
            }
        }
    }
}
