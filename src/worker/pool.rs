//! In-process job queue and worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::{Error, JobError, PipelineError};
use crate::llm::RetryPolicy;
use crate::pipeline::types::StageOutcome;
use crate::pipeline::{ProcessingStage, ScreeningStage};
use crate::store::Database;
use crate::worker::job::{Job, JobDispatcher, JobKind};

/// Sending half of the job channel.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn dispatch(&self, kind: JobKind, message_id: &str) -> Result<Uuid, JobError> {
        let job = Job::new(kind, message_id);
        let id = job.id;
        self.tx.send(job).map_err(|_| JobError::QueueClosed)?;
        debug!(job_id = %id, kind = %kind, message_id, "Job dispatched");
        Ok(id)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub screening_timeout: Duration,
    pub processing_timeout: Duration,
    /// Retry schedule for transient stage errors.
    pub retry: RetryPolicy,
}

/// Runs stage jobs with bounded concurrency and a per-job time budget.
pub struct WorkerPool {
    screening: Arc<ScreeningStage>,
    processing: Arc<ProcessingStage>,
    store: Arc<dyn Database>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(
        screening: Arc<ScreeningStage>,
        processing: Arc<ProcessingStage>,
        store: Arc<dyn Database>,
        config: PoolConfig,
    ) -> Self {
        Self {
            screening,
            processing,
            store,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        }
    }

    /// Consume jobs until every sender is dropped.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Job>) {
        info!(concurrency = self.config.concurrency, "Worker pool started");
        while let Some(job) = rx.recv().await {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let pool = Arc::clone(&self);
            tokio::spawn(async move {
                let _ = pool.execute(&job).await;
                drop(permit);
            });
        }
        info!("Worker pool stopped");
    }

    fn timeout_for(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Screen => self.config.screening_timeout,
            JobKind::Process => self.config.processing_timeout,
        }
    }

    /// Run one job to completion, including retries and the failure handler.
    ///
    /// A job that fails for good or exceeds its time budget leaves the
    /// message `failed` with the reason in `last_error`.
    pub async fn execute(&self, job: &Job) -> Result<StageOutcome, Error> {
        let id = job.message_id.as_str();
        let kind = job.kind;
        let timeout = self.timeout_for(kind);
        debug!(job_id = %job.id, kind = %kind, message_id = id, "Job started");

        let attempts = self.config.retry.run(kind.as_str(), |_| async move {
            match kind {
                JobKind::Screen => self.screening.run(id).await,
                JobKind::Process => self.processing.run(id).await,
            }
        });

        match tokio::time::timeout(timeout, attempts).await {
            Ok(Ok(outcome)) => {
                info!(job_id = %job.id, kind = %kind, message_id = id, outcome = ?outcome, "Job finished");
                Ok(outcome)
            }
            Ok(Err(PipelineError::MessageNotFound(_))) => {
                error!(job_id = %job.id, message_id = id, "Job for unknown message dropped");
                Err(PipelineError::MessageNotFound(id.to_string()).into())
            }
            Ok(Err(e)) => {
                error!(job_id = %job.id, kind = %kind, message_id = id, error = %e, "Job failed");
                self.mark_failed(id, &e.to_string()).await;
                Err(e.into())
            }
            Err(_) => {
                let err = JobError::Timeout {
                    message_id: id.to_string(),
                    timeout,
                };
                warn!(
                    job_id = %job.id,
                    kind = %kind,
                    message_id = id,
                    timeout_secs = timeout.as_secs(),
                    "Job timed out"
                );
                self.mark_failed(id, &err.to_string()).await;
                Err(err.into())
            }
        }
    }

    /// Terminal job failure: force the message to `failed`.
    async fn mark_failed(&self, id: &str, reason: &str) {
        match self.store.force_fail(id, reason).await {
            Ok(true) => info!(message_id = id, "Message marked failed by job failure handler"),
            Ok(false) => debug!(message_id = id, "Message already terminal, nothing to fail"),
            Err(e) => error!(message_id = id, error = %e, "Failed to record job failure"),
        }
    }
}
