//! Background worker pool.
//!
//! A bounded job queue drained by `concurrency` loops. Each loop takes one
//! [`Job`] at a time and runs it through [`Workflow::execute`]; tasks of one
//! pipeline stay sequential, different documents run in parallel.
//!
//! On start the pool fails every live row left STARTED or PENDING by a
//! previous process. Their jobs only existed in that process's queue, so
//! nothing will ever finish them; failing them makes them retryable.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::DocflowError;
use crate::workflow::{Job, Workflow};

/// Reason recorded on rows a dead process left STARTED.
pub const INTERRUPTED_REASON: &str = "worker stopped before the task finished";

/// Reason recorded on rows whose queued job was lost with a dead process.
pub const ORPHANED_REASON: &str = "worker stopped before the task was started";

pub struct WorkerPool {
    workflow: Workflow,
    sender: mpsc::Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub async fn start(workflow: Workflow, config: &WorkerConfig) -> Result<Self> {
        let interrupted = workflow.tasks().fail_interrupted(INTERRUPTED_REASON).await?;
        if interrupted > 0 {
            warn!(count = interrupted, "marked interrupted tasks as failed");
        }
        let orphaned = workflow.tasks().fail_orphaned(ORPHANED_REASON).await?;
        if orphaned > 0 {
            warn!(count = orphaned, "marked orphaned pending tasks as failed");
        }

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..config.concurrency)
            .map(|worker| {
                let workflow = workflow.clone();
                let receiver = receiver.clone();
                tokio::spawn(worker_loop(worker, workflow, receiver))
            })
            .collect();

        info!(
            concurrency = config.concurrency,
            queue_capacity = config.queue_capacity,
            "worker pool started"
        );

        Ok(Self {
            workflow,
            sender,
            handles,
        })
    }

    /// Queue a job without waiting. A full queue fails the job's slots and
    /// returns [`DocflowError::QueueFull`].
    pub async fn submit(&self, job: Job) -> Result<()> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.workflow.abandon(job, "worker queue full").await?;
                Err(DocflowError::QueueFull.into())
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.workflow.abandon(job, "worker pool stopped").await?;
                anyhow::bail!("worker pool is stopped")
            }
        }
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker loop ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    workflow: Workflow,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(job) = job else {
            debug!(worker, "queue closed");
            break;
        };

        let hash = job.hash().clone();
        match workflow.execute(job).await {
            Ok(reports) => {
                for report in reports {
                    debug!(
                        worker,
                        %hash,
                        task = %report.task_name,
                        status = %report.status,
                        "task finished"
                    );
                }
            }
            Err(e) => error!(worker, %hash, error = %format!("{:#}", e), "job failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use crate::tasks::tests::test_registry;

    #[tokio::test]
    async fn test_start_fails_interrupted_rows() {
        let (registry, _tmp) = test_registry().await;
        let hash = crate::urls::document_hash(&url::Url::parse("https://example.com/a").unwrap());
        registry.create(&hash, "fetch-content", "parent").await.unwrap();
        let slot = registry.assign(&hash, "fetch-content", "t1").await.unwrap();
        std::mem::forget(slot);

        let workflow = crate::workflow::tests::test_workflow(registry.pool().clone());
        let pool = WorkerPool::start(workflow, &WorkerConfig::default())
            .await
            .unwrap();

        let row = registry.get_by_task_id("t1").await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert_eq!(row.status_reason.as_deref(), Some(INTERRUPTED_REASON));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_recovers_lost_pending_jobs() {
        let (registry, _tmp) = test_registry().await;
        let workflow = crate::workflow::tests::test_workflow(registry.pool().clone());

        let (registration, job) = workflow
            .register_url("https://example.com/lost", false)
            .await
            .unwrap();
        // The process dies with the job still queued.
        drop(job);

        let pool = WorkerPool::start(workflow.clone(), &WorkerConfig::default())
            .await
            .unwrap();

        let hash = crate::models::DocumentHash::parse(&registration.hash).unwrap();
        let row = registry
            .get_live(&hash, crate::workflow::FETCH_CONTENT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert_eq!(row.status_reason.as_deref(), Some(ORPHANED_REASON));

        let job = workflow
            .schedule_retry(&registration.hash, crate::workflow::FETCH_CONTENT)
            .await
            .unwrap();
        let reports = workflow.execute(job).await.unwrap();
        assert_eq!(reports[0].status, TaskStatus::Complete);

        let superseded = registry
            .get_by_task_id(row.task_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(superseded.retry_task_id.is_some());
        pool.shutdown().await;
    }
}
