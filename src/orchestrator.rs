//! Bounded-time task execution.
//!
//! [`TaskRunner::run`] is the single place where the outcome of a task body
//! (success, error, panic, deadline, cancellation) becomes a terminal row in
//! the registry. Every invocation that gets past `assign` writes exactly one
//! terminal status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{info, warn};

use crate::container::{get_output, ContentTypeContainer, ProcessingContext};
use crate::error::DocflowError;
use crate::models::TaskStatus;
use crate::tasks::TaskRegistry;

/// A named unit of work over one document.
#[async_trait]
pub trait Processor: Send + Sync {
    fn task_name(&self) -> &str;

    /// True when the output already exists and the task can be skipped.
    async fn is_processed(&self, ctx: &ProcessingContext) -> Result<bool>;

    async fn process(&self, ctx: &ProcessingContext) -> Result<()>;
}

/// Runs a [`ContentTypeContainer`] as a task.
pub struct ContainerProcessor<C> {
    name: String,
    container: C,
}

impl<C> ContainerProcessor<C> {
    pub fn new(name: impl Into<String>, container: C) -> Self {
        Self {
            name: name.into(),
            container,
        }
    }
}

#[async_trait]
impl<C> Processor for ContainerProcessor<C>
where
    C: ContentTypeContainer + 'static,
{
    fn task_name(&self) -> &str {
        &self.name
    }

    async fn is_processed(&self, ctx: &ProcessingContext) -> Result<bool> {
        self.container.has_processed(ctx).await
    }

    async fn process(&self, ctx: &ProcessingContext) -> Result<()> {
        get_output(&self.container, ctx).await.map(|_| ())
    }
}

/// Final state of one task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub reason: Option<String>,
}

/// Live cancellation tokens keyed by task id.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for `task_id`. The entry is removed when the
    /// returned guard is dropped.
    pub fn register(&self, task_id: &str) -> CancellationGuard {
        let token = CancellationToken::new();
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(task_id.to_string(), token.clone());
        }
        CancellationGuard {
            registry: self.clone(),
            task_id: task_id.to_string(),
            token,
        }
    }

    /// Cancel a scheduled or running task. Returns false if none is registered.
    pub fn cancel(&self, task_id: &str) -> bool {
        let token = match self.tokens.lock() {
            Ok(tokens) => tokens.get(task_id).cloned(),
            Err(_) => None,
        };
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.tokens
            .lock()
            .map(|tokens| tokens.contains_key(task_id))
            .unwrap_or(false)
    }
}

pub struct CancellationGuard {
    registry: CancellationRegistry,
    task_id: String,
    token: CancellationToken,
}

impl CancellationGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        if let Ok(mut tokens) = self.registry.tokens.lock() {
            tokens.remove(&self.task_id);
        }
    }
}

#[derive(Clone)]
pub struct TaskRunner {
    registry: TaskRegistry,
    deadline: Duration,
}

impl TaskRunner {
    pub fn new(registry: TaskRegistry, deadline: Duration) -> Self {
        Self { registry, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Assign `task_id` to the processor's slot for `ctx.hash` and run it.
    ///
    /// Errors are returned only when the slot cannot be assigned or the
    /// terminal status cannot be written; failures of the body itself are
    /// reported through [`TaskReport::status`].
    pub async fn run(
        &self,
        processor: Arc<dyn Processor>,
        ctx: &ProcessingContext,
        task_id: &str,
        cancel: CancellationToken,
    ) -> Result<TaskReport> {
        let task_name = processor.task_name().to_string();
        let slot = self.registry.assign(&ctx.hash, &task_name, task_id).await?;
        info!(hash = %ctx.hash, task = %task_name, task_id, force = ctx.force, "task started");

        if !ctx.force {
            match processor.is_processed(ctx).await {
                Ok(true) => {
                    let reason = "already processed".to_string();
                    slot.finish(TaskStatus::Skipped, Some(reason.clone()))
                        .await?;
                    info!(hash = %ctx.hash, task = %task_name, task_id, "task skipped");
                    return Ok(TaskReport {
                        task_id: task_id.to_string(),
                        task_name,
                        status: TaskStatus::Skipped,
                        reason: Some(reason),
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    let (status, reason) = classify_error(&e);
                    slot.finish(status, Some(reason.clone())).await?;
                    warn!(hash = %ctx.hash, task = %task_name, task_id, %status, %reason, "task finished");
                    return Ok(TaskReport {
                        task_id: task_id.to_string(),
                        task_name,
                        status,
                        reason: Some(reason),
                    });
                }
            }
        }

        let body = processor.clone();
        let body_ctx = ctx.clone();
        // Dropping `run` aborts the body along with it.
        let mut handle = AbortOnDropHandle::new(tokio::spawn(async move {
            body.process(&body_ctx).await
        }));

        let outcome = tokio::select! {
            joined = tokio::time::timeout(self.deadline, &mut handle) => Some(joined),
            _ = cancel.cancelled() => None,
        };

        let (status, reason) = match outcome {
            None => {
                handle.abort();
                (TaskStatus::Cancelled, Some("cancelled by request".to_string()))
            }
            Some(Err(_elapsed)) => {
                handle.abort();
                (
                    TaskStatus::Timeout,
                    Some(format!("exceeded deadline of {}s", self.deadline.as_secs_f64())),
                )
            }
            Some(Ok(Ok(Ok(())))) => (TaskStatus::Complete, None),
            Some(Ok(Ok(Err(e)))) => {
                let (status, reason) = classify_error(&e);
                (status, Some(reason))
            }
            Some(Ok(Err(join_err))) => classify_join_error(join_err),
        };

        slot.finish(status, reason.clone()).await?;
        if status == TaskStatus::Complete {
            info!(hash = %ctx.hash, task = %task_name, task_id, "task complete");
        } else {
            warn!(
                hash = %ctx.hash,
                task = %task_name,
                task_id,
                %status,
                reason = reason.as_deref().unwrap_or(""),
                "task finished"
            );
        }

        Ok(TaskReport {
            task_id: task_id.to_string(),
            task_name,
            status,
            reason,
        })
    }

    /// Assign and immediately fail a slot whose inputs are unavailable.
    pub async fn fail_unrun(
        &self,
        ctx: &ProcessingContext,
        task_name: &str,
        task_id: &str,
        reason: &str,
    ) -> Result<TaskReport> {
        let slot = self.registry.assign(&ctx.hash, task_name, task_id).await?;
        slot.finish(TaskStatus::Failed, Some(reason.to_string()))
            .await?;
        warn!(hash = %ctx.hash, task = task_name, task_id, reason, "task not run");
        Ok(TaskReport {
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            status: TaskStatus::Failed,
            reason: Some(reason.to_string()),
        })
    }
}

fn classify_error(err: &anyhow::Error) -> (TaskStatus, String) {
    match err.downcast_ref::<DocflowError>() {
        Some(DocflowError::ProcessingFailure(_)) | Some(DocflowError::NoContentExtracted { .. }) => {
            (TaskStatus::Failed, format!("{:#}", err))
        }
        Some(DocflowError::Timeout) => (TaskStatus::Timeout, format!("{:#}", err)),
        Some(DocflowError::Cancelled) => (TaskStatus::Cancelled, format!("{:#}", err)),
        _ => (TaskStatus::Failed, format!("unexpected error: {:#}", err)),
    }
}

fn classify_join_error(err: JoinError) -> (TaskStatus, Option<String>) {
    if !err.is_panic() {
        return (TaskStatus::Cancelled, Some("task aborted".to_string()));
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    (TaskStatus::Failed, Some(format!("task panicked: {}", message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::tests::test_registry;
    use crate::urls::canonicalize;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Sleep(Duration),
        AlreadyDone,
    }

    struct FakeProcessor(Behaviour);

    #[async_trait]
    impl Processor for FakeProcessor {
        fn task_name(&self) -> &str {
            "summarize"
        }

        async fn is_processed(&self, _ctx: &ProcessingContext) -> Result<bool> {
            Ok(matches!(self.0, Behaviour::AlreadyDone))
        }

        async fn process(&self, _ctx: &ProcessingContext) -> Result<()> {
            match &self.0 {
                Behaviour::Succeed | Behaviour::AlreadyDone => Ok(()),
                Behaviour::Fail => Err(DocflowError::ProcessingFailure(
                    "summary produced no output".into(),
                )
                .into()),
                Behaviour::Panic => panic!("model exploded"),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(())
                }
            }
        }
    }

    async fn run(
        behaviour: Behaviour,
        deadline: Duration,
        cancel: CancellationToken,
        force: bool,
    ) -> (TaskReport, TaskRegistry, tempfile::TempDir) {
        let (registry, tmp) = test_registry().await;
        let (url, hash) = canonicalize("https://example.com/post").unwrap();
        registry.create(&hash, "summarize", "parent").await.unwrap();

        let runner = TaskRunner::new(registry.clone(), deadline);
        let ctx = ProcessingContext::new(hash, url, force);
        let report = runner
            .run(Arc::new(FakeProcessor(behaviour)), &ctx, "task-1", cancel)
            .await
            .unwrap();
        (report, registry, tmp)
    }

    async fn stored_status(registry: &TaskRegistry) -> (TaskStatus, Option<String>) {
        let row = registry.get_by_task_id("task-1").await.unwrap().unwrap();
        (row.status, row.status_reason)
    }

    #[tokio::test]
    async fn test_success_is_complete() {
        let (report, registry, _tmp) = run(
            Behaviour::Succeed,
            Duration::from_secs(5),
            CancellationToken::new(),
            false,
        )
        .await;
        assert_eq!(report.status, TaskStatus::Complete);
        assert_eq!(stored_status(&registry).await, (TaskStatus::Complete, None));
    }

    #[tokio::test]
    async fn test_processing_failure_is_failed_with_reason() {
        let (report, registry, _tmp) = run(
            Behaviour::Fail,
            Duration::from_secs(5),
            CancellationToken::new(),
            false,
        )
        .await;
        assert_eq!(report.status, TaskStatus::Failed);
        let (status, reason) = stored_status(&registry).await;
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(reason.as_deref(), Some("summary produced no output"));
    }

    #[tokio::test]
    async fn test_panic_is_failed() {
        let (report, registry, _tmp) = run(
            Behaviour::Panic,
            Duration::from_secs(5),
            CancellationToken::new(),
            false,
        )
        .await;
        assert_eq!(report.status, TaskStatus::Failed);
        let (_, reason) = stored_status(&registry).await;
        assert!(reason.unwrap().contains("model exploded"));
    }

    #[tokio::test]
    async fn test_deadline_is_timeout() {
        let (report, registry, _tmp) = run(
            Behaviour::Sleep(Duration::from_millis(500)),
            Duration::from_millis(100),
            CancellationToken::new(),
            false,
        )
        .await;
        assert_eq!(report.status, TaskStatus::Timeout);
        assert_eq!(stored_status(&registry).await.0, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn test_cancel_is_cancelled() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let (report, registry, _tmp) = run(
            Behaviour::Sleep(Duration::from_secs(30)),
            Duration::from_secs(60),
            token,
            false,
        )
        .await;
        assert_eq!(report.status, TaskStatus::Cancelled);
        assert_eq!(stored_status(&registry).await.0, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_existing_output_is_skipped_unless_forced() {
        let (report, _registry, _tmp) = run(
            Behaviour::AlreadyDone,
            Duration::from_secs(5),
            CancellationToken::new(),
            false,
        )
        .await;
        assert_eq!(report.status, TaskStatus::Skipped);
        assert_eq!(report.reason.as_deref(), Some("already processed"));

        let (forced, _registry, _tmp) = run(
            Behaviour::AlreadyDone,
            Duration::from_secs(5),
            CancellationToken::new(),
            true,
        )
        .await;
        assert_eq!(forced.status, TaskStatus::Complete);
    }

    struct EmptySummarizer;

    #[async_trait]
    impl crate::traits::Summarizer for EmptySummarizer {
        async fn summarize(&self, _segments: &[crate::models::DocumentSegment]) -> Result<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_empty_summary_through_runner_is_failed() {
        use crate::container::{DocumentContentContainer, SummaryContainer};
        use crate::models::{ArtifactKind, DocumentSegment};
        use crate::store::{ContentStore, InMemoryStore};
        use crate::workflow::tests::FakeFetcher;

        let (registry, _tmp) = test_registry().await;
        let (url, hash) = canonicalize("https://example.com/post").unwrap();
        registry.create(&hash, "summarize", "parent").await.unwrap();

        let store: Arc<dyn ContentStore> = Arc::new(InMemoryStore::new());
        let content = DocumentContentContainer::new(
            store.clone(),
            Arc::new(FakeFetcher {
                segments: vec![DocumentSegment::new("body")],
                delay: Duration::ZERO,
            }),
        );
        let summary = SummaryContainer::new(store.clone(), content, Arc::new(EmptySummarizer));
        let processor = Arc::new(ContainerProcessor::new("summarize", summary));

        let runner = TaskRunner::new(registry.clone(), Duration::from_secs(5));
        let ctx = ProcessingContext::new(hash.clone(), url, false);
        let report = runner
            .run(processor, &ctx, "task-1", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, TaskStatus::Failed);
        let (status, reason) = stored_status(&registry).await;
        assert_eq!(status, TaskStatus::Failed);
        assert!(reason.unwrap().contains("summary produced no output"));
        assert!(!store
            .has_artifact(&hash, ArtifactKind::Summary)
            .await
            .unwrap());
    }

    struct SlowFlag(Arc<std::sync::atomic::AtomicBool>);

    #[async_trait]
    impl Processor for SlowFlag {
        fn task_name(&self) -> &str {
            "summarize"
        }

        async fn is_processed(&self, _ctx: &ProcessingContext) -> Result<bool> {
            Ok(false)
        }

        async fn process(&self, _ctx: &ProcessingContext) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dropping_run_aborts_body() {
        let (registry, _tmp) = test_registry().await;
        let (url, hash) = canonicalize("https://example.com/post").unwrap();
        registry.create(&hash, "summarize", "parent").await.unwrap();

        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let runner = TaskRunner::new(registry.clone(), Duration::from_secs(5));
        let ctx = ProcessingContext::new(hash, url, false);
        let dropped = tokio::time::timeout(
            Duration::from_millis(50),
            runner.run(
                Arc::new(SlowFlag(finished.clone())),
                &ctx,
                "task-1",
                CancellationToken::new(),
            ),
        )
        .await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(stored_status(&registry).await.0, TaskStatus::Failed);
    }

    #[test]
    fn test_cancellation_registry() {
        let registry = CancellationRegistry::new();
        let guard = registry.register("t1");
        assert!(registry.is_running("t1"));
        assert!(registry.cancel("t1"));
        assert!(guard.token().is_cancelled());
        drop(guard);
        assert!(!registry.is_running("t1"));
        assert!(!registry.cancel("t1"));
    }
}
