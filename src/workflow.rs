//! Document workflow: registration, scheduling, and execution.
//!
//! The workflow is the only place where the content store, both registries,
//! the loader table, and the analysis collaborators meet. Callers (CLI,
//! HTTP server, worker pool) go through it.
//!
//! # Pipeline
//!
//! ```text
//! register_url ──▶ fetch-content ──┬──▶ summarize
//!                                  └──▶ extract-relations
//! ```
//!
//! Scheduling and execution are split: [`Workflow::register_url`] and
//! [`Workflow::schedule_retry`] write task rows and return a [`Job`];
//! [`Workflow::execute`] runs it, inline or on a worker.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::analysis::create_analyzers;
use crate::config::Config;
use crate::container::{
    DocumentContentContainer, EntityRelationsContainer, ProcessingContext, SummaryContainer,
};
use crate::db;
use crate::documents::DocumentRegistry;
use crate::error::DocflowError;
use crate::loaders::LoaderTable;
use crate::migrate;
use crate::models::{
    Artifact, ArtifactKind, DocumentHash, EntityRelation, TaskRegistration, TaskStatus,
};
use crate::orchestrator::{
    CancellationGuard, CancellationRegistry, ContainerProcessor, Processor, TaskReport, TaskRunner,
};
use crate::store::{ContentStore, DiskStore};
use crate::tasks::{TaskQuery, TaskRegistry};
use crate::traits::{filter_erroneous_relations, DocumentFetcher, RelationExtractor, Summarizer};

pub const FETCH_CONTENT: &str = "fetch-content";
pub const SUMMARIZE: &str = "summarize";
pub const EXTRACT_RELATIONS: &str = "extract-relations";

/// Task slots created for every registered document, in run order.
pub const PIPELINE: [&str; 3] = [FETCH_CONTENT, SUMMARIZE, EXTRACT_RELATIONS];

/// Result of [`Workflow::register_url`].
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    /// Correlation id of the scheduled run; `None` for a duplicate.
    pub result_id: Option<String>,
    pub hash: String,
    pub url: String,
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub url: String,
    pub hash: String,
    pub has_summary: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryView {
    pub hash: String,
    pub summary: Option<String>,
    pub has_summary: bool,
}

/// One task slot, scheduled and cancellable before it starts.
pub struct ScheduledTask {
    pub task_name: String,
    pub task_id: String,
    cancel: CancellationGuard,
}

/// Work produced by scheduling, consumed by [`Workflow::execute`].
pub enum Job {
    Pipeline {
        ctx: ProcessingContext,
        tasks: Vec<ScheduledTask>,
    },
    Retry {
        ctx: ProcessingContext,
        task: ScheduledTask,
    },
}

impl Job {
    pub fn hash(&self) -> &DocumentHash {
        match self {
            Job::Pipeline { ctx, .. } | Job::Retry { ctx, .. } => &ctx.hash,
        }
    }

    pub fn task_ids(&self) -> Vec<String> {
        match self {
            Job::Pipeline { tasks, .. } => tasks.iter().map(|t| t.task_id.clone()).collect(),
            Job::Retry { task, .. } => vec![task.task_id.clone()],
        }
    }
}

/// Everything needed to assemble a [`Workflow`].
pub struct WorkflowParts {
    pub pool: SqlitePool,
    pub store: Arc<dyn ContentStore>,
    /// Resolves loader specs for registration.
    pub loaders: Arc<LoaderTable>,
    /// Produces content. Usually the same loader table.
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub summarizer: Arc<dyn Summarizer>,
    pub extractor: Arc<dyn RelationExtractor>,
    pub task_timeout: std::time::Duration,
}

#[derive(Clone)]
pub struct Workflow {
    tasks: TaskRegistry,
    documents: DocumentRegistry,
    store: Arc<dyn ContentStore>,
    loaders: Arc<LoaderTable>,
    runner: TaskRunner,
    cancellations: CancellationRegistry,
    fetch: Arc<dyn Processor>,
    summarize: Arc<dyn Processor>,
    extract: Arc<dyn Processor>,
}

impl Workflow {
    pub fn new(parts: WorkflowParts) -> Self {
        let tasks = TaskRegistry::new(parts.pool.clone());
        let content = DocumentContentContainer::new(parts.store.clone(), parts.fetcher);
        let summary =
            SummaryContainer::new(parts.store.clone(), content.clone(), parts.summarizer);
        let relations =
            EntityRelationsContainer::new(parts.store.clone(), content.clone(), parts.extractor);

        Self {
            runner: TaskRunner::new(tasks.clone(), parts.task_timeout),
            tasks,
            documents: DocumentRegistry::new(parts.pool),
            store: parts.store,
            loaders: parts.loaders,
            cancellations: CancellationRegistry::new(),
            fetch: Arc::new(ContainerProcessor::new(FETCH_CONTENT, content)),
            summarize: Arc::new(ContainerProcessor::new(SUMMARIZE, summary)),
            extract: Arc::new(ContainerProcessor::new(EXTRACT_RELATIONS, relations)),
        }
    }

    /// Connect, migrate, and wire the standard collaborators from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let loaders = Arc::new(LoaderTable::standard(&config.loaders)?);
        let analyzers = create_analyzers(&config.analysis)?;

        Ok(Self::new(WorkflowParts {
            pool,
            store: Arc::new(DiskStore::new(&config.store.root)),
            loaders: loaders.clone(),
            fetcher: loaders,
            summarizer: analyzers.summarizer,
            extractor: analyzers.extractor,
            task_timeout: config.worker.task_timeout(),
        }))
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn documents(&self) -> &DocumentRegistry {
        &self.documents
    }

    fn processor(&self, task_name: &str) -> Option<Arc<dyn Processor>> {
        match task_name {
            FETCH_CONTENT => Some(self.fetch.clone()),
            SUMMARIZE => Some(self.summarize.clone()),
            EXTRACT_RELATIONS => Some(self.extract.clone()),
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Scheduling
    // ═══════════════════════════════════════════════════════════════════

    /// Register `raw_url` and schedule its pipeline.
    ///
    /// Returns `(registration, None)` when the document is already known
    /// and `force` is false; nothing is scheduled in that case.
    pub async fn register_url(
        &self,
        raw_url: &str,
        force: bool,
    ) -> Result<(Registration, Option<Job>)> {
        let (url, hash) = crate::urls::canonicalize(raw_url)
            .map_err(|_| DocflowError::UnsupportedUrl(raw_url.trim().to_string()))?;
        let spec = self
            .loaders
            .spec_for(&url)
            .ok_or_else(|| DocflowError::UnsupportedUrl(url.to_string()))?;

        let (hash, url) = match self.documents.register(&hash, url.as_str(), &spec).await {
            Ok(()) => (hash, url),
            Err(DocflowError::DuplicateRegistration { hash: existing }) => {
                let existing = DocumentHash::parse(&existing)
                    .ok_or_else(|| DocflowError::not_found("document", existing.clone()))?;
                let url = match self.documents.get(&existing).await? {
                    Some(record) => Url::parse(&record.url).unwrap_or(url),
                    None => url,
                };
                if !force {
                    info!(hash = %existing, "document already registered");
                    return Ok((
                        Registration {
                            result_id: None,
                            hash: existing.to_string(),
                            url: url.to_string(),
                            duplicate: true,
                        },
                        None,
                    ));
                }
                (existing, url)
            }
            Err(e) => return Err(e.into()),
        };

        let parent_id = Uuid::new_v4().to_string();
        let mut tasks = Vec::with_capacity(PIPELINE.len());
        for task_name in PIPELINE {
            tasks.push(self.schedule_slot(&hash, task_name, &parent_id).await?);
        }
        info!(%hash, url = %url, parent_id = %parent_id, force, "pipeline scheduled");

        let registration = Registration {
            result_id: Some(parent_id),
            hash: hash.to_string(),
            url: url.to_string(),
            duplicate: false,
        };
        let ctx = ProcessingContext::new(hash, url, force);
        Ok((registration, Some(Job::Pipeline { ctx, tasks })))
    }

    /// Ensure a live PENDING row for the slot and allocate its task id.
    ///
    /// A terminal live row is never reset: it is superseded by the new
    /// task id and a fresh row is created.
    async fn schedule_slot(
        &self,
        hash: &DocumentHash,
        task_name: &str,
        parent_id: &str,
    ) -> Result<ScheduledTask> {
        let task_id = Uuid::new_v4().to_string();

        if let Some(live) = self.tasks.get_live(hash, task_name).await? {
            if live.status.is_terminal() {
                if let Some(previous) = live.task_id.as_deref() {
                    match self.tasks.set_retry_child(previous, &task_id).await {
                        Ok(()) => {}
                        // Someone else superseded it first.
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        self.tasks.create(hash, task_name, parent_id).await?;

        Ok(ScheduledTask {
            task_name: task_name.to_string(),
            cancel: self.cancellations.register(&task_id),
            task_id,
        })
    }

    /// Schedule a forced re-run of one task slot.
    pub async fn schedule_retry(&self, hash: &str, task_name: &str) -> Result<Job> {
        let hash = DocumentHash::parse(hash)
            .ok_or_else(|| DocflowError::not_found("document", hash.to_string()))?;
        if self.processor(task_name).is_none() {
            return Err(DocflowError::not_found("task", task_name.to_string()).into());
        }

        let record = self
            .documents
            .get(&hash)
            .await?
            .ok_or_else(|| DocflowError::not_found("document", hash.as_str()))?;
        let live = self
            .tasks
            .get_live(&hash, task_name)
            .await?
            .ok_or_else(|| DocflowError::not_found("task", format!("{}/{}", hash, task_name)))?;

        if !live.status.is_terminal() {
            return Err(DocflowError::InvalidTransition {
                hash: hash.to_string(),
                task_name: task_name.to_string(),
                from: live.status.to_string(),
                to: TaskStatus::Pending.to_string(),
            }
            .into());
        }

        let task = self.schedule_slot(&hash, task_name, &live.parent_id).await?;
        info!(%hash, task = task_name, task_id = %task.task_id, "retry scheduled");

        let url = Url::parse(&record.url)?;
        Ok(Job::Retry {
            ctx: ProcessingContext::new(hash, url, true),
            task,
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Execution
    // ═══════════════════════════════════════════════════════════════════

    pub async fn execute(&self, job: Job) -> Result<Vec<TaskReport>> {
        match job {
            Job::Pipeline { ctx, tasks } => self.run_pipeline(&ctx, tasks).await,
            Job::Retry { ctx, task } => Ok(vec![self.run_task(&ctx, task).await?]),
        }
    }

    async fn run_task(&self, ctx: &ProcessingContext, task: ScheduledTask) -> Result<TaskReport> {
        let processor = self
            .processor(&task.task_name)
            .ok_or_else(|| DocflowError::not_found("task", task.task_name.clone()))?;
        self.runner
            .run(processor, ctx, &task.task_id, task.cancel.token())
            .await
    }

    /// Fetch first; the analysis tasks only run on available content.
    async fn run_pipeline(
        &self,
        ctx: &ProcessingContext,
        tasks: Vec<ScheduledTask>,
    ) -> Result<Vec<TaskReport>> {
        let mut reports = Vec::with_capacity(tasks.len());
        let mut content_ready = true;

        for task in tasks {
            if task.task_name == FETCH_CONTENT {
                match self.run_task(ctx, task).await {
                    Ok(report) => {
                        content_ready = report.status.is_success();
                        reports.push(report);
                    }
                    Err(e) => {
                        warn!(hash = %ctx.hash, error = %e, "fetch-content could not run");
                        content_ready = false;
                    }
                }
                continue;
            }

            if !content_ready {
                match self
                    .runner
                    .fail_unrun(ctx, &task.task_name, &task.task_id, "content unavailable")
                    .await
                {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        warn!(hash = %ctx.hash, task = %task.task_name, error = %e, "could not fail task")
                    }
                }
                continue;
            }

            let task_name = task.task_name.clone();
            match self.run_task(ctx, task).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(hash = %ctx.hash, task = %task_name, error = %e, "task could not run"),
            }
        }

        Ok(reports)
    }

    /// Fail every slot of a job that will never run.
    pub async fn abandon(&self, job: Job, reason: &str) -> Result<()> {
        let (ctx, tasks) = match job {
            Job::Pipeline { ctx, tasks } => (ctx, tasks),
            Job::Retry { ctx, task } => (ctx, vec![task]),
        };
        for task in tasks {
            self.runner
                .fail_unrun(&ctx, &task.task_name, &task.task_id, reason)
                .await?;
        }
        Ok(())
    }

    /// Cancel a scheduled or running task. Returns false if it already
    /// finished.
    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        if self.cancellations.cancel(task_id) {
            info!(task_id, "cancellation requested");
            return Ok(true);
        }
        match self.tasks.get_by_task_id(task_id).await? {
            Some(_) => Ok(false),
            None => Err(DocflowError::not_found("task", task_id).into()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskRegistration>> {
        Ok(self.tasks.list(query).await?)
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let records = self.documents.list().await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let has_summary = match DocumentHash::parse(&record.hash) {
                Some(hash) => self.store.has_artifact(&hash, ArtifactKind::Summary).await?,
                None => false,
            };
            out.push(DocumentSummary {
                url: record.url,
                hash: record.hash,
                has_summary,
            });
        }
        Ok(out)
    }

    async fn known_document(&self, hash: &str) -> Result<DocumentHash> {
        let parsed = DocumentHash::parse(hash)
            .ok_or_else(|| DocflowError::not_found("document", hash.to_string()))?;
        if self.documents.get(&parsed).await?.is_none() {
            return Err(DocflowError::not_found("document", parsed.as_str()).into());
        }
        Ok(parsed)
    }

    pub async fn summary(&self, hash: &str) -> Result<SummaryView> {
        let hash = self.known_document(hash).await?;
        let summary = match self.store.load_artifact(&hash, ArtifactKind::Summary).await {
            Ok(Artifact::Summary(text)) => Some(text),
            Ok(_) => None,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        Ok(SummaryView {
            hash: hash.to_string(),
            has_summary: summary.is_some(),
            summary,
        })
    }

    /// Stored relations, filtered again on the way out. Empty if not yet
    /// extracted.
    pub async fn entities(&self, hash: &str) -> Result<Vec<EntityRelation>> {
        let hash = self.known_document(hash).await?;
        match self
            .store
            .load_artifact(&hash, ArtifactKind::EntityRelations)
            .await
        {
            Ok(Artifact::EntityRelations(relations)) => Ok(filter_erroneous_relations(relations)),
            Ok(_) => Ok(Vec::new()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete stored content and artifacts. Registration and task history
    /// are kept; a forced re-registration rebuilds the content.
    pub async fn purge(&self, hash: &str) -> Result<()> {
        let hash = self.known_document(hash).await?;
        self.store.delete_content(&hash).await?;
        info!(%hash, "stored content purged");
        Ok(())
    }
}
