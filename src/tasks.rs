//! Durable task registry.
//!
//! One row per `(hash, task_name)` execution slot, stored in the
//! `process_tasks` table. A partial unique index keeps exactly one *live*
//! row per slot (`retry_task_id IS NULL`); superseded rows keep their final
//! status and point at the task that replaced them.
//!
//! # State machine
//!
//! ```text
//! create ─▶ PENDING ─assign─▶ STARTED ─set_result─▶ COMPLETE | SKIPPED
//!                                                 │ FAILED | TIMEOUT | CANCELLED
//!                     (terminal rows are never reset; a re-run supersedes
//!                      them via set_retry_child + a fresh create)
//! ```
//!
//! The registry never reads stored content. It only records what happened.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, error, warn};

use crate::error::{DocflowError, Result};
use crate::models::{DocumentHash, ProcessingTask, StatusClass, TaskRegistration, TaskStatus};

/// Filter for [`TaskRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    /// Restrict to these status classes. Empty means all.
    pub classes: Vec<StatusClass>,
    /// Include rows superseded by a retry.
    pub include_retried: bool,
    pub hash: Option<DocumentHash>,
}

#[derive(Clone)]
pub struct TaskRegistry {
    pool: SqlitePool,
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

fn slot_key(hash: &DocumentHash, task_name: &str) -> String {
    format!("{}/{}", hash, task_name)
}

fn row_to_task(row: &SqliteRow) -> Result<ProcessingTask> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<TaskStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    let updated_at: i64 = row.try_get("updated_at")?;

    Ok(ProcessingTask {
        hash: row.try_get("hash")?,
        task_name: row.try_get("task_name")?,
        task_id: row.try_get("task_id")?,
        parent_id: row.try_get("parent_id")?,
        retry_task_id: row.try_get("retry_task_id")?,
        status,
        status_reason: row.try_get("status_reason")?,
        updated_at: DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
    })
}

const TASK_COLUMNS: &str =
    "t.hash, t.task_name, t.task_id, t.parent_id, t.retry_task_id, t.status, t.status_reason, t.updated_at";

impl TaskRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Ensure a live row exists for the slot.
    ///
    /// If one already exists only `parent_id` is refreshed; status, reason
    /// and task id are left as they are.
    pub async fn create(&self, hash: &DocumentHash, task_name: &str, parent_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO process_tasks (hash, task_name, parent_id, status, updated_at)
            VALUES (?, ?, ?, 'PENDING', ?)
            ON CONFLICT(hash, task_name) WHERE retry_task_id IS NULL
            DO UPDATE SET parent_id = excluded.parent_id, updated_at = excluded.updated_at
            "#,
        )
        .bind(hash.as_str())
        .bind(task_name)
        .bind(parent_id)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        debug!(%hash, task_name, parent_id, "task slot created");
        Ok(())
    }

    /// Bind `task_id` to the live slot and mark it STARTED.
    ///
    /// Only PENDING or STARTED rows can be assigned. The returned
    /// [`TaskSlot`] must be finished; if it is dropped first the row is
    /// marked FAILED.
    pub async fn assign(
        &self,
        hash: &DocumentHash,
        task_name: &str,
        task_id: &str,
    ) -> Result<TaskSlot> {
        let result = sqlx::query(
            r#"
            UPDATE process_tasks
            SET task_id = ?, status = 'STARTED', status_reason = NULL, updated_at = ?
            WHERE hash = ? AND task_name = ? AND retry_task_id IS NULL
              AND status IN ('PENDING', 'STARTED')
            "#,
        )
        .bind(task_id)
        .bind(now_ts())
        .bind(hash.as_str())
        .bind(task_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match self.get_live(hash, task_name).await? {
                None => DocflowError::not_found("task", slot_key(hash, task_name)),
                Some(live) => DocflowError::InvalidTransition {
                    hash: hash.to_string(),
                    task_name: task_name.to_string(),
                    from: live.status.to_string(),
                    to: TaskStatus::Started.to_string(),
                },
            });
        }

        debug!(%hash, task_name, task_id, "task slot assigned");
        Ok(TaskSlot {
            registry: self.clone(),
            hash: hash.clone(),
            task_name: task_name.to_string(),
            task_id: task_id.to_string(),
            finished: false,
        })
    }

    /// Record the terminal outcome of `task_id`. Later writes win.
    pub async fn set_result(
        &self,
        hash: &DocumentHash,
        task_id: &str,
        status: TaskStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(DocflowError::InvalidTransition {
                hash: hash.to_string(),
                task_name: task_id.to_string(),
                from: TaskStatus::Started.to_string(),
                to: status.to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE process_tasks
            SET status = ?, status_reason = ?, updated_at = ?
            WHERE hash = ? AND task_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(now_ts())
        .bind(hash.as_str())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DocflowError::not_found("task", task_id));
        }

        debug!(%hash, task_id, %status, "task result recorded");
        Ok(())
    }

    /// Mark the live row running `original_task_id` as superseded by
    /// `retry_task_id`. Its status is kept for history.
    pub async fn set_retry_child(&self, original_task_id: &str, retry_task_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE process_tasks
            SET retry_task_id = ?, updated_at = ?
            WHERE task_id = ? AND retry_task_id IS NULL
            "#,
        )
        .bind(retry_task_id)
        .bind(now_ts())
        .bind(original_task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DocflowError::not_found("task", original_task_id));
        }

        debug!(original_task_id, retry_task_id, "task superseded");
        Ok(())
    }

    pub async fn get_live(
        &self,
        hash: &DocumentHash,
        task_name: &str,
    ) -> Result<Option<ProcessingTask>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM process_tasks t WHERE t.hash = ? AND t.task_name = ? AND t.retry_task_id IS NULL",
            TASK_COLUMNS
        ))
        .bind(hash.as_str())
        .bind(task_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    pub async fn get_by_task_id(&self, task_id: &str) -> Result<Option<ProcessingTask>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM process_tasks t WHERE t.task_id = ?",
            TASK_COLUMNS
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    /// List task rows joined with their document URL, newest first.
    pub async fn list(&self, query: &TaskQuery) -> Result<Vec<TaskRegistration>> {
        let mut sql = format!(
            "SELECT {}, d.url AS url FROM process_tasks t LEFT JOIN document_paths d ON d.hash = t.hash WHERE 1 = 1",
            TASK_COLUMNS
        );

        if !query.include_retried {
            sql.push_str(" AND t.retry_task_id IS NULL");
        }

        let statuses: Vec<&'static str> = query
            .classes
            .iter()
            .flat_map(|c| c.statuses().iter().map(TaskStatus::as_str))
            .collect();
        if !statuses.is_empty() {
            let placeholders = vec!["?"; statuses.len()].join(", ");
            sql.push_str(&format!(" AND t.status IN ({})", placeholders));
        }
        if query.hash.is_some() {
            sql.push_str(" AND t.hash = ?");
        }
        sql.push_str(" ORDER BY t.updated_at DESC, t.id DESC");

        let mut q = sqlx::query(&sql);
        for status in &statuses {
            q = q.bind(*status);
        }
        if let Some(hash) = &query.hash {
            q = q.bind(hash.as_str());
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(TaskRegistration {
                    task: row_to_task(row)?,
                    url: row.try_get("url")?,
                })
            })
            .collect()
    }

    /// Mark rows left STARTED by a previous process as FAILED.
    ///
    /// Called once when a worker pool starts, before it accepts jobs.
    pub async fn fail_interrupted(&self, reason: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE process_tasks
            SET status = 'FAILED', status_reason = ?, updated_at = ?
            WHERE status = 'STARTED'
            "#,
        )
        .bind(reason)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        let n = result.rows_affected();
        if n > 0 {
            warn!(count = n, "marked interrupted tasks as FAILED");
        }
        Ok(n)
    }

    /// Mark live PENDING rows whose queued job died with a previous process
    /// as FAILED.
    ///
    /// Each row gets a fresh task id so it can be superseded by a retry
    /// like any other terminal row.
    pub async fn fail_orphaned(&self, reason: &str) -> Result<u64> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM process_tasks WHERE status = 'PENDING' AND retry_task_id IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut n = 0;
        for id in ids {
            let result = sqlx::query(
                r#"
                UPDATE process_tasks
                SET task_id = ?, status = 'FAILED', status_reason = ?, updated_at = ?
                WHERE id = ? AND status = 'PENDING'
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(reason)
            .bind(now_ts())
            .bind(id)
            .execute(&self.pool)
            .await?;
            n += result.rows_affected();
        }

        if n > 0 {
            warn!(count = n, "marked orphaned pending tasks as FAILED");
        }
        Ok(n)
    }

    /// Count live rows per status, plus the number of superseded rows.
    pub async fn counts(&self) -> Result<TaskCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n FROM process_tasks
            WHERE retry_task_id IS NULL
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_status = Vec::new();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let status = status
                .parse::<TaskStatus>()
                .map_err(|e| sqlx::Error::Decode(e.into()))?;
            by_status.push((status, row.try_get::<i64, _>("n")?));
        }
        by_status.sort_by_key(|(status, _)| TaskStatus::ALL.iter().position(|s| s == status));

        let retried: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM process_tasks WHERE retry_task_id IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(TaskCounts { by_status, retried })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskCounts {
    pub by_status: Vec<(TaskStatus, i64)>,
    pub retried: i64,
}

/// Scoped ownership of an assigned task row.
///
/// Exactly one terminal status is written per slot: either by
/// [`finish`](TaskSlot::finish) / [`finish_with`](TaskSlot::finish_with),
/// or, if the slot is dropped unfinished (early return, panic, a dropped
/// future), by a FAILED write spawned from `Drop`.
pub struct TaskSlot {
    registry: TaskRegistry,
    hash: DocumentHash,
    task_name: String,
    task_id: String,
    finished: bool,
}

impl std::fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSlot")
            .field("hash", &self.hash)
            .field("task_name", &self.task_name)
            .field("task_id", &self.task_id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl TaskSlot {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn hash(&self) -> &DocumentHash {
        &self.hash
    }

    pub async fn finish(mut self, status: TaskStatus, reason: Option<String>) -> Result<()> {
        let result = self
            .registry
            .set_result(&self.hash, &self.task_id, status, reason.as_deref())
            .await;
        if result.is_ok() {
            self.finished = true;
        }
        result
    }

    /// COMPLETE on `Ok`, FAILED with the error chain on `Err`.
    pub async fn finish_with<T>(self, outcome: &anyhow::Result<T>) -> Result<()> {
        match outcome {
            Ok(_) => self.finish(TaskStatus::Complete, None).await,
            Err(e) => self.finish(TaskStatus::Failed, Some(format!("{:#}", e))).await,
        }
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        warn!(
            hash = %self.hash,
            task_name = %self.task_name,
            task_id = %self.task_id,
            "task slot released without a result; marking FAILED"
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(task_id = %self.task_id, "no runtime available to record FAILED");
            return;
        };

        let registry = self.registry.clone();
        let hash = self.hash.clone();
        let task_id = std::mem::take(&mut self.task_id);
        handle.spawn(async move {
            if let Err(e) = registry
                .set_result(
                    &hash,
                    &task_id,
                    TaskStatus::Failed,
                    Some("task ended without recording a result"),
                )
                .await
            {
                error!(%hash, %task_id, error = %e, "failed to record FAILED for released slot");
            }
        });
    }
}
