use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the registry tables on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Registered documents, keyed by canonical-url hash
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_paths (
            hash TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            loader_spec TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Derivation task slots
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS process_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hash TEXT NOT NULL,
            task_name TEXT NOT NULL,
            task_id TEXT,
            parent_id TEXT NOT NULL,
            retry_task_id TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            status_reason TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One live row per (hash, task_name); superseded rows carry retry_task_id
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_process_tasks_live
        ON process_tasks(hash, task_name) WHERE retry_task_id IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_process_tasks_task_id ON process_tasks(task_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_process_tasks_status ON process_tasks(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_paths_loader_spec ON document_paths(loader_spec)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
