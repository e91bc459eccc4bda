//! Registry statistics.
//!
//! Summarizes what has been registered and how processing went: document
//! counts per loader, task counts per status, and superseded rows. Used by
//! `docflow stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::TaskStatus;
use crate::tasks::TaskRegistry;

/// Documents registered through one loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderStats {
    pub loader: String,
    pub documents: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub documents: i64,
    pub by_loader: Vec<LoaderStats>,
    pub by_status: Vec<(TaskStatus, i64)>,
    pub retried: i64,
    pub last_activity: Option<i64>,
}

impl Stats {
    pub fn count(&self, status: TaskStatus) -> i64 {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_paths")
        .fetch_one(pool)
        .await?;

    let loader_rows = sqlx::query(
        r#"
        SELECT COALESCE(json_extract(loader_spec, '$.loader'), 'unknown') AS loader,
               COUNT(*) AS documents
        FROM document_paths
        GROUP BY loader
        ORDER BY documents DESC, loader
        "#,
    )
    .fetch_all(pool)
    .await?;
    let by_loader = loader_rows
        .iter()
        .map(|row| LoaderStats {
            loader: row.get("loader"),
            documents: row.get("documents"),
        })
        .collect();

    let counts = TaskRegistry::new(pool.clone()).counts().await?;

    let last_activity: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM process_tasks")
        .fetch_one(pool)
        .await?;

    Ok(Stats {
        documents,
        by_loader,
        by_status: counts.by_status,
        retried: counts.retried,
        last_activity,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docflow: registry stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Store:       {}", config.store.root.display());
    println!();
    println!("  Documents:   {}", stats.documents);
    for l in &stats.by_loader {
        println!("    {:<12} {:>6}", l.loader, l.documents);
    }

    println!();
    println!("  Tasks:");
    for status in TaskStatus::ALL {
        println!("    {:<12} {:>6}", status.as_str(), stats.count(status));
    }
    println!("    {:<12} {:>6}", "(retried)", stats.retried);

    let activity = match stats.last_activity {
        Some(ts) => format_ts_relative(ts),
        None => "never".to_string(),
    };
    println!();
    println!("  Last activity: {}", activity);
    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now ("3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86400 => format!("{} hour{} ago", d / 3600, plural(d / 3600)),
        d if d < 86400 * 30 => format!("{} day{} ago", d / 86400, plural(d / 86400)),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
