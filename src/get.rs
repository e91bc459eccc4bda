//! Read-side CLI commands.
//!
//! Thin printers over the [`Workflow`] query methods. Each command prints a
//! plain-text view, or pretty JSON with `--json` (the same shapes the HTTP
//! server returns).

use anyhow::Result;
use serde::Serialize;

use crate::models::TaskRegistration;
use crate::tasks::TaskQuery;
use crate::workflow::Workflow;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn short(id: Option<&str>) -> &str {
    match id {
        Some(id) if id.len() > 8 => &id[..8],
        Some(id) => id,
        None => "-",
    }
}

fn task_line(t: &TaskRegistration) -> String {
    let task = &t.task;
    let mut line = format!(
        "{:<10} {:<18} {:<8} {}  {}",
        task.status.as_str(),
        task.task_name,
        short(task.task_id.as_deref()),
        &task.hash[..12.min(task.hash.len())],
        task.updated_at.format("%Y-%m-%d %H:%M:%S"),
    );
    if let Some(url) = &t.url {
        line.push_str(&format!("  {}", url));
    }
    if let Some(retry) = &task.retry_task_id {
        line.push_str(&format!("  (retried as {})", short(Some(retry))));
    }
    line
}

pub async fn run_tasks(workflow: &Workflow, query: &TaskQuery, json: bool) -> Result<()> {
    let tasks = workflow.list_tasks(query).await?;
    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!(
        "{:<10} {:<18} {:<8} {:<12}  {:<19}  URL",
        "STATUS", "TASK", "ID", "HASH", "UPDATED"
    );
    for t in &tasks {
        println!("{}", task_line(t));
        if let Some(reason) = &t.task.status_reason {
            println!("           └─ {}", reason);
        }
    }
    println!();
    println!("{} task(s)", tasks.len());
    Ok(())
}

pub async fn run_documents(workflow: &Workflow, json: bool) -> Result<()> {
    let docs = workflow.list_documents().await?;
    if json {
        return print_json(&docs);
    }
    if docs.is_empty() {
        println!("No documents registered.");
        return Ok(());
    }
    for doc in &docs {
        let marker = if doc.has_summary { "summarized" } else { "-" };
        println!("{}  {:<10}  {}", doc.hash, marker, doc.url);
    }
    Ok(())
}

pub async fn run_summary(workflow: &Workflow, hash: &str, json: bool) -> Result<()> {
    let view = workflow.summary(hash).await?;
    if json {
        return print_json(&view);
    }
    match &view.summary {
        Some(text) => println!("{}", text),
        None => println!("No summary yet for {}.", view.hash),
    }
    Ok(())
}

pub async fn run_entities(workflow: &Workflow, hash: &str, json: bool) -> Result<()> {
    let relations = workflow.entities(hash).await?;
    if json {
        return print_json(&relations);
    }
    if relations.is_empty() {
        println!("No entity relations yet for {}.", hash);
        return Ok(());
    }
    for r in &relations {
        println!("{} --[{}]--> {}", r.entity, r.relationship, r.target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProcessingTask, TaskStatus};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_task_line() {
        let t = TaskRegistration {
            task: ProcessingTask {
                hash: "ab".repeat(32),
                task_name: "summarize".to_string(),
                task_id: Some("0123456789abcdef".to_string()),
                parent_id: "p".to_string(),
                retry_task_id: Some("fedcba9876543210".to_string()),
                status: TaskStatus::Failed,
                status_reason: None,
                updated_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            },
            url: Some("https://example.com/a".to_string()),
        };
        let line = task_line(&t);
        assert!(line.starts_with("FAILED     summarize          01234567 abababababab"));
        assert!(line.contains("2024-01-02 03:04:05"));
        assert!(line.contains("https://example.com/a"));
        assert!(line.ends_with("(retried as fedcba98)"));
    }

    #[test]
    fn test_short_ids() {
        assert_eq!(short(None), "-");
        assert_eq!(short(Some("abc")), "abc");
    }
}
