//! Registered documents (`document_paths` table).
//!
//! Maps a [`DocumentHash`] to the URL it was registered with and the
//! [`LoaderSpec`] that identifies the document independent of URL form. Two
//! URLs resolving to the same spec (an arXiv `abs` page and its PDF) are the
//! same registration.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{DocflowError, Result};
use crate::models::{DocumentHash, DocumentRecord, LoaderSpec};

#[derive(Clone)]
pub struct DocumentRegistry {
    pool: SqlitePool,
}

fn row_to_record(row: &SqliteRow) -> Result<DocumentRecord> {
    let spec_json: String = row.try_get("loader_spec")?;
    let created_at: i64 = row.try_get("created_at")?;
    Ok(DocumentRecord {
        hash: row.try_get("hash")?,
        url: row.try_get("url")?,
        loader_spec: serde_json::from_str(&spec_json)?,
        created_at: DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    })
}

impl DocumentRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Hash of the document already registered under `spec`, if any.
    pub async fn find_by_spec(&self, spec: &LoaderSpec) -> Result<Option<DocumentHash>> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT hash FROM document_paths WHERE loader_spec = ? LIMIT 1")
                .bind(spec.to_json())
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash.and_then(|h| DocumentHash::parse(&h)))
    }

    /// Register `hash` under `spec`.
    ///
    /// Fails with [`DocflowError::DuplicateRegistration`] carrying the
    /// existing hash when `spec` is already registered.
    pub async fn register(&self, hash: &DocumentHash, url: &str, spec: &LoaderSpec) -> Result<()> {
        if let Some(existing) = self.find_by_spec(spec).await? {
            return Err(DocflowError::DuplicateRegistration {
                hash: existing.to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO document_paths (hash, url, loader_spec, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET url = excluded.url, loader_spec = excluded.loader_spec
            "#,
        )
        .bind(hash.as_str())
        .bind(url)
        .bind(spec.to_json())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        debug!(%hash, url, "document registered");
        Ok(())
    }

    pub async fn get(&self, hash: &DocumentHash) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT hash, url, loader_spec, created_at FROM document_paths WHERE hash = ?",
        )
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    pub async fn list(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT hash, url, loader_spec, created_at FROM document_paths ORDER BY created_at DESC, hash ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn remove(&self, hash: &DocumentHash) -> Result<bool> {
        let result = sqlx::query("DELETE FROM document_paths WHERE hash = ?")
            .bind(hash.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
