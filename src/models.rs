//! Core data models used throughout docflow.
//!
//! These types describe the documents, derived artifacts, and task rows that
//! flow between the content store, the task registry, and the workflow.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a logical document: hex SHA-256 of its canonical URL.
///
/// Construct with [`crate::urls::document_hash`] or parse an existing value
/// with [`DocumentHash::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentHash(String);

impl DocumentHash {
    pub(crate) fn from_digest_hex(hex: String) -> Self {
        Self(hex)
    }

    /// Parse a user-supplied hash. Accepts 64 hex characters, any case.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One ordered unit of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentSegment {
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl DocumentSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Describes how a document is (or would be) loaded, e.g.
/// `{loader: "arxiv", id: "2305.05003"}`. Keys are sorted, so the JSON
/// form is canonical and can be compared as a string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoaderSpec(BTreeMap<String, String>);

impl LoaderSpec {
    pub fn new(loader: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert("loader".to_string(), loader.to_string());
        Self(map)
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn loader(&self) -> Option<&str> {
        self.get("loader")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> String {
        // BTreeMap<String, String> always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Kinds of data cached per document hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Content,
    Summary,
    EntityRelations,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Content => "content",
            ContentType::Summary => "summary",
            ContentType::EntityRelations => "entity-relations",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived (non-content) artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Summary,
    EntityRelations,
}

impl From<ArtifactKind> for ContentType {
    fn from(kind: ArtifactKind) -> Self {
        match kind {
            ArtifactKind::Summary => ContentType::Summary,
            ArtifactKind::EntityRelations => ContentType::EntityRelations,
        }
    }
}

/// A derived artifact as persisted by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Artifact {
    Summary(String),
    EntityRelations(Vec<EntityRelation>),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Summary(_) => ArtifactKind::Summary,
            Artifact::EntityRelations(_) => ArtifactKind::EntityRelations,
        }
    }
}

/// One extracted `(entity) -[relationship]-> (target)` triple.
///
/// Fields are trimmed on construction and must be non-empty. Deserialized
/// rows go through the same check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEntityRelation")]
pub struct EntityRelation {
    pub entity: String,
    pub target: String,
    pub relationship: String,
}

impl EntityRelation {
    /// Build a relation, returning `None` if any field is blank after trimming.
    pub fn new(entity: &str, target: &str, relationship: &str) -> Option<Self> {
        let (entity, target, relationship) = (entity.trim(), target.trim(), relationship.trim());
        if entity.is_empty() || target.is_empty() || relationship.is_empty() {
            return None;
        }
        Some(Self {
            entity: entity.to_string(),
            target: target.to_string(),
            relationship: relationship.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct RawEntityRelation {
    entity: String,
    target: String,
    relationship: String,
}

impl TryFrom<RawEntityRelation> for EntityRelation {
    type Error = String;

    fn try_from(raw: RawEntityRelation) -> std::result::Result<Self, Self::Error> {
        EntityRelation::new(&raw.entity, &raw.target, &raw.relationship).ok_or_else(|| {
            format!(
                "blank field in entity relation ({:?}, {:?}, {:?})",
                raw.entity, raw.target, raw.relationship
            )
        })
    }
}

/// Task state machine: `Pending → Started → {terminal}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Complete,
    /// Completed without work because output already existed.
    Skipped,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Started,
        TaskStatus::Complete,
        TaskStatus::Skipped,
        TaskStatus::Failed,
        TaskStatus::Timeout,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Started => "STARTED",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Skipped => "SKIPPED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Started)
    }

    /// COMPLETE or SKIPPED: the slot's output is available.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Skipped)
    }

    pub fn class(&self) -> StatusClass {
        match self {
            TaskStatus::Pending | TaskStatus::Started => StatusClass::Pending,
            TaskStatus::Complete | TaskStatus::Skipped => StatusClass::Complete,
            TaskStatus::Failed | TaskStatus::Timeout => StatusClass::Failed,
            TaskStatus::Cancelled => StatusClass::Cancelled,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        TaskStatus::ALL
            .iter()
            .find(|st| st.as_str() == upper)
            .copied()
            .ok_or_else(|| format!("unknown task status: '{}'", s))
    }
}

/// Coarse status groups used for filtering task listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Pending,
    Complete,
    Failed,
    Cancelled,
}

impl StatusClass {
    pub fn statuses(&self) -> &'static [TaskStatus] {
        match self {
            StatusClass::Pending => &[TaskStatus::Pending, TaskStatus::Started],
            StatusClass::Complete => &[TaskStatus::Complete, TaskStatus::Skipped],
            StatusClass::Failed => &[TaskStatus::Failed, TaskStatus::Timeout],
            StatusClass::Cancelled => &[TaskStatus::Cancelled],
        }
    }
}

impl FromStr for StatusClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(StatusClass::Pending),
            "complete" => Ok(StatusClass::Complete),
            "failed" => Ok(StatusClass::Failed),
            "cancelled" => Ok(StatusClass::Cancelled),
            other => Err(format!(
                "unknown status filter: '{}'. Must be pending, complete, failed, or cancelled.",
                other
            )),
        }
    }
}

/// One row of the task registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingTask {
    pub hash: String,
    pub task_name: String,
    pub task_id: Option<String>,
    pub parent_id: String,
    pub retry_task_id: Option<String>,
    pub status: TaskStatus,
    pub status_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A task row enriched with the document URL for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRegistration {
    #[serde(flatten)]
    pub task: ProcessingTask,
    pub url: Option<String>,
}

/// A registered document path.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub hash: String,
    pub url: String,
    pub loader_spec: LoaderSpec,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_spec_json_is_key_sorted() {
        let a = LoaderSpec::new("arxiv").with("id", "2305.05003");
        let b = LoaderSpec::default()
            .with("id", "2305.05003")
            .with("loader", "arxiv");
        assert_eq!(a, b);
        assert_eq!(a.to_json(), r#"{"id":"2305.05003","loader":"arxiv"}"#);
    }

    #[test]
    fn test_entity_relation_trims_and_rejects_blank() {
        let rel = EntityRelation::new("  Disney ", "1901", " Born in").unwrap();
        assert_eq!(rel.entity, "Disney");
        assert_eq!(rel.relationship, "Born in");
        assert!(EntityRelation::new("Disney", "   ", "Born in").is_none());
    }

    #[test]
    fn test_entity_relation_deserialize_validates() {
        let rel: EntityRelation = serde_json::from_str(
            r#"{"entity": " Disney ", "target": "1901", "relationship": "born in "}"#,
        )
        .unwrap();
        assert_eq!(rel, EntityRelation::new("Disney", "1901", "born in").unwrap());

        let err = serde_json::from_str::<Vec<EntityRelation>>(
            r#"[{"entity": "Disney", "target": "", "relationship": "born in"}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("blank field"));
    }

    #[test]
    fn test_status_classes() {
        assert_eq!(TaskStatus::Started.class(), StatusClass::Pending);
        assert_eq!(TaskStatus::Skipped.class(), StatusClass::Complete);
        assert_eq!(TaskStatus::Timeout.class(), StatusClass::Failed);
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_document_hash_parse() {
        let upper = "A".repeat(64);
        assert_eq!(DocumentHash::parse(&upper).unwrap().as_str(), "a".repeat(64));
        assert!(DocumentHash::parse("abc").is_none());
        assert!(DocumentHash::parse(&"g".repeat(64)).is_none());
    }
}
