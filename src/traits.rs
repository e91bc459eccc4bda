//! Collaborator traits for fetching and analysing documents.
//!
//! docflow treats content extraction and analysis as opaque. The workflow
//! only ever sees these traits, so fetchers and analysers can be swapped
//! (a real LLM, a fake in tests) without touching caching or task logic.
//!
//! # Architecture
//!
//! ```text
//!  URL ──▶ DocumentFetcher ──▶ Vec<DocumentSegment> ──┬──▶ Summarizer ──────▶ summary
//!          (LoaderTable)                              └──▶ RelationExtractor ─▶ relations
//! ```
//!
//! Implementations are called on the tokio runtime and may do network I/O.
//! They can be aborted at any await point when a task times out or is
//! cancelled.

use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use url::Url;

use crate::models::{DocumentSegment, EntityRelation, LoaderSpec};

// ═══════════════════════════════════════════════════════════════════════
// Fetching
// ═══════════════════════════════════════════════════════════════════════

/// Turns a canonical URL into ordered text segments.
///
/// Returning an empty vector is allowed here; the content container turns
/// it into a processing failure.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<DocumentSegment>>;
}

/// One strategy in the ordered loader table.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use docflow::models::{DocumentSegment, LoaderSpec};
/// use docflow::traits::DocumentLoader;
/// use url::Url;
///
/// pub struct GopherLoader;
///
/// #[async_trait]
/// impl DocumentLoader for GopherLoader {
///     fn name(&self) -> &str { "gopher" }
///     fn can_load(&self, url: &Url) -> bool { url.scheme() == "gopher" }
///     fn spec_for(&self, url: &Url) -> Option<LoaderSpec> {
///         Some(LoaderSpec::new("gopher").with("url", url.as_str()))
///     }
///     async fn load(&self, _url: &Url) -> Result<Vec<DocumentSegment>> {
///         Ok(vec![DocumentSegment::new("hello from gopherspace")])
///     }
/// }
/// ```
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Short identifier, also used as the `loader` key of its [`LoaderSpec`].
    fn name(&self) -> &str;

    /// Whether this loader claims `url`. The first claiming loader in the
    /// table wins.
    fn can_load(&self, url: &Url) -> bool;

    /// Load spec identifying the document, or `None` if the loader
    /// declines to produce one.
    fn spec_for(&self, url: &Url) -> Option<LoaderSpec>;

    async fn load(&self, url: &Url) -> Result<Vec<DocumentSegment>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Analysis
// ═══════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize the document. An empty string means "nothing usable".
    async fn summarize(&self, segments: &[DocumentSegment]) -> Result<String>;
}

#[async_trait]
pub trait RelationExtractor: Send + Sync {
    async fn extract(&self, segments: &[DocumentSegment]) -> Result<Vec<EntityRelation>>;
}

fn header_row_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[\[\]*]+entity$").ok())
        .as_ref()
}

/// Drop rows the model echoed from its own output format, such as
/// `**entity` or `[entity`.
pub fn filter_erroneous_relations(relations: Vec<EntityRelation>) -> Vec<EntityRelation> {
    let Some(pattern) = header_row_pattern() else {
        return relations;
    };
    relations
        .into_iter()
        .filter(|r| !pattern.is_match(&r.entity))
        .collect()
}
