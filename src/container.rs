//! Compute-or-retrieve for every derived content type.
//!
//! A [`ContentTypeContainer`] knows how to check, produce, store, and load
//! one [`ContentType`] for a document. [`get_output`] is the single
//! implementation of the caching rule:
//!
//! 1. unless forced, return the stored value if there is one;
//! 2. otherwise produce it;
//! 3. empty output is a [`DocflowError::ProcessingFailure`] and is not stored;
//! 4. non-empty output is stored once and returned.
//!
//! Containers never touch task rows; that is the orchestrator's job.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::DocflowError;
use crate::models::{
    Artifact, ArtifactKind, ContentType, DocumentHash, DocumentSegment, EntityRelation,
};
use crate::store::ContentStore;
use crate::traits::{filter_erroneous_relations, DocumentFetcher, RelationExtractor, Summarizer};

/// Everything a container needs to work on one document.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub hash: DocumentHash,
    pub url: Url,
    /// Recompute even if output already exists.
    pub force: bool,
}

impl ProcessingContext {
    pub fn new(hash: DocumentHash, url: Url, force: bool) -> Self {
        Self { hash, url, force }
    }

    /// Context for reading an upstream dependency: `force` applies only to
    /// the container it was given to.
    pub fn upstream(&self) -> Self {
        Self {
            force: false,
            ..self.clone()
        }
    }
}

#[async_trait]
pub trait ContentTypeContainer: Send + Sync {
    type Output: Send + Sync;

    fn content_type(&self) -> ContentType;

    async fn has_processed(&self, ctx: &ProcessingContext) -> Result<bool>;

    /// Compute the output from scratch. Must not write to the store.
    async fn produce(&self, ctx: &ProcessingContext) -> Result<Self::Output>;

    async fn store(&self, ctx: &ProcessingContext, output: &Self::Output) -> Result<()>;

    async fn load(&self, ctx: &ProcessingContext) -> Result<Self::Output>;

    fn is_empty(&self, output: &Self::Output) -> bool;
}

/// Return the container's output for `ctx`, computing and storing it if
/// needed.
pub async fn get_output<C>(container: &C, ctx: &ProcessingContext) -> Result<C::Output>
where
    C: ContentTypeContainer + ?Sized,
{
    let content_type = container.content_type();

    if !ctx.force && container.has_processed(ctx).await? {
        debug!(hash = %ctx.hash, %content_type, "cache hit");
        return container.load(ctx).await;
    }

    let output = container.produce(ctx).await?;
    if container.is_empty(&output) {
        return Err(DocflowError::ProcessingFailure(format!(
            "{} produced no output for {}",
            content_type, ctx.url
        ))
        .into());
    }

    container.store(ctx, &output).await?;
    debug!(hash = %ctx.hash, %content_type, forced = ctx.force, "stored");
    Ok(output)
}

// ═══════════════════════════════════════════════════════════════════════
// Concrete containers
// ═══════════════════════════════════════════════════════════════════════

/// Raw document segments, fetched through a [`DocumentFetcher`].
#[derive(Clone)]
pub struct DocumentContentContainer {
    store: Arc<dyn ContentStore>,
    fetcher: Arc<dyn DocumentFetcher>,
}

impl DocumentContentContainer {
    pub fn new(store: Arc<dyn ContentStore>, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self { store, fetcher }
    }
}

#[async_trait]
impl ContentTypeContainer for DocumentContentContainer {
    type Output = Vec<DocumentSegment>;

    fn content_type(&self) -> ContentType {
        ContentType::Content
    }

    async fn has_processed(&self, ctx: &ProcessingContext) -> Result<bool> {
        Ok(self.store.has_content(&ctx.hash).await?)
    }

    async fn produce(&self, ctx: &ProcessingContext) -> Result<Self::Output> {
        self.fetcher.fetch(&ctx.url).await
    }

    async fn store(&self, ctx: &ProcessingContext, output: &Self::Output) -> Result<()> {
        Ok(self.store.save_content(&ctx.hash, output).await?)
    }

    async fn load(&self, ctx: &ProcessingContext) -> Result<Self::Output> {
        Ok(self.store.load_content(&ctx.hash).await?)
    }

    fn is_empty(&self, output: &Self::Output) -> bool {
        output.is_empty()
    }
}

/// Free-text summary of a document's content.
#[derive(Clone)]
pub struct SummaryContainer {
    store: Arc<dyn ContentStore>,
    content: DocumentContentContainer,
    summarizer: Arc<dyn Summarizer>,
}

impl SummaryContainer {
    pub fn new(
        store: Arc<dyn ContentStore>,
        content: DocumentContentContainer,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            store,
            content,
            summarizer,
        }
    }
}

#[async_trait]
impl ContentTypeContainer for SummaryContainer {
    type Output = String;

    fn content_type(&self) -> ContentType {
        ContentType::Summary
    }

    async fn has_processed(&self, ctx: &ProcessingContext) -> Result<bool> {
        Ok(self
            .store
            .has_artifact(&ctx.hash, ArtifactKind::Summary)
            .await?)
    }

    async fn produce(&self, ctx: &ProcessingContext) -> Result<Self::Output> {
        let segments = get_output(&self.content, &ctx.upstream()).await?;
        let summary = self.summarizer.summarize(&segments).await?;
        Ok(summary.trim().to_string())
    }

    async fn store(&self, ctx: &ProcessingContext, output: &Self::Output) -> Result<()> {
        Ok(self
            .store
            .save_artifact(&ctx.hash, &Artifact::Summary(output.clone()))
            .await?)
    }

    async fn load(&self, ctx: &ProcessingContext) -> Result<Self::Output> {
        match self
            .store
            .load_artifact(&ctx.hash, ArtifactKind::Summary)
            .await?
        {
            Artifact::Summary(text) => Ok(text),
            other => anyhow::bail!("expected summary, found {:?}", other.kind()),
        }
    }

    fn is_empty(&self, output: &Self::Output) -> bool {
        output.trim().is_empty()
    }
}

/// Entity relation graph extracted from a document's content.
#[derive(Clone)]
pub struct EntityRelationsContainer {
    store: Arc<dyn ContentStore>,
    content: DocumentContentContainer,
    extractor: Arc<dyn RelationExtractor>,
}

impl EntityRelationsContainer {
    pub fn new(
        store: Arc<dyn ContentStore>,
        content: DocumentContentContainer,
        extractor: Arc<dyn RelationExtractor>,
    ) -> Self {
        Self {
            store,
            content,
            extractor,
        }
    }
}

#[async_trait]
impl ContentTypeContainer for EntityRelationsContainer {
    type Output = Vec<EntityRelation>;

    fn content_type(&self) -> ContentType {
        ContentType::EntityRelations
    }

    async fn has_processed(&self, ctx: &ProcessingContext) -> Result<bool> {
        Ok(self
            .store
            .has_artifact(&ctx.hash, ArtifactKind::EntityRelations)
            .await?)
    }

    async fn produce(&self, ctx: &ProcessingContext) -> Result<Self::Output> {
        let segments = get_output(&self.content, &ctx.upstream()).await?;
        let relations = self.extractor.extract(&segments).await?;
        Ok(filter_erroneous_relations(relations))
    }

    async fn store(&self, ctx: &ProcessingContext, output: &Self::Output) -> Result<()> {
        Ok(self
            .store
            .save_artifact(&ctx.hash, &Artifact::EntityRelations(output.clone()))
            .await?)
    }

    async fn load(&self, ctx: &ProcessingContext) -> Result<Self::Output> {
        match self
            .store
            .load_artifact(&ctx.hash, ArtifactKind::EntityRelations)
            .await?
        {
            Artifact::EntityRelations(relations) => Ok(relations),
            other => anyhow::bail!("expected entity relations, found {:?}", other.kind()),
        }
    }

    fn is_empty(&self, output: &Self::Output) -> bool {
        output.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::urls::canonicalize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        segments: Vec<DocumentSegment>,
    }

    #[async_trait]
    impl DocumentFetcher for CountingFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Vec<DocumentSegment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.segments.clone())
        }
    }

    struct FixedSummarizer(String);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _segments: &[DocumentSegment]) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FixedExtractor(Vec<EntityRelation>);

    #[async_trait]
    impl RelationExtractor for FixedExtractor {
        async fn extract(&self, _segments: &[DocumentSegment]) -> Result<Vec<EntityRelation>> {
            Ok(self.0.clone())
        }
    }

    fn ctx(force: bool) -> ProcessingContext {
        let (url, hash) = canonicalize("https://example.com/article").unwrap();
        ProcessingContext::new(hash, url, force)
    }

    fn content(
        store: &Arc<InMemoryStore>,
        segments: Vec<DocumentSegment>,
    ) -> (DocumentContentContainer, Arc<CountingFetcher>) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            segments,
        });
        (
            DocumentContentContainer::new(store.clone(), fetcher.clone()),
            fetcher,
        )
    }

    #[tokio::test]
    async fn test_fetches_once_without_force() {
        let store = Arc::new(InMemoryStore::new());
        let (container, fetcher) = content(&store, vec![DocumentSegment::new("body")]);

        get_output(&container, &ctx(false)).await.unwrap();
        let again = get_output(&container, &ctx(false)).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(again, vec![DocumentSegment::new("body")]);
    }

    #[tokio::test]
    async fn test_force_refetches() {
        let store = Arc::new(InMemoryStore::new());
        let (container, fetcher) = content(&store, vec![DocumentSegment::new("body")]);

        get_output(&container, &ctx(true)).await.unwrap();
        get_output(&container, &ctx(true)).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_content_fails_and_is_not_stored() {
        let store = Arc::new(InMemoryStore::new());
        let (container, _) = content(&store, vec![]);

        let err = get_output(&container, &ctx(false)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DocflowError>(),
            Some(DocflowError::ProcessingFailure(_))
        ));
        assert!(!store.has_content(&ctx(false).hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_summary_fails_and_is_not_stored() {
        let store = Arc::new(InMemoryStore::new());
        let (content, _) = content(&store, vec![DocumentSegment::new("body")]);
        let container =
            SummaryContainer::new(store.clone(), content, Arc::new(FixedSummarizer("  ".into())));

        let err = get_output(&container, &ctx(false)).await.unwrap_err();
        assert!(err.to_string().contains("summary produced no output"));
        assert!(!store
            .has_artifact(&ctx(false).hash, ArtifactKind::Summary)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_forced_summary_reuses_cached_content() {
        let store = Arc::new(InMemoryStore::new());
        let (content, fetcher) = content(&store, vec![DocumentSegment::new("body")]);
        let container = SummaryContainer::new(
            store.clone(),
            content,
            Arc::new(FixedSummarizer("A short summary.".into())),
        );

        get_output(&container, &ctx(false)).await.unwrap();
        let forced = get_output(&container, &ctx(true)).await.unwrap();

        assert_eq!(forced, "A short summary.");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_relations_filtered_before_store() {
        let store = Arc::new(InMemoryStore::new());
        let (content, _) = content(&store, vec![DocumentSegment::new("body")]);
        let container = EntityRelationsContainer::new(
            store.clone(),
            content,
            Arc::new(FixedExtractor(vec![
                EntityRelation::new("**entity", "target", "relationship").unwrap(),
                EntityRelation::new("Walt Disney", "1901", "born in").unwrap(),
            ])),
        );

        let out = get_output(&container, &ctx(false)).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(container.load(&ctx(false)).await.unwrap(), out);
    }

    #[tokio::test]
    async fn test_only_header_rows_is_a_failure() {
        let store = Arc::new(InMemoryStore::new());
        let (content, _) = content(&store, vec![DocumentSegment::new("body")]);
        let container = EntityRelationsContainer::new(
            store.clone(),
            content,
            Arc::new(FixedExtractor(vec![EntityRelation::new(
                "[entity", "target", "relationship",
            )
            .unwrap()])),
        );

        assert!(get_output(&container, &ctx(false)).await.is_err());
    }
}
