//! Ordered document loader table.
//!
//! Loaders are tried top to bottom and the first whose
//! [`can_load`](DocumentLoader::can_load) matches wins. The standard table:
//!
//! | # | Loader | Matches | Spec |
//! |---|--------|---------|------|
//! | 1 | [`ArxivLoader`] | `arxiv.org/abs/…`, `arxiv.org/pdf/…` | `{loader: arxiv, id}` |
//! | 2 | [`PdfLoader`] | path ending in `.pdf` | `{loader: pdf, url}` |
//! | 3 | [`WebPageLoader`] | `http`/`https` | `{loader: web, url}` |
//! | 4 | [`FallbackLoader`] | anything | none |
//!
//! Order matters: an arXiv PDF link also matches the PDF loader, but must
//! resolve to the arXiv identity so its `abs` and `pdf` URLs deduplicate.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::chunk::split_segments;
use crate::config::LoadersConfig;
use crate::error::DocflowError;
use crate::extract::{arxiv_id_from_path, extract_pdf_pages, html_bytes_to_text, parse_arxiv_atom};
use crate::models::{DocumentSegment, LoaderSpec};
use crate::traits::{DocumentFetcher, DocumentLoader};

fn build_client(config: &LoadersConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .context("Failed to build HTTP client")
}

async fn get_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("GET {} returned {}", url, status);
    }

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read body of {}", url))?;
    debug!(url, bytes = bytes.len(), "fetched");
    Ok(bytes.to_vec())
}

fn pages_to_segments(pages: Vec<String>) -> Vec<DocumentSegment> {
    pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| DocumentSegment::new(text).with_metadata("page", (i + 1).to_string()))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════
// arXiv
// ═══════════════════════════════════════════════════════════════════════

pub struct ArxivLoader {
    client: reqwest::Client,
    api_base: String,
    pdf_base: String,
}

impl ArxivLoader {
    pub fn new(client: reqwest::Client, api_base: &str, pdf_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            pdf_base: pdf_base.trim_end_matches('/').to_string(),
        }
    }

    fn paper_id(url: &Url) -> Option<String> {
        if url.host_str() != Some("arxiv.org") {
            return None;
        }
        arxiv_id_from_path(url.path())
    }
}

#[async_trait]
impl DocumentLoader for ArxivLoader {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn can_load(&self, url: &Url) -> bool {
        Self::paper_id(url).is_some()
    }

    fn spec_for(&self, url: &Url) -> Option<LoaderSpec> {
        Self::paper_id(url).map(|id| LoaderSpec::new("arxiv").with("id", id))
    }

    async fn load(&self, url: &Url) -> Result<Vec<DocumentSegment>> {
        let id = Self::paper_id(url)
            .ok_or_else(|| DocflowError::UnsupportedUrl(url.to_string()))?;

        let feed_url = format!("{}?id_list={}", self.api_base, id);
        let feed = get_bytes(&self.client, &feed_url).await?;
        let entry = parse_arxiv_atom(&feed)
            .with_context(|| format!("Failed to read arXiv metadata for {}", id))?;

        let pdf = get_bytes(&self.client, &format!("{}/{}", self.pdf_base, id)).await?;
        let pages = extract_pdf_pages(pdf).await?;
        info!(id = %id, pages = pages.len(), title = %entry.title, "loaded arXiv paper");

        let mut segments = if pages.is_empty() {
            vec![DocumentSegment::new(entry.summary.clone())]
        } else {
            pages_to_segments(pages)
        };
        let authors = entry.authors.join(", ");
        for segment in &mut segments {
            segment.metadata.insert("arxiv_id".into(), id.clone());
            segment.metadata.insert("title".into(), entry.title.clone());
            segment.metadata.insert("authors".into(), authors.clone());
            segment
                .metadata
                .insert("published".into(), entry.published.clone());
        }
        Ok(segments)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PDF
// ═══════════════════════════════════════════════════════════════════════

pub struct PdfLoader {
    client: reqwest::Client,
}

impl PdfLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentLoader for PdfLoader {
    fn name(&self) -> &str {
        "pdf"
    }

    fn can_load(&self, url: &Url) -> bool {
        url.path()
            .rsplit('/')
            .next()
            .and_then(|file| file.rsplit_once('.'))
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("pdf"))
    }

    fn spec_for(&self, url: &Url) -> Option<LoaderSpec> {
        Some(LoaderSpec::new("pdf").with("url", url.as_str()))
    }

    async fn load(&self, url: &Url) -> Result<Vec<DocumentSegment>> {
        let bytes = get_bytes(&self.client, url.as_str()).await?;
        let pages = extract_pdf_pages(bytes).await?;
        Ok(pages_to_segments(pages))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Web page
// ═══════════════════════════════════════════════════════════════════════

pub struct WebPageLoader {
    client: reqwest::Client,
    segment_chars: usize,
}

impl WebPageLoader {
    pub fn new(client: reqwest::Client, segment_chars: usize) -> Self {
        Self {
            client,
            segment_chars,
        }
    }
}

#[async_trait]
impl DocumentLoader for WebPageLoader {
    fn name(&self) -> &str {
        "web"
    }

    fn can_load(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    fn spec_for(&self, url: &Url) -> Option<LoaderSpec> {
        Some(LoaderSpec::new("web").with("url", url.as_str()))
    }

    async fn load(&self, url: &Url) -> Result<Vec<DocumentSegment>> {
        let bytes = get_bytes(&self.client, url.as_str()).await?;
        let page = html_bytes_to_text(&bytes)?;

        let mut segments = split_segments(&page.text, self.segment_chars);
        if let Some(title) = page.title {
            for segment in &mut segments {
                segment.metadata.insert("title".into(), title.clone());
            }
        }
        Ok(segments)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Fallback
// ═══════════════════════════════════════════════════════════════════════

/// Claims every URL and loads nothing.
pub struct FallbackLoader;

#[async_trait]
impl DocumentLoader for FallbackLoader {
    fn name(&self) -> &str {
        "fallback"
    }

    fn can_load(&self, _url: &Url) -> bool {
        true
    }

    fn spec_for(&self, _url: &Url) -> Option<LoaderSpec> {
        None
    }

    async fn load(&self, _url: &Url) -> Result<Vec<DocumentSegment>> {
        Ok(Vec::new())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Table
// ═══════════════════════════════════════════════════════════════════════

/// Ordered loader strategies. Also usable directly as a [`DocumentFetcher`].
#[derive(Default)]
pub struct LoaderTable {
    loaders: Vec<Box<dyn DocumentLoader>>,
}

impl LoaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The arXiv → PDF → web → fallback table.
    pub fn standard(config: &LoadersConfig) -> Result<Self> {
        Self::standard_with_pdf_base(config, "https://arxiv.org/pdf")
    }

    pub fn standard_with_pdf_base(config: &LoadersConfig, arxiv_pdf_base: &str) -> Result<Self> {
        let client = build_client(config)?;
        let mut table = Self::new();
        table.register(Box::new(ArxivLoader::new(
            client.clone(),
            &config.arxiv_api_base,
            arxiv_pdf_base,
        )));
        table.register(Box::new(PdfLoader::new(client.clone())));
        table.register(Box::new(WebPageLoader::new(client, config.segment_chars)));
        table.register(Box::new(FallbackLoader));
        Ok(table)
    }

    /// Append a loader. It is tried after every loader already registered.
    pub fn register(&mut self, loader: Box<dyn DocumentLoader>) {
        self.loaders.push(loader);
    }

    pub fn select(&self, url: &Url) -> Option<&dyn DocumentLoader> {
        self.loaders
            .iter()
            .find(|l| l.can_load(url))
            .map(|l| l.as_ref())
    }

    /// Spec of the selected loader, or `None` if no loader will take `url`.
    pub fn spec_for(&self, url: &Url) -> Option<LoaderSpec> {
        self.select(url).and_then(|l| l.spec_for(url))
    }

    pub fn names(&self) -> Vec<&str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

#[async_trait]
impl DocumentFetcher for LoaderTable {
    async fn fetch(&self, url: &Url) -> Result<Vec<DocumentSegment>> {
        let loader = self
            .select(url)
            .ok_or_else(|| DocflowError::UnsupportedUrl(url.to_string()))?;
        debug!(url = %url, loader = loader.name(), "loading document");

        let segments = loader.load(url).await?;
        if segments.is_empty() {
            return Err(DocflowError::NoContentExtracted {
                url: url.to_string(),
            }
            .into());
        }
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn table() -> LoaderTable {
        LoaderTable::standard(&LoadersConfig::default()).unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_arxiv_pdf_resolves_to_arxiv_not_pdf() {
        let table = table();
        let u = url("https://arxiv.org/pdf/2305.05003.pdf");

        assert!(PdfLoader::new(reqwest::Client::new()).can_load(&u));
        assert_eq!(table.select(&u).unwrap().name(), "arxiv");
        assert_eq!(
            table.spec_for(&u),
            Some(LoaderSpec::new("arxiv").with("id", "2305.05003"))
        );
    }

    #[test]
    fn test_arxiv_abs_and_pdf_share_spec() {
        let table = table();
        assert_eq!(
            table.spec_for(&url("https://arxiv.org/abs/2305.05003")),
            table.spec_for(&url("https://arxiv.org/pdf/2305.05003.pdf"))
        );
    }

    #[test]
    fn test_pdf_extension_case_insensitive() {
        let table = table();
        let u = url("https://example.com/papers/Report.PDF");
        assert_eq!(table.select(&u).unwrap().name(), "pdf");
        assert_eq!(
            table.spec_for(&u).unwrap().get("url"),
            Some("https://example.com/papers/Report.PDF")
        );
    }

    #[test]
    fn test_web_and_fallback() {
        let table = table();
        assert_eq!(
            table.select(&url("https://docs.python.org/3/library/")).unwrap().name(),
            "web"
        );

        let ftp = url("ftp://example.com/file.txt");
        assert_eq!(table.select(&ftp).unwrap().name(), "fallback");
        assert_eq!(table.spec_for(&ftp), None);
    }

    #[test]
    fn test_arxiv_other_paths_are_web_pages() {
        let table = table();
        assert_eq!(
            table.select(&url("https://arxiv.org/list/cs.AI/recent")).unwrap().name(),
            "web"
        );
    }

    #[tokio::test]
    async fn test_fallback_fetch_is_no_content() {
        let err = table()
            .fetch(&url("ftp://example.com/file.txt"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DocflowError>(),
            Some(DocflowError::NoContentExtracted { .. })
        ));
    }

    #[tokio::test]
    async fn test_web_page_fetch() {
        let server = MockServer::start().await;
        let body = format!(
            "<html><head><title>Notes</title></head><body><article>{}</article></body></html>",
            (0..30)
                .map(|i| format!("<p>Paragraph {} has a little bit of text in it.</p>", i))
                .collect::<String>()
        );
        Mock::given(method("GET"))
            .and(path("/notes"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let config = LoadersConfig {
            segment_chars: 200,
            ..LoadersConfig::default()
        };
        let table = LoaderTable::standard(&config).unwrap();
        let segments = table
            .fetch(&url(&format!("{}/notes", server.uri())))
            .await
            .unwrap();

        assert!(segments.len() > 1);
        assert!(segments[0].text.starts_with("Paragraph 0 "));
        assert_eq!(segments[0].metadata["title"], "Notes");
        assert!(segments.iter().all(|s| s.text.len() <= 200));
    }

    #[tokio::test]
    async fn test_web_page_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = table()
            .fetch(&url(&format!("{}/gone", server.uri())))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_empty_page_is_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body> </body></html>"))
            .mount(&server)
            .await;

        let err = table()
            .fetch(&url(&format!("{}/blank", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DocflowError>(),
            Some(DocflowError::NoContentExtracted { .. })
        ));
    }
}
