//! Text extraction from fetched bytes.
//!
//! - PDF via `pdf-extract`, split into pages on form feeds
//! - arXiv Atom metadata via `quick-xml`
//! - HTML via `scraper`, keeping block-level text as paragraphs
//!
//! PDF parsing runs on the blocking pool; a parser panic surfaces as an
//! error rather than taking the worker down.

use anyhow::{anyhow, Context, Result};
use quick_xml::events::Event;
use scraper::{ElementRef, Html, Selector};

/// Extract text from a PDF, one string per non-blank page.
pub async fn extract_pdf_pages(bytes: Vec<u8>) -> Result<Vec<String>> {
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| anyhow!("PDF parser crashed: {}", e))?
        .map_err(|e| anyhow!("PDF extraction failed: {}", e))?;

    Ok(split_pages(&text))
}

fn split_pages(text: &str) -> Vec<String> {
    text.split('\x0c')
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .map(str::to_string)
        .collect()
}

/// Metadata of one arXiv paper, from the export API's Atom feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArxivEntry {
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub published: String,
}

#[derive(Clone, Copy)]
enum AtomField {
    Title,
    Summary,
    Published,
    AuthorName,
}

/// Parse the first `<entry>` of an arXiv Atom response.
pub fn parse_arxiv_atom(xml: &[u8]) -> Result<ArxivEntry> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut entry = ArxivEntry::default();
    let mut in_entry = false;
    let mut found = false;
    let mut field: Option<AtomField> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    in_entry = true;
                    found = true;
                }
                b"title" if in_entry => field = Some(AtomField::Title),
                b"summary" if in_entry => field = Some(AtomField::Summary),
                b"published" if in_entry => field = Some(AtomField::Published),
                b"name" if in_entry => field = Some(AtomField::AuthorName),
                _ => field = None,
            },
            Ok(Event::Text(te)) => {
                if let Some(f) = field {
                    let text = te
                        .unescape()
                        .map_err(|e| anyhow!("invalid Atom text: {}", e))?;
                    let text = collapse_whitespace(&text);
                    match f {
                        AtomField::Title => entry.title.push_str(&text),
                        AtomField::Summary => entry.summary.push_str(&text),
                        AtomField::Published => entry.published.push_str(&text),
                        AtomField::AuthorName => entry.authors.push(text),
                    }
                }
            }
            Ok(Event::End(e)) => {
                if in_entry && e.local_name().as_ref() == b"entry" {
                    break;
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("invalid Atom feed: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    if !found || entry.title.is_empty() {
        anyhow::bail!("arXiv response contained no entry");
    }
    if entry.title == "Error" {
        anyhow::bail!("arXiv API error: {}", entry.summary);
    }
    Ok(entry)
}

/// Page text extracted from HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlText {
    pub title: Option<String>,
    /// Block-level text, paragraphs separated by a blank line.
    pub text: String,
}

const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "pre", "blockquote", "td", "dt", "dd",
];

/// Reduce an HTML page to readable text.
///
/// Prefers `<article>`, then `<main>`, then `<body>`. Text is taken from
/// block-level elements; nested blocks are emitted once, by their outermost
/// block ancestor.
pub fn html_to_text(html: &str) -> Result<HtmlText> {
    let doc = Html::parse_document(html);
    let selector = |s: &str| Selector::parse(s).map_err(|e| anyhow!("bad selector {}: {}", s, e));

    let title = doc
        .select(&selector("title")?)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut root = None;
    for candidate in ["article", "main", "body"] {
        if let Some(node) = doc.select(&selector(candidate)?).next() {
            root = Some(node);
            break;
        }
    }
    let root = root.unwrap_or_else(|| doc.root_element());

    let blocks = selector(&BLOCK_TAGS.join(", "))?;
    let mut paragraphs = Vec::new();
    for el in root.select(&blocks) {
        if has_block_ancestor(el, root) {
            continue;
        }
        let text = collapse_whitespace(&el.text().collect::<String>());
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    if paragraphs.is_empty() {
        let text = collapse_whitespace(&root.text().collect::<String>());
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    Ok(HtmlText {
        title,
        text: paragraphs.join("\n\n"),
    })
}

fn has_block_ancestor(el: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    for node in el.ancestors() {
        if node.id() == root.id() {
            return false;
        }
        if let Some(parent) = ElementRef::wrap(node) {
            if BLOCK_TAGS.contains(&parent.value().name()) {
                return true;
            }
        }
    }
    false
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decode a response body as UTF-8, replacing invalid sequences.
pub fn decode_utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Pull the arXiv identifier out of an `/abs/…` or `/pdf/…` path.
pub fn arxiv_id_from_path(path: &str) -> Option<String> {
    let rest = path
        .strip_prefix("/abs/")
        .or_else(|| path.strip_prefix("/pdf/"))?;
    let id = rest.trim_end_matches('/');
    let id = id.strip_suffix(".pdf").unwrap_or(id);
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Parse an HTML body that may not be UTF-8 clean.
pub fn html_bytes_to_text(bytes: &[u8]) -> Result<HtmlText> {
    html_to_text(&decode_utf8(bytes)).context("Failed to extract page text")
}
