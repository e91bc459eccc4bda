//! URL canonicalization and document identity.
//!
//! Two URLs name the same document when they differ only in query string,
//! fragment, or an AMP-CDN wrapper. The canonical form keeps scheme, host,
//! port and path; [`document_hash`] is the SHA-256 of that string.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use url::Url;

use crate::models::DocumentHash;

const CDN_HOSTS: &[&str] = &["cdn.ampproject.org"];

/// Parse `raw` and reduce it to its canonical form.
pub fn canonical_url(raw: &str) -> Result<Url> {
    let parsed =
        Url::parse(raw.trim()).with_context(|| format!("Invalid URL: {}", raw.trim()))?;

    let mut url = match unwrap_cdn(&parsed) {
        Some(target) => target,
        None => parsed,
    };
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// AMP cache URLs look like `https://<mangled>.cdn.ampproject.org/v/s/<host>/<path>`.
/// The one-letter segments before the real host select the resource type.
fn unwrap_cdn(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    if !CDN_HOSTS.iter().any(|cdn| host.contains(cdn)) {
        return None;
    }

    let mut segments = url.path_segments()?.peekable();
    while segments.peek().is_some_and(|s| s.len() == 1) {
        segments.next();
    }
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() || rest[0].is_empty() {
        return None;
    }

    Url::parse(&format!("{}://{}", url.scheme(), rest.join("/"))).ok()
}

/// Identity of the document behind `url` (already canonical).
pub fn document_hash(url: &Url) -> DocumentHash {
    let digest = Sha256::digest(url.as_str().as_bytes());
    DocumentHash::from_digest_hex(hex::encode(digest))
}

/// Canonicalize and hash in one step.
pub fn canonicalize(raw: &str) -> Result<(Url, DocumentHash)> {
    let url = canonical_url(raw)?;
    let hash = document_hash(&url);
    Ok((url, hash))
}
