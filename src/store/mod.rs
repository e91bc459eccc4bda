//! Content-addressed persistence for document segments and derived artifacts.
//!
//! The [`ContentStore`] trait is the only way the rest of docflow touches
//! stored bytes. Everything is keyed by [`DocumentHash`]; a document has at
//! most one content entry and one entry per [`ArtifactKind`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`has_content`](ContentStore::has_content) | Whether segments are stored |
//! | [`save_content`](ContentStore::save_content) | Replace stored segments |
//! | [`load_content`](ContentStore::load_content) | Read segments, in order |
//! | [`delete_content`](ContentStore::delete_content) | Remove segments and artifacts |
//! | [`has_artifact`](ContentStore::has_artifact) | Whether an artifact is stored |
//! | [`save_artifact`](ContentStore::save_artifact) | Replace one artifact |
//! | [`load_artifact`](ContentStore::load_artifact) | Read one artifact |

pub mod disk;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Artifact, ArtifactKind, DocumentHash, DocumentSegment};

pub use disk::DiskStore;
pub use memory::InMemoryStore;

/// Storage backend for document content and artifacts.
///
/// Saves are all-or-nothing: a concurrent reader sees either the previous
/// value or the new one. Loading something that was never saved returns
/// [`DocflowError::NotFound`](crate::error::DocflowError::NotFound).
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn has_content(&self, hash: &DocumentHash) -> Result<bool>;

    /// Store `segments` for `hash`, replacing anything already there.
    async fn save_content(&self, hash: &DocumentHash, segments: &[DocumentSegment]) -> Result<()>;

    async fn load_content(&self, hash: &DocumentHash) -> Result<Vec<DocumentSegment>>;

    /// Remove content and every artifact for `hash`. Deleting an absent
    /// hash is not an error.
    async fn delete_content(&self, hash: &DocumentHash) -> Result<()>;

    async fn has_artifact(&self, hash: &DocumentHash, kind: ArtifactKind) -> Result<bool>;

    async fn save_artifact(&self, hash: &DocumentHash, artifact: &Artifact) -> Result<()>;

    async fn load_artifact(&self, hash: &DocumentHash, kind: ArtifactKind) -> Result<Artifact>;
}
