//! In-memory [`ContentStore`] implementation for tests and short-lived processes.
//!
//! Uses `HashMap` behind `std::sync::RwLock`. Values are cloned in and out,
//! so a save is atomic with respect to readers.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::ContentStore;
use crate::error::{DocflowError, Result};
use crate::models::{Artifact, ArtifactKind, ContentType, DocumentHash, DocumentSegment};

#[derive(Default)]
pub struct InMemoryStore {
    content: RwLock<HashMap<DocumentHash, Vec<DocumentSegment>>>,
    artifacts: RwLock<HashMap<(DocumentHash, ContentType), Artifact>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> DocflowError {
    DocflowError::Storage(std::io::Error::other("in-memory store lock poisoned"))
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn has_content(&self, hash: &DocumentHash) -> Result<bool> {
        let content = self.content.read().map_err(|_| poisoned())?;
        Ok(content.contains_key(hash))
    }

    async fn save_content(&self, hash: &DocumentHash, segments: &[DocumentSegment]) -> Result<()> {
        let mut content = self.content.write().map_err(|_| poisoned())?;
        content.insert(hash.clone(), segments.to_vec());
        Ok(())
    }

    async fn load_content(&self, hash: &DocumentHash) -> Result<Vec<DocumentSegment>> {
        let content = self.content.read().map_err(|_| poisoned())?;
        content
            .get(hash)
            .cloned()
            .ok_or_else(|| DocflowError::not_found("content", hash.as_str()))
    }

    async fn delete_content(&self, hash: &DocumentHash) -> Result<()> {
        self.content.write().map_err(|_| poisoned())?.remove(hash);
        self.artifacts
            .write()
            .map_err(|_| poisoned())?
            .retain(|(h, _), _| h != hash);
        Ok(())
    }

    async fn has_artifact(&self, hash: &DocumentHash, kind: ArtifactKind) -> Result<bool> {
        let artifacts = self.artifacts.read().map_err(|_| poisoned())?;
        Ok(artifacts.contains_key(&(hash.clone(), kind.into())))
    }

    async fn save_artifact(&self, hash: &DocumentHash, artifact: &Artifact) -> Result<()> {
        let mut artifacts = self.artifacts.write().map_err(|_| poisoned())?;
        artifacts.insert((hash.clone(), artifact.kind().into()), artifact.clone());
        Ok(())
    }

    async fn load_artifact(&self, hash: &DocumentHash, kind: ArtifactKind) -> Result<Artifact> {
        let content_type: ContentType = kind.into();
        let artifacts = self.artifacts.read().map_err(|_| poisoned())?;
        artifacts
            .get(&(hash.clone(), content_type))
            .cloned()
            .ok_or_else(|| DocflowError::not_found(content_type.as_str(), hash.as_str()))
    }
}
