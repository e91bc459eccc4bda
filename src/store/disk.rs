//! Durable [`ContentStore`] on the local filesystem.
//!
//! Layout, sharded on the first four hex digits of the hash:
//!
//! ```text
//! {root}/ab/cd/abcd…/content.json
//!                   /summary.json
//!                   /entity-relations.json
//! ```
//!
//! Each file is one JSON document written to a temp file in the same
//! directory, fsynced, then renamed over the target. Readers therefore see
//! the old file or the new one, never a torn write.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use super::ContentStore;
use crate::error::{DocflowError, Result};
use crate::models::{Artifact, ArtifactKind, ContentType, DocumentHash, DocumentSegment};

#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_dir(&self, hash: &DocumentHash) -> PathBuf {
        let h = hash.as_str();
        let first = h.get(0..2).unwrap_or(h);
        let second = h.get(2..4).unwrap_or(h);
        self.root.join(first).join(second).join(h)
    }

    fn file_for(&self, hash: &DocumentHash, content_type: ContentType) -> PathBuf {
        self.doc_dir(hash)
            .join(format!("{}.json", content_type.as_str()))
    }

    async fn exists(&self, path: PathBuf) -> Result<bool> {
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: PathBuf, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        run_blocking(move || write_atomic(&path, &bytes)).await
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        path: PathBuf,
        kind: &'static str,
        hash: &DocumentHash,
    ) -> Result<T> {
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DocflowError::not_found(kind, hash.as_str()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), bytes = bytes.len(), "store read");
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn run_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::other(format!("store worker failed: {}", e)))??;
    Ok(())
}

fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| io::Error::other(format!("no parent for {}", target.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;

    debug!(path = %target.display(), bytes = bytes.len(), "store write");
    Ok(())
}

/// Remove empty directories from `start` upwards, stopping at `root`.
fn prune_empty_parents(start: &Path, root: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

#[async_trait]
impl ContentStore for DiskStore {
    async fn has_content(&self, hash: &DocumentHash) -> Result<bool> {
        self.exists(self.file_for(hash, ContentType::Content)).await
    }

    async fn save_content(&self, hash: &DocumentHash, segments: &[DocumentSegment]) -> Result<()> {
        self.write_json(self.file_for(hash, ContentType::Content), segments)
            .await
    }

    async fn load_content(&self, hash: &DocumentHash) -> Result<Vec<DocumentSegment>> {
        self.read_json(self.file_for(hash, ContentType::Content), "content", hash)
            .await
    }

    async fn delete_content(&self, hash: &DocumentHash) -> Result<()> {
        let dir = self.doc_dir(hash);
        let root = self.root.clone();
        run_blocking(move || {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(path = %dir.display(), "store delete"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            if let Some(shard) = dir.parent() {
                prune_empty_parents(shard, &root);
            }
            Ok(())
        })
        .await
    }

    async fn has_artifact(&self, hash: &DocumentHash, kind: ArtifactKind) -> Result<bool> {
        self.exists(self.file_for(hash, kind.into())).await
    }

    async fn save_artifact(&self, hash: &DocumentHash, artifact: &Artifact) -> Result<()> {
        self.write_json(self.file_for(hash, artifact.kind().into()), artifact)
            .await
    }

    async fn load_artifact(&self, hash: &DocumentHash, kind: ArtifactKind) -> Result<Artifact> {
        let content_type: ContentType = kind.into();
        let artifact: Artifact = self
            .read_json(self.file_for(hash, content_type), content_type.as_str(), hash)
            .await?;
        if artifact.kind() != kind {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} file for {} holds a different artifact", content_type, hash),
            )
            .into());
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityRelation;
    use crate::urls::canonicalize;
    use tempfile::TempDir;

    fn hash(url: &str) -> DocumentHash {
        canonicalize(url).unwrap().1
    }

    fn segments(n: usize) -> Vec<DocumentSegment> {
        (0..n)
            .map(|i| DocumentSegment::new(format!("segment {}", i)).with_metadata("page", i.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        for n in [0usize, 1, 11] {
            let h = hash(&format!("https://example.com/doc/{}", n));
            let segs = segments(n);
            store.save_content(&h, &segs).await.unwrap();
            assert!(store.has_content(&h).await.unwrap());
            assert_eq!(store.load_content(&h).await.unwrap(), segs);
        }
    }

    #[tokio::test]
    async fn test_sharded_layout() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        let h = hash("https://example.com/layout");
        store.save_content(&h, &segments(2)).await.unwrap();

        let s = h.as_str();
        let expected = tmp
            .path()
            .join(&s[0..2])
            .join(&s[2..4])
            .join(s)
            .join("content.json");
        assert!(expected.is_file());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        let h = hash("https://example.com/overwrite");
        store.save_content(&h, &segments(11)).await.unwrap();
        store.save_content(&h, &segments(3)).await.unwrap();
        assert_eq!(store.load_content(&h).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        let h = hash("https://example.com/missing");
        assert!(!store.has_content(&h).await.unwrap());
        assert!(store.load_content(&h).await.unwrap_err().is_not_found());
        assert!(store
            .load_artifact(&h, ArtifactKind::Summary)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_everything_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        let h = hash("https://example.com/delete");
        store.save_content(&h, &segments(2)).await.unwrap();
        store
            .save_artifact(&h, &Artifact::Summary("short".into()))
            .await
            .unwrap();

        store.delete_content(&h).await.unwrap();
        assert!(!store.has_content(&h).await.unwrap());
        assert!(!store.has_artifact(&h, ArtifactKind::Summary).await.unwrap());
        // Empty shard directories are pruned.
        assert!(!tmp.path().join(&h.as_str()[0..2]).exists());

        store.delete_content(&h).await.unwrap();
    }

    #[tokio::test]
    async fn test_artifact_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        let h = hash("https://example.com/artifacts");
        let relations = vec![EntityRelation::new("Walt Disney", "1901", "born in").unwrap()];
        store
            .save_artifact(&h, &Artifact::EntityRelations(relations.clone()))
            .await
            .unwrap();

        let loaded = store
            .load_artifact(&h, ArtifactKind::EntityRelations)
            .await
            .unwrap();
        assert_eq!(loaded, Artifact::EntityRelations(relations));
        assert!(!store.has_artifact(&h, ArtifactKind::Summary).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::new(tmp.path());
        let h = hash("https://example.com/corrupt");
        let path = store.file_for(&h, ContentType::Content);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let err = store.load_content(&h).await.unwrap_err();
        assert!(matches!(err, DocflowError::Serialization(_)));
    }
}
