//! Blob store adapter: persists image bytes on disk and records metadata.
//! A production deployment could swap this for an object-store client
//! behind the same interface; this adapter backs it with a local directory
//! so the crate is runnable standalone, and is the one place
//! `BLOB_STORE_DIR` is read.

use crate::error::PipelineError;
use crate::model::ImageArtifact;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Key format: `{document_id}/{page_or_"noPage"}_{index}.{ext}`.
pub fn blob_key(artifact: &ImageArtifact) -> String {
    let page = artifact.page_number.map(|p| p.to_string()).unwrap_or_else(|| "noPage".to_string());
    let ext = extension_for_mime(&artifact.mime);
    format!("{}/{}_{}.{}", artifact.document_id, page, artifact.image_index, ext)
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        _ => "bin",
    }
}

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Persist one artifact's bytes, then assign `blob_ref`. Metadata (the
    /// rest of the `ImageArtifact` fields) is considered written by the
    /// caller once this returns `Ok`; blob-then-metadata ordering is
    /// enforced by the orchestrator, not here.
    pub async fn put(&self, artifact: &mut ImageArtifact, bytes: &[u8]) -> Result<(), PipelineError> {
        let key = blob_key(artifact);
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| PipelineError::BlobStore(e.to_string()))?;
        }
        fs::write(&path, bytes).await.map_err(|e| PipelineError::BlobStore(e.to_string()))?;
        artifact.blob_ref = key;
        Ok(())
    }

    /// Best-effort delete used to roll back a blob write when the
    /// companion metadata write subsequently fails.
    pub async fn delete(&self, key: &str) {
        let path = self.root.join(key);
        if let Err(e) = fs::remove_file(&path).await {
            warn!(key, error = %e, "best-effort blob rollback failed");
        }
    }

    /// Read a blob's bytes back by key, for handlers that need to inline
    /// them into a response (e.g. base64-encoded images in `/process`).
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, PipelineError> {
        fs::read(self.root.join(key)).await.map_err(|e| PipelineError::BlobStore(e.to_string()))
    }

    /// Delete every blob for a document; returns the count removed.
    pub async fn delete_all(&self, document_id: uuid::Uuid) -> usize {
        let dir = self.root.join(document_id.to_string());
        let mut removed = 0;
        if let Ok(mut entries) = fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if fs::remove_file(entry.path()).await.is_ok() {
                    removed += 1;
                }
            }
            let _ = fs::remove_dir(&dir).await;
        }
        removed
    }

    /// Sign a time-limited reference to a blob. This reference adapter has
    /// no network presence, so "signing" returns a `file://` URL annotated
    /// with its expiry rather than a cryptographically signed one; callers
    /// needing real signed URLs point `BLOB_STORE_DIR` at a gateway-backed
    /// mount instead.
    pub fn sign(&self, key: &str, ttl: std::time::Duration) -> String {
        let expires = chrono::Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        format!("file://{}?expires={}", self.root.join(key).display(), expires.to_rfc3339())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Default signed-URL validity.
pub const DEFAULT_SIGN_TTL: std::time::Duration = std::time::Duration::from_secs(3600);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageOrigin;
    use uuid::Uuid;

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
    }

    #[test]
    fn blob_key_format() {
        let doc_id = Uuid::new_v4();
        let artifact = ImageArtifact::new(doc_id, Some(2), 1, ImageOrigin::Region, "image/png", 10, 10, b"x");
        let key = blob_key(&artifact);
        assert_eq!(key, format!("{}/2_1.png", doc_id));
    }

    #[test]
    fn blob_key_uses_nopage_sentinel() {
        let doc_id = Uuid::new_v4();
        let artifact = ImageArtifact::new(doc_id, None, 0, ImageOrigin::Embedded, "image/jpeg", 10, 10, b"x");
        assert_eq!(blob_key(&artifact), format!("{}/noPage_0.jpg", doc_id));
    }

    #[tokio::test]
    async fn put_then_delete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let doc_id = Uuid::new_v4();
        let mut artifact = ImageArtifact::new(doc_id, Some(1), 0, ImageOrigin::Region, "image/png", 1, 1, b"bytes");
        store.put(&mut artifact, b"bytes").await.unwrap();
        assert!(!artifact.blob_ref.is_empty());
        assert!(dir.path().join(&artifact.blob_ref).exists());

        let removed = store.delete_all(doc_id).await;
        assert_eq!(removed, 1);
    }
}
