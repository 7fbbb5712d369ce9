//! Upload storage for book images
//!
//! Files live under `storage.upload_dir` as `books/<book_id>/<uuid>.<ext>`.
//! Stored paths are always relative to the upload directory so they can be
//! served from `/uploads/`.

use crate::core::error::{ApiError, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Image formats accepted for upload: content type, extension, magic bytes
const IMAGE_SIGNATURES: &[(&str, &str, &[u8])] = &[
    ("image/jpeg", "jpg", &[0xFF, 0xD8, 0xFF]),
    ("image/png", "png", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
    ("image/gif", "gif", b"GIF8"),
];

/// Metadata of a file written by `UploadStore::save`
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub stored_path: String,
    pub content_type: String,
    pub size: u64,
}

/// Detect the image type from the file header
pub fn sniff_image(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(("image/webp", "webp"));
    }

    IMAGE_SIGNATURES
        .iter()
        .find(|(_, _, magic)| bytes.starts_with(magic))
        .map(|(content_type, ext, _)| (*content_type, *ext))
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_size: u64,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            root: root.into(),
            max_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Validate and persist an uploaded image
    ///
    /// `declared_type` is the multipart content type; when absent it is
    /// guessed from `file_name`.
    pub async fn save(
        &self,
        book_id: &str,
        file_name: &str,
        declared_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<StoredFile> {
        if bytes.is_empty() {
            return Err(ApiError::ValidationError("Uploaded file is empty".to_string()));
        }

        if bytes.len() as u64 > self.max_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "File exceeds the {} byte limit",
                self.max_size
            )));
        }

        let declared = declared_type
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(file_name).first().map(|m| m.to_string()));
        if let Some(declared) = &declared {
            if !declared.starts_with("image/") {
                return Err(ApiError::ValidationError(format!(
                    "Only image uploads are accepted, got {}",
                    declared
                )));
            }
        }

        let (content_type, ext) = sniff_image(bytes).ok_or_else(|| {
            ApiError::ValidationError(
                "Unsupported image format (expected JPEG, PNG, GIF or WebP)".to_string(),
            )
        })?;

        if !is_safe_segment(book_id) {
            return Err(ApiError::InvalidRequest("Invalid book id".to_string()));
        }

        let relative = format!("books/{}/{}.{}", book_id, Uuid::new_v4(), ext);
        let target = self.root.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes).await?;

        debug!(path = %target.display(), size = bytes.len(), "Stored upload");

        Ok(StoredFile {
            stored_path: relative,
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
        })
    }

    /// Remove a stored file; a file that is already gone is not an error
    pub async fn delete(&self, stored_path: &str) -> Result<()> {
        let path = self.resolve(stored_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Upload already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Absolute path for a stored relative path, rejecting traversal
    pub fn resolve(&self, stored_path: &str) -> Result<PathBuf> {
        let relative = Path::new(stored_path);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(ApiError::InvalidRequest(format!(
                "Invalid stored path: {}",
                stored_path
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_sniff_image() {
        assert_eq!(sniff_image(PNG), Some(("image/png", "png")));
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(("image/jpeg", "jpg")));
        assert_eq!(sniff_image(b"RIFF\0\0\0\0WEBPVP8 "), Some(("image/webp", "webp")));
        assert_eq!(sniff_image(b"%PDF-1.7"), None);
    }

    #[tokio::test]
    async fn test_save_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path(), 1024);

        let stored = store.save("book-1", "cover.png", None, PNG).await.unwrap();
        assert!(stored.stored_path.starts_with("books/book-1/"));
        assert!(stored.stored_path.ends_with(".png"));
        assert_eq!(stored.content_type, "image/png");
        assert_eq!(stored.size, PNG.len() as u64);

        let path = store.resolve(&stored.stored_path).unwrap();
        assert!(path.exists());

        store.delete(&stored.stored_path).await.unwrap();
        assert!(!path.exists());
        store.delete(&stored.stored_path).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_non_images() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::new(dir.path(), 8);

        let err = store.save("b1", "cover.png", None, PNG).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge(_)));

        let store = UploadStore::new(dir.path(), 1024);
        let err = store
            .save("b1", "notes.txt", Some("text/plain"), b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        let err = store
            .save("b1", "fake.png", Some("image/png"), b"not really a png")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        let err = store.save("b1", "empty.png", None, b"").await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let store = UploadStore::new("/srv/uploads", 1024);
        assert!(store.resolve("books/b1/x.png").is_ok());
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
    }
}
