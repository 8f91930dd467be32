use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use duet_backend::{Backend, Collection, FileUpload, unique_id};
use duet_types::Message;

use crate::error::{ChatError, Result};

pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// A picked media file, as handed over by the platform picker. Missing
/// metadata falls back to a JPEG image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub size: Option<u64>,
}

impl MediaAsset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mime_type: None,
            file_name: None,
            size: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn mime_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE)
    }

    pub fn file_name(&self) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| format!("image-{}.jpg", Utc::now().timestamp_millis()))
    }

    async fn read(&self) -> Result<FileUpload> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|source| ChatError::Attachment {
            path: self.path.clone(),
            source,
        })?;
        if let Some(size) = self.size
            && size != bytes.len() as u64
        {
            warn!("{} is {} bytes, picker reported {}", self.path.display(), bytes.len(), size);
        }
        Ok(FileUpload {
            file_name: self.file_name(),
            mime_type: self.mime_type().to_string(),
            bytes,
        })
    }
}

/// A file stored in the media bucket, ready to be referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub file_id: String,
    pub url: String,
    pub mime_type: String,
}

pub async fn upload<B>(backend: &B, asset: &MediaAsset) -> Result<UploadedMedia>
where
    B: Backend + ?Sized,
{
    let upload = asset.read().await?;
    let mime_type = upload.mime_type.clone();
    let file = backend.create_file(&unique_id(), upload).await?;
    info!("Uploaded {} ({} bytes) as {}", file.name, file.size, file.id);

    Ok(UploadedMedia {
        url: backend.file_view_url(&file.id),
        file_id: file.id,
        mime_type,
    })
}

/// Delete a message document, and first its stored file when it owns one.
/// A file that is already gone does not block the document delete.
pub async fn delete_message<B>(backend: &B, message: &Message) -> Result<()>
where
    B: Backend + ?Sized,
{
    if let Some(file_id) = message.stored_file_id() {
        match backend.delete_file(&file_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => warn!("File {} of message {} was already gone", file_id, message.id),
            Err(e) => return Err(e.into()),
        }
    }
    backend.delete_document(Collection::Messages, &message.id).await?;
    Ok(())
}

/// Used by callers that only hold a path.
pub fn asset_for(path: &Path) -> MediaAsset {
    let mime_type = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .and_then(|e| match e.as_str() {
            "jpg" | "jpeg" => Some("image/jpeg"),
            "png" => Some("image/png"),
            "gif" => Some("image/gif"),
            "bmp" => Some("image/bmp"),
            "webp" => Some("image/webp"),
            "mp4" => Some("video/mp4"),
            "mov" => Some("video/mov"),
            "avi" => Some("video/avi"),
            "mkv" => Some("video/mkv"),
            "webm" => Some("video/webm"),
            _ => None,
        });

    let mut asset = MediaAsset::new(path);
    if let Some(mime) = mime_type {
        asset = asset.with_mime_type(mime);
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        asset = asset.with_file_name(name);
    }
    asset
}

#[cfg(test)]
mod tests {
    use duet_backend::MemoryBackend;
    use duet_backend::memory::Call;

    use super::*;

    #[test]
    fn defaults_to_jpeg() {
        let asset = MediaAsset::new("/tmp/pick");
        assert_eq!(asset.mime_type(), "image/jpeg");
        let name = asset.file_name();
        assert!(name.starts_with("image-") && name.ends_with(".jpg"));
    }

    #[test]
    fn mime_from_extension() {
        let asset = asset_for(Path::new("/tmp/clip.MP4"));
        assert_eq!(asset.mime_type(), "video/mp4");
        assert_eq!(asset.file_name(), "clip.MP4");
        assert_eq!(asset_for(Path::new("/tmp/notes.txt")).mime_type(), DEFAULT_MIME_TYPE);
    }

    #[tokio::test]
    async fn upload_stores_file_and_builds_view_url() {
        let dir = std::env::temp_dir().join(format!("duet-upload-{}", unique_id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("photo.png");
        tokio::fs::write(&path, b"png bytes").await.unwrap();

        let backend = MemoryBackend::new();
        let media = upload(&backend, &asset_for(&path)).await.unwrap();

        assert_eq!(media.mime_type, "image/png");
        assert_eq!(media.url, backend.file_view_url(&media.file_id));
        assert_eq!(backend.file_bytes(&media.file_id).unwrap(), b"png bytes");
        assert!(matches!(backend.calls().as_slice(), [Call::CreateFile(_)]));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let backend = MemoryBackend::new();
        let err = upload(&backend, &MediaAsset::new("/nonexistent/duet.jpg")).await.unwrap_err();
        assert!(matches!(err, ChatError::Attachment { .. }));
        assert!(backend.calls().is_empty());
    }
}
