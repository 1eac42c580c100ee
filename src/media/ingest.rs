use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::PortfolioError;
use crate::media::probe::MediaProber;
use crate::media::storage::ContentStorage;
use crate::model::{Dimensions, ItemMetadata, MediaKind};

pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: u64 = 50 * 1024 * 1024;

pub const IMAGE_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];
pub const VIDEO_CONTENT_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "video/x-msvideo",
    "video/mpeg",
    "application/mp4",
];

/// Latest thumbnail offset, in seconds.
const THUMBNAIL_MAX_OFFSET: f64 = 3.0;
const THUMBNAIL_OFFSET_RATIO: f64 = 0.1;
const DEFAULT_EXTENSION: &str = "bin";

pub fn allowed_content_types(kind: MediaKind) -> &'static [&'static str] {
    match kind {
        MediaKind::Image => IMAGE_CONTENT_TYPES,
        MediaKind::Video => VIDEO_CONTENT_TYPES,
    }
}

/// Inclusive size ceiling in bytes.
pub fn size_limit(kind: MediaKind) -> u64 {
    match kind {
        MediaKind::Image => MAX_IMAGE_BYTES,
        MediaKind::Video => MAX_VIDEO_BYTES,
    }
}

/// Accumulates an upload body while it streams in and stops as soon as it
/// crosses `limit`, so oversized bodies are never buffered whole.
#[derive(Debug)]
pub struct UploadBuffer {
    kind: MediaKind,
    limit: u64,
    bytes: Vec<u8>,
}

impl UploadBuffer {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            limit: size_limit(kind),
            bytes: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), PortfolioError> {
        if self.bytes.len() as u64 + chunk.len() as u64 > self.limit {
            return Err(PortfolioError::PayloadTooLarge {
                kind: self.kind,
                limit: self.limit,
            });
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// One uploaded file with what the client declared about it.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub content_type: String,
    pub original_name: String,
    pub bytes: Vec<u8>,
}

/// Everything needed to attach the stored file as an item. Nothing is written
/// to the portfolio store by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestResult {
    pub filename: String,
    pub original_name: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub metadata: ItemMetadata,
}

/// Validate, persist and describe uploaded media.
#[derive(Clone)]
pub struct MediaIngestor {
    storage: Arc<dyn ContentStorage>,
    prober: Arc<dyn MediaProber>,
    public_prefix: String,
    thumbnail_width: u32,
}

impl MediaIngestor {
    pub fn new(
        storage: Arc<dyn ContentStorage>,
        prober: Arc<dyn MediaProber>,
        public_prefix: impl Into<String>,
        thumbnail_width: u32,
    ) -> Self {
        Self {
            storage,
            prober,
            public_prefix: public_prefix.into(),
            thumbnail_width,
        }
    }

    pub async fn ingest(&self, upload: MediaUpload) -> Result<IngestResult, PortfolioError> {
        let format = validate_content_type(upload.kind, &upload.content_type)?;

        let size = upload.bytes.len() as u64;
        let limit = size_limit(upload.kind);
        if size > limit {
            return Err(PortfolioError::PayloadTooLarge {
                kind: upload.kind,
                limit,
            });
        }

        self.storage
            .ensure_dir()
            .await
            .map_err(PortfolioError::StorageFailure)?;

        let filename = stored_name(&upload.original_name);
        self.storage
            .write(&filename, &upload.bytes)
            .await
            .map_err(PortfolioError::StorageFailure)?;
        log::info!(
            "stored {} upload original_name={} filename={} size={}",
            upload.kind,
            upload.original_name,
            filename,
            size
        );

        let path = self
            .storage
            .path_of(&filename)
            .map_err(PortfolioError::StorageFailure)?;

        let mut metadata = ItemMetadata {
            size,
            dimensions: None,
            duration: None,
            format,
        };
        let mut thumbnail_url = None;

        match upload.kind {
            MediaKind::Image => {
                metadata.dimensions = self.image_dimensions(&path, &filename).await;
            }
            MediaKind::Video => {
                let (dimensions, duration) = self.video_properties(&path, &filename).await;
                metadata.dimensions = dimensions;
                metadata.duration = duration.map(|seconds| seconds.round() as u64);
                thumbnail_url = self.thumbnail(&path, &filename, duration).await;
            }
        }

        Ok(IngestResult {
            url: self.public_url(&filename),
            filename,
            original_name: upload.original_name,
            thumbnail_url,
            metadata,
        })
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}/{}", self.public_prefix.trim_end_matches('/'), name)
    }

    async fn image_dimensions(&self, path: &Path, filename: &str) -> Option<Dimensions> {
        match self.prober.probe_image(path).await {
            Ok(dimensions) => Some(dimensions),
            Err(err) => {
                log::warn!("image probe failed filename={}: {}", filename, err);
                None
            }
        }
    }

    async fn video_properties(
        &self,
        path: &Path,
        filename: &str,
    ) -> (Option<Dimensions>, Option<f64>) {
        match self.prober.probe_video(path).await {
            Ok(probe) => {
                if probe.duration.is_none() {
                    log::warn!("video probe reported no duration filename={}", filename);
                }
                (probe.dimensions, probe.duration)
            }
            Err(err) => {
                log::warn!("video probe failed filename={}: {}", filename, err);
                (None, None)
            }
        }
    }

    /// Sample one frame, store it next to the video and return its public URL.
    async fn thumbnail(
        &self,
        path: &Path,
        filename: &str,
        duration: Option<f64>,
    ) -> Option<String> {
        let timestamp = thumbnail_timestamp(duration);
        let frame = match self
            .prober
            .extract_frame(path, timestamp, self.thumbnail_width)
            .await
        {
            Ok(frame) => frame,
            Err(err) if timestamp > 0.0 => {
                log::warn!(
                    "thumbnail at {:.3}s failed filename={}: {}; retrying at 0s",
                    timestamp,
                    filename,
                    err
                );
                match self
                    .prober
                    .extract_frame(path, 0.0, self.thumbnail_width)
                    .await
                {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("thumbnail retry failed filename={}: {}", filename, err);
                        return None;
                    }
                }
            }
            Err(err) => {
                log::warn!("thumbnail failed filename={}: {}", filename, err);
                return None;
            }
        };

        let thumb_name = thumbnail_name(filename);
        if let Err(err) = self.storage.write(&thumb_name, &frame).await {
            log::warn!("failed to store thumbnail {}: {:#}", thumb_name, err);
            return None;
        }
        Some(self.public_url(&thumb_name))
    }
}

/// Check `content_type` against the allow-list for `kind` and return its
/// subtype (`image/png` gives `png`).
pub fn validate_content_type(kind: MediaKind, content_type: &str) -> Result<String, PortfolioError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if !allowed_content_types(kind).contains(&essence.as_str()) {
        return Err(PortfolioError::UnsupportedMediaType {
            kind,
            content_type: content_type.to_string(),
        });
    }

    Ok(essence
        .split_once('/')
        .map(|(_, subtype)| subtype.to_string())
        .unwrap_or(essence))
}

/// Random unique name keeping the original extension, `bin` when there is
/// none or it is not plain alphanumeric.
pub fn stored_name(original_name: &str) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 16)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(DEFAULT_EXTENSION);
    format!("{}.{}", Uuid::new_v4(), extension)
}

/// `<stem>_thumb.jpg` for a stored video name.
pub fn thumbnail_name(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename);
    format!("{}_thumb.jpg", stem)
}

/// `min(3.0, duration * 0.1)`, or 0 when the duration is unknown.
pub fn thumbnail_timestamp(duration: Option<f64>) -> f64 {
    duration
        .map(|seconds| (seconds * THUMBNAIL_OFFSET_RATIO).min(THUMBNAIL_MAX_OFFSET))
        .unwrap_or(0.0)
}
