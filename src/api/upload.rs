use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::Json,
};

use crate::api::handlers::{ApiResult, AppState};
use crate::error::PortfolioError;
use crate::media::{
    size_limit, validate_content_type, IngestResult, MediaUpload, UploadBuffer, MAX_VIDEO_BYTES,
};
use crate::model::MediaKind;
use crate::store::PortfolioStore;

/// Multipart framing allowance on top of the largest accepted file.
pub const UPLOAD_BODY_LIMIT: usize = MAX_VIDEO_BYTES as usize + 1024 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const DEFAULT_FILE_NAME: &str = "upload";

/// `POST /api/upload`: a `file` part plus a `file_type` part (`image` or
/// `video`). The file is counted while it streams in; when `file_type` comes
/// first the file is also type-checked before any of it is read.
pub async fn upload_media<S: PortfolioStore>(
    State(state): State<AppState<S>>,
    mut multipart: Multipart,
) -> ApiResult<IngestResult> {
    let mut kind: Option<MediaKind> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|err| multipart_error(err, kind))? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file_type") => {
                let text = field.text().await.map_err(|err| multipart_error(err, kind))?;
                kind = Some(parse_kind(&text)?);
            }
            Some("file") => {
                let original_name = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .unwrap_or(DEFAULT_FILE_NAME)
                    .to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();

                let buffer_kind = match kind {
                    Some(kind) => {
                        validate_content_type(kind, &content_type)?;
                        kind
                    }
                    None => MediaKind::Video,
                };

                let mut buffer = UploadBuffer::new(buffer_kind);
                let mut overflow = None;
                // Past the limit the rest of the part is read and discarded so
                // the client gets the 413 instead of a reset connection.
                while let Some(chunk) = field.chunk().await.map_err(|err| multipart_error(err, kind))? {
                    if overflow.is_none() {
                        overflow = buffer.push(&chunk).err();
                    }
                }
                if let Some(err) = overflow {
                    return Err(err.into());
                }
                file = Some((original_name, content_type, buffer.into_bytes()));
            }
            other => log::debug!("ignoring multipart field {:?}", other),
        }
    }

    let kind = kind.ok_or_else(|| missing_field("file_type"))?;
    let (original_name, content_type, bytes) = file.ok_or_else(|| missing_field("file"))?;

    let result = state
        .ingestor
        .ingest(MediaUpload {
            kind,
            content_type,
            original_name,
            bytes,
        })
        .await?;
    Ok(Json(result))
}

fn parse_kind(raw: &str) -> Result<MediaKind, PortfolioError> {
    raw.trim()
        .parse::<MediaKind>()
        .map_err(|_| PortfolioError::InvalidField {
            field: "file_type".to_string(),
            reason: format!("expected 'image' or 'video', got '{}'", raw),
        })
}

fn missing_field(field: &str) -> PortfolioError {
    PortfolioError::InvalidField {
        field: field.to_string(),
        reason: "missing from upload".to_string(),
    }
}

fn multipart_error(err: MultipartError, kind: Option<MediaKind>) -> PortfolioError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return body_too_large(kind);
    }
    PortfolioError::InvalidField {
        field: "multipart".to_string(),
        reason: err.body_text(),
    }
}

/// The whole body crossed the route limit. Reported against the declared kind
/// when `file_type` has been read already, otherwise against the video limit.
fn body_too_large(kind: Option<MediaKind>) -> PortfolioError {
    let kind = kind.unwrap_or(MediaKind::Video);
    PortfolioError::PayloadTooLarge {
        kind,
        limit: size_limit(kind),
    }
}
