//! Page image encoding: rendered image file → base64 payload for the vision
//! API.

use crate::config::ImageFormat;
use crate::error::ExtractionError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// A base64-encoded image and its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: &'static str,
}

/// Read a page image from disk and base64-encode it.
///
/// The MIME type comes from the file extension; anything other than PNG or
/// JPEG is refused before the file is read.
pub async fn encode_image_file(path: &Path, page: usize) -> Result<EncodedImage, ExtractionError> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(ImageFormat::from_extension)
        .ok_or_else(|| ExtractionError::UnsupportedImage {
            page,
            path: path.to_path_buf(),
        })?;

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ExtractionError::ImageUnreadable {
            page,
            path: path.to_path_buf(),
            source,
        })?;

    let data = STANDARD.encode(&bytes);
    debug!(page, bytes = bytes.len(), encoded = data.len(), "encoded page image");

    Ok(EncodedImage {
        data,
        mime_type: format.mime_type(),
    })
}
