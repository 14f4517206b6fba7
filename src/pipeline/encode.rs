//! Image encoding: file bytes → base64 `ImageData` for the VLM request.
//!
//! PNG, JPEG, GIF and WebP are what the multimodal APIs accept natively, so
//! those bytes are forwarded untouched (no recompression, no quality loss).
//! BMP and TIFF are decoded and re-encoded as lossless PNG. The MIME type is
//! sniffed from the magic bytes, falling back to the file extension.

use crate::error::ExtractionError;
use crate::pipeline::enumerate::ImageRecord;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Read `record` from disk and wrap it for the VLM API.
pub async fn load_image(record: &ImageRecord) -> Result<ImageData, ExtractionError> {
    let bytes = tokio::fs::read(&record.path)
        .await
        .map_err(|e| ExtractionError::ReadFailed {
            identifier: record.identifier.clone(),
            detail: e.to_string(),
        })?;
    encode_image(&record.identifier, &bytes, detect_format(record, &bytes))
}

fn detect_format(record: &ImageRecord, bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .or_else(|| ImageFormat::from_path(&record.path).ok())
}

/// Encode raw image bytes of a known format.
///
/// `detail: "high"` lets GPT-4-class models tile the image; without it fine
/// print on labels and receipts is lost.
pub fn encode_image(
    identifier: &str,
    bytes: &[u8],
    format: Option<ImageFormat>,
) -> Result<ImageData, ExtractionError> {
    let unsupported = || ExtractionError::UnsupportedFormat {
        identifier: identifier.to_string(),
    };

    let data = match format.ok_or_else(unsupported)? {
        f @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP) => {
            ImageData::new(STANDARD.encode(bytes), f.to_mime_type())
        }
        f @ (ImageFormat::Bmp | ImageFormat::Tiff) => {
            let img = image::load_from_memory_with_format(bytes, f).map_err(|e| {
                ExtractionError::ReadFailed {
                    identifier: identifier.to_string(),
                    detail: format!("decode failed: {e}"),
                }
            })?;
            reencode_png(identifier, &img)?
        }
        _ => return Err(unsupported()),
    };

    debug!("{}: encoded {} bytes base64 ({})", identifier, data.data.len(), data.mime_type);
    Ok(data.with_detail("high"))
}

fn reencode_png(identifier: &str, img: &DynamicImage) -> Result<ImageData, ExtractionError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ExtractionError::ReadFailed {
            identifier: identifier.to_string(),
            detail: format!("PNG re-encode failed: {e}"),
        })?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png"))
}
