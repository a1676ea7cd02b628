//! Attachment optimizer
//!
//! The hosted JSON service rejects large documents, so before every write
//! each attachment is kept inline, re-encoded smaller, or swapped for a
//! metadata-only placeholder. The local store always keeps the originals.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::document::RemoteDocument;
use crate::models::{Attachment, InlineAttachment, Notice, PlaceholderAttachment};

/// Attachments below this size are sent as they are
pub const INLINE_THRESHOLD: u64 = 100 * 1024;

/// A compressed image must come in under this to stay inline
pub const COMPRESSED_TARGET: usize = 200 * 1024;

/// Largest document body the service reliably accepts
pub const REMOTE_SIZE_LIMIT: usize = 101 * 1024;

const MAX_WIDTH: u32 = 1280;
const MAX_HEIGHT: u32 = 720;
const INITIAL_QUALITY: u8 = 60;
const QUALITY_STEP: u8 = 20;
const MIN_QUALITY: u8 = 20;
const SHRUNK_QUALITY: u8 = 40;
const MAX_COMPRESS_ATTEMPTS: u32 = 5;

const THUMBNAIL_WIDTH: u32 = 320;
const THUMBNAIL_HEIGHT: u32 = 240;
const THUMBNAIL_QUALITY: u8 = 50;

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("Attachment data is not valid base64: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

/// Re-encodes images to something smaller
pub trait ImageCompressor: Send + Sync {
    /// Best-effort compression; the result may still be above target
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, OptimizeError>;

    /// A small preview to ship in place of the full image
    fn thumbnail(&self, bytes: &[u8]) -> Result<Vec<u8>, OptimizeError>;
}

/// JPEG re-encoder backed by the `image` crate
#[derive(Debug, Clone)]
pub struct JpegCompressor {
    max_width: u32,
    max_height: u32,
    target_bytes: usize,
}

impl Default for JpegCompressor {
    fn default() -> Self {
        Self {
            max_width: MAX_WIDTH,
            max_height: MAX_HEIGHT,
            target_bytes: COMPRESSED_TARGET,
        }
    }
}

impl ImageCompressor for JpegCompressor {
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, OptimizeError> {
        let img = image::load_from_memory(bytes).map_err(|e| OptimizeError::Decode(e.to_string()))?;
        let (mut width, mut height) =
            fit_within(img.width(), img.height(), self.max_width, self.max_height);
        let mut quality = INITIAL_QUALITY;
        let mut out = encode_jpeg(&img, width, height, quality)?;

        let mut attempts = 0;
        while out.len() > self.target_bytes && attempts < MAX_COMPRESS_ATTEMPTS {
            attempts += 1;
            if attempts <= 2 {
                quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
            } else {
                width = (width * 4 / 5).max(1);
                height = (height * 4 / 5).max(1);
                quality = SHRUNK_QUALITY;
            }
            out = encode_jpeg(&img, width, height, quality)?;
            debug!(
                "Compression attempt {}: {}x{} q{} -> {} bytes",
                attempts,
                width,
                height,
                quality,
                out.len()
            );
        }

        Ok(out)
    }

    fn thumbnail(&self, bytes: &[u8]) -> Result<Vec<u8>, OptimizeError> {
        let img = image::load_from_memory(bytes).map_err(|e| OptimizeError::Decode(e.to_string()))?;
        let thumb = img.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);
        encode_jpeg(&thumb, thumb.width(), thumb.height(), THUMBNAIL_QUALITY)
    }
}

/// Scale `(width, height)` down to fit the bounds, keeping the aspect ratio
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    (
        ((width as f64 * ratio).round() as u32).max(1),
        ((height as f64 * ratio).round() as u32).max(1),
    )
}

fn encode_jpeg(img: &DynamicImage, width: u32, height: u32, quality: u8) -> Result<Vec<u8>, OptimizeError> {
    let rgb = if (width, height) == (img.width(), img.height()) {
        img.to_rgb8()
    } else {
        img.resize_exact(width, height, FilterType::Triangle).to_rgb8()
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(|e| OptimizeError::Encode(e.to_string()))?;
    Ok(out)
}

/// Returned when an assembled document is larger than the service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadWarning {
    pub bytes: usize,
    pub limit: usize,
}

/// Picks a representation for every attachment before a remote write
pub struct AttachmentOptimizer<C = JpegCompressor> {
    compressor: C,
}

impl AttachmentOptimizer<JpegCompressor> {
    pub fn new() -> Self {
        Self::with_compressor(JpegCompressor::default())
    }
}

impl Default for AttachmentOptimizer<JpegCompressor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ImageCompressor> AttachmentOptimizer<C> {
    pub fn with_compressor(compressor: C) -> Self {
        Self { compressor }
    }

    /// Copy of `notices` with every attachment made payload-friendly
    pub fn optimize(&self, notices: &[Notice]) -> Vec<Notice> {
        notices
            .iter()
            .map(|notice| Notice {
                attachments: notice
                    .attachments
                    .iter()
                    .map(|a| self.optimize_attachment(a))
                    .collect(),
                ..notice.clone()
            })
            .collect()
    }

    pub fn optimize_attachment(&self, attachment: &Attachment) -> Attachment {
        let inline = match attachment {
            Attachment::Inline(inline) if inline.size >= INLINE_THRESHOLD => inline,
            _ => return attachment.clone(),
        };

        if attachment.is_image() {
            return self.optimize_image(inline);
        }

        let note = if is_document(&inline.mime_type) {
            "Document too large for cloud sync; open it on the admin device"
        } else {
            "File too large for cloud sync"
        };
        Attachment::Placeholder(placeholder(inline, note, None))
    }

    fn optimize_image(&self, inline: &InlineAttachment) -> Attachment {
        let bytes = match inline.decode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read image {}: {}", inline.name, e);
                return Attachment::Placeholder(placeholder(inline, "Image could not be processed", None));
            }
        };

        let compressed = match self.compressor.compress(&bytes) {
            Ok(compressed) => compressed,
            Err(e) => {
                warn!("Cannot compress image {}: {}", inline.name, e);
                return Attachment::Placeholder(placeholder(inline, "Image could not be processed", None));
            }
        };

        if compressed.len() < COMPRESSED_TARGET {
            debug!(
                "Compressed {} from {} to {} bytes",
                inline.name,
                inline.size,
                compressed.len()
            );
            let mut out = InlineAttachment::from_bytes(&inline.name, "image/jpeg", &compressed);
            out.compressed = true;
            out.original_size = Some(inline.size);
            return Attachment::Inline(out);
        }

        let thumbnail = match self.compressor.thumbnail(&bytes) {
            Ok(thumb) => Some(InlineAttachment::from_bytes("", "image/jpeg", &thumb).data),
            Err(e) => {
                warn!("Cannot build thumbnail for {}: {}", inline.name, e);
                None
            }
        };
        Attachment::Placeholder(placeholder(
            inline,
            "Image too large for cloud sync; a preview is included",
            thumbnail,
        ))
    }
}

fn placeholder(inline: &InlineAttachment, note: &str, thumbnail_data: Option<String>) -> PlaceholderAttachment {
    PlaceholderAttachment {
        name: inline.name.clone(),
        mime_type: inline.mime_type.clone(),
        size: inline.size,
        original_size: inline.original_size.unwrap_or(inline.size),
        note: note.to_string(),
        thumbnail_data,
    }
}

fn is_document(mime_type: &str) -> bool {
    mime_type == "application/pdf"
        || mime_type.starts_with("text/")
        || mime_type.contains("msword")
        || mime_type.contains("officedocument")
        || mime_type.contains("opendocument")
        || mime_type == "application/rtf"
}

/// Warn when the serialized document exceeds the service limit
pub fn check_payload(doc: &RemoteDocument) -> Result<Option<PayloadWarning>, serde_json::Error> {
    let bytes = serde_json::to_vec(doc)?.len();
    if bytes > REMOTE_SIZE_LIMIT {
        warn!(
            "Document is {} bytes, above the {} byte limit; writing anyway",
            bytes, REMOTE_SIZE_LIMIT
        );
        return Ok(Some(PayloadWarning {
            bytes,
            limit: REMOTE_SIZE_LIMIT,
        }));
    }
    Ok(None)
}
