//! Pure Rust codec on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::load_from_memory` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Lossless (fingerprints) | PNG via `DynamicImage::write_to` |
//! | Crop | `DynamicImage::crop_imm` |
//! | Resize | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Blur | `image::imageops::fast_blur` (box-filter gaussian approximation) |

use super::calculations::Rect;
use super::codec::{CodecError, ImageCodec};
use super::params::{OutputFormat, Quality};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Extensions with decoders compiled in.
const PHOTO_EXTENSIONS: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

/// Whether a file extension names a photo format this codec can decode.
pub fn is_supported_extension(ext: &str) -> bool {
    PHOTO_EXTENSIONS
        .iter()
        .any(|(candidate, fmt)| candidate.eq_ignore_ascii_case(ext) && fmt.reading_enabled())
}

/// Codec backed by the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCodec;

impl RustCodec {
    pub fn new() -> Self {
        Self
    }
}

fn ensure_non_empty(image: &DynamicImage, op: &str) -> Result<(), CodecError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CodecError::ProcessingFailed(format!(
            "{op}: image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

impl ImageCodec for RustCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
        image::load_from_memory(bytes)
            .map_err(|e| CodecError::ProcessingFailed(format!("Failed to decode image: {e}")))
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, CodecError> {
        ensure_non_empty(image, "encode")?;
        // Neither JPEG nor our AVIF output carries alpha
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut bytes = Vec::new();
        match format {
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.value() as u8);
                rgb.write_with_encoder(encoder)
                    .map_err(|e| CodecError::ProcessingFailed(format!("JPEG encode failed: {e}")))?;
            }
            OutputFormat::Avif => {
                let encoder = AvifEncoder::new_with_speed_quality(&mut bytes, 6, quality.value() as u8);
                rgb.write_with_encoder(encoder)
                    .map_err(|e| CodecError::ProcessingFailed(format!("AVIF encode failed: {e}")))?;
            }
        }
        Ok(bytes)
    }

    fn encode_lossless(&self, image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| CodecError::ProcessingFailed(format!("PNG encode failed: {e}")))?;
        Ok(cursor.into_inner())
    }

    fn crop(&self, image: &DynamicImage, rect: Rect) -> Result<DynamicImage, CodecError> {
        let fits = rect.width > 0
            && rect.height > 0
            && rect.x.checked_add(rect.width).is_some_and(|r| r <= image.width())
            && rect.y.checked_add(rect.height).is_some_and(|b| b <= image.height());
        if !fits {
            return Err(CodecError::ProcessingFailed(format!(
                "crop {rect:?} outside {}x{} image",
                image.width(),
                image.height()
            )));
        }
        Ok(image.crop_imm(rect.x, rect.y, rect.width, rect.height))
    }

    fn resize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError> {
        ensure_non_empty(image, "resize")?;
        if width == 0 || height == 0 {
            return Err(CodecError::ProcessingFailed(format!(
                "resize target {width}x{height} is empty"
            )));
        }
        if (width, height) == (image.width(), image.height()) {
            return Ok(image.clone());
        }
        Ok(image.resize_exact(width, height, FilterType::Lanczos3))
    }

    fn blur(&self, image: &DynamicImage, sigma: f32) -> Result<DynamicImage, CodecError> {
        ensure_non_empty(image, "blur")?;
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(CodecError::Unsupported(format!("blur sigma {sigma}")));
        }
        let rgb = image.to_rgb8();
        Ok(DynamicImage::ImageRgb8(image::imageops::fast_blur(
            &rgb, sigma,
        )))
    }
}
