//! Shared test utilities: synthetic photographs with known subjects.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! // White 400x300 frame with a red 100px square whose top-left is (40, 30)
//! let img = with_square(solid(400, 300, WHITE), 40, 30, 100, RED);
//! ```

use crate::imaging::{ImageCodec, OutputFormat, Quality, RustCodec};
use image::{DynamicImage, Rgb, RgbImage};

pub const WHITE: [u8; 3] = [255, 255, 255];
pub const RED: [u8; 3] = [200, 30, 30];
/// Dial blue, approximately (0.12, 0.24, 0.70).
pub const DIAL_BLUE: [u8; 3] = [31, 61, 179];

// =========================================================================
// Image builders
// =========================================================================

/// Uniformly colored RGB image.
pub fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
}

/// Paint an axis-aligned square with top-left corner `(x, y)`.
pub fn with_square(mut img: RgbImage, x: u32, y: u32, size: u32, color: [u8; 3]) -> RgbImage {
    let (w, h) = img.dimensions();
    for py in y..(y + size).min(h) {
        for px in x..(x + size).min(w) {
            img.put_pixel(px, py, Rgb(color));
        }
    }
    img
}

/// Paint a filled disc centered at `(cx, cy)`.
pub fn with_disc(mut img: RgbImage, cx: f64, cy: f64, radius: f64, color: [u8; 3]) -> RgbImage {
    let (w, h) = img.dimensions();
    let x0 = (cx - radius).floor().max(0.0) as u32;
    let y0 = (cy - radius).floor().max(0.0) as u32;
    let x1 = ((cx + radius).ceil() as u32).min(w);
    let y1 = ((cy + radius).ceil() as u32).min(h);
    for py in y0..y1 {
        for px in x0..x1 {
            let dx = px as f64 + 0.5 - cx;
            let dy = py as f64 + 0.5 - cy;
            if dx * dx + dy * dy <= radius * radius {
                img.put_pixel(px, py, Rgb(color));
            }
        }
    }
    img
}

/// White square canvas with a centered square subject.
pub fn centered_subject(size: u32, subject: u32) -> DynamicImage {
    let offset = (size - subject) / 2;
    DynamicImage::ImageRgb8(with_square(solid(size, size, WHITE), offset, offset, subject, RED))
}

/// The 2000x1000 watch scenario: white background, centered blue dial of
/// 600px diameter.
pub fn watch_photo() -> DynamicImage {
    DynamicImage::ImageRgb8(with_disc(solid(2000, 1000, WHITE), 1000.0, 500.0, 300.0, DIAL_BLUE))
}

/// Encode as PNG bytes, as a caller would hand over a file's contents.
pub fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    RustCodec::new().encode_lossless(img).unwrap()
}

/// Encode as JPEG bytes.
pub fn jpeg_bytes(img: &DynamicImage) -> Vec<u8> {
    RustCodec::new()
        .encode(img, OutputFormat::Jpeg, Quality::new(90))
        .unwrap()
}

// =========================================================================
// Assertions
// =========================================================================

/// Assert two floats are within `tolerance`, with a readable message.
pub fn assert_close(actual: f64, expected: f64, tolerance: f64, what: &str) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{what}: expected {expected} ± {tolerance}, got {actual}"
    );
}
