//! Pure calculation functions for framing geometry.
//!
//! All functions here are pure and testable without any I/O or images.

/// Axis-aligned pixel rectangle, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Calculate the square crop around the subject.
///
/// The square's side is `coverage` of the shorter image edge. It is centered
/// at `(0.5 + offset_x / 2) * width, (0.5 + offset_y / 2) * height` and then
/// shifted so it never leaves the image.
///
/// # Examples
/// ```
/// # use watchframe::imaging::{crop_square, Rect};
/// // Centered subject in a 1000x800 frame, 90% coverage → 720px square
/// assert_eq!(
///     crop_square((1000, 800), (0.0, 0.0), 0.9),
///     Rect { x: 140, y: 40, width: 720, height: 720 }
/// );
/// ```
pub fn crop_square(dimensions: (u32, u32), offset: (f64, f64), coverage: f64) -> Rect {
    let (width, height) = dimensions;
    let short_edge = width.min(height);
    let side = ((short_edge as f64 * coverage).round() as u32).clamp(1.min(short_edge), short_edge);

    let center_x = (0.5 + offset.0 / 2.0) * width as f64;
    let center_y = (0.5 + offset.1 / 2.0) * height as f64;

    let max_x = (width - side) as f64;
    let max_y = (height - side) as f64;
    let x = (center_x - side as f64 / 2.0).round().clamp(0.0, max_x) as u32;
    let y = (center_y - side as f64 / 2.0).round().clamp(0.0, max_y) as u32;

    Rect {
        x,
        y,
        width: side,
        height: side,
    }
}

/// Calculate dimensions that fit inside `max_dimension` on the longer edge.
///
/// Never upscales: images already within bounds keep their size. When
/// downscaling, the longer edge is exactly `max_dimension` and the shorter
/// edge keeps the aspect ratio (at least 1px).
pub fn fit_within(dimensions: (u32, u32), max_dimension: u32) -> (u32, u32) {
    let (width, height) = dimensions;
    let longer_edge = width.max(height);
    if longer_edge <= max_dimension || max_dimension == 0 {
        return (width, height);
    }

    let ratio = max_dimension as f64 / longer_edge as f64;
    if width >= height {
        // Landscape or square
        let h = ((height as f64 * ratio).round() as u32).max(1);
        (max_dimension, h)
    } else {
        // Portrait
        let w = ((width as f64 * ratio).round() as u32).max(1);
        (w, max_dimension)
    }
}

/// Calculate the centered rectangle inset from every edge by
/// `inset_ratio * min(width, height)`.
///
/// The inner rectangle is at least 1x1.
pub fn inset_rect(dimensions: (u32, u32), inset_ratio: f64) -> Rect {
    let (width, height) = dimensions;
    let short_edge = width.min(height);
    let inset = (short_edge as f64 * inset_ratio).round().max(0.0) as u32;
    // Keep at least one pixel in the middle
    let inset = inset.min(short_edge.saturating_sub(1) / 2);

    Rect {
        x: inset,
        y: inset,
        width: width - 2 * inset,
        height: height - 2 * inset,
    }
}
