//! Color-statistics subject detection.
//!
//! Pure functions over a [`PixelBuffer`]; no caching, no I/O. The pipeline:
//!
//! 1. [`estimate_background`]: average of 20 evenly spaced samples along
//!    each of the four edges.
//! 2. [`find_content_box`]: strided scan (about 150 samples per axis
//!    regardless of resolution) keeping every sample whose summed channel
//!    distance from the background exceeds [`CONTENT_THRESHOLD`].
//! 3. [`subject_offset`]: box center relative to the frame center.
//! 4. [`sample_dial_color`]: most saturated third of a central disc.
//!
//! The sample counts are fixed, so runtime does not grow with resolution.
//! The flip side is that very large photos with thin subjects can fall
//! between samples; nothing here adapts to that.

use crate::imaging::{Color, PixelBuffer};
use crate::types::{DialColor, SaliencyDescriptor};
use rayon::prelude::*;

/// Samples taken along each edge for the background estimate.
pub const EDGE_SAMPLES: u32 = 20;

/// Target number of content-scan samples per axis.
pub const SCAN_SAMPLES_PER_AXIS: u32 = 150;

/// Summed absolute channel difference (0–3 scale) above which a sample is
/// subject rather than background.
pub const CONTENT_THRESHOLD: f64 = 0.15;

/// Dial disc radius as a fraction of half the content box's shorter side.
pub const DIAL_RADIUS_FRACTION: f64 = 0.35;

/// Target number of dial samples per radius.
pub const DIAL_SAMPLES_PER_RADIUS: f64 = 15.0;

/// Brightness window (exclusive) for dial samples: drops shadows and
/// specular highlights.
pub const DIAL_MIN_BRIGHTNESS: f64 = 0.10;
pub const DIAL_MAX_BRIGHTNESS: f64 = 0.95;

/// Bounding box of content samples. `x1`/`y1` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl ContentBox {
    fn point(x: u32, y: u32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x + 1,
            y1: y + 1,
        }
    }

    fn union(self, other: Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    /// Center in pixel coordinates.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.x0 + self.x1) as f64 / 2.0,
            (self.y0 + self.y1) as f64 / 2.0,
        )
    }
}

/// Evenly spaced positions across `0..len`, endpoints included.
fn edge_positions(len: u32) -> impl Iterator<Item = u32> {
    let last = len.saturating_sub(1) as f64;
    (0..EDGE_SAMPLES).map(move |i| (last * i as f64 / (EDGE_SAMPLES - 1) as f64).round() as u32)
}

/// Average color of the four image edges.
///
/// Returns `None` for an empty buffer.
pub fn estimate_background(buffer: &PixelBuffer<'_>) -> Option<Color> {
    if buffer.is_empty() {
        return None;
    }
    let (w, h) = (buffer.width(), buffer.height());

    let top_bottom = edge_positions(w).flat_map(|x| [(x, 0), (x, h - 1)]);
    let left_right = edge_positions(h).flat_map(|y| [(0, y), (w - 1, y)]);

    let (sum, count) = top_bottom
        .chain(left_right)
        .filter_map(|(x, y)| buffer.color(x, y))
        .fold((Color::default(), 0u32), |(acc, n), c| {
            (Color::new(acc.r + c.r, acc.g + c.g, acc.b + c.b), n + 1)
        });

    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some(Color::new(sum.r / n, sum.g / n, sum.b / n))
}

/// Scan stride: `max(1, min(width, height) / 150)`.
pub fn scan_stride(width: u32, height: u32) -> u32 {
    (width.min(height) / SCAN_SAMPLES_PER_AXIS).max(1)
}

/// Smallest box covering every sample that differs from `background` by
/// more than [`CONTENT_THRESHOLD`].
///
/// Sampled rows are scanned in parallel and their partial boxes merged.
pub fn find_content_box(buffer: &PixelBuffer<'_>, background: Color) -> Option<ContentBox> {
    let (w, h) = (buffer.width(), buffer.height());
    let stride = scan_stride(w, h) as usize;
    let rows: Vec<u32> = (0..h).step_by(stride).collect();

    rows.par_iter()
        .filter_map(|&y| {
            (0..w)
                .step_by(stride)
                .filter(|&x| {
                    buffer
                        .color(x, y)
                        .is_some_and(|c| c.distance(background) > CONTENT_THRESHOLD)
                })
                .map(|x| ContentBox::point(x, y))
                .reduce(ContentBox::union)
        })
        .reduce_with(ContentBox::union)
}

/// Subject offset from frame center, each axis in `[-1, 1]`.
pub fn subject_offset(content: &ContentBox, width: u32, height: u32) -> (f64, f64) {
    let (cx, cy) = content.center();
    let nx = cx / width as f64;
    let ny = cy / height as f64;
    ((nx - 0.5) * 2.0, (ny - 0.5) * 2.0)
}

/// Average color of the most saturated third of the dial disc.
///
/// The disc is centered on the content box with radius
/// `0.35 * min(box_w, box_h) / 2`. Samples outside the brightness window are
/// ignored; with none left there is no dial color.
pub fn sample_dial_color(buffer: &PixelBuffer<'_>, content: &ContentBox) -> Option<DialColor> {
    let (cx, cy) = content.center();
    let (cx, cy) = (cx.floor() as i64, cy.floor() as i64);
    let radius = DIAL_RADIUS_FRACTION * content.width().min(content.height()) as f64 / 2.0;
    let stride = ((radius / DIAL_SAMPLES_PER_RADIUS) as usize).max(1);
    let reach = radius.floor() as i64;

    let mut samples: Vec<Color> = Vec::new();
    for dy in (-reach..=reach).step_by(stride) {
        for dx in (-reach..=reach).step_by(stride) {
            if ((dx * dx + dy * dy) as f64) > radius * radius {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
                continue;
            };
            if let Some(color) = buffer.color(x, y) {
                let brightness = color.brightness();
                if brightness > DIAL_MIN_BRIGHTNESS && brightness < DIAL_MAX_BRIGHTNESS {
                    samples.push(color);
                }
            }
        }
    }

    if samples.is_empty() {
        return None;
    }

    samples.sort_by(|a, b| b.saturation().total_cmp(&a.saturation()));
    let keep = (samples.len() / 3).max(1);
    let top = &samples[..keep];
    let n = top.len() as f64;
    Some(DialColor::new(
        top.iter().map(|c| c.r).sum::<f64>() / n,
        top.iter().map(|c| c.g).sum::<f64>() / n,
        top.iter().map(|c| c.b).sum::<f64>() / n,
    ))
}

/// Run the full analysis. An empty buffer, or one with no sample
/// distinguishable from the background, yields the neutral descriptor.
pub fn analyze_pixels(buffer: &PixelBuffer<'_>) -> SaliencyDescriptor {
    let Some(background) = estimate_background(buffer) else {
        return SaliencyDescriptor::neutral();
    };
    let Some(content) = find_content_box(buffer, background) else {
        return SaliencyDescriptor::neutral();
    };

    let (offset_x, offset_y) = subject_offset(&content, buffer.width(), buffer.height());
    let dial_color = sample_dial_color(buffer, &content);
    SaliencyDescriptor::new(offset_x, offset_y, dial_color)
}
