//! Value types shared between the estimator, the preprocessor and the
//! persisted cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Representative color of the subject's most saturated central region.
///
/// Channels are normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DialColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl DialColor {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// `#rrggbb` for display theming.
    pub fn to_hex(self) -> String {
        let to_byte = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02x}{:02x}{:02x}",
            to_byte(self.r),
            to_byte(self.g),
            to_byte(self.b)
        )
    }
}

/// Where the subject sits in the frame, and what color its dial is.
///
/// Offsets are the displacement of the subject center from the frame center,
/// normalized by half the frame dimension: `(0, 0)` is centered, `-1` is the
/// left/top edge, `1` the right/bottom edge.
///
/// Descriptors are never mutated after construction. A neutral descriptor is
/// an ordinary value, not an error: downstream cropping simply centers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaliencyDescriptor {
    pub offset_x: f64,
    pub offset_y: f64,
    pub confidence: f64,
    pub computed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dial_color: Option<DialColor>,
}

impl SaliencyDescriptor {
    /// Full-confidence descriptor for a subject at the given offset.
    pub fn new(offset_x: f64, offset_y: f64, dial_color: Option<DialColor>) -> Self {
        Self {
            offset_x: offset_x.clamp(-1.0, 1.0),
            offset_y: offset_y.clamp(-1.0, 1.0),
            confidence: 1.0,
            computed_at: Utc::now(),
            dial_color,
        }
    }

    /// Centered, full confidence, no color.
    pub fn neutral() -> Self {
        Self::new(0.0, 0.0, None)
    }

    pub fn is_neutral(&self) -> bool {
        self.offset_x == 0.0 && self.offset_y == 0.0 && self.dial_color.is_none()
    }

    /// Same descriptor stamped with a different computation time.
    pub fn with_computed_at(self, computed_at: DateTime<Utc>) -> Self {
        Self {
            computed_at,
            ..self
        }
    }
}
