//! Parameter types for image operations.
//!
//! These describe *what* to produce, not *how*. They are the interface
//! between the [`preprocess`](crate::preprocess) pipeline (which decides the
//! framing) and the [`codec`](super::codec) (which does the pixel work), so
//! the codec can be swapped for a mock in tests.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 82). Clamped on construction.
//! - [`OutputFormat`]: Lossy container for the upload bytes (JPEG or AVIF).

use serde::{Deserialize, Serialize};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(82)
    }
}

/// Lossy output encoding for upload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Avif,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Avif => "avif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Avif => "image/avif",
        }
    }
}
