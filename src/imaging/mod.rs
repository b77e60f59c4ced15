//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Pixel access** | [`PixelBuffer`] over `image` buffers |
//! | **Decode / encode** | `image` decoders, JPEG + AVIF (rav1e) encoders |
//! | **Crop / resize** | `crop_imm`, `resize_exact` (Lanczos3) |
//! | **Blur** | `imageops::fast_blur` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for framing geometry (unit testable)
//! - **Parameters**: Data structures describing encoding choices
//! - **Pixels**: Bounds-checked read access for analysis
//! - **Codec**: [`ImageCodec`] trait + [`RustCodec`]

mod calculations;
pub mod codec;
mod params;
pub mod pixels;
pub mod rust_codec;

pub use calculations::{Rect, crop_square, fit_within, inset_rect};
pub use codec::{CodecError, ImageCodec};
pub use params::{OutputFormat, Quality};
pub use pixels::{Color, PixelBuffer, PixelBufferError};
pub use rust_codec::{RustCodec, is_supported_extension};
