//! Bounds-checked read access to decoded pixel data.
//!
//! A [`PixelBuffer`] is validated once at construction (channel count,
//! row stride and byte length), so every later read goes through
//! [`PixelBuffer::index`] and can only ever return `None` for coordinates
//! outside the image, never read past the slice.

use image::DynamicImage;
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PixelBufferError {
    #[error("need at least 3 bytes per pixel, got {0}")]
    TooFewChannels(usize),
    #[error("row stride {stride} is shorter than {width} pixels of {bytes_per_pixel} bytes")]
    StrideTooShort {
        stride: usize,
        width: u32,
        bytes_per_pixel: usize,
    },
    #[error("buffer holds {actual} bytes but {required} are addressable")]
    Truncated { required: usize, actual: usize },
}

/// An RGB triple with channels normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub fn from_bytes(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f64 / 255.0,
            g: g as f64 / 255.0,
            b: b as f64 / 255.0,
        }
    }

    /// Brightness as the largest channel (HSV value).
    pub fn brightness(self) -> f64 {
        self.r.max(self.g).max(self.b)
    }

    /// HSV saturation: `(max - min) / max`, zero for black.
    pub fn saturation(self) -> f64 {
        let max = self.brightness();
        if max <= 0.0 {
            return 0.0;
        }
        let min = self.r.min(self.g).min(self.b);
        (max - min) / max
    }

    /// Sum of absolute per-channel differences.
    pub fn distance(self, other: Color) -> f64 {
        (self.r - other.r).abs() + (self.g - other.g).abs() + (self.b - other.b).abs()
    }
}

/// Read-only view over interleaved 8-bit pixels.
///
/// The first three channels of every pixel are read as R, G, B. Anything
/// beyond that (alpha, padding) is ignored.
#[derive(Debug, Clone)]
pub struct PixelBuffer<'a> {
    data: Cow<'a, [u8]>,
    width: u32,
    height: u32,
    stride: usize,
    bytes_per_pixel: usize,
}

impl<'a> PixelBuffer<'a> {
    pub fn new(
        data: impl Into<Cow<'a, [u8]>>,
        width: u32,
        height: u32,
        stride: usize,
        bytes_per_pixel: usize,
    ) -> Result<Self, PixelBufferError> {
        let data = data.into();
        if bytes_per_pixel < 3 {
            return Err(PixelBufferError::TooFewChannels(bytes_per_pixel));
        }
        if stride < width as usize * bytes_per_pixel {
            return Err(PixelBufferError::StrideTooShort {
                stride,
                width,
                bytes_per_pixel,
            });
        }
        let required = if width == 0 || height == 0 {
            0
        } else {
            stride * (height as usize - 1) + width as usize * bytes_per_pixel
        };
        if data.len() < required {
            return Err(PixelBufferError::Truncated {
                required,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            bytes_per_pixel,
        })
    }

    /// View a decoded image. 8-bit RGB and RGBA are borrowed as-is; every
    /// other layout is converted to RGB8 once.
    pub fn from_image(image: &'a DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        let (data, bytes_per_pixel) = match image {
            DynamicImage::ImageRgb8(buf) => (Cow::Borrowed(buf.as_raw().as_slice()), 3),
            DynamicImage::ImageRgba8(buf) => (Cow::Borrowed(buf.as_raw().as_slice()), 4),
            other => (Cow::Owned(other.to_rgb8().into_raw()), 3),
        };
        Self {
            data,
            width,
            height,
            stride: width as usize * bytes_per_pixel,
            bytes_per_pixel,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Byte offset of `(x, y, channel)`, or `None` outside the buffer.
    pub fn index(&self, x: u32, y: u32, channel: usize) -> Option<usize> {
        if x >= self.width || y >= self.height || channel >= self.bytes_per_pixel {
            return None;
        }
        Some(y as usize * self.stride + x as usize * self.bytes_per_pixel + channel)
    }

    pub fn channel(&self, x: u32, y: u32, channel: usize) -> Option<u8> {
        self.index(x, y, channel)
            .and_then(|i| self.data.get(i).copied())
    }

    /// Normalized color at `(x, y)`.
    pub fn color(&self, x: u32, y: u32) -> Option<Color> {
        let base = self.index(x, y, 0)?;
        let px = self.data.get(base..base + 3)?;
        Some(Color::from_bytes(px[0], px[1], px[2]))
    }
}
