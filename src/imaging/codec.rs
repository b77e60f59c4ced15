//! Image codec trait and shared error type.
//!
//! The [`ImageCodec`] trait covers every pixel operation the preprocessor
//! needs: decode, encode (lossy and lossless), crop, resize, and blur.
//!
//! The production implementation is
//! [`RustCodec`](super::rust_codec::RustCodec) on top of the `image` crate.
//! Tests substitute a recording codec that can inject failures, which is how
//! the crop / blur / encode fallbacks get exercised.

use super::calculations::Rect;
use super::params::{OutputFormat, Quality};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Trait for image codecs.
///
/// Every operation returns a fresh image; inputs are never mutated.
pub trait ImageCodec: Send + Sync {
    /// Decode encoded bytes (JPEG, PNG, TIFF, WebP).
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError>;

    /// Lossy encode for upload.
    fn encode(
        &self,
        image: &DynamicImage,
        format: OutputFormat,
        quality: Quality,
    ) -> Result<Vec<u8>, CodecError>;

    /// Lossless encode, used for content fingerprints.
    fn encode_lossless(&self, image: &DynamicImage) -> Result<Vec<u8>, CodecError>;

    /// Cut out `rect`. Fails when the rectangle leaves the image or is empty.
    fn crop(&self, image: &DynamicImage, rect: Rect) -> Result<DynamicImage, CodecError>;

    /// Resize to exactly `width` x `height`.
    fn resize(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CodecError>;

    /// Gaussian blur with standard deviation `sigma`.
    fn blur(&self, image: &DynamicImage, sigma: f32) -> Result<DynamicImage, CodecError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::RustCodec;
    use std::sync::Mutex;

    /// Codec that delegates to [`RustCodec`], records every call, and fails
    /// the operations it is told to fail.
    /// Uses Mutex (not RefCell) so it is Sync and can sit behind an Arc.
    #[derive(Default)]
    pub struct MockCodec {
        pub inner: RustCodec,
        pub fail_crop: bool,
        pub fail_blur: bool,
        pub fail_encode: bool,
        pub fail_lossless: bool,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Decode(usize),
        Encode {
            format: OutputFormat,
            quality: u32,
            width: u32,
            height: u32,
        },
        EncodeLossless,
        Crop(Rect),
        Resize {
            width: u32,
            height: u32,
        },
        Blur(f32),
    }

    impl MockCodec {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        fn record(&self, op: RecordedOp) {
            self.operations.lock().unwrap().push(op);
        }

        fn injected(what: &str) -> CodecError {
            CodecError::ProcessingFailed(format!("injected {what} failure"))
        }
    }

    impl ImageCodec for MockCodec {
        fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, CodecError> {
            self.record(RecordedOp::Decode(bytes.len()));
            self.inner.decode(bytes)
        }

        fn encode(
            &self,
            image: &DynamicImage,
            format: OutputFormat,
            quality: Quality,
        ) -> Result<Vec<u8>, CodecError> {
            self.record(RecordedOp::Encode {
                format,
                quality: quality.value(),
                width: image.width(),
                height: image.height(),
            });
            if self.fail_encode {
                return Err(Self::injected("encode"));
            }
            self.inner.encode(image, format, quality)
        }

        fn encode_lossless(&self, image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
            self.record(RecordedOp::EncodeLossless);
            if self.fail_lossless {
                return Err(Self::injected("lossless encode"));
            }
            self.inner.encode_lossless(image)
        }

        fn crop(&self, image: &DynamicImage, rect: Rect) -> Result<DynamicImage, CodecError> {
            self.record(RecordedOp::Crop(rect));
            if self.fail_crop {
                return Err(Self::injected("crop"));
            }
            self.inner.crop(image, rect)
        }

        fn resize(
            &self,
            image: &DynamicImage,
            width: u32,
            height: u32,
        ) -> Result<DynamicImage, CodecError> {
            self.record(RecordedOp::Resize { width, height });
            self.inner.resize(image, width, height)
        }

        fn blur(&self, image: &DynamicImage, sigma: f32) -> Result<DynamicImage, CodecError> {
            self.record(RecordedOp::Blur(sigma));
            if self.fail_blur {
                return Err(Self::injected("blur"));
            }
            self.inner.blur(image, sigma)
        }
    }

    #[test]
    fn mock_records_and_fails_blur() {
        let codec = MockCodec {
            fail_blur: true,
            ..MockCodec::new()
        };
        let img = DynamicImage::new_rgb8(8, 8);

        assert!(codec.blur(&img, 2.0).is_err());
        assert_eq!(codec.get_operations(), vec![RecordedOp::Blur(2.0)]);
    }

    #[test]
    fn mock_delegates_crop() {
        let codec = MockCodec::new();
        let img = DynamicImage::new_rgb8(20, 10);
        let rect = Rect {
            x: 5,
            y: 0,
            width: 10,
            height: 10,
        };

        let cropped = codec.crop(&img, rect).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (10, 10));
        assert!(matches!(&codec.get_operations()[0], RecordedOp::Crop(r) if *r == rect));
    }
}
