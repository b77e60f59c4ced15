//! Upload preparation: frame, bound, soften, encode.
//!
//! [`ImagePreprocessor::process`] turns an arbitrary watch photo into the
//! image that gets uploaded:
//!
//! ```text
//! image ──► key (given, PNG fingerprint, or SHA-256 of the input bytes)
//!       ──► descriptor (SaliencyEstimator, cached)
//!       ──► square crop around the subject       (failure: full image)
//!       ──► fit inside max_dimension, no upscale
//!       ──► blurred backdrop + inset sharp copy  (failure: unblurred)
//!       ──► lossy encode                         (failure: None)
//! ```
//!
//! Only the encode step can fail the whole call; every other stage degrades
//! to the next-simplest image and logs a warning. Decoding, fingerprinting
//! and the pixel stages run on tokio's blocking pool.

use crate::config::OutputConfig;
use crate::imaging::{
    CodecError, ImageCodec, OutputFormat, Quality, RustCodec, crop_square, fit_within, inset_rect,
};
use crate::saliency::{SaliencyEstimator, fingerprint_bytes, fingerprint_image};
use crate::types::SaliencyDescriptor;
use image::DynamicImage;
use image::imageops;
use std::sync::Arc;

/// Framing and encoding knobs. Defaults match the stock config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessOptions {
    /// Fraction of the shorter edge covered by the square crop.
    pub coverage: f64,
    /// Inset of the sharp copy, as a fraction of the shorter output edge.
    pub inset_ratio: f64,
    /// Gaussian sigma for the backdrop.
    pub blur_sigma: f32,
    pub quality: Quality,
    pub format: OutputFormat,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            coverage: 0.9,
            inset_ratio: 0.08,
            blur_sigma: 8.0,
            quality: Quality::default(),
            format: OutputFormat::default(),
        }
    }
}

impl PreprocessOptions {
    pub fn from_config(config: &OutputConfig) -> Self {
        Self {
            coverage: config.coverage,
            inset_ratio: config.inset_ratio,
            blur_sigma: config.blur_sigma,
            quality: Quality::new(config.quality),
            format: config.format,
        }
    }
}

/// Result of a successful [`ImagePreprocessor::process`].
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// Encoded bytes ready for upload.
    pub upload_bytes: Vec<u8>,
    /// The image that was encoded.
    pub display_image: DynamicImage,
    pub descriptor: SaliencyDescriptor,
    pub cache_key: String,
    pub format: OutputFormat,
}

impl ProcessedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.display_image.width(), self.display_image.height())
    }
}

/// Saliency-aware upload pipeline.
pub struct ImagePreprocessor {
    estimator: Arc<SaliencyEstimator>,
    codec: Arc<dyn ImageCodec>,
    options: PreprocessOptions,
}

impl ImagePreprocessor {
    pub fn new(
        estimator: Arc<SaliencyEstimator>,
        codec: Arc<dyn ImageCodec>,
        options: PreprocessOptions,
    ) -> Self {
        Self {
            estimator,
            codec,
            options,
        }
    }

    /// Production codec, default options.
    pub fn with_estimator(estimator: Arc<SaliencyEstimator>) -> Self {
        Self::new(estimator, Arc::new(RustCodec::new()), PreprocessOptions::default())
    }

    pub fn estimator(&self) -> &Arc<SaliencyEstimator> {
        &self.estimator
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    /// Frame, bound, optionally soften, and encode `image`.
    ///
    /// Without a `cache_key`, the image is keyed by its PNG fingerprint.
    /// Returns `None` only when the final encode fails.
    pub async fn process(
        &self,
        image: &DynamicImage,
        max_dimension: u32,
        blur_background: bool,
        cache_key: Option<&str>,
    ) -> Option<ProcessedImage> {
        let image = image.clone();
        let (image, cache_key) = match cache_key {
            Some(key) => (image, key.to_string()),
            None => {
                let codec = self.codec.clone();
                off_runtime("fingerprint", move || {
                    let key = fingerprint_image(codec.as_ref(), &image);
                    (image, key)
                })
                .await?
            }
        };
        self.run(image, cache_key, max_dimension, blur_background)
            .await
    }

    /// Decode `bytes`, then run the same pipeline as
    /// [`process`](Self::process). Without a `cache_key`, the SHA-256 of the
    /// bytes is the key, matching [`SaliencyEstimator::analyze_bytes`].
    /// Undecodable input yields `None`.
    pub async fn process_bytes(
        &self,
        bytes: &[u8],
        max_dimension: u32,
        blur_background: bool,
        cache_key: Option<&str>,
    ) -> Option<ProcessedImage> {
        let codec = self.codec.clone();
        let given = cache_key.map(str::to_string);
        let bytes = bytes.to_vec();
        let (cache_key, decoded) = off_runtime("decode", move || {
            let key = given.unwrap_or_else(|| fingerprint_bytes(&bytes));
            let decoded = codec.decode(&bytes);
            (key, decoded)
        })
        .await?;

        let image = match decoded {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e, "cannot decode photo");
                return None;
            }
        };
        self.run(image, cache_key, max_dimension, blur_background)
            .await
    }

    /// Analyze on the caller's task, then hand the pixel stages to the
    /// blocking pool.
    async fn run(
        &self,
        image: DynamicImage,
        cache_key: String,
        max_dimension: u32,
        blur_background: bool,
    ) -> Option<ProcessedImage> {
        let descriptor = self.estimator.analyze_image(&image, &cache_key).await;

        let stages = Stages {
            codec: self.codec.clone(),
            options: self.options,
            key: cache_key.clone(),
        };
        let framing = descriptor.clone();
        let (display_image, upload_bytes) = off_runtime("render", move || {
            stages.render(image, &framing, max_dimension, blur_background)
        })
        .await??;

        tracing::debug!(
            key = %cache_key,
            width = display_image.width(),
            height = display_image.height(),
            bytes = upload_bytes.len(),
            "prepared upload"
        );
        Some(ProcessedImage {
            upload_bytes,
            display_image,
            descriptor,
            cache_key,
            format: self.options.format,
        })
    }
}

/// Run CPU-bound image work on tokio's blocking pool. A panicked worker is
/// logged and treated like a failed stage.
async fn off_runtime<T, F>(stage: &'static str, work: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(stage, error = %e, "image worker failed");
            None
        }
    }
}

/// The synchronous crop, resize, blur and encode stages for one photo.
struct Stages {
    codec: Arc<dyn ImageCodec>,
    options: PreprocessOptions,
    key: String,
}

impl Stages {
    /// Framed display image and its encoded bytes, or `None` when encoding
    /// fails.
    fn render(
        &self,
        image: DynamicImage,
        descriptor: &SaliencyDescriptor,
        max_dimension: u32,
        blur_background: bool,
    ) -> Option<(DynamicImage, Vec<u8>)> {
        let framed = self.frame(image, descriptor);
        let resized = self.bound(framed, max_dimension);
        let display_image = if blur_background {
            match self.soften(&resized) {
                Ok(softened) => softened,
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "background blur failed; keeping sharp image");
                    resized
                }
            }
        } else {
            resized
        };

        match self
            .codec
            .encode(&display_image, self.options.format, self.options.quality)
        {
            Ok(bytes) => Some((display_image, bytes)),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "encode failed; nothing to upload");
                None
            }
        }
    }

    /// Square crop around the subject, or the untouched image on failure.
    fn frame(&self, image: DynamicImage, descriptor: &SaliencyDescriptor) -> DynamicImage {
        let rect = crop_square(
            (image.width(), image.height()),
            (descriptor.offset_x, descriptor.offset_y),
            self.options.coverage,
        );
        match self.codec.crop(&image, rect) {
            Ok(cropped) => cropped,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "crop failed; using full frame");
                image
            }
        }
    }

    /// Downscale into `max_dimension`; never upscales.
    fn bound(&self, image: DynamicImage, max_dimension: u32) -> DynamicImage {
        let current = (image.width(), image.height());
        let (width, height) = fit_within(current, max_dimension);
        if (width, height) == current {
            return image;
        }
        match self.codec.resize(&image, width, height) {
            Ok(resized) => resized,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "resize failed; keeping framed size");
                image
            }
        }
    }

    /// Blur the whole frame, then lay the sharp image, scaled down, into the
    /// centered inset rectangle. Output keeps the input dimensions.
    fn soften(&self, image: &DynamicImage) -> Result<DynamicImage, CodecError> {
        let backdrop = self.codec.blur(image, self.options.blur_sigma)?;
        let inner = inset_rect((image.width(), image.height()), self.options.inset_ratio);
        let sharp = if (inner.width, inner.height) == (image.width(), image.height()) {
            image.clone()
        } else {
            self.codec.resize(image, inner.width, inner.height)?
        };

        let mut canvas = backdrop.to_rgb8();
        imageops::replace(&mut canvas, &sharp.to_rgb8(), inner.x as i64, inner.y as i64);
        Ok(DynamicImage::ImageRgb8(canvas))
    }
}
