//! # watchframe
//!
//! Subject-aware framing for watch photographs. Given a photo of a watch on
//! an arbitrary background, watchframe finds where the watch sits, crops a
//! square around it, bounds the size, softens the edges over a blurred copy
//! of itself, and encodes the result for upload. Along the way it samples
//! the dial color for display theming.
//!
//! # Pipeline
//!
//! ```text
//! photo / URL ──► SaliencyEstimator ──► descriptor (offset, dial color)
//!                   (cached by content)        │
//!                                              ▼
//!             ImagePreprocessor: crop ► resize ► blur-composite ► encode
//!                                              │
//!                                              ▼
//!                               upload bytes + descriptor + cache key
//! ```
//!
//! Analysis is plain color statistics: average the frame edges to get the
//! background, box everything that differs from it, and take that box's
//! center. There is no recognition step. Photos that defeat the heuristic
//! (blank frames, undecodable bytes, unreachable URLs) get a centered,
//! neutral descriptor instead of an error.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`saliency`] | `SaliencyEstimator`: pixel analysis, bounded cache, in-flight coalescing, persistence |
//! | [`preprocess`] | `ImagePreprocessor`: crop, resize, blur-composite, encode |
//! | [`imaging`] | Pixel access, framing geometry, and the `ImageCodec` trait with its `image`-crate implementation |
//! | [`fetch`] | `SourceFetcher` trait and the reqwest-backed `HttpFetcher` |
//! | [`prepare`] | Batch driver for the `prepare` command: input discovery, output naming, bounded concurrency |
//! | [`config`] | `watchframe.toml` loading, validation, and merging |
//! | [`types`] | `SaliencyDescriptor` and `DialColor` |
//! | [`output`] | CLI output formatting |
//!
//! # Caching
//!
//! Descriptors are keyed by the SHA-256 of the photo (or a caller-supplied
//! key), held in memory up to a soft cap, and mirrored to a versioned JSON
//! file by a background writer. See [`saliency::cache`].

pub mod config;
pub mod fetch;
pub mod imaging;
pub mod output;
pub mod prepare;
pub mod preprocess;
pub mod saliency;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
