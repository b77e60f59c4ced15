//! Configuration module.
//!
//! Handles loading, validating, and merging `watchframe.toml`. Stock
//! defaults are the base layer; a user file overrides just the keys it
//! names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [cache]
//! path = ".watchframe-cache"  # Directory holding saliency-cache.json
//! max_size = 500              # Prune when the cache grows past this
//! retained_size = 300         # Entries kept after pruning
//!
//! [output]
//! max_dimension = 1024        # Longer edge bound (never upscales)
//! coverage = 0.9              # Crop square side / shorter edge
//! inset_ratio = 0.08          # Sharp copy inset / shorter edge
//! blur_background = true
//! blur_sigma = 8.0
//! quality = 82                # Lossy quality (1-100)
//! format = "jpeg"             # "jpeg" or "avif"
//! skip_existing = false       # Leave already prepared outputs alone
//!
//! [fetch]
//! timeout_secs = 20
//! retries = 1                 # Extra attempts after a failed download
//! user_agent = "watchframe/<version>"
//!
//! [processing]
//! max_processes = 4           # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::OutputFormat;
use crate::saliency::CacheLimits;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "watchframe.toml";

/// Backoff doubles per retry, so more than this is never useful.
pub const MAX_FETCH_RETRIES: u32 = 8;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `watchframe.toml`.
///
/// All fields have defaults; a user file need only specify overrides.
/// Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchframeConfig {
    /// Saliency cache location and bounds.
    pub cache: CacheConfig,
    /// Framing, softening and encoding of upload images.
    pub output: OutputConfig,
    /// Remote photo fetching.
    pub fetch: FetchConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl WatchframeConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let out = &self.output;
        if !(out.coverage > 0.0 && out.coverage <= 1.0) {
            return Err(ConfigError::Validation(
                "output.coverage must be in (0, 1]".into(),
            ));
        }
        if !(out.inset_ratio >= 0.0 && out.inset_ratio < 0.5) {
            return Err(ConfigError::Validation(
                "output.inset_ratio must be in [0, 0.5)".into(),
            ));
        }
        if !(1..=100).contains(&out.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        if out.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "output.max_dimension must be non-zero".into(),
            ));
        }
        if !(out.blur_sigma.is_finite() && out.blur_sigma > 0.0) {
            return Err(ConfigError::Validation(
                "output.blur_sigma must be positive".into(),
            ));
        }
        let cache = &self.cache;
        if cache.retained_size == 0 || cache.retained_size > cache.max_size {
            return Err(ConfigError::Validation(
                "cache.retained_size must be between 1 and cache.max_size".into(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "fetch.timeout_secs must be non-zero".into(),
            ));
        }
        if self.fetch.retries > MAX_FETCH_RETRIES {
            return Err(ConfigError::Validation(format!(
                "fetch.retries must be at most {MAX_FETCH_RETRIES}"
            )));
        }
        Ok(())
    }
}

/// Saliency cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding the cache file.
    pub path: String,
    /// Soft cap on cached descriptors.
    pub max_size: usize,
    /// Descriptors kept when the cap is exceeded.
    pub retained_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let limits = CacheLimits::default();
        Self {
            path: ".watchframe-cache".to_string(),
            max_size: limits.max_size,
            retained_size: limits.retained_size,
        }
    }
}

impl CacheConfig {
    pub fn limits(&self) -> CacheLimits {
        CacheLimits {
            max_size: self.max_size,
            retained_size: self.retained_size,
        }
    }
}

/// Upload image settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Bound on the longer edge. Smaller images are not upscaled.
    pub max_dimension: u32,
    /// Crop square side as a fraction of the shorter edge.
    pub coverage: f64,
    /// Inset of the sharp copy over the blurred backdrop, as a fraction of
    /// the shorter edge.
    pub inset_ratio: f64,
    /// Composite over a blurred copy of itself.
    pub blur_background: bool,
    /// Backdrop gaussian sigma in pixels.
    pub blur_sigma: f32,
    /// Lossy encoding quality (1 = worst, 100 = best).
    pub quality: u32,
    /// Upload encoding.
    pub format: OutputFormat,
    /// Keep output files that already exist instead of preparing them again.
    pub skip_existing: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            coverage: 0.9,
            inset_ratio: 0.08,
            blur_background: true,
            blur_sigma: 8.0,
            quality: 82,
            format: OutputFormat::Jpeg,
            skip_existing: false,
        }
    }
}

/// Remote fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    /// Whole-request timeout.
    pub timeout_secs: u64,
    /// `User-Agent` header sent with requests.
    pub user_agent: String,
    /// Extra attempts after a failed download. 403 and 404 are never retried.
    pub retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            user_agent: concat!("watchframe/", env!("CARGO_PKG_VERSION")).to_string(),
            retries: 1,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of photos prepared at once.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(WatchframeConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<WatchframeConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: WatchframeConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<WatchframeConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `watchframe.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# watchframe configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Saliency cache
# ---------------------------------------------------------------------------
[cache]
# Directory holding saliency-cache.json. Overridden by --cache.
path = ".watchframe-cache"

# Once the cache holds more than max_size descriptors it is pruned down to
# the retained_size most recently computed ones.
max_size = 500
retained_size = 300

# ---------------------------------------------------------------------------
# Upload images
# ---------------------------------------------------------------------------
[output]
# Bound on the longer edge in pixels. Smaller images are never upscaled.
max_dimension = 1024

# Side of the square crop as a fraction of the shorter edge, centered on the
# detected subject.
coverage = 0.9

# The sharp image is laid over a blurred copy of itself, inset on every side
# by this fraction of the shorter edge.
inset_ratio = 0.08
blur_background = true
blur_sigma = 8.0

# Lossy encoding quality (1 = worst, 100 = best).
quality = 82

# "jpeg" or "avif".
format = "jpeg"

# Leave output files that already exist untouched instead of preparing them
# again. Overridden by --skip-existing.
skip_existing = false

# ---------------------------------------------------------------------------
# Remote photos
# ---------------------------------------------------------------------------
[fetch]
# Whole-request timeout in seconds.
timeout_secs = 20

# Extra attempts after a failed download, waiting 0.5s, 1s, 2s, ... between
# them. Forbidden (403) and missing (404) photos are not retried.
retries = 1

# User-Agent header. Defaults to watchframe/<version>.
# user_agent = "watchframe"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum photos prepared in parallel.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
