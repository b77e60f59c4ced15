//! Bounded descriptor cache and its durable mirror.
//!
//! Pixel analysis is cheap per image but runs on every upload attempt, and
//! the same photo is typically submitted several times (retries, edits of
//! the surrounding record). This module memoizes descriptors by content so
//! a photo is analyzed once, across restarts.
//!
//! # Design
//!
//! ## Cache keys
//!
//! The cache is **content-addressed**: the key is the SHA-256 of the image's
//! lossless (PNG) encoding, or of the raw fetched bytes. Callers may supply
//! their own key instead (e.g. a catalog image id); the cache does not care
//! where the string came from.
//!
//! ## Bounds
//!
//! [`CacheLimits`] holds a soft cap (`max_size`, 500) and a retain target
//! (`retained_size`, 300). Nothing is evicted until an insert pushes the map
//! past `max_size`; then every entry is sorted by `computed_at` (newest
//! first, ties by key) and only the first `retained_size` survive. Reads do
//! not refresh an entry: this is computation recency, not LRU.
//!
//! ## Storage
//!
//! [`JsonFileStore`] writes the whole map as pretty JSON to
//! `<dir>/saliency-cache.json`, tagged with a format version. A missing,
//! corrupt, or wrong-version file loads as empty; descriptors are
//! deterministic, so losing the file only costs recomputation.

use crate::imaging::ImageCodec;
use crate::types::SaliencyDescriptor;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the cache file within the cache directory.
pub const CACHE_FILENAME: &str = "saliency-cache.json";

/// Version of the cache file format. Bump this to invalidate all existing
/// caches when the format or the analysis changes.
const CACHE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Size policy for [`DescriptorCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Soft cap; exceeding it triggers pruning.
    pub max_size: usize,
    /// Entries kept after pruning.
    pub retained_size: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_size: 500,
            retained_size: 300,
        }
    }
}

/// In-memory key → descriptor map with reactive pruning.
#[derive(Debug, Clone, Default)]
pub struct DescriptorCache {
    entries: HashMap<String, SaliencyDescriptor>,
    limits: CacheLimits,
}

impl DescriptorCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            entries: HashMap::new(),
            limits,
        }
    }

    /// Seed from previously persisted entries, pruning if the stored map is
    /// already over the cap (e.g. the limits were lowered since).
    pub fn from_entries(entries: HashMap<String, SaliencyDescriptor>, limits: CacheLimits) -> Self {
        let mut cache = Self { entries, limits };
        cache.prune();
        cache
    }

    pub fn get(&self, key: &str) -> Option<&SaliencyDescriptor> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    pub fn entries(&self) -> &HashMap<String, SaliencyDescriptor> {
        &self.entries
    }

    /// Store `descriptor` under `key`, replacing any previous entry, then
    /// enforce the size policy. Returns how many entries were evicted.
    pub fn insert(&mut self, key: String, descriptor: SaliencyDescriptor) -> usize {
        self.entries.insert(key, descriptor);
        self.prune()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn prune(&mut self) -> usize {
        if self.entries.len() <= self.limits.max_size {
            return 0;
        }
        let before = self.entries.len();
        let mut ranked: Vec<(String, SaliencyDescriptor)> = self.entries.drain().collect();
        ranked.sort_by(|(ka, a), (kb, b)| {
            b.computed_at
                .cmp(&a.computed_at)
                .then_with(|| ka.cmp(kb))
        });
        ranked.truncate(self.limits.retained_size);
        self.entries = ranked.into_iter().collect();
        before - self.entries.len()
    }
}

/// Durable mirror of the descriptor map.
///
/// The estimator loads once at construction and hands the store to its
/// writer thread, so implementations only need to be `Send`.
pub trait DescriptorStore: Send {
    /// Previously saved entries; empty when nothing usable is stored.
    fn load(&self) -> HashMap<String, SaliencyDescriptor>;

    /// Replace the stored map with `entries`.
    fn save(&self, entries: &HashMap<String, SaliencyDescriptor>) -> Result<(), StoreError>;

    /// Remove the stored copy.
    fn clear(&self) -> Result<(), StoreError>;
}

/// On-disk layout of the cache file.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CacheFile {
    version: u32,
    entries: HashMap<String, SaliencyDescriptor>,
}

/// Versioned JSON file store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/saliency-cache.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CACHE_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DescriptorStore for JsonFileStore {
    fn load(&self) -> HashMap<String, SaliencyDescriptor> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        let file: CacheFile = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable saliency cache");
                return HashMap::new();
            }
        };
        if file.version != CACHE_VERSION {
            tracing::info!(
                path = %self.path.display(),
                found = file.version,
                expected = CACHE_VERSION,
                "discarding saliency cache from another version"
            );
            return HashMap::new();
        }
        file.entries
    }

    fn save(&self, entries: &HashMap<String, SaliencyDescriptor>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = CacheFile {
            version: CACHE_VERSION,
            entries: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl DescriptorStore for NullStore {
    fn load(&self) -> HashMap<String, SaliencyDescriptor> {
        HashMap::new()
    }

    fn save(&self, _entries: &HashMap<String, SaliencyDescriptor>) -> Result<(), StoreError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// SHA-256 of raw bytes, returned as a lowercase hex string.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Content fingerprint of a decoded image.
///
/// Hashes the lossless PNG encoding. If that encoding fails, hashes the raw
/// pixel bytes together with the dimensions and color layout instead, so a
/// key is always produced.
pub fn fingerprint_image(codec: &dyn ImageCodec, image: &DynamicImage) -> String {
    match codec.encode_lossless(image) {
        Ok(png) => fingerprint_bytes(&png),
        Err(e) => {
            tracing::debug!(error = %e, "lossless encode failed; fingerprinting raw pixels");
            let mut hasher = Sha256::new();
            hasher.update(b"raw\0");
            hasher.update(image.width().to_le_bytes());
            hasher.update(image.height().to_le_bytes());
            hasher.update(format!("{:?}", image.color()).as_bytes());
            hasher.update(image.as_bytes());
            format!("{:x}", hasher.finalize())
        }
    }
}

/// Summary of cache behavior for a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub computed: u64,
    pub fallbacks: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.computed + self.fallbacks
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fallbacks > 0 {
            write!(
                f,
                "{} cached, {} analyzed, {} unreadable ({} total)",
                self.hits,
                self.computed,
                self.fallbacks,
                self.total()
            )
        } else if self.hits > 0 {
            write!(
                f,
                "{} cached, {} analyzed ({} total)",
                self.hits,
                self.computed,
                self.total()
            )
        } else {
            write!(f, "{} analyzed", self.computed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::RustCodec;
    use crate::imaging::codec::tests::MockCodec;
    use chrono::{Duration, TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn descriptor_at(seconds: i64) -> SaliencyDescriptor {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        SaliencyDescriptor::new(0.1, -0.1, None).with_computed_at(base + Duration::seconds(seconds))
    }

    // =========================================================================
    // DescriptorCache
    // =========================================================================

    #[test]
    fn insert_replaces_existing_key() {
        let mut cache = DescriptorCache::new(CacheLimits::default());
        cache.insert("k".into(), descriptor_at(1));
        cache.insert("k".into(), descriptor_at(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), Some(&descriptor_at(2)));
    }

    #[test]
    fn no_eviction_at_exactly_max_size() {
        let mut cache = DescriptorCache::new(CacheLimits::default());
        for i in 0..500 {
            assert_eq!(cache.insert(format!("k{i}"), descriptor_at(i)), 0);
        }
        assert_eq!(cache.len(), 500);
    }

    #[test]
    fn overflow_keeps_the_300_most_recent() {
        let mut cache = DescriptorCache::new(CacheLimits::default());
        // Insert out of chronological order so insertion order can't leak in
        let mut order: Vec<i64> = (0..501).collect();
        order.reverse();
        order.swap(0, 250);
        for i in order {
            cache.insert(format!("k{i:03}"), descriptor_at(i));
        }

        assert_eq!(cache.len(), 300);
        for i in 0..501 {
            let expected = i >= 201;
            assert_eq!(cache.contains(&format!("k{i:03}")), expected, "k{i:03}");
        }
    }

    #[test]
    fn eviction_count_reported() {
        let mut cache = DescriptorCache::new(CacheLimits {
            max_size: 3,
            retained_size: 2,
        });
        for i in 0..3 {
            cache.insert(format!("k{i}"), descriptor_at(i));
        }
        assert_eq!(cache.insert("k3".into(), descriptor_at(3)), 2);
        assert!(cache.contains("k3") && cache.contains("k2"));
    }

    #[test]
    fn ties_break_by_key() {
        let mut cache = DescriptorCache::new(CacheLimits {
            max_size: 2,
            retained_size: 1,
        });
        cache.insert("b".into(), descriptor_at(5));
        cache.insert("a".into(), descriptor_at(5));
        cache.insert("c".into(), descriptor_at(5));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("a"));
    }

    #[test]
    fn reads_do_not_refresh_rank() {
        let mut cache = DescriptorCache::new(CacheLimits {
            max_size: 2,
            retained_size: 2,
        });
        cache.insert("old".into(), descriptor_at(0));
        cache.insert("mid".into(), descriptor_at(1));
        for _ in 0..10 {
            assert!(cache.get("old").is_some());
        }
        cache.insert("new".into(), descriptor_at(2));
        assert!(!cache.contains("old"));
    }

    #[test]
    fn from_entries_prunes_oversized_map() {
        let entries: HashMap<_, _> = (0..10).map(|i| (format!("k{i}"), descriptor_at(i))).collect();
        let cache = DescriptorCache::from_entries(
            entries,
            CacheLimits {
                max_size: 5,
                retained_size: 4,
            },
        );
        assert_eq!(cache.len(), 4);
        assert!(cache.contains("k9") && cache.contains("k6"));
    }

    // =========================================================================
    // JsonFileStore
    // =========================================================================

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(tmp.path());
        let mut entries = HashMap::new();
        entries.insert("plain".to_string(), descriptor_at(1));
        entries.insert(
            "colored".to_string(),
            SaliencyDescriptor::new(-0.3, 0.45, Some(crate::types::DialColor::new(0.1, 0.2, 0.3))),
        );

        store.save(&entries).unwrap();
        assert_eq!(store.load(), entries);
    }

    #[test]
    fn save_creates_missing_directories() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(&tmp.path().join("nested/cache"));
        store.save(&HashMap::new()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn load_missing_file_returns_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(JsonFileStore::in_dir(tmp.path()).load().is_empty());
    }

    #[test]
    fn load_corrupt_json_returns_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CACHE_FILENAME), "not json").unwrap();
        assert!(JsonFileStore::in_dir(tmp.path()).load().is_empty());
    }

    #[test]
    fn load_wrong_version_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let json = format!(
            r#"{{"version": {}, "entries": {{"k": {{"offset_x": 0.0, "offset_y": 0.0, "confidence": 1.0, "computed_at": "2026-01-01T00:00:00Z"}}}}}}"#,
            CACHE_VERSION + 1
        );
        fs::write(tmp.path().join(CACHE_FILENAME), json).unwrap();
        assert!(JsonFileStore::in_dir(tmp.path()).load().is_empty());
    }

    #[test]
    fn clear_removes_file_and_tolerates_absence() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::in_dir(tmp.path());
        store.save(&HashMap::new()).unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    // =========================================================================
    // Fingerprints
    // =========================================================================

    #[test]
    fn fingerprint_bytes_is_sha256_hex() {
        assert_eq!(
            fingerprint_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn fingerprint_image_changes_with_content() {
        let codec = RustCodec::new();
        let a = DynamicImage::new_rgb8(10, 10);
        let mut b = a.to_rgb8();
        b.put_pixel(3, 3, image::Rgb([1, 2, 3]));
        let b = DynamicImage::ImageRgb8(b);

        assert_eq!(fingerprint_image(&codec, &a), fingerprint_image(&codec, &a));
        assert_ne!(fingerprint_image(&codec, &a), fingerprint_image(&codec, &b));
    }

    #[test]
    fn fingerprint_falls_back_to_raw_pixels() {
        let codec = MockCodec {
            fail_lossless: true,
            ..MockCodec::new()
        };
        let img = DynamicImage::new_rgb8(4, 4);
        let key = fingerprint_image(&codec, &img);
        assert_eq!(key.len(), 64);
        assert_ne!(key, fingerprint_image(&RustCodec::new(), &img));
    }

    // =========================================================================
    // CacheStats
    // =========================================================================

    #[test]
    fn cache_stats_display_with_hits() {
        let s = CacheStats {
            hits: 5,
            computed: 2,
            fallbacks: 0,
        };
        assert_eq!(format!("{}", s), "5 cached, 2 analyzed (7 total)");
    }

    #[test]
    fn cache_stats_display_with_fallbacks() {
        let s = CacheStats {
            hits: 1,
            computed: 2,
            fallbacks: 1,
        };
        assert_eq!(format!("{}", s), "1 cached, 2 analyzed, 1 unreadable (4 total)");
    }

    #[test]
    fn cache_stats_display_no_hits() {
        let s = CacheStats {
            computed: 3,
            ..CacheStats::default()
        };
        assert_eq!(format!("{}", s), "3 analyzed");
    }
}
