//! Subject saliency estimation with memoization.
//!
//! [`SaliencyEstimator`] is the service object the rest of the crate talks
//! to. It wraps the pure pixel analysis in [`analysis`] with three pieces of
//! state:
//!
//! - a bounded [`DescriptorCache`] behind a mutex, held only for map
//!   operations (pixel scanning happens outside the lock);
//! - an in-flight registry mapping each key currently being computed to a
//!   shared `OnceCell`, so concurrent callers for the same key await one
//!   computation (and one fetch) instead of racing;
//! - a persistence writer thread that owns the [`DescriptorStore`] and
//!   receives snapshots over a channel. Queued snapshots collapse to the
//!   newest, so a burst of analyses costs one write.
//!
//! [`SaliencyEstimator::clear`] bumps a generation counter; a computation
//! that started before the clear still answers its callers but is not
//! cached or persisted.
//!
//! Nothing here fails observably: undecodable bytes, failed fetches and
//! blank frames all resolve to [`SaliencyDescriptor::neutral`], which is
//! cached like any other result.

pub mod analysis;
pub mod cache;

pub use cache::{
    CacheLimits, CacheStats, DescriptorCache, DescriptorStore, JsonFileStore, NullStore,
    StoreError, fingerprint_bytes, fingerprint_image,
};

use crate::fetch::{NoFetcher, SourceFetcher};
use crate::imaging::{CodecError, ImageCodec, PixelBuffer, RustCodec};
use crate::types::SaliencyDescriptor;
use image::DynamicImage;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::OnceCell;

/// Work for the persistence thread.
enum StoreCommand {
    Save(HashMap<String, SaliencyDescriptor>),
    Clear,
    Flush(Sender<()>),
    Shutdown,
}

type InFlight = HashMap<String, Arc<OnceCell<SaliencyDescriptor>>>;

/// Memoizing saliency service. Share it behind an `Arc`.
pub struct SaliencyEstimator {
    cache: Mutex<DescriptorCache>,
    in_flight: Mutex<InFlight>,
    fetcher: Box<dyn SourceFetcher>,
    codec: RustCodec,
    writer: Sender<StoreCommand>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by every `clear()`.
    generation: AtomicU64,
    hits: AtomicU64,
    computations: AtomicU64,
    fallbacks: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SaliencyEstimator {
    /// Load whatever `store` holds, then hand the store to a background
    /// writer thread.
    pub fn new(
        store: impl DescriptorStore + 'static,
        fetcher: impl SourceFetcher + 'static,
        limits: CacheLimits,
    ) -> Self {
        let loaded = store.load();
        if !loaded.is_empty() {
            tracing::debug!(entries = loaded.len(), "loaded saliency cache");
        }
        let cache = DescriptorCache::from_entries(loaded, limits);
        let (writer, commands) = mpsc::channel();
        let handle = std::thread::spawn(move || run_writer(Box::new(store), commands));

        Self {
            cache: Mutex::new(cache),
            in_flight: Mutex::new(HashMap::new()),
            fetcher: Box::new(fetcher),
            codec: RustCodec::new(),
            writer,
            writer_handle: Mutex::new(Some(handle)),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// No persistence, no fetching, default limits.
    pub fn in_memory() -> Self {
        Self::new(NullStore, NoFetcher, CacheLimits::default())
    }

    /// Descriptor for a decoded pixel buffer, computed at most once per key.
    pub async fn analyze(&self, buffer: &PixelBuffer<'_>, key: &str) -> SaliencyDescriptor {
        self.resolve(key, || async move { self.compute(buffer) }).await
    }

    /// Convenience for callers holding a decoded image.
    pub async fn analyze_image(&self, image: &DynamicImage, key: &str) -> SaliencyDescriptor {
        self.analyze(&PixelBuffer::from_image(image), key).await
    }

    /// Fetch `locator`, decode, and analyze. Fetch or decode failure caches
    /// and returns the neutral descriptor.
    pub async fn analyze_from_source(&self, locator: &str, key: &str) -> SaliencyDescriptor {
        self.resolve(key, || async move {
            match self.fetcher.fetch(locator).await {
                Ok(bytes) => self.decode_and_compute(bytes, key).await,
                Err(e) => {
                    tracing::warn!(locator = %locator, key = %key, error = %e, "fetch failed; using neutral framing");
                    self.fallback()
                }
            }
        })
        .await
    }

    /// Decode raw bytes and analyze. Without a key, the SHA-256 of the bytes
    /// is used.
    pub async fn analyze_bytes(&self, bytes: &[u8], key: Option<&str>) -> SaliencyDescriptor {
        let key = match key {
            Some(k) => k.to_string(),
            None => fingerprint_bytes(bytes),
        };
        let key = key.as_str();
        self.resolve(key, || async move { self.decode_and_compute(bytes.to_vec(), key).await })
            .await
    }

    /// Drop every cached and in-flight entry and remove the stored copy.
    /// Computations already running finish, but their results are not kept.
    pub fn clear(&self) {
        let mut in_flight = lock(&self.in_flight);
        let mut cache = lock(&self.cache);
        self.generation.fetch_add(1, Ordering::SeqCst);
        in_flight.clear();
        cache.clear();
        self.send(StoreCommand::Clear);
        tracing::debug!("cleared saliency cache");
    }

    pub fn len(&self) -> usize {
        lock(&self.cache).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.cache).is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.cache).contains(key)
    }

    /// Cached descriptor for `key`, without computing anything.
    pub fn get(&self, key: &str) -> Option<SaliencyDescriptor> {
        lock(&self.cache).get(key).cloned()
    }

    /// Number of pixel analyses actually performed.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            computed: self.computations(),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    /// Block until every queued store command has been carried out.
    pub fn flush(&self) {
        let (ack, done) = mpsc::channel();
        if self.writer.send(StoreCommand::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }

    /// Cache lookup, else join or start the in-flight computation for `key`.
    async fn resolve<F, Fut>(&self, key: &str, compute: F) -> SaliencyDescriptor
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SaliencyDescriptor>,
    {
        let (cell, generation) = {
            // Lock order: in_flight, then cache. An entry leaves the
            // registry only after its result is cached, so checking the
            // cache under the registry lock cannot miss a finished result.
            let mut in_flight = lock(&self.in_flight);
            let generation = self.generation.load(Ordering::SeqCst);
            if let Some(hit) = lock(&self.cache).get(key).cloned() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "saliency cache hit");
                return hit;
            }
            let cell = in_flight.entry(key.to_string()).or_default().clone();
            (cell, generation)
        };

        let descriptor = cell
            .get_or_init(|| async move {
                let descriptor = compute().await;
                self.remember(key, &descriptor, generation);
                descriptor
            })
            .await
            .clone();

        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            in_flight.remove(key);
        }
        descriptor
    }

    fn compute(&self, buffer: &PixelBuffer<'_>) -> SaliencyDescriptor {
        self.computations.fetch_add(1, Ordering::Relaxed);
        analysis::analyze_pixels(buffer)
    }

    /// Decode on the blocking pool, then analyze.
    async fn decode_and_compute(&self, bytes: Vec<u8>, key: &str) -> SaliencyDescriptor {
        let codec = self.codec;
        let decoded = match tokio::task::spawn_blocking(move || codec.decode(&bytes)).await {
            Ok(decoded) => decoded,
            Err(e) => Err(CodecError::ProcessingFailed(format!(
                "decode worker failed: {e}"
            ))),
        };
        match decoded {
            Ok(image) => self.compute(&PixelBuffer::from_image(&image)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable photo; using neutral framing");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> SaliencyDescriptor {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        SaliencyDescriptor::neutral()
    }

    fn remember(&self, key: &str, descriptor: &SaliencyDescriptor, generation: u64) {
        let mut cache = lock(&self.cache);
        // clear() bumps the generation under this lock
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(key = %key, "cache cleared during analysis; result not kept");
            return;
        }
        let evicted = cache.insert(key.to_string(), descriptor.clone());
        if evicted > 0 {
            tracing::debug!(evicted, retained = cache.len(), "pruned saliency cache");
        }
        tracing::debug!(
            key = %key,
            offset_x = descriptor.offset_x,
            offset_y = descriptor.offset_y,
            "cached saliency descriptor"
        );
        // Sent under the cache lock so snapshots reach the writer in order
        self.send(StoreCommand::Save(cache.entries().clone()));
    }

    fn send(&self, command: StoreCommand) {
        if self.writer.send(command).is_err() {
            tracing::warn!("saliency cache writer has stopped; result not persisted");
        }
    }
}

impl Drop for SaliencyEstimator {
    fn drop(&mut self) {
        let _ = self.writer.send(StoreCommand::Shutdown);
        if let Some(handle) = lock(&self.writer_handle).take() {
            let _ = handle.join();
        }
    }
}

/// Persistence loop. Consecutive queued saves collapse into the newest.
fn run_writer(store: Box<dyn DescriptorStore>, commands: Receiver<StoreCommand>) {
    let mut next = commands.recv().ok();
    while let Some(command) = next.take() {
        match command {
            StoreCommand::Save(mut snapshot) => {
                loop {
                    match commands.try_recv() {
                        Ok(StoreCommand::Save(newer)) => snapshot = newer,
                        Ok(other) => {
                            next = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                if let Err(e) = store.save(&snapshot) {
                    tracing::warn!(error = %e, "failed to persist saliency cache");
                }
            }
            StoreCommand::Clear => {
                if let Err(e) = store.clear() {
                    tracing::warn!(error = %e, "failed to remove persisted saliency cache");
                }
            }
            StoreCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            StoreCommand::Shutdown => return,
        }
        if next.is_none() {
            next = commands.recv().ok();
        }
    }
}
