//! # Chunk Cache
//!
//! Client-side working set of decoded surfaces, light maps and column heights.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────┐
//!                 │            ChunkCache            │
//!                 │                                  │
//!   get_pair ───▶ │  surfaces ─┐  (lock 1)           │
//!                 │  lights  ──┘  (lock 2)           │ ──▶ ChunkStore
//!   height   ───▶ │  heights      (own lock)         │     (read-through,
//!                 │                                  │      write-through)
//!                 └────────────────┬─────────────────┘
//!                                  │
//!                        pruner thread: cleanup()
//! ```
//!
//! Each cache has its own lock. Surface and light always travel as a pair:
//! paired operations take the surface lock first, then the light lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::RecencyCache;
use crate::codec::CompressedData;
use crate::coords::{ChunkCoord, CoarseHeight, ColumnCoord};
use crate::error::{StreamError, StreamResult};
use crate::light::LightData;
use crate::storage::{ChunkStore, DataKind};
use crate::surface::SurfaceData;

/// Capacities of the three caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkCacheConfig {
    /// Maximum decoded surfaces kept after a cleanup.
    pub surface_capacity: usize,
    /// Maximum decoded light maps kept after a cleanup.
    pub light_capacity: usize,
    /// Maximum column heights kept after a cleanup.
    pub height_capacity: usize,
}

impl ChunkCacheConfig {
    /// Heights are tiny; by default the height cache is this many times larger.
    pub const HEIGHT_MULTIPLIER: usize = 8;

    /// Config with surface and light capacity `n` and height capacity `8n`.
    #[must_use]
    pub const fn with_capacity(n: usize) -> Self {
        Self {
            surface_capacity: n,
            light_capacity: n,
            height_capacity: n * Self::HEIGHT_MULTIPLIER,
        }
    }
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self::with_capacity(4096)
    }
}

/// Snapshot of cache occupancy and hit rates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkCacheStats {
    /// Cached surfaces.
    pub surfaces: usize,
    /// Cached light maps.
    pub lights: usize,
    /// Cached heights.
    pub heights: usize,
    /// Pair lookups served from memory.
    pub hits: u64,
    /// Pair lookups that went to the store or found nothing.
    pub misses: u64,
    /// Entries dropped by cleanup passes.
    pub evictions: u64,
}

/// Decoded surface and light of one chunk.
pub type SurfacePair = (Arc<SurfaceData>, Arc<LightData>);

/// Thread-safe client chunk cache.
pub struct ChunkCache {
    config: ChunkCacheConfig,
    surfaces: Mutex<RecencyCache<ChunkCoord, Arc<SurfaceData>>>,
    lights: Mutex<RecencyCache<ChunkCoord, Arc<LightData>>>,
    heights: Mutex<RecencyCache<ColumnCoord, CoarseHeight>>,
    store: Option<Arc<dyn ChunkStore>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ChunkCache {
    /// Creates a memory-only cache.
    #[must_use]
    pub fn new(config: ChunkCacheConfig) -> Self {
        Self {
            config,
            surfaces: Mutex::new(RecencyCache::new()),
            lights: Mutex::new(RecencyCache::new()),
            heights: Mutex::new(RecencyCache::new()),
            store: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache backed by a persistent store.
    #[must_use]
    pub fn with_store(config: ChunkCacheConfig, store: Arc<dyn ChunkStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(config)
        }
    }

    /// Configured capacities.
    #[must_use]
    pub const fn config(&self) -> ChunkCacheConfig {
        self.config
    }

    /// Returns the decoded surface and light of `pos`, reading through to the
    /// store on a miss. `Ok(None)` means the chunk is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data is corrupt or misaligned; the stored
    /// pair is then unusable and must be fetched again.
    pub fn get_pair(&self, pos: ChunkCoord) -> StreamResult<Option<SurfacePair>> {
        {
            let mut surfaces = self.surfaces.lock();
            let mut lights = self.lights.lock();
            if let (Some(surface), Some(light)) = (surfaces.get(&pos).cloned(), lights.get(&pos).cloned()) {
                surfaces.touch(&pos);
                lights.touch(&pos);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some((surface, light)));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let Some(store) = &self.store else {
            return Ok(None);
        };
        if !store.is_available(DataKind::Surface, pos) || !store.is_available(DataKind::Light, pos) {
            return Ok(None);
        }
        let surface = store.retrieve(DataKind::Surface, pos)?.to_surface()?;
        let light = store.retrieve(DataKind::Light, pos)?.to_light()?;
        light.validate(pos, &surface)?;
        tracing::trace!("Loaded chunk {} from store", pos);
        Ok(Some(self.insert_pair(pos, surface, light)))
    }

    /// Returns true if both halves of the pair are cached in memory.
    #[must_use]
    pub fn contains_pair(&self, pos: ChunkCoord) -> bool {
        let surfaces = self.surfaces.lock();
        let lights = self.lights.lock();
        surfaces.contains(&pos) && lights.contains(&pos)
    }

    /// Decodes a received pair, checks alignment, caches it and writes it
    /// through to the store.
    ///
    /// # Errors
    ///
    /// Decode or [`StreamError::LightMismatch`] errors; any previously cached
    /// data for `pos` is dropped in that case.
    pub fn store_pair(
        &self,
        pos: ChunkCoord,
        surface: &CompressedData,
        light: &CompressedData,
    ) -> StreamResult<SurfacePair> {
        let decoded = surface
            .to_surface()
            .and_then(|s| light.to_light().map(|l| (s, l)))
            .and_then(|(s, l)| l.validate(pos, &s).map(|()| (s, l)));
        let (surface_data, light_data) = match decoded {
            Ok(pair) => pair,
            Err(e) => {
                self.invalidate(pos);
                return Err(e);
            }
        };

        if let Some(store) = &self.store {
            store.store(DataKind::Surface, pos, surface)?;
            store.store(DataKind::Light, pos, light)?;
        }
        Ok(self.insert_pair(pos, surface_data, light_data))
    }

    fn insert_pair(&self, pos: ChunkCoord, surface: SurfaceData, light: LightData) -> SurfacePair {
        let surface = Arc::new(surface);
        let light = Arc::new(light);
        let mut surfaces = self.surfaces.lock();
        let mut lights = self.lights.lock();
        surfaces.set(pos, Arc::clone(&surface));
        lights.set(pos, Arc::clone(&light));
        (surface, light)
    }

    /// Drops the cached pair of `pos` (memory only).
    pub fn invalidate(&self, pos: ChunkCoord) {
        let mut surfaces = self.surfaces.lock();
        let mut lights = self.lights.lock();
        surfaces.remove(&pos);
        lights.remove(&pos);
    }

    /// Coarse height of `col`, reading through to the store.
    /// Returns [`CoarseHeight::UNDEFINED`] when unknown.
    #[must_use]
    pub fn height(&self, col: ColumnCoord) -> CoarseHeight {
        if let Some(height) = self.heights.lock().get(&col).copied() {
            return height;
        }
        let Some(store) = &self.store else {
            return CoarseHeight::UNDEFINED;
        };
        match store.retrieve_height(col) {
            Ok(height) => {
                self.heights.lock().set(col, height);
                height
            }
            Err(StreamError::MissingHeight(_)) => CoarseHeight::UNDEFINED,
            Err(e) => {
                tracing::warn!("Failed to load height of column {}: {}", col, e);
                CoarseHeight::UNDEFINED
            }
        }
    }

    /// Records a new height. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write-through to the store fails; the
    /// in-memory value is updated regardless.
    pub fn set_height(&self, col: ColumnCoord, height: CoarseHeight) -> StreamResult<CoarseHeight> {
        let old = self.heights.lock().set(col, height).unwrap_or(CoarseHeight::UNDEFINED);
        if let Some(store) = &self.store {
            store.store_height(col, height)?;
        }
        Ok(old)
    }

    /// Prunes every cache back to its capacity.
    /// Returns the number of evicted entries.
    pub fn cleanup(&self) -> usize {
        let mut evicted = 0;
        {
            let mut surfaces = self.surfaces.lock();
            let before = surfaces.len();
            surfaces.prune(self.config.surface_capacity);
            evicted += before - surfaces.len();
        }
        {
            let mut lights = self.lights.lock();
            let before = lights.len();
            lights.prune(self.config.light_capacity);
            evicted += before - lights.len();
        }
        {
            let mut heights = self.heights.lock();
            let before = heights.len();
            heights.prune(self.config.height_capacity);
            evicted += before - heights.len();
        }
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!("Chunk cache cleanup evicted {} entries", evicted);
        }
        evicted
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ChunkCacheStats {
        ChunkCacheStats {
            surfaces: self.surfaces.lock().len(),
            lights: self.lights.lock().len(),
            heights: self.heights.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Starts a background thread calling [`ChunkCache::cleanup`] every
    /// `interval`. The thread stops when the handle is stopped or dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned.
    pub fn spawn_pruner(self: &Arc<Self>, interval: Duration) -> StreamResult<PrunerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let cache = Arc::clone(self);
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("chunk-cache-pruner".into())
            .spawn(move || {
                let tick = interval.min(Duration::from_millis(50)).max(Duration::from_millis(1));
                let mut waited = Duration::ZERO;
                while !flag.load(Ordering::Acquire) {
                    std::thread::sleep(tick);
                    waited += tick;
                    if waited >= interval {
                        waited = Duration::ZERO;
                        cache.cleanup();
                    }
                }
            })?;
        Ok(PrunerHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Handle of the background pruning thread.
pub struct PrunerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PrunerHandle {
    /// Stops the thread and waits for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PrunerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::VoxelPos;
    use crate::light::{LightMap, UniformLight};
    use crate::material::MaterialId;
    use crate::storage::MemoryStore;
    use crate::surface::{FaceRecord, Surface};

    fn payload(faces: usize) -> (CompressedData, CompressedData) {
        let records = (0..faces)
            .map(|i| FaceRecord::new(VoxelPos::from_index(i), 0b1, MaterialId(1)))
            .collect::<Vec<_>>();
        let surface = SurfaceData {
            opaque: Surface::from(records),
            transparent: Surface::new(),
        };
        let light = LightData {
            opaque: UniformLight::default().map_for(&surface.opaque),
            transparent: LightMap::default(),
            phase: 0,
        };
        (CompressedData::from_surface(&surface), CompressedData::from_light(&light))
    }

    #[test]
    fn test_store_and_get_pair() {
        let cache = ChunkCache::new(ChunkCacheConfig::with_capacity(4));
        let pos = ChunkCoord::new(1, 1, 1);
        assert!(cache.get_pair(pos).expect("lookup").is_none());

        let (s, l) = payload(3);
        let (surface, light) = cache.store_pair(pos, &s, &l).expect("store");
        assert_eq!(surface.opaque.len(), 3);
        assert_eq!(light.opaque.len(), 3);
        assert!(cache.contains_pair(pos));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 1));
        assert!(cache.get_pair(pos).expect("lookup").is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_mismatched_pair_is_rejected_and_dropped() {
        let cache = ChunkCache::new(ChunkCacheConfig::default());
        let pos = ChunkCoord::new(0, 0, 0);
        let (s, l) = payload(2);
        cache.store_pair(pos, &s, &l).expect("store");

        let (s3, _) = payload(3);
        let err = cache.store_pair(pos, &s3, &l).unwrap_err();
        assert!(matches!(err, StreamError::LightMismatch { expected: 3, actual: 2, .. }));
        assert!(!cache.contains_pair(pos));
    }

    #[test]
    fn test_read_through_store() {
        let store = Arc::new(MemoryStore::new());
        let pos = ChunkCoord::new(5, 0, 2);
        {
            let cache = ChunkCache::with_store(ChunkCacheConfig::default(), store.clone());
            let (s, l) = payload(1);
            cache.store_pair(pos, &s, &l).expect("store");
            cache.set_height(pos.column(), CoarseHeight::new(3)).expect("height");
        }
        let cache = ChunkCache::with_store(ChunkCacheConfig::default(), store);
        assert!(!cache.contains_pair(pos));
        let (surface, _) = cache.get_pair(pos).expect("lookup").expect("stored");
        assert_eq!(surface.opaque.len(), 1);
        assert!(cache.contains_pair(pos));
        assert_eq!(cache.height(pos.column()), CoarseHeight::new(3));
    }

    #[test]
    fn test_cleanup_respects_capacities() {
        let cache = ChunkCache::new(ChunkCacheConfig::with_capacity(2));
        assert_eq!(cache.config().height_capacity, 16);
        let (s, l) = payload(1);
        for x in 0..5 {
            cache.store_pair(ChunkCoord::new(x, 0, 0), &s, &l).expect("store");
        }
        for x in 0..20 {
            cache.set_height(ColumnCoord::new(x, 0), CoarseHeight::new(1)).expect("height");
        }
        // Touch an old chunk so it survives.
        cache.get_pair(ChunkCoord::new(0, 0, 0)).expect("lookup");

        let evicted = cache.cleanup();
        assert_eq!(evicted, 3 + 3 + 4);
        let stats = cache.stats();
        assert_eq!((stats.surfaces, stats.lights, stats.heights), (2, 2, 16));
        assert!(cache.contains_pair(ChunkCoord::new(0, 0, 0)));
        assert!(cache.contains_pair(ChunkCoord::new(4, 0, 0)));
        assert_eq!(cache.height(ColumnCoord::new(0, 0)), CoarseHeight::UNDEFINED);
        assert_eq!(cache.height(ColumnCoord::new(19, 0)), CoarseHeight::new(1));
    }

    #[test]
    fn test_pruner_thread() {
        let cache = Arc::new(ChunkCache::new(ChunkCacheConfig::with_capacity(1)));
        let (s, l) = payload(1);
        for x in 0..3 {
            cache.store_pair(ChunkCoord::new(x, 0, 0), &s, &l).expect("store");
        }
        let pruner = cache.spawn_pruner(Duration::from_millis(5)).expect("spawn");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.stats().surfaces > 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        pruner.stop();
        assert_eq!(cache.stats().surfaces, 1);
    }
}
