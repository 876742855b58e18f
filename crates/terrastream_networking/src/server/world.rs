//! # Authoritative World
//!
//! Server-side chunk storage, coarse heights and surface versions.
//!
//! ## Consistency
//!
//! Chunks are immutable once shared: an edit clones the chunk, modifies the
//! copy and swaps the `Arc` in under the write lock. Extraction clones the 7
//! `Arc`s it needs under a single read lock, so it always sees one consistent
//! snapshot even while edits land.
//!
//! Edits are serialized by one edit lock, so two edits of the same chunk
//! never start from the same copy.
//!
//! Surface versions come from one world-wide counter and never repeat, even
//! after a chunk's bookkeeping has been evicted. Every edit advances a
//! world-wide edit sequence and stamps the chunks it invalidates. A build
//! reads the sequence before taking its snapshot and only marks its result
//! current if none of those stamps is newer. Stamps of evicted entries are
//! folded into one floor so a missing entry is never mistaken for an
//! unedited one.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use terrastream_core::material::defaults;
use terrastream_core::{
    extract_surface_data, Chunk, ChunkCoord, ChunkStore, CoarseHeight, ColumnCoord, CompressedData, DataKind,
    LightGenerator, MaterialId, MaterialRegistry, Neighborhood, RecencyCache, StreamResult, VoxelPos,
    CHUNK_SIZE,
};

/// Produces terrain for chunks that were never edited.
pub trait TerrainSource: Send + Sync {
    /// Generates the voxels of `pos`.
    fn generate(&self, pos: ChunkCoord) -> Chunk;

    /// Coarse height of a column: one past its topmost non-air chunk.
    fn column_height(&self, col: ColumnCoord) -> CoarseHeight;
}

/// Flat reference terrain: stone below `ground_level`, one layer of grass on top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlatTerrain {
    /// First air voxel level, in world voxels.
    pub ground_level: i32,
}

impl FlatTerrain {
    /// Creates a flat terrain.
    #[must_use]
    pub const fn new(ground_level: i32) -> Self {
        Self { ground_level }
    }
}

impl TerrainSource for FlatTerrain {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn generate(&self, pos: ChunkCoord) -> Chunk {
        let size = CHUNK_SIZE as i32;
        let base = pos.z * size;
        if base >= self.ground_level {
            return Chunk::new(pos);
        }
        if base + size < self.ground_level {
            return Chunk::filled(pos, defaults::STONE);
        }
        let mut chunk = Chunk::new(pos);
        for lz in 0..size {
            let z = base + lz;
            let material = if z == self.ground_level - 1 {
                defaults::GRASS
            } else if z < self.ground_level {
                defaults::STONE
            } else {
                break;
            };
            for ly in 0..CHUNK_SIZE as u8 {
                for lx in 0..CHUNK_SIZE as u8 {
                    chunk.set(VoxelPos::new(lx, ly, lz as u8), material);
                }
            }
        }
        chunk
    }

    fn column_height(&self, _col: ColumnCoord) -> CoarseHeight {
        CoarseHeight::new((self.ground_level - 1).div_euclid(CHUNK_SIZE as i32) + 1)
    }
}

/// Height of a column changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeightChange {
    /// The column.
    pub column: ColumnCoord,
    /// New height.
    pub new: CoarseHeight,
    /// Previous height.
    pub old: CoarseHeight,
}

/// Freshly built or cached surface payloads of one chunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltSurface {
    /// Surface version.
    pub version: u32,
    /// Compressed surface.
    pub surface: CompressedData,
    /// Compressed light.
    pub light: CompressedData,
}

#[derive(Clone, Copy, Debug, Default)]
struct VersionEntry {
    version: u32,
    last_edit: u64,
    current: bool,
}

/// Surface versions and edit stamps.
struct Versions {
    entries: RecencyCache<ChunkCoord, VersionEntry>,
    next_version: u32,
    edit_seq: u64,
    evicted_edit: u64,
}

impl Versions {
    fn new() -> Self {
        Self {
            entries: RecencyCache::new(),
            next_version: 1,
            edit_seq: 0,
            evicted_edit: 0,
        }
    }

    /// Next surface version; wraps and skips 0.
    fn allocate(&mut self) -> u32 {
        let version = self.next_version;
        self.next_version = self.next_version.wrapping_add(1).max(1);
        version
    }

    fn last_edit(&self, pos: ChunkCoord) -> u64 {
        self.entries.get(&pos).map_or(self.evicted_edit, |e| e.last_edit)
    }

    fn prune(&mut self, max: usize) {
        let floor = &mut self.evicted_edit;
        self.entries.prune_with(max, |_, entry| *floor = (*floor).max(entry.last_edit));
    }
}

/// World capacities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldConfig {
    /// Chunks kept in memory before the least recently used are dropped.
    pub chunk_capacity: usize,
    /// Compressed surfaces kept in memory before flushing to the store.
    pub surface_capacity: usize,
    /// Column heights kept in memory; evicted heights reload from the store.
    pub height_capacity: usize,
    /// Chunks whose surface version is remembered. Forgotten chunks get a
    /// fresh version on their next build.
    pub version_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: 16384,
            surface_capacity: 8192,
            height_capacity: 65536,
            version_capacity: 32768,
        }
    }
}

/// The server's authoritative world.
pub struct World {
    config: WorldConfig,
    source: Arc<dyn TerrainSource>,
    lighting: Arc<dyn LightGenerator>,
    materials: Arc<MaterialRegistry>,
    store: Arc<dyn ChunkStore>,
    chunks: RwLock<RecencyCache<ChunkCoord, Arc<Chunk>>>,
    heights: Mutex<RecencyCache<ColumnCoord, CoarseHeight>>,
    versions: Mutex<Versions>,
    surfaces: Mutex<RecencyCache<ChunkCoord, BuiltSurface>>,
    edit_lock: Mutex<()>,
}

impl World {
    /// Creates a world over `source`, persisting into `store`.
    #[must_use]
    pub fn new(
        config: WorldConfig,
        source: Arc<dyn TerrainSource>,
        lighting: Arc<dyn LightGenerator>,
        materials: Arc<MaterialRegistry>,
        store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            config,
            source,
            lighting,
            materials,
            store,
            chunks: RwLock::new(RecencyCache::new()),
            heights: Mutex::new(RecencyCache::new()),
            versions: Mutex::new(Versions::new()),
            surfaces: Mutex::new(RecencyCache::new()),
            edit_lock: Mutex::new(()),
        }
    }

    /// Material registry shared with extraction.
    #[must_use]
    pub fn materials(&self) -> &Arc<MaterialRegistry> {
        &self.materials
    }

    /// Returns the chunk at `pos`, loading edited chunks from the store and
    /// generating the rest.
    ///
    /// # Errors
    ///
    /// Store failures and corrupt voxel payloads.
    pub fn chunk(&self, pos: ChunkCoord) -> StreamResult<Arc<Chunk>> {
        if let Some(chunk) = self.chunks.read().get(&pos) {
            return Ok(Arc::clone(chunk));
        }
        let chunk = if self.store.is_available(DataKind::Voxels, pos) {
            let data = self.store.retrieve(DataKind::Voxels, pos)?;
            Chunk::decompress(pos, &data.0)?
        } else {
            self.source.generate(pos)
        };

        let mut chunks = self.chunks.write();
        // Another worker may have loaded it meanwhile; keep the first copy.
        if let Some(existing) = chunks.get(&pos) {
            return Ok(Arc::clone(existing));
        }
        let chunk = Arc::new(chunk);
        chunks.set(pos, Arc::clone(&chunk));
        Ok(chunk)
    }

    /// Known height of `col`, from memory or the store. Undefined if never computed.
    #[must_use]
    pub fn height(&self, col: ColumnCoord) -> CoarseHeight {
        {
            let mut heights = self.heights.lock();
            if let Some(&h) = heights.get(&col) {
                heights.touch(&col);
                return h;
            }
        }
        match self.store.retrieve_height(col) {
            Ok(h) => {
                self.heights.lock().set(col, h);
                h
            }
            Err(_) => CoarseHeight::UNDEFINED,
        }
    }

    /// Computes and records the height of `col` if it is still undefined.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn compute_height(&self, col: ColumnCoord) -> StreamResult<CoarseHeight> {
        let known = self.height(col);
        if known.is_defined() {
            return Ok(known);
        }
        let height = self.source.column_height(col);
        self.store.store_height(col, height)?;
        self.heights.lock().set(col, height);
        tracing::trace!("Computed height of column {}: {}", col, height);
        Ok(height)
    }

    /// Current surface version of `pos`, or `None` if it must be rebuilt.
    #[must_use]
    pub fn current_version(&self, pos: ChunkCoord) -> Option<u32> {
        self.versions
            .lock()
            .entries
            .get(&pos)
            .filter(|entry| entry.current)
            .map(|entry| entry.version)
    }

    fn cached_surface(&self, pos: ChunkCoord, version: u32) -> Option<BuiltSurface> {
        let mut surfaces = self.surfaces.lock();
        if let Some(built) = surfaces.get(&pos).filter(|b| b.version == version).cloned() {
            surfaces.touch(&pos);
            return Some(built);
        }
        drop(surfaces);

        let surface = self.store.retrieve(DataKind::Surface, pos).ok()?;
        let light = self.store.retrieve(DataKind::Light, pos).ok()?;
        let built = BuiltSurface {
            version,
            surface,
            light,
        };
        self.surfaces.lock().set(pos, built.clone());
        Some(built)
    }

    /// Surface and light of `pos`, rebuilt if an edit made them stale.
    ///
    /// # Errors
    ///
    /// [`StreamError::IncompleteNeighborhood`] if a neighbour was evicted
    /// between loading and snapshotting, plus store failures.
    pub fn build_surface(&self, pos: ChunkCoord) -> StreamResult<BuiltSurface> {
        if let Some(version) = self.current_version(pos) {
            if let Some(built) = self.cached_surface(pos, version) {
                return Ok(built);
            }
        }

        let since = self.versions.lock().edit_seq;

        self.chunk(pos)?;
        for (_, neighbor) in pos.neighbors() {
            self.chunk(neighbor)?;
        }
        let hood = {
            let chunks = self.chunks.read();
            Neighborhood::gather(pos, |p| chunks.get(&p).cloned())?
        };

        let surface = extract_surface_data(&hood, &self.materials);
        let light = self.lighting.generate(&hood, &surface);
        light.validate(pos, &surface)?;

        let mut versions = self.versions.lock();
        let version = versions.allocate();
        let last_edit = versions.last_edit(pos);
        let current = last_edit <= since;
        versions.entries.set(
            pos,
            VersionEntry {
                version,
                last_edit,
                current,
            },
        );
        drop(versions);
        let built = BuiltSurface {
            version,
            surface: CompressedData::from_surface(&surface),
            light: CompressedData::from_light(&light),
        };

        if current {
            self.surfaces.lock().set(pos, built.clone());
        }
        tracing::trace!("Built surface {} v{} ({} bytes)", pos, built.version, built.surface.len());
        Ok(built)
    }

    /// Stamps `pos` and its 6 neighbours with a new edit sequence number.
    fn invalidate_around(&self, pos: ChunkCoord) {
        {
            let mut versions = self.versions.lock();
            versions.edit_seq += 1;
            let seq = versions.edit_seq;
            for p in std::iter::once(pos).chain(pos.neighbors().map(|(_, n)| n)) {
                let version = versions.entries.get(&p).map_or(0, |e| e.version);
                versions.entries.set(
                    p,
                    VersionEntry {
                        version,
                        last_edit: seq,
                        current: false,
                    },
                );
            }
        }
        let mut surfaces = self.surfaces.lock();
        surfaces.remove(&pos);
        for (_, n) in pos.neighbors() {
            surfaces.remove(&n);
        }
    }

    /// Replaces one voxel, given in world voxel coordinates.
    ///
    /// The chunk and its 6 neighbours lose their current surfaces. Returns the
    /// height change if the edit raised the column.
    ///
    /// # Errors
    ///
    /// Store failures.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_voxel(&self, x: i32, y: i32, z: i32, material: MaterialId) -> StreamResult<Option<HeightChange>> {
        let size = CHUNK_SIZE as i32;
        let pos = ChunkCoord::from_voxel(x, y, z);
        let local = VoxelPos::new(x.rem_euclid(size) as u8, y.rem_euclid(size) as u8, z.rem_euclid(size) as u8);

        let _edit = self.edit_lock.lock();
        let mut edited = (*self.chunk(pos)?).clone();
        if edited.set(local, material) == material {
            return Ok(None);
        }
        self.store
            .store(DataKind::Voxels, pos, &CompressedData(edited.compress()))?;
        self.chunks.write().set(pos, Arc::new(edited));

        // Stamps move after the swap so an in-flight build of the old
        // snapshot can never be marked current.
        self.invalidate_around(pos);

        let col = pos.column();
        let old = self.compute_height(col)?;
        if material.is_air() || !old.is_air_chunk(pos) {
            return Ok(None);
        }
        let new = CoarseHeight::new(pos.z + 1);
        self.store.store_height(col, new)?;
        self.heights.lock().set(col, new);
        tracing::debug!("Column {} raised from {} to {}", col, old, new);
        Ok(Some(HeightChange { column: col, new, old }))
    }

    /// Shrinks the in-memory caches to their capacities. Evicted surfaces
    /// are written to the store.
    ///
    /// # Errors
    ///
    /// The first store failure; remaining evictions are still attempted.
    pub fn prune(&self) -> StreamResult<()> {
        let mut result = Ok(());
        let mut evicted = Vec::new();
        self.surfaces
            .lock()
            .prune_with(self.config.surface_capacity, |pos, built| evicted.push((pos, built)));
        for (pos, built) in evicted {
            if let Err(e) = self.persist(pos, &built) {
                tracing::warn!("Failed to persist surface {}: {}", pos, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.chunks.write().prune(self.config.chunk_capacity);
        // Heights are written through to the store when computed.
        self.heights.lock().prune(self.config.height_capacity);
        self.versions.lock().prune(self.config.version_capacity);
        result
    }

    fn persist(&self, pos: ChunkCoord, built: &BuiltSurface) -> StreamResult<()> {
        self.store.store(DataKind::Surface, pos, &built.surface)?;
        self.store.store(DataKind::Light, pos, &built.light)
    }

    /// Writes every cached surface to the store.
    ///
    /// # Errors
    ///
    /// The first store failure.
    pub fn flush(&self) -> StreamResult<usize> {
        let pending: Vec<(ChunkCoord, BuiltSurface)> = {
            let surfaces = self.surfaces.lock();
            surfaces.iter().map(|(pos, built)| (*pos, built.clone())).collect()
        };
        for (pos, built) in &pending {
            self.persist(*pos, built)?;
        }
        tracing::info!("Flushed {} surfaces to the store", pending.len());
        Ok(pending.len())
    }

    /// Number of chunks in memory.
    #[must_use]
    pub fn loaded_chunks(&self) -> usize {
        self.chunks.read().len()
    }

    /// Number of surfaces in memory.
    #[must_use]
    pub fn cached_surfaces(&self) -> usize {
        self.surfaces.lock().len()
    }

    /// Number of column heights in memory.
    #[must_use]
    pub fn cached_heights(&self) -> usize {
        self.heights.lock().len()
    }

    /// Number of chunks with a remembered surface version.
    #[must_use]
    pub fn tracked_versions(&self) -> usize {
        self.versions.lock().entries.len()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("loaded_chunks", &self.loaded_chunks())
            .field("cached_surfaces", &self.cached_surfaces())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream_core::{MemoryStore, UniformLight};

    fn world_with(store: Arc<MemoryStore>, config: WorldConfig) -> World {
        World::new(
            config,
            Arc::new(FlatTerrain::new(40)),
            Arc::new(UniformLight::default()),
            Arc::new(MaterialRegistry::with_defaults()),
            store,
        )
    }

    fn world() -> World {
        world_with(Arc::new(MemoryStore::new()), WorldConfig::default())
    }

    #[test]
    fn test_flat_terrain_layers() {
        let terrain = FlatTerrain::new(40);
        // Voxel levels 32..48: stone up to 38, grass at 39, air above.
        let chunk = terrain.generate(ChunkCoord::new(0, 0, 2));
        assert_eq!(chunk.get(VoxelPos::new(0, 0, 6)), defaults::STONE);
        assert_eq!(chunk.get(VoxelPos::new(3, 4, 7)), defaults::GRASS);
        assert!(chunk.get(VoxelPos::new(0, 0, 8)).is_air());
        assert!(terrain.generate(ChunkCoord::new(0, 0, 3)).is_empty());
        assert_eq!(terrain.column_height(ColumnCoord::new(9, -9)), CoarseHeight::new(3));
        assert_eq!(FlatTerrain::new(32).column_height(ColumnCoord::new(0, 0)), CoarseHeight::new(2));
        assert_eq!(FlatTerrain::new(0).column_height(ColumnCoord::new(0, 0)), CoarseHeight::new(0));
    }

    #[test]
    fn test_height_computed_once() {
        let world = world();
        let col = ColumnCoord::new(1, 1);
        assert!(!world.height(col).is_defined());
        assert_eq!(world.compute_height(col).expect("height"), CoarseHeight::new(3));
        assert_eq!(world.height(col), CoarseHeight::new(3));
    }

    #[test]
    fn test_build_surface_versions() {
        let world = world();
        let pos = ChunkCoord::new(0, 0, 2);
        assert_eq!(world.current_version(pos), None);
        let first = world.build_surface(pos).expect("build");
        assert_eq!(first.version, 1);
        assert!(!first.surface.is_empty());

        // Unchanged chunk: served from the cache at the same version.
        let again = world.build_surface(pos).expect("build");
        assert_eq!(again, first);
        assert_eq!(world.current_version(pos), Some(1));
    }

    #[test]
    fn test_edit_bumps_version_and_height() {
        let world = world();
        let pos = ChunkCoord::new(0, 0, 2);
        let first = world.build_surface(pos).expect("build").version;
        let east = world.build_surface(ChunkCoord::new(1, 0, 2)).expect("build").version;
        assert!(east > first);

        // Digging invalidates the chunk and its neighbours.
        assert!(world.set_voxel(3, 3, 39, MaterialId::AIR).expect("edit").is_none());
        assert_eq!(world.current_version(pos), None);
        assert_eq!(world.current_version(ChunkCoord::new(1, 0, 2)), None);
        assert_eq!(world.build_surface(pos).expect("build").version, east + 1);

        // Building a tower raises the column.
        let change = world
            .set_voxel(3, 3, 70, defaults::STONE)
            .expect("edit")
            .expect("height change");
        assert_eq!(change.column, ColumnCoord::new(0, 0));
        assert_eq!(change.old, CoarseHeight::new(3));
        assert_eq!(change.new, CoarseHeight::new(5));
        assert_eq!(world.height(ColumnCoord::new(0, 0)), CoarseHeight::new(5));

        // Same material again is a no-op.
        assert!(world.set_voxel(3, 3, 70, defaults::STONE).expect("edit").is_none());
    }

    #[test]
    fn test_edits_survive_eviction() {
        let store = Arc::new(MemoryStore::new());
        let config = WorldConfig {
            chunk_capacity: 1,
            surface_capacity: 1,
            ..WorldConfig::default()
        };
        let world = world_with(Arc::clone(&store), config);
        world.set_voxel(0, 0, 100, defaults::GLASS).expect("edit");
        world.build_surface(ChunkCoord::new(0, 0, 2)).expect("build");
        world.build_surface(ChunkCoord::new(5, 0, 2)).expect("build");
        world.prune().expect("prune");
        assert_eq!(world.loaded_chunks(), 1);
        assert_eq!(world.cached_surfaces(), 1);
        assert!(store.is_available(DataKind::Surface, ChunkCoord::new(0, 0, 2)));

        let chunk = world.chunk(ChunkCoord::new(0, 0, 6)).expect("chunk");
        assert_eq!(chunk.get(VoxelPos::new(0, 0, 4)), defaults::GLASS);
    }

    #[test]
    fn test_flush_writes_cached_surfaces() {
        let store = Arc::new(MemoryStore::new());
        let world = world_with(Arc::clone(&store), WorldConfig::default());
        world.build_surface(ChunkCoord::new(0, 0, 2)).expect("build");
        assert_eq!(world.flush().expect("flush"), 1);
        assert!(store.is_available(DataKind::Light, ChunkCoord::new(0, 0, 2)));
    }

    #[test]
    fn test_concurrent_edits_of_one_chunk_all_land() {
        let world = Arc::new(world());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let world = Arc::clone(&world);
                std::thread::spawn(move || {
                    for i in 0..16 {
                        world.set_voxel(i, t, 100, defaults::GLASS).expect("edit");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("editor");
        }

        let chunk = world.chunk(ChunkCoord::new(0, 0, 6)).expect("chunk");
        assert_eq!(chunk.solid_count(), 64);
        let stored = world
            .store
            .retrieve(DataKind::Voxels, ChunkCoord::new(0, 0, 6))
            .expect("stored");
        let reloaded = Chunk::decompress(ChunkCoord::new(0, 0, 6), &stored.0).expect("decode");
        assert_eq!(reloaded.solid_count(), 64);
    }

    #[test]
    fn test_bookkeeping_is_bounded_and_versions_never_repeat() {
        let config = WorldConfig {
            height_capacity: 2,
            version_capacity: 2,
            ..WorldConfig::default()
        };
        let world = world_with(Arc::new(MemoryStore::new()), config);
        let pos = ChunkCoord::new(0, 0, 2);
        let first = world.build_surface(pos).expect("build").version;
        for x in 1..6 {
            world.compute_height(ColumnCoord::new(x, 0)).expect("height");
            world.build_surface(ChunkCoord::new(x * 3, 0, 2)).expect("build");
        }
        world.prune().expect("prune");
        assert_eq!(world.cached_heights(), 2);
        assert_eq!(world.tracked_versions(), 2);

        // Evicted heights come back from the store.
        assert_eq!(world.height(ColumnCoord::new(1, 0)), CoarseHeight::new(3));
        // A forgotten chunk is rebuilt under a version it never had.
        assert_eq!(world.current_version(pos), None);
        assert!(world.build_surface(pos).expect("build").version > first);
    }

    #[test]
    fn test_rebuild_after_stamp_eviction_is_current() {
        let config = WorldConfig {
            version_capacity: 1,
            ..WorldConfig::default()
        };
        let world = world_with(Arc::new(MemoryStore::new()), config);
        let pos = ChunkCoord::new(0, 0, 2);
        world.build_surface(pos).expect("build");
        world.set_voxel(0, 0, 39, MaterialId::AIR).expect("edit");
        // Drops the stamp of `pos` along with most other entries.
        world.prune().expect("prune");
        let rebuilt = world.build_surface(pos).expect("build");
        assert_eq!(world.current_version(pos), Some(rebuilt.version));
        assert_eq!(world.build_surface(pos).expect("build"), rebuilt);
    }

    #[test]
    fn test_evicted_stamp_is_not_mistaken_for_unedited() {
        let mut versions = Versions::new();
        let pos = ChunkCoord::new(4, 4, 4);
        // A build starts, then an edit stamps `pos` and the entry is evicted.
        let since = versions.edit_seq;
        versions.edit_seq += 1;
        versions.entries.set(
            pos,
            VersionEntry {
                version: 0,
                last_edit: versions.edit_seq,
                current: false,
            },
        );
        versions.prune(0);
        assert!(versions.last_edit(pos) > since);
        assert_eq!(versions.last_edit(ChunkCoord::new(0, 0, 0)), 1);

        assert_eq!(versions.allocate(), 1);
        versions.next_version = u32::MAX;
        assert_eq!(versions.allocate(), u32::MAX);
        assert_eq!(versions.allocate(), 1);
    }
}
