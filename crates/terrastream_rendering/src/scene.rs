//! # Scene
//!
//! Decides which chunks around the viewer are drawn.
//!
//! Every chunk the scene knows about lives in a [`DistanceBucketMap`] keyed
//! by its distance to the viewer. Visibility spreads outward like a flood
//! fill: a chunk confirmed visible (by an occlusion probe or a finished mesh)
//! arms probes for its six neighbours, and only visible chunks get meshes.
//!
//! ## Per-frame flow
//!
//! ```text
//!   drain_ready() ──▶ upload meshes ──▶ probe neighbours
//!   Occluded ──▶ Idle
//!   poll Busy ──▶ Visible ──▶ load / request surface
//!   submit Idle
//!   draw: opaque near→far, transparent far→near
//! ```
//!
//! Missing surfaces are not fetched here. The scene queues
//! [`SceneRequest`]s that the owner drains with [`Scene::take_requests`].

use std::collections::HashSet;
use std::sync::Arc;

use terrastream_core::{ChunkCache, ChunkCoord, CoarseHeight, ColumnCoord, Direction, StreamError};

use crate::backend::{BufferHandle, RenderBackend};
use crate::culling::{DistanceBucketMap, OcclusionConfig, OcclusionProbe, ProbeState};
use crate::pipeline::{FrameStats, MeshPipeline};
use crate::voxel::MeshBuffers;

/// Scene configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneConfig {
    /// Chunks closer than this (Manhattan distance) are in view.
    pub view_radius: u32,
    /// Occlusion probe settings.
    pub occlusion: OcclusionConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            view_radius: 12,
            occlusion: OcclusionConfig::default(),
        }
    }
}

/// Data the scene needs from the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneRequest {
    /// Surface and light of a chunk are not cached.
    Chunk(ChunkCoord),
    /// Cached data was inconsistent and has been dropped; fetch from scratch.
    Refetch(ChunkCoord),
}

impl SceneRequest {
    /// Chunk the request is about.
    #[must_use]
    pub const fn pos(&self) -> ChunkCoord {
        match self {
            Self::Chunk(pos) | Self::Refetch(pos) => *pos,
        }
    }
}

#[derive(Debug)]
struct ChunkEntry {
    probe: OcclusionProbe,
    opaque: Option<BufferHandle>,
    transparent: Option<BufferHandle>,
    has_meshes: bool,
}

impl ChunkEntry {
    const fn new(pos: ChunkCoord) -> Self {
        Self {
            probe: OcclusionProbe::new(pos),
            opaque: None,
            transparent: None,
            has_meshes: false,
        }
    }

    fn release_buffers<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(buffer) = self.opaque.take() {
            backend.release(buffer);
        }
        if let Some(buffer) = self.transparent.take() {
            backend.release(buffer);
        }
    }
}

/// Offsets that enter the view when the viewer takes one step in each
/// direction, indexed by [`Direction::index`].
fn edge_of_view(radius: u32) -> [Vec<ChunkCoord>; 6] {
    let r = i32::try_from(radius).unwrap_or(i32::MAX / 4);
    let origin = ChunkCoord::default();
    let mut edges: [Vec<ChunkCoord>; 6] = Default::default();
    for dir in Direction::ALL {
        let (dx, dy, dz) = dir.offset();
        for x in -r..=r {
            for y in -r..=r {
                for z in -r..=r {
                    let offset = ChunkCoord::new(x, y, z);
                    let inside = origin.manhattan_distance(offset) < radius;
                    let was_inside = origin.manhattan_distance(offset.offset(dx, dy, dz)) < radius;
                    if inside && !was_inside {
                        edges[dir.index()].push(offset);
                    }
                }
            }
        }
    }
    edges
}

/// One unit step from `from` towards `to`: x first, then y, then z.
fn step_towards(from: ChunkCoord, to: ChunkCoord) -> Option<(ChunkCoord, Direction)> {
    let dir = if from.x < to.x {
        Direction::East
    } else if from.x > to.x {
        Direction::West
    } else if from.y < to.y {
        Direction::North
    } else if from.y > to.y {
        Direction::South
    } else if from.z < to.z {
        Direction::Up
    } else if from.z > to.z {
        Direction::Down
    } else {
        return None;
    };
    Some((from.neighbor(dir), dir))
}

/// Visibility-driven chunk scene.
pub struct Scene<B: RenderBackend> {
    config: SceneConfig,
    backend: B,
    pipeline: MeshPipeline,
    cache: Arc<ChunkCache>,
    map: DistanceBucketMap<ChunkEntry>,
    edges: [Vec<ChunkCoord>; 6],
    requests: Vec<SceneRequest>,
    requested: HashSet<ChunkCoord>,
    desyncs: u32,
}

impl<B: RenderBackend> Scene<B> {
    /// Creates an empty scene centred on the origin.
    #[must_use]
    pub fn new(config: SceneConfig, backend: B, pipeline: MeshPipeline, cache: Arc<ChunkCache>) -> Self {
        Self {
            config,
            backend,
            pipeline,
            cache,
            map: DistanceBucketMap::new(ChunkCoord::default(), config.view_radius),
            edges: edge_of_view(config.view_radius),
            requests: Vec::new(),
            requested: HashSet::new(),
            desyncs: 0,
        }
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> SceneConfig {
        self.config
    }

    /// Viewer chunk.
    #[must_use]
    pub const fn center(&self) -> ChunkCoord {
        self.map.center()
    }

    /// Returns true if `pos` is within the view radius.
    #[must_use]
    pub fn is_in_view(&self, pos: ChunkCoord) -> bool {
        self.map.is_inside(pos)
    }

    /// Backend, for inspection.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Chunk cache feeding the mesh pipeline.
    #[must_use]
    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Probe state of a tracked chunk.
    #[must_use]
    pub fn probe_state(&self, pos: ChunkCoord) -> Option<ProbeState> {
        self.map.get(pos).map(|e| e.probe.state())
    }

    /// Returns true if the chunk's meshes are built (possibly empty).
    #[must_use]
    pub fn has_meshes(&self, pos: ChunkCoord) -> bool {
        self.map.get(pos).is_some_and(|e| e.has_meshes)
    }

    /// Number of tracked chunks.
    #[must_use]
    pub const fn tracked(&self) -> usize {
        self.map.len()
    }

    /// Tracked chunks per distance, nearest first.
    #[must_use]
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.map.bucket_sizes()
    }

    /// Takes the queued network requests.
    pub fn take_requests(&mut self) -> Vec<SceneRequest> {
        std::mem::take(&mut self.requests)
    }

    fn height(&self, pos: ChunkCoord) -> CoarseHeight {
        self.cache.height(pos.column())
    }

    fn is_air(&self, pos: ChunkCoord) -> bool {
        self.height(pos).is_air_chunk(pos)
    }

    fn request(&mut self, request: SceneRequest) {
        let pos = request.pos();
        let fresh = self.requested.insert(pos);
        if fresh || matches!(request, SceneRequest::Refetch(_)) {
            tracing::trace!("Queued {:?}", request);
            self.requests.push(request);
        }
    }

    fn release_entry(&mut self, pos: ChunkCoord, mut entry: ChunkEntry) {
        entry.release_buffers(&mut self.backend);
        // Cancelling fails only for disposed probes, which need nothing else.
        let _ = entry.probe.cancel(&mut self.backend);
        entry.probe.dispose(&mut self.backend);
        self.pipeline.cancel(pos);
        self.requested.remove(&pos);
    }

    fn remove_chunk(&mut self, pos: ChunkCoord) {
        if let Some(entry) = self.map.remove(pos) {
            self.release_entry(pos, entry);
        }
    }

    /// Changes the view radius, dropping everything now out of range.
    pub fn set_view_radius(&mut self, radius: u32) {
        for (pos, entry) in self.map.set_view_radius(radius) {
            self.release_entry(pos, entry);
        }
        self.config.view_radius = radius;
        self.edges = edge_of_view(radius);
        tracing::debug!("View radius set to {}", radius);
    }

    /// Moves the viewer to `pos`.
    ///
    /// Chunks leaving the view are released. The 3x3x3 block around the
    /// viewer is made visible. For short moves, the chunks entering the view
    /// are probed when they are the top of their column or touch a visible
    /// chunk.
    pub fn on_move(&mut self, pos: ChunkCoord) {
        let old = self.map.center();
        let evicted = self.map.recenter(pos);
        tracing::debug!("Viewer moved {} -> {}, {} chunks left the view", old, pos, evicted.len());
        for (evicted_pos, entry) in evicted {
            self.release_entry(evicted_pos, entry);
        }

        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    self.make_chunk_visible(pos.offset(dx, dy, dz));
                }
            }
        }

        if old.manhattan_distance(pos) >= 5 {
            return;
        }
        let mut step = old;
        while let Some((next, dir)) = step_towards(step, pos) {
            self.seed_frontier(next, dir);
            step = next;
        }
    }

    fn seed_frontier(&mut self, center: ChunkCoord, dir: Direction) {
        let offsets = std::mem::take(&mut self.edges[dir.index()]);
        for offset in &offsets {
            let abs = center.offset(offset.x, offset.y, offset.z);
            if self.height(abs).get() == Some(abs.z + 1) {
                self.send_visibility_request(abs);
                continue;
            }
            let touches_visible = abs.neighbors().any(|(_, n)| {
                self.map
                    .get(n)
                    .is_some_and(|e| e.probe.state() == ProbeState::Visible)
            });
            if touches_visible {
                self.send_visibility_request(abs);
            }
        }
        self.edges[dir.index()] = offsets;
    }

    /// Arms a probe for `pos` unless it is out of view, air, already being
    /// probed, visible, or meshed.
    pub fn send_visibility_request(&mut self, pos: ChunkCoord) {
        if !self.map.is_inside(pos) || self.is_air(pos) {
            return;
        }
        let Some(entry) = self.map.get_or_insert_with(pos, || ChunkEntry::new(pos)) else {
            return;
        };
        let state = entry.probe.state();
        if state.is_pending() || state == ProbeState::Visible || entry.has_meshes {
            return;
        }
        if let Err(e) = entry.probe.arm() {
            tracing::debug!("Cannot probe chunk {}: {}", pos, e);
        }
    }

    fn send_visibility_requests(&mut self, pos: ChunkCoord) {
        for (_, n) in pos.neighbors() {
            self.send_visibility_request(n);
        }
    }

    /// Marks `pos` visible and gets its meshes built, from the cache if
    /// possible, otherwise by requesting its surface.
    pub fn make_chunk_visible(&mut self, pos: ChunkCoord) {
        if !self.map.is_inside(pos) {
            self.remove_chunk(pos);
            return;
        }
        if self.is_air(pos) {
            self.reveal_air(pos);
            return;
        }
        let Some(entry) = self.map.get_or_insert_with(pos, || ChunkEntry::new(pos)) else {
            return;
        };
        if entry.has_meshes {
            return;
        }
        let in_progress = self.pipeline.is_scheduled(pos) || self.requested.contains(&pos);
        if entry.probe.state() == ProbeState::Visible && in_progress {
            return;
        }
        if let Err(e) = entry.probe.mark_visible(&mut self.backend) {
            tracing::debug!("Cannot reveal chunk {}: {}", pos, e);
            return;
        }
        tracing::trace!("Chunk {} is now visible", pos);
        self.load_meshes(pos);
    }

    fn reveal_air(&mut self, pos: ChunkCoord) {
        let Some(entry) = self.map.get_or_insert_with(pos, || ChunkEntry::new(pos)) else {
            return;
        };
        let newly_air = entry.probe.state() != ProbeState::Air;
        entry.release_buffers(&mut self.backend);
        if let Err(e) = entry.probe.mark_air(&mut self.backend) {
            tracing::debug!("Cannot mark chunk {} as air: {}", pos, e);
        }
        entry.has_meshes = true;
        self.pipeline.cancel(pos);
        if newly_air {
            // Nothing to fetch or draw; look at the neighbours straight away.
            self.send_visibility_requests(pos);
        }
    }

    fn load_meshes(&mut self, pos: ChunkCoord) {
        match self.cache.get_pair(pos) {
            Ok(Some((surface, light))) => {
                if let Err(e) = self.pipeline.schedule(pos, surface, light) {
                    tracing::warn!("Cannot schedule mesh for chunk {}: {}", pos, e);
                }
            }
            Ok(None) => self.request(SceneRequest::Chunk(pos)),
            Err(e) => self.drop_desynced(pos, &e),
        }
    }

    fn drop_desynced(&mut self, pos: ChunkCoord, error: &StreamError) {
        tracing::warn!("Dropping data of chunk {}: {}", pos, error);
        self.cache.invalidate(pos);
        self.desyncs += 1;
        self.request(SceneRequest::Refetch(pos));
    }

    /// New surface and light for `pos` are in the cache.
    pub fn on_surface_updated(&mut self, pos: ChunkCoord) {
        self.requested.remove(&pos);
        if !self.map.is_inside(pos) {
            tracing::trace!("Chunk {} is not in view", pos);
            return;
        }
        if self.is_air(pos) {
            self.reveal_air(pos);
            return;
        }
        let visible = self
            .map
            .get(pos)
            .is_some_and(|e| e.probe.state() == ProbeState::Visible);
        if visible {
            self.load_meshes(pos);
        }
    }

    /// The coarse height of `col` changed from `old` to `new`. The cache must
    /// already hold `new`.
    pub fn on_height_changed(&mut self, col: ColumnCoord, new: CoarseHeight, old: CoarseHeight) {
        let radius = i32::try_from(self.map.view_radius()).unwrap_or(i32::MAX / 4);
        let center_z = self.map.center().z;
        for z in center_z.saturating_sub(radius)..=center_z.saturating_add(radius) {
            let pos = col.chunk(z);
            let Some(entry) = self.map.get_mut(pos) else {
                continue;
            };
            if new.is_air_chunk(pos) {
                if entry.probe.state() != ProbeState::Air {
                    entry.release_buffers(&mut self.backend);
                    if let Err(e) = entry.probe.mark_air(&mut self.backend) {
                        tracing::debug!("Cannot mark chunk {} as air: {}", pos, e);
                    }
                    entry.has_meshes = true;
                    self.pipeline.cancel(pos);
                }
            } else if entry.probe.state() == ProbeState::Air {
                entry.has_meshes = false;
                if let Err(e) = entry.probe.arm() {
                    tracing::debug!("Cannot re-probe chunk {}: {}", pos, e);
                }
            }
        }

        match (old.get(), new.get()) {
            (Some(old_z), Some(new_z)) if new_z > old_z => {
                self.send_visibility_request(col.chunk(old_z));
            }
            (None, Some(new_z)) => {
                // First height for this column; its top is a good place to look.
                self.send_visibility_request(col.chunk(new_z - 1));
            }
            _ => {}
        }
    }

    /// Runs one frame: applies finished meshes, advances probes, and draws.
    pub fn frame(&mut self) -> FrameStats {
        let mut stats = FrameStats::default();

        for (pos, result) in self.pipeline.drain_ready() {
            self.apply_mesh(pos, result, &mut stats);
        }

        self.map.for_each_mut(|pos, entry| {
            if entry.probe.state() == ProbeState::Occluded {
                if let Err(e) = entry.probe.arm() {
                    tracing::debug!("Cannot re-arm probe {}: {}", pos, e);
                }
            }
        });

        let mut revealed = Vec::new();
        {
            let backend = &mut self.backend;
            let config = self.config.occlusion;
            self.map.for_each_mut(|pos, entry| {
                if entry.probe.state() != ProbeState::Busy {
                    return;
                }
                match entry.probe.poll(backend, &config) {
                    Ok(Some(ProbeState::Visible)) => {
                        stats.occlusion.resolved += 1;
                        stats.occlusion.visible += 1;
                        revealed.push(pos);
                    }
                    Ok(Some(_)) => {
                        stats.occlusion.resolved += 1;
                        stats.occlusion.occluded += 1;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!("Probe {} poll failed: {}", pos, e),
                }
            });
        }
        for pos in revealed {
            self.make_chunk_visible(pos);
            self.send_visibility_requests(pos);
        }

        {
            let backend = &mut self.backend;
            self.map.for_each_mut(|pos, entry| match entry.probe.state() {
                ProbeState::Idle => match entry.probe.submit(backend) {
                    Ok(()) => {
                        stats.occlusion.submitted += 1;
                        stats.occlusion.in_flight += 1;
                    }
                    Err(e) => tracing::debug!("Probe {} submit failed: {}", pos, e),
                },
                ProbeState::Busy => stats.occlusion.in_flight += 1,
                _ => {}
            });
        }

        let mut opaque = Vec::new();
        let mut transparent = Vec::new();
        self.map.for_each(|_, entry| {
            if let Some(buffer) = entry.opaque {
                opaque.push(buffer);
            }
        });
        self.map.for_each_reverse(|_, entry| {
            if let Some(buffer) = entry.transparent {
                transparent.push(buffer);
            }
        });
        self.backend.draw(&opaque, &transparent);

        stats.opaque_chunks = u32::try_from(opaque.len()).unwrap_or(u32::MAX);
        stats.transparent_chunks = u32::try_from(transparent.len()).unwrap_or(u32::MAX);
        stats.draw_calls = stats.opaque_chunks.saturating_add(stats.transparent_chunks);
        stats.tracked_chunks = u32::try_from(self.map.len()).unwrap_or(u32::MAX);
        stats.pending_meshes = u32::try_from(self.pipeline.pending()).unwrap_or(u32::MAX);
        stats.desyncs = std::mem::take(&mut self.desyncs);
        stats
    }

    fn apply_mesh(
        &mut self,
        pos: ChunkCoord,
        result: Result<MeshBuffers, StreamError>,
        stats: &mut FrameStats,
    ) {
        let live = self
            .map
            .get(pos)
            .is_some_and(|e| e.probe.state() != ProbeState::Air);
        if !live {
            stats.meshes_discarded += 1;
            return;
        }
        let buffers = match result {
            Ok(buffers) => buffers,
            Err(e) if e.is_desync() => {
                self.drop_desynced(pos, &e);
                return;
            }
            Err(e) => {
                tracing::warn!("Mesh for chunk {} failed: {}", pos, e);
                return;
            }
        };

        let Some(entry) = self.map.get_mut(pos) else {
            return;
        };
        entry.release_buffers(&mut self.backend);
        if !buffers.opaque.is_empty() {
            entry.opaque = Some(self.backend.upload(&buffers.opaque));
            stats.meshes_uploaded += 1;
        }
        if !buffers.transparent.is_empty() {
            entry.transparent = Some(self.backend.upload(&buffers.transparent));
            stats.meshes_uploaded += 1;
        }
        entry.has_meshes = true;
        if let Err(e) = entry.probe.mark_visible(&mut self.backend) {
            tracing::debug!("Cannot mark chunk {} visible: {}", pos, e);
        }
        tracing::trace!("Chunk {} meshed", pos);
        self.send_visibility_requests(pos);
    }

    /// Releases every chunk.
    pub fn clear(&mut self) {
        for (pos, entry) in self.map.drain() {
            self.release_entry(pos, entry);
        }
        self.requests.clear();
    }
}

impl<B: RenderBackend> Drop for Scene<B> {
    fn drop(&mut self) {
        self.clear();
    }
}
