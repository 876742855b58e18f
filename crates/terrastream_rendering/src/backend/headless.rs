//! Backend without a GPU, for servers, tools and tests.
//!
//! Probe results come from a visibility oracle after a configurable number
//! of polls, which mimics the latency of real occlusion queries.

use std::collections::HashMap;

use super::{BufferHandle, ProbeHandle, RenderBackend};
use crate::culling::OcclusionBounds;
use crate::voxel::TerrainMesh;

/// Decides how many samples a probe box passes.
pub type VisibilityOracle = Box<dyn FnMut(&OcclusionBounds) -> u32 + Send>;

/// Counters of a [`HeadlessBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Buffers uploaded.
    pub uploads: u64,
    /// Buffers released.
    pub releases: u64,
    /// Probes started.
    pub probes_started: u64,
    /// Probes ended.
    pub probes_ended: u64,
    /// Frames drawn.
    pub frames: u64,
    /// Buffers drawn in the last frame.
    pub last_draw_calls: u32,
    /// Quads drawn in the last frame.
    pub last_quads: u64,
}

struct PendingProbe {
    bounds: OcclusionBounds,
    polls_left: u32,
    result: Option<u32>,
}

/// GPU-less [`RenderBackend`].
pub struct HeadlessBackend {
    buffers: HashMap<u64, usize>,
    probes: HashMap<u64, PendingProbe>,
    next_id: u64,
    latency: u32,
    oracle: VisibilityOracle,
    stats: HeadlessStats,
}

impl HeadlessBackend {
    /// Samples reported by the default oracle.
    pub const FULL_SAMPLES: u32 = 64;

    /// Backend whose probes all report visible on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self::with_oracle(0, Box::new(|_| Self::FULL_SAMPLES))
    }

    /// Backend with probe latency (in polls) and a visibility oracle.
    #[must_use]
    pub fn with_oracle(latency: u32, oracle: VisibilityOracle) -> Self {
        Self {
            buffers: HashMap::new(),
            probes: HashMap::new(),
            next_id: 1,
            latency,
            oracle,
            stats: HeadlessStats::default(),
        }
    }

    /// Current counters.
    #[must_use]
    pub const fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Buffers currently alive.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Probes currently alive.
    #[must_use]
    pub fn live_probes(&self) -> usize {
        self.probes.len()
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for HeadlessBackend {
    fn upload(&mut self, mesh: &TerrainMesh) -> BufferHandle {
        let id = self.next_handle();
        self.buffers.insert(id, mesh.quad_count() + mesh.custom.len());
        self.stats.uploads += 1;
        BufferHandle(id)
    }

    fn release(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.0).is_some() {
            self.stats.releases += 1;
        } else {
            tracing::warn!("Released unknown buffer {}", buffer.0);
        }
    }

    fn draw(&mut self, opaque: &[BufferHandle], transparent: &[BufferHandle]) {
        let mut quads = 0u64;
        let mut calls = 0u32;
        for buffer in opaque.iter().chain(transparent) {
            if let Some(count) = self.buffers.get(&buffer.0) {
                quads += *count as u64;
                calls += 1;
            }
        }
        self.stats.frames += 1;
        self.stats.last_draw_calls = calls;
        self.stats.last_quads = quads;
    }

    fn begin_probe(&mut self, bounds: &OcclusionBounds) -> ProbeHandle {
        let id = self.next_handle();
        self.probes.insert(
            id,
            PendingProbe {
                bounds: *bounds,
                polls_left: self.latency,
                result: None,
            },
        );
        self.stats.probes_started += 1;
        ProbeHandle(id)
    }

    fn poll_probe(&mut self, probe: ProbeHandle) -> Option<u32> {
        let pending = self.probes.get_mut(&probe.0)?;
        if let Some(result) = pending.result {
            return Some(result);
        }
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return None;
        }
        let samples = (self.oracle)(&pending.bounds);
        pending.result = Some(samples);
        Some(samples)
    }

    fn end_probe(&mut self, probe: ProbeHandle) {
        if self.probes.remove(&probe.0).is_some() {
            self.stats.probes_ended += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_latency() {
        let mut backend = HeadlessBackend::with_oracle(2, Box::new(|b| if b.min_z < 0.0 { 0 } else { 10 }));
        let above = backend.begin_probe(&OcclusionBounds::for_chunk(0, 0, 1, 0));
        let below = backend.begin_probe(&OcclusionBounds::for_chunk(0, 0, -1, 0));
        assert_eq!(backend.poll_probe(above), None);
        assert_eq!(backend.poll_probe(above), None);
        assert_eq!(backend.poll_probe(above), Some(10));
        assert_eq!(backend.poll_probe(above), Some(10));
        backend.poll_probe(below);
        backend.poll_probe(below);
        assert_eq!(backend.poll_probe(below), Some(0));
        backend.end_probe(above);
        backend.end_probe(below);
        assert_eq!(backend.live_probes(), 0);
        assert_eq!(backend.poll_probe(above), None);
    }

    #[test]
    fn test_buffers_and_draw() {
        let mut backend = HeadlessBackend::new();
        let mesh = TerrainMesh::default();
        let a = backend.upload(&mesh);
        let b = backend.upload(&mesh);
        assert_ne!(a, b);
        backend.draw(&[a], &[b]);
        assert_eq!(backend.stats().last_draw_calls, 2);
        backend.release(a);
        assert_eq!(backend.live_buffers(), 1);
        assert_eq!(backend.stats().releases, 1);
    }
}
