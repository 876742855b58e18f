//! Scene statistics.

use crate::culling::OcclusionStats;

/// Statistics from one scene frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Number of draw calls (one per non-empty buffer).
    pub draw_calls: u32,
    /// Opaque buffers drawn.
    pub opaque_chunks: u32,
    /// Transparent buffers drawn.
    pub transparent_chunks: u32,
    /// Meshes uploaded this frame.
    pub meshes_uploaded: u32,
    /// Mesh results dropped because their chunk left the view.
    pub meshes_discarded: u32,
    /// Mesh builds that failed on desynchronised data.
    pub desyncs: u32,
    /// Chunk entries tracked by the scene.
    pub tracked_chunks: u32,
    /// Mesh jobs still in flight.
    pub pending_meshes: u32,
    /// Occlusion probe counters.
    pub occlusion: OcclusionStats,
}

impl FrameStats {
    /// Returns true if the scene has no outstanding work.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.pending_meshes == 0 && self.occlusion.in_flight == 0 && self.occlusion.submitted == 0
    }
}
