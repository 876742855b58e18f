//! Asynchronous occlusion probes.
//!
//! Each chunk the scene is unsure about gets a probe: the backend renders the
//! chunk's bounding box against the depth buffer and later reports how many
//! samples passed. Results may take several frames; the scene polls once per
//! frame and never waits.
//!
//! ```text
//!   Inactive ──arm──▶ Idle ──submit──▶ Busy ──poll──▶ Visible
//!                      ▲                        └───▶ Occluded ──rearm──┐
//!                      └────────────────────────────────────────────────┘
//!
//!   any non-terminal ──▶ Air | Cancelled        anything ──▶ Disposed
//! ```

use std::fmt;

use terrastream_core::{ChunkCoord, StreamError, StreamResult, CHUNK_SIZE};

use crate::backend::{ProbeHandle, RenderBackend};

/// Configuration for occlusion probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcclusionConfig {
    /// A probe counts as visible when more samples than this pass.
    pub visibility_threshold: u32,
}

impl OcclusionConfig {
    /// Default threshold: a few stray samples at box edges do not count.
    pub const DEFAULT_THRESHOLD: u32 = 4;
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

/// Probe lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeState {
    /// Created, not armed.
    Inactive,
    /// Armed, waiting for the next submission pass.
    Idle,
    /// Submitted to the backend, result pending.
    Busy,
    /// Chunk is visible.
    Visible,
    /// Chunk is hidden; re-armed next frame.
    Occluded,
    /// Chunk is above the terrain; nothing to probe.
    Air,
    /// Chunk left the view or its probe was superseded.
    Cancelled,
    /// Backend resources released.
    Disposed,
}

impl ProbeState {
    /// Name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Visible => "visible",
            Self::Occluded => "occluded",
            Self::Air => "air",
            Self::Cancelled => "cancelled",
            Self::Disposed => "disposed",
        }
    }

    /// Returns true for `Idle` and `Busy`.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }

    /// Returns true once no further transitions except disposal are allowed.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Cancelled | Self::Disposed)
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One chunk's occlusion probe.
#[derive(Debug)]
pub struct OcclusionProbe {
    pos: ChunkCoord,
    state: ProbeState,
    handle: Option<ProbeHandle>,
    submissions: u32,
}

impl OcclusionProbe {
    /// Creates an inactive probe.
    #[must_use]
    pub const fn new(pos: ChunkCoord) -> Self {
        Self {
            pos,
            state: ProbeState::Inactive,
            handle: None,
            submissions: 0,
        }
    }

    /// Chunk being probed.
    #[must_use]
    pub const fn pos(&self) -> ChunkCoord {
        self.pos
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ProbeState {
        self.state
    }

    /// Queries issued so far.
    #[must_use]
    pub const fn submissions(&self) -> u32 {
        self.submissions
    }

    fn invalid(&self, to: ProbeState) -> StreamError {
        StreamError::InvalidProbeTransition {
            from: self.state.name(),
            to: to.name(),
        }
    }

    fn end_query<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(handle) = self.handle.take() {
            backend.end_probe(handle);
        }
    }

    /// Queues the probe for submission. Valid from `Inactive`, `Occluded`
    /// and `Air`; a no-op when already `Idle`.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidProbeTransition`] from any other state.
    pub fn arm(&mut self) -> StreamResult<()> {
        match self.state {
            ProbeState::Inactive | ProbeState::Occluded | ProbeState::Air | ProbeState::Idle => {
                self.state = ProbeState::Idle;
                Ok(())
            }
            _ => Err(self.invalid(ProbeState::Idle)),
        }
    }

    /// Starts the hardware query.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidProbeTransition`] unless `Idle`.
    pub fn submit<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> StreamResult<()> {
        if self.state != ProbeState::Idle {
            return Err(self.invalid(ProbeState::Busy));
        }
        let bounds = OcclusionBounds::for_chunk(self.pos.x, self.pos.y, self.pos.z, self.submissions);
        self.submissions = self.submissions.wrapping_add(1);
        self.handle = Some(backend.begin_probe(&bounds));
        self.state = ProbeState::Busy;
        Ok(())
    }

    /// Checks for a result. Returns the new state once resolved.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidProbeTransition`] unless `Busy`.
    pub fn poll<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        config: &OcclusionConfig,
    ) -> StreamResult<Option<ProbeState>> {
        let Some(handle) = self.handle.filter(|_| self.state == ProbeState::Busy) else {
            return Err(self.invalid(ProbeState::Visible));
        };
        let Some(samples) = backend.poll_probe(handle) else {
            return Ok(None);
        };
        self.end_query(backend);
        self.state = if samples > config.visibility_threshold {
            ProbeState::Visible
        } else {
            ProbeState::Occluded
        };
        Ok(Some(self.state))
    }

    /// Marks the chunk visible without waiting for a query, ending any
    /// in-flight one.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidProbeTransition`] from `Cancelled` or `Disposed`.
    pub fn mark_visible<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> StreamResult<()> {
        if self.state.is_final() {
            return Err(self.invalid(ProbeState::Visible));
        }
        self.end_query(backend);
        self.state = ProbeState::Visible;
        Ok(())
    }

    /// Marks the chunk as air.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidProbeTransition`] from `Cancelled` or `Disposed`.
    pub fn mark_air<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> StreamResult<()> {
        if self.state.is_final() {
            return Err(self.invalid(ProbeState::Air));
        }
        self.end_query(backend);
        self.state = ProbeState::Air;
        Ok(())
    }

    /// Cancels the probe.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidProbeTransition`] once disposed.
    pub fn cancel<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> StreamResult<()> {
        if self.state == ProbeState::Disposed {
            return Err(self.invalid(ProbeState::Cancelled));
        }
        self.end_query(backend);
        self.state = ProbeState::Cancelled;
        Ok(())
    }

    /// Releases backend resources. Terminal.
    pub fn dispose<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        self.end_query(backend);
        self.state = ProbeState::Disposed;
    }
}

/// Statistics from occlusion probing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OcclusionStats {
    /// Probes submitted this frame.
    pub submitted: u32,
    /// Probes resolved this frame.
    pub resolved: u32,
    /// Resolved as visible.
    pub visible: u32,
    /// Resolved as occluded.
    pub occluded: u32,
    /// Probes still in flight.
    pub in_flight: u32,
}

/// Bounding box data for probe rendering.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OcclusionBounds {
    /// Minimum X.
    pub min_x: f32,
    /// Minimum Y.
    pub min_y: f32,
    /// Minimum Z.
    pub min_z: f32,
    /// Submission number of the owning probe, starting at 0.
    pub generation: u32,
    /// Maximum X.
    pub max_x: f32,
    /// Maximum Y.
    pub max_y: f32,
    /// Maximum Z.
    pub max_z: f32,
    /// Padding.
    pub _pad: u32,
}

impl OcclusionBounds {
    /// Creates bounds for a chunk.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn for_chunk(chunk_x: i32, chunk_y: i32, chunk_z: i32, generation: u32) -> Self {
        let size = CHUNK_SIZE as f32;
        let min_x = chunk_x as f32 * size;
        let min_y = chunk_y as f32 * size;
        let min_z = chunk_z as f32 * size;

        Self {
            min_x,
            min_y,
            min_z,
            generation,
            max_x: min_x + size,
            max_y: min_y + size,
            max_z: min_z + size,
            _pad: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    fn backend_with(samples: u32, latency: u32) -> HeadlessBackend {
        HeadlessBackend::with_oracle(latency, Box::new(move |_| samples))
    }

    #[test]
    fn test_occlusion_bounds() {
        let bounds = OcclusionBounds::for_chunk(1, 2, -3, 42);

        assert_eq!(bounds.min_x, 16.0);
        assert_eq!(bounds.min_y, 32.0);
        assert_eq!(bounds.min_z, -48.0);
        assert_eq!(bounds.max_z, -32.0);
        assert_eq!(bounds.generation, 42);
    }

    #[test]
    fn test_config_defaults() {
        let config = OcclusionConfig::default();
        assert_eq!(config.visibility_threshold, 4);
    }

    #[test]
    fn test_visible_lifecycle() {
        let mut backend = backend_with(5, 1);
        let config = OcclusionConfig::default();
        let mut probe = OcclusionProbe::new(ChunkCoord::new(0, 0, 0));

        assert!(probe.submit(&mut backend).is_err());
        probe.arm().expect("arm");
        probe.submit(&mut backend).expect("submit");
        assert_eq!(probe.state(), ProbeState::Busy);
        assert_eq!(probe.poll(&mut backend, &config).expect("poll"), None);
        assert_eq!(
            probe.poll(&mut backend, &config).expect("poll"),
            Some(ProbeState::Visible)
        );
        assert_eq!(backend.live_probes(), 0);
        assert!(probe.poll(&mut backend, &config).is_err());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut backend = backend_with(4, 0);
        let config = OcclusionConfig::default();
        let mut probe = OcclusionProbe::new(ChunkCoord::new(0, 0, 0));
        probe.arm().expect("arm");
        probe.submit(&mut backend).expect("submit");
        assert_eq!(
            probe.poll(&mut backend, &config).expect("poll"),
            Some(ProbeState::Occluded)
        );
        // Occluded probes re-arm.
        probe.arm().expect("rearm");
        assert_eq!(probe.state(), ProbeState::Idle);
    }

    #[test]
    fn test_resubmission_carries_next_generation() {
        // Hidden on the first query only.
        let mut backend = HeadlessBackend::with_oracle(0, Box::new(|b| if b.generation == 0 { 0 } else { 10 }));
        let config = OcclusionConfig::default();
        let mut probe = OcclusionProbe::new(ChunkCoord::new(2, 0, 1));
        probe.arm().expect("arm");
        probe.submit(&mut backend).expect("submit");
        assert_eq!(
            probe.poll(&mut backend, &config).expect("poll"),
            Some(ProbeState::Occluded)
        );
        probe.arm().expect("rearm");
        probe.submit(&mut backend).expect("resubmit");
        assert_eq!(probe.submissions(), 2);
        assert_eq!(
            probe.poll(&mut backend, &config).expect("poll"),
            Some(ProbeState::Visible)
        );
    }

    #[test]
    fn test_cancel_while_busy_frees_query() {
        let mut backend = backend_with(100, 10);
        let mut probe = OcclusionProbe::new(ChunkCoord::new(3, 3, 3));
        probe.arm().expect("arm");
        probe.submit(&mut backend).expect("submit");
        assert_eq!(backend.live_probes(), 1);
        probe.cancel(&mut backend).expect("cancel");
        assert_eq!(probe.state(), ProbeState::Cancelled);
        assert_eq!(backend.live_probes(), 0);
        assert!(probe.arm().is_err());
        assert!(probe.mark_air(&mut backend).is_err());
        probe.dispose(&mut backend);
        assert!(probe.cancel(&mut backend).is_err());
        assert_eq!(probe.state(), ProbeState::Disposed);
    }

    #[test]
    fn test_air_then_rearm() {
        let mut backend = backend_with(100, 0);
        let mut probe = OcclusionProbe::new(ChunkCoord::new(0, 0, 9));
        probe.arm().expect("arm");
        probe.submit(&mut backend).expect("submit");
        probe.mark_air(&mut backend).expect("air");
        assert_eq!(backend.live_probes(), 0);
        assert_eq!(probe.state(), ProbeState::Air);
        probe.arm().expect("height dropped below");
        assert_eq!(probe.state(), ProbeState::Idle);
    }

    #[test]
    fn test_invalid_transition_message() {
        let mut probe = OcclusionProbe::new(ChunkCoord::new(0, 0, 0));
        let mut backend = backend_with(0, 0);
        probe.mark_visible(&mut backend).expect("visible");
        let err = probe.arm().unwrap_err();
        assert_eq!(err.to_string(), "invalid probe transition from visible to idle");
    }
}
