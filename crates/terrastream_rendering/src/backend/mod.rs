//! Rendering backend seam.
//!
//! The scene never talks to a GPU API directly. A backend turns meshes into
//! drawable buffers, draws them, and runs hardware visibility probes whose
//! results arrive asynchronously.

mod headless;

pub use headless::{HeadlessBackend, HeadlessStats};

use crate::culling::OcclusionBounds;
use crate::voxel::TerrainMesh;

/// Handle of an uploaded mesh buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Handle of a hardware visibility probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProbeHandle(pub u64);

/// GPU operations the scene needs.
///
/// All methods are called from the render thread only.
pub trait RenderBackend {
    /// Uploads a mesh and returns its buffer.
    fn upload(&mut self, mesh: &TerrainMesh) -> BufferHandle;

    /// Frees an uploaded buffer.
    fn release(&mut self, buffer: BufferHandle);

    /// Draws one frame: opaque buffers near to far, then transparent
    /// buffers far to near.
    fn draw(&mut self, opaque: &[BufferHandle], transparent: &[BufferHandle]);

    /// Starts a visibility probe for a box. Must not block.
    fn begin_probe(&mut self, bounds: &OcclusionBounds) -> ProbeHandle;

    /// Returns the number of samples that passed, once available.
    fn poll_probe(&mut self, probe: ProbeHandle) -> Option<u32>;

    /// Frees a probe, finished or not.
    fn end_probe(&mut self, probe: ProbeHandle);
}
