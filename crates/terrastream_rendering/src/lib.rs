//! # TERRASTREAM Rendering
//!
//! Client-side half of the streaming engine: turns cached surfaces into
//! drawable buffers and decides, chunk by chunk, what the viewer can see.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           SCENE                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ChunkCache ──▶ MeshPipeline (workers) ──▶ upload ──▶ draw   │
//! │       ▲                                          ▲           │
//! │  SceneRequest                      DistanceBucketMap         │
//! │       │                                          │           │
//! │   network      OcclusionProbe ◀── RenderBackend probes       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - The render thread polls, it never waits
//! - Visibility only spreads through chunks confirmed visible
//! - Everything outside the view radius is released immediately

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod backend;
pub mod culling;
pub mod pipeline;
pub mod scene;
pub mod voxel;

pub use backend::{BufferHandle, HeadlessBackend, HeadlessStats, ProbeHandle, RenderBackend};
pub use culling::{DistanceBucketMap, OcclusionBounds, OcclusionConfig, OcclusionProbe, OcclusionStats, ProbeState};
pub use pipeline::{FrameStats, MeshFuture, MeshPipeline};
pub use scene::{Scene, SceneConfig, SceneRequest};
pub use voxel::{build_mesh, build_meshes, CustomBlockInstance, MeshBuffers, TerrainMesh, TerrainVertex};
