//! # TERRASTREAM Core
//!
//! Chunk data and everything derived from it that both sides of the wire
//! share: coordinates, surfaces, light maps, their compressed encoding, the
//! recency caches that bound client memory and the stores behind them.
//!
//! ## Architecture
//!
//! ```text
//!   Chunk + 6 neighbours ──▶ Neighborhood ──▶ extract_surface_data ──▶ SurfaceData
//!                                   │                                   │
//!                                   └────────▶ LightGenerator ─────▶ LightData
//!                                                                       │
//!                              CompressedData (LZ4) ◀───────────────────┘
//!                                      │
//!                    ChunkStore  ◀─────┴─────▶  ChunkCache (RecencyCache x3)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use terrastream_core::{extract_surface_data, MaterialRegistry, Neighborhood};
//!
//! let materials = MaterialRegistry::with_defaults();
//! let hood = Neighborhood::gather(pos, |p| world.chunk(p))?;
//! let surface = extract_surface_data(&hood, &materials);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod cache;
pub mod chunk;
pub mod chunk_cache;
pub mod codec;
pub mod coords;
pub mod error;
pub mod light;
pub mod material;
pub mod neighborhood;
pub mod storage;
pub mod surface;

// Re-exports for convenience
pub use cache::RecencyCache;
pub use chunk::Chunk;
pub use chunk_cache::{ChunkCache, ChunkCacheConfig, ChunkCacheStats, PrunerHandle, SurfacePair};
pub use codec::CompressedData;
pub use coords::{ChunkCoord, CoarseHeight, ColumnCoord, Direction, VoxelPos, ALL_FACES, CHUNK_SIZE, VOXELS_PER_CHUNK};
pub use error::{StreamError, StreamResult};
pub use light::{Light, LightData, LightGenerator, LightMap, UniformLight};
pub use material::{MaterialDef, MaterialId, MaterialRegistry};
pub use neighborhood::Neighborhood;
pub use storage::{ChunkStore, DataKind, DiskStore, MemoryStore};
pub use surface::{
    count_faces, extract_opaque_surface, extract_surface_data, extract_transparent_surface,
    FaceRecord, Surface, SurfaceData,
};

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: u16 = 1;
