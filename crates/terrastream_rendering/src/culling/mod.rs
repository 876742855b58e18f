//! Visibility culling for streamed terrain.
//!
//! Distance buckets decide what may be resident; occlusion probes decide
//! what is actually drawn.

mod bucket_map;
mod occlusion;

pub use bucket_map::DistanceBucketMap;
pub use occlusion::{OcclusionBounds, OcclusionConfig, OcclusionProbe, OcclusionStats, ProbeState};
