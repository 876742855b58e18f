//! Terrain meshing.

mod mesher;

pub use mesher::{
    build_mesh, build_meshes, CustomBlockInstance, MeshBuffers, TerrainMesh, TerrainVertex,
};
