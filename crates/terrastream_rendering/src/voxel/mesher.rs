//! Terrain mesher: surface + light map -> vertex and index buffers.
//!
//! Every face record expands to one quad per set direction bit, consuming one
//! light entry each. Custom-model records consume 6 light entries and become
//! a [`CustomBlockInstance`] instead of quads.

use bytemuck::{Pod, Zeroable};
use terrastream_core::light::check_aligned;
use terrastream_core::{
    ChunkCoord, Direction, FaceRecord, Light, LightData, LightMap, MaterialRegistry, StreamResult,
    Surface, SurfaceData, VoxelPos, CHUNK_SIZE,
};

// =============================================================================
// VERTEX FORMAT
// =============================================================================

/// Vertex for terrain mesh.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    /// Position in world space [x, y, z].
    pub position: [f32; 3],
    /// Normal direction [nx, ny, nz].
    pub normal: [f32; 3],
    /// UV coordinates [u, v].
    pub uv: [f32; 2],
    /// Texture index, sunlight, ambient, artificial.
    pub texture_light: [f32; 4],
}

/// Quad corners of a unit cube face, counter-clockwise seen from outside.
const FACE_CORNERS: [[[f32; 3]; 4]; 6] = [
    [[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0, 1.0]],
    [[0.0, 1.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0]],
    [[1.0, 1.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0]],
    [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
    [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]],
    [[0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
];

const FACE_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// Non-cuboid block drawn from a model, lit per cube face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CustomBlockInstance {
    /// Voxel position inside the chunk.
    pub pos: VoxelPos,
    /// Model index from the material definition.
    pub model: u16,
    /// One light value per direction.
    pub light: [Light; 6],
}

// =============================================================================
// MESH OUTPUT
// =============================================================================

/// Mesh for one pass of one chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerrainMesh {
    /// Vertex buffer data.
    pub vertices: Vec<TerrainVertex>,
    /// Index buffer data.
    pub indices: Vec<u32>,
    /// Custom model instances.
    pub custom: Vec<CustomBlockInstance>,
}

impl TerrainMesh {
    /// Returns true if nothing would be drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.custom.is_empty()
    }

    /// Number of quads.
    #[must_use]
    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }

    /// Triangle count.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex count.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_face(&mut self, origin: [f32; 3], pos: VoxelPos, dir: Direction, texture: u16, light: Light) {
        let base = self.vertices.len() as u32;
        let (nx, ny, nz) = dir.offset();
        let normal = [nx as f32, ny as f32, nz as f32];
        let texture_light = [
            f32::from(texture),
            f32::from(light.sunlight()),
            f32::from(light.ambient()),
            f32::from(light.artificial()),
        ];
        let voxel = [
            origin[0] + f32::from(pos.x),
            origin[1] + f32::from(pos.y),
            origin[2] + f32::from(pos.z),
        ];
        for (corner, uv) in FACE_CORNERS[dir.index()].iter().zip(FACE_UVS) {
            self.vertices.push(TerrainVertex {
                position: [voxel[0] + corner[0], voxel[1] + corner[1], voxel[2] + corner[2]],
                normal,
                uv,
                texture_light,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// Opaque and transparent meshes of one chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshBuffers {
    /// Opaque pass.
    pub opaque: TerrainMesh,
    /// Transparent pass.
    pub transparent: TerrainMesh,
}

impl MeshBuffers {
    /// Returns true if both passes are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty()
    }
}

/// World-space origin of a chunk.
#[allow(clippy::cast_precision_loss)]
fn chunk_origin(pos: ChunkCoord) -> [f32; 3] {
    let size = CHUNK_SIZE as f32;
    [pos.x as f32 * size, pos.y as f32 * size, pos.z as f32 * size]
}

/// Meshes one pass.
///
/// # Errors
///
/// Returns [`terrastream_core::StreamError::LightMismatch`] if `light` does
/// not have one entry per face of `surface`.
pub fn build_mesh(
    pos: ChunkCoord,
    surface: &Surface,
    light: &LightMap,
    materials: &MaterialRegistry,
) -> StreamResult<TerrainMesh> {
    check_aligned(pos, surface, light)?;

    let origin = chunk_origin(pos);
    let mut mesh = TerrainMesh::default();
    let mut lights = light.values.iter().copied();

    for record in surface.iter() {
        let FaceRecord { pos: voxel, dirs, material } = *record;
        let def = materials.get(material);

        if def.is_custom() && record.is_custom() {
            let mut values = [Light::default(); 6];
            for value in &mut values {
                *value = lights.next().unwrap_or_default();
            }
            mesh.custom.push(CustomBlockInstance {
                pos: voxel,
                model: def.model,
                light: values,
            });
            continue;
        }

        for dir in Direction::ALL {
            if dirs & dir.bit() == 0 {
                continue;
            }
            let value = lights.next().unwrap_or_default();
            mesh.add_face(origin, voxel, dir, def.textures[dir.index()], value);
        }
    }
    Ok(mesh)
}

/// Meshes both passes of a chunk.
///
/// # Errors
///
/// Returns [`terrastream_core::StreamError::LightMismatch`] if either light
/// map is misaligned with its surface.
pub fn build_meshes(
    pos: ChunkCoord,
    surface: &SurfaceData,
    light: &LightData,
    materials: &MaterialRegistry,
) -> StreamResult<MeshBuffers> {
    Ok(MeshBuffers {
        opaque: build_mesh(pos, &surface.opaque, &light.opaque, materials)?,
        transparent: build_mesh(pos, &surface.transparent, &light.transparent, materials)?,
    })
}
