//! # Border-Aware Surface Extraction
//!
//! Turns a chunk and its 6 neighbours into the compact list of faces that can
//! actually be seen.
//!
//! ## Passes
//!
//! ```text
//! opaque:      every non-air voxel that is not transparent
//!              custom model  -> one record, all 6 bits
//!              cube          -> bit d if neighbour d is not visually solid
//!
//! transparent: every transparent, non-custom voxel
//!              bit d if neighbour d has another material, is not visually
//!              solid, and shows a different texture on the shared face
//! ```
//!
//! Voxels are visited in index order (x fastest, then y, then z), so the same
//! input always yields the same record sequence.

use crate::coords::{Direction, VoxelPos, ALL_FACES, VOXELS_PER_CHUNK};
use crate::material::{MaterialId, MaterialRegistry};
use crate::neighborhood::Neighborhood;

/// One voxel's visible faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FaceRecord {
    /// Voxel position inside the chunk.
    pub pos: VoxelPos,
    /// Visible direction bits (see [`Direction::bit`]).
    pub dirs: u8,
    /// Voxel material.
    pub material: MaterialId,
}

impl FaceRecord {
    /// Encoded size in bytes: material u16, 3 position bytes, dirs byte.
    pub const SIZE: usize = 6;

    /// Creates a new record.
    #[inline]
    #[must_use]
    pub const fn new(pos: VoxelPos, dirs: u8, material: MaterialId) -> Self {
        Self { pos, dirs, material }
    }

    /// Number of visible faces in this record.
    #[inline]
    #[must_use]
    pub const fn face_count(&self) -> usize {
        self.dirs.count_ones() as usize
    }

    /// Returns true for a custom-model record.
    #[inline]
    #[must_use]
    pub const fn is_custom(&self) -> bool {
        self.dirs == ALL_FACES
    }
}

/// Ordered list of face records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Surface {
    /// Records in extraction order.
    pub records: Vec<FaceRecord>,
}

impl Surface {
    /// Creates an empty surface.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Number of face records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no faces are visible.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterator over records.
    pub fn iter(&self) -> std::slice::Iter<'_, FaceRecord> {
        self.records.iter()
    }
}

impl From<Vec<FaceRecord>> for Surface {
    fn from(records: Vec<FaceRecord>) -> Self {
        Self { records }
    }
}

/// Opaque and transparent surfaces of one chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SurfaceData {
    /// Opaque faces (drawn near to far).
    pub opaque: Surface,
    /// Transparent faces (drawn far to near).
    pub transparent: Surface,
}

impl SurfaceData {
    /// Returns true if neither pass has faces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty()
    }
}

/// Number of individual faces in a surface: the sum of set direction bits.
/// Light maps must have exactly this many entries.
#[must_use]
pub fn count_faces(surface: &Surface) -> usize {
    surface.records.iter().map(FaceRecord::face_count).sum()
}

/// Extracts the opaque surface of the centre chunk.
#[must_use]
pub fn extract_opaque_surface(hood: &Neighborhood, materials: &MaterialRegistry) -> Surface {
    let center = hood.center();
    if center.is_empty() {
        return Surface::new();
    }

    let mut records = Vec::new();
    for index in 0..VOXELS_PER_CHUNK {
        let material = center.get_index(index);
        if material.is_air() {
            continue;
        }
        let pos = VoxelPos::from_index(index);

        if materials.is_custom(material) {
            records.push(FaceRecord::new(pos, ALL_FACES, material));
            continue;
        }
        if materials.is_transparent(material) {
            continue;
        }

        let mut dirs = 0u8;
        for dir in Direction::ALL {
            if !materials.is_visually_solid(hood.adjacent(pos, dir)) {
                dirs |= dir.bit();
            }
        }
        if dirs != 0 {
            records.push(FaceRecord::new(pos, dirs, material));
        }
    }
    Surface::from(records)
}

/// Extracts the transparent surface of the centre chunk.
#[must_use]
pub fn extract_transparent_surface(hood: &Neighborhood, materials: &MaterialRegistry) -> Surface {
    let center = hood.center();
    if center.is_empty() {
        return Surface::new();
    }

    let mut records = Vec::new();
    for index in 0..VOXELS_PER_CHUNK {
        let material = center.get_index(index);
        if material.is_air() || !materials.is_transparent(material) || materials.is_custom(material) {
            continue;
        }
        let pos = VoxelPos::from_index(index);
        let def = materials.get(material);

        let mut dirs = 0u8;
        for dir in Direction::ALL {
            let other = hood.adjacent(pos, dir);
            if other == material || materials.is_visually_solid(other) {
                continue;
            }
            if def.textures[dir.index()] != materials.texture(other, dir.opposite().index()) {
                dirs |= dir.bit();
            }
        }
        if dirs != 0 {
            records.push(FaceRecord::new(pos, dirs, material));
        }
    }
    Surface::from(records)
}

/// Extracts both passes.
#[must_use]
pub fn extract_surface_data(hood: &Neighborhood, materials: &MaterialRegistry) -> SurfaceData {
    SurfaceData {
        opaque: extract_opaque_surface(hood, materials),
        transparent: extract_transparent_surface(hood, materials),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::coords::ChunkCoord;
    use crate::material::defaults::{GLASS, STONE, TORCH, WATER};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn hood_with(center: Chunk, extra: Vec<Chunk>) -> Neighborhood {
        let pos = center.coord;
        let mut chunks: HashMap<ChunkCoord, Arc<Chunk>> = HashMap::new();
        chunks.insert(pos, Arc::new(center));
        for chunk in extra {
            chunks.insert(chunk.coord, Arc::new(chunk));
        }
        Neighborhood::gather(pos, |p| {
            Some(chunks.get(&p).cloned().unwrap_or_else(|| Arc::new(Chunk::new(p))))
        })
        .expect("complete neighbourhood")
    }

    #[test]
    fn test_single_voxel_on_corner_has_six_faces() {
        let materials = MaterialRegistry::with_defaults();
        let pos = ChunkCoord::new(0, 0, 0);
        let mut chunk = Chunk::new(pos);
        chunk.set(VoxelPos::new(15, 0, 15), STONE);
        let surface = extract_opaque_surface(&hood_with(chunk, vec![]), &materials);

        assert_eq!(surface.len(), 1);
        assert_eq!(surface.records[0].dirs, ALL_FACES);
        assert_eq!(count_faces(&surface), 6);
    }

    #[test]
    fn test_border_faces_hidden_by_neighbour() {
        let materials = MaterialRegistry::with_defaults();
        let pos = ChunkCoord::new(0, 0, 0);
        let mut chunk = Chunk::new(pos);
        chunk.set(VoxelPos::new(15, 3, 3), STONE);
        let mut east = Chunk::new(pos.neighbor(Direction::East));
        east.set(VoxelPos::new(0, 3, 3), STONE);

        let surface = extract_opaque_surface(&hood_with(chunk, vec![east]), &materials);
        assert_eq!(surface.len(), 1);
        assert_eq!(surface.records[0].dirs, ALL_FACES & !Direction::East.bit());
    }

    #[test]
    fn test_full_chunk_only_shows_exposed_sides() {
        let materials = MaterialRegistry::with_defaults();
        let pos = ChunkCoord::new(0, 0, 0);
        let chunk = Chunk::filled(pos, STONE);
        let below = Chunk::filled(pos.neighbor(Direction::Down), STONE);
        let surface = extract_opaque_surface(&hood_with(chunk, vec![below]), &materials);
        // top layer + 4 side walls, bottom hidden
        let expected_faces = 16 * 16 * 5;
        assert_eq!(count_faces(&surface), expected_faces);
        assert!(surface.iter().all(|r| r.dirs & Direction::Down.bit() == 0));
    }

    #[test]
    fn test_custom_model_gets_all_bits() {
        let materials = MaterialRegistry::with_defaults();
        let pos = ChunkCoord::new(0, 0, 0);
        let mut chunk = Chunk::filled(pos, STONE);
        chunk.set(VoxelPos::new(5, 5, 5), TORCH);
        let data = extract_surface_data(&hood_with(chunk, vec![]), &materials);
        let torch: Vec<_> = data.opaque.iter().filter(|r| r.material == TORCH).collect();
        assert_eq!(torch.len(), 1);
        assert!(torch[0].is_custom());
        assert!(data.transparent.is_empty());
    }

    #[test]
    fn test_transparent_pass() {
        let materials = MaterialRegistry::with_defaults();
        let pos = ChunkCoord::new(0, 0, 0);
        let mut chunk = Chunk::new(pos);
        // Water next to water: the shared face disappears.
        chunk.set(VoxelPos::new(4, 4, 4), WATER);
        chunk.set(VoxelPos::new(5, 4, 4), WATER);
        // Glass next to water: distinct textures, both faces stay.
        chunk.set(VoxelPos::new(6, 4, 4), GLASS);
        // Stone below the first water voxel hides its bottom face.
        chunk.set(VoxelPos::new(4, 4, 3), STONE);

        let data = extract_surface_data(&hood_with(chunk, vec![]), &materials);
        let records = &data.transparent.records;
        assert_eq!(records.len(), 3);
        let first = records[0];
        assert_eq!(first.pos, VoxelPos::new(4, 4, 4));
        assert_eq!(first.dirs & Direction::East.bit(), 0);
        assert_eq!(first.dirs & Direction::Down.bit(), 0);
        assert_ne!(first.dirs & Direction::West.bit(), 0);
        let second = records[1];
        assert_ne!(second.dirs & Direction::East.bit(), 0);
        let glass = records[2];
        assert_ne!(glass.dirs & Direction::West.bit(), 0);
        // The stone's top face is visible through the water.
        let stone = data.opaque.iter().find(|r| r.material == STONE).expect("stone");
        assert_ne!(stone.dirs & Direction::Up.bit(), 0);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let materials = MaterialRegistry::with_defaults();
        let pos = ChunkCoord::new(2, -1, 0);
        let mut chunk = Chunk::new(pos);
        for i in 0..16u8 {
            chunk.set(VoxelPos::new(i, (i * 3) % 16, (i * 7) % 16), STONE);
            chunk.set(VoxelPos::new((i * 5) % 16, i, 8), WATER);
        }
        let hood = hood_with(chunk, vec![]);
        assert_eq!(
            extract_surface_data(&hood, &materials),
            extract_surface_data(&hood, &materials)
        );
    }

    #[test]
    fn test_empty_chunk() {
        let materials = MaterialRegistry::with_defaults();
        let data = extract_surface_data(&hood_with(Chunk::new(ChunkCoord::new(0, 0, 0)), vec![]), &materials);
        assert!(data.is_empty());
    }
}
