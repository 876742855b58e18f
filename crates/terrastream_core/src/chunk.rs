//! # Chunk
//!
//! Dense 16x16x16 voxel grid. Chunks live on the server only; clients never
//! see raw voxels, only the surfaces derived from them.
//!
//! ## Storage
//!
//! Chunks persist as LZ4-compressed little-endian `u16` material IDs,
//! indexed x fastest, then y, then z.

use bytemuck::Zeroable;
use lz4_flex::compress_prepend_size;

use crate::codec::decompress_bounded;
use crate::coords::{ChunkCoord, VoxelPos, CHUNK_SIZE, VOXELS_PER_CHUNK};
use crate::error::{StreamError, StreamResult};
use crate::material::MaterialId;

/// A chunk of world data.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk position in the world.
    pub coord: ChunkCoord,
    voxels: Box<[MaterialId; VOXELS_PER_CHUNK]>,
    solid_count: u32,
}

impl Chunk {
    /// Creates an all-air chunk.
    #[must_use]
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            voxels: Box::new([MaterialId::zeroed(); VOXELS_PER_CHUNK]),
            solid_count: 0,
        }
    }

    /// Creates a chunk filled with `material`.
    #[must_use]
    pub fn filled(coord: ChunkCoord, material: MaterialId) -> Self {
        let solid_count = if material.is_air() {
            0
        } else {
            VOXELS_PER_CHUNK as u32
        };
        Self {
            coord,
            voxels: Box::new([material; VOXELS_PER_CHUNK]),
            solid_count,
        }
    }

    /// Material at a local position.
    #[inline]
    #[must_use]
    pub fn get(&self, pos: VoxelPos) -> MaterialId {
        self.voxels[pos.index()]
    }

    /// Material at a linear index.
    #[inline]
    #[must_use]
    pub fn get_index(&self, index: usize) -> MaterialId {
        self.voxels[index]
    }

    /// Material at signed local coordinates; out-of-range reads return air.
    #[inline]
    #[must_use]
    pub fn get_local(&self, x: i32, y: i32, z: i32) -> MaterialId {
        let size = CHUNK_SIZE as i32;
        if (0..size).contains(&x) && (0..size).contains(&y) && (0..size).contains(&z) {
            #[allow(clippy::cast_sign_loss)]
            let index = x as usize + y as usize * CHUNK_SIZE + z as usize * CHUNK_SIZE * CHUNK_SIZE;
            self.voxels[index]
        } else {
            MaterialId::AIR
        }
    }

    /// Sets a voxel. Returns the previous material.
    #[inline]
    pub fn set(&mut self, pos: VoxelPos, material: MaterialId) -> MaterialId {
        let slot = &mut self.voxels[pos.index()];
        let old = *slot;
        *slot = material;
        match (old.is_air(), material.is_air()) {
            (true, false) => self.solid_count += 1,
            (false, true) => self.solid_count -= 1,
            _ => {}
        }
        old
    }

    /// Returns true if every voxel is air.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.solid_count == 0
    }

    /// Number of non-air voxels.
    #[inline]
    #[must_use]
    pub const fn solid_count(&self) -> u32 {
        self.solid_count
    }

    /// Raw voxel slice in index order.
    #[must_use]
    pub fn voxels(&self) -> &[MaterialId] {
        self.voxels.as_slice()
    }

    /// Serializes and compresses the voxels.
    #[must_use]
    pub fn compress(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(VOXELS_PER_CHUNK * 2);
        for voxel in self.voxels.iter() {
            raw.extend_from_slice(&voxel.raw().to_le_bytes());
        }
        compress_prepend_size(&raw)
    }

    /// Inverse of [`Chunk::compress`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] on corrupt or truncated data.
    pub fn decompress(coord: ChunkCoord, bytes: &[u8]) -> StreamResult<Self> {
        let raw = decompress_bounded(bytes, VOXELS_PER_CHUNK * 2)
            .map_err(|e| match e {
                StreamError::Decode(msg) => StreamError::Decode(format!("chunk {coord}: {msg}")),
                other => other,
            })?;
        if raw.len() != VOXELS_PER_CHUNK * 2 {
            return Err(StreamError::Decode(format!(
                "chunk {coord}: invalid voxel data size {}",
                raw.len()
            )));
        }
        let mut chunk = Self::new(coord);
        for (index, pair) in raw.chunks_exact(2).enumerate() {
            let material = MaterialId(u16::from_le_bytes([pair[0], pair[1]]));
            chunk.set(VoxelPos::from_index(index), material);
        }
        Ok(chunk)
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("coord", &self.coord)
            .field("solid_count", &self.solid_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_tracks_solid_count() {
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        assert!(chunk.is_empty());
        let pos = VoxelPos::new(3, 4, 5);
        assert_eq!(chunk.set(pos, MaterialId(2)), MaterialId::AIR);
        assert_eq!(chunk.set(pos, MaterialId(3)), MaterialId(2));
        assert_eq!(chunk.solid_count(), 1);
        assert_eq!(chunk.get(pos), MaterialId(3));
        chunk.set(pos, MaterialId::AIR);
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_get_local_out_of_range_is_air() {
        let chunk = Chunk::filled(ChunkCoord::new(0, 0, 0), MaterialId(1));
        assert_eq!(chunk.get_local(0, 0, 0), MaterialId(1));
        assert_eq!(chunk.get_local(-1, 0, 0), MaterialId::AIR);
        assert_eq!(chunk.get_local(0, 16, 0), MaterialId::AIR);
    }

    #[test]
    fn test_compression() {
        let coord = ChunkCoord::new(1, 2, 3);
        let mut chunk = Chunk::new(coord);
        for x in 0..16 {
            chunk.set(VoxelPos::new(x, x, 0), MaterialId(u16::from(x) + 1));
        }
        let bytes = chunk.compress();
        assert!(bytes.len() < VOXELS_PER_CHUNK * 2);
        let loaded = Chunk::decompress(coord, &bytes).expect("decompress");
        assert_eq!(loaded, chunk);
        assert_eq!(loaded.solid_count(), 16);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let coord = ChunkCoord::new(0, 0, 0);
        assert!(Chunk::decompress(coord, &[1, 2, 3]).is_err());
        let short = compress_prepend_size(&[0u8; 10]);
        assert!(matches!(
            Chunk::decompress(coord, &short),
            Err(StreamError::Decode(_))
        ));

        // Size prefix far beyond one chunk of voxels.
        let huge = [0xff, 0xff, 0xff, 0x7f, 0x10, 0x41];
        let err = Chunk::decompress(coord, &huge).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");
    }
}
