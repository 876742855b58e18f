//! Consistent snapshot of a chunk and its 6 axis neighbours.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::coords::{ChunkCoord, Direction, VoxelPos, CHUNK_SIZE};
use crate::error::{StreamError, StreamResult};
use crate::material::MaterialId;

/// A chunk plus its 6 neighbours, in direction order.
///
/// All 7 chunks are shared handles taken at the same instant, so later edits
/// to the world never show up halfway through an extraction.
#[derive(Clone, Debug)]
pub struct Neighborhood {
    center: Arc<Chunk>,
    neighbors: [Arc<Chunk>; 6],
}

impl Neighborhood {
    /// Builds a snapshot around `pos` using `lookup` for each of the 7 chunks.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::IncompleteNeighborhood`] if any chunk is missing.
    pub fn gather<F>(pos: ChunkCoord, mut lookup: F) -> StreamResult<Self>
    where
        F: FnMut(ChunkCoord) -> Option<Arc<Chunk>>,
    {
        let missing = || StreamError::IncompleteNeighborhood(pos);
        let center = lookup(pos).ok_or_else(missing)?;
        let east = lookup(pos.neighbor(Direction::East)).ok_or_else(missing)?;
        let west = lookup(pos.neighbor(Direction::West)).ok_or_else(missing)?;
        let north = lookup(pos.neighbor(Direction::North)).ok_or_else(missing)?;
        let south = lookup(pos.neighbor(Direction::South)).ok_or_else(missing)?;
        let up = lookup(pos.neighbor(Direction::Up)).ok_or_else(missing)?;
        let down = lookup(pos.neighbor(Direction::Down)).ok_or_else(missing)?;
        Ok(Self {
            center,
            neighbors: [east, west, north, south, up, down],
        })
    }

    /// Position of the centre chunk.
    #[inline]
    #[must_use]
    pub fn pos(&self) -> ChunkCoord {
        self.center.coord
    }

    /// The centre chunk.
    #[inline]
    #[must_use]
    pub fn center(&self) -> &Chunk {
        &self.center
    }

    /// Neighbour chunk in direction `dir`.
    #[inline]
    #[must_use]
    pub fn neighbor(&self, dir: Direction) -> &Chunk {
        &self.neighbors[dir.index()]
    }

    /// Material of the voxel adjacent to `pos` in direction `dir`, crossing
    /// into the neighbouring chunk when `pos` sits on the border.
    #[inline]
    #[must_use]
    pub fn adjacent(&self, pos: VoxelPos, dir: Direction) -> MaterialId {
        let (dx, dy, dz) = dir.offset();
        let x = i32::from(pos.x) + dx;
        let y = i32::from(pos.y) + dy;
        let z = i32::from(pos.z) + dz;
        let size = CHUNK_SIZE as i32;
        let inside = |v: i32| (0..size).contains(&v);
        if inside(x) && inside(y) && inside(z) {
            self.center.get_local(x, y, z)
        } else {
            self.neighbors[dir.index()].get_local(x.rem_euclid(size), y.rem_euclid(size), z.rem_euclid(size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_gather_requires_all_seven() {
        let pos = ChunkCoord::new(0, 0, 0);
        let mut chunks: HashMap<ChunkCoord, Arc<Chunk>> = HashMap::new();
        chunks.insert(pos, Arc::new(Chunk::new(pos)));
        for (_, n) in pos.neighbors().take(5) {
            chunks.insert(n, Arc::new(Chunk::new(n)));
        }
        let err = Neighborhood::gather(pos, |p| chunks.get(&p).cloned()).unwrap_err();
        assert!(matches!(err, StreamError::IncompleteNeighborhood(p) if p == pos));

        let down = pos.neighbor(Direction::Down);
        chunks.insert(down, Arc::new(Chunk::new(down)));
        assert!(Neighborhood::gather(pos, |p| chunks.get(&p).cloned()).is_ok());
    }

    #[test]
    fn test_adjacent_crosses_border() {
        let pos = ChunkCoord::new(0, 0, 0);
        let east = pos.neighbor(Direction::East);
        let mut east_chunk = Chunk::new(east);
        east_chunk.set(VoxelPos::new(0, 7, 9), MaterialId(4));
        let east_chunk = Arc::new(east_chunk);

        let hood = Neighborhood::gather(pos, |p| {
            if p == east {
                Some(Arc::clone(&east_chunk))
            } else {
                Some(Arc::new(Chunk::new(p)))
            }
        })
        .expect("complete");

        assert_eq!(hood.adjacent(VoxelPos::new(15, 7, 9), Direction::East), MaterialId(4));
        assert_eq!(hood.adjacent(VoxelPos::new(14, 7, 9), Direction::East), MaterialId::AIR);
        assert_eq!(hood.neighbor(Direction::East).coord, east);
    }
}
