//! # Coordinates
//!
//! Chunk, column and voxel addressing. `z` is the vertical axis everywhere.

use std::fmt;

/// Chunk edge length in voxels.
pub const CHUNK_SIZE: usize = 16;

/// Total voxels per chunk.
pub const VOXELS_PER_CHUNK: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

/// Chunk coordinate (identifies a 16x16x16 cube in the world grid).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    /// X coordinate (in chunks).
    pub x: i32,
    /// Y coordinate (in chunks).
    pub y: i32,
    /// Z coordinate (in chunks, vertical).
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Converts world voxel coordinates to the containing chunk.
    #[inline]
    #[must_use]
    pub const fn from_voxel(x: i32, y: i32, z: i32) -> Self {
        Self {
            x: x.div_euclid(CHUNK_SIZE as i32),
            y: y.div_euclid(CHUNK_SIZE as i32),
            z: z.div_euclid(CHUNK_SIZE as i32),
        }
    }

    /// Column this chunk belongs to.
    #[inline]
    #[must_use]
    pub const fn column(self) -> ColumnCoord {
        ColumnCoord::new(self.x, self.y)
    }

    /// Adjacent chunk in the given direction.
    #[inline]
    #[must_use]
    pub const fn neighbor(self, dir: Direction) -> Self {
        let (dx, dy, dz) = dir.offset();
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Returns `self + (dx, dy, dz)`.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Manhattan distance between two chunks.
    #[inline]
    #[must_use]
    pub const fn manhattan_distance(self, other: Self) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y) + self.z.abs_diff(other.z)
    }

    /// Iterator over the 6 axis-adjacent chunks, in direction order.
    pub fn neighbors(self) -> impl Iterator<Item = (Direction, Self)> {
        Direction::ALL.into_iter().map(move |d| (d, self.neighbor(d)))
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Column coordinate (a vertical stack of chunks).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnCoord {
    /// X coordinate (in chunks).
    pub x: i32,
    /// Y coordinate (in chunks).
    pub y: i32,
}

impl ColumnCoord {
    /// Creates a new column coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chunk at height `z` in this column.
    #[inline]
    #[must_use]
    pub const fn chunk(self, z: i32) -> ChunkCoord {
        ChunkCoord::new(self.x, self.y, z)
    }
}

impl fmt::Display for ColumnCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The six axis directions. Discriminants are the face bit indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// +x
    East = 0,
    /// -x
    West = 1,
    /// +y
    North = 2,
    /// -y
    South = 3,
    /// +z
    Up = 4,
    /// -z
    Down = 5,
}

impl Direction {
    /// All directions in bit order.
    pub const ALL: [Self; 6] = [
        Self::East,
        Self::West,
        Self::North,
        Self::South,
        Self::Up,
        Self::Down,
    ];

    /// Direction from its bit index.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::East),
            1 => Some(Self::West),
            2 => Some(Self::North),
            3 => Some(Self::South),
            4 => Some(Self::Up),
            5 => Some(Self::Down),
            _ => None,
        }
    }

    /// Bit index (0..6).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Face mask bit.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Opposite direction (`index ^ 1`).
    #[inline]
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::East => Self::West,
            Self::West => Self::East,
            Self::North => Self::South,
            Self::South => Self::North,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// Unit offset.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> (i32, i32, i32) {
        match self {
            Self::East => (1, 0, 0),
            Self::West => (-1, 0, 0),
            Self::North => (0, 1, 0),
            Self::South => (0, -1, 0),
            Self::Up => (0, 0, 1),
            Self::Down => (0, 0, -1),
        }
    }
}

/// Mask with all six face bits set.
pub const ALL_FACES: u8 = 0x3f;

/// Position of a voxel inside its chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VoxelPos {
    /// X (0..16).
    pub x: u8,
    /// Y (0..16).
    pub y: u8,
    /// Z (0..16).
    pub z: u8,
}

impl VoxelPos {
    /// Creates a new local voxel position.
    #[inline]
    #[must_use]
    pub const fn new(x: u8, y: u8, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Linear index into a chunk's voxel array (x fastest, then y, then z).
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.x as usize + self.y as usize * CHUNK_SIZE + self.z as usize * CHUNK_SIZE * CHUNK_SIZE
    }

    /// Inverse of [`VoxelPos::index`].
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_index(index: usize) -> Self {
        Self {
            x: (index % CHUNK_SIZE) as u8,
            y: ((index / CHUNK_SIZE) % CHUNK_SIZE) as u8,
            z: (index / (CHUNK_SIZE * CHUNK_SIZE)) as u8,
        }
    }
}

/// Coarse terrain height of a column, in chunks.
///
/// A defined height is one past the topmost non-air chunk; everything at or
/// above it is air.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CoarseHeight(pub i32);

impl CoarseHeight {
    /// Height not known yet.
    pub const UNDEFINED: Self = Self(i32::MIN);

    /// Creates a defined height.
    #[inline]
    #[must_use]
    pub const fn new(height: i32) -> Self {
        Self(height)
    }

    /// Returns true unless this is the sentinel.
    #[inline]
    #[must_use]
    pub const fn is_defined(self) -> bool {
        self.0 != i32::MIN
    }

    /// Returns the height if defined.
    #[inline]
    #[must_use]
    pub const fn get(self) -> Option<i32> {
        if self.is_defined() {
            Some(self.0)
        } else {
            None
        }
    }

    /// True when the height is defined and `pos` lies at or above it.
    #[inline]
    #[must_use]
    pub const fn is_air_chunk(self, pos: ChunkCoord) -> bool {
        self.is_defined() && pos.z >= self.0
    }
}

impl Default for CoarseHeight {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl fmt::Display for CoarseHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(h) => write!(f, "{h}"),
            None => f.write_str("undefined"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposites() {
        for dir in Direction::ALL {
            assert_eq!(dir.opposite().index(), dir.index() ^ 1);
            assert_eq!(dir.opposite().opposite(), dir);
            let (x, y, z) = dir.offset();
            let (ox, oy, oz) = dir.opposite().offset();
            assert_eq!((x + ox, y + oy, z + oz), (0, 0, 0));
        }
    }

    #[test]
    fn test_manhattan_distance() {
        let a = ChunkCoord::new(0, 0, 0);
        assert_eq!(a.manhattan_distance(ChunkCoord::new(1, -2, 3)), 6);
        assert_eq!(a.manhattan_distance(a), 0);
        let far = ChunkCoord::new(i32::MAX, 0, 0);
        assert_eq!(ChunkCoord::new(-1, 0, 0).manhattan_distance(far), 1 << 31);
    }

    #[test]
    fn test_from_voxel_negative() {
        assert_eq!(ChunkCoord::from_voxel(-1, 15, 16), ChunkCoord::new(-1, 0, 1));
    }

    #[test]
    fn test_voxel_index_roundtrip() {
        for index in [0, 1, 15, 16, 255, 256, VOXELS_PER_CHUNK - 1] {
            assert_eq!(VoxelPos::from_index(index).index(), index);
        }
        assert_eq!(VoxelPos::new(1, 2, 3).index(), 1 + 2 * 16 + 3 * 256);
    }

    #[test]
    fn test_air_chunk() {
        let col = ColumnCoord::new(4, 4);
        assert!(!CoarseHeight::UNDEFINED.is_air_chunk(col.chunk(100)));
        let h = CoarseHeight::new(3);
        assert!(!h.is_air_chunk(col.chunk(2)));
        assert!(h.is_air_chunk(col.chunk(3)));
        assert!(h.is_air_chunk(col.chunk(9)));
        assert_eq!(CoarseHeight::default(), CoarseHeight::UNDEFINED);
    }
}
