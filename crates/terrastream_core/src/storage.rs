//! # Chunk Stores
//!
//! Persistent storage of compressed chunk payloads and column heights.
//! Stores are shared between threads behind `Arc<dyn ChunkStore>`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::codec::CompressedData;
use crate::coords::{ChunkCoord, CoarseHeight, ColumnCoord};
use crate::error::{StreamError, StreamResult};

/// Kind of payload kept per chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Compressed [`crate::surface::SurfaceData`].
    Surface,
    /// Compressed [`crate::light::LightData`].
    Light,
    /// Compressed raw voxels (server side only).
    Voxels,
}

impl DataKind {
    /// Directory / label name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Surface => "surface",
            Self::Light => "light",
            Self::Voxels => "voxels",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Load/save of chunk payloads and column heights.
pub trait ChunkStore: Send + Sync {
    /// Returns true if a payload of `kind` exists for `pos`.
    fn is_available(&self, kind: DataKind, pos: ChunkCoord) -> bool;

    /// Loads a payload.
    ///
    /// # Errors
    ///
    /// [`StreamError::MissingData`] if absent, [`StreamError::Io`] on failure.
    fn retrieve(&self, kind: DataKind, pos: ChunkCoord) -> StreamResult<CompressedData>;

    /// Saves a payload, replacing any previous one.
    ///
    /// # Errors
    ///
    /// [`StreamError::Io`] on failure.
    fn store(&self, kind: DataKind, pos: ChunkCoord, data: &CompressedData) -> StreamResult<()>;

    /// Returns true if a height is stored for `col`.
    fn is_height_available(&self, col: ColumnCoord) -> bool;

    /// Loads a column height.
    ///
    /// # Errors
    ///
    /// [`StreamError::MissingHeight`] if absent, [`StreamError::Io`] on failure.
    fn retrieve_height(&self, col: ColumnCoord) -> StreamResult<CoarseHeight>;

    /// Saves a column height.
    ///
    /// # Errors
    ///
    /// [`StreamError::Io`] on failure.
    fn store_height(&self, col: ColumnCoord, height: CoarseHeight) -> StreamResult<()>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    payloads: RwLock<HashMap<(DataKind, ChunkCoord), CompressedData>>,
    heights: RwLock<HashMap<ColumnCoord, CoarseHeight>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payloads.
    #[must_use]
    pub fn payload_count(&self) -> usize {
        self.payloads.read().len()
    }
}

impl ChunkStore for MemoryStore {
    fn is_available(&self, kind: DataKind, pos: ChunkCoord) -> bool {
        self.payloads.read().contains_key(&(kind, pos))
    }

    fn retrieve(&self, kind: DataKind, pos: ChunkCoord) -> StreamResult<CompressedData> {
        self.payloads
            .read()
            .get(&(kind, pos))
            .cloned()
            .ok_or(StreamError::MissingData { kind, pos })
    }

    fn store(&self, kind: DataKind, pos: ChunkCoord, data: &CompressedData) -> StreamResult<()> {
        self.payloads.write().insert((kind, pos), data.clone());
        Ok(())
    }

    fn is_height_available(&self, col: ColumnCoord) -> bool {
        self.heights.read().contains_key(&col)
    }

    fn retrieve_height(&self, col: ColumnCoord) -> StreamResult<CoarseHeight> {
        self.heights
            .read()
            .get(&col)
            .copied()
            .ok_or(StreamError::MissingHeight(col))
    }

    fn store_height(&self, col: ColumnCoord, height: CoarseHeight) -> StreamResult<()> {
        self.heights.write().insert(col, height);
        Ok(())
    }
}

/// Directory-backed store: one file per payload.
///
/// ```text
/// <root>/surface/<x>_<y>_<z>.lz4
/// <root>/light/<x>_<y>_<z>.lz4
/// <root>/voxels/<x>_<y>_<z>.lz4
/// <root>/heights/<x>_<y>.h      (i32 little endian)
/// ```
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Opens (and creates) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns error if the directories cannot be created.
    pub fn open(root: impl AsRef<Path>) -> StreamResult<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in [DataKind::Surface, DataKind::Light, DataKind::Voxels] {
            fs::create_dir_all(root.join(kind.name()))?;
        }
        fs::create_dir_all(root.join("heights"))?;
        tracing::debug!("Opened disk store at {}", root.display());
        Ok(Self { root })
    }

    fn payload_path(&self, kind: DataKind, pos: ChunkCoord) -> PathBuf {
        self.root
            .join(kind.name())
            .join(format!("{}_{}_{}.lz4", pos.x, pos.y, pos.z))
    }

    fn height_path(&self, col: ColumnCoord) -> PathBuf {
        self.root.join("heights").join(format!("{}_{}.h", col.x, col.y))
    }
}

impl ChunkStore for DiskStore {
    fn is_available(&self, kind: DataKind, pos: ChunkCoord) -> bool {
        self.payload_path(kind, pos).is_file()
    }

    fn retrieve(&self, kind: DataKind, pos: ChunkCoord) -> StreamResult<CompressedData> {
        match fs::read(self.payload_path(kind, pos)) {
            Ok(bytes) => Ok(CompressedData(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StreamError::MissingData { kind, pos }),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, kind: DataKind, pos: ChunkCoord, data: &CompressedData) -> StreamResult<()> {
        fs::write(self.payload_path(kind, pos), &data.0)?;
        Ok(())
    }

    fn is_height_available(&self, col: ColumnCoord) -> bool {
        self.height_path(col).is_file()
    }

    fn retrieve_height(&self, col: ColumnCoord) -> StreamResult<CoarseHeight> {
        let bytes = match fs::read(self.height_path(col)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StreamError::MissingHeight(col)),
            Err(e) => return Err(e.into()),
        };
        let raw: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StreamError::Decode(format!("height file for column {col} has {} bytes", bytes.len())))?;
        Ok(CoarseHeight(i32::from_le_bytes(raw)))
    }

    fn store_height(&self, col: ColumnCoord, height: CoarseHeight) -> StreamResult<()> {
        fs::write(self.height_path(col), height.0.to_le_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn ChunkStore) {
        let pos = ChunkCoord::new(-3, 4, 1);
        assert!(!store.is_available(DataKind::Surface, pos));
        assert!(matches!(
            store.retrieve(DataKind::Surface, pos),
            Err(StreamError::MissingData { kind: DataKind::Surface, .. })
        ));

        let data = CompressedData::compress(b"surface bytes");
        store.store(DataKind::Surface, pos, &data).expect("store");
        assert!(store.is_available(DataKind::Surface, pos));
        assert!(!store.is_available(DataKind::Light, pos));
        assert_eq!(store.retrieve(DataKind::Surface, pos).expect("retrieve"), data);

        let col = pos.column();
        assert!(matches!(store.retrieve_height(col), Err(StreamError::MissingHeight(_))));
        store.store_height(col, CoarseHeight::new(-2)).expect("height");
        assert!(store.is_height_available(col));
        assert_eq!(store.retrieve_height(col).expect("height"), CoarseHeight::new(-2));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        exercise(&store);
        assert_eq!(store.payload_count(), 1);
    }

    #[test]
    fn test_disk_store() {
        let dir = std::env::temp_dir().join(format!("terrastream_store_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let store = DiskStore::open(&dir).expect("open");
        exercise(&store);
        let _ = fs::remove_dir_all(&dir);
    }
}
