//! # Payload Codec
//!
//! Compact little-endian encoding of surfaces and light maps, wrapped in LZ4.
//!
//! ## Layout
//!
//! ```text
//! SurfaceData:  [u32 n] n x FaceRecord   (opaque)
//!               [u32 m] m x FaceRecord   (transparent)
//! FaceRecord:   [u16 material][u8 x][u8 y][u8 z][u8 dirs]
//!
//! LightData:    [u16 phase]
//!               [u32 n] n x u16          (opaque)
//!               [u32 m] m x u16          (transparent)
//! ```
//!
//! [`CompressedData`] holds the LZ4 block with the uncompressed size prepended
//! (`u32`, little-endian). The prefix is checked against the largest valid
//! encoding before anything is allocated.

use lz4_flex::compress_prepend_size;

use crate::coords::{VoxelPos, ALL_FACES, CHUNK_SIZE};
use crate::error::{StreamError, StreamResult};
use crate::light::{Light, LightData, LightMap};
use crate::material::MaterialId;
use crate::surface::{FaceRecord, Surface, SurfaceData};

/// Upper bound on decoded element counts; a chunk cannot have more records.
const MAX_RECORDS: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;

/// Upper bound on decoded light entries (6 per record).
const MAX_LIGHTS: usize = MAX_RECORDS * 6;

/// Largest valid [`encode_surface_data`] output.
pub const MAX_SURFACE_BYTES: usize = 8 + 2 * MAX_RECORDS * FaceRecord::SIZE;

/// Largest valid [`encode_light_data`] output.
pub const MAX_LIGHT_BYTES: usize = 10 + 2 * MAX_LIGHTS * 2;

/// Decompresses a size-prepended LZ4 block whose declared size is at most `max`.
///
/// # Errors
///
/// [`StreamError::Decode`] for a missing or oversized prefix, a corrupt
/// block, or a block that does not fill its declared size.
pub fn decompress_bounded(bytes: &[u8], max: usize) -> StreamResult<Vec<u8>> {
    if bytes.len() < 4 {
        return Err(StreamError::Decode(format!("lz4: {} byte payload has no size prefix", bytes.len())));
    }
    let (prefix, block) = bytes.split_at(4);
    let size = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if size > max {
        return Err(StreamError::Decode(format!("lz4: declared size {size} exceeds {max}")));
    }
    let raw = lz4_flex::decompress(block, size).map_err(|e| StreamError::Decode(format!("lz4: {e}")))?;
    if raw.len() != size {
        return Err(StreamError::Decode(format!(
            "lz4: block holds {} bytes, declared {size}",
            raw.len()
        )));
    }
    Ok(raw)
}

/// LZ4-compressed payload with its uncompressed size prepended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompressedData(pub Vec<u8>);

impl CompressedData {
    /// Compresses raw bytes.
    #[must_use]
    pub fn compress(raw: &[u8]) -> Self {
        Self(compress_prepend_size(raw))
    }

    /// Decompresses to raw bytes, refusing blocks that declare more than `max`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] if the block is corrupt or too large.
    pub fn decompress(&self, max: usize) -> StreamResult<Vec<u8>> {
        decompress_bounded(&self.0, max)
    }

    /// Compresses a surface.
    #[must_use]
    pub fn from_surface(surface: &SurfaceData) -> Self {
        Self::compress(&encode_surface_data(surface))
    }

    /// Compresses light data.
    #[must_use]
    pub fn from_light(light: &LightData) -> Self {
        Self::compress(&encode_light_data(light))
    }

    /// Decompresses and decodes a surface.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] on corrupt data.
    pub fn to_surface(&self) -> StreamResult<SurfaceData> {
        decode_surface_data(&self.decompress(MAX_SURFACE_BYTES)?)
    }

    /// Decompresses and decodes light data.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Decode`] on corrupt data.
    pub fn to_light(&self) -> StreamResult<LightData> {
        decode_light_data(&self.decompress(MAX_LIGHT_BYTES)?)
    }

    /// Compressed size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for a zero-length payload.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> StreamResult<&'a [u8]> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(StreamError::Decode(format!(
                "truncated payload: need {end} bytes, have {}",
                self.data.len()
            )));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> StreamResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_count(&mut self, max: usize) -> StreamResult<usize> {
        let b = self.take(4)?;
        let n = u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize;
        if n > max {
            return Err(StreamError::Decode(format!("element count {n} exceeds {max}")));
        }
        Ok(n)
    }

    fn finish(&self) -> StreamResult<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(StreamError::Decode(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )))
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn write_count(out: &mut Vec<u8>, n: usize) {
    out.extend_from_slice(&(n as u32).to_le_bytes());
}

fn encode_surface(out: &mut Vec<u8>, surface: &Surface) {
    write_count(out, surface.len());
    for record in surface.iter() {
        out.extend_from_slice(&record.material.raw().to_le_bytes());
        out.extend_from_slice(&[record.pos.x, record.pos.y, record.pos.z, record.dirs]);
    }
}

fn decode_surface(reader: &mut Reader<'_>) -> StreamResult<Surface> {
    let n = reader.read_count(MAX_RECORDS)?;
    let mut records = Vec::with_capacity(n);
    for _ in 0..n {
        let material = MaterialId(reader.read_u16()?);
        let b = reader.take(4)?;
        let (x, y, z, dirs) = (b[0], b[1], b[2], b[3]);
        let size = CHUNK_SIZE as u8;
        if x >= size || y >= size || z >= size {
            return Err(StreamError::Decode(format!("voxel position ({x}, {y}, {z}) out of range")));
        }
        if dirs == 0 || dirs & !ALL_FACES != 0 {
            return Err(StreamError::Decode(format!("invalid face mask {dirs:#04x}")));
        }
        records.push(FaceRecord::new(VoxelPos::new(x, y, z), dirs, material));
    }
    Ok(Surface::from(records))
}

/// Encodes both passes of a surface.
#[must_use]
pub fn encode_surface_data(surface: &SurfaceData) -> Vec<u8> {
    let faces = surface.opaque.len() + surface.transparent.len();
    let mut out = Vec::with_capacity(8 + faces * FaceRecord::SIZE);
    encode_surface(&mut out, &surface.opaque);
    encode_surface(&mut out, &surface.transparent);
    out
}

/// Decodes [`encode_surface_data`] output.
///
/// # Errors
///
/// Returns [`StreamError::Decode`] on truncated data, out-of-range positions,
/// invalid face masks or trailing bytes.
pub fn decode_surface_data(bytes: &[u8]) -> StreamResult<SurfaceData> {
    let mut reader = Reader::new(bytes);
    let opaque = decode_surface(&mut reader)?;
    let transparent = decode_surface(&mut reader)?;
    reader.finish()?;
    Ok(SurfaceData { opaque, transparent })
}

fn encode_light_map(out: &mut Vec<u8>, map: &LightMap) {
    write_count(out, map.len());
    for light in &map.values {
        out.extend_from_slice(&light.0.to_le_bytes());
    }
}

fn decode_light_map(reader: &mut Reader<'_>) -> StreamResult<LightMap> {
    let n = reader.read_count(MAX_LIGHTS)?;
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(Light(reader.read_u16()?));
    }
    Ok(LightMap::new(values))
}

/// Encodes light data.
#[must_use]
pub fn encode_light_data(light: &LightData) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + (light.opaque.len() + light.transparent.len()) * 2);
    out.extend_from_slice(&light.phase.to_le_bytes());
    encode_light_map(&mut out, &light.opaque);
    encode_light_map(&mut out, &light.transparent);
    out
}

/// Decodes [`encode_light_data`] output.
///
/// # Errors
///
/// Returns [`StreamError::Decode`] on truncated data or trailing bytes.
pub fn decode_light_data(bytes: &[u8]) -> StreamResult<LightData> {
    let mut reader = Reader::new(bytes);
    let phase = reader.read_u16()?;
    let opaque = decode_light_map(&mut reader)?;
    let transparent = decode_light_map(&mut reader)?;
    reader.finish()?;
    Ok(LightData {
        opaque,
        transparent,
        phase,
    })
}
