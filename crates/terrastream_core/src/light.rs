//! # Light Data
//!
//! Per-face light values, index-aligned with the face expansion of a surface:
//! one entry per set direction bit, records in surface order, bits from low
//! to high. Custom-model records therefore own 6 consecutive entries.

use bytemuck::{Pod, Zeroable};

use crate::coords::ChunkCoord;
use crate::error::{StreamError, StreamResult};
use crate::neighborhood::Neighborhood;
use crate::surface::{count_faces, Surface, SurfaceData};

/// Packed light value: sunlight, ambient and artificial, 4 bits each.
///
/// ```text
/// bits  0..4   sunlight
/// bits  4..8   ambient occlusion
/// bits  8..12  artificial
/// bits 12..16  padding
/// ```
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Light(pub u16);

impl Light {
    /// Maximum component value.
    pub const MAX: u8 = 15;

    /// Packs three components; each is clamped to 0..=15.
    #[inline]
    #[must_use]
    pub const fn new(sunlight: u8, ambient: u8, artificial: u8) -> Self {
        let s = if sunlight > Self::MAX { Self::MAX } else { sunlight };
        let a = if ambient > Self::MAX { Self::MAX } else { ambient };
        let r = if artificial > Self::MAX { Self::MAX } else { artificial };
        Self(s as u16 | (a as u16) << 4 | (r as u16) << 8)
    }

    /// Sunlight component.
    #[inline]
    #[must_use]
    pub const fn sunlight(self) -> u8 {
        (self.0 & 0xf) as u8
    }

    /// Ambient component.
    #[inline]
    #[must_use]
    pub const fn ambient(self) -> u8 {
        ((self.0 >> 4) & 0xf) as u8
    }

    /// Artificial component.
    #[inline]
    #[must_use]
    pub const fn artificial(self) -> u8 {
        ((self.0 >> 8) & 0xf) as u8
    }
}

/// Light values for one surface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LightMap {
    /// One entry per face.
    pub values: Vec<Light>,
}

impl LightMap {
    /// Creates a map from values.
    #[must_use]
    pub const fn new(values: Vec<Light>) -> Self {
        Self { values }
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Opaque and transparent light maps of one chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LightData {
    /// Aligned with [`SurfaceData::opaque`].
    pub opaque: LightMap,
    /// Aligned with [`SurfaceData::transparent`].
    pub transparent: LightMap,
    /// Refinement phase of the lighting computation.
    pub phase: u16,
}

impl LightData {
    /// Checks that both maps have exactly one entry per face of `surface`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::LightMismatch`] on the first pass that disagrees.
    pub fn validate(&self, pos: ChunkCoord, surface: &SurfaceData) -> StreamResult<()> {
        check_aligned(pos, &surface.opaque, &self.opaque)?;
        check_aligned(pos, &surface.transparent, &self.transparent)
    }
}

/// Checks that `light` has one entry per face of `surface`.
///
/// # Errors
///
/// Returns [`StreamError::LightMismatch`] if the lengths differ.
pub fn check_aligned(pos: ChunkCoord, surface: &Surface, light: &LightMap) -> StreamResult<()> {
    let expected = count_faces(surface);
    if light.len() == expected {
        Ok(())
    } else {
        Err(StreamError::LightMismatch {
            pos,
            expected,
            actual: light.len(),
        })
    }
}

/// Computes light for an extracted surface.
///
/// Implementations must return maps aligned with `surface`.
pub trait LightGenerator: Send + Sync {
    /// Lights every face of `surface`.
    fn generate(&self, hood: &Neighborhood, surface: &SurfaceData) -> LightData;
}

/// Lights every face with the same value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformLight {
    /// Value assigned to each face.
    pub light: Light,
}

impl UniformLight {
    /// Creates a uniform generator.
    #[must_use]
    pub const fn new(sunlight: u8, ambient: u8, artificial: u8) -> Self {
        Self {
            light: Light::new(sunlight, ambient, artificial),
        }
    }

    /// Uniform map for one surface.
    #[must_use]
    pub fn map_for(&self, surface: &Surface) -> LightMap {
        LightMap::new(vec![self.light; count_faces(surface)])
    }
}

impl Default for UniformLight {
    fn default() -> Self {
        Self::new(Light::MAX, Light::MAX, 0)
    }
}

impl LightGenerator for UniformLight {
    fn generate(&self, _hood: &Neighborhood, surface: &SurfaceData) -> LightData {
        LightData {
            opaque: self.map_for(&surface.opaque),
            transparent: self.map_for(&surface.transparent),
            phase: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::VoxelPos;
    use crate::material::MaterialId;
    use crate::surface::FaceRecord;

    #[test]
    fn test_light_packing() {
        let light = Light::new(3, 9, 15);
        assert_eq!(light.sunlight(), 3);
        assert_eq!(light.ambient(), 9);
        assert_eq!(light.artificial(), 15);
        assert_eq!(light.0 >> 12, 0);
        assert_eq!(Light::new(200, 0, 0).sunlight(), 15);
    }

    #[test]
    fn test_validate_alignment() {
        let pos = ChunkCoord::new(0, 0, 0);
        let surface = SurfaceData {
            opaque: Surface::from(vec![
                FaceRecord::new(VoxelPos::new(0, 0, 0), 0b101, MaterialId(1)),
                FaceRecord::new(VoxelPos::new(1, 0, 0), 0x3f, MaterialId(6)),
            ]),
            transparent: Surface::new(),
        };
        let uniform = UniformLight::default();
        let light = LightData {
            opaque: uniform.map_for(&surface.opaque),
            transparent: LightMap::default(),
            phase: 0,
        };
        assert_eq!(light.opaque.len(), 8);
        assert!(light.validate(pos, &surface).is_ok());

        let mut broken = light;
        broken.opaque.values.pop();
        match broken.validate(pos, &surface) {
            Err(StreamError::LightMismatch { expected, actual, .. }) => {
                assert_eq!((expected, actual), (8, 7));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
