//! # Material Registry
//!
//! Per-material properties needed by surface extraction and meshing:
//! transparency, custom (non-cuboid) models and per-face texture indices.
//! The registry is built once and shared behind an `Arc`; it is never global.

use bytemuck::{Pod, Zeroable};

/// Material ID (16-bit). Stored directly in chunk voxels.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct MaterialId(pub u16);

impl MaterialId {
    /// Air (always ID 0).
    pub const AIR: Self = Self(0);

    /// Creates a new material ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw ID.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Returns true for air.
    #[inline]
    #[must_use]
    pub const fn is_air(self) -> bool {
        self.0 == 0
    }
}

/// Material definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialDef {
    /// Texture index per face direction (bit order).
    pub textures: [u16; 6],
    /// Render flags.
    pub flags: u32,
    /// Model index for custom materials.
    pub model: u16,
}

impl MaterialDef {
    /// Render flag: transparent (water, glass).
    pub const FLAG_TRANSPARENT: u32 = 1 << 0;
    /// Render flag: drawn with a custom model instead of cube faces.
    pub const FLAG_CUSTOM_MODEL: u32 = 1 << 1;

    /// Opaque cube using `texture` on every face.
    #[must_use]
    pub const fn solid(texture: u16) -> Self {
        Self {
            textures: [texture; 6],
            flags: 0,
            model: 0,
        }
    }

    /// Opaque cube with distinct top, side and bottom textures.
    #[must_use]
    pub const fn solid_sided(top: u16, side: u16, bottom: u16) -> Self {
        Self {
            textures: [side, side, side, side, top, bottom],
            flags: 0,
            model: 0,
        }
    }

    /// Transparent cube.
    #[must_use]
    pub const fn transparent(texture: u16) -> Self {
        Self {
            textures: [texture; 6],
            flags: Self::FLAG_TRANSPARENT,
            model: 0,
        }
    }

    /// Custom model (torches, plants, slabs).
    #[must_use]
    pub const fn custom(model: u16, texture: u16) -> Self {
        Self {
            textures: [texture; 6],
            flags: Self::FLAG_CUSTOM_MODEL,
            model,
        }
    }

    /// Returns true if transparent.
    #[inline]
    #[must_use]
    pub const fn is_transparent(&self) -> bool {
        self.flags & Self::FLAG_TRANSPARENT != 0
    }

    /// Returns true if drawn with a custom model.
    #[inline]
    #[must_use]
    pub const fn is_custom(&self) -> bool {
        self.flags & Self::FLAG_CUSTOM_MODEL != 0
    }
}

/// Registry of material definitions indexed by [`MaterialId`].
///
/// Unknown IDs behave like an opaque cube with texture 0.
#[derive(Debug, Clone)]
pub struct MaterialRegistry {
    defs: Vec<MaterialDef>,
}

const UNKNOWN: MaterialDef = MaterialDef::solid(0);

impl MaterialRegistry {
    /// Creates a registry containing only air.
    #[must_use]
    pub fn new() -> Self {
        Self {
            defs: vec![MaterialDef::transparent(0)],
        }
    }

    /// Registers a material, returning its ID. IDs saturate at `u16::MAX`.
    pub fn register(&mut self, def: MaterialDef) -> MaterialId {
        let id = u16::try_from(self.defs.len()).unwrap_or(u16::MAX);
        self.defs.push(def);
        MaterialId(id)
    }

    /// Replaces the definition of `id`, growing the table if needed.
    pub fn set(&mut self, id: MaterialId, def: MaterialDef) {
        let index = id.raw() as usize;
        if index == 0 {
            return;
        }
        if self.defs.len() <= index {
            self.defs.resize(index + 1, UNKNOWN);
        }
        self.defs[index] = def;
    }

    /// Definition of `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: MaterialId) -> &MaterialDef {
        self.defs.get(id.raw() as usize).unwrap_or(&UNKNOWN)
    }

    /// Texture used by `id` on the face pointing in direction bit `dir`.
    #[inline]
    #[must_use]
    pub fn texture(&self, id: MaterialId, dir: usize) -> u16 {
        self.get(id).textures[dir]
    }

    /// Returns true if `id` is transparent (air counts as transparent).
    #[inline]
    #[must_use]
    pub fn is_transparent(&self, id: MaterialId) -> bool {
        id.is_air() || self.get(id).is_transparent()
    }

    /// Returns true if `id` uses a custom model.
    #[inline]
    #[must_use]
    pub fn is_custom(&self, id: MaterialId) -> bool {
        !id.is_air() && self.get(id).is_custom()
    }

    /// Returns true if `id` hides the faces of its neighbours.
    #[inline]
    #[must_use]
    pub fn is_visually_solid(&self, id: MaterialId) -> bool {
        if id.is_air() {
            return false;
        }
        let def = self.get(id);
        !def.is_transparent() && !def.is_custom()
    }

    /// Number of registered materials, air included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Always false: air is always registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Small palette used by the reference terrain, tests and benches:
    /// 1 stone, 2 dirt, 3 grass, 4 water, 5 glass, 6 torch.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(MaterialDef::solid(1));
        registry.register(MaterialDef::solid(2));
        registry.register(MaterialDef::solid_sided(3, 4, 2));
        registry.register(MaterialDef::transparent(5));
        registry.register(MaterialDef::transparent(6));
        registry.register(MaterialDef::custom(1, 7));
        registry
    }
}

impl Default for MaterialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-known IDs of [`MaterialRegistry::with_defaults`].
pub mod defaults {
    use super::MaterialId;

    /// Stone.
    pub const STONE: MaterialId = MaterialId(1);
    /// Dirt.
    pub const DIRT: MaterialId = MaterialId(2);
    /// Grass.
    pub const GRASS: MaterialId = MaterialId(3);
    /// Water.
    pub const WATER: MaterialId = MaterialId(4);
    /// Glass.
    pub const GLASS: MaterialId = MaterialId(5);
    /// Torch.
    pub const TORCH: MaterialId = MaterialId(6);
}

#[cfg(test)]
mod tests {
    use super::defaults::*;
    use super::*;

    #[test]
    fn test_default_palette() {
        let registry = MaterialRegistry::with_defaults();
        assert_eq!(registry.len(), 7);
        assert!(registry.is_visually_solid(STONE));
        assert!(!registry.is_visually_solid(MaterialId::AIR));
        assert!(!registry.is_visually_solid(WATER));
        assert!(!registry.is_visually_solid(TORCH));
        assert!(registry.is_transparent(GLASS));
        assert!(registry.is_custom(TORCH));
        assert_eq!(registry.texture(GRASS, 4), 3);
        assert_eq!(registry.texture(GRASS, 0), 4);
        assert_eq!(registry.texture(GRASS, 5), 2);
    }

    #[test]
    fn test_unknown_is_opaque() {
        let registry = MaterialRegistry::new();
        assert!(registry.is_visually_solid(MaterialId(999)));
        assert_eq!(registry.texture(MaterialId(999), 3), 0);
    }

    #[test]
    fn test_set_grows() {
        let mut registry = MaterialRegistry::new();
        registry.set(MaterialId(10), MaterialDef::transparent(9));
        assert_eq!(registry.len(), 11);
        assert!(registry.is_transparent(MaterialId(10)));
        assert!(registry.is_visually_solid(MaterialId(5)));
    }
}
