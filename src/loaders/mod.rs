//! Importers that populate a [`Scene`].
//!
//! File formats are handled behind the [`ProteinImporter`] and
//! [`MeshImporter`] traits; [`MolecularSystemReader`] places their output
//! according to a molecular system description.

pub mod gltf;
pub mod molecular;

pub use self::gltf::GltfMeshImporter;
pub use molecular::{ImportSummary, MolecularSystemReader, SystemConfiguration};

use std::path::Path;

use glam::{Mat4, Vec3};

use crate::scene::{MaterialId, Scene};

/// Where an imported object is placed: `vertex * scale + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub translation: Vec3,
    pub scale: Vec3,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Placement {
    pub fn new(translation: Vec3, scale: f32) -> Self {
        Self {
            translation,
            scale: Vec3::splat(scale),
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.translation) * Mat4::from_scale(self.scale)
    }
}

/// Loads one protein structure into the scene at a position.
pub trait ProteinImporter {
    /// `index` is the object index used for per-object colouring
    fn import_protein(&self, path: &Path, position: Vec3, index: usize, scene: &mut Scene) -> anyhow::Result<()>;
}

/// Loads one mesh file into the scene.
pub trait MeshImporter {
    /// File extension looked up in the mesh folder, without the dot
    fn extension(&self) -> &str;

    /// Returns the number of meshes appended. `material` is
    /// [`NO_MATERIAL`](crate::scene::NO_MATERIAL) when the file's own
    /// materials should be used.
    fn import_mesh(
        &self,
        path: &Path,
        placement: &Placement,
        material: MaterialId,
        scene: &mut Scene,
    ) -> anyhow::Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_scales_then_translates() {
        let placement = Placement::new(Vec3::new(1.0, 2.0, 3.0), 0.5);
        let p = placement.matrix().transform_point3(Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(p, Vec3::new(2.0, 3.0, 4.0));
    }
}
