//! Device-side layouts shared by the backend adapters.

use crate::scene::{Light, LightKind, Material};

/// Material row uploaded to the material buffer
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuMaterial {
    pub diffuse: [f32; 3],
    pub opacity: f32,
    pub specular: [f32; 3],
    pub specular_exponent: f32,
    pub reflection: f32,
    pub refraction: f32,
    pub emission: f32,
    pub texture_slot: i32, // -1 when untextured
}

impl GpuMaterial {
    pub const NO_TEXTURE: i32 = -1;

    pub fn new(material: &Material, texture_slot: i32) -> Self {
        Self {
            diffuse: material.diffuse,
            opacity: material.opacity,
            specular: material.specular,
            specular_exponent: material.specular_exponent,
            reflection: material.reflection,
            refraction: material.refraction,
            emission: material.emission,
            texture_slot,
        }
    }

    /// Overwrites the numeric fields and keeps the texture binding
    pub fn update_numeric(&mut self, material: &Material) {
        *self = Self::new(material, self.texture_slot);
    }
}

/// Light row uploaded to the light buffer
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    pub vector: [f32; 3], // position (point) or direction (directional)
    pub kind: u32,        // 0 = point, 1 = directional
    pub radiance: [f32; 3],
    pub casts_shadow: u32,
}

impl From<&Light> for GpuLight {
    fn from(light: &Light) -> Self {
        let (vector, kind) = match light.kind {
            LightKind::Point { position } => (position, 0),
            LightKind::Directional { direction } => (direction, 1),
        };
        Self {
            vector: vector.to_array(),
            kind,
            radiance: light.radiance().to_array(),
            casts_shadow: light.casts_shadow as u32,
        }
    }
}

/// Interleaved mesh vertex
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub u: f32,
    pub normal: [f32; 3],
    pub v: f32,
}

/// One entry of the top-level geometry group
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuInstance {
    pub bounds_min: [f32; 3],
    pub kind: u32, // PrimitiveKind index, 3 = mesh
    pub bounds_max: [f32; 3],
    pub material: u32,
    pub visible: u32,
    pub capacity: u32,
    pub _pad: [u32; 2],
}

pub const MESH_INSTANCE_KIND: u32 = 3;

/// Per-frame scene parameters
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSceneUniform {
    pub bounds_min: [f32; 3],
    pub timestamp: f32,
    pub bounds_max: [f32; 3],
    pub light_count: u32,
    pub visible: [u32; 3], // per primitive kind
    pub triangles: u32,
}

/// Volume grid description
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuVolumeUniform {
    pub dimensions: [u32; 3],
    pub _pad0: u32,
    pub spacing: [f32; 3],
    pub _pad1: f32,
    pub offset: [f32; 3],
    pub _pad2: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_layouts_are_16_byte_multiples() {
        assert_eq!(std::mem::size_of::<GpuMaterial>(), 48);
        assert_eq!(std::mem::size_of::<GpuLight>(), 32);
        assert_eq!(std::mem::size_of::<GpuVertex>(), 32);
        assert_eq!(std::mem::size_of::<GpuInstance>(), 48);
        assert_eq!(std::mem::size_of::<GpuSceneUniform>(), 48);
        assert_eq!(std::mem::size_of::<GpuVolumeUniform>(), 48);
    }

    #[test]
    fn test_update_numeric_keeps_texture_slot() {
        let mut row = GpuMaterial::new(&Material::default(), 3);
        row.update_numeric(&Material::with_color([1.0, 0.0, 0.0]));
        assert_eq!(row.texture_slot, 3);
        assert_eq!(row.diffuse, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_light_row() {
        let row = GpuLight::from(&Light::directional(Vec3::NEG_Y, [1.0, 0.5, 0.0], 2.0));
        assert_eq!(row.kind, 1);
        assert_eq!(row.vector, [0.0, -1.0, 0.0]);
        assert_eq!(row.radiance, [2.0, 1.0, 0.0]);
        assert_eq!(row.casts_shadow, 1);
    }
}
