//! Engine-independent description of renderable content.
//!
//! The [`Scene`] exclusively owns every store. All mutations go through it so
//! that the matching dirty flag is raised; backend adapters read the stores
//! and clear the flags they service.

mod cache;
mod dirty;
mod lights;
mod materials;
mod mesh;
mod primitives;
mod volume;

pub use dirty::{DirtyState, Subsystems, COMMIT_ORDER};
pub use lights::{Light, LightKind};
pub use materials::{
    Material, MaterialChange, MaterialId, MaterialLimits, MaterialRegistry, Texture,
    DEFAULT_MAX_MATERIALS, DEFAULT_SYSTEM_MATERIALS, NO_MATERIAL,
};
pub use mesh::{MaterialRemap, MeshData, MeshId, MeshRange, MeshStore};
pub use primitives::{
    ConeRecord, CylinderRecord, Primitive, PrimitiveBuffer, PrimitiveIndex, PrimitiveKind,
    PrimitiveRecord, PrimitiveStore, SphereRecord, Timestamp,
};
pub use volume::{ControlPoint, TransferFunction, Volume, COLOR_MAP_SIZE};

use log::warn;

use crate::error::SceneResult;
use crate::math::AABB;

#[derive(Debug, Clone)]
pub struct Scene {
    primitives: PrimitiveStore,
    meshes: MeshStore,
    materials: MaterialRegistry,
    lights: Vec<Light>,
    volume: Option<Volume>,
    transfer_function: TransferFunction,
    world_bounds: AABB,
    dirty: DirtyState,
    timestamp: Timestamp,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(MaterialLimits::default())
    }
}

impl Scene {
    pub fn new(limits: MaterialLimits) -> Self {
        Self {
            primitives: PrimitiveStore::new(),
            meshes: MeshStore::new(),
            materials: MaterialRegistry::new(limits),
            lights: Vec::new(),
            volume: None,
            transfer_function: TransferFunction::default(),
            world_bounds: AABB::EMPTY,
            dirty: DirtyState::all(),
            timestamp: 0,
        }
    }

    /// Appends a primitive for `timestamp` and returns its stable index.
    ///
    /// Returns `None` (and appends nothing) when `material` is out of range,
    /// reserved for system use, or the primitive has a non-finite or negative
    /// size.
    pub fn add_primitive(
        &mut self,
        material: MaterialId,
        timestamp: Timestamp,
        primitive: Primitive,
    ) -> Option<PrimitiveIndex> {
        if let Err(e) = self.materials.limits().check_geometry_material(material) {
            warn!("Rejected {} primitive: {}", primitive.kind(), e);
            return None;
        }
        if !is_well_formed(&primitive) {
            warn!("Rejected malformed {} primitive: {:?}", primitive.kind(), primitive);
            return None;
        }
        let index = self.primitives.add(material, timestamp, primitive);
        self.world_bounds.grow(&self.primitive_bounds(index));
        self.dirty.mark(Subsystems::GEOMETRY);
        Some(index)
    }

    fn primitive_bounds(&self, index: PrimitiveIndex) -> AABB {
        let m = &index.material;
        match index.kind {
            PrimitiveKind::Sphere => self.primitives.spheres()[m].records()[index.index].bounds(),
            PrimitiveKind::Cylinder => self.primitives.cylinders()[m].records()[index.index].bounds(),
            PrimitiveKind::Cone => self.primitives.cones()[m].records()[index.index].bounds(),
        }
    }

    /// Merges an imported mesh into the consolidated mesh buffers.
    ///
    /// A malformed mesh, or one whose remapped materials are not assignable
    /// to geometry, is rejected without touching the scene.
    pub fn append_mesh(&mut self, mesh: MeshData, remap: &MaterialRemap) -> SceneResult<MeshId> {
        let limits = self.materials.limits();
        if mesh.materials.is_empty() {
            limits.check_geometry_material(remap.apply(NO_MATERIAL))?;
        }
        for &material in &mesh.materials {
            limits.check_geometry_material(remap.apply(material))?;
        }
        let id = self.meshes.append(mesh, remap)?;
        self.world_bounds.grow(&self.meshes.meshes()[id].bounds);
        self.dirty.mark(Subsystems::GEOMETRY);
        Ok(id)
    }

    pub fn set_material(&mut self, id: MaterialId, material: Material) -> SceneResult<()> {
        match self.materials.set_material(id, material)? {
            MaterialChange::Numeric => self.dirty.mark(Subsystems::MATERIALS),
            MaterialChange::Texture => self.dirty.mark(Subsystems::MATERIALS | Subsystems::TEXTURES),
        }
        Ok(())
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.material(id)
    }

    /// Overwrites the diffuse colour of every material with `color_of(index)`.
    pub fn recolor_materials(&mut self, color_of: impl Fn(usize) -> [f32; 3]) {
        if !self.materials.is_empty() {
            self.materials.recolor(color_of);
            self.dirty.mark(Subsystems::MATERIALS);
        }
    }

    pub fn register_texture(&mut self, name: impl Into<String>, texture: Texture) {
        self.materials.register_texture(name, texture);
        self.dirty.mark(Subsystems::MATERIALS | Subsystems::TEXTURES);
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
        self.dirty.mark(Subsystems::LIGHTS);
    }

    pub fn set_lights(&mut self, lights: Vec<Light>) {
        self.lights = lights;
        self.dirty.mark(Subsystems::LIGHTS);
    }

    pub fn clear_lights(&mut self) {
        self.lights.clear();
        self.dirty.mark(Subsystems::LIGHTS);
    }

    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = Some(volume);
        self.dirty.mark(Subsystems::VOLUME);
    }

    pub fn clear_volume(&mut self) {
        if self.volume.take().is_some() {
            self.dirty.mark(Subsystems::VOLUME);
        }
    }

    pub fn set_transfer_function(&mut self, transfer_function: TransferFunction) {
        self.transfer_function = transfer_function;
        self.dirty.mark(Subsystems::TRANSFER_FUNCTION);
    }

    /// Moves playback to `timestamp`.
    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        if self.timestamp != timestamp {
            self.timestamp = timestamp;
            self.dirty.mark(Subsystems::SIMULATION);
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn primitives(&self) -> &PrimitiveStore {
        &self.primitives
    }

    pub fn meshes(&self) -> &MeshStore {
        &self.meshes
    }

    pub fn materials(&self) -> &MaterialRegistry {
        &self.materials
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    pub fn transfer_function(&self) -> &TransferFunction {
        &self.transfer_function
    }

    /// Box enclosing every primitive and mesh vertex ever appended.
    pub fn world_bounds(&self) -> AABB {
        self.world_bounds
    }

    pub fn dirty(&self) -> Subsystems {
        self.dirty.flags()
    }

    pub fn is_dirty(&self, subsystems: Subsystems) -> bool {
        self.dirty.is_dirty(subsystems)
    }

    pub fn mark_dirty(&mut self, subsystems: Subsystems) {
        self.dirty.mark(subsystems);
    }

    /// Called by backend adapters once they have serviced `subsystems`.
    pub fn clear_dirty(&mut self, subsystems: Subsystems) {
        self.dirty.clear(subsystems);
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty() && self.meshes.is_empty()
    }

    /// Drops all canonical data.
    pub fn clear(&mut self) {
        let limits = self.materials.limits();
        *self = Self::new(limits);
    }
}

fn is_well_formed(primitive: &Primitive) -> bool {
    let finite = |v: glam::Vec3| v.is_finite();
    let size = |r: f32| r.is_finite() && r >= 0.0;
    match *primitive {
        Primitive::Sphere { center, radius } => finite(center) && size(radius),
        Primitive::Cylinder { center, up, radius } => finite(center) && finite(up) && size(radius),
        Primitive::Cone {
            center,
            up,
            center_radius,
            up_radius,
        } => finite(center) && finite(up) && size(center_radius) && size(up_radius),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_new_scene_is_fully_dirty() {
        let scene = Scene::default();
        assert_eq!(scene.dirty(), Subsystems::all());
        assert!(scene.world_bounds().is_empty());
    }

    #[test]
    fn test_reserved_material_is_rejected_for_primitives() {
        let mut scene = Scene::new(MaterialLimits::new(64, 4));
        scene.clear_dirty(Subsystems::all());
        let sphere = Primitive::Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        };
        assert!(scene.add_primitive(62, 0, sphere).is_none());
        assert!(scene.add_primitive(100, 0, sphere).is_none());
        assert!(scene.dirty().is_empty());
        assert!(scene.add_primitive(1, 0, sphere).is_some());
        assert!(scene.is_dirty(Subsystems::GEOMETRY));
    }

    #[test]
    fn test_negative_radius_is_rejected() {
        let mut scene = Scene::default();
        let bad = Primitive::Sphere {
            center: Vec3::ZERO,
            radius: -1.0,
        };
        assert!(scene.add_primitive(0, 0, bad).is_none());
        assert!(scene.primitives().is_empty());
    }

    #[test]
    fn test_material_update_never_marks_geometry() {
        let mut scene = Scene::default();
        scene.clear_dirty(Subsystems::all());
        scene.set_material(2, Material::with_color([1.0, 0.0, 0.0])).unwrap();
        assert!(scene.is_dirty(Subsystems::MATERIALS));
        assert!(!scene.is_dirty(Subsystems::GEOMETRY));
        assert!(!scene.is_dirty(Subsystems::TEXTURES));

        scene.set_material(2, Material::with_texture([1.0; 3], "bark")).unwrap();
        assert!(scene.is_dirty(Subsystems::TEXTURES));
        assert!(!scene.is_dirty(Subsystems::GEOMETRY));
    }

    #[test]
    fn test_timestamp_change_marks_simulation() {
        let mut scene = Scene::default();
        scene.clear_dirty(Subsystems::all());
        scene.set_timestamp(0);
        assert!(scene.dirty().is_empty());
        scene.set_timestamp(4);
        assert_eq!(scene.dirty(), Subsystems::SIMULATION);
    }

    #[test]
    fn test_mesh_with_reserved_material_is_rejected() {
        let mut scene = Scene::new(MaterialLimits::new(8, 2));
        let mesh = MeshData {
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            indices: vec![[0, 1, 2]],
            ..Default::default()
        };
        assert!(scene.append_mesh(mesh.clone(), &MaterialRemap::Uniform(7)).is_err());
        assert!(scene.meshes().is_empty());
        assert!(scene.append_mesh(mesh, &MaterialRemap::Uniform(5)).is_ok());
        assert_eq!(scene.meshes().materials(), &[5]);
    }
}
