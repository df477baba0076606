//! Multi-threaded CPU backend.
//!
//! Owns host-side copies of every committed buffer, one BVH per
//! (kind, material) primitive buffer, one BVH over all mesh triangles and a
//! top-level BVH over those geometry objects. Frames are traced row-parallel
//! with rayon.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::{UVec3, Vec3};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::backend::{
    allocation_for, try_alloc, AdapterState, BackendStats, GeometryCounts, RenderInput, RenderOutput,
    SceneAdapter, TextureHandle,
};
use crate::config::{EngineConfig, GeometryQuality};
use crate::core::bvh::{BvhConfig, FlatBvh};
use crate::core::primitive_intersection::{RayIntersect, SurfaceHit};
use crate::core::triangle_intersection::moller_trumbore_intersect;
use crate::error::BackendResult;
use crate::math::{Ray, AABB};
use crate::scene::{
    ConeRecord, CylinderRecord, Light, Material, MaterialId, MaterialRegistry, MeshStore, PrimitiveBuffer,
    PrimitiveRecord, PrimitiveStore, Scene, SphereRecord, Texture, Timestamp, COLOR_MAP_SIZE,
};

const T_MIN: f32 = 1e-4;
const SHADOW_BIAS: f32 = 1e-3;
const AMBIENT: f32 = 0.1;

#[derive(Debug, Clone)]
struct CpuTexture {
    handle: TextureHandle,
    image: Arc<Texture>,
}

#[derive(Debug, Clone)]
struct CpuMaterial {
    properties: Material,
    texture: Option<CpuTexture>,
}

/// Geometry object for one (kind, material) buffer. Records are sorted by
/// timestamp so the visible ones form a prefix.
#[derive(Debug)]
struct KindGeometry<R> {
    material: MaterialId,
    records: Vec<R>,
    capacity: usize,
    bvh: FlatBvh,
    visible: usize,
    bounds: AABB,
}

impl<R: PrimitiveRecord + RayIntersect> KindGeometry<R> {
    fn build(
        material: MaterialId,
        buffer: &PrimitiveBuffer<R>,
        timestamp: Timestamp,
        config: &BvhConfig,
    ) -> BackendResult<Self> {
        let capacity = allocation_for(buffer.len());
        let mut records = try_alloc::<R>(R::KIND.name(), capacity)?;
        records.extend(buffer.records_by_timestamp());

        let bounds: Vec<AABB> = records.iter().map(PrimitiveRecord::bounds).collect();
        Ok(Self {
            material,
            capacity,
            bvh: FlatBvh::build(&bounds, config),
            visible: buffer.size_for_timestamp(timestamp),
            bounds: buffer.bounds(),
            records,
        })
    }

    fn intersect(&self, ray: &Ray, t_max: f32) -> Option<Hit> {
        let mut closest: Option<SurfaceHit> = None;
        self.bvh.intersect(ray, t_max, |prim, limit| {
            if prim as usize >= self.visible {
                return None;
            }
            let hit = self.records[prim as usize].intersect(ray, T_MIN, limit)?;
            closest = Some(hit);
            Some(hit.t)
        });
        closest.map(|hit| Hit {
            t: hit.t,
            normal: hit.normal,
            uv: hit.uv,
            material: self.material,
        })
    }

    /// Applies the visible count for `timestamp`. Returns false when the
    /// count no longer fits the allocation.
    fn apply_timestamp(&mut self, store: &PrimitiveStore, timestamp: Timestamp) -> bool {
        let visible = store.size_for_timestamp(R::KIND, self.material, timestamp);
        if visible > self.capacity || visible > self.records.len() {
            return false;
        }
        self.visible = visible;
        true
    }
}

fn build_kind<R: PrimitiveRecord + RayIntersect>(
    buffers: &BTreeMap<MaterialId, PrimitiveBuffer<R>>,
    timestamp: Timestamp,
    config: &BvhConfig,
) -> BackendResult<Vec<KindGeometry<R>>> {
    buffers
        .par_iter()
        .filter(|(_, buffer)| !buffer.is_empty())
        .map(|(&material, buffer)| KindGeometry::build(material, buffer, timestamp, config))
        .collect()
}

#[derive(Debug)]
struct MeshGeometry {
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
    texcoords: Vec<[f32; 2]>,
    indices: Vec<[u32; 3]>,
    materials: Vec<MaterialId>,
    bvh: FlatBvh,
    bounds: AABB,
}

impl MeshGeometry {
    fn build(store: &MeshStore, config: &BvhConfig) -> BackendResult<Option<Self>> {
        if store.is_empty() {
            return Ok(None);
        }
        let mut vertices = try_alloc::<Vec3>("mesh vertices", store.vertex_count())?;
        vertices.extend(store.vertices().iter().copied().map(Vec3::from_array));
        let mut normals = try_alloc::<Vec3>("mesh normals", store.vertex_count())?;
        normals.extend(store.normals().iter().copied().map(Vec3::from_array));
        let mut indices = try_alloc::<[u32; 3]>("mesh indices", store.triangle_count())?;
        indices.extend_from_slice(store.indices());

        let triangle_bounds: Vec<AABB> = (0..store.triangle_count())
            .into_par_iter()
            .map(|t| store.triangle_bounds(t))
            .collect();

        Ok(Some(Self {
            vertices,
            normals,
            texcoords: store.texcoords().to_vec(),
            indices,
            materials: store.materials().to_vec(),
            bvh: FlatBvh::build(&triangle_bounds, config),
            bounds: store.bounds(),
        }))
    }

    fn intersect(&self, ray: &Ray, t_max: f32) -> Option<Hit> {
        let mut closest = None;
        self.bvh.intersect(ray, t_max, |triangle, limit| {
            let [a, b, c] = self.indices[triangle as usize].map(|i| i as usize);
            let hit = moller_trumbore_intersect(
                ray.origin,
                ray.direction,
                self.vertices[a],
                self.vertices[b],
                self.vertices[c],
            )
            .filter(|hit| hit.t < limit)?;
            closest = Some((triangle as usize, hit, [a, b, c]));
            Some(hit.t)
        });
        closest.map(|(triangle, hit, [a, b, c])| {
            let shading = hit.interpolate(self.normals[a], self.normals[b], self.normals[c]);
            let normal = if shading.length_squared() > 0.0 {
                shading.normalize()
            } else {
                hit.normal
            };
            Hit {
                t: hit.t,
                normal,
                uv: hit.interpolate_uv(self.texcoords[a], self.texcoords[b], self.texcoords[c]),
                material: self.materials[triangle],
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Instance {
    Spheres(usize),
    Cylinders(usize),
    Cones(usize),
    Mesh,
}

/// Every committed geometry object under one top-level BVH.
#[derive(Debug)]
struct CpuGeometry {
    spheres: Vec<KindGeometry<SphereRecord>>,
    cylinders: Vec<KindGeometry<CylinderRecord>>,
    cones: Vec<KindGeometry<ConeRecord>>,
    mesh: Option<MeshGeometry>,
    instances: Vec<Instance>,
    group: FlatBvh,
    bounds: AABB,
}

impl CpuGeometry {
    fn assemble(
        spheres: Vec<KindGeometry<SphereRecord>>,
        cylinders: Vec<KindGeometry<CylinderRecord>>,
        cones: Vec<KindGeometry<ConeRecord>>,
        mesh: Option<MeshGeometry>,
    ) -> Self {
        let mut instances = Vec::new();
        let mut instance_bounds = Vec::new();
        for (i, g) in spheres.iter().enumerate() {
            instances.push(Instance::Spheres(i));
            instance_bounds.push(g.bounds);
        }
        for (i, g) in cylinders.iter().enumerate() {
            instances.push(Instance::Cylinders(i));
            instance_bounds.push(g.bounds);
        }
        for (i, g) in cones.iter().enumerate() {
            instances.push(Instance::Cones(i));
            instance_bounds.push(g.bounds);
        }
        if let Some(mesh) = &mesh {
            instances.push(Instance::Mesh);
            instance_bounds.push(mesh.bounds);
        }

        let bounds = instance_bounds.iter().fold(AABB::EMPTY, |acc, b| acc.union(b));
        let group = FlatBvh::build(&instance_bounds, &BvhConfig::default());
        Self {
            spheres,
            cylinders,
            cones,
            mesh,
            instances,
            group,
            bounds,
        }
    }

    fn object_count(&self) -> usize {
        self.instances.len()
    }

    fn intersect(&self, ray: &Ray, t_max: f32) -> Option<Hit> {
        let mut closest = None;
        self.group.intersect(ray, t_max, |instance, limit| {
            let hit = match self.instances[instance as usize] {
                Instance::Spheres(i) => self.spheres[i].intersect(ray, limit),
                Instance::Cylinders(i) => self.cylinders[i].intersect(ray, limit),
                Instance::Cones(i) => self.cones[i].intersect(ray, limit),
                Instance::Mesh => self.mesh.as_ref().and_then(|m| m.intersect(ray, limit)),
            }?;
            closest = Some(hit);
            Some(hit.t)
        });
        closest
    }

    fn counts(&self) -> GeometryCounts {
        fn sum<R>(geometries: &[KindGeometry<R>], f: impl Fn(&KindGeometry<R>) -> usize) -> usize {
            geometries.iter().map(f).sum()
        }
        GeometryCounts {
            elements: [
                sum(&self.spheres, |g| g.records.len()),
                sum(&self.cylinders, |g| g.records.len()),
                sum(&self.cones, |g| g.records.len()),
            ],
            visible: [
                sum(&self.spheres, |g| g.visible),
                sum(&self.cylinders, |g| g.visible),
                sum(&self.cones, |g| g.visible),
            ],
            triangles: self.mesh.as_ref().map_or(0, |m| m.indices.len()),
            instances: self.instances.len(),
            bounds: self.bounds,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    t: f32,
    normal: Vec3,
    uv: [f32; 2],
    material: MaterialId,
}

#[derive(Debug)]
struct CpuVolume {
    dimensions: UVec3,
    data: Vec<u8>,
}

pub struct CpuSceneAdapter {
    quality: GeometryQuality,
    background: Vec3,
    state: AdapterState,
    stats: BackendStats,
    geometry: Option<CpuGeometry>,
    materials: BTreeMap<MaterialId, CpuMaterial>,
    default_material: CpuMaterial,
    textures: HashMap<String, CpuTexture>,
    next_texture: u64,
    lights: Vec<Light>,
    volume: Option<CpuVolume>,
    color_map: Vec<[f32; 4]>,
}

impl CpuSceneAdapter {
    pub fn new(quality: GeometryQuality, background: [f32; 3]) -> Self {
        Self {
            quality,
            background: Vec3::from_array(background),
            state: AdapterState::Uncommitted,
            stats: BackendStats::default(),
            geometry: None,
            materials: BTreeMap::new(),
            default_material: CpuMaterial {
                properties: Material::default(),
                texture: None,
            },
            textures: HashMap::new(),
            next_texture: 0,
            lights: Vec::new(),
            volume: None,
            color_map: Vec::new(),
        }
    }

    /// Registry constructor
    pub fn from_config(config: &EngineConfig) -> BackendResult<Box<dyn SceneAdapter>> {
        Ok(Box::new(Self::new(config.quality, config.background)))
    }

    pub fn quality(&self) -> GeometryQuality {
        self.quality
    }

    /// Texture currently bound to material `id`
    pub fn texture_handle(&self, id: MaterialId) -> Option<TextureHandle> {
        self.materials.get(&id)?.texture.as_ref().map(|t| t.handle)
    }

    /// Diffuse colour of the backend copy of material `id`
    pub fn material_diffuse(&self, id: MaterialId) -> Option<[f32; 3]> {
        self.materials.get(&id).map(|m| m.properties.diffuse)
    }

    pub fn light_count(&self) -> usize {
        self.lights.len()
    }

    pub fn has_volume(&self) -> bool {
        self.volume.is_some()
    }

    pub fn volume_voxels(&self) -> usize {
        self.volume.as_ref().map_or(0, |v| v.data.len())
    }

    pub fn volume_dimensions(&self) -> Option<UVec3> {
        self.volume.as_ref().map(|v| v.dimensions)
    }

    pub fn color_map(&self) -> &[[f32; 4]] {
        &self.color_map
    }

    fn bind_texture(&mut self, registry: &MaterialRegistry, name: &str) -> Option<CpuTexture> {
        let image = match registry.require_texture(name) {
            Ok(image) => image,
            Err(err) => {
                warn!("{}: {}, falling back to untextured shading", self.name(), err);
                return None;
            }
        };
        if let Some(cached) = self.textures.get(name) {
            if Arc::ptr_eq(&cached.image, image) {
                return Some(cached.clone());
            }
        }
        let texture = CpuTexture {
            handle: TextureHandle(self.next_texture),
            image: Arc::clone(image),
        };
        self.next_texture += 1;
        self.stats.texture_uploads += 1;
        debug!("{}: uploaded texture '{}' as {:?}", self.name(), name, texture.handle);
        self.textures.insert(name.to_string(), texture.clone());
        Some(texture)
    }

    fn create_material(&mut self, registry: &MaterialRegistry, material: &Material) -> CpuMaterial {
        let texture = material
            .diffuse_texture
            .as_deref()
            .and_then(|name| self.bind_texture(registry, name));
        self.stats.material_creations += 1;
        CpuMaterial {
            properties: material.clone(),
            texture,
        }
    }

    fn upload_color_map(&mut self, scene: &Scene) {
        self.color_map = scene.transfer_function().to_color_map(COLOR_MAP_SIZE);
        self.stats.transfer_function_uploads += 1;
    }

    fn shade(&self, geometry: &CpuGeometry, ray: &Ray, hit: &Hit) -> Vec3 {
        let material = self.materials.get(&hit.material).unwrap_or(&self.default_material);
        let mut base = Vec3::from_array(material.properties.diffuse);
        if let Some(texture) = &material.texture {
            base *= Vec3::from_array(texture.image.sample(hit.uv));
        }

        let normal = if hit.normal.dot(ray.direction) > 0.0 {
            -hit.normal
        } else {
            hit.normal
        };
        let point = ray.at(hit.t);

        let mut color = base * (AMBIENT + material.properties.emission);
        if self.lights.is_empty() {
            // Headlight
            color += base * normal.dot(-ray.direction).max(0.0);
        }
        for light in &self.lights {
            let (direction, distance) = light.incidence(point);
            let lambert = normal.dot(direction);
            if lambert <= 0.0 {
                continue;
            }
            if light.casts_shadow {
                let shadow = Ray::new(point + normal * SHADOW_BIAS, direction);
                if geometry.intersect(&shadow, distance).is_some() {
                    continue;
                }
            }
            color += base * light.radiance() * lambert;
        }
        color * material.properties.opacity + self.background * (1.0 - material.properties.opacity)
    }
}

impl SceneAdapter for CpuSceneAdapter {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn state(&self) -> AdapterState {
        self.state
    }

    fn set_state(&mut self, state: AdapterState) {
        self.state = state;
    }

    fn build_geometry(&mut self, scene: &Scene) -> BackendResult<()> {
        let config = self.quality.bvh_config();
        let timestamp = scene.timestamp();
        let store = scene.primitives();

        let (spheres, (cylinders, cones)) = rayon::join(
            || build_kind(store.spheres(), timestamp, &config),
            || {
                rayon::join(
                    || build_kind(store.cylinders(), timestamp, &config),
                    || build_kind(store.cones(), timestamp, &config),
                )
            },
        );
        let (spheres, cylinders, cones) = (spheres?, cylinders?, cones?);
        let mesh = MeshGeometry::build(scene.meshes(), &config)?;

        let geometry = CpuGeometry::assemble(spheres, cylinders, cones, mesh);
        self.stats.geometry_builds += geometry.object_count();
        self.stats.group_builds += 1;
        info!(
            "{}: built {} geometry objects ({} quality), bounds {:?}",
            self.name(),
            geometry.object_count(),
            self.quality,
            geometry.bounds
        );
        self.geometry = Some(geometry);
        Ok(())
    }

    fn commit_simulation_data(&mut self, scene: &Scene) -> BackendResult<()> {
        let Some(geometry) = self.geometry.as_mut() else {
            return Ok(());
        };
        let store = scene.primitives();
        let timestamp = scene.timestamp();
        let fits = geometry
            .spheres
            .iter_mut()
            .all(|g| g.apply_timestamp(store, timestamp))
            & geometry
                .cylinders
                .iter_mut()
                .all(|g| g.apply_timestamp(store, timestamp))
            & geometry.cones.iter_mut().all(|g| g.apply_timestamp(store, timestamp));

        if !fits {
            info!("{}: visible records exceed allocation, rebuilding geometry", self.name());
            return self.build_geometry(scene);
        }
        self.stats.simulation_updates += 1;
        debug!("{}: timestamp {} applied", self.name(), timestamp);
        Ok(())
    }

    fn commit_materials(&mut self, scene: &Scene, update_only: bool) -> BackendResult<()> {
        let registry = scene.materials();
        if update_only {
            for (id, material) in registry.iter() {
                if let Some(existing) = self.materials.get_mut(&id) {
                    existing.properties = material.clone();
                    self.stats.material_updates += 1;
                } else {
                    let created = self.create_material(registry, material);
                    self.materials.insert(id, created);
                }
            }
            return Ok(());
        }

        let mut materials = BTreeMap::new();
        for (id, material) in registry.iter() {
            let created = self.create_material(registry, material);
            materials.insert(id, created);
        }
        self.default_material = self.create_material(registry, registry.default_material());
        self.materials = materials;
        debug!("{}: {} materials created", self.name(), self.materials.len());
        Ok(())
    }

    fn commit_lights(&mut self, scene: &Scene) -> BackendResult<()> {
        let lights = scene.lights();
        if lights.len() != self.lights.len() {
            self.lights = try_alloc("lights", lights.len())?;
            self.stats.light_allocations += 1;
        }
        self.lights.clear();
        self.lights.extend_from_slice(lights);
        self.stats.light_uploads += 1;
        Ok(())
    }

    fn commit_volume_data(&mut self, scene: &Scene) -> BackendResult<()> {
        let Some(volume) = scene.volume() else {
            if self.volume.take().is_some() {
                self.color_map = Vec::new();
                debug!("{}: volume released", self.name());
            }
            return Ok(());
        };
        let mut data = try_alloc::<u8>("volume", volume.voxel_count())?;
        data.extend_from_slice(&volume.data);
        self.volume = Some(CpuVolume {
            dimensions: volume.dimensions,
            data,
        });
        self.stats.volume_uploads += 1;
        if self.color_map.is_empty() {
            self.upload_color_map(scene);
        }
        Ok(())
    }

    fn commit_transfer_function_data(&mut self, scene: &Scene) -> BackendResult<()> {
        if self.volume.is_none() {
            return Ok(());
        }
        self.upload_color_map(scene);
        Ok(())
    }

    fn reset(&mut self) {
        debug!("{}: releasing backend objects", self.name());
        self.geometry = None;
        self.materials.clear();
        self.default_material = CpuMaterial {
            properties: Material::default(),
            texture: None,
        };
        self.textures.clear();
        self.lights = Vec::new();
        self.volume = None;
        self.color_map = Vec::new();
        self.state = AdapterState::Uncommitted;
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }

    fn geometry_counts(&self) -> GeometryCounts {
        self.geometry.as_ref().map(CpuGeometry::counts).unwrap_or_default()
    }

    fn trace(&self, input: &RenderInput, output: &mut RenderOutput) -> BackendResult<()> {
        let (width, height) = (output.width as usize, output.height as usize);
        output.color.resize(width * height * 4, 0);
        output.depth.resize(width * height, f32::INFINITY);
        if width == 0 || height == 0 {
            return Ok(());
        }

        let inverse = input.inverse_view_projection();
        let background = self.background;
        output
            .color
            .par_chunks_mut(width * 4)
            .zip(output.depth.par_chunks_mut(width))
            .enumerate()
            .for_each(|(y, (color_row, depth_row))| {
                for x in 0..width {
                    let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
                    let ndc_y = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
                    let ray = Ray::from_ndc(inverse, ndc_x, ndc_y);

                    let hit = self
                        .geometry
                        .as_ref()
                        .and_then(|g| g.intersect(&ray, f32::INFINITY).map(|hit| (g, hit)));
                    let (rgb, depth) = match hit {
                        Some((geometry, hit)) => (self.shade(geometry, &ray, &hit), hit.t),
                        None => (background, f32::INFINITY),
                    };

                    let rgb = rgb.clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
                    color_row[x * 4..x * 4 + 4].copy_from_slice(&[
                        rgb.x.round() as u8,
                        rgb.y.round() as u8,
                        rgb.z.round() as u8,
                        255,
                    ]);
                    depth_row[x] = depth;
                }
            });
        Ok(())
    }
}
