//! wgpu backend.
//!
//! Uploads the canonical stores into device buffers: one record/BVH buffer
//! set per (kind, material) primitive buffer, an interleaved mesh buffer set,
//! an instance table for the top-level group, the material table, textures,
//! lights and the volume grid. BVHs are built on the host with rayon and
//! uploaded flattened. Frame tracing is not available on this backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;
use wgpu::util::DeviceExt;

use crate::backend::{
    allocation_for, AdapterState, BackendStats, GeometryCounts, RenderInput, RenderOutput, SceneAdapter,
    TextureHandle,
};
use crate::config::{EngineConfig, GeometryQuality};
use crate::core::bvh::{bvh_node_capacity, BvhConfig, FlatBVHNode, FlatBvh};
use crate::core::gpu_context::GpuContext;
use crate::error::{BackendError, BackendResult};
use crate::math::AABB;
use crate::scene::{
    MaterialId, MaterialRegistry, MeshStore, PrimitiveBuffer, PrimitiveKind, PrimitiveRecord, Scene, Texture,
    Timestamp, COLOR_MAP_SIZE,
};
use crate::types::{
    GpuInstance, GpuLight, GpuMaterial, GpuSceneUniform, GpuVertex, GpuVolumeUniform, MESH_INSTANCE_KIND,
};

/// Smallest buffer ever created; wgpu rejects empty storage bindings.
const MIN_BUFFER_SIZE: u64 = 16;

fn align4(bytes: u64) -> u64 {
    bytes.div_ceil(4) * 4
}

/// Creates a storage buffer of at least `capacity` bytes and writes
/// `contents` at offset zero.
fn storage_buffer(gpu: &GpuContext, label: &str, contents: &[u8], capacity: u64) -> BackendResult<wgpu::Buffer> {
    let size = align4(capacity.max(contents.len() as u64).max(MIN_BUFFER_SIZE));
    gpu.check_buffer_size(label, size)?;
    let buffer = gpu.allocate(label, size, |device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    })?;
    write_padded(gpu, &buffer, contents);
    Ok(buffer)
}

fn uniform_buffer<T: bytemuck::Pod>(gpu: &GpuContext, label: &str, value: &T) -> BackendResult<wgpu::Buffer> {
    let bytes = std::mem::size_of::<T>() as u64;
    gpu.allocate(label, bytes, |device| {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    })
}

/// Queue writes must be a multiple of four bytes long.
fn write_padded(gpu: &GpuContext, buffer: &wgpu::Buffer, contents: &[u8]) {
    if contents.is_empty() {
        return;
    }
    if contents.len() % 4 == 0 {
        gpu.queue().write_buffer(buffer, 0, contents);
    } else {
        let mut padded = contents.to_vec();
        padded.resize(align4(contents.len() as u64) as usize, 0);
        gpu.queue().write_buffer(buffer, 0, &padded);
    }
}

/// Host-side result of sorting and indexing one (kind, material) buffer.
struct PreparedKind {
    kind: PrimitiveKind,
    material: MaterialId,
    records: Vec<u8>,
    elements: usize,
    visible: usize,
    bvh: FlatBvh,
    bounds: AABB,
}

fn prepare_kind<R: PrimitiveRecord>(
    buffers: &BTreeMap<MaterialId, PrimitiveBuffer<R>>,
    timestamp: Timestamp,
    config: &BvhConfig,
) -> Vec<PreparedKind> {
    buffers
        .par_iter()
        .filter(|(_, buffer)| !buffer.is_empty())
        .map(|(&material, buffer)| {
            let records = buffer.records_by_timestamp();
            let bounds: Vec<AABB> = records.iter().map(PrimitiveRecord::bounds).collect();
            PreparedKind {
                kind: R::KIND,
                material,
                records: bytemuck::cast_slice(&records).to_vec(),
                elements: records.len(),
                visible: buffer.size_for_timestamp(timestamp),
                bvh: FlatBvh::build(&bounds, config),
                bounds: buffer.bounds(),
            }
        })
        .collect()
}

struct GpuKindGeometry {
    kind: PrimitiveKind,
    material: MaterialId,
    _records: wgpu::Buffer,
    _nodes: wgpu::Buffer,
    _indices: wgpu::Buffer,
    elements: usize,
    capacity: usize,
    visible: usize,
    bounds: AABB,
}

impl GpuKindGeometry {
    fn upload(gpu: &GpuContext, prepared: PreparedKind) -> BackendResult<Self> {
        let name = prepared.kind.name();
        let record_size = prepared.kind.record_size() as u64;
        let capacity = allocation_for(prepared.elements);
        let node_bytes = (bvh_node_capacity(prepared.elements) * std::mem::size_of::<FlatBVHNode>()) as u64;

        let records = storage_buffer(gpu, name, &prepared.records, capacity as u64 * record_size)?;
        let nodes = storage_buffer(gpu, "primitive bvh nodes", bytemuck::cast_slice(&prepared.bvh.nodes), node_bytes)?;
        let indices = storage_buffer(gpu, "primitive bvh indices", bytemuck::cast_slice(&prepared.bvh.indices), 0)?;
        Ok(Self {
            kind: prepared.kind,
            material: prepared.material,
            _records: records,
            _nodes: nodes,
            _indices: indices,
            elements: prepared.elements,
            capacity,
            visible: prepared.visible,
            bounds: prepared.bounds,
        })
    }

    fn instance(&self) -> GpuInstance {
        GpuInstance {
            bounds_min: self.bounds.min.to_array(),
            kind: self.kind.index() as u32,
            bounds_max: self.bounds.max.to_array(),
            material: self.material,
            visible: self.visible as u32,
            capacity: self.capacity as u32,
            _pad: [0; 2],
        }
    }
}

struct GpuMeshGeometry {
    _vertices: wgpu::Buffer,
    _indices: wgpu::Buffer,
    _materials: wgpu::Buffer,
    _nodes: wgpu::Buffer,
    _bvh_indices: wgpu::Buffer,
    triangles: usize,
    bounds: AABB,
}

impl GpuMeshGeometry {
    fn upload(gpu: &GpuContext, store: &MeshStore, config: &BvhConfig) -> BackendResult<Option<Self>> {
        if store.is_empty() {
            return Ok(None);
        }
        let vertices: Vec<GpuVertex> = (0..store.vertex_count())
            .map(|i| {
                let [u, v] = store.texcoords()[i];
                GpuVertex {
                    position: store.vertices()[i],
                    u,
                    normal: store.normals()[i],
                    v,
                }
            })
            .collect();
        let triangle_bounds: Vec<AABB> = (0..store.triangle_count())
            .into_par_iter()
            .map(|t| store.triangle_bounds(t))
            .collect();
        let bvh = FlatBvh::build(&triangle_bounds, config);
        let node_bytes = (bvh_node_capacity(store.triangle_count()) * std::mem::size_of::<FlatBVHNode>()) as u64;

        Ok(Some(Self {
            _vertices: storage_buffer(gpu, "mesh vertices", bytemuck::cast_slice(&vertices), 0)?,
            _indices: storage_buffer(gpu, "mesh indices", bytemuck::cast_slice(store.indices()), 0)?,
            _materials: storage_buffer(gpu, "mesh materials", bytemuck::cast_slice(store.materials()), 0)?,
            _nodes: storage_buffer(gpu, "mesh bvh nodes", bytemuck::cast_slice(&bvh.nodes), node_bytes)?,
            _bvh_indices: storage_buffer(gpu, "mesh bvh indices", bytemuck::cast_slice(&bvh.indices), 0)?,
            triangles: store.triangle_count(),
            bounds: store.bounds(),
        }))
    }

    fn instance(&self) -> GpuInstance {
        GpuInstance {
            bounds_min: self.bounds.min.to_array(),
            kind: MESH_INSTANCE_KIND,
            bounds_max: self.bounds.max.to_array(),
            material: 0,
            visible: self.triangles as u32,
            capacity: self.triangles as u32,
            _pad: [0; 2],
        }
    }
}

/// Every committed geometry object plus the top-level instance table.
struct GpuGeometry {
    kinds: Vec<GpuKindGeometry>,
    mesh: Option<GpuMeshGeometry>,
    instances: wgpu::Buffer,
    scene_uniform: wgpu::Buffer,
    bounds: AABB,
}

impl GpuGeometry {
    fn instance_rows(&self) -> Vec<GpuInstance> {
        self.kinds
            .iter()
            .map(GpuKindGeometry::instance)
            .chain(self.mesh.as_ref().map(GpuMeshGeometry::instance))
            .collect()
    }

    fn object_count(&self) -> usize {
        self.kinds.len() + usize::from(self.mesh.is_some())
    }

    fn counts(&self) -> GeometryCounts {
        let mut counts = GeometryCounts {
            triangles: self.mesh.as_ref().map_or(0, |m| m.triangles),
            instances: self.object_count(),
            bounds: self.bounds,
            ..Default::default()
        };
        for kind in &self.kinds {
            counts.elements[kind.kind.index()] += kind.elements;
            counts.visible[kind.kind.index()] += kind.visible;
        }
        counts
    }

    fn uniform(&self, timestamp: Timestamp, light_count: usize) -> GpuSceneUniform {
        let counts = self.counts();
        GpuSceneUniform {
            bounds_min: self.bounds.min.to_array(),
            timestamp: timestamp as f32,
            bounds_max: self.bounds.max.to_array(),
            light_count: light_count as u32,
            visible: counts.visible.map(|v| v as u32),
            triangles: counts.triangles as u32,
        }
    }

    /// Rewrites the instance table and scene uniform in place
    fn refresh(&self, gpu: &GpuContext, timestamp: Timestamp, light_count: usize) {
        write_padded(gpu, &self.instances, bytemuck::cast_slice(&self.instance_rows()));
        gpu.queue()
            .write_buffer(&self.scene_uniform, 0, bytemuck::bytes_of(&self.uniform(timestamp, light_count)));
    }
}

struct GpuTexture {
    handle: TextureHandle,
    image: Arc<Texture>,
    _texture: wgpu::Texture,
    _view: wgpu::TextureView,
}

struct GpuVolume {
    _data: wgpu::Buffer,
    _uniform: wgpu::Buffer,
    voxels: usize,
}

pub struct GpuSceneAdapter {
    gpu: GpuContext,
    quality: GeometryQuality,
    state: AdapterState,
    stats: BackendStats,
    geometry: Option<GpuGeometry>,
    /// One row per material id, the default material in the last row
    material_rows: Vec<GpuMaterial>,
    material_buffer: Option<wgpu::Buffer>,
    created: BTreeSet<MaterialId>,
    textures: HashMap<String, GpuTexture>,
    sampler: Option<wgpu::Sampler>,
    next_texture: u64,
    light_buffer: Option<wgpu::Buffer>,
    light_count: usize,
    volume: Option<GpuVolume>,
    color_map: Option<wgpu::Buffer>,
    timestamp: Timestamp,
}

impl GpuSceneAdapter {
    pub fn new(gpu: GpuContext, quality: GeometryQuality) -> Self {
        Self {
            gpu,
            quality,
            state: AdapterState::Uncommitted,
            stats: BackendStats::default(),
            geometry: None,
            material_rows: Vec::new(),
            material_buffer: None,
            created: BTreeSet::new(),
            textures: HashMap::new(),
            sampler: None,
            next_texture: 0,
            light_buffer: None,
            light_count: 0,
            volume: None,
            color_map: None,
            timestamp: 0,
        }
    }

    /// Registry constructor. Fails when no adapter is available.
    pub fn from_config(config: &EngineConfig) -> BackendResult<Box<dyn SceneAdapter>> {
        let gpu = GpuContext::new_blocking()?;
        Ok(Box::new(Self::new(gpu, config.quality)))
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Texture currently bound to material `id`
    pub fn texture_handle(&self, id: MaterialId) -> Option<TextureHandle> {
        let row = self.material_rows.get(id as usize)?;
        (row.texture_slot != GpuMaterial::NO_TEXTURE).then(|| TextureHandle(row.texture_slot as u64))
    }

    pub fn material_row(&self, id: MaterialId) -> Option<&GpuMaterial> {
        self.material_rows.get(id as usize)
    }

    pub fn light_count(&self) -> usize {
        self.light_count
    }

    pub fn volume_voxels(&self) -> usize {
        self.volume.as_ref().map_or(0, |v| v.voxels)
    }

    pub fn has_color_map(&self) -> bool {
        self.color_map.is_some()
    }

    fn flush(&self) {
        self.gpu.queue().submit(std::iter::empty());
    }

    fn default_slot(&self) -> usize {
        self.material_rows.len().saturating_sub(1)
    }

    /// Returns the slot of the texture `name`, uploading it when the cached
    /// copy is missing or stale. Missing textures leave the material
    /// untextured.
    fn bind_texture(&mut self, registry: &MaterialRegistry, name: &str) -> BackendResult<i32> {
        let image = match registry.require_texture(name) {
            Ok(image) if image.width > 0 && image.height > 0 => image,
            Ok(_) => {
                warn!("{}: texture '{}' is empty, falling back to untextured shading", self.name(), name);
                return Ok(GpuMaterial::NO_TEXTURE);
            }
            Err(err) => {
                warn!("{}: {}, falling back to untextured shading", self.name(), err);
                return Ok(GpuMaterial::NO_TEXTURE);
            }
        };
        if let Some(cached) = self.textures.get(name) {
            if Arc::ptr_eq(&cached.image, image) {
                return Ok(cached.handle.0 as i32);
            }
        }

        let size = wgpu::Extent3d {
            width: image.width,
            height: image.height,
            depth_or_array_layers: 1,
        };
        let bytes = 4 * image.width as u64 * image.height as u64;
        let texture = self.gpu.allocate(name, bytes, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(name),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        })?;
        self.gpu.queue().write_texture(
            texture.as_image_copy(),
            &image.to_rgba8(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width),
                rows_per_image: Some(image.height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        if self.sampler.is_none() {
            self.sampler = Some(self.gpu.device().create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Material Sampler"),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            }));
        }

        let handle = TextureHandle(self.next_texture);
        self.next_texture += 1;
        self.stats.texture_uploads += 1;
        debug!("{}: uploaded texture '{}' as {:?}", self.name(), name, handle);
        self.textures.insert(
            name.to_string(),
            GpuTexture {
                handle,
                image: Arc::clone(image),
                _texture: texture,
                _view: view,
            },
        );
        Ok(handle.0 as i32)
    }

    fn upload_color_map(&mut self, scene: &Scene) -> BackendResult<()> {
        let map = scene.transfer_function().to_color_map(COLOR_MAP_SIZE);
        let bytes: &[u8] = bytemuck::cast_slice(&map);
        match &self.color_map {
            Some(buffer) if buffer.size() >= bytes.len() as u64 => write_padded(&self.gpu, buffer, bytes),
            _ => self.color_map = Some(storage_buffer(&self.gpu, "color map", bytes, 0)?),
        }
        self.stats.transfer_function_uploads += 1;
        Ok(())
    }
}

impl SceneAdapter for GpuSceneAdapter {
    fn name(&self) -> &'static str {
        "gpu"
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
            || prepare_kind(store.spheres(), timestamp, &config),
            || {
                rayon::join(
                    || prepare_kind(store.cylinders(), timestamp, &config),
                    || prepare_kind(store.cones(), timestamp, &config),
                )
            },
        );

        let mut kinds = Vec::with_capacity(spheres.len() + cylinders.len() + cones.len());
        for prepared in spheres.into_iter().chain(cylinders).chain(cones) {
            kinds.push(GpuKindGeometry::upload(&self.gpu, prepared)?);
        }
        let mesh = GpuMeshGeometry::upload(&self.gpu, scene.meshes(), &config)?;

        let bounds = kinds
            .iter()
            .map(|k| k.bounds)
            .chain(mesh.as_ref().map(|m| m.bounds))
            .fold(AABB::EMPTY, |acc, b| acc.union(&b));
        let rows: Vec<GpuInstance> = kinds
            .iter()
            .map(GpuKindGeometry::instance)
            .chain(mesh.as_ref().map(GpuMeshGeometry::instance))
            .collect();
        let instances = storage_buffer(&self.gpu, "instances", bytemuck::cast_slice(&rows), 0)?;
        let scene_uniform = uniform_buffer(&self.gpu, "scene uniform", &GpuSceneUniform::default())?;

        let geometry = GpuGeometry {
            kinds,
            mesh,
            instances,
            scene_uniform,
            bounds,
        };
        geometry.refresh(&self.gpu, timestamp, scene.lights().len());
        self.flush();

        self.stats.geometry_builds += geometry.object_count();
        self.stats.group_builds += 1;
        info!(
            "{}: uploaded {} geometry objects ({} quality) on '{}'",
            self.name(),
            geometry.object_count(),
            self.quality,
            self.gpu.adapter_name()
        );
        self.geometry = Some(geometry);
        self.timestamp = timestamp;
        Ok(())
    }

    fn commit_simulation_data(&mut self, scene: &Scene) -> BackendResult<()> {
        let Some(geometry) = self.geometry.as_mut() else {
            return Ok(());
        };
        let store = scene.primitives();
        let timestamp = scene.timestamp();
        let mut fits = true;
        for kind in &mut geometry.kinds {
            let visible = store.size_for_timestamp(kind.kind, kind.material, timestamp);
            if visible > kind.capacity || visible > kind.elements {
                fits = false;
                break;
            }
            kind.visible = visible;
        }
        if !fits {
            info!("{}: visible records exceed allocation, rebuilding geometry", self.name());
            return self.build_geometry(scene);
        }

        geometry.refresh(&self.gpu, timestamp, self.light_count);
        self.flush();
        self.timestamp = timestamp;
        self.stats.simulation_updates += 1;
        debug!("{}: timestamp {} applied", self.name(), timestamp);
        Ok(())
    }

    fn commit_materials(&mut self, scene: &Scene, update_only: bool) -> BackendResult<()> {
        let registry = scene.materials();
        let rows = registry.limits().max_materials as usize + 1;

        if update_only && self.material_rows.len() == rows {
            for (id, material) in registry.iter() {
                self.material_rows[id as usize].update_numeric(material);
                if self.created.insert(id) {
                    self.stats.material_creations += 1;
                } else {
                    self.stats.material_updates += 1;
                }
            }
            let slot = self.default_slot();
            self.material_rows[slot].update_numeric(registry.default_material());
            if let Some(buffer) = &self.material_buffer {
                write_padded(&self.gpu, buffer, bytemuck::cast_slice(&self.material_rows));
            }
            self.flush();
            return Ok(());
        }

        let default_slot = match registry.default_material().diffuse_texture.as_deref() {
            Some(name) => self.bind_texture(registry, name)?,
            None => GpuMaterial::NO_TEXTURE,
        };
        let default_row = GpuMaterial::new(registry.default_material(), default_slot);
        let mut material_rows = vec![default_row; rows];
        let mut created = BTreeSet::new();
        for (id, material) in registry.iter() {
            let slot = match material.diffuse_texture.as_deref() {
                Some(name) => self.bind_texture(registry, name)?,
                None => GpuMaterial::NO_TEXTURE,
            };
            material_rows[id as usize] = GpuMaterial::new(material, slot);
            created.insert(id);
        }
        let buffer = storage_buffer(&self.gpu, "materials", bytemuck::cast_slice(&material_rows), 0)?;
        self.flush();

        self.stats.material_creations += created.len() + 1;
        self.material_rows = material_rows;
        self.material_buffer = Some(buffer);
        self.created = created;
        debug!("{}: {} materials created", self.name(), self.created.len());
        Ok(())
    }

    fn commit_lights(&mut self, scene: &Scene) -> BackendResult<()> {
        let rows: Vec<GpuLight> = scene.lights().iter().map(GpuLight::from).collect();
        let bytes: &[u8] = bytemuck::cast_slice(&rows);
        match &self.light_buffer {
            Some(buffer) if rows.len() == self.light_count => write_padded(&self.gpu, buffer, bytes),
            _ => {
                let capacity = (rows.len().max(1) * std::mem::size_of::<GpuLight>()) as u64;
                self.light_buffer = Some(storage_buffer(&self.gpu, "lights", bytes, capacity)?);
                self.stats.light_allocations += 1;
            }
        }
        self.light_count = rows.len();
        if let Some(geometry) = &self.geometry {
            geometry.refresh(&self.gpu, self.timestamp, self.light_count);
        }
        self.flush();
        self.stats.light_uploads += 1;
        Ok(())
    }

    fn commit_volume_data(&mut self, scene: &Scene) -> BackendResult<()> {
        let Some(volume) = scene.volume() else {
            if self.volume.take().is_some() {
                self.color_map = None;
                debug!("{}: volume released", self.name());
            }
            return Ok(());
        };
        let data = storage_buffer(&self.gpu, "volume", &volume.data, 0)?;
        let uniform = uniform_buffer(
            &self.gpu,
            "volume uniform",
            &GpuVolumeUniform {
                dimensions: volume.dimensions.to_array(),
                spacing: volume.spacing.to_array(),
                offset: volume.offset.to_array(),
                ..Default::default()
            },
        )?;
        self.volume = Some(GpuVolume {
            _data: data,
            _uniform: uniform,
            voxels: volume.voxel_count(),
        });
        self.stats.volume_uploads += 1;
        if self.color_map.is_none() {
            self.upload_color_map(scene)?;
        }
        self.flush();
        Ok(())
    }

    fn commit_transfer_function_data(&mut self, scene: &Scene) -> BackendResult<()> {
        if self.volume.is_none() {
            return Ok(());
        }
        self.upload_color_map(scene)?;
        self.flush();
        Ok(())
    }

    fn reset(&mut self) {
        debug!("{}: releasing backend objects", self.name());
        self.geometry = None;
        self.material_rows = Vec::new();
        self.material_buffer = None;
        self.created.clear();
        self.textures.clear();
        self.sampler = None;
        self.light_buffer = None;
        self.light_count = 0;
        self.volume = None;
        self.color_map = None;
        self.state = AdapterState::Uncommitted;
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }

    fn geometry_counts(&self) -> GeometryCounts {
        self.geometry.as_ref().map(GpuGeometry::counts).unwrap_or_default()
    }

    fn trace(&self, _input: &RenderInput, _output: &mut RenderOutput) -> BackendResult<()> {
        Err(BackendError::Unsupported("frame tracing on the gpu backend"))
    }
}
