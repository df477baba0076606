//! Binary scene cache.
//!
//! Little-endian layout: an 8-byte magic and a format version, followed by
//! sections in a fixed order (limits, timestamp, primitives, meshes,
//! materials, textures, lights, volume, transfer function). Record arrays are
//! written as their raw device layout.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{UVec3, Vec3};
use log::info;

use crate::error::{SceneError, SceneResult};
use crate::scene::{
    ControlPoint, Light, LightKind, MaterialLimits, MaterialRemap, MeshData, PrimitiveBuffer,
    PrimitiveKind, PrimitiveRecord, Scene, Subsystems, Texture, Timestamp, TransferFunction, Volume,
    Material,
};

const MAGIC: &[u8; 8] = b"RSCACHE\0";
const VERSION: u32 = 2;

/// Upper bound for any single length prefix. Guards against allocating from
/// a corrupt header.
const MAX_SECTION_BYTES: u64 = 1 << 34;

type LE = LittleEndian;

impl Scene {
    /// Writes the canonical scene to `path`, replacing any existing file.
    pub fn save_to_cache_file(&self, path: impl AsRef<Path>) -> SceneResult<()> {
        let path = path.as_ref();
        let mut w = BufWriter::new(File::create(path)?);

        w.write_all(MAGIC)?;
        w.write_u32::<LE>(VERSION)?;

        let limits = self.materials.limits();
        w.write_u32::<LE>(limits.max_materials)?;
        w.write_u32::<LE>(limits.system_materials)?;
        w.write_u64::<LE>(self.timestamp)?;

        write_buffers(&mut w, self.primitives.spheres())?;
        write_buffers(&mut w, self.primitives.cylinders())?;
        write_buffers(&mut w, self.primitives.cones())?;

        let meshes = &self.meshes;
        w.write_u32::<LE>(meshes.meshes().len() as u32)?;
        for range in meshes.meshes() {
            let vertices = range.vertex_offset..range.vertex_offset + range.vertex_count;
            let triangles = range.triangle_offset..range.triangle_offset + range.triangle_count;
            let base = range.vertex_offset as u32;
            let local: Vec<[u32; 3]> = meshes.indices()[triangles.clone()]
                .iter()
                .map(|[a, b, c]| [a - base, b - base, c - base])
                .collect();
            write_blob(&mut w, bytemuck::cast_slice(&meshes.vertices()[vertices.clone()]))?;
            write_blob(&mut w, bytemuck::cast_slice(&meshes.normals()[vertices.clone()]))?;
            write_blob(&mut w, bytemuck::cast_slice(&meshes.texcoords()[vertices]))?;
            write_blob(&mut w, bytemuck::cast_slice(&local))?;
            write_blob(&mut w, bytemuck::cast_slice(&meshes.materials()[triangles]))?;
        }

        w.write_u32::<LE>(self.materials.len() as u32)?;
        for (id, material) in self.materials.iter() {
            w.write_u32::<LE>(id)?;
            write_material(&mut w, material)?;
        }

        let textures: Vec<(&str, &Arc<Texture>)> = self.materials.textures().collect();
        w.write_u32::<LE>(textures.len() as u32)?;
        for (name, texture) in textures {
            write_string(&mut w, name)?;
            w.write_u32::<LE>(texture.width)?;
            w.write_u32::<LE>(texture.height)?;
            w.write_u8(texture.channels)?;
            write_blob(&mut w, &texture.data)?;
        }

        w.write_u32::<LE>(self.lights.len() as u32)?;
        for light in &self.lights {
            let (tag, vector) = match light.kind {
                LightKind::Point { position } => (0u8, position),
                LightKind::Directional { direction } => (1u8, direction),
            };
            w.write_u8(tag)?;
            write_f32s(&mut w, &vector.to_array())?;
            write_f32s(&mut w, &light.color)?;
            w.write_f32::<LE>(light.intensity)?;
            w.write_u8(light.casts_shadow as u8)?;
        }

        match &self.volume {
            Some(volume) => {
                w.write_u8(1)?;
                for d in volume.dimensions.to_array() {
                    w.write_u32::<LE>(d)?;
                }
                write_f32s(&mut w, &volume.spacing.to_array())?;
                write_f32s(&mut w, &volume.offset.to_array())?;
                write_blob(&mut w, &volume.data)?;
            }
            None => w.write_u8(0)?,
        }

        let points = self.transfer_function.points();
        w.write_u32::<LE>(points.len() as u32)?;
        for point in points {
            w.write_f32::<LE>(point.value)?;
            write_f32s(&mut w, &point.color)?;
            w.write_f32::<LE>(point.opacity)?;
        }

        w.flush()?;
        info!("Scene cache written to {}", path.display());
        Ok(())
    }

    /// Rebuilds a scene from a file written by [`Scene::save_to_cache_file`].
    ///
    /// The returned scene is fully dirty, so the next commit materialises
    /// everything.
    pub fn load_from_cache_file(path: impl AsRef<Path>) -> SceneResult<Scene> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| SceneError::configuration(path, format!("cannot open cache: {}", e)))?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SceneError::Cache(format!("{} is not a scene cache", path.display())));
        }
        let version = r.read_u32::<LE>()?;
        if version != VERSION {
            return Err(SceneError::Cache(format!(
                "unsupported cache version {} (expected {})",
                version, VERSION
            )));
        }

        let max_materials = r.read_u32::<LE>()?;
        let system_materials = r.read_u32::<LE>()?;
        let mut scene = Scene::new(MaterialLimits::new(max_materials, system_materials));
        scene.timestamp = r.read_u64::<LE>()?;

        for (material, buffer) in read_buffers(&mut r)? {
            scene.primitives.insert_spheres(material, buffer);
        }
        for (material, buffer) in read_buffers(&mut r)? {
            scene.primitives.insert_cylinders(material, buffer);
        }
        for (material, buffer) in read_buffers(&mut r)? {
            scene.primitives.insert_cones(material, buffer);
        }
        scene.world_bounds = scene.primitives.bounds();

        let mesh_count = r.read_u32::<LE>()?;
        for _ in 0..mesh_count {
            let vertices: Vec<[f32; 3]> = read_pod_vec(&mut r)?;
            let normals: Vec<[f32; 3]> = read_pod_vec(&mut r)?;
            let texcoords: Vec<[f32; 2]> = read_pod_vec(&mut r)?;
            let indices: Vec<[u32; 3]> = read_pod_vec(&mut r)?;
            let materials: Vec<u32> = read_pod_vec(&mut r)?;
            let mesh = MeshData {
                vertices: vertices.into_iter().map(Vec3::from_array).collect(),
                normals: normals.into_iter().map(Vec3::from_array).collect(),
                texcoords,
                indices,
                materials,
            };
            scene.append_mesh(mesh, &MaterialRemap::Preserve)?;
        }

        let material_count = r.read_u32::<LE>()?;
        for _ in 0..material_count {
            let id = r.read_u32::<LE>()?;
            let material = read_material(&mut r)?;
            scene.materials.set_material(id, material)?;
        }

        let texture_count = r.read_u32::<LE>()?;
        for _ in 0..texture_count {
            let name = read_string(&mut r)?;
            let width = r.read_u32::<LE>()?;
            let height = r.read_u32::<LE>()?;
            let channels = r.read_u8()?;
            let data = read_blob(&mut r)?;
            let texture = Texture::new(width, height, channels, data)
                .map_err(|e| SceneError::Cache(format!("texture '{}': {}", name, e)))?;
            scene.materials.register_texture(name, texture);
        }

        let light_count = r.read_u32::<LE>()?;
        for _ in 0..light_count {
            let tag = r.read_u8()?;
            let vector = Vec3::from_array(read_f32s(&mut r)?);
            let kind = match tag {
                0 => LightKind::Point { position: vector },
                1 => LightKind::Directional { direction: vector },
                other => return Err(SceneError::Cache(format!("unknown light kind {}", other))),
            };
            let color = read_f32s(&mut r)?;
            let intensity = r.read_f32::<LE>()?;
            let casts_shadow = r.read_u8()? != 0;
            scene.lights.push(Light {
                kind,
                color,
                intensity,
                casts_shadow,
            });
        }

        if r.read_u8()? != 0 {
            let dimensions = UVec3::new(r.read_u32::<LE>()?, r.read_u32::<LE>()?, r.read_u32::<LE>()?);
            let spacing = Vec3::from_array(read_f32s(&mut r)?);
            let offset = Vec3::from_array(read_f32s(&mut r)?);
            let data = read_blob(&mut r)?;
            let volume = Volume::new(dimensions, spacing, data)
                .map_err(|e| SceneError::Cache(e.to_string()))?
                .with_offset(offset);
            scene.volume = Some(volume);
        }

        let point_count = r.read_u32::<LE>()?;
        let mut points = Vec::with_capacity(point_count.min(4096) as usize);
        for _ in 0..point_count {
            let value = r.read_f32::<LE>()?;
            let color = read_f32s(&mut r)?;
            let opacity = r.read_f32::<LE>()?;
            points.push(ControlPoint::new(value, color, opacity));
        }
        scene.transfer_function = TransferFunction::new(points);

        scene.mark_dirty(Subsystems::all());
        info!(
            "Scene cache loaded from {}: {} spheres, {} cylinders, {} cones, {} triangles",
            path.display(),
            scene.primitives.count(PrimitiveKind::Sphere),
            scene.primitives.count(PrimitiveKind::Cylinder),
            scene.primitives.count(PrimitiveKind::Cone),
            scene.meshes.triangle_count()
        );
        Ok(scene)
    }
}

fn write_buffers<W: Write, R: PrimitiveRecord>(
    w: &mut W,
    buffers: &std::collections::BTreeMap<u32, PrimitiveBuffer<R>>,
) -> SceneResult<()> {
    w.write_u32::<LE>(buffers.len() as u32)?;
    for (&material, buffer) in buffers {
        w.write_u32::<LE>(material)?;
        write_blob(w, buffer.as_bytes())?;
        write_blob(w, bytemuck::cast_slice(buffer.timestamps()))?;
    }
    Ok(())
}

fn read_buffers<Rd: Read, R: PrimitiveRecord>(r: &mut Rd) -> SceneResult<Vec<(u32, PrimitiveBuffer<R>)>> {
    let count = r.read_u32::<LE>()?;
    let mut buffers = Vec::new();
    for _ in 0..count {
        let material = r.read_u32::<LE>()?;
        let records: Vec<R> = read_pod_vec(r)?;
        let timestamps: Vec<Timestamp> = read_pod_vec(r)?;
        let buffer = PrimitiveBuffer::from_parts(records, timestamps).ok_or_else(|| {
            SceneError::Cache(format!("{} buffer {} has mismatched timestamps", R::KIND, material))
        })?;
        buffers.push((material, buffer));
    }
    Ok(buffers)
}

fn write_material<W: Write>(w: &mut W, m: &Material) -> SceneResult<()> {
    write_f32s(w, &m.diffuse)?;
    write_f32s(w, &m.specular)?;
    for value in [m.specular_exponent, m.reflection, m.refraction, m.opacity, m.emission] {
        w.write_f32::<LE>(value)?;
    }
    match &m.diffuse_texture {
        Some(name) => {
            w.write_u8(1)?;
            write_string(w, name)?;
        }
        None => w.write_u8(0)?,
    }
    Ok(())
}

fn read_material<R: Read>(r: &mut R) -> SceneResult<Material> {
    let diffuse = read_f32s(r)?;
    let specular = read_f32s(r)?;
    let [specular_exponent, reflection, refraction, opacity, emission] = read_f32s::<_, 5>(r)?;
    let diffuse_texture = match r.read_u8()? {
        0 => None,
        _ => Some(read_string(r)?),
    };
    Ok(Material {
        diffuse,
        specular,
        specular_exponent,
        reflection,
        refraction,
        opacity,
        emission,
        diffuse_texture,
    })
}

fn write_f32s<W: Write>(w: &mut W, values: &[f32]) -> std::io::Result<()> {
    for &v in values {
        w.write_f32::<LE>(v)?;
    }
    Ok(())
}

fn read_f32s<R: Read, const N: usize>(r: &mut R) -> std::io::Result<[f32; N]> {
    let mut values = [0.0; N];
    r.read_f32_into::<LE>(&mut values)?;
    Ok(values)
}

fn write_blob<W: Write>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    w.write_u64::<LE>(bytes.len() as u64)?;
    w.write_all(bytes)
}

fn read_blob<R: Read>(r: &mut R) -> SceneResult<Vec<u8>> {
    let len = r.read_u64::<LE>()?;
    if len > MAX_SECTION_BYTES {
        return Err(SceneError::Cache(format!("section of {} bytes is too large", len)));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_pod_vec<R: Read, T: bytemuck::Pod>(r: &mut R) -> SceneResult<Vec<T>> {
    let bytes = read_blob(r)?;
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(SceneError::Cache(format!(
            "section of {} bytes is not a multiple of the {}-byte element",
            bytes.len(),
            size
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    write_blob(w, s.as_bytes())
}

fn read_string<R: Read>(r: &mut R) -> SceneResult<String> {
    String::from_utf8(read_blob(r)?).map_err(|e| SceneError::Cache(e.to_string()))
}
