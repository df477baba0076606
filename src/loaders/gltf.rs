use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use glam::{Mat3, Mat4, Vec3};
use log::{debug, info, warn};

use crate::loaders::{MeshImporter, Placement};
use crate::scene::{Material, MaterialId, MaterialRemap, MeshData, Scene, Texture, NO_MATERIAL};

/// glTF / GLB mesh importer
#[derive(Debug, Clone)]
pub struct GltfMeshImporter {
    extension: String,
}

impl Default for GltfMeshImporter {
    fn default() -> Self {
        Self {
            extension: "gltf".to_string(),
        }
    }
}

impl GltfMeshImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks for `.glb` (or any other extension) files instead of `.gltf`
    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }
}

impl MeshImporter for GltfMeshImporter {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn import_mesh(&self, path: &Path, placement: &Placement, material: MaterialId, scene: &mut Scene) -> Result<usize> {
        let (gltf, buffers, images) =
            gltf::import(path).with_context(|| format!("Failed to load glTF file: {:?}", path))?;
        debug!(
            "glTF {:?}: {} nodes, {} meshes, {} materials, {} images",
            path,
            gltf.nodes().count(),
            gltf.meshes().count(),
            gltf.materials().count(),
            images.len()
        );

        let remap = if material == NO_MATERIAL {
            let prefix = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            register_textures(scene, &prefix, &images);
            register_materials(scene, &prefix, &gltf)?
        } else {
            MaterialRemap::Uniform(material)
        };

        let mut meshes = Vec::new();
        for gltf_scene in gltf.scenes() {
            for node in gltf_scene.nodes() {
                process_node(&node, &buffers, &placement.matrix(), &mut meshes)?;
            }
        }

        let mut appended = 0;
        for mesh in meshes {
            match scene.append_mesh(mesh, &remap) {
                Ok(_) => appended += 1,
                Err(e) => warn!("Skipping mesh primitive of {:?}: {}", path, e),
            }
        }
        info!("Imported {} mesh primitives from {:?}", appended, path);
        Ok(appended)
    }
}

fn register_textures(scene: &mut Scene, prefix: &str, images: &[gltf::image::Data]) {
    for (index, image) in images.iter().enumerate() {
        let channels = match image.format {
            gltf::image::Format::R8 => 1,
            gltf::image::Format::R8G8 => 2,
            gltf::image::Format::R8G8B8 => 3,
            gltf::image::Format::R8G8B8A8 => 4,
            other => {
                warn!("Unsupported texture format {:?} in {}, skipped", other, prefix);
                continue;
            }
        };
        match Texture::new(image.width, image.height, channels, image.pixels.clone()) {
            Ok(texture) => scene.register_texture(texture_name(prefix, index), texture),
            Err(e) => warn!("Skipping texture {} of {}: {}", index, prefix, e),
        }
    }
}

fn texture_name(prefix: &str, index: usize) -> String {
    format!("{}#{}", prefix, index)
}

/// Registers the file's materials under free geometry ids and returns the
/// file index → scene id table. Indices that find no free id fall back to
/// the shared default material.
fn register_materials(scene: &mut Scene, prefix: &str, gltf: &gltf::Document) -> Result<MaterialRemap> {
    let limits = scene.materials().limits();
    let mut free = (0..limits.geometry_materials()).filter(|&id| scene.material(id).is_none()).collect::<Vec<_>>();
    free.reverse();

    let mut table = HashMap::new();
    for (index, material) in gltf.materials().enumerate() {
        let index = material.index().unwrap_or(index);
        let Some(id) = free.pop() else {
            table.insert(index as MaterialId, NO_MATERIAL);
            continue;
        };
        let pbr = material.pbr_metallic_roughness();
        let [r, g, b, a] = pbr.base_color_factor();
        let mut properties = match pbr.base_color_texture() {
            Some(info) => Material::with_texture([r, g, b], texture_name(prefix, info.texture().source().index())),
            None => Material::with_color([r, g, b]),
        };
        properties.opacity = a;
        scene.set_material(id, properties)?;
        table.insert(index as MaterialId, id);
    }
    Ok(MaterialRemap::Table(table))
}

/// Recursively processes glTF nodes
fn process_node(
    node: &gltf::Node,
    buffers: &[gltf::buffer::Data],
    parent_transform: &Mat4,
    meshes: &mut Vec<MeshData>,
) -> Result<()> {
    let local_transform = Mat4::from_cols_array_2d(&node.transform().matrix());
    let global_transform = *parent_transform * local_transform;

    if let Some(mesh) = node.mesh() {
        process_mesh(&mesh, buffers, &global_transform, meshes)?;
    }

    for child in node.children() {
        process_node(&child, buffers, &global_transform, meshes)?;
    }

    Ok(())
}

/// One [`MeshData`] per triangle primitive
fn process_mesh(
    mesh: &gltf::Mesh,
    buffers: &[gltf::buffer::Data],
    transform: &Mat4,
    meshes: &mut Vec<MeshData>,
) -> Result<()> {
    let normal_matrix = Mat3::from_mat4(*transform).inverse().transpose();

    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            debug!("Skipping {:?} primitive of mesh {:?}", primitive.mode(), mesh.name());
            continue;
        }
        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

        let vertices: Vec<Vec3> = reader
            .read_positions()
            .context("Mesh primitive has no positions")?
            .map(|pos| transform.transform_point3(Vec3::from_array(pos)))
            .collect();

        let normals: Vec<Vec3> = reader
            .read_normals()
            .map(|normals| {
                normals
                    .map(|n| (normal_matrix * Vec3::from_array(n)).normalize_or_zero())
                    .collect()
            })
            .unwrap_or_default();

        let texcoords: Vec<[f32; 2]> = reader
            .read_tex_coords(0)
            .map(|uv| uv.into_f32().collect())
            .unwrap_or_default();

        let flat: Vec<u32> = match reader.read_indices() {
            Some(indices) => indices.into_u32().collect(),
            // No indices - treat as triangle list
            None => (0..vertices.len() as u32).collect(),
        };
        let indices: Vec<[u32; 3]> = flat
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();

        let materials = primitive
            .material()
            .index()
            .map(|i| vec![i as MaterialId])
            .unwrap_or_default();

        meshes.push(MeshData {
            vertices,
            normals,
            texcoords,
            indices,
            materials,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_error() {
        let mut scene = Scene::default();
        let importer = GltfMeshImporter::new();
        let result = importer.import_mesh(Path::new("/nonexistent/model.gltf"), &Placement::default(), 0, &mut scene);
        assert!(result.is_err());
        assert!(scene.is_empty());
    }

    #[test]
    fn test_triangle_is_placed_with_uniform_material() {
        let dir = tempfile::tempdir().unwrap();
        let positions: Vec<f32> = vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        std::fs::write(dir.path().join("triangle.bin"), bytemuck::cast_slice::<f32, u8>(&positions)).unwrap();
        let document = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "nodes": [0] }],
  "nodes": [{ "mesh": 0 }],
  "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
  "accessors": [{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0, 0, 0], "max": [1, 1, 0] }],
  "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
  "buffers": [{ "byteLength": 36, "uri": "triangle.bin" }]
}"#;
        let path = dir.path().join("triangle.gltf");
        std::fs::write(&path, document).unwrap();

        let mut scene = Scene::default();
        let placement = Placement::new(Vec3::new(10.0, 0.0, 0.0), 2.0);
        let appended = GltfMeshImporter::new()
            .import_mesh(&path, &placement, 3, &mut scene)
            .unwrap();
        assert_eq!(appended, 1);
        assert_eq!(scene.meshes().triangle_count(), 1);
        assert_eq!(scene.meshes().materials(), &[3]);
        assert_eq!(scene.meshes().vertices()[1], [12.0, 0.0, 0.0]);
        assert!(scene.world_bounds().contains_point(Vec3::new(10.0, 2.0, 0.0)));
    }
}
