use std::collections::HashMap;

use glam::Vec3;

use crate::error::{SceneError, SceneResult};
use crate::math::AABB;
use crate::scene::{MaterialId, NO_MATERIAL};

pub type MeshId = usize;

/// One imported triangle mesh, before consolidation.
///
/// `normals` and `texcoords` are either empty or one per vertex.
/// `materials` is empty (no material), a single id for the whole mesh, or
/// one id per triangle.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub texcoords: Vec<[f32; 2]>,
    pub indices: Vec<[u32; 3]>,
    pub materials: Vec<MaterialId>,
}

/// How loader-provided material ids are mapped onto scene material ids.
#[derive(Debug, Clone, Default)]
pub enum MaterialRemap {
    /// Keep the ids found in the file.
    #[default]
    Preserve,
    /// Every triangle of the mesh gets the same material.
    Uniform(MaterialId),
    /// Per-id lookup; ids missing from the table are kept.
    Table(HashMap<MaterialId, MaterialId>),
}

impl MaterialRemap {
    pub fn apply(&self, id: MaterialId) -> MaterialId {
        match self {
            MaterialRemap::Preserve => id,
            MaterialRemap::Uniform(material) => *material,
            MaterialRemap::Table(table) => table.get(&id).copied().unwrap_or(id),
        }
    }
}

/// Location of one appended mesh inside the consolidated buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshRange {
    pub vertex_offset: usize,
    pub vertex_count: usize,
    pub triangle_offset: usize,
    pub triangle_count: usize,
    pub bounds: AABB,
}

/// Consolidated vertex/index/normal/texcoord/material buffers of every mesh
/// in the scene.
#[derive(Debug, Clone)]
pub struct MeshStore {
    vertices: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    texcoords: Vec<[f32; 2]>,
    indices: Vec<[u32; 3]>,
    materials: Vec<MaterialId>,
    meshes: Vec<MeshRange>,
    bounds: AABB,
}

impl Default for MeshStore {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            normals: Vec::new(),
            texcoords: Vec::new(),
            indices: Vec::new(),
            materials: Vec::new(),
            meshes: Vec::new(),
            bounds: AABB::EMPTY,
        }
    }
}

impl MeshStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `mesh` into the consolidated buffers, rebasing its indices by
    /// the current vertex count and remapping its material ids.
    ///
    /// Nothing is appended when the mesh is malformed.
    pub fn append(&mut self, mesh: MeshData, remap: &MaterialRemap) -> SceneResult<MeshId> {
        Self::validate(&mesh)?;

        let vertex_offset = self.vertices.len();
        if vertex_offset + mesh.vertices.len() > u32::MAX as usize {
            return Err(SceneError::MalformedGeometry(format!(
                "vertex count {} exceeds 32-bit index range",
                vertex_offset + mesh.vertices.len()
            )));
        }

        let normals = if mesh.normals.is_empty() {
            smooth_normals(&mesh.vertices, &mesh.indices)
        } else {
            mesh.normals
        };

        let mut bounds = AABB::EMPTY;
        for v in &mesh.vertices {
            bounds.grow_point(*v);
        }

        let triangle_offset = self.indices.len();
        let base = vertex_offset as u32;
        self.indices.extend(
            mesh.indices
                .iter()
                .map(|[a, b, c]| [a + base, b + base, c + base]),
        );
        let material_of = |triangle: usize| match mesh.materials.len() {
            0 => NO_MATERIAL,
            1 => mesh.materials[0],
            _ => mesh.materials[triangle],
        };
        self.materials.extend(
            (0..mesh.indices.len()).map(|t| remap.apply(material_of(t))),
        );

        self.vertices.extend(mesh.vertices.iter().map(|v| v.to_array()));
        self.normals.extend(normals.iter().map(|n| n.to_array()));
        if mesh.texcoords.is_empty() {
            self.texcoords
                .extend(std::iter::repeat([0.0, 0.0]).take(mesh.vertices.len()));
        } else {
            self.texcoords.extend_from_slice(&mesh.texcoords);
        }

        self.bounds.grow(&bounds);
        self.meshes.push(MeshRange {
            vertex_offset,
            vertex_count: mesh.vertices.len(),
            triangle_offset,
            triangle_count: mesh.indices.len(),
            bounds,
        });
        Ok(self.meshes.len() - 1)
    }

    fn validate(mesh: &MeshData) -> SceneResult<()> {
        let vertex_count = mesh.vertices.len();
        if !mesh.normals.is_empty() && mesh.normals.len() != vertex_count {
            return Err(SceneError::MalformedGeometry(format!(
                "{} normals for {} vertices",
                mesh.normals.len(),
                vertex_count
            )));
        }
        if !mesh.texcoords.is_empty() && mesh.texcoords.len() != vertex_count {
            return Err(SceneError::MalformedGeometry(format!(
                "{} texture coordinates for {} vertices",
                mesh.texcoords.len(),
                vertex_count
            )));
        }
        if mesh.materials.len() > 1 && mesh.materials.len() != mesh.indices.len() {
            return Err(SceneError::MalformedGeometry(format!(
                "{} material ids for {} triangles",
                mesh.materials.len(),
                mesh.indices.len()
            )));
        }
        if let Some(bad) = mesh
            .indices
            .iter()
            .flatten()
            .find(|&&i| i as usize >= vertex_count)
        {
            return Err(SceneError::MalformedGeometry(format!(
                "index {} out of range for {} vertices",
                bad, vertex_count
            )));
        }
        Ok(())
    }

    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    pub fn texcoords(&self) -> &[[f32; 2]] {
        &self.texcoords
    }

    pub fn indices(&self) -> &[[u32; 3]] {
        &self.indices
    }

    /// Material id of every triangle.
    pub fn materials(&self) -> &[MaterialId] {
        &self.materials
    }

    pub fn meshes(&self) -> &[MeshRange] {
        &self.meshes
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn bounds(&self) -> AABB {
        self.bounds
    }

    pub fn triangle_bounds(&self, triangle: usize) -> AABB {
        let mut bounds = AABB::EMPTY;
        for &i in &self.indices[triangle] {
            bounds.grow_point(Vec3::from_array(self.vertices[i as usize]));
        }
        bounds
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Area-weighted vertex normals for meshes imported without normals.
fn smooth_normals(vertices: &[Vec3], indices: &[[u32; 3]]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for &[a, b, c] in indices {
        let (a, b, c) = (a as usize, b as usize, c as usize);
        let face = (vertices[b] - vertices[a]).cross(vertices[c] - vertices[a]);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals
        .into_iter()
        .map(|n| {
            let n = n.normalize_or_zero();
            if n == Vec3::ZERO {
                Vec3::Y
            } else {
                n
            }
        })
        .collect()
}
