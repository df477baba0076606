use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{SceneError, SceneResult};

pub type MaterialId = u32;

/// Sentinel for geometry imported without a material; resolved to the
/// registry's default material at commit time.
pub const NO_MATERIAL: MaterialId = u32::MAX;

pub const DEFAULT_MAX_MATERIALS: u32 = 200;
pub const DEFAULT_SYSTEM_MATERIALS: u32 = 15;

/// Size of the material id space and of its reserved tail.
///
/// Ids in `[max_materials - system_materials, max_materials)` belong to
/// UI/overlay materials and cannot be assigned to geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialLimits {
    pub max_materials: u32,
    pub system_materials: u32,
}

impl Default for MaterialLimits {
    fn default() -> Self {
        Self {
            max_materials: DEFAULT_MAX_MATERIALS,
            system_materials: DEFAULT_SYSTEM_MATERIALS,
        }
    }
}

impl MaterialLimits {
    pub fn new(max_materials: u32, system_materials: u32) -> Self {
        Self {
            max_materials,
            system_materials: system_materials.min(max_materials),
        }
    }

    /// Number of ids available to geometry.
    pub fn geometry_materials(&self) -> u32 {
        self.max_materials - self.system_materials
    }

    pub fn is_reserved(&self, id: MaterialId) -> bool {
        id >= self.geometry_materials() && id < self.max_materials
    }

    /// Checks that `id` may be referenced by a primitive or a mesh.
    pub fn check_geometry_material(&self, id: MaterialId) -> SceneResult<()> {
        if id == NO_MATERIAL {
            Ok(())
        } else if id >= self.max_materials {
            Err(SceneError::InvalidMaterial {
                id,
                max: self.max_materials,
            })
        } else if self.is_reserved(id) {
            Err(SceneError::ReservedMaterial { id })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub diffuse: [f32; 3],
    pub specular: [f32; 3],
    pub specular_exponent: f32,
    pub reflection: f32,
    pub refraction: f32,
    pub opacity: f32,
    pub emission: f32,
    pub diffuse_texture: Option<String>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse: [0.8, 0.8, 0.8],
            specular: [0.0, 0.0, 0.0],
            specular_exponent: 10.0,
            reflection: 0.0,
            refraction: 1.0,
            opacity: 1.0,
            emission: 0.0,
            diffuse_texture: None,
        }
    }
}

impl Material {
    pub fn with_color(diffuse: [f32; 3]) -> Self {
        Self {
            diffuse,
            ..Default::default()
        }
    }

    pub fn with_texture(diffuse: [f32; 3], texture: impl Into<String>) -> Self {
        Self {
            diffuse,
            diffuse_texture: Some(texture.into()),
            ..Default::default()
        }
    }
}

/// Decoded image, 8 bits per channel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl Texture {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> SceneResult<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if !(1..=4).contains(&channels) || data.len() != expected {
            return Err(SceneError::MalformedGeometry(format!(
                "texture {}x{}x{} with {} bytes",
                width,
                height,
                channels,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Expands the image to RGBA8.
    pub fn to_rgba8(&self) -> Vec<u8> {
        match self.channels {
            4 => self.data.clone(),
            3 => self
                .data
                .chunks(3)
                .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
                .collect(),
            2 => self
                .data
                .chunks(2)
                .flat_map(|rg| [rg[0], rg[1], 0, 255])
                .collect(),
            _ => self.data.iter().flat_map(|&l| [l, l, l, 255]).collect(),
        }
    }

    /// Nearest-neighbour lookup with wrapping, returns linear RGB in [0, 1].
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 3] {
        if self.width == 0 || self.height == 0 {
            return [1.0, 1.0, 1.0];
        }
        let u = uv[0] - uv[0].floor();
        let v = uv[1] - uv[1].floor();
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        let offset = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        let texel = &self.data[offset..offset + self.channels as usize];
        let channel = |c: usize| texel[c.min(texel.len() - 1)] as f32 / 255.0;
        match self.channels {
            1 => [channel(0); 3],
            2 => [channel(0), channel(1), 0.0],
            _ => [channel(0), channel(1), channel(2)],
        }
    }
}

/// What a material update touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialChange {
    /// Colour and coefficients only.
    Numeric,
    /// The texture binding changed.
    Texture,
}

/// Material id → properties, texture name → decoded image.
#[derive(Debug, Clone)]
pub struct MaterialRegistry {
    limits: MaterialLimits,
    default_material: Material,
    materials: BTreeMap<MaterialId, Material>,
    textures: BTreeMap<String, Arc<Texture>>,
}

impl Default for MaterialRegistry {
    fn default() -> Self {
        Self::new(MaterialLimits::default())
    }
}

impl MaterialRegistry {
    pub fn new(limits: MaterialLimits) -> Self {
        Self {
            limits,
            default_material: Material::default(),
            materials: BTreeMap::new(),
            textures: BTreeMap::new(),
        }
    }

    pub fn limits(&self) -> MaterialLimits {
        self.limits
    }

    pub fn set_material(&mut self, id: MaterialId, material: Material) -> SceneResult<MaterialChange> {
        if id >= self.limits.max_materials {
            return Err(SceneError::InvalidMaterial {
                id,
                max: self.limits.max_materials,
            });
        }
        let previous_texture = self.materials.get(&id).and_then(|m| m.diffuse_texture.clone());
        let change = if previous_texture != material.diffuse_texture {
            MaterialChange::Texture
        } else {
            MaterialChange::Numeric
        };
        self.materials.insert(id, material);
        Ok(change)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    pub fn default_material(&self) -> &Material {
        &self.default_material
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, &Material)> {
        self.materials.iter().map(|(&id, m)| (id, m))
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Overwrites the diffuse colour of every registered material.
    pub fn recolor(&mut self, color_of: impl Fn(usize) -> [f32; 3]) {
        for (index, material) in self.materials.values_mut().enumerate() {
            material.diffuse = color_of(index);
        }
    }

    pub fn register_texture(&mut self, name: impl Into<String>, texture: Texture) {
        self.textures.insert(name.into(), Arc::new(texture));
    }

    pub fn texture(&self, name: &str) -> Option<&Arc<Texture>> {
        self.textures.get(name)
    }

    /// Like [`Self::texture`], but an unknown name is a `MissingTexture` error.
    pub fn require_texture(&self, name: &str) -> SceneResult<&Arc<Texture>> {
        self.texture(name)
            .ok_or_else(|| SceneError::MissingTexture(name.to_string()))
    }

    pub fn textures(&self) -> impl Iterator<Item = (&str, &Arc<Texture>)> {
        self.textures.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn clear(&mut self) {
        self.materials.clear();
        self.textures.clear();
    }
}
