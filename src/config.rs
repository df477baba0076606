//! Engine configuration, loaded from JSON and overridden by the CLI.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::bvh::{BvhConfig, SplitMethod};
use crate::error::{SceneError, SceneResult};
use crate::scene::{MaterialId, MaterialLimits, DEFAULT_MAX_MATERIALS, DEFAULT_SYSTEM_MATERIALS, NO_MATERIAL};

/// Acceleration-structure quality. Higher levels build slower and trace
/// faster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GeometryQuality {
    Fast,
    #[default]
    Medium,
    Max,
}

impl GeometryQuality {
    pub fn bvh_config(&self) -> BvhConfig {
        match self {
            GeometryQuality::Fast => BvhConfig {
                max_leaf_size: 8,
                sah_buckets: 0,
                split: SplitMethod::Median,
            },
            GeometryQuality::Medium => BvhConfig {
                max_leaf_size: 4,
                sah_buckets: 8,
                split: SplitMethod::Sah,
            },
            GeometryQuality::Max => BvhConfig {
                max_leaf_size: 2,
                sah_buckets: 16,
                split: SplitMethod::Sah,
            },
        }
    }
}

impl fmt::Display for GeometryQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GeometryQuality::Fast => "fast",
            GeometryQuality::Medium => "medium",
            GeometryQuality::Max => "max",
        })
    }
}

impl FromStr for GeometryQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" | "low" => Ok(GeometryQuality::Fast),
            "medium" => Ok(GeometryQuality::Medium),
            "max" | "high" => Ok(GeometryQuality::Max),
            other => Err(format!("unknown geometry quality '{}'", other)),
        }
    }
}

/// How imported objects are assigned materials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ColorScheme {
    /// Shared default material, recoloured from a palette after import
    #[default]
    None,
    /// One material per object, round-robin over the geometry ids
    ById,
    ProteinAtoms,
    ProteinChains,
    ProteinResidues,
}

impl ColorScheme {
    /// Material for the object with the given import index
    pub fn material_for(&self, object_index: usize, limits: &MaterialLimits) -> MaterialId {
        match self {
            ColorScheme::ById => {
                let available = limits.geometry_materials().max(1) as usize;
                (object_index % available) as MaterialId
            }
            _ => NO_MATERIAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: String,
    pub quality: GeometryQuality,
    pub color_scheme: ColorScheme,
    pub max_materials: u32,
    pub system_materials: u32,
    pub background: [f32; 3],
    pub cache_file: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: "cpu".to_string(),
            quality: GeometryQuality::default(),
            color_scheme: ColorScheme::default(),
            max_materials: DEFAULT_MAX_MATERIALS,
            system_materials: DEFAULT_SYSTEM_MATERIALS,
            background: [0.05, 0.05, 0.08],
            cache_file: None,
            width: 640,
            height: 480,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> SceneResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| SceneError::configuration(path, e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| SceneError::configuration(path, e.to_string()))
    }

    pub fn material_limits(&self) -> MaterialLimits {
        MaterialLimits::new(self.max_materials, self.system_materials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_id_scheme_wraps_over_geometry_materials() {
        let limits = MaterialLimits::new(64, 4);
        assert_eq!(ColorScheme::ById.material_for(61, &limits), 1);
        assert_eq!(ColorScheme::ById.material_for(59, &limits), 59);
        assert_eq!(ColorScheme::None.material_for(61, &limits), NO_MATERIAL);
        assert_eq!(ColorScheme::ProteinChains.material_for(3, &limits), NO_MATERIAL);
    }

    #[test]
    fn test_quality_levels_trade_build_cost() {
        let fast = GeometryQuality::Fast.bvh_config();
        let max = GeometryQuality::Max.bvh_config();
        assert_eq!(fast.split, SplitMethod::Median);
        assert!(fast.max_leaf_size > max.max_leaf_size);
        assert_eq!("high".parse::<GeometryQuality>(), Ok(GeometryQuality::Max));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "backend": "gpu", "quality": "max", "color_scheme": "by_id" }"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.backend, "gpu");
        assert_eq!(config.quality, GeometryQuality::Max);
        assert_eq!(config.color_scheme, ColorScheme::ById);
        assert_eq!(config.material_limits(), MaterialLimits::default());
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(SceneError::Configuration { .. })));
    }
}
