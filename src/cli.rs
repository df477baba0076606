// cli.rs - Command-line interface configuration
use std::path::PathBuf;

use clap::Parser;

use crate::config::{ColorScheme, EngineConfig, GeometryQuality};
use crate::error::SceneResult;
use crate::scene::Timestamp;

#[derive(Parser, Debug, Clone)]
#[command(name = "ray-scene")]
#[command(about = "Builds a scene and commits it to a ray-tracing backend", long_about = None)]
pub struct Cli {
    /// JSON engine configuration; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backend name (cpu, gpu)
    #[arg(long)]
    pub backend: Option<String>,

    #[arg(long, value_enum)]
    pub quality: Option<GeometryQuality>,

    #[arg(long, value_enum)]
    pub color_scheme: Option<ColorScheme>,

    /// Molecular system configuration file
    #[arg(long)]
    pub molecular_system: Option<PathBuf>,

    /// glTF files to import at the origin
    #[arg(long)]
    pub mesh: Vec<PathBuf>,

    /// Start from a scene cache file instead of importing
    #[arg(long)]
    pub load_cache: Option<PathBuf>,

    /// Write the scene cache after import
    #[arg(long)]
    pub save_cache: Option<PathBuf>,

    /// Simulation timestamp to commit
    #[arg(long)]
    pub timestamp: Option<Timestamp>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Image to write the traced frame to (binary PPM)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl Cli {
    /// Loads `--config` (or the defaults) and applies the flag overrides
    pub fn engine_config(&self) -> SceneResult<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(backend) = &self.backend {
            config.backend = backend.clone();
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if let Some(color_scheme) = self.color_scheme {
            config.color_scheme = color_scheme;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if self.save_cache.is_some() {
            config.cache_file = self.save_cache.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "backend": "gpu", "width": 320 }"#).unwrap();

        let cli = Cli::parse_from([
            "ray-scene",
            "--config",
            path.to_str().unwrap(),
            "--backend",
            "cpu",
            "--quality",
            "max",
            "--height",
            "200",
        ]);
        let config = cli.engine_config().unwrap();
        assert_eq!(config.backend, "cpu");
        assert_eq!(config.quality, GeometryQuality::Max);
        assert_eq!(config.width, 320);
        assert_eq!(config.height, 200);
    }

    #[test]
    fn test_repeated_mesh_flags() {
        let cli = Cli::parse_from(["ray-scene", "--mesh", "a.gltf", "--mesh", "b.glb", "--color-scheme", "by-id"]);
        assert_eq!(cli.mesh.len(), 2);
        assert_eq!(cli.color_scheme, Some(ColorScheme::ById));
    }
}
