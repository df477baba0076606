//! Scene plus the active backend adapter.

use std::path::Path;

use log::info;

use crate::backend::{AdapterStatus, BackendRegistry, CommitReport, RenderInput, RenderOutput, SceneAdapter};
use crate::config::EngineConfig;
use crate::error::{BackendResult, SceneResult};
use crate::scene::Scene;

/// Owns the canonical scene and the one adapter allowed to service it.
pub struct Engine {
    scene: Scene,
    adapter: Box<dyn SceneAdapter>,
    config: EngineConfig,
}

impl Engine {
    /// Creates the backend named by `config.backend`
    pub fn new(config: EngineConfig, registry: &BackendRegistry) -> BackendResult<Self> {
        let adapter = registry.create(&config.backend, &config)?;
        info!("Engine using the {} backend ({} quality)", adapter.name(), config.quality);
        Ok(Self {
            scene: Scene::new(config.material_limits()),
            adapter,
            config,
        })
    }

    pub fn with_adapter(config: EngineConfig, adapter: Box<dyn SceneAdapter>) -> Self {
        Self {
            scene: Scene::new(config.material_limits()),
            adapter,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn adapter(&self) -> &dyn SceneAdapter {
        self.adapter.as_ref()
    }

    pub fn status(&self) -> AdapterStatus {
        self.adapter.status(&self.scene)
    }

    pub fn commit(&mut self) -> BackendResult<CommitReport> {
        self.adapter.commit(&mut self.scene)
    }

    /// Commits pending changes, then traces one frame
    pub fn render(&mut self, input: &RenderInput, output: &mut RenderOutput) -> BackendResult<CommitReport> {
        let report = self.commit()?;
        self.adapter.trace(input, output)?;
        Ok(report)
    }

    /// Releases backend objects; the next commit rebuilds everything
    pub fn reset(&mut self) {
        self.adapter.reset();
    }

    pub fn save_cache(&self, path: impl AsRef<Path>) -> SceneResult<()> {
        self.adapter.save_scene_to_cache_file(&self.scene, path.as_ref())
    }

    /// Replaces the scene with the cached one and resets the adapter
    pub fn load_cache(&mut self, path: impl AsRef<Path>) -> SceneResult<()> {
        self.scene = Scene::load_from_cache_file(path)?;
        self.adapter.reset();
        Ok(())
    }
}
