use std::collections::BTreeMap;

use log::debug;

use crate::backend::{CpuSceneAdapter, GpuSceneAdapter, SceneAdapter};
use crate::config::EngineConfig;
use crate::error::{BackendError, BackendResult};

/// Builds an adapter for the given configuration
pub type BackendConstructor = fn(&EngineConfig) -> BackendResult<Box<dyn SceneAdapter>>;

/// Backend name → constructor.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    constructors: BTreeMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `cpu` and `gpu` backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("cpu", CpuSceneAdapter::from_config);
        registry.register("gpu", GpuSceneAdapter::from_config);
        registry
    }

    /// Registers `constructor` under `name`, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, constructor: BackendConstructor) {
        let name = name.into();
        debug!("Registered backend '{}'", name);
        self.constructors.insert(name, constructor);
    }

    pub fn create(&self, name: &str, config: &EngineConfig) -> BackendResult<Box<dyn SceneAdapter>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))?;
        constructor(config)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}
