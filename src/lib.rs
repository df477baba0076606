pub mod backend;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod loaders;
pub mod math;
pub mod scene;
pub mod types;

pub use backend::{BackendRegistry, SceneAdapter};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{BackendError, SceneError};
pub use scene::Scene;
