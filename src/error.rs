//! Error types for scene import, storage and backend materialisation.

use std::path::PathBuf;
use thiserror::Error;

use crate::scene::MaterialId;

/// Errors raised while populating or persisting the canonical scene.
///
/// All of these are recoverable at the granularity of one source file or
/// object: the caller logs them and keeps whatever was imported so far.
#[derive(Error, Debug)]
pub enum SceneError {
    /// Missing or unreadable input file; the import is aborted and the scene
    /// is left unchanged.
    #[error("Configuration error in {path:?}: {reason}")]
    Configuration { path: PathBuf, reason: String },

    /// Bad index/vertex pairing; only the affected mesh is skipped.
    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),

    /// Unknown texture name; shading falls back to the untextured material.
    #[error("Missing texture: {0}")]
    MissingTexture(String),

    #[error("Material id {id} out of range (max {max})")]
    InvalidMaterial { id: MaterialId, max: u32 },

    #[error("Material id {id} is reserved for system use")]
    ReservedMaterial { id: MaterialId },

    #[error("Invalid cache file: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SceneError {
    pub fn configuration(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SceneError::Configuration {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a backend scene adapter.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend could not allocate a buffer or acceleration structure.
    /// Rendering cannot proceed.
    #[error("Backend allocation failure for {what} ({bytes} bytes)")]
    AllocationFailure { what: String, bytes: u64 },

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Device error: {0}")]
    Device(String),
}

impl BackendError {
    pub fn allocation(what: impl Into<String>, bytes: u64) -> Self {
        BackendError::AllocationFailure {
            what: what.into(),
            bytes,
        }
    }

    /// Whether the error prevents any further frame from being produced.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BackendError::AllocationFailure { .. } | BackendError::Device(_)
        )
    }
}

pub type SceneResult<T> = std::result::Result<T, SceneError>;
pub type BackendResult<T> = std::result::Result<T, BackendError>;
