//! Backend scene adapters.
//!
//! A [`SceneAdapter`] turns the canonical [`Scene`] into backend-native
//! buffers and acceleration structures. [`SceneAdapter::commit`] inspects the
//! scene's dirty flags and services them in [`COMMIT_ORDER`], clearing each
//! flag only after its step succeeded.

pub mod cpu;
pub mod gpu;
mod registry;

pub use cpu::CpuSceneAdapter;
pub use gpu::GpuSceneAdapter;
pub use registry::{BackendConstructor, BackendRegistry};

use std::path::Path;

use glam::Mat4;
use log::debug;

use crate::error::{BackendError, BackendResult, SceneResult};
use crate::math::AABB;
use crate::scene::{PrimitiveKind, Scene, Subsystems, COMMIT_ORDER};

/// Record buffers are allocated in multiples of this many records.
pub const ALLOCATION_GRANULE: usize = 256;

/// Records reserved for `count` visible records.
pub fn allocation_for(count: usize) -> usize {
    count.div_ceil(ALLOCATION_GRANULE).max(1) * ALLOCATION_GRANULE
}

/// Identity of an uploaded texture. Every upload issues a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdapterState {
    /// No backend object exists; the next commit rebuilds everything.
    #[default]
    Uncommitted,
    Committed,
}

/// Adapter state as seen against a particular scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Uncommitted,
    Committed,
    Stale(Subsystems),
}

/// Work counters. Two commits of an unchanged scene leave them untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Per-(kind, material) geometry objects built, mesh geometry included
    pub geometry_builds: usize,
    pub group_builds: usize,
    pub simulation_updates: usize,
    pub material_creations: usize,
    pub material_updates: usize,
    pub texture_uploads: usize,
    pub light_allocations: usize,
    pub light_uploads: usize,
    pub volume_uploads: usize,
    pub transfer_function_uploads: usize,
}

impl BackendStats {
    pub fn total_work(&self) -> usize {
        self.geometry_builds
            + self.group_builds
            + self.simulation_updates
            + self.material_creations
            + self.material_updates
            + self.texture_uploads
            + self.light_uploads
            + self.volume_uploads
            + self.transfer_function_uploads
    }
}

/// Element counts of the committed geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryCounts {
    /// Records per primitive kind, indexed by [`PrimitiveKind::index`]
    pub elements: [usize; 3],
    /// Records visible at the committed timestamp
    pub visible: [usize; 3],
    pub triangles: usize,
    /// Entries of the top-level group
    pub instances: usize,
    pub bounds: AABB,
}

impl Default for GeometryCounts {
    fn default() -> Self {
        Self {
            elements: [0; 3],
            visible: [0; 3],
            triangles: 0,
            instances: 0,
            bounds: AABB::EMPTY,
        }
    }
}

impl GeometryCounts {
    pub fn count(&self, kind: PrimitiveKind) -> usize {
        self.elements[kind.index()]
    }

    pub fn visible(&self, kind: PrimitiveKind) -> usize {
        self.visible[kind.index()]
    }
}

/// Which subsystems a commit serviced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub serviced: Subsystems,
    /// Whether materials were refreshed in update-only mode
    pub materials_update_only: bool,
}

impl CommitReport {
    pub fn is_noop(&self) -> bool {
        self.serviced.is_empty()
    }
}

/// Camera matrices for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderInput {
    pub view: Mat4,
    pub projection: Mat4,
}

impl RenderInput {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self { view, projection }
    }

    pub fn inverse_view_projection(&self) -> Mat4 {
        (self.projection * self.view).inverse()
    }
}

/// Colour (RGBA8, row-major, top row first) and depth (ray distance,
/// infinity on miss) buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub width: u32,
    pub height: u32,
    pub color: Vec<u8>,
    pub depth: Vec<f32>,
}

impl RenderOutput {
    pub fn new(width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            width,
            height,
            color: vec![0; pixels * 4],
            depth: vec![f32::INFINITY; pixels],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.color[offset],
            self.color[offset + 1],
            self.color[offset + 2],
            self.color[offset + 3],
        ]
    }

    pub fn depth_at(&self, x: u32, y: u32) -> f32 {
        self.depth[y as usize * self.width as usize + x as usize]
    }
}

/// Contract every rendering backend implements.
///
/// Only one adapter may service a given scene at a time; the adapter owns
/// every backend object it creates and never mutates the canonical stores
/// beyond clearing dirty flags.
pub trait SceneAdapter {
    fn name(&self) -> &'static str;

    fn state(&self) -> AdapterState;

    fn set_state(&mut self, state: AdapterState);

    /// Rebuilds one geometry object per non-empty (kind, material) buffer,
    /// the mesh geometry and the top-level group. Either replaces all of them
    /// or leaves the previous ones intact.
    fn build_geometry(&mut self, scene: &Scene) -> BackendResult<()>;

    /// Applies the visible record counts of the scene timestamp.
    fn commit_simulation_data(&mut self, scene: &Scene) -> BackendResult<()>;

    fn commit_materials(&mut self, scene: &Scene, update_only: bool) -> BackendResult<()>;

    fn commit_lights(&mut self, scene: &Scene) -> BackendResult<()>;

    fn commit_volume_data(&mut self, scene: &Scene) -> BackendResult<()>;

    fn commit_transfer_function_data(&mut self, scene: &Scene) -> BackendResult<()>;

    /// Releases every backend object. Canonical data is untouched.
    fn reset(&mut self);

    fn stats(&self) -> BackendStats;

    fn geometry_counts(&self) -> GeometryCounts;

    /// Renders one frame from the committed state
    fn trace(&self, input: &RenderInput, output: &mut RenderOutput) -> BackendResult<()>;

    fn status(&self, scene: &Scene) -> AdapterStatus {
        match self.state() {
            AdapterState::Uncommitted => AdapterStatus::Uncommitted,
            AdapterState::Committed if scene.dirty().is_empty() => AdapterStatus::Committed,
            AdapterState::Committed => AdapterStatus::Stale(scene.dirty()),
        }
    }

    /// Services pending subsystems in commit order.
    ///
    /// On error the failing subsystem and every later one stay dirty.
    fn commit(&mut self, scene: &mut Scene) -> BackendResult<CommitReport> {
        let uncommitted = self.state() == AdapterState::Uncommitted;
        let pending = if uncommitted {
            Subsystems::all()
        } else {
            scene.dirty()
        };
        let mut report = CommitReport::default();
        if pending.is_empty() {
            return Ok(report);
        }
        debug!("{}: committing {:?}", self.name(), pending);

        for step in COMMIT_ORDER {
            let serviced = if step == Subsystems::MATERIALS {
                step | Subsystems::TEXTURES
            } else {
                step
            };
            if !pending.intersects(serviced) {
                continue;
            }

            if step == Subsystems::GEOMETRY {
                self.build_geometry(scene)?;
            } else if step == Subsystems::SIMULATION {
                self.commit_simulation_data(scene)?;
            } else if step == Subsystems::MATERIALS {
                let update_only = !uncommitted && !pending.contains(Subsystems::TEXTURES);
                self.commit_materials(scene, update_only)?;
                report.materials_update_only = update_only;
            } else if step == Subsystems::LIGHTS {
                self.commit_lights(scene)?;
            } else if step == Subsystems::VOLUME {
                self.commit_volume_data(scene)?;
            } else if step == Subsystems::TRANSFER_FUNCTION {
                self.commit_transfer_function_data(scene)?;
            }

            scene.clear_dirty(serviced);
            report.serviced |= serviced & pending;
        }

        self.set_state(AdapterState::Committed);
        Ok(report)
    }

    /// Writes the canonical scene, not backend objects, to `path`
    fn save_scene_to_cache_file(&self, scene: &Scene, path: &Path) -> SceneResult<()> {
        scene.save_to_cache_file(path)
    }
}

/// Fallible reservation used for every host-side backend buffer.
pub(crate) fn try_alloc<T>(what: &str, len: usize) -> BackendResult<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| BackendError::allocation(what, len.saturating_mul(std::mem::size_of::<T>()) as u64))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_rounds_up_to_granule() {
        assert_eq!(allocation_for(0), ALLOCATION_GRANULE);
        assert_eq!(allocation_for(1), ALLOCATION_GRANULE);
        assert_eq!(allocation_for(256), 256);
        assert_eq!(allocation_for(257), 512);
    }

    #[test]
    fn test_try_alloc_reports_allocation_failure() {
        let err = try_alloc::<u64>("huge", usize::MAX / 4).unwrap_err();
        assert!(matches!(err, BackendError::AllocationFailure { .. }));
        assert!(try_alloc::<u8>("small", 16).unwrap().capacity() >= 16);
    }

    #[test]
    fn test_render_output_starts_at_infinite_depth() {
        let output = RenderOutput::new(4, 2);
        assert_eq!(output.color.len(), 32);
        assert!(output.depth_at(3, 1).is_infinite());
    }
}
