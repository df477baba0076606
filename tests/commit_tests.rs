use glam::{Mat4, UVec3, Vec3};
use ray_scene::backend::{
    AdapterState, AdapterStatus, BackendStats, CpuSceneAdapter, GeometryCounts, RenderInput, RenderOutput,
    SceneAdapter,
};
use ray_scene::config::GeometryQuality;
use ray_scene::error::{BackendError, BackendResult};
use ray_scene::scene::{
    ControlPoint, Light, Material, MaterialLimits, MaterialRemap, MeshData, Primitive, PrimitiveKind, Scene,
    Subsystems, Texture, TransferFunction, Volume,
};

fn populated_scene() -> Scene {
    let mut scene = Scene::new(MaterialLimits::new(32, 4));
    for i in 0..40 {
        let x = i as f32;
        scene.add_primitive(
            (i % 3) as u32,
            (i % 4) as u64,
            Primitive::Sphere {
                center: Vec3::new(x, 0.0, 0.0),
                radius: 0.4,
            },
        );
    }
    scene.add_primitive(
        1,
        0,
        Primitive::Cylinder {
            center: Vec3::new(0.0, -5.0, 0.0),
            up: Vec3::new(0.0, 5.0, 0.0),
            radius: 0.2,
        },
    );
    scene.add_primitive(
        2,
        1,
        Primitive::Cone {
            center: Vec3::new(0.0, 0.0, -3.0),
            up: Vec3::new(0.0, 0.0, 3.0),
            center_radius: 1.0,
            up_radius: 0.0,
        },
    );
    scene
        .append_mesh(
            MeshData {
                vertices: vec![Vec3::new(-10.0, -10.0, -20.0), Vec3::new(10.0, -10.0, -20.0), Vec3::new(0.0, 10.0, -20.0)],
                indices: vec![[0, 1, 2]],
                texcoords: vec![[0.0, 0.0], [1.0, 0.0], [0.5, 1.0]],
                ..Default::default()
            },
            &MaterialRemap::Uniform(5),
        )
        .unwrap();
    scene.register_texture("checker", Texture::new(2, 2, 3, vec![0, 0, 0, 255, 255, 255, 255, 255, 255, 0, 0, 0]).unwrap());
    scene
        .set_material(5, Material::with_texture([1.0; 3], "checker"))
        .unwrap();
    scene.set_material(0, Material::with_color([1.0, 0.0, 0.0])).unwrap();
    scene.add_light(Light::point(Vec3::new(0.0, 20.0, 20.0), [1.0; 3], 1.0));
    scene.set_timestamp(3);
    scene
}

fn cpu() -> CpuSceneAdapter {
    CpuSceneAdapter::new(GeometryQuality::Medium, [0.0; 3])
}

#[cfg(test)]
mod idempotence_tests {
    use super::*;

    #[test]
    fn test_second_commit_does_no_work() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        let first = adapter.commit(&mut scene).unwrap();
        assert_eq!(first.serviced, Subsystems::all());
        assert!(scene.dirty().is_empty());
        let stats = adapter.stats();
        let counts = adapter.geometry_counts();

        let second = adapter.commit(&mut scene).unwrap();
        assert!(second.is_noop());
        assert_eq!(adapter.stats(), stats);
        assert_eq!(adapter.geometry_counts(), counts);
        assert_eq!(adapter.status(&scene), AdapterStatus::Committed);
    }

    #[test]
    fn test_reset_then_commit_rebuilds_identically() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();
        let counts = adapter.geometry_counts();
        let builds = adapter.stats().group_builds;

        adapter.reset();
        assert_eq!(adapter.status(&scene), AdapterStatus::Uncommitted);
        assert_eq!(adapter.geometry_counts(), GeometryCounts::default());

        let report = adapter.commit(&mut scene).unwrap();
        assert_eq!(report.serviced, Subsystems::all());
        assert!(!report.materials_update_only);
        assert_eq!(adapter.geometry_counts(), counts);
        assert_eq!(adapter.stats().group_builds, builds + 1);
    }

    #[test]
    fn test_group_bounds_equal_world_bounds() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();
        assert_eq!(adapter.geometry_counts().bounds, scene.world_bounds());
    }

    #[test]
    fn test_counts_per_kind() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();
        let counts = adapter.geometry_counts();
        assert_eq!(counts.count(PrimitiveKind::Sphere), 40);
        assert_eq!(counts.count(PrimitiveKind::Cylinder), 1);
        assert_eq!(counts.count(PrimitiveKind::Cone), 1);
        assert_eq!(counts.triangles, 1);
        // three sphere buffers, one cylinder, one cone, one mesh
        assert_eq!(counts.instances, 6);
        assert_eq!(counts.visible(PrimitiveKind::Sphere), 40);
    }
}

#[cfg(test)]
mod selective_commit_tests {
    use super::*;

    #[test]
    fn test_numeric_material_change_is_update_only() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();
        let before = adapter.stats();
        let handle = adapter.texture_handle(5);
        assert!(handle.is_some());

        scene
            .set_material(5, Material::with_texture([0.5, 0.5, 1.0], "checker"))
            .unwrap();
        let report = adapter.commit(&mut scene).unwrap();
        assert_eq!(report.serviced, Subsystems::MATERIALS);
        assert!(report.materials_update_only);

        let after = adapter.stats();
        assert_eq!(after.geometry_builds, before.geometry_builds);
        assert_eq!(after.texture_uploads, before.texture_uploads);
        assert!(after.material_updates > before.material_updates);
        assert_eq!(adapter.texture_handle(5), handle);
        assert_eq!(adapter.material_diffuse(5), Some([0.5, 0.5, 1.0]));
    }

    #[test]
    fn test_replaced_texture_is_uploaded_again() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();
        let handle = adapter.texture_handle(5);

        scene.register_texture("checker", Texture::new(1, 1, 4, vec![9, 9, 9, 255]).unwrap());
        let report = adapter.commit(&mut scene).unwrap();
        assert!(!report.materials_update_only);
        assert_ne!(adapter.texture_handle(5), handle);
    }

    #[test]
    fn test_timestamp_change_updates_visibility_without_rebuild() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();
        let builds = adapter.stats().group_builds;

        scene.set_timestamp(0);
        let report = adapter.commit(&mut scene).unwrap();
        assert_eq!(report.serviced, Subsystems::SIMULATION);
        assert_eq!(adapter.stats().group_builds, builds);
        assert_eq!(
            adapter.geometry_counts().visible(PrimitiveKind::Sphere),
            scene.primitives().serialized_size_for_timestamp(PrimitiveKind::Sphere, 0)
        );
        assert_eq!(adapter.geometry_counts().visible(PrimitiveKind::Cone), 0);
    }

    #[test]
    fn test_light_buffer_is_reallocated_only_when_count_changes() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();
        let before = adapter.stats();

        scene.set_lights(vec![Light::point(Vec3::ONE, [0.5; 3], 3.0)]);
        adapter.commit(&mut scene).unwrap();
        let same_count = adapter.stats();
        assert_eq!(same_count.light_allocations, before.light_allocations);
        assert_eq!(same_count.light_uploads, before.light_uploads + 1);

        scene.add_light(Light::directional(Vec3::NEG_Y, [1.0; 3], 1.0));
        adapter.commit(&mut scene).unwrap();
        assert_eq!(adapter.stats().light_allocations, before.light_allocations + 1);
        assert_eq!(adapter.light_count(), 2);
        assert_eq!(adapter.stats().geometry_builds, before.geometry_builds);
    }

    #[test]
    fn test_transfer_function_after_volume() {
        let mut scene = populated_scene();
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();

        scene.set_transfer_function(TransferFunction::new(vec![
            ControlPoint::new(0.0, [0.0; 3], 0.0),
            ControlPoint::new(1.0, [1.0; 3], 1.0),
        ]));
        adapter.commit(&mut scene).unwrap();
        assert_eq!(adapter.stats().transfer_function_uploads, 0);

        scene.set_volume(Volume::new(UVec3::new(4, 4, 4), Vec3::ONE, vec![128; 64]).unwrap());
        adapter.commit(&mut scene).unwrap();
        assert_eq!(adapter.volume_voxels(), 64);
        assert_eq!(adapter.stats().transfer_function_uploads, 1);
        assert_eq!(adapter.color_map().last(), Some(&[1.0, 1.0, 1.0, 1.0]));

        scene.clear_volume();
        adapter.commit(&mut scene).unwrap();
        assert!(!adapter.has_volume());
    }
}

#[cfg(test)]
mod visibility_tests {
    use super::*;

    fn camera() -> RenderInput {
        RenderInput::new(
            Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y),
            Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0),
        )
    }

    #[test]
    fn test_out_of_order_records_keep_visible_prefix() {
        let mut scene = Scene::default();
        // Appended late first: occludes the earlier sphere once visible
        scene.add_primitive(
            0,
            5,
            Primitive::Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            },
        );
        scene.add_primitive(
            0,
            0,
            Primitive::Sphere {
                center: Vec3::new(0.0, 0.0, -4.0),
                radius: 1.0,
            },
        );
        let mut adapter = cpu();
        adapter.commit(&mut scene).unwrap();
        assert_eq!(adapter.geometry_counts().visible(PrimitiveKind::Sphere), 1);

        let mut output = RenderOutput::new(3, 3);
        adapter.trace(&camera(), &mut output).unwrap();
        let far = output.depth_at(1, 1);
        assert!(far > 11.0 && far < 14.0, "expected the timestamp 0 sphere, depth {}", far);

        scene.set_timestamp(5);
        adapter.commit(&mut scene).unwrap();
        assert_eq!(adapter.geometry_counts().visible(PrimitiveKind::Sphere), 2);
        adapter.trace(&camera(), &mut output).unwrap();
        assert!(output.depth_at(1, 1) < 10.0);
    }

    #[test]
    fn test_transfer_function_changed_without_volume_applies_to_next_volume() {
        let volume = || Volume::new(UVec3::new(2, 2, 2), Vec3::ONE, vec![64; 8]).unwrap();
        let mut scene = populated_scene();
        let mut adapter = cpu();
        scene.set_volume(volume());
        adapter.commit(&mut scene).unwrap();
        assert!(!adapter.color_map().is_empty());

        scene.clear_volume();
        adapter.commit(&mut scene).unwrap();
        assert!(adapter.color_map().is_empty());

        scene.set_transfer_function(TransferFunction::new(vec![
            ControlPoint::new(0.0, [0.0; 3], 0.0),
            ControlPoint::new(1.0, [1.0, 0.0, 0.0], 1.0),
        ]));
        adapter.commit(&mut scene).unwrap();

        scene.set_volume(volume());
        adapter.commit(&mut scene).unwrap();
        assert_eq!(adapter.color_map().last(), Some(&[1.0, 0.0, 0.0, 1.0]));
        assert_eq!(
            adapter.color_map(),
            scene.transfer_function().to_color_map(ray_scene::scene::COLOR_MAP_SIZE).as_slice()
        );
    }
}

/// Adapter whose lights step always fails.
#[derive(Default)]
struct FailingLights {
    state: AdapterState,
    stats: BackendStats,
}

impl SceneAdapter for FailingLights {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn state(&self) -> AdapterState {
        self.state
    }

    fn set_state(&mut self, state: AdapterState) {
        self.state = state;
    }

    fn build_geometry(&mut self, _scene: &Scene) -> BackendResult<()> {
        self.stats.geometry_builds += 1;
        Ok(())
    }

    fn commit_simulation_data(&mut self, _scene: &Scene) -> BackendResult<()> {
        Ok(())
    }

    fn commit_materials(&mut self, _scene: &Scene, _update_only: bool) -> BackendResult<()> {
        Ok(())
    }

    fn commit_lights(&mut self, _scene: &Scene) -> BackendResult<()> {
        Err(BackendError::allocation("light buffer", 32))
    }

    fn commit_volume_data(&mut self, _scene: &Scene) -> BackendResult<()> {
        Ok(())
    }

    fn commit_transfer_function_data(&mut self, _scene: &Scene) -> BackendResult<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.state = AdapterState::Uncommitted;
    }

    fn stats(&self) -> BackendStats {
        self.stats
    }

    fn geometry_counts(&self) -> GeometryCounts {
        GeometryCounts::default()
    }

    fn trace(&self, _input: &RenderInput, _output: &mut RenderOutput) -> BackendResult<()> {
        Err(BackendError::Unsupported("tracing"))
    }
}

#[cfg(test)]
mod failure_tests {
    use super::*;

    #[test]
    fn test_failed_step_keeps_it_and_later_steps_dirty() {
        let mut scene = populated_scene();
        let mut adapter = FailingLights::default();
        let err = adapter.commit(&mut scene).unwrap_err();
        assert!(err.is_fatal());

        let dirty = scene.dirty();
        assert!(!dirty.intersects(Subsystems::GEOMETRY | Subsystems::SIMULATION | Subsystems::MATERIALS));
        assert!(dirty.contains(Subsystems::LIGHTS | Subsystems::VOLUME | Subsystems::TRANSFER_FUNCTION));
        assert_eq!(adapter.state(), AdapterState::Uncommitted);
    }
}
