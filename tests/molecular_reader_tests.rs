use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::bail;
use glam::Vec3;
use ray_scene::config::ColorScheme;
use ray_scene::error::SceneError;
use ray_scene::loaders::{MeshImporter, MolecularSystemReader, Placement, ProteinImporter};
use ray_scene::math::palette_color;
use ray_scene::scene::{
    Material, MaterialId, MaterialLimits, MaterialRemap, MeshData, Primitive, PrimitiveKind, Scene, Subsystems,
    NO_MATERIAL,
};

/// Places one sphere per protein
struct SphereProteins;

impl ProteinImporter for SphereProteins {
    fn import_protein(&self, _path: &Path, position: Vec3, _index: usize, scene: &mut Scene) -> anyhow::Result<()> {
        scene.add_primitive(
            0,
            0,
            Primitive::Sphere {
                center: position,
                radius: 1.0,
            },
        );
        Ok(())
    }
}

/// Appends one triangle per mesh and records the requested materials
#[derive(Clone, Default)]
struct RecordingMeshes {
    calls: Rc<RefCell<Vec<(PathBuf, MaterialId, Placement)>>>,
}

impl MeshImporter for RecordingMeshes {
    fn extension(&self) -> &str {
        "obj"
    }

    fn import_mesh(
        &self,
        path: &Path,
        placement: &Placement,
        material: MaterialId,
        scene: &mut Scene,
    ) -> anyhow::Result<usize> {
        self.calls
            .borrow_mut()
            .push((path.to_path_buf(), material, *placement));
        if path.file_stem().is_some_and(|s| s == "broken") {
            bail!("cannot parse {:?}", path);
        }
        let origin = placement.translation;
        scene.append_mesh(
            MeshData {
                vertices: vec![origin, origin + placement.scale * Vec3::X, origin + placement.scale * Vec3::Y],
                indices: vec![[0, 1, 2]],
                ..Default::default()
            },
            &MaterialRemap::Uniform(material),
        )?;
        Ok(1)
    }
}

struct System {
    dir: tempfile::TempDir,
}

impl System {
    fn new(descriptor: &str, positions: &str, folders: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("descriptor.txt"), descriptor).unwrap();
        fs::write(dir.path().join("positions.txt"), positions).unwrap();
        let mut config = String::from("SystemDescriptor descriptor.txt\nProteinPositions positions.txt\n");
        for (key, folder) in folders {
            fs::create_dir_all(dir.path().join(folder)).unwrap();
            config.push_str(&format!("{} {}\n", key, folder));
        }
        fs::write(dir.path().join("system.cfg"), config).unwrap();
        Self { dir }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("system.cfg")
    }
}

#[cfg(test)]
mod molecular_reader_tests {
    use super::*;

    #[test]
    fn test_two_proteins_give_five_instances() {
        let system = System::new(
            "1abc 1 3\n2xyz 2 2\n",
            "1 0 0 0\n1 10 0 0\n1 20 0 0\n2 0 10 0\n2 0 20 0\n",
            &[("ProteinFolder", "pdb")],
        );
        let mut scene = Scene::default();
        let summary = MolecularSystemReader::new(system.config(), ColorScheme::ProteinChains)
            .with_protein_importer(SphereProteins)
            .import(&mut scene)
            .unwrap();

        assert_eq!(summary.protein_types, 2);
        assert_eq!(summary.protein_count, 5);
        assert_eq!(summary.instances, 5);
        assert_eq!(summary.proteins_imported, 5);
        assert_eq!(scene.primitives().count(PrimitiveKind::Sphere), 5);
        assert!(scene.world_bounds().contains_point(Vec3::new(20.0, 20.0, 0.0)));
    }

    #[test]
    fn test_by_id_wraps_over_geometry_materials() {
        let positions: String = (0..62).map(|i| format!("7 {} 0 0\n", i)).collect();
        let system = System::new("1abc 7 62\n", &positions, &[("MeshFolder", "meshes")]);
        let meshes = RecordingMeshes::default();
        let mut scene = Scene::new(MaterialLimits::new(64, 4));
        let summary = MolecularSystemReader::new(system.config(), ColorScheme::ById)
            .with_mesh_importer(meshes.clone())
            .import(&mut scene)
            .unwrap();

        assert_eq!(summary.instances, 62);
        assert_eq!(summary.meshes_imported, 62);
        let calls = meshes.calls.borrow();
        assert_eq!(calls[0].1, 0);
        assert_eq!(calls[59].1, 59);
        assert_eq!(calls[61].1, 1);
        assert_eq!(calls[3].0, system.dir.path().join("meshes").join("1abc.obj"));
        assert_eq!(calls[3].2.scale, Vec3::splat(0.0001));
        assert_eq!(calls[3].2.translation, Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_other_schemes_use_shared_material_and_recolor() {
        let system = System::new("1abc 1 1\n", "1 0 0 0\n", &[("MeshFolder", "meshes")]);
        let meshes = RecordingMeshes::default();
        let mut scene = Scene::default();
        scene.set_material(0, Material::default()).unwrap();
        scene.set_material(1, Material::default()).unwrap();

        MolecularSystemReader::new(system.config(), ColorScheme::None)
            .with_mesh_importer(meshes.clone())
            .import(&mut scene)
            .unwrap();

        assert_eq!(meshes.calls.borrow()[0].1, NO_MATERIAL);
        assert_eq!(scene.meshes().materials(), &[NO_MATERIAL]);
        assert_eq!(scene.material(0).unwrap().diffuse, palette_color(0));
        assert_eq!(scene.material(1).unwrap().diffuse, palette_color(1));
    }

    #[test]
    fn test_protein_folder_drives_object_index() {
        let system = System::new(
            "1abc 1 2\n",
            "1 0 0 0\n1 1 0 0\n",
            &[("ProteinFolder", "pdb"), ("MeshFolder", "meshes")],
        );
        let meshes = RecordingMeshes::default();
        let mut scene = Scene::default();
        let summary = MolecularSystemReader::new(system.config(), ColorScheme::ById)
            .with_protein_importer(SphereProteins)
            .with_mesh_importer(meshes.clone())
            .import(&mut scene)
            .unwrap();

        // Meshes of a protein follow its structures
        assert_eq!(summary.instances, 2);
        assert!(meshes.calls.borrow().iter().all(|call| call.1 == 2));
    }

    #[test]
    fn test_failing_object_is_skipped() {
        let system = System::new(
            "broken 1 1\ngood 2 1\n",
            "1 0 0 0\n2 5 5 5\n",
            &[("MeshFolder", "meshes")],
        );
        let mut scene = Scene::default();
        let summary = MolecularSystemReader::new(system.config(), ColorScheme::ById)
            .with_mesh_importer(RecordingMeshes::default())
            .import(&mut scene)
            .unwrap();

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.meshes_imported, 1);
        assert_eq!(scene.meshes().triangle_count(), 1);
    }

    #[test]
    fn test_missing_positions_leave_scene_unchanged() {
        let system = System::new("1abc 1 1\n", "", &[]);
        fs::remove_file(system.dir.path().join("positions.txt")).unwrap();
        let mut scene = Scene::default();
        scene.clear_dirty(Subsystems::all());

        let err = MolecularSystemReader::new(system.config(), ColorScheme::None)
            .import(&mut scene)
            .unwrap_err();
        assert!(matches!(err, SceneError::Configuration { .. }));
        assert!(scene.is_empty());
        assert!(scene.dirty().is_empty());
    }

    #[test]
    fn test_unreadable_configuration() {
        let mut scene = Scene::default();
        let err = MolecularSystemReader::new("/nonexistent/system.cfg", ColorScheme::None)
            .import(&mut scene)
            .unwrap_err();
        assert!(matches!(err, SceneError::Configuration { .. }));
    }
}
