//! Molecular system assembly.
//!
//! A system is described by three text files named in a `key value`
//! configuration file:
//!
//! ```text
//! ProteinFolder     /data/pdb
//! MeshFolder        /data/meshes
//! SystemDescriptor  system.txt      # lines: name id instances
//! ProteinPositions  positions.txt   # lines: id x y z
//! ```
//!
//! Every position of every described protein becomes one placed object.
//! Parsing is lenient: short or unparsable lines are skipped.
//!
//! Relative paths in the configuration file are resolved against the
//! directory holding that file, not the process working directory.
//! Absolute paths are used as written.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use glam::Vec3;
use log::{debug, info, warn};

use crate::config::ColorScheme;
use crate::error::{SceneError, SceneResult};
use crate::loaders::{MeshImporter, Placement, ProteinImporter};
use crate::math::palette_color;
use crate::scene::Scene;

/// Meshes are modelled in angstroms, positions are in micrometres
pub const MESH_SCALE: f32 = 0.0001;

/// Paths read from the system configuration file. Relative paths are
/// resolved against the configuration file's directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemConfiguration {
    pub protein_folder: Option<PathBuf>,
    pub mesh_folder: Option<PathBuf>,
    pub descriptor: PathBuf,
    pub positions: PathBuf,
}

impl SystemConfiguration {
    pub fn load(path: impl AsRef<Path>) -> SceneResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| SceneError::configuration(path, e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));

        let mut parameters = HashMap::new();
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            if let (Some(key), Some(value)) = (fields.next(), fields.next()) {
                parameters.insert(key, base.join(value));
            }
        }

        let required = |key: &str| {
            parameters
                .get(key)
                .cloned()
                .ok_or_else(|| SceneError::configuration(path, format!("missing key '{}'", key)))
        };
        Ok(Self {
            protein_folder: parameters.get("ProteinFolder").cloned(),
            mesh_folder: parameters.get("MeshFolder").cloned(),
            descriptor: required("SystemDescriptor")?,
            positions: required("ProteinPositions")?,
        })
    }
}

/// What an import placed in the scene.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Distinct proteins in the descriptor
    pub protein_types: usize,
    /// Accepted position lines
    pub protein_count: usize,
    /// Object indices assigned to placed proteins
    pub instances: usize,
    pub proteins_imported: usize,
    pub meshes_imported: usize,
    /// Objects whose importer failed; they are skipped
    pub failures: usize,
}

pub struct MolecularSystemReader {
    configuration: PathBuf,
    color_scheme: ColorScheme,
    protein_importer: Option<Box<dyn ProteinImporter>>,
    mesh_importer: Option<Box<dyn MeshImporter>>,
}

impl MolecularSystemReader {
    pub fn new(configuration: impl Into<PathBuf>, color_scheme: ColorScheme) -> Self {
        Self {
            configuration: configuration.into(),
            color_scheme,
            protein_importer: None,
            mesh_importer: None,
        }
    }

    pub fn with_protein_importer(mut self, importer: impl ProteinImporter + 'static) -> Self {
        self.protein_importer = Some(Box::new(importer));
        self
    }

    pub fn with_mesh_importer(mut self, importer: impl MeshImporter + 'static) -> Self {
        self.mesh_importer = Some(Box::new(importer));
        self
    }

    /// Reads the system files and places every protein.
    ///
    /// Unreadable configuration, descriptor or positions files abort the
    /// import before the scene is touched. A failing object is logged and
    /// skipped.
    pub fn import(&self, scene: &mut Scene) -> SceneResult<ImportSummary> {
        let configuration = SystemConfiguration::load(&self.configuration)?;
        info!("Loading biological assembly");
        info!("Protein folder    : {:?}", configuration.protein_folder);
        info!("Mesh folder       : {:?}", configuration.mesh_folder);
        info!("System descriptor : {:?}", configuration.descriptor);
        info!("Protein positions : {:?}", configuration.positions);

        let proteins = load_descriptor(&configuration.descriptor)?;
        if let Some(folder) = &configuration.protein_folder {
            for name in proteins.values() {
                let pdb = pdb_path(folder, name);
                if !pdb.is_file() {
                    warn!("Protein file {:?} not found", pdb);
                }
            }
        }
        let (positions, protein_count) = load_positions(&configuration.positions, &proteins)?;

        info!("Total number of different proteins: {}", proteins.len());
        info!("Total number of proteins          : {}", protein_count);

        let mut summary = ImportSummary {
            protein_types: proteins.len(),
            protein_count,
            ..Default::default()
        };
        self.create_scene(scene, &configuration, &proteins, &positions, &mut summary);

        if self.color_scheme != ColorScheme::ById {
            scene.recolor_materials(palette_color);
        }
        Ok(summary)
    }

    fn create_scene(
        &self,
        scene: &mut Scene,
        configuration: &SystemConfiguration,
        proteins: &BTreeMap<usize, String>,
        positions: &BTreeMap<usize, Vec<Vec3>>,
        summary: &mut ImportSummary,
    ) {
        let limits = scene.materials().limits();
        let protein_folder = configuration.protein_folder.as_deref();
        let mesh_folder = configuration.mesh_folder.as_deref();
        if protein_folder.is_some() && self.protein_importer.is_none() {
            warn!("No protein importer configured, protein files are ignored");
        }
        if mesh_folder.is_some() && self.mesh_importer.is_none() {
            warn!("No mesh importer configured, mesh files are ignored");
        }

        let mut object_index = 0;
        for (id, placements) in positions {
            let Some(name) = proteins.get(id) else {
                continue;
            };
            debug!("Placing {} instances of {}", placements.len(), name);

            if let Some(folder) = protein_folder {
                let pdb = pdb_path(folder, name);
                for &position in placements {
                    if let Some(importer) = &self.protein_importer {
                        match importer.import_protein(&pdb, position, object_index, scene) {
                            Ok(()) => summary.proteins_imported += 1,
                            Err(e) => {
                                warn!("Failed to import protein {:?}: {:#}", pdb, e);
                                summary.failures += 1;
                            }
                        }
                    }
                    object_index += 1;
                }
            }

            if let Some(folder) = mesh_folder {
                for &position in placements {
                    if let Some(importer) = &self.mesh_importer {
                        let path = folder.join(format!("{}.{}", name, importer.extension()));
                        let material = self.color_scheme.material_for(object_index, &limits);
                        let placement = Placement::new(position, MESH_SCALE);
                        match importer.import_mesh(&path, &placement, material, scene) {
                            Ok(meshes) => summary.meshes_imported += meshes,
                            Err(e) => {
                                warn!("Failed to import mesh {:?}: {:#}", path, e);
                                summary.failures += 1;
                            }
                        }
                    }
                    if protein_folder.is_none() {
                        object_index += 1;
                    }
                }
            }
        }
        summary.instances = object_index;
    }
}

fn pdb_path(folder: &Path, name: &str) -> PathBuf {
    folder.join(format!("{}.pdb", name))
}

/// `name id instances` lines → id → name
fn load_descriptor(path: &Path) -> SceneResult<BTreeMap<usize, String>> {
    let text = fs::read_to_string(path).map_err(|e| SceneError::configuration(path, e.to_string()))?;
    let mut proteins = BTreeMap::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, id, instances, ..] = fields[..] else {
            continue;
        };
        match (id.parse::<usize>(), instances.parse::<usize>()) {
            (Ok(id), Ok(_)) => {
                proteins.insert(id, name.to_string());
            }
            _ => debug!("Skipping descriptor line '{}'", line),
        }
    }
    Ok(proteins)
}

/// `id x y z` lines → id → positions, plus the number of accepted lines
fn load_positions(
    path: &Path,
    proteins: &BTreeMap<usize, String>,
) -> SceneResult<(BTreeMap<usize, Vec<Vec3>>, usize)> {
    let text = fs::read_to_string(path).map_err(|e| SceneError::configuration(path, e.to_string()))?;
    let mut positions: BTreeMap<usize, Vec<Vec3>> = BTreeMap::new();
    let mut accepted = 0;
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let id = fields.next().and_then(|f| f.parse::<usize>().ok());
        let coords: Vec<f32> = fields.take(3).map_while(|f| f.parse().ok()).collect();
        match (id, coords.as_slice()) {
            (Some(id), &[x, y, z]) if proteins.contains_key(&id) => {
                positions.entry(id).or_default().push(Vec3::new(x, y, z));
                accepted += 1;
            }
            _ => debug!("Skipping position line '{}'", line),
        }
    }
    Ok((positions, accepted))
}
