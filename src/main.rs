use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use glam::{Mat4, Vec3};
use log::{info, warn};

use ray_scene::backend::{BackendRegistry, RenderInput, RenderOutput};
use ray_scene::cli::Cli;
use ray_scene::engine::Engine;
use ray_scene::error::BackendError;
use ray_scene::loaders::{GltfMeshImporter, MeshImporter, MolecularSystemReader, Placement};
use ray_scene::math::AABB;
use ray_scene::scene::{Light, PrimitiveKind};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.engine_config()?;
    let registry = BackendRegistry::with_defaults();
    let mut engine = Engine::new(config.clone(), &registry)
        .with_context(|| format!("Failed to create the '{}' backend", config.backend))?;

    if let Some(path) = &cli.load_cache {
        engine.load_cache(path)?;
        info!("Scene loaded from {:?}", path);
    } else {
        import(&cli, &mut engine)?;
    }
    if let Some(timestamp) = cli.timestamp {
        engine.scene_mut().set_timestamp(timestamp);
    }
    if engine.scene().lights().is_empty() {
        engine
            .scene_mut()
            .add_light(Light::directional(Vec3::new(-1.0, -1.0, -1.0), [1.0; 3], 1.0));
    }

    let report = engine.commit().context("Commit failed")?;
    info!("Committed {:?}", report.serviced);

    if let Some(path) = &config.cache_file {
        engine.save_cache(path)?;
        info!("Scene cache written to {:?}", path);
    }

    let counts = engine.adapter().geometry_counts();
    println!("Backend        : {}", engine.adapter().name());
    for kind in PrimitiveKind::ALL {
        println!(
            "{:<15}: {} ({} visible)",
            kind.name(),
            counts.count(kind),
            counts.visible(kind)
        );
    }
    println!("Triangles      : {}", counts.triangles);
    println!("Instances      : {}", counts.instances);
    println!("Bounds         : {:?} .. {:?}", counts.bounds.min, counts.bounds.max);
    println!("Stats          : {:?}", engine.adapter().stats());

    if let Some(path) = &cli.output {
        let input = framing_camera(engine.scene().world_bounds(), config.width, config.height);
        let mut output = RenderOutput::new(config.width, config.height);
        match engine.render(&input, &mut output) {
            Ok(_) => {
                write_ppm(path, &output)?;
                println!("Frame written to {:?}", path);
            }
            Err(BackendError::Unsupported(what)) => warn!("Skipping frame: {} is not supported", what),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn import(cli: &Cli, engine: &mut Engine) -> Result<()> {
    let color_scheme = engine.config().color_scheme;
    if let Some(path) = &cli.molecular_system {
        let reader = MolecularSystemReader::new(path, color_scheme).with_mesh_importer(GltfMeshImporter::new());
        let summary = reader.import(engine.scene_mut())?;
        println!(
            "Molecular system: {} proteins of {} types, {} meshes, {} failures",
            summary.protein_count, summary.protein_types, summary.meshes_imported, summary.failures
        );
    }

    let importer = GltfMeshImporter::new();
    for (index, path) in cli.mesh.iter().enumerate() {
        let limits = engine.scene().materials().limits();
        let material = color_scheme.material_for(index, &limits);
        if let Err(e) = importer.import_mesh(path, &Placement::default(), material, engine.scene_mut()) {
            warn!("Skipping {:?}: {:#}", path, e);
        }
    }
    Ok(())
}

/// Looks at the scene from the +Z side, far enough to see all of it
fn framing_camera(bounds: AABB, width: u32, height: u32) -> RenderInput {
    let (center, radius) = if bounds.is_empty() {
        (Vec3::ZERO, 1.0)
    } else {
        (bounds.center(), (bounds.extent().length() * 0.5).max(1e-3))
    };
    let fov = 45f32.to_radians();
    let eye = center + Vec3::Z * (radius / (fov * 0.5).tan() * 1.2);
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    RenderInput::new(
        Mat4::look_at_rh(eye, center, Vec3::Y),
        Mat4::perspective_rh(fov, aspect, radius * 0.01, radius * 10.0 + (eye - center).length()),
    )
}

fn write_ppm(path: &Path, output: &RenderOutput) -> Result<()> {
    let mut file = BufWriter::new(File::create(path).with_context(|| format!("Failed to create {:?}", path))?);
    write!(file, "P6\n{} {}\n255\n", output.width, output.height)?;
    for pixel in output.color.chunks_exact(4) {
        file.write_all(&pixel[..3])?;
    }
    file.flush()?;
    Ok(())
}
