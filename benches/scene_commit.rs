use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use ray_scene::backend::{CpuSceneAdapter, SceneAdapter};
use ray_scene::config::GeometryQuality;
use ray_scene::core::FlatBvh;
use ray_scene::math::AABB;
use ray_scene::scene::{Light, Primitive, Scene};

/// Deterministic point cloud on a jittered grid
fn positions(count: usize) -> Vec<Vec3> {
    let side = (count as f32).cbrt().ceil() as usize;
    (0..count)
        .map(|i| {
            let jitter = (i as f32 * 0.618_034).fract() * 0.5;
            Vec3::new(
                (i % side) as f32 + jitter,
                ((i / side) % side) as f32 - jitter,
                (i / (side * side)) as f32 + jitter * 0.5,
            )
        })
        .collect()
}

fn sphere_scene(count: usize) -> Scene {
    let mut scene = Scene::default();
    for (i, center) in positions(count).into_iter().enumerate() {
        scene.add_primitive((i % 8) as u32, (i % 4) as u64, Primitive::Sphere { center, radius: 0.3 });
    }
    scene.add_light(Light::directional(Vec3::NEG_ONE, [1.0; 3], 1.0));
    scene.set_timestamp(3);
    scene
}

/// Benchmark: BVH build per geometry quality
fn bench_bvh_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("bvh_build");
    let boxes: Vec<AABB> = positions(10_000)
        .into_iter()
        .map(|p| AABB::from_center_radius(p, 0.3))
        .collect();

    for quality in [GeometryQuality::Fast, GeometryQuality::Medium, GeometryQuality::Max] {
        let config = quality.bvh_config();
        group.bench_with_input(BenchmarkId::from_parameter(quality), &boxes, |b, boxes| {
            b.iter(|| black_box(FlatBvh::build(black_box(boxes), &config)))
        });
    }
    group.finish();
}

/// Benchmark: full commit of a fresh scene on the CPU backend
fn bench_full_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_full_commit");
    for count in [1_000usize, 10_000] {
        let scene = sphere_scene(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &scene, |b, scene| {
            b.iter(|| {
                let mut scene = scene.clone();
                let mut adapter = CpuSceneAdapter::new(GeometryQuality::Medium, [0.0; 3]);
                black_box(adapter.commit(&mut scene))
            })
        });
    }
    group.finish();
}

/// Benchmark: visibility-only commit after a timestamp change
fn bench_timestamp_commit(c: &mut Criterion) {
    let mut scene = sphere_scene(10_000);
    let mut adapter = CpuSceneAdapter::new(GeometryQuality::Medium, [0.0; 3]);
    let _ = adapter.commit(&mut scene);

    let mut timestamp = 0u64;
    c.bench_function("cpu_timestamp_commit", |b| {
        b.iter(|| {
            timestamp = (timestamp + 1) % 4;
            scene.set_timestamp(timestamp);
            black_box(adapter.commit(&mut scene))
        })
    });
}

criterion_group!(benches, bench_bvh_build, bench_full_commit, bench_timestamp_commit);
criterion_main!(benches);
