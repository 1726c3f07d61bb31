use criterion::{Criterion, black_box, criterion_group, criterion_main};

use lumen_core::math::Vec3;
use lumen_core::mesh::generators::{generate_cube, generate_sphere};
use lumen_core::scene::ProbeVolume;

// ---------------------------------------------------------------------------
// Mesh generation
// ---------------------------------------------------------------------------

fn bench_generate_cube(c: &mut Criterion) {
    c.bench_function("generate_cube", |b| {
        b.iter(|| generate_cube(black_box(1.0)));
    });
}

fn bench_generate_sphere(c: &mut Criterion) {
    c.bench_function("generate_sphere_32x16", |b| {
        b.iter(|| generate_sphere(black_box(1.0), black_box(32), black_box(16)));
    });
}

// ---------------------------------------------------------------------------
// Probe volume
// ---------------------------------------------------------------------------

fn bench_probe_volume_rebuild(c: &mut Criterion) {
    let mut volume = ProbeVolume::new(Vec3::zeros(), Vec3::new(10.0, 10.0, 10.0), 0.5, 0.1);
    let mut y = 0.0;
    c.bench_function("probe_volume_rebuild_20x20x20", |b| {
        b.iter(|| {
            y += 1.0;
            volume.set_position(Vec3::new(0.0, y, 0.0));
            black_box(volume.update())
        });
    });
}

criterion_group!(
    benches,
    bench_generate_cube,
    bench_generate_sphere,
    bench_probe_volume_rebuild
);
criterion_main!(benches);
