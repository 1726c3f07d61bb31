use criterion::{Criterion, black_box, criterion_group, criterion_main};

use lumen_core::math::Vec3;
use lumen_core::mesh::generators::generate_cube;
use lumen_core::scene::Camera;
use lumen_graphics::{
    BackendType, BufferDescriptor, BufferUsage, DeviceCapabilities, GraphicsInstance,
    InstanceParameters, PerFrameConstants, RendererConfig, RendererContext, RingBuffer,
    ShaderTableBuilder, SurfaceTarget,
};

fn dummy_params() -> InstanceParameters {
    InstanceParameters::new().with_backend(BackendType::Dummy)
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

fn bench_per_frame_constants(c: &mut Criterion) {
    let camera = Camera::new(Vec3::new(0.0, 2.0, -10.0));
    c.bench_function("per_frame_constants_1080p", |b| {
        b.iter(|| black_box(PerFrameConstants::new(black_box(&camera), 1920, 1080)));
    });
}

fn bench_ring_buffer_writes(c: &mut Criterion) {
    let instance = GraphicsInstance::new(&dummy_params()).unwrap();
    let device = instance.create_device().unwrap();
    let mut ring = RingBuffer::new(&device, 64 * 1024, 3, "bench").unwrap();
    let data = [0u8; 64];

    c.bench_function("ring_buffer_256_writes", |b| {
        let mut slot = 0;
        b.iter(|| {
            ring.begin_frame(slot);
            slot = (slot + 1) % 3;
            for _ in 0..256 {
                black_box(ring.write(&data).unwrap());
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Shader table
// ---------------------------------------------------------------------------

fn bench_shader_table_layout(c: &mut Criterion) {
    let caps = DeviceCapabilities::default();
    let builder = (0..16).fold(
        ShaderTableBuilder::new().ray_generation("RayGen", &[0; 16]),
        |builder, i| {
            builder
                .miss(&format!("Miss{i}"), &[0; 8])
                .hit_group(&format!("Hit{i}"), &[0; 24])
        },
    );
    c.bench_function("shader_table_layout_33_records", |b| {
        b.iter(|| black_box(builder.layout(&caps).unwrap()));
    });
}

// ---------------------------------------------------------------------------
// Dummy backend
// ---------------------------------------------------------------------------

fn bench_dummy_create_buffer(c: &mut Criterion) {
    let instance = GraphicsInstance::new(&dummy_params()).unwrap();
    let device = instance.create_device().unwrap();

    c.bench_function("dummy_create_buffer", |b| {
        b.iter(|| {
            let buffer = device
                .create_buffer(&BufferDescriptor::upload(1024, BufferUsage::VERTEX))
                .unwrap();
            black_box(buffer);
        });
    });
}

fn bench_dummy_cube_upload(c: &mut Criterion) {
    let mut ctx = RendererContext::init(
        &dummy_params(),
        &SurfaceTarget::Headless,
        1920,
        1080,
        RendererConfig::default(),
    )
    .unwrap();
    let cube = generate_cube(1.0);

    c.bench_function("dummy_upload_cube", |b| {
        b.iter(|| black_box(ctx.upload_meshes(&[&cube]).unwrap()));
    });
}

fn bench_dummy_clear_frame(c: &mut Criterion) {
    let mut ctx = RendererContext::init(
        &dummy_params(),
        &SurfaceTarget::Headless,
        1920,
        1080,
        RendererConfig::default().with_vsync(false),
    )
    .unwrap();
    c.bench_function("dummy_clear_frame", |b| {
        b.iter(|| {
            ctx.start_frame().unwrap();
            ctx.set_render_targets().unwrap();
            ctx.clear_render_targets().unwrap();
            ctx.set_viewport().unwrap();
            ctx.end_frame().unwrap();
            ctx.present().unwrap();
        });
    });
    ctx.flush().unwrap();
}

criterion_group!(
    benches,
    bench_per_frame_constants,
    bench_ring_buffer_writes,
    bench_shader_table_layout,
    bench_dummy_create_buffer,
    bench_dummy_cube_upload,
    bench_dummy_clear_frame,
);
criterion_main!(benches);
