//! Renderer integration tests.
//!
//! These tests drive the public renderer API end to end. They are
//! parameterized using `rstest` to run against every backend.
//!
//! # Test Categories
//!
//! - **Frame Ring Tests**: fence ordering across back buffer slots
//! - **Swap Chain Tests**: resize round-trip and rejection while in flight
//! - **Staging Tests**: mesh upload and read-back
//! - **Ray Tracing Tests**: shader table layout and TLAS instance read-back
//! - **End-to-End**: a 1920x1080 frame drawing a cube
//!
//! # Running Tests
//!
//! ```bash
//! # Dummy backend only
//! cargo test --test gpu_tests
//!
//! # Include Vulkan; pipelines need compiled shaders
//! LUMEN_SHADER_DIR=shaders/bin cargo test --test gpu_tests --features vulkan-backend
//! ```

mod common;

use rstest::rstest;

use common::{Backend, HEIGHT, TestContext, WIDTH};
use lumen_core::math::{Mat4, Vec3, mat4_to_rows_3x4};
use lumen_core::mesh::generators::generate_cube;
use lumen_core::scene::Camera;
use lumen_graphics::{
    BuildMode, FrameSequencer, GraphicsError, ResourceState, ShaderGroupKind, ShaderTableBuilder,
};

// ============================================================================
// Frame Ring Tests
// ============================================================================

/// Reusing a back buffer slot waits for that slot's previous frame.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_fence_ordering(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let slots = ctx.renderer.ring().slot_count();

    let first = ctx.clear_frame().unwrap();
    let signaled = ctx.renderer.ring().slot(first).unwrap().fence_value();
    assert_eq!(signaled, 1);

    // Fill the ring so the next frame lands on the first slot again.
    for _ in 1..slots {
        ctx.clear_frame().unwrap();
    }
    let index = ctx.renderer.start_frame().unwrap();
    assert_eq!(index, first);

    let slot = ctx.renderer.ring().slot(index).unwrap();
    assert!(slot.fence().completed_value().unwrap() >= signaled);
    assert_eq!(slot.fence_value(), signaled + 1);

    ctx.renderer.end_frame().unwrap();
    ctx.renderer.present().unwrap();
    ctx.renderer.flush().unwrap();
    for i in 0..slots {
        let slot = ctx.renderer.ring().slot(i).unwrap();
        assert!(slot.fence().completed_value().unwrap() >= slot.fence_value());
    }
    assert!(ctx.renderer.ring().is_idle().unwrap());
}

/// Starting a frame twice without ending it is rejected.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_nested_start_frame_rejected(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.renderer.start_frame().unwrap();
    assert!(matches!(
        ctx.renderer.start_frame(),
        Err(GraphicsError::InvalidParameter(_))
    ));
    // Flushing discards the frame in progress.
    ctx.renderer.flush().unwrap();
    assert!(ctx.renderer.current_frame().is_none());
    ctx.clear_frame().unwrap();
    ctx.renderer.flush().unwrap();
}

// ============================================================================
// Swap Chain Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_resize_round_trip(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::with_size(backend, 640, 480) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    ctx.clear_frame().unwrap();

    // A frame is in flight until flushed.
    assert!(matches!(
        ctx.renderer.resize_swap_chain(800, 600),
        Err(GraphicsError::InvalidParameter(_))
    ));
    assert_eq!(ctx.renderer.swap_chain().width(), 640);

    ctx.renderer.flush().unwrap();
    ctx.renderer.resize_swap_chain(800, 600).unwrap();
    let viewport = ctx.renderer.swap_chain().viewport();
    assert_eq!((viewport.width, viewport.height), (800.0, 600.0));
    let scissor = ctx.renderer.swap_chain().scissor_rect();
    assert_eq!((scissor.width, scissor.height), (800, 600));
    assert_eq!(ctx.renderer.swap_chain().depth_buffer().width(), 800);

    // Zero sizes are ignored by the caller and rejected here.
    assert!(ctx.renderer.resize_swap_chain(0, 600).is_err());

    // Rendering continues at the new size.
    ctx.clear_frame().unwrap();
    ctx.renderer.flush().unwrap();
}

// ============================================================================
// Staging Tests
// ============================================================================

/// Uploading the same mesh twice yields independent, identical buffers.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_staging_idempotence(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let cube = generate_cube(1.0);
    let first = ctx.renderer.upload_meshes(&[&cube]).unwrap().remove(0);
    let second = ctx.renderer.upload_meshes(&[&cube]).unwrap().remove(0);
    assert_ne!(first.vertex_buffer().id(), second.vertex_buffer().id());
    assert_ne!(first.index_buffer().id(), second.index_buffer().id());

    for mesh in [&first, &second] {
        let vertices = ctx
            .renderer
            .read_back_buffer(mesh.vertex_buffer(), ResourceState::VertexAndConstantBuffer)
            .unwrap();
        let indices = ctx
            .renderer
            .read_back_buffer(mesh.index_buffer(), ResourceState::IndexBuffer)
            .unwrap();
        assert_eq!(vertices, cube.vertex_bytes());
        assert_eq!(indices, cube.index_bytes());
    }
}

/// Several meshes share one submission.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_batched_upload(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let small = generate_cube(0.5);
    let large = generate_cube(4.0);
    let before = ctx.renderer.upload_queue().fence_value();
    let meshes = ctx.renderer.upload_meshes(&[&small, &large]).unwrap();
    assert_eq!(ctx.renderer.upload_queue().fence_value(), before + 1);
    assert_eq!(meshes.len(), 2);

    let vertices = ctx
        .renderer
        .read_back_buffer(meshes[1].vertex_buffer(), ResourceState::VertexAndConstantBuffer)
        .unwrap();
    assert_eq!(vertices, large.vertex_bytes());
}

// ============================================================================
// Ray Tracing Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_shader_table_layout(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let caps = ctx.renderer.device().capabilities();
    let builder = ShaderTableBuilder::new()
        .ray_generation("RayGen", &[1; 8])
        .miss("Miss", &[])
        .miss("ShadowMiss", &[])
        .hit_group("HitGroup", &[2; 20]);
    let layout = builder.layout(caps).unwrap();

    let record_alignment = caps.shader_record_alignment as u64;
    let table_alignment = caps.shader_table_alignment as u64;
    assert_eq!(layout.stride % record_alignment, 0);
    assert!(layout.stride >= caps.shader_identifier_size as u64 + 20);

    for (kind, count) in [
        (ShaderGroupKind::RayGeneration, 1),
        (ShaderGroupKind::Miss, 2),
        (ShaderGroupKind::HitGroup, 1),
    ] {
        let region = layout.region(kind);
        assert_eq!(region.offset % record_alignment, 0);
        assert_eq!(region.offset % table_alignment, 0);
        assert_eq!(region.size, layout.stride * count);
    }
    let miss = layout.region(ShaderGroupKind::Miss);
    let hit = layout.region(ShaderGroupKind::HitGroup);
    assert!(hit.offset >= miss.offset + miss.size);
}

/// Instance records set before a build read back unchanged.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_tlas_instance_read_back(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    if !ctx.renderer.device().capabilities().ray_tracing {
        eprintln!("Backend {:?} has no ray tracing, skipping", backend);
        return;
    }
    let cube = ctx.renderer.upload_meshes(&[&generate_cube(1.0)]).unwrap().remove(0);
    let blas = ctx.renderer.build_blas(&cube).unwrap();

    const INSTANCES: u32 = 8;
    let mut tlas = ctx.renderer.create_tlas(INSTANCES, true).unwrap();
    let transforms: Vec<Mat4> = (0..INSTANCES)
        .map(|i| Mat4::new_translation(&Vec3::new(i as f32, 0.5 * i as f32, -2.0)))
        .collect();
    for (i, transform) in transforms.iter().enumerate() {
        tlas.set_instance_blas_and_transform(i as u32, &blas, transform)
            .unwrap();
    }
    tlas.build_now(ctx.renderer.upload_queue()).unwrap();
    assert!(tlas.is_built());

    let staged = tlas.read_staged_instances(0).unwrap();
    assert_eq!(staged.len(), INSTANCES as usize);
    for (instance, transform) in staged.iter().zip(&transforms) {
        assert_eq!(instance.transform, mat4_to_rows_3x4(transform));
        assert_eq!(instance.blas_address, blas.address());
        assert_eq!(instance.mask(), 0xFF);
    }

    // A refit keeps the records.
    ctx.renderer
        .upload_queue()
        .execute(|list| tlas.record_build(list, 1, BuildMode::Update))
        .unwrap();
    assert_eq!(tlas.read_staged_instances(1).unwrap(), staged);
}

// ============================================================================
// End-to-End
// ============================================================================

/// Device, 1920x1080 swap chain, one cube, one frame: every call succeeds and
/// the back buffer index advances by one.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_end_to_end_cube_frame(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    assert_eq!(ctx.renderer.swap_chain().width(), WIDTH);
    assert_eq!(ctx.renderer.swap_chain().height(), HEIGHT);

    let cpu_cube = generate_cube(1.0);
    assert_eq!(cpu_cube.vertex_count(), 24);
    assert_eq!(cpu_cube.index_count(), 36);
    let cube = ctx.renderer.upload_meshes(&[&cpu_cube]).unwrap().remove(0);

    let Some(pipeline) = ctx.forward_pipeline("end_to_end") else {
        eprintln!("No shaders for {:?}, skipping draw", backend);
        return;
    };
    let count = ctx.renderer.swap_chain().back_buffer_count();
    let before = ctx.renderer.swap_chain().current_back_buffer_index().unwrap();

    let camera = Camera::new(Vec3::new(0.0, 0.0, -5.0));
    let mut sequencer = FrameSequencer::new(ctx.renderer.config().gather_interval);
    let report = sequencer
        .run_frame(&mut ctx.renderer, &camera, pipeline.as_ref(), 0.016, None, |r| {
            r.submit_mesh(&cube, &Mat4::identity())
        })
        .unwrap();
    assert_eq!(report.back_buffer, before);
    assert_eq!(report.draws, 1);

    let after = ctx.renderer.swap_chain().current_back_buffer_index().unwrap();
    assert_eq!(after, (before + 1) % count);

    let TestContext { renderer, .. } = ctx;
    renderer.shutdown().unwrap();
}
