//! End-to-end frames through the headless backend.
//!
//! # Test Categories
//!
//! - **Frame Tests**: pass order, draw lists, skipped frames
//! - **Config Tests**: passes toggled by the live configuration
//! - **Uniform Tests**: data the passes read from their buffers
//! - **Resize Tests**: swapchain recreation and descriptor rewiring
//! - **Environment Tests**: swapping the sky cubemap

mod common;

use common::{headless_renderer, point_light, renderer_desc, sun};
use glam::{Mat4, Vec3, Vec4};
use rstest::rstest;
use tiled_renderer::backend::{AccessFlags, DescriptorResource, Extent2D, HeadlessBackend, PipelineStages};
use tiled_renderer::pipeline::uniforms::DirectShadowUb;
use tiled_renderer::resources::{Material, Mesh};
use tiled_renderer::scene::{Camera, Light, LightComponent, Projection, SkyLight};
use tiled_renderer::Renderer;

// ============================================================================
// Frame Tests
// ============================================================================

#[test]
fn test_passes_submit_in_frame_order() {
    let mut renderer = headless_renderer(64, 64);
    renderer.submit_lights(&[sun(), point_light(Vec3::Y)]).unwrap();
    assert!(renderer.draw().unwrap());

    let labels = renderer.backend().last_frame_labels();
    let expected = [
        "Depth Pre-Pass",
        "Direct Shadow Depth Pass",
        "PBR Pass",
        "SSAO Pass",
        "SSR Pass",
        "Bloom Pass",
        "DepthOfField Pass",
        "Composite Pass",
        "PP Pass",
        "Swapchain Pass",
    ];
    let positions: Vec<usize> = expected
        .iter()
        .map(|label| {
            labels
                .iter()
                .position(|l| l == label)
                .unwrap_or_else(|| panic!("{} missing from {:?}", label, labels))
        })
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", labels);
    // Atmosphere and tiled culling are off by default
    assert!(!labels.iter().any(|l| l == "Atmosphere Pass"));
    assert!(!labels.iter().any(|l| l == "Frustum Grid Pass"));
}

#[test]
fn test_tiled_lighting_runs_culling_after_depth() {
    let mut renderer = headless_renderer(64, 64);
    renderer.submit_lights(&[point_light(Vec3::Y)]).unwrap();
    renderer.config().update(|config| config.tiled_lighting.enabled = true);
    assert!(renderer.draw().unwrap());

    let labels = renderer.backend().last_frame_labels();
    let position = |label: &str| labels.iter().position(|l| l == label).unwrap();
    assert!(position("Depth Pre-Pass") < position("Frustum Grid Pass"));
    assert!(position("Frustum Grid Pass") < position("Light List Pass"));
    assert!(position("Light List Pass") < position("PBR Pass"));
}

#[test]
fn test_draw_lists_are_consumed_by_the_frame() {
    let mut renderer = headless_renderer(64, 64);
    let cube = renderer.upload_mesh(&Mesh::cube()).unwrap();
    let material = renderer
        .create_material(Material::plastic(Vec3::new(0.8, 0.2, 0.2)))
        .unwrap();
    renderer.submit_mesh(cube.clone(), Mat4::IDENTITY, vec![material.clone()], 0);
    renderer.submit_mesh(cube, Mat4::from_translation(Vec3::X * 2.0), vec![material], 0);
    assert_eq!(renderer.pending_meshes(), 2);

    assert!(renderer.draw().unwrap());
    assert_eq!(renderer.pending_meshes(), 0);
    let depth = renderer
        .backend()
        .last_frame_submission("Depth Pre-Pass")
        .unwrap();
    assert_eq!(depth.draw_count(), 2);

    // Nothing submitted: the frame still presents with no geometry drawn
    assert!(renderer.draw().unwrap());
    let depth = renderer
        .backend()
        .last_frame_submission("Depth Pre-Pass")
        .unwrap();
    assert_eq!(depth.draw_count(), 0);
    assert_eq!(renderer.backend().present_count(), 2);
}

#[test]
fn test_frame_without_camera_is_skipped() {
    common::init_logging();
    let extent = Extent2D::new(64, 64);
    let mut renderer = Renderer::init(HeadlessBackend::new(extent), renderer_desc(extent)).unwrap();
    let cube = renderer.upload_mesh(&Mesh::cube()).unwrap();
    renderer.submit_mesh(cube, Mat4::IDENTITY, Vec::new(), 0);

    assert!(!renderer.draw().unwrap());
    assert_eq!(renderer.backend().present_count(), 0);
    assert_eq!(renderer.pending_meshes(), 0);
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_disabling_ssao_drops_its_pass_next_frame() {
    let mut renderer = headless_renderer(64, 64);
    assert!(renderer.draw().unwrap());
    assert!(renderer.backend().last_frame_submission("SSAO Pass").is_some());

    renderer.config().update(|config| config.ssao.enabled = false);
    assert!(renderer.draw().unwrap());
    assert!(renderer.backend().last_frame_submission("SSAO Pass").is_none());
    assert!(renderer.backend().last_frame_submission("PBR Pass").is_some());

    renderer.config().update(|config| config.ssao.enabled = true);
    assert!(renderer.draw().unwrap());
    assert!(renderer.backend().last_frame_submission("SSAO Pass").is_some());
}

#[rstest]
#[case::bloom("Bloom Pass")]
#[case::shadows("Direct Shadow Depth Pass")]
fn test_optional_pass_follows_config(#[case] label: &str) {
    let mut renderer = headless_renderer(64, 64);
    renderer.submit_lights(&[sun()]).unwrap();
    renderer.config().update(|config| {
        config.bloom.enabled = false;
        config.direct_shadows.enabled = false;
    });
    assert!(renderer.draw().unwrap());
    assert!(renderer.backend().last_frame_submission(label).is_none());
}

#[test]
fn test_enabling_atmosphere_adds_its_pass() {
    let mut renderer = headless_renderer(64, 64);
    renderer.config().update(|config| config.atmosphere.enabled = true);
    assert!(renderer.draw().unwrap());

    let labels = renderer.backend().last_frame_labels();
    let atmosphere = labels.iter().position(|l| l == "Atmosphere Pass").unwrap();
    let pbr = labels.iter().position(|l| l == "PBR Pass").unwrap();
    assert!(atmosphere < pbr);
}

#[test]
fn test_vsync_change_reaches_the_backend() {
    let mut renderer = headless_renderer(64, 64);
    assert!(renderer.draw().unwrap());
    assert!(renderer.backend().vsync());

    renderer.config().update(|config| config.display.vsync = false);
    renderer.draw().unwrap();
    assert!(!renderer.backend().vsync());
}

#[test]
fn test_bloom_too_small_for_its_chain_records_no_dispatch() {
    let mut renderer = headless_renderer(4, 4);
    assert!(renderer.draw().unwrap());

    let bloom = renderer.backend().last_frame_submission("Bloom Pass").unwrap();
    assert!(bloom.dispatches().is_empty());
}

#[test]
fn test_bloom_dispatches_cover_the_chain() {
    let mut renderer = headless_renderer(256, 128);
    assert!(renderer.draw().unwrap());

    let bloom = renderer.backend().last_frame_submission("Bloom Pass").unwrap();
    let dispatches = bloom.dispatches();
    assert!(!dispatches.is_empty());
    assert!(dispatches.iter().all(|d| d.iter().all(|&n| n >= 1)));
}

#[test]
fn test_composite_waits_for_effect_writes() {
    let mut renderer = headless_renderer(64, 64);
    assert!(renderer.draw().unwrap());

    let targets = renderer.targets();
    let handle = |id| renderer.resources().image(id).handle;
    let composite = renderer.backend().last_frame_submission("Composite Pass").unwrap();
    let barriers = composite.barriers();
    assert_eq!(barriers.len(), 2);

    let reads = barriers[0];
    assert_eq!(reads.src_stages, PipelineStages::COMPUTE_SHADER);
    assert_eq!(reads.dst_stages, PipelineStages::COMPUTE_SHADER);
    let read_images: Vec<_> = reads.images.iter().map(|b| b.image).collect();
    for id in [targets.dof, targets.ssr, targets.ssao_blur, targets.bloom_upsample] {
        assert!(read_images.contains(&handle(id)));
    }
    assert!(reads
        .images
        .iter()
        .all(|b| b.src_access == AccessFlags::SHADER_WRITE && b.dst_access == AccessFlags::SHADER_READ));

    let output = barriers[1];
    assert_eq!(output.src_stages, PipelineStages::COMPUTE_SHADER);
    assert_eq!(output.dst_stages, PipelineStages::FRAGMENT_SHADER);
    assert_eq!(output.images.len(), 1);
    assert_eq!(output.images[0].image, handle(targets.composite));
}

// ============================================================================
// Uniform Tests
// ============================================================================

/// Cascade 0 for the camera and sun below, derived by hand from the split
/// and sphere fit: radius 2.9375, center (0, 2.5355, 6.7613)
const REFERENCE_CASCADE_0: [[f32; 4]; 4] = [
    [0.3404255, 0.0, 0.0, 0.0],
    [0.0, 0.2042553, -0.0680851, 0.0],
    [0.0, -0.2723404, -0.0510638, 0.0],
    [0.0, 1.3234915, 1.2678880, 1.0],
];

#[test]
fn test_shadow_cascades_follow_camera_and_sun() {
    let mut renderer = headless_renderer(128, 64);
    renderer.set_camera(
        Camera::new(Vec3::new(0.0, 3.0, 8.0), Vec3::ZERO)
            .with_projection(Projection::perspective(60.0, 1.0, 0.5, 50.0)),
    );
    let sun_transform = Mat4::from_cols(Vec4::X, Vec4::Y, Vec4::new(0.0, -0.8, -0.6, 0.0), Vec4::W);
    let light = Light::new(LightComponent::directional(Vec3::new(1.0, 0.9, 0.8), 2.5), sun_transform);
    renderer.submit_lights(&[light]).unwrap();
    assert!(renderer.draw().unwrap());

    let buffer = renderer.resources().buffer(renderer.uniforms().buffers.direct_shadow);
    let bytes = renderer.backend().buffer_contents(buffer.handle).unwrap();
    let uploaded: DirectShadowUb =
        bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<DirectShadowUb>()]);

    let reference = Mat4::from_cols_array_2d(&REFERENCE_CASCADE_0);
    assert!(
        uploaded.cascade_view_proj[0].abs_diff_eq(reference, 1e-4),
        "{:?}",
        uploaded.cascade_view_proj[0]
    );
    assert!((uploaded.cascade_splits[0] + 2.1458319).abs() < 1e-4);
    assert!(uploaded.cascade_splits.windows(2).all(|w| w[0] > w[1]));
    assert!(uploaded.light_direction.truncate().abs_diff_eq(Vec3::new(0.0, -0.8, -0.6), 1e-6));
    assert!((uploaded.light_direction.w - 2.5).abs() < 1e-6);
    assert_eq!(uploaded.light_color.truncate(), Vec3::new(1.0, 0.9, 0.8));
}

#[test]
fn test_host_writes_wait_for_the_frame_fence() {
    let mut renderer = headless_renderer(64, 64);
    assert!(renderer.draw().unwrap());
    let lights = renderer.resources().buffer(renderer.uniforms().buffers.lights).handle;
    let writes = renderer.backend().buffer_write_count(lights);

    renderer.submit_lights(&[sun(), point_light(Vec3::Y)]).unwrap();
    renderer.config().update(|config| config.color.exposure = 2.0);
    assert_eq!(renderer.backend().buffer_write_count(lights), writes);

    for _ in 0..3 {
        assert!(renderer.draw().unwrap());
    }
    assert_eq!(renderer.backend().buffer_write_count(lights), writes + 1);
    assert_eq!(renderer.backend().unfenced_buffer_writes(), 0);
}

// ============================================================================
// Resize Tests
// ============================================================================

#[test]
fn test_out_of_date_swapchain_resizes_targets() {
    let mut renderer = headless_renderer(64, 64);
    assert!(renderer.draw().unwrap());
    let recreations = renderer.backend().swapchain_recreations();

    renderer.backend_mut().request_resize(Extent2D::new(96, 48));
    assert!(!renderer.draw().unwrap());
    assert_eq!(renderer.backend().swapchain_recreations(), recreations + 1);
    assert_eq!(renderer.extent(), Extent2D::new(96, 48));
    let final_image = renderer.resources().image(renderer.final_image());
    assert_eq!(final_image.extent(), Extent2D::new(96, 48));

    assert!(renderer.draw().unwrap());
    assert!(renderer.backend().dangling_descriptor_views().is_empty());
}

#[test]
fn test_resize_to_same_extent_keeps_descriptor_writes() {
    let mut renderer = headless_renderer(64, 64);
    renderer.on_resize(Extent2D::new(80, 40));
    assert!(renderer.draw().unwrap());
    let writes = renderer.backend().descriptor_writes();

    renderer.on_resize(Extent2D::new(80, 40));
    assert!(renderer.draw().unwrap());
    assert_eq!(renderer.backend().descriptor_writes(), writes);
}

#[test]
fn test_resize_rewires_every_set() {
    let mut renderer = headless_renderer(64, 64);
    assert!(renderer.draw().unwrap());
    let before = renderer.backend().descriptor_writes();

    renderer.on_resize(Extent2D::new(32, 32));
    assert!(renderer.draw().unwrap());
    assert_ne!(renderer.backend().descriptor_writes(), before);
    assert!(renderer.backend().dangling_descriptor_views().is_empty());
}

#[rstest]
#[case(false)]
#[case(true)]
fn test_draw_at_5k(#[case] tiled_lighting: bool) {
    let mut renderer = headless_renderer(5120, 2880);
    renderer.submit_lights(&[point_light(Vec3::Y)]).unwrap();
    renderer.config().update(|config| config.tiled_lighting.enabled = tiled_lighting);
    assert!(renderer.draw().unwrap());
    assert!(renderer.uniforms().tile_capacity() >= 320 * 180);
}

#[test]
fn test_resize_past_tile_capacity_rewires_tile_buffers() {
    let mut renderer = headless_renderer(64, 64);
    renderer.submit_lights(&[point_light(Vec3::Y)]).unwrap();
    renderer.config().update(|config| config.tiled_lighting.enabled = true);
    assert!(renderer.draw().unwrap());
    let capacity = renderer.uniforms().tile_capacity();

    renderer.on_resize(Extent2D::new(5120, 2880));
    assert!(renderer.draw().unwrap());
    assert!(renderer.uniforms().tile_capacity() > capacity);
    assert!(renderer.backend().dangling_descriptor_views().is_empty());

    let grid = renderer.resources().buffer(renderer.uniforms().buffers.light_grid);
    let writes = renderer.backend().descriptor_writes();
    for set in [renderer.sets().pbr, renderer.sets().light_culling] {
        let handle = renderer.resources().descriptor_set(set).handle;
        match &writes[&handle][&5].resource {
            DescriptorResource::Buffer { buffer, range, .. } => {
                assert_eq!(*buffer, grid.handle);
                assert_eq!(*range, grid.size);
            }
            other => panic!("light grid binding holds {:?}", other),
        }
    }
}

#[test]
fn test_minimized_frame_recreates_swapchain_once() {
    let mut renderer = headless_renderer(64, 64);
    renderer.on_resize(Extent2D::new(0, 0));
    let idle_waits = renderer.backend().idle_waits();
    let recreations = renderer.backend().swapchain_recreations();

    for frame in 1..=3 {
        assert!(!renderer.draw().unwrap());
        assert_eq!(renderer.backend().idle_waits(), idle_waits + frame);
        assert_eq!(renderer.backend().swapchain_recreations(), recreations + frame);
    }
}

#[test]
fn test_minimized_window_defers_resize() {
    let mut renderer = headless_renderer(64, 64);
    renderer.on_resize(Extent2D::new(0, 0));
    assert!(!renderer.draw().unwrap());
    assert_eq!(renderer.extent(), Extent2D::new(64, 64));

    renderer.on_resize(Extent2D::new(48, 48));
    assert!(renderer.draw().unwrap());
    assert_eq!(renderer.extent(), Extent2D::new(48, 48));
}

// ============================================================================
// Environment Tests
// ============================================================================

#[test]
fn test_sky_light_swap_rebinds_sky_cube() {
    let mut renderer = headless_renderer(64, 64);
    assert!(renderer.draw().unwrap());
    let idle_waits = renderer.backend().idle_waits();

    let new_sky = renderer.environment().irradiance;
    renderer
        .submit_sky_light(&SkyLight {
            cubemap: Some(new_sky),
            lod_bias: 1.0,
        })
        .unwrap();
    assert_eq!(renderer.backend().idle_waits(), idle_waits + 1);

    let view = renderer.resources().image(new_sky).view;
    let writes = renderer.backend().descriptor_writes();
    let sets = renderer.sets();
    for (set, binding) in [(sets.skybox, 6), (sets.pbr, 8), (sets.ssr, 3)] {
        let handle = renderer.resources().descriptor_set(set).handle;
        let write = &writes[&handle][&binding];
        match &write.resource {
            DescriptorResource::Images(images) => assert_eq!(images[0].view, view),
            other => panic!("binding {} holds {:?}", binding, other),
        }
    }

    // Same cubemap again is a no-op
    renderer
        .submit_sky_light(&SkyLight {
            cubemap: Some(new_sky),
            lod_bias: 0.0,
        })
        .unwrap();
    assert_eq!(renderer.backend().idle_waits(), idle_waits + 1);
    assert!(renderer.draw().unwrap());
}

#[test]
fn test_shutdown_releases_every_image() {
    let mut renderer = headless_renderer(64, 64);
    assert!(renderer.draw().unwrap());
    let backend = renderer.shutdown().unwrap();
    assert_eq!(backend.live_image_count(), 0);
    assert_eq!(backend.live_buffer_count(), 0);
}
