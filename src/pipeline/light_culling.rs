//! Tiled light culling for Forward+
//!
//! The screen is split into tiles of [`PIXELS_PER_TILE`] pixels. The frustum
//! grid pass writes one view-space frustum per tile, the light list pass bins
//! every point light into the tiles its bounding sphere touches. The CPU
//! functions here perform the same partitioning and tests as the shaders.

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::uniforms::LightingData;
use crate::pipeline::{layout_entry, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{BufferId, DescriptorSetId, PipelineId};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec3, Vec4};
use std::path::Path;

pub const PIXELS_PER_TILE: u32 = 16;
pub const TILES_PER_THREADGROUP: u32 = 16;
pub const MAX_NUM_LIGHTS: u32 = 1024;
pub const MAX_NUM_LIGHTS_PER_TILE: u32 = 128;
/// Tiles the per-tile buffers hold at least; larger windows grow them
pub const MIN_TILE_CAPACITY: u32 = 32768;

pub const LIGHTS_BUFFER_SIZE: u64 = MAX_NUM_LIGHTS as u64 * std::mem::size_of::<LightingData>() as u64;

/// Byte sizes of the per-tile buffers for `tiles` tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBufferSizes {
    pub frustums: u64,
    pub light_index: u64,
    pub light_grid: u64,
}

impl TileBufferSizes {
    pub fn new(tiles: u32) -> Self {
        let tiles = tiles as u64;
        Self {
            frustums: tiles * std::mem::size_of::<Frustum>() as u64,
            light_index: tiles * MAX_NUM_LIGHTS_PER_TILE as u64 * 4,
            light_grid: tiles * 8,
        }
    }
}

pub fn tile_count(extent: Extent2D) -> u32 {
    let threads = num_threads(extent);
    threads.x * threads.y
}

/// Tiles the per-tile buffers must hold to cover `extent`
pub fn tile_capacity(extent: Extent2D) -> u32 {
    tile_count(extent).max(MIN_TILE_CAPACITY).next_power_of_two()
}

/// Tiles covering `extent`, one culling thread each
pub fn num_threads(extent: Extent2D) -> UVec2 {
    UVec2::new(
        extent.width.div_ceil(PIXELS_PER_TILE),
        extent.height.div_ceil(PIXELS_PER_TILE),
    )
}

/// Workgroups needed to cover [`num_threads`]
pub fn num_thread_groups(extent: Extent2D) -> UVec2 {
    let threads = num_threads(extent);
    UVec2::new(
        threads.x.div_ceil(TILES_PER_THREADGROUP),
        threads.y.div_ceil(TILES_PER_THREADGROUP),
    )
}

/// Plane with the normal pointing into the frustum
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    /// Plane through the eye and `a`, `b`, facing `inside`
    fn through_eye(a: Vec3, b: Vec3, inside: Vec3) -> Self {
        let mut normal = a.cross(b).normalize_or_zero();
        if normal.dot(inside) < 0.0 {
            normal = -normal;
        }
        Self {
            normal,
            distance: 0.0,
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.distance
    }
}

/// Side planes of one tile: left, right, top, bottom
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Frustum {
    pub planes: [Plane; 4],
}

/// View-space frustum of every tile, row by row
///
/// `projection` is the Y-flipped projection bound to the shaders, so screen
/// row 0 maps to NDC y = -1.
pub fn compute_tile_frustums(projection: Mat4, extent: Extent2D) -> Vec<Frustum> {
    let inverse = projection.inverse();
    let size = glam::Vec2::new(extent.width.max(1) as f32, extent.height.max(1) as f32);
    let screen_to_view = |x: f32, y: f32| {
        let ndc = Vec4::new(x / size.x * 2.0 - 1.0, y / size.y * 2.0 - 1.0, 1.0, 1.0);
        let view = inverse * ndc;
        view.truncate() / view.w
    };

    let threads = num_threads(extent);
    let tile = PIXELS_PER_TILE as f32;
    let mut frustums = Vec::with_capacity((threads.x * threads.y) as usize);
    for y in 0..threads.y {
        for x in 0..threads.x {
            let (x0, y0) = (x as f32 * tile, y as f32 * tile);
            let (x1, y1) = (x0 + tile, y0 + tile);
            let top_left = screen_to_view(x0, y0);
            let top_right = screen_to_view(x1, y0);
            let bottom_left = screen_to_view(x0, y1);
            let bottom_right = screen_to_view(x1, y1);
            let center = screen_to_view((x0 + x1) * 0.5, (y0 + y1) * 0.5);
            frustums.push(Frustum {
                planes: [
                    Plane::through_eye(bottom_left, top_left, center),
                    Plane::through_eye(top_right, bottom_right, center),
                    Plane::through_eye(top_left, top_right, center),
                    Plane::through_eye(bottom_right, bottom_left, center),
                ],
            });
        }
    }
    frustums
}

/// Whether a view-space sphere touches the tile between the near and far planes
///
/// View space looks down -Z, so the depth range is `[-far, -near]`.
pub fn sphere_inside_frustum(center: Vec3, radius: f32, frustum: &Frustum, near: f32, far: f32) -> bool {
    if center.z - radius > -near || center.z + radius < -far {
        return false;
    }
    frustum
        .planes
        .iter()
        .all(|plane| plane.signed_distance(center) >= -radius)
}

/// Indices of the lights touching each tile, at most [`MAX_NUM_LIGHTS_PER_TILE`] per tile
pub fn bin_point_lights(
    frustums: &[Frustum],
    lights: &[LightingData],
    view: Mat4,
    near: f32,
    far: f32,
) -> Vec<Vec<u32>> {
    let spheres: Vec<(Vec3, f32)> = lights
        .iter()
        .map(|light| {
            let center = view.transform_point3(light.position_intensity.truncate());
            (center, light.color_range.w)
        })
        .collect();

    frustums
        .iter()
        .map(|frustum| {
            spheres
                .iter()
                .enumerate()
                .filter(|(_, (center, radius))| sphere_inside_frustum(*center, *radius, frustum, near, far))
                .map(|(index, _)| index as u32)
                .take(MAX_NUM_LIGHTS_PER_TILE as usize)
                .collect()
        })
        .collect()
}

pub const FRUSTUM_GRID_SHADER: &str = r#"
struct PassParams {
    num_threads: vec2<u32>,
    num_thread_groups: vec2<u32>,
    screen_dimensions: vec2<u32>,
    num_lights: u32,
    lod_bias: f32,
    tiled_lighting: u32,
}

struct UboVs {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    cam_pos: vec4<f32>,
}

struct Plane {
    normal: vec3<f32>,
    distance: f32,
}

struct Frustum {
    planes: array<Plane, 4>,
}

@group(0) @binding(0) var<uniform> ubo: UboVs;
@group(0) @binding(1) var<uniform> params: PassParams;
@group(0) @binding(3) var<storage, read_write> frustums: array<Frustum>;

const PIXELS_PER_TILE: f32 = 16.0;

// Point on the plane z = -1 under the pixel; only valid for symmetric perspective projections
fn screen_to_view(screen: vec2<f32>) -> vec3<f32> {
    let ndc = screen / vec2<f32>(params.screen_dimensions) * 2.0 - 1.0;
    return vec3<f32>(ndc.x / ubo.projection[0][0], ndc.y / ubo.projection[1][1], -1.0);
}

fn plane_through_eye(a: vec3<f32>, b: vec3<f32>, inside: vec3<f32>) -> Plane {
    var normal = normalize(cross(a, b));
    if (dot(normal, inside) < 0.0) {
        normal = -normal;
    }
    return Plane(normal, 0.0);
}

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= params.num_threads.x || id.y >= params.num_threads.y) {
        return;
    }
    let x0 = f32(id.x) * PIXELS_PER_TILE;
    let y0 = f32(id.y) * PIXELS_PER_TILE;
    let x1 = x0 + PIXELS_PER_TILE;
    let y1 = y0 + PIXELS_PER_TILE;

    let top_left = screen_to_view(vec2<f32>(x0, y0));
    let top_right = screen_to_view(vec2<f32>(x1, y0));
    let bottom_left = screen_to_view(vec2<f32>(x0, y1));
    let bottom_right = screen_to_view(vec2<f32>(x1, y1));
    let center = screen_to_view(vec2<f32>((x0 + x1) * 0.5, (y0 + y1) * 0.5));

    var frustum: Frustum;
    frustum.planes[0] = plane_through_eye(bottom_left, top_left, center);
    frustum.planes[1] = plane_through_eye(top_right, bottom_right, center);
    frustum.planes[2] = plane_through_eye(top_left, top_right, center);
    frustum.planes[3] = plane_through_eye(bottom_right, bottom_left, center);
    frustums[id.x + id.y * params.num_threads.x] = frustum;
}
"#;

pub const LIGHT_LIST_SHADER: &str = r#"
struct PassParams {
    num_threads: vec2<u32>,
    num_thread_groups: vec2<u32>,
    screen_dimensions: vec2<u32>,
    num_lights: u32,
    lod_bias: f32,
    tiled_lighting: u32,
}

struct UboVs {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    cam_pos: vec4<f32>,
}

struct Light {
    position_intensity: vec4<f32>,
    color_range: vec4<f32>,
    rotation: vec4<f32>,
}

struct Plane {
    normal: vec3<f32>,
    distance: f32,
}

struct Frustum {
    planes: array<Plane, 4>,
}

@group(0) @binding(0) var<uniform> ubo: UboVs;
@group(0) @binding(1) var<uniform> params: PassParams;
@group(0) @binding(2) var<storage, read> lights: array<Light>;
@group(0) @binding(3) var<storage, read> frustums: array<Frustum>;
@group(0) @binding(4) var<storage, read_write> light_index: array<u32>;
@group(0) @binding(5) var<storage, read_write> light_grid: array<vec2<u32>>;
@group(0) @binding(6) var depth_map: texture_depth_2d;

const PIXELS_PER_TILE: u32 = 16u;
const MAX_NUM_LIGHTS_PER_TILE: u32 = 128u;

fn linear_depth(depth: f32) -> f32 {
    // view-space z of a depth value under a 0..1 perspective projection
    return -ubo.projection[3][2] / (depth + ubo.projection[2][2]);
}

fn sphere_inside_frustum(center: vec3<f32>, radius: f32, frustum: Frustum, near: f32, far: f32) -> bool {
    if (center.z - radius > near || center.z + radius < far) {
        return false;
    }
    for (var i = 0u; i < 4u; i++) {
        let plane = frustum.planes[i];
        if (dot(plane.normal, center) - plane.distance < -radius) {
            return false;
        }
    }
    return true;
}

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= params.num_threads.x || id.y >= params.num_threads.y) {
        return;
    }
    let tile = id.x + id.y * params.num_threads.x;

    // depth range of the tile, closest and farthest sample
    var min_depth = 1.0;
    var max_depth = 0.0;
    let origin = id.xy * PIXELS_PER_TILE;
    let size = vec2<u32>(textureDimensions(depth_map));
    for (var y = 0u; y < PIXELS_PER_TILE; y++) {
        for (var x = 0u; x < PIXELS_PER_TILE; x++) {
            let texel = min(origin + vec2<u32>(x, y), size - 1u);
            let depth = textureLoad(depth_map, texel, 0);
            min_depth = min(min_depth, depth);
            max_depth = max(max_depth, depth);
        }
    }
    let near = linear_depth(min_depth);
    let far = linear_depth(max_depth);

    let frustum = frustums[tile];
    let offset = tile * MAX_NUM_LIGHTS_PER_TILE;
    var count = 0u;
    for (var i = 0u; i < params.num_lights && count < MAX_NUM_LIGHTS_PER_TILE; i++) {
        let light = lights[i];
        let center = (ubo.view * vec4<f32>(light.position_intensity.xyz, 1.0)).xyz;
        if (sphere_inside_frustum(center, light.color_range.w, frustum, near, far)) {
            light_index[offset + count] = i;
            count++;
        }
    }
    light_grid[tile] = vec2<u32>(offset, count);
}
"#;

pub fn frustum_grid_shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute(
        "frustum_grid",
        ShaderSource::with_override(FRUSTUM_GRID_SHADER, dir, "frustum_grid.wgsl"),
    )
}

pub fn light_list_shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute(
        "light_list",
        ShaderSource::with_override(LIGHT_LIST_SHADER, dir, "light_list.wgsl"),
    )
}

/// Set shared by both culling passes
pub fn set_layout() -> Vec<DescriptorSetLayoutEntry> {
    let compute = ShaderStageFlags::COMPUTE;
    vec![
        layout_entry(0, DescriptorType::UniformBuffer, compute),
        layout_entry(1, DescriptorType::UniformBuffer, compute),
        layout_entry(2, DescriptorType::StorageBuffer, compute),
        layout_entry(3, DescriptorType::StorageBuffer, compute),
        layout_entry(4, DescriptorType::StorageBuffer, compute),
        layout_entry(5, DescriptorType::StorageBuffer, compute),
        layout_entry(6, DescriptorType::CombinedImageSampler, compute),
    ]
}

pub fn frustum_grid_pipeline_description() -> PipelineDescription {
    PipelineDescription::new("Frustum Grid").with_set(set_layout())
}

pub fn light_list_pipeline_description() -> PipelineDescription {
    PipelineDescription::new("Light List").with_set(set_layout())
}

/// Frustum grid dispatch over every tile
pub fn create_frustum_grid_pass(pipeline: PipelineId, set: DescriptorSetId) -> RenderGraphPass {
    RenderGraphPass::compute("Frustum Grid Pass", move |ctx| {
        let groups = num_thread_groups(ctx.extent);
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        ctx.dispatch(groups.x, groups.y, 1);
    })
    .with_pipeline(pipeline)
    .with_descriptor_sets(vec![set])
    .run_with_condition(|config| config.tiled_lighting.enabled)
}

/// Light binning, fenced against the fragment stage reading the lists
pub fn create_light_list_pass(
    pipeline: PipelineId,
    set: DescriptorSetId,
    lights: BufferId,
    light_index: BufferId,
    light_grid: BufferId,
) -> RenderGraphPass {
    RenderGraphPass::compute("Light List Pass", move |ctx| {
        let groups = num_thread_groups(ctx.extent);
        let barriers = ctx.barriers();
        if let Some(barriers) = barriers {
            ctx.barrier(&barriers.before);
        }
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        ctx.dispatch(groups.x, groups.y, 1);
        if let Some(barriers) = barriers {
            ctx.barrier(&barriers.after);
        }
    })
    .with_pipeline(pipeline)
    .with_descriptor_sets(vec![set])
    .with_buffer_barriers(
        vec![lights, light_index, light_grid],
        PipelineStages::FRAGMENT_SHADER,
        PipelineStages::COMPUTE_SHADER,
    )
    .run_with_condition(|config| config.tiled_lighting.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::pipeline::shader::{HeadlessCompiler, ShaderLibrary};
    use crate::pipeline::Pipeline;
    use crate::render_graph::{FrameData, RenderGraph, SwapchainPass};
    use crate::resources::{Binding, DescriptorSet, GpuBuffer, ImageDescription, RendererResources};
    use crate::scene::Camera;
    use rstest::rstest;
    use std::sync::Arc;

    #[rstest]
    #[case(Extent2D::new(1920, 1080), UVec2::new(120, 68), UVec2::new(8, 5))]
    #[case(Extent2D::new(16, 16), UVec2::new(1, 1), UVec2::new(1, 1))]
    #[case(Extent2D::new(257, 1), UVec2::new(17, 1), UVec2::new(2, 1))]
    fn test_tile_counts(#[case] extent: Extent2D, #[case] threads: UVec2, #[case] groups: UVec2) {
        assert_eq!(num_threads(extent), threads);
        assert_eq!(num_thread_groups(extent), groups);
    }

    fn camera() -> Camera {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::NEG_Z);
        camera.set_aspect(128.0, 64.0);
        camera
    }

    fn point_light(position: Vec3, range: f32) -> LightingData {
        LightingData {
            position_intensity: position.extend(1.0),
            color_range: Vec4::new(1.0, 1.0, 1.0, range),
            rotation: Vec4::W,
        }
    }

    #[test]
    fn test_one_frustum_per_tile() {
        let extent = Extent2D::new(128, 64);
        let frustums = compute_tile_frustums(camera().flipped_projection_matrix(), extent);
        assert_eq!(frustums.len(), 8 * 4);
        assert_eq!(frustums.len() as u32, tile_count(extent));
    }

    #[rstest]
    #[case(Extent2D::new(1920, 1080), MIN_TILE_CAPACITY)]
    #[case(Extent2D::new(5120, 2880), 65536)]
    #[case(Extent2D::new(7680, 4320), 131072)]
    fn test_tile_capacity_covers_extent(#[case] extent: Extent2D, #[case] expected: u32) {
        assert_eq!(tile_capacity(extent), expected);
        assert!(tile_capacity(extent) >= tile_count(extent));
        let sizes = TileBufferSizes::new(tile_capacity(extent));
        assert!(sizes.frustums >= tile_count(extent) as u64 * std::mem::size_of::<Frustum>() as u64);
    }

    #[test]
    fn test_centered_light_lands_in_center_tiles_only() {
        let camera = camera();
        let extent = Extent2D::new(128, 64);
        let frustums = compute_tile_frustums(camera.flipped_projection_matrix(), extent);
        let lights = [point_light(Vec3::new(0.0, 0.0, -10.0), 0.1)];
        let bins = bin_point_lights(&frustums, &lights, camera.view_matrix(), camera.near(), camera.far());

        let lit: Vec<usize> = bins
            .iter()
            .enumerate()
            .filter(|(_, tile)| !tile.is_empty())
            .map(|(i, _)| i)
            .collect();
        // tiles 3,4 of rows 1,2 of an 8x4 grid meet at the screen center
        assert_eq!(lit, vec![11, 12, 19, 20]);
    }

    #[test]
    fn test_light_above_screen_lands_in_top_row() {
        let camera = camera();
        let extent = Extent2D::new(128, 64);
        let frustums = compute_tile_frustums(camera.flipped_projection_matrix(), extent);
        // just inside the top edge of the view
        let half_height = (std::f32::consts::FRAC_PI_8).tan() * 10.0;
        let lights = [point_light(Vec3::new(0.5, half_height * 0.9, -10.0), 0.05)];
        let bins = bin_point_lights(&frustums, &lights, camera.view_matrix(), camera.near(), camera.far());
        let lit: Vec<usize> = bins
            .iter()
            .enumerate()
            .filter(|(_, tile)| !tile.is_empty())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(lit.len(), 1);
        assert!(lit[0] < 8);
    }

    #[test]
    fn test_sphere_behind_camera_is_rejected() {
        let frustum = Frustum::default();
        assert!(!sphere_inside_frustum(Vec3::new(0.0, 0.0, 5.0), 1.0, &frustum, 0.1, 100.0));
        assert!(!sphere_inside_frustum(Vec3::new(0.0, 0.0, -500.0), 1.0, &frustum, 0.1, 100.0));
        assert!(sphere_inside_frustum(Vec3::new(0.0, 0.0, -5.0), 1.0, &frustum, 0.1, 100.0));
    }

    #[test]
    fn test_tile_lists_are_capped() {
        let camera = camera();
        let frustums = compute_tile_frustums(camera.flipped_projection_matrix(), Extent2D::new(16, 16));
        let lights = vec![point_light(Vec3::new(0.0, 0.0, -5.0), 100.0); 200];
        let bins = bin_point_lights(&frustums, &lights, camera.view_matrix(), camera.near(), camera.far());
        assert_eq!(bins[0].len(), MAX_NUM_LIGHTS_PER_TILE as usize);
        assert_eq!(bins[0][0], 0);
    }

    #[test]
    fn test_light_list_pass_fences_its_dispatch() {
        let extent = Extent2D::new(64, 32);
        let mut backend = HeadlessBackend::new(extent);
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let shaders = ShaderLibrary::new(Arc::new(HeadlessCompiler));
        let shader = shaders.create_shader(light_list_shader_info(None)).unwrap();
        let pipeline = Pipeline::create(&mut backend, &shader, &light_list_pipeline_description()).unwrap();
        let layout = pipeline.set_layout(0).unwrap();
        let pipeline = resources.add_pipeline(pipeline);

        let ubo = resources.add_buffer(GpuBuffer::storage(&mut backend, "ubo", 144).unwrap());
        let params = resources.add_buffer(GpuBuffer::storage(&mut backend, "params", 48).unwrap());
        let lights = resources.add_buffer(GpuBuffer::storage(&mut backend, "lights", 48).unwrap());
        let frustums = resources.add_buffer(GpuBuffer::storage(&mut backend, "frustums", 64).unwrap());
        let index = resources.add_buffer(GpuBuffer::storage(&mut backend, "index", 4).unwrap());
        let grid = resources.add_buffer(GpuBuffer::storage(&mut backend, "grid", 8).unwrap());
        let depth = resources
            .create_image(
                &mut backend,
                ImageDescription::new("depth", extent, TextureFormat::Depth32Float, TextureUsage::TEXTURE_BINDING)
                    .with_sampler(SamplerDescriptor::default()),
            )
            .unwrap();
        let set = DescriptorSet::allocate(
            &mut backend,
            "Light List",
            layout,
            vec![
                Binding::uniform(0, ubo),
                Binding::uniform(1, params),
                Binding::storage_buffer(2, lights),
                Binding::storage_buffer(3, frustums),
                Binding::storage_buffer(4, index),
                Binding::storage_buffer(5, grid),
                Binding::sampled(6, depth),
            ],
        )
        .unwrap();
        let set = resources.add_descriptor_set(set);
        resources.update_descriptor_set(set, &mut backend).unwrap();

        let mut graph = RenderGraph::new();
        graph
            .add_to_graph_compute(
                create_light_list_pass(pipeline, set, lights, index, grid),
                &resources,
                &mut backend,
            )
            .unwrap();
        graph
            .set_swapchain_pass(SwapchainPass::new("Swapchain", [0.0; 4], |_| {}), &mut backend)
            .unwrap();

        let mut frame = FrameData {
            extent,
            ..Default::default()
        };
        graph.update(&mut backend, &resources, &frame).unwrap();
        graph.submit_swapchain_pass(&mut backend, &resources, &frame).unwrap();
        assert!(backend.last_frame_submission("Light List Pass").is_none());

        frame.config.tiled_lighting.enabled = true;
        graph.update(&mut backend, &resources, &frame).unwrap();
        graph.submit_swapchain_pass(&mut backend, &resources, &frame).unwrap();
        let submission = backend.last_frame_submission("Light List Pass").unwrap();
        assert_eq!(submission.dispatches(), vec![[1, 1, 1]]);
        let barriers = submission.barriers();
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].src_stages, PipelineStages::FRAGMENT_SHADER);
        assert_eq!(barriers[0].dst_stages, PipelineStages::COMPUTE_SHADER);
        assert_eq!(barriers[1].src_stages, PipelineStages::COMPUTE_SHADER);
        assert_eq!(barriers[0].buffers.len(), 3);
    }
}
