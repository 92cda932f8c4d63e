//! Forward PBR pass
//!
//! Draws the skybox first, then every submitted mesh with its material, then
//! the textured quads through an inner pass. Point lights come either from
//! the per-tile lists written by the light culling passes or, when tiled
//! lighting is off, from a loop over the whole light buffer.

use crate::backend::traits::RenderPassHandle;
use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{layout_array, layout_entry, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{
    DescriptorSetId, FramebufferId, GpuMesh, Material, PipelineId, MATERIAL_TEXTURE_SLOTS,
};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::path::Path;
use std::sync::Arc;

pub const PBR_COLOR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Byte offset of the material parameters in the push constant block
pub const MATERIAL_PUSH_OFFSET: u32 = 64;

/// Set 0 of the PBR and depth pre-pass pipelines
pub fn pbr_set_layout() -> Vec<DescriptorSetLayoutEntry> {
    let fragment = ShaderStageFlags::FRAGMENT;
    vec![
        layout_entry(0, DescriptorType::UniformBuffer, ShaderStageFlags::VERTEX_FRAGMENT),
        layout_entry(1, DescriptorType::UniformBuffer, ShaderStageFlags::VERTEX_FRAGMENT),
        layout_entry(2, DescriptorType::StorageBuffer, fragment),
        layout_entry(3, DescriptorType::StorageBuffer, fragment),
        layout_entry(4, DescriptorType::StorageBuffer, fragment),
        layout_entry(5, DescriptorType::StorageBuffer, fragment),
        layout_entry(6, DescriptorType::CombinedImageSampler, fragment),
        layout_entry(7, DescriptorType::CombinedImageSampler, fragment),
        layout_entry(8, DescriptorType::CombinedImageSampler, fragment),
        layout_entry(9, DescriptorType::CombinedImageSampler, fragment),
        layout_entry(11, DescriptorType::UniformBuffer, fragment),
    ]
}

/// Set 1: albedo, normal, metallic-roughness, occlusion, emissive
pub fn material_set_layout() -> Vec<DescriptorSetLayoutEntry> {
    (0..MATERIAL_TEXTURE_SLOTS)
        .map(|slot| layout_entry(slot, DescriptorType::CombinedImageSampler, ShaderStageFlags::FRAGMENT))
        .collect()
}

/// Vertex push constant of the unlit quad pipeline
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UnlitPushConstants {
    pub mvp: Mat4,
    pub color: Vec4,
}

pub const PBR_SHADER: &str = r#"
struct UboVs {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    cam_pos: vec4<f32>,
}

struct PassParams {
    num_threads: vec2<u32>,
    num_thread_groups: vec2<u32>,
    screen_dimensions: vec2<u32>,
    num_lights: u32,
    lod_bias: f32,
    tiled_lighting: u32,
}

struct Light {
    position_intensity: vec4<f32>,
    color_range: vec4<f32>,
    rotation: vec4<f32>,
}

struct DirectShadow {
    cascade_view_proj: array<mat4x4<f32>, 4>,
    cascade_splits: vec4<f32>,
    light_direction: vec4<f32>,
    light_color: vec4<f32>,
}

struct MaterialParams {
    base_color: vec4<f32>,
    emissive: vec4<f32>,
    metallic: f32,
    roughness: f32,
    texture_flags: u32,
    _padding: u32,
}

struct Push {
    model: mat4x4<f32>,
    material: MaterialParams,
}

@group(0) @binding(0) var<uniform> ubo: UboVs;
@group(0) @binding(1) var<uniform> params: PassParams;
@group(0) @binding(2) var<storage, read> lights: array<Light>;
@group(0) @binding(4) var<storage, read> light_index: array<u32>;
@group(0) @binding(5) var<storage, read> light_grid: array<vec2<u32>>;
@group(0) @binding(6) var irradiance_map: texture_cube<f32>;
@group(0) @binding(6) var irradiance_sampler: sampler;
@group(0) @binding(7) var brdf_lut: texture_2d<f32>;
@group(0) @binding(7) var brdf_sampler: sampler;
@group(0) @binding(8) var prefiltered_map: texture_cube<f32>;
@group(0) @binding(8) var prefiltered_sampler: sampler;
@group(0) @binding(9) var shadow_map: texture_depth_2d_array;
@group(0) @binding(11) var<uniform> shadow: DirectShadow;

@group(1) @binding(0) var albedo_map: texture_2d<f32>;
@group(1) @binding(0) var albedo_sampler: sampler;
@group(1) @binding(1) var normal_map: texture_2d<f32>;
@group(1) @binding(1) var normal_sampler: sampler;
@group(1) @binding(2) var metallic_roughness_map: texture_2d<f32>;
@group(1) @binding(2) var metallic_roughness_sampler: sampler;
@group(1) @binding(3) var occlusion_map: texture_2d<f32>;
@group(1) @binding(3) var occlusion_sampler: sampler;
@group(1) @binding(4) var emissive_map: texture_2d<f32>;
@group(1) @binding(4) var emissive_sampler: sampler;

var<push_constant> push: Push;

const PI: f32 = 3.14159265359;
const PIXELS_PER_TILE: f32 = 16.0;
const PREFILTERED_MIPS: f32 = 9.0;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
    @location(4) view_depth: f32,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    let world = push.model * vec4<f32>(in.position, 1.0);
    let view = ubo.view * world;
    var out: VertexOutput;
    out.clip_position = ubo.projection * view;
    out.world_position = world.xyz;
    out.normal = normalize((push.model * vec4<f32>(in.normal, 0.0)).xyz);
    out.uv = in.uv;
    out.tangent = vec4<f32>(normalize((push.model * vec4<f32>(in.tangent.xyz, 0.0)).xyz), in.tangent.w);
    out.view_depth = view.z;
    return out;
}

fn has_texture(slot: u32) -> bool {
    return (push.material.texture_flags & (1u << slot)) != 0u;
}

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / (PI * d * d);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    let gv = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let gl = n_dot_l / (n_dot_l * (1.0 - k) + k);
    return gv * gl;
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (1.0 - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn fresnel_schlick_roughness(cos_theta: f32, f0: vec3<f32>, roughness: f32) -> vec3<f32> {
    return f0 + (max(vec3<f32>(1.0 - roughness), f0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn specular_contribution(
    l: vec3<f32>, v: vec3<f32>, n: vec3<f32>, f0: vec3<f32>,
    albedo: vec3<f32>, metallic: f32, roughness: f32, radiance: vec3<f32>,
) -> vec3<f32> {
    let h = normalize(v + l);
    let n_dot_l = max(dot(n, l), 0.0);
    if (n_dot_l <= 0.0) {
        return vec3<f32>(0.0);
    }
    let n_dot_v = max(dot(n, v), 1e-4);
    let d = distribution_ggx(max(dot(n, h), 0.0), roughness);
    let g = geometry_smith(n_dot_v, n_dot_l, roughness);
    let f = fresnel_schlick(max(dot(h, v), 0.0), f0);
    let specular = d * g * f / (4.0 * n_dot_v * n_dot_l + 1e-4);
    let kd = (vec3<f32>(1.0) - f) * (1.0 - metallic);
    return (kd * albedo / PI + specular) * radiance * n_dot_l;
}

fn point_light(index: u32, world: vec3<f32>, v: vec3<f32>, n: vec3<f32>, f0: vec3<f32>,
               albedo: vec3<f32>, metallic: f32, roughness: f32) -> vec3<f32> {
    let light = lights[index];
    let to_light = light.position_intensity.xyz - world;
    let distance = length(to_light);
    let range = light.color_range.w;
    if (distance > range) {
        return vec3<f32>(0.0);
    }
    let falloff = clamp(1.0 - pow(distance / range, 4.0), 0.0, 1.0);
    let attenuation = falloff * falloff / (distance * distance + 1.0);
    let radiance = light.color_range.rgb * light.position_intensity.w * attenuation;
    return specular_contribution(to_light / distance, v, n, f0, albedo, metallic, roughness, radiance);
}

fn cascade_index(view_depth: f32) -> u32 {
    var cascade = 0u;
    for (var i = 0u; i < 3u; i++) {
        if (view_depth < shadow.cascade_splits[i]) {
            cascade = i + 1u;
        }
    }
    return cascade;
}

fn sun_shadow(world: vec3<f32>, view_depth: f32) -> f32 {
    let cascade = cascade_index(view_depth);
    let clip = shadow.cascade_view_proj[cascade] * vec4<f32>(world, 1.0);
    let coord = clip.xyz / clip.w;
    if (coord.z <= 0.0 || coord.z >= 1.0) {
        return 1.0;
    }
    let uv = coord.xy * vec2<f32>(0.5, -0.5) + 0.5;
    let size = vec2<i32>(textureDimensions(shadow_map));
    let center = vec2<i32>(uv * vec2<f32>(size));
    var lit = 0.0;
    for (var y = -1; y <= 1; y++) {
        for (var x = -1; x <= 1; x++) {
            let texel = clamp(center + vec2<i32>(x, y), vec2<i32>(0), size - 1);
            let depth = textureLoad(shadow_map, texel, i32(cascade), 0);
            lit += select(0.0, 1.0, coord.z - 0.0005 <= depth);
        }
    }
    return lit / 9.0;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var albedo = push.material.base_color;
    if (has_texture(0u)) {
        albedo *= textureSample(albedo_map, albedo_sampler, in.uv);
    }
    var metallic = push.material.metallic;
    var roughness = push.material.roughness;
    if (has_texture(2u)) {
        let mr = textureSample(metallic_roughness_map, metallic_roughness_sampler, in.uv);
        metallic *= mr.b;
        roughness *= mr.g;
    }
    roughness = clamp(roughness, 0.04, 1.0);

    var n = normalize(in.normal);
    if (has_texture(1u)) {
        let t = normalize(in.tangent.xyz - n * dot(n, in.tangent.xyz));
        let b = cross(n, t) * in.tangent.w;
        let sampled = textureSample(normal_map, normal_sampler, in.uv).xyz * 2.0 - 1.0;
        n = normalize(mat3x3<f32>(t, b, n) * sampled);
    }
    let v = normalize(ubo.cam_pos.xyz - in.world_position);
    let f0 = mix(vec3<f32>(0.04), albedo.rgb, metallic);

    var lo = vec3<f32>(0.0);
    if (params.tiled_lighting != 0u) {
        let tile = vec2<u32>(in.clip_position.xy / PIXELS_PER_TILE);
        let grid = light_grid[tile.x + tile.y * params.num_threads.x];
        for (var i = 0u; i < grid.y; i++) {
            lo += point_light(light_index[grid.x + i], in.world_position, v, n, f0, albedo.rgb, metallic, roughness);
        }
    } else {
        for (var i = 0u; i < params.num_lights; i++) {
            lo += point_light(i, in.world_position, v, n, f0, albedo.rgb, metallic, roughness);
        }
    }

    let sun_intensity = shadow.light_direction.w;
    if (sun_intensity > 0.0) {
        let l = -normalize(shadow.light_direction.xyz);
        let radiance = shadow.light_color.rgb * sun_intensity * sun_shadow(in.world_position, in.view_depth);
        lo += specular_contribution(l, v, n, f0, albedo.rgb, metallic, roughness, radiance);
    }

    // image based ambient
    let n_dot_v = max(dot(n, v), 1e-4);
    let f = fresnel_schlick_roughness(n_dot_v, f0, roughness);
    let kd = (1.0 - f) * (1.0 - metallic);
    let irradiance = textureSample(irradiance_map, irradiance_sampler, n).rgb;
    let r = reflect(-v, n);
    let lod = roughness * PREFILTERED_MIPS + params.lod_bias;
    let prefiltered = textureSampleLevel(prefiltered_map, prefiltered_sampler, r, lod).rgb;
    let brdf = textureSample(brdf_lut, brdf_sampler, vec2<f32>(n_dot_v, roughness)).rg;
    var ambient = kd * irradiance * albedo.rgb + prefiltered * (f * brdf.x + brdf.y);
    if (has_texture(3u)) {
        ambient *= textureSample(occlusion_map, occlusion_sampler, in.uv).r;
    }

    var emissive = push.material.emissive.rgb * push.material.emissive.w;
    if (has_texture(4u)) {
        emissive *= textureSample(emissive_map, emissive_sampler, in.uv).rgb;
    }
    return vec4<f32>(lo + ambient + emissive, albedo.a);
}
"#;

pub const SKYBOX_SHADER: &str = r#"
struct UboVs {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    cam_pos: vec4<f32>,
}

struct PostProcess {
    tonemapper: i32,
    exposure: f32,
    gamma: f32,
    enable_ssao: i32,
    enable_bloom: i32,
    enable_ssr: i32,
}

@group(0) @binding(0) var<uniform> ubo: UboVs;
@group(0) @binding(1) var<uniform> post: PostProcess;
@group(0) @binding(6) var cube_map: texture_cube<f32>;
@group(0) @binding(6) var cube_sampler: sampler;

var<push_constant> skybox_view: mat4x4<f32>;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    let clip = ubo.projection * skybox_view * vec4<f32>(position, 1.0);
    // depth pinned to the far plane
    out.clip_position = clip.xyww;
    out.direction = position;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(cube_map, cube_sampler, normalize(in.direction)).rgb;
    return vec4<f32>(color * post.exposure, 1.0);
}
"#;

pub const UNLIT_SHADER: &str = r#"
struct Push {
    mvp: mat4x4<f32>,
    color: vec4<f32>,
}

var<push_constant> push: Push;

@group(0) @binding(0) var image: texture_2d<f32>;
@group(0) @binding(0) var image_sampler: sampler;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(2) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = push.mvp * vec4<f32>(position, 1.0);
    out.uv = uv;
    out.color = push.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(image, image_sampler, in.uv) * in.color;
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::graphics("pbr", ShaderSource::with_override(PBR_SHADER, dir, "pbr.wgsl"))
}

pub fn skybox_shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::graphics(
        "skybox",
        ShaderSource::with_override(SKYBOX_SHADER, dir, "skybox.wgsl"),
    )
}

pub fn unlit_shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::graphics("unlit", ShaderSource::with_override(UNLIT_SHADER, dir, "unlit.wgsl"))
}

/// Mesh pipeline; owns the render pass shared with the skybox and unlit pipelines
pub fn pipeline_description() -> PipelineDescription {
    PipelineDescription::new("PBR")
        .with_set(pbr_set_layout())
        .with_set(material_set_layout())
        .with_push_constants(ShaderStageFlags::VERTEX, 0, 64)
        .with_push_constants(
            ShaderStageFlags::FRAGMENT,
            MATERIAL_PUSH_OFFSET,
            std::mem::size_of::<crate::resources::MaterialParams>() as u32,
        )
        .with_vertex_layout(Vertex::layout())
        .with_color(PBR_COLOR_FORMAT, ImageLayout::ShaderReadOnly)
        .with_depth(
            DEPTH_FORMAT,
            ImageLayout::DepthStencilAttachment,
            DepthStencilState {
                depth_test_enabled: true,
                depth_write_enabled: true,
                depth_compare: CompareFunction::LessEqual,
            },
        )
        .with_cull_mode(CullMode::Back)
}

pub fn skybox_pipeline_description(render_pass: RenderPassHandle) -> PipelineDescription {
    PipelineDescription::new("Skybox")
        .with_set(vec![
            layout_entry(0, DescriptorType::UniformBuffer, ShaderStageFlags::VERTEX),
            layout_entry(1, DescriptorType::UniformBuffer, ShaderStageFlags::FRAGMENT),
            layout_entry(6, DescriptorType::CombinedImageSampler, ShaderStageFlags::FRAGMENT),
        ])
        .with_push_constants(ShaderStageFlags::VERTEX, 0, 64)
        .with_vertex_layout(Vertex::layout())
        .with_render_pass(render_pass)
        .with_depth_stencil(DepthStencilState {
            depth_test_enabled: true,
            depth_write_enabled: false,
            depth_compare: CompareFunction::LessEqual,
        })
}

pub fn unlit_pipeline_description(render_pass: RenderPassHandle) -> PipelineDescription {
    PipelineDescription::new("Unlit")
        .with_set(vec![layout_array(
            0,
            1,
            DescriptorType::CombinedImageSampler,
            ShaderStageFlags::FRAGMENT,
        )])
        .with_push_constants(
            ShaderStageFlags::VERTEX,
            0,
            std::mem::size_of::<UnlitPushConstants>() as u32,
        )
        .with_vertex_layout(Vertex::layout())
        .with_render_pass(render_pass)
        .with_blend(BlendState::alpha_blending())
}

/// Everything the PBR pass binds
#[derive(Debug, Clone)]
pub struct PbrPassInputs {
    pub pipeline: PipelineId,
    pub skybox_pipeline: PipelineId,
    pub unlit_pipeline: PipelineId,
    pub set: DescriptorSetId,
    pub skybox_set: DescriptorSetId,
    /// Skybox set sampling the atmosphere cube, used while the atmosphere is enabled
    pub atmosphere_skybox_set: DescriptorSetId,
    /// Bound at set 1 for materials without their own set
    pub default_material_set: DescriptorSetId,
    pub framebuffer: FramebufferId,
    pub cube: Arc<GpuMesh>,
    pub quad: Arc<GpuMesh>,
}

pub fn create_pass(inputs: PbrPassInputs) -> RenderGraphPass {
    let PbrPassInputs {
        pipeline,
        skybox_pipeline,
        unlit_pipeline,
        set,
        skybox_set,
        atmosphere_skybox_set,
        default_material_set,
        framebuffer,
        cube,
        quad,
    } = inputs;
    let default_params = Material::default().params();

    RenderGraphPass::graphics("PBR Pass", move |ctx| {
        ctx.set_viewport_and_scissor(Viewport::from_extent(ctx.extent));

        let sky = if ctx.config().atmosphere.enabled {
            atmosphere_skybox_set
        } else {
            skybox_set
        };
        ctx.bind_pipeline(skybox_pipeline);
        ctx.bind_descriptor_sets(skybox_pipeline, 0, &[sky]);
        ctx.push_constants(skybox_pipeline, ShaderStageFlags::VERTEX, 0, &ctx.frame.skybox_view);
        cube.bind(&mut *ctx.backend, ctx.resources);
        cube.draw(&mut *ctx.backend);

        ctx.bind_pipeline(pipeline);
        for entry in &ctx.frame.meshes {
            let material = entry.material();
            let material_set = material
                .and_then(|m| m.descriptor_set)
                .unwrap_or(default_material_set);
            let params = material.map_or(default_params, |m| m.params());
            ctx.bind_descriptor_sets(pipeline, 0, &[set, material_set]);
            ctx.push_constants(pipeline, ShaderStageFlags::VERTEX, 0, &entry.transform);
            ctx.push_constants(pipeline, ShaderStageFlags::FRAGMENT, MATERIAL_PUSH_OFFSET, &params);
            ctx.draw_mesh(entry);
        }
    })
    .with_pipeline(pipeline)
    .with_framebuffers(vec![framebuffer])
    .with_clear_values(vec![
        ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
        ClearValue::DepthStencil {
            depth: 1.0,
            stencil: 0,
        },
    ])
    .with_descriptor_sets(vec![set, skybox_set, atmosphere_skybox_set])
    .add_inner_pass("Quad Pass", move |ctx| {
        if ctx.frame.quads.is_empty() {
            return;
        }
        let handle = ctx.resources.pipeline(unlit_pipeline).handle;
        ctx.bind_pipeline(unlit_pipeline);
        quad.bind(&mut *ctx.backend, ctx.resources);
        for entry in &ctx.frame.quads {
            let Some(image_set) = ctx
                .resources
                .try_image(entry.image)
                .and_then(|image| image.descriptor_set())
            else {
                log::trace!("Quad image {:?} has no descriptor set, skipped", entry.image);
                continue;
            };
            ctx.backend.bind_descriptor_sets(handle, 0, &[image_set]);
            let push = UnlitPushConstants {
                mvp: ctx.frame.view_projection * entry.transform,
                color: entry.color,
            };
            ctx.push_constants(unlit_pipeline, ShaderStageFlags::VERTEX, 0, &push);
            quad.draw(&mut *ctx.backend);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_layouts_match_the_shader() {
        let set = pbr_set_layout();
        let bindings: Vec<u32> = set.iter().map(|e| e.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11]);
        assert_eq!(set[10].ty, DescriptorType::UniformBuffer);
        assert_eq!(material_set_layout().len(), MATERIAL_TEXTURE_SLOTS as usize);
    }

    #[test]
    fn test_push_ranges_do_not_overlap() {
        let desc = pipeline_description();
        let ranges = &desc.push_constant_ranges;
        assert_eq!(ranges[0].offset + ranges[0].size, ranges[1].offset);
        assert_eq!(ranges[1].size, 48);
        assert_eq!(std::mem::size_of::<UnlitPushConstants>(), 80);
    }
}
