//! Screen-space ambient occlusion and its separable blur

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{group_count, layout_entry, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{DescriptorSetId, ImageId, PipelineId};
use std::path::Path;

pub const SSAO_FORMAT: TextureFormat = TextureFormat::R8Unorm;

pub const SSAO_SHADER: &str = r#"
struct UboVs {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    cam_pos: vec4<f32>,
}

struct SsaoParams {
    radius: f32,
    bias: f32,
}

@group(0) @binding(0) var<uniform> ubo: UboVs;
@group(0) @binding(1) var depth_map: texture_depth_2d;
@group(0) @binding(2) var output: texture_storage_2d<r8unorm, write>;
@group(0) @binding(3) var normal_map: texture_2d<f32>;
@group(0) @binding(4) var<uniform> params: SsaoParams;

const KERNEL_SIZE: u32 = 16u;

fn hash(p: vec2<f32>) -> f32 {
    return fract(sin(dot(p, vec2<f32>(12.9898, 78.233))) * 43758.5453);
}

fn view_position(texel: vec2<i32>, size: vec2<f32>) -> vec3<f32> {
    let depth = textureLoad(depth_map, texel, 0);
    let uv = (vec2<f32>(texel) + 0.5) / size;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, uv.y * 2.0 - 1.0, depth, 1.0);
    let view = inverse_projection(ndc);
    return view.xyz / view.w;
}

// Inverse of a 0..1 depth perspective projection
fn inverse_projection(ndc: vec4<f32>) -> vec4<f32> {
    let p = ubo.projection;
    let z = -p[3][2] / (ndc.z + p[2][2]);
    return vec4<f32>(ndc.x * -z / p[0][0], ndc.y * -z / p[1][1], z, 1.0);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(output);
    if (id.x >= dims.x || id.y >= dims.y) {
        return;
    }
    let size = vec2<f32>(dims);
    let texel = vec2<i32>(id.xy);
    let origin = view_position(texel, size);
    let normal = normalize(textureLoad(normal_map, texel, 0).xyz);

    let random = normalize(vec3<f32>(hash(vec2<f32>(id.xy)) * 2.0 - 1.0, hash(vec2<f32>(id.yx)) * 2.0 - 1.0, 0.0));
    let tangent = normalize(random - normal * dot(random, normal));
    let bitangent = cross(normal, tangent);
    let tbn = mat3x3<f32>(tangent, bitangent, normal);

    var occlusion = 0.0;
    for (var i = 0u; i < KERNEL_SIZE; i++) {
        let fi = f32(i);
        let h = vec3<f32>(
            hash(vec2<f32>(fi, 1.0)) * 2.0 - 1.0,
            hash(vec2<f32>(fi, 2.0)) * 2.0 - 1.0,
            hash(vec2<f32>(fi, 3.0)),
        );
        var scale = fi / f32(KERNEL_SIZE);
        scale = mix(0.1, 1.0, scale * scale);
        let sample_pos = origin + tbn * normalize(h) * scale * params.radius;

        let clip = ubo.projection * vec4<f32>(sample_pos, 1.0);
        let uv = clip.xy / clip.w * 0.5 + 0.5;
        let sample_texel = clamp(vec2<i32>(uv * size), vec2<i32>(0), vec2<i32>(dims) - 1);
        let scene_depth = view_position(sample_texel, size).z;
        let range = smoothstep(0.0, 1.0, params.radius / abs(origin.z - scene_depth));
        occlusion += select(0.0, 1.0, scene_depth >= sample_pos.z + params.bias) * range;
    }
    textureStore(output, texel, vec4<f32>(1.0 - occlusion / f32(KERNEL_SIZE), 0.0, 0.0, 1.0));
}
"#;

pub const GAUSSIAN_BLUR_SHADER: &str = r#"
struct Push {
    horizontal: u32,
}

@group(0) @binding(0) var output: texture_storage_2d<r8unorm, write>;
@group(0) @binding(1) var source: texture_2d<f32>;

var<push_constant> push: Push;

const WEIGHTS = array<f32, 5>(0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216);

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = vec2<i32>(textureDimensions(output));
    let texel = vec2<i32>(id.xy);
    if (texel.x >= dims.x || texel.y >= dims.y) {
        return;
    }
    let step = select(vec2<i32>(0, 1), vec2<i32>(1, 0), push.horizontal != 0u);
    var weights = WEIGHTS;
    var result = textureLoad(source, texel, 0).r * weights[0];
    for (var i = 1; i < 5; i++) {
        let a = clamp(texel + step * i, vec2<i32>(0), dims - 1);
        let b = clamp(texel - step * i, vec2<i32>(0), dims - 1);
        result += (textureLoad(source, a, 0).r + textureLoad(source, b, 0).r) * weights[i];
    }
    textureStore(output, texel, vec4<f32>(result, 0.0, 0.0, 1.0));
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute("ssao", ShaderSource::with_override(SSAO_SHADER, dir, "ssao.wgsl"))
}

pub fn blur_shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute(
        "gaussian_blur",
        ShaderSource::with_override(GAUSSIAN_BLUR_SHADER, dir, "gaussian_blur.wgsl"),
    )
}

pub fn pipeline_description() -> PipelineDescription {
    let compute = ShaderStageFlags::COMPUTE;
    PipelineDescription::new("SSAO").with_set(vec![
        layout_entry(0, DescriptorType::UniformBuffer, compute),
        layout_entry(1, DescriptorType::CombinedImageSampler, compute),
        layout_entry(2, DescriptorType::StorageImage, compute),
        layout_entry(3, DescriptorType::CombinedImageSampler, compute),
        layout_entry(4, DescriptorType::UniformBuffer, compute),
    ])
}

pub fn blur_pipeline_description() -> PipelineDescription {
    let compute = ShaderStageFlags::COMPUTE;
    PipelineDescription::new("Gaussian Blur")
        .with_set(vec![
            layout_entry(0, DescriptorType::StorageImage, compute),
            layout_entry(1, DescriptorType::CombinedImageSampler, compute),
        ])
        .with_push_constants(compute, 0, 4)
}

/// SSAO dispatch with the blur recorded as an inner pass
pub fn create_pass(
    pipeline: PipelineId,
    set: DescriptorSetId,
    blur_pipeline: PipelineId,
    blur_set: DescriptorSetId,
    ssao_image: ImageId,
) -> RenderGraphPass {
    RenderGraphPass::compute("SSAO Pass", move |ctx| {
        let (x, y) = group_count(ctx.extent);
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        ctx.dispatch(x, y, 1);
    })
    .with_pipeline(pipeline)
    .with_descriptor_sets(vec![set, blur_set])
    .run_with_condition(|config| config.ssao.enabled)
    .add_inner_pass("SSAO Blur Pass", move |ctx| {
        let (x, y) = group_count(ctx.extent);
        let barrier = ctx.resources.image(ssao_image).barrier(
            AccessFlags::SHADER_WRITE,
            AccessFlags::SHADER_READ,
            ImageLayout::General,
            ImageLayout::General,
        );
        ctx.compute_barrier(vec![barrier]);

        ctx.bind_pipeline(blur_pipeline);
        ctx.bind_descriptor_sets(blur_pipeline, 0, &[blur_set]);
        // First dispatch runs with the zeroed push block: vertical
        ctx.dispatch(x, y, 1);
        ctx.push_constants(blur_pipeline, ShaderStageFlags::COMPUTE, 0, &1u32);
        ctx.bind_descriptor_sets(blur_pipeline, 0, &[blur_set]);
        ctx.dispatch(x, y, 1);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_push_range_holds_one_flag() {
        let desc = blur_pipeline_description();
        assert_eq!(desc.push_constant_ranges[0].size, 4);
        assert_eq!(desc.set_layouts[0][0].ty, DescriptorType::StorageImage);
    }
}
