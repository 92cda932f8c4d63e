//! Screen-space reflections

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{group_count, layout_entry, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{DescriptorSetId, PipelineId};
use std::path::Path;

pub const SSR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

pub const SSR_SHADER: &str = r#"
struct UboVs {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    cam_pos: vec4<f32>,
}

struct SsrParams {
    samples: i32,
    max_distance: f32,
}

@group(0) @binding(0) var output: texture_storage_2d<rgba16float, write>;
@group(0) @binding(1) var scene_color: texture_2d<f32>;
@group(0) @binding(1) var scene_sampler: sampler;
@group(0) @binding(2) var depth_map: texture_depth_2d;
@group(0) @binding(3) var sky: texture_cube<f32>;
@group(0) @binding(3) var sky_sampler: sampler;
@group(0) @binding(4) var normal_map: texture_2d<f32>;
@group(0) @binding(5) var<uniform> ubo: UboVs;
@group(0) @binding(6) var<uniform> params: SsrParams;

fn view_position(texel: vec2<i32>, size: vec2<f32>) -> vec3<f32> {
    let depth = textureLoad(depth_map, texel, 0);
    let uv = (vec2<f32>(texel) + 0.5) / size;
    let p = ubo.projection;
    let z = -p[3][2] / (depth + p[2][2]);
    let ndc = uv * 2.0 - 1.0;
    return vec3<f32>(ndc.x * -z / p[0][0], ndc.y * -z / p[1][1], z);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(output);
    if (id.x >= dims.x || id.y >= dims.y) {
        return;
    }
    let size = vec2<f32>(dims);
    let texel = vec2<i32>(id.xy);
    if (textureLoad(depth_map, texel, 0) >= 1.0) {
        textureStore(output, texel, vec4<f32>(0.0));
        return;
    }

    let origin = view_position(texel, size);
    let normal = normalize(textureLoad(normal_map, texel, 0).xyz);
    let dir = normalize(reflect(normalize(origin), normal));
    let step = dir * (params.max_distance / f32(max(params.samples, 1)));

    var ray = origin;
    var hit = vec4<f32>(0.0);
    for (var i = 0; i < params.samples; i++) {
        ray += step;
        let clip = ubo.projection * vec4<f32>(ray, 1.0);
        let uv = clip.xy / clip.w * 0.5 + 0.5;
        if (any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0))) {
            break;
        }
        let scene = view_position(vec2<i32>(uv * size), size);
        let delta = scene.z - ray.z;
        if (delta > 0.0 && delta < length(step)) {
            let edge = 1.0 - smoothstep(0.8, 1.0, max(abs(uv.x - 0.5), abs(uv.y - 0.5)) * 2.0);
            hit = vec4<f32>(textureSampleLevel(scene_color, scene_sampler, uv, 0.0).rgb, edge);
            break;
        }
    }
    if (hit.a == 0.0) {
        let world_dir = (transpose(ubo.view) * vec4<f32>(dir, 0.0)).xyz;
        hit = vec4<f32>(textureSampleLevel(sky, sky_sampler, world_dir, 0.0).rgb, 0.25);
    }
    textureStore(output, texel, hit);
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute("ssr", ShaderSource::with_override(SSR_SHADER, dir, "ssr.wgsl"))
}

pub fn pipeline_description() -> PipelineDescription {
    let compute = ShaderStageFlags::COMPUTE;
    PipelineDescription::new("SSR").with_set(vec![
        layout_entry(0, DescriptorType::StorageImage, compute),
        layout_entry(1, DescriptorType::CombinedImageSampler, compute),
        layout_entry(2, DescriptorType::CombinedImageSampler, compute),
        layout_entry(3, DescriptorType::CombinedImageSampler, compute),
        layout_entry(4, DescriptorType::CombinedImageSampler, compute),
        layout_entry(5, DescriptorType::UniformBuffer, compute),
        layout_entry(6, DescriptorType::UniformBuffer, compute),
    ])
}

pub fn create_pass(pipeline: PipelineId, set: DescriptorSetId) -> RenderGraphPass {
    RenderGraphPass::compute("SSR Pass", move |ctx| {
        let (x, y) = group_count(ctx.extent);
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        ctx.dispatch(x, y, 1);
    })
    .with_pipeline(pipeline)
    .with_descriptor_sets(vec![set])
    .run_with_condition(|config| config.ssr.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_first_binding() {
        let desc = pipeline_description();
        assert_eq!(desc.set_layouts[0].len(), 7);
        assert_eq!(desc.set_layouts[0][0].ty, DescriptorType::StorageImage);
        assert_eq!(desc.set_layouts[0][6].ty, DescriptorType::UniformBuffer);
    }
}
