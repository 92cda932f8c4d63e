//! Depth of field

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{group_count, layout_entry, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{DescriptorSetId, PipelineId};
use std::path::Path;

pub const DOF_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

pub const DOF_SHADER: &str = r#"
@group(0) @binding(0) var output: texture_storage_2d<rgba16float, write>;
@group(0) @binding(1) var scene_color: texture_2d<f32>;
@group(0) @binding(1) var scene_sampler: sampler;
@group(0) @binding(2) var depth_map: texture_depth_2d;

const FOCUS_DEPTH: f32 = 0.985;
const FOCUS_RANGE: f32 = 0.01;
const MAX_RADIUS: f32 = 4.0;

const TAPS = array<vec2<f32>, 8>(
    vec2<f32>(1.0, 0.0), vec2<f32>(0.707, 0.707), vec2<f32>(0.0, 1.0), vec2<f32>(-0.707, 0.707),
    vec2<f32>(-1.0, 0.0), vec2<f32>(-0.707, -0.707), vec2<f32>(0.0, -1.0), vec2<f32>(0.707, -0.707),
);

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(output);
    if (id.x >= dims.x || id.y >= dims.y) {
        return;
    }
    let texel = vec2<i32>(id.xy);
    let size = vec2<f32>(dims);
    let uv = (vec2<f32>(id.xy) + 0.5) / size;
    let depth = textureLoad(depth_map, texel, 0);
    let coc = clamp(abs(depth - FOCUS_DEPTH) / FOCUS_RANGE, 0.0, 1.0) * MAX_RADIUS;

    var taps = TAPS;
    var color = textureSampleLevel(scene_color, scene_sampler, uv, 0.0).rgb;
    for (var i = 0; i < 8; i++) {
        let offset = taps[i] * coc / size;
        color += textureSampleLevel(scene_color, scene_sampler, uv + offset, 0.0).rgb;
    }
    textureStore(output, texel, vec4<f32>(color / 9.0, 1.0));
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute("dof", ShaderSource::with_override(DOF_SHADER, dir, "dof.wgsl"))
}

pub fn pipeline_description() -> PipelineDescription {
    let compute = ShaderStageFlags::COMPUTE;
    PipelineDescription::new("Depth of Field").with_set(vec![
        layout_entry(0, DescriptorType::StorageImage, compute),
        layout_entry(1, DescriptorType::CombinedImageSampler, compute),
        layout_entry(2, DescriptorType::CombinedImageSampler, compute),
    ])
}

pub fn create_pass(pipeline: PipelineId, set: DescriptorSetId) -> RenderGraphPass {
    RenderGraphPass::compute("DepthOfField Pass", move |ctx| {
        let (x, y) = group_count(ctx.extent);
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        ctx.dispatch(x, y, 1);
    })
    .with_pipeline(pipeline)
    .with_descriptor_sets(vec![set])
}
