//! Tonemapping and gamma into the low dynamic range target

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{layout_entry, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{DescriptorSetId, FramebufferId, GpuMesh, PipelineId};
use std::path::Path;
use std::sync::Arc;

pub const POST_PROCESS_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

pub const POST_PROCESS_SHADER: &str = r#"
struct PostProcessParams {
    tonemapper: i32,
    exposure: f32,
    gamma: f32,
    enable_ssao: i32,
    enable_bloom: i32,
    enable_ssr: i32,
}

@group(0) @binding(0) var hdr: texture_2d<f32>;
@group(0) @binding(0) var hdr_sampler: sampler;
@group(0) @binding(1) var<uniform> params: PostProcessParams;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(2) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position.xy, 0.0, 1.0);
    out.uv = uv;
    return out;
}

fn aces(x: vec3<f32>) -> vec3<f32> {
    return clamp((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14), vec3<f32>(0.0), vec3<f32>(1.0));
}

fn uncharted2_curve(x: vec3<f32>) -> vec3<f32> {
    let a = 0.15;
    let b = 0.50;
    let c = 0.10;
    let d = 0.20;
    let e = 0.02;
    let f = 0.30;
    return ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f;
}

fn uncharted2(x: vec3<f32>) -> vec3<f32> {
    let white = 11.2;
    return uncharted2_curve(x * 2.0) / uncharted2_curve(vec3<f32>(white));
}

// Hejl-Burgess-Dawson curve, gamma is already applied
fn filmic(x: vec3<f32>) -> vec3<f32> {
    let c = max(vec3<f32>(0.0), x - 0.004);
    return (c * (6.2 * c + 0.5)) / (c * (6.2 * c + 1.7) + 0.06);
}

fn reinhard(x: vec3<f32>) -> vec3<f32> {
    return x / (x + vec3<f32>(1.0));
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(hdr, hdr_sampler, in.uv).rgb * params.exposure;
    let inverse_gamma = vec3<f32>(1.0 / params.gamma);
    var mapped: vec3<f32>;
    switch params.tonemapper {
        case 1: { mapped = pow(uncharted2(color), inverse_gamma); }
        case 2: { mapped = filmic(color); }
        case 3: { mapped = pow(reinhard(color), inverse_gamma); }
        default: { mapped = pow(aces(color), inverse_gamma); }
    }
    return vec4<f32>(mapped, 1.0);
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::graphics(
        "post_process",
        ShaderSource::with_override(POST_PROCESS_SHADER, dir, "post_process.wgsl"),
    )
}

pub fn pipeline_description() -> PipelineDescription {
    PipelineDescription::new("Post Process")
        .with_set(vec![
            layout_entry(0, DescriptorType::CombinedImageSampler, ShaderStageFlags::FRAGMENT),
            layout_entry(1, DescriptorType::UniformBuffer, ShaderStageFlags::FRAGMENT),
        ])
        .with_vertex_layout(Vertex::layout())
        .with_color(POST_PROCESS_FORMAT, ImageLayout::ShaderReadOnly)
        .with_cull_mode(CullMode::None)
}

pub fn create_pass(
    pipeline: PipelineId,
    set: DescriptorSetId,
    framebuffer: FramebufferId,
    triangle: Arc<GpuMesh>,
) -> RenderGraphPass {
    RenderGraphPass::graphics("PP Pass", move |ctx| {
        ctx.set_viewport_and_scissor(Viewport::from_extent(ctx.extent));
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        triangle.bind(&mut *ctx.backend, ctx.resources);
        triangle.draw(&mut *ctx.backend);
    })
    .with_pipeline(pipeline)
    .with_framebuffers(vec![framebuffer])
    .with_clear_values(vec![ClearValue::Color([0.0, 0.0, 0.0, 1.0])])
    .with_descriptor_sets(vec![set])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_without_depth() {
        let desc = pipeline_description();
        assert!(desc.depth_attachment.is_none());
        assert_eq!(desc.cull_mode, CullMode::None);
    }
}
