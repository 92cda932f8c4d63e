//! Depth pre-pass
//!
//! Lays down depth and view-space normals for opaque geometry. The light list,
//! SSAO, SSR and depth of field passes read these targets.

use crate::backend::types::*;
use crate::pipeline::pbr::{material_set_layout, pbr_set_layout, DEPTH_FORMAT, MATERIAL_PUSH_OFFSET};
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::PipelineDescription;
use crate::render_graph::RenderGraphPass;
use crate::resources::{DescriptorSetId, FramebufferId, MaterialParams, PipelineId};
use std::path::Path;

pub const NORMAL_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

pub const DEPTH_NORMAL_SHADER: &str = r#"
struct UboVs {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    cam_pos: vec4<f32>,
}

var<push_constant> model: mat4x4<f32>;

@group(0) @binding(0) var<uniform> ubo: UboVs;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) view_normal: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>) -> VertexOutput {
    let model_view = ubo.view * model;
    var out: VertexOutput;
    out.clip_position = ubo.projection * model_view * vec4<f32>(position, 1.0);
    out.view_normal = (model_view * vec4<f32>(normal, 0.0)).xyz;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(normalize(in.view_normal), 1.0);
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::graphics(
        "depth_normal",
        ShaderSource::with_override(DEPTH_NORMAL_SHADER, dir, "depth_normal.wgsl"),
    )
}

/// Same layout as the PBR pipeline so both can share descriptor sets
pub fn pipeline_description() -> PipelineDescription {
    PipelineDescription::new("Depth Pre-Pass")
        .with_set(pbr_set_layout())
        .with_set(material_set_layout())
        .with_push_constants(ShaderStageFlags::VERTEX, 0, 64)
        .with_push_constants(
            ShaderStageFlags::FRAGMENT,
            MATERIAL_PUSH_OFFSET,
            std::mem::size_of::<MaterialParams>() as u32,
        )
        .with_vertex_layout(Vertex::layout())
        .with_color(NORMAL_FORMAT, ImageLayout::ShaderReadOnly)
        .with_depth(
            DEPTH_FORMAT,
            ImageLayout::DepthReadOnly,
            DepthStencilState {
                depth_test_enabled: true,
                depth_write_enabled: true,
                depth_compare: CompareFunction::LessEqual,
            },
        )
        .with_cull_mode(CullMode::Back)
}

pub fn create_pass(
    pipeline: PipelineId,
    set: DescriptorSetId,
    default_material_set: DescriptorSetId,
    framebuffer: FramebufferId,
) -> RenderGraphPass {
    RenderGraphPass::graphics("Depth Pre-Pass", move |ctx| {
        ctx.set_viewport_and_scissor(Viewport::from_extent(ctx.extent));
        ctx.bind_pipeline(pipeline);
        for entry in &ctx.frame.meshes {
            let material = entry.material();
            // Blended surfaces must not occlude what is behind them
            if material.is_some_and(|m| !m.is_opaque()) {
                continue;
            }
            let material_set = material
                .and_then(|m| m.descriptor_set)
                .unwrap_or(default_material_set);
            ctx.bind_descriptor_sets(pipeline, 0, &[set, material_set]);
            ctx.push_constants(pipeline, ShaderStageFlags::VERTEX, 0, &entry.transform);
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
    .with_descriptor_sets(vec![set])
}
