//! Final pass into the swapchain image: the post-processed frame, then the UI

use crate::backend::traits::RenderPassHandle;
use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{layout_entry, PipelineDescription};
use crate::render_graph::{PassContext, SwapchainPass};
use crate::resources::{DescriptorSetId, PipelineId};
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// Source of UI draw data recorded over the final image
///
/// Called with the UI pipeline bound and the viewport covering the surface.
pub trait UiRenderer: Send {
    fn record(&mut self, ctx: &mut PassContext<'_>, pipeline: PipelineId);
}

/// UI renderer slot shared between the facade and the swapchain pass
pub type SharedUiRenderer = Arc<Mutex<Option<Box<dyn UiRenderer>>>>;

/// Maps UI pixel coordinates to clip space
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UiPushConstants {
    pub scale: Vec2,
    pub translate: Vec2,
}

impl UiPushConstants {
    pub fn for_extent(extent: Extent2D) -> Self {
        Self {
            scale: Vec2::new(2.0 / extent.width.max(1) as f32, 2.0 / extent.height.max(1) as f32),
            translate: Vec2::splat(-1.0),
        }
    }
}

pub const QUAD_SHADER: &str = r#"
@group(0) @binding(0) var image: texture_2d<f32>;
@group(0) @binding(0) var image_sampler: sampler;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOutput;
    out.clip_position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(image, image_sampler, in.uv);
}
"#;

pub const UI_SHADER: &str = r#"
struct Push {
    scale: vec2<f32>,
    translate: vec2<f32>,
}

@group(0) @binding(0) var font: texture_2d<f32>;
@group(0) @binding(0) var font_sampler: sampler;

var<push_constant> push: Push;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>, @location(2) color: vec4<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(position * push.scale + push.translate, 0.0, 1.0);
    out.uv = uv;
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color * textureSample(font, font_sampler, in.uv);
}
"#;

pub fn quad_shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::graphics("quad", ShaderSource::with_override(QUAD_SHADER, dir, "quad.wgsl"))
}

pub fn ui_shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::graphics("ui", ShaderSource::with_override(UI_SHADER, dir, "ui.wgsl"))
}

fn sampler_set() -> Vec<DescriptorSetLayoutEntry> {
    vec![layout_entry(
        0,
        DescriptorType::CombinedImageSampler,
        ShaderStageFlags::FRAGMENT,
    )]
}

/// Fullscreen triangle generated from the vertex index, no vertex buffer
pub fn quad_pipeline_description(render_pass: RenderPassHandle) -> PipelineDescription {
    PipelineDescription::new("Quad")
        .with_set(sampler_set())
        .with_render_pass(render_pass)
}

pub fn ui_pipeline_description(render_pass: RenderPassHandle) -> PipelineDescription {
    PipelineDescription::new("UI")
        .with_set(sampler_set())
        .with_push_constants(
            ShaderStageFlags::VERTEX,
            0,
            std::mem::size_of::<UiPushConstants>() as u32,
        )
        .with_vertex_layout(ui_vertex_layout())
        .with_blend(BlendState::alpha_blending())
        .with_render_pass(render_pass)
}

pub fn create_pass(
    quad_pipeline: PipelineId,
    quad_set: DescriptorSetId,
    ui_pipeline: PipelineId,
    ui: SharedUiRenderer,
) -> SwapchainPass {
    SwapchainPass::new("Swapchain Pass", [0.0, 0.0, 0.0, 1.0], move |ctx| {
        ctx.set_viewport_and_scissor(Viewport::from_extent(ctx.extent));
        ctx.bind_pipeline(quad_pipeline);
        ctx.bind_descriptor_sets(quad_pipeline, 0, &[quad_set]);
        ctx.backend.draw(0..3, 0..1);

        if let Some(renderer) = ui.lock().as_mut() {
            ctx.bind_pipeline(ui_pipeline);
            let push = UiPushConstants::for_extent(ctx.extent);
            ctx.push_constants(ui_pipeline, ShaderStageFlags::VERTEX, 0, &push);
            renderer.record(ctx, ui_pipeline);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_push_maps_corners_to_clip() {
        let push = UiPushConstants::for_extent(Extent2D::new(800, 600));
        let top_left = Vec2::ZERO * push.scale + push.translate;
        let bottom_right = Vec2::new(800.0, 600.0) * push.scale + push.translate;
        assert_eq!(top_left, Vec2::new(-1.0, -1.0));
        assert!((bottom_right - Vec2::ONE).length() < 1e-6);
    }

    #[test]
    fn test_quad_pipeline_has_no_vertex_input() {
        let desc = quad_pipeline_description(RenderPassHandle(7));
        assert!(desc.vertex_layout.is_none());
        assert_eq!(desc.render_pass, Some(RenderPassHandle(7)));
        assert!(ui_pipeline_description(RenderPassHandle(7)).blend.is_some());
    }
}
