//! Combines the scene with the screen-space effects before tonemapping

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{group_count, layout_entry, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{DescriptorSetId, ImageId, PipelineId};
use std::path::Path;

pub const COMPOSITE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

pub const COMPOSITE_SHADER: &str = r#"
struct PostProcessParams {
    tonemapper: i32,
    exposure: f32,
    gamma: f32,
    enable_ssao: i32,
    enable_bloom: i32,
    enable_ssr: i32,
}

@group(0) @binding(0) var output: texture_storage_2d<rgba16float, write>;
@group(0) @binding(1) var scene: texture_2d<f32>;
@group(0) @binding(1) var scene_sampler: sampler;
@group(0) @binding(2) var ssao: texture_2d<f32>;
@group(0) @binding(2) var ssao_sampler: sampler;
@group(0) @binding(3) var bloom: texture_2d<f32>;
@group(0) @binding(3) var bloom_sampler: sampler;
@group(0) @binding(4) var ssr: texture_2d<f32>;
@group(0) @binding(4) var ssr_sampler: sampler;
@group(0) @binding(5) var<uniform> params: PostProcessParams;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(output);
    if (id.x >= dims.x || id.y >= dims.y) {
        return;
    }
    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(dims);
    var color = textureSampleLevel(scene, scene_sampler, uv, 0.0).rgb;
    if (params.enable_ssr != 0) {
        let reflection = textureSampleLevel(ssr, ssr_sampler, uv, 0.0);
        color = mix(color, reflection.rgb, reflection.a * 0.5);
    }
    if (params.enable_ssao != 0) {
        color *= textureSampleLevel(ssao, ssao_sampler, uv, 0.0).r;
    }
    if (params.enable_bloom != 0) {
        color += textureSampleLevel(bloom, bloom_sampler, uv, 0.0).rgb;
    }
    textureStore(output, vec2<i32>(id.xy), vec4<f32>(color, 1.0));
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute(
        "composite",
        ShaderSource::with_override(COMPOSITE_SHADER, dir, "composite.wgsl"),
    )
}

pub fn pipeline_description() -> PipelineDescription {
    let compute = ShaderStageFlags::COMPUTE;
    PipelineDescription::new("Composite").with_set(vec![
        layout_entry(0, DescriptorType::StorageImage, compute),
        layout_entry(1, DescriptorType::CombinedImageSampler, compute),
        layout_entry(2, DescriptorType::CombinedImageSampler, compute),
        layout_entry(3, DescriptorType::CombinedImageSampler, compute),
        layout_entry(4, DescriptorType::CombinedImageSampler, compute),
        layout_entry(5, DescriptorType::UniformBuffer, compute),
    ])
}

/// Storage images the composite samples and the one it writes
#[derive(Clone, Debug)]
pub struct CompositeImages {
    /// Written by earlier compute passes this frame
    pub inputs: Vec<ImageId>,
    pub output: ImageId,
}

pub fn create_pass(pipeline: PipelineId, set: DescriptorSetId, images: CompositeImages) -> RenderGraphPass {
    RenderGraphPass::compute("Composite Pass", move |ctx| {
        let reads = images
            .inputs
            .iter()
            .map(|id| {
                ctx.resources.image(*id).barrier(
                    AccessFlags::SHADER_WRITE,
                    AccessFlags::SHADER_READ,
                    ImageLayout::General,
                    ImageLayout::General,
                )
            })
            .collect();
        ctx.compute_barrier(reads);

        let (x, y) = group_count(ctx.extent);
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        ctx.dispatch(x, y, 1);

        // Post process samples the result from its fragment shader
        let output = ctx.resources.image(images.output).barrier(
            AccessFlags::SHADER_WRITE,
            AccessFlags::SHADER_READ,
            ImageLayout::General,
            ImageLayout::General,
        );
        ctx.barrier(&PipelineBarrier {
            src_stages: PipelineStages::COMPUTE_SHADER,
            dst_stages: PipelineStages::FRAGMENT_SHADER,
            by_region: false,
            buffers: Vec::new(),
            images: vec![output],
        });
    })
    .with_pipeline(pipeline)
    .with_descriptor_sets(vec![set])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_bound_last() {
        let desc = pipeline_description();
        let last = desc.set_layouts[0].last().map(|entry| (entry.binding, entry.ty));
        assert_eq!(last, Some((5, DescriptorType::UniformBuffer)));
    }
}
