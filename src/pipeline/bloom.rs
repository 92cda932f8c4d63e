//! Physically based bloom
//!
//! A thresholded prefilter writes mip 0 of the downsample chain, successive
//! downsamples fill the next mips, then the upsample chain walks back up
//! accumulating a tent-filtered blur. Both chains live at half resolution.

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{group_count, layout_array, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{mip_extent, DescriptorSetId, ImageId, MipLevels, PipelineId};
use bytemuck::{Pod, Zeroable};
use std::path::Path;

pub const BLOOM_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Storage views bound for the downsample and upsample chains
pub const DOWNSAMPLE_VIEWS: u32 = 9;
pub const UPSAMPLE_VIEWS: u32 = 8;

/// Size of the push constant range; the shader reads the first 24 bytes
pub const BLOOM_PUSH_RANGE: u32 = 40;

pub const DOWNSAMPLE_MIPS: MipLevels = MipLevels::FullChain { min: 2, drop: 0 };
pub const UPSAMPLE_MIPS: MipLevels = MipLevels::FullChain { min: 2, drop: 1 };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BloomStage {
    Prefilter = 0,
    Downsample = 1,
    Upsample = 2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BloomPushConstants {
    /// threshold, clamp, top lod, unused
    pub params: [f32; 4],
    /// stage kind, lod
    pub stage: [i32; 2],
}

impl BloomPushConstants {
    pub fn new(threshold: f32, clamp: f32, lods: i32) -> Self {
        Self {
            params: [threshold, clamp, (lods - 1) as f32, 0.0],
            stage: [0, 0],
        }
    }

    pub fn with_stage(mut self, stage: BloomStage, lod: i32) -> Self {
        self.stage = [stage as i32, lod];
        self
    }
}

/// Mips of the downsample chain that take part in the blur; below 1 nothing runs
///
/// Capped by the bound storage views: downsample writes view `lod + 1`.
pub fn lod_count(downsample_mips: u32) -> i32 {
    (downsample_mips as i32 - 3).min(DOWNSAMPLE_VIEWS as i32 - 1)
}

/// One dispatch of the bloom pass, in recording order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomStep {
    Dispatch { stage: BloomStage, lod: i32, mip: u32 },
    DownsampleBarrier,
    UpsampleBarrier,
}

/// The full command schedule for a downsample chain of `downsample_mips` mips
pub fn schedule(downsample_mips: u32) -> Vec<BloomStep> {
    let lods = lod_count(downsample_mips);
    let mut steps = Vec::new();
    if lods < 1 {
        return steps;
    }
    steps.push(BloomStep::Dispatch {
        stage: BloomStage::Prefilter,
        lod: 0,
        mip: 0,
    });
    steps.push(BloomStep::DownsampleBarrier);
    for i in 1..lods {
        steps.push(BloomStep::Dispatch {
            stage: BloomStage::Downsample,
            lod: i - 1,
            mip: i as u32,
        });
        steps.push(BloomStep::DownsampleBarrier);
    }
    steps.push(BloomStep::Dispatch {
        stage: BloomStage::Upsample,
        lod: lods - 1,
        mip: (lods - 1) as u32,
    });
    for i in (0..lods - 1).rev() {
        steps.push(BloomStep::UpsampleBarrier);
        steps.push(BloomStep::Dispatch {
            stage: BloomStage::Upsample,
            lod: i,
            mip: i as u32,
        });
    }
    steps
}

pub const BLOOM_SHADER: &str = r#"
struct Push {
    params: vec4<f32>,
    stage: vec2<i32>,
}

const PREFILTER: i32 = 0;
const DOWNSAMPLE: i32 = 1;
const UPSAMPLE: i32 = 2;

// 0: scene color, 1: downsample chain, 2: upsample chain
@group(0) @binding(0) var inputs: binding_array<texture_2d<f32>, 3>;
@group(0) @binding(0) var input_samplers: binding_array<sampler, 3>;
@group(0) @binding(1) var downsample_mips: binding_array<texture_storage_2d<rgba16float, write>, 9>;
@group(0) @binding(2) var upsample_mips: binding_array<texture_storage_2d<rgba16float, write>, 8>;

var<push_constant> push: Push;

fn sample(index: u32, uv: vec2<f32>, lod: f32) -> vec3<f32> {
    return textureSampleLevel(inputs[index], input_samplers[index], uv, lod).rgb;
}

// 13-tap downsample
fn downsample(index: u32, uv: vec2<f32>, texel: vec2<f32>, lod: f32) -> vec3<f32> {
    let a = sample(index, uv + texel * vec2<f32>(-2.0, -2.0), lod);
    let b = sample(index, uv + texel * vec2<f32>(0.0, -2.0), lod);
    let c = sample(index, uv + texel * vec2<f32>(2.0, -2.0), lod);
    let d = sample(index, uv + texel * vec2<f32>(-2.0, 0.0), lod);
    let e = sample(index, uv, lod);
    let f = sample(index, uv + texel * vec2<f32>(2.0, 0.0), lod);
    let g = sample(index, uv + texel * vec2<f32>(-2.0, 2.0), lod);
    let h = sample(index, uv + texel * vec2<f32>(0.0, 2.0), lod);
    let i = sample(index, uv + texel * vec2<f32>(2.0, 2.0), lod);
    let j = sample(index, uv + texel * vec2<f32>(-1.0, -1.0), lod);
    let k = sample(index, uv + texel * vec2<f32>(1.0, -1.0), lod);
    let l = sample(index, uv + texel * vec2<f32>(-1.0, 1.0), lod);
    let m = sample(index, uv + texel * vec2<f32>(1.0, 1.0), lod);
    return e * 0.125 + (a + c + g + i) * 0.03125 + (b + d + f + h) * 0.0625 + (j + k + l + m) * 0.125;
}

// 3x3 tent upsample
fn upsample(index: u32, uv: vec2<f32>, texel: vec2<f32>, lod: f32) -> vec3<f32> {
    var result = sample(index, uv, lod) * 4.0;
    result += (sample(index, uv + vec2<f32>(-texel.x, 0.0), lod) + sample(index, uv + vec2<f32>(texel.x, 0.0), lod)
        + sample(index, uv + vec2<f32>(0.0, -texel.y), lod) + sample(index, uv + vec2<f32>(0.0, texel.y), lod)) * 2.0;
    result += sample(index, uv - texel, lod) + sample(index, uv + texel, lod)
        + sample(index, uv + vec2<f32>(texel.x, -texel.y), lod) + sample(index, uv + vec2<f32>(-texel.x, texel.y), lod);
    return result / 16.0;
}

fn quadratic_threshold(color: vec3<f32>) -> vec3<f32> {
    let threshold = push.params.x;
    let brightness = max(max(color.r, color.g), color.b);
    let contribution = max(brightness - threshold, 0.0) / max(brightness, 1e-4);
    return min(color * contribution, vec3<f32>(push.params.y));
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let kind = push.stage.x;
    let lod = push.stage.y;
    var size: vec2<u32>;
    if (kind == UPSAMPLE) {
        size = textureDimensions(upsample_mips[lod]);
    } else if (kind == DOWNSAMPLE) {
        size = textureDimensions(downsample_mips[lod + 1]);
    } else {
        size = textureDimensions(downsample_mips[0]);
    }
    if (id.x >= size.x || id.y >= size.y) {
        return;
    }
    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(size);
    let texel = 1.0 / vec2<f32>(size);

    if (kind == PREFILTER) {
        let color = quadratic_threshold(downsample(0u, uv, texel * 0.5, 0.0));
        textureStore(downsample_mips[0], id.xy, vec4<f32>(color, 1.0));
    } else if (kind == DOWNSAMPLE) {
        let color = downsample(1u, uv, texel * 0.5, f32(lod));
        textureStore(downsample_mips[lod + 1], id.xy, vec4<f32>(color, 1.0));
    } else {
        // the first upsample starts from the smallest blurred mip alone
        let top = i32(push.params.z);
        var color = sample(1u, uv, f32(lod));
        if (lod < top) {
            color += upsample(2u, uv, texel, f32(lod + 1));
        }
        textureStore(upsample_mips[lod], id.xy, vec4<f32>(color, 1.0));
    }
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute("bloom", ShaderSource::with_override(BLOOM_SHADER, dir, "bloom.wgsl"))
}

pub fn pipeline_description() -> PipelineDescription {
    let compute = ShaderStageFlags::COMPUTE;
    PipelineDescription::new("Bloom")
        .with_set(vec![
            layout_array(0, 3, DescriptorType::CombinedImageSampler, compute),
            layout_array(1, DOWNSAMPLE_VIEWS, DescriptorType::StorageImage, compute),
            layout_array(2, UPSAMPLE_VIEWS, DescriptorType::StorageImage, compute),
        ])
        .with_push_constants(compute, 0, BLOOM_PUSH_RANGE)
}

pub fn create_pass(
    pipeline: PipelineId,
    set: DescriptorSetId,
    downsample: ImageId,
    upsample: ImageId,
) -> RenderGraphPass {
    RenderGraphPass::compute("Bloom Pass", move |ctx| {
        let down = ctx.resources.image(downsample);
        let up = ctx.resources.image(upsample);
        let steps = schedule(down.mip_levels());
        if steps.is_empty() {
            return;
        }
        let lods = lod_count(down.mip_levels()) as u32;
        let down_barrier = ImageBarrier {
            mip_level_count: lods,
            ..down.barrier(
                AccessFlags::SHADER_WRITE,
                AccessFlags::SHADER_READ,
                ImageLayout::General,
                ImageLayout::General,
            )
        };
        let up_barrier = up.barrier(
            AccessFlags::SHADER_WRITE,
            AccessFlags::SHADER_READ,
            ImageLayout::General,
            ImageLayout::General,
        );
        let (down_extent, up_extent) = (down.extent(), up.extent());
        let config = &ctx.frame.config.bloom;
        let push = BloomPushConstants::new(config.threshold, config.clamp, lods as i32);

        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        for step in steps {
            match step {
                BloomStep::Dispatch { stage, lod, mip } => {
                    let extent = match stage {
                        BloomStage::Upsample => mip_extent(up_extent, mip),
                        _ => mip_extent(down_extent, mip),
                    };
                    let (x, y) = group_count(extent);
                    ctx.push_constants(pipeline, ShaderStageFlags::COMPUTE, 0, &push.with_stage(stage, lod));
                    ctx.dispatch(x, y, 1);
                }
                BloomStep::DownsampleBarrier => ctx.compute_barrier(vec![down_barrier]),
                BloomStep::UpsampleBarrier => ctx.compute_barrier(vec![up_barrier]),
            }
        }
    })
    .with_pipeline(pipeline)
    .with_descriptor_sets(vec![set])
    .run_with_condition(|config| config.bloom.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ExtentSource;
    use rstest::rstest;

    fn dispatches(steps: &[BloomStep]) -> Vec<(BloomStage, i32)> {
        steps
            .iter()
            .filter_map(|step| match step {
                BloomStep::Dispatch { stage, lod, .. } => Some((*stage, *lod)),
                _ => None,
            })
            .collect()
    }

    #[rstest]
    #[case(1, -2)]
    #[case(2, -1)]
    #[case(3, 0)]
    #[case(10, 7)]
    #[case(11, 8)]
    #[case(13, 8)]
    #[case(16, 8)]
    fn test_lod_count(#[case] mips: u32, #[case] expected: i32) {
        assert_eq!(lod_count(mips), expected);
    }

    #[test]
    fn test_too_small_chain_records_nothing() {
        // a 1x1 window gives a two-mip chain
        let mips = DOWNSAMPLE_MIPS.resolve(Extent2D::new(1, 1));
        assert!(schedule(mips).is_empty());
        assert!(schedule(3).is_empty());
    }

    #[test]
    fn test_schedule_order() {
        let steps = schedule(6);
        use BloomStage::*;
        assert_eq!(
            dispatches(&steps),
            vec![
                (Prefilter, 0),
                (Downsample, 0),
                (Downsample, 1),
                (Upsample, 2),
                (Upsample, 1),
                (Upsample, 0),
            ]
        );
        assert_eq!(steps[1], BloomStep::DownsampleBarrier);
        assert_eq!(steps[7], BloomStep::UpsampleBarrier);
        assert_eq!(steps.last(), Some(&BloomStep::Dispatch { stage: Upsample, lod: 0, mip: 0 }));
    }

    #[rstest]
    #[case(Extent2D::new(1920, 1080))]
    #[case(Extent2D::new(8192, 4320))]
    #[case(Extent2D::new(16384, 16384))]
    fn test_schedule_stays_within_bound_views(#[case] window: Extent2D) {
        let mips = DOWNSAMPLE_MIPS.resolve(ExtentSource::HALF.resolve(window));
        for (stage, lod) in dispatches(&schedule(mips)) {
            match stage {
                BloomStage::Downsample => assert!(((lod + 1) as u32) < DOWNSAMPLE_VIEWS),
                BloomStage::Upsample => assert!((lod as u32) < UPSAMPLE_VIEWS),
                BloomStage::Prefilter => assert_eq!(lod, 0),
            }
        }
    }

    #[test]
    fn test_top_lod_follows_clamped_chain() {
        let push = BloomPushConstants::new(1.0, 4.0, lod_count(13));
        assert_eq!(push.params[2], 7.0);
    }

    #[test]
    fn test_push_constants_fit_range() {
        assert_eq!(std::mem::size_of::<BloomPushConstants>(), 24);
        assert!(std::mem::size_of::<BloomPushConstants>() as u32 <= BLOOM_PUSH_RANGE);
    }
}
