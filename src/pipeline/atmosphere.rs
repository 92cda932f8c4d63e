//! Procedural sky rendered into a cubemap
//!
//! Single scattering of a Rayleigh and Mie atmosphere, one dispatch covering
//! all six faces. The PBR pass samples the result as its skybox.

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::{layout_entry, PipelineDescription, COMPUTE_GROUP_SIZE};
use crate::render_graph::RenderGraphPass;
use crate::resources::{DescriptorSetId, ImageId, PipelineId};
use std::path::Path;

pub const ATMOSPHERE_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Edge of each sky cube face in texels
pub const ATMOSPHERE_CUBE_SIZE: u32 = 128;

pub const ATMOSPHERE_SHADER: &str = r#"
struct AtmosphereParams {
    inv_views: array<mat4x4<f32>, 6>,
    inv_projection: mat4x4<f32>,
    light_pos: vec4<f32>,
}

@group(0) @binding(0) var output: texture_storage_2d_array<rgba16float, write>;
@group(0) @binding(1) var<uniform> params: AtmosphereParams;

const PI: f32 = 3.14159265;
const PLANET_RADIUS: f32 = 6371e3;
const ATMOSPHERE_RADIUS: f32 = 6471e3;
const RAYLEIGH: vec3<f32> = vec3<f32>(5.5e-6, 13.0e-6, 22.4e-6);
const MIE: f32 = 21e-6;
const RAYLEIGH_HEIGHT: f32 = 8e3;
const MIE_HEIGHT: f32 = 1.2e3;
const MIE_G: f32 = 0.758;
const SUN_INTENSITY: f32 = 22.0;
const PRIMARY_STEPS: i32 = 16;
const SECONDARY_STEPS: i32 = 8;

// Distances to the near and far intersections with a sphere at the origin
fn ray_sphere(origin: vec3<f32>, dir: vec3<f32>, radius: f32) -> vec2<f32> {
    let b = dot(dir, origin);
    let c = dot(origin, origin) - radius * radius;
    let d = b * b - c;
    if (d < 0.0) {
        return vec2<f32>(1e5, -1e5);
    }
    let s = sqrt(d);
    return vec2<f32>(-b - s, -b + s);
}

fn scatter(dir: vec3<f32>, sun: vec3<f32>) -> vec3<f32> {
    let origin = vec3<f32>(0.0, PLANET_RADIUS + 1e3, 0.0);
    var hit = ray_sphere(origin, dir, ATMOSPHERE_RADIUS);
    if (hit.x > hit.y) {
        return vec3<f32>(0.0);
    }
    hit.y = min(hit.y, ray_sphere(origin, dir, PLANET_RADIUS).x);
    let step = (hit.y - max(hit.x, 0.0)) / f32(PRIMARY_STEPS);

    var rayleigh_sum = vec3<f32>(0.0);
    var mie_sum = vec3<f32>(0.0);
    var rayleigh_depth = 0.0;
    var mie_depth = 0.0;
    for (var i = 0; i < PRIMARY_STEPS; i++) {
        let p = origin + dir * (max(hit.x, 0.0) + (f32(i) + 0.5) * step);
        let height = length(p) - PLANET_RADIUS;
        let rayleigh_step = exp(-height / RAYLEIGH_HEIGHT) * step;
        let mie_step = exp(-height / MIE_HEIGHT) * step;
        rayleigh_depth += rayleigh_step;
        mie_depth += mie_step;

        let sun_step = ray_sphere(p, sun, ATMOSPHERE_RADIUS).y / f32(SECONDARY_STEPS);
        var sun_rayleigh = 0.0;
        var sun_mie = 0.0;
        for (var j = 0; j < SECONDARY_STEPS; j++) {
            let q = p + sun * (f32(j) + 0.5) * sun_step;
            let h = length(q) - PLANET_RADIUS;
            sun_rayleigh += exp(-h / RAYLEIGH_HEIGHT) * sun_step;
            sun_mie += exp(-h / MIE_HEIGHT) * sun_step;
        }
        let attenuation = exp(-(MIE * (mie_depth + sun_mie) + RAYLEIGH * (rayleigh_depth + sun_rayleigh)));
        rayleigh_sum += rayleigh_step * attenuation;
        mie_sum += mie_step * attenuation;
    }

    let mu = dot(dir, sun);
    let rayleigh_phase = 3.0 / (16.0 * PI) * (1.0 + mu * mu);
    let g2 = MIE_G * MIE_G;
    let mie_phase = 3.0 / (8.0 * PI) * ((1.0 - g2) * (mu * mu + 1.0))
        / (pow(1.0 + g2 - 2.0 * mu * MIE_G, 1.5) * (2.0 + g2));
    return SUN_INTENSITY * (rayleigh_phase * RAYLEIGH * rayleigh_sum + mie_phase * MIE * mie_sum);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let dims = textureDimensions(output);
    if (id.x >= dims.x || id.y >= dims.y || id.z >= 6u) {
        return;
    }
    let uv = (vec2<f32>(id.xy) + 0.5) / vec2<f32>(dims);
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 1.0, 1.0);
    let target_dir = params.inv_projection * ndc;
    let view_dir = normalize(target_dir.xyz / target_dir.w);
    let dir = normalize((params.inv_views[id.z] * vec4<f32>(view_dir, 0.0)).xyz);
    let sun = normalize(params.light_pos.xyz);
    textureStore(output, vec2<i32>(id.xy), i32(id.z), vec4<f32>(scatter(dir, sun), 1.0));
}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::compute(
        "atmosphere",
        ShaderSource::with_override(ATMOSPHERE_SHADER, dir, "atmosphere.wgsl"),
    )
}

pub fn pipeline_description() -> PipelineDescription {
    let compute = ShaderStageFlags::COMPUTE;
    PipelineDescription::new("Atmosphere").with_set(vec![
        layout_entry(0, DescriptorType::StorageImage, compute),
        layout_entry(1, DescriptorType::UniformBuffer, compute),
    ])
}

/// Workgroups covering every face of the sky cube
pub fn group_count() -> (u32, u32, u32) {
    let edge = ATMOSPHERE_CUBE_SIZE.div_ceil(COMPUTE_GROUP_SIZE);
    (edge, edge, 6)
}

pub fn create_pass(pipeline: PipelineId, set: DescriptorSetId, cubemap: ImageId) -> RenderGraphPass {
    RenderGraphPass::compute("Atmosphere Pass", move |ctx| {
        // Last frame's contents are discarded: the whole cube is rewritten
        let image = ctx.resources.image(cubemap).barrier(
            AccessFlags::SHADER_READ,
            AccessFlags::SHADER_WRITE,
            ImageLayout::Undefined,
            ImageLayout::General,
        );
        ctx.barrier(&PipelineBarrier {
            src_stages: PipelineStages::FRAGMENT_SHADER,
            dst_stages: PipelineStages::COMPUTE_SHADER,
            by_region: false,
            buffers: Vec::new(),
            images: vec![image],
        });
        let (x, y, z) = group_count();
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        ctx.dispatch(x, y, z);
    })
    .with_pipeline(pipeline)
    .with_descriptor_sets(vec![set])
    .run_with_condition(|config| config.atmosphere.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_covers_all_faces() {
        assert_eq!(group_count(), (16, 16, 6));
    }
}
