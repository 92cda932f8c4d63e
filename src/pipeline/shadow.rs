//! Cascaded shadow maps for the first directional light
//!
//! The camera frustum is split into [`SHADOW_MAP_CASCADE_COUNT`] slices with a
//! blend of logarithmic and uniform splits. Each slice is fitted with a
//! bounding sphere and rendered from the light into one layer of a depth array.

use crate::backend::types::*;
use crate::pipeline::shader::{ShaderCreateInfo, ShaderSource};
use crate::pipeline::uniforms::DirectShadowUb;
use crate::pipeline::{layout_entry, PipelineDescription};
use crate::render_graph::RenderGraphPass;
use crate::resources::{DescriptorSetId, FramebufferId, PipelineId};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::path::Path;

pub const SHADOW_MAP_CASCADE_COUNT: usize = 4;

/// Blend between logarithmic (1.0) and uniform (0.0) splits
pub const CASCADE_SPLIT_LAMBDA: f32 = 0.95;

pub const SHADOW_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Far end of each cascade as a fraction of the clip range
pub fn cascade_splits(near: f32, far: f32) -> [f32; SHADOW_MAP_CASCADE_COUNT] {
    let range = far - near;
    let ratio = far / near;
    std::array::from_fn(|i| {
        let p = (i + 1) as f32 / SHADOW_MAP_CASCADE_COUNT as f32;
        let log = near * ratio.powf(p);
        let uniform = near + range * p;
        let d = CASCADE_SPLIT_LAMBDA * (log - uniform) + uniform;
        (d - near) / range
    })
}

/// Fit every cascade around its slice of the camera frustum
///
/// `projection` is the unflipped camera projection. `light_transform` is the
/// world transform of the directional light, which shines along its +Z axis.
pub fn compute_cascades(view: Mat4, projection: Mat4, near: f32, far: f32, light_transform: Mat4) -> DirectShadowUb {
    let splits = cascade_splits(near, far);
    let inverse = (projection * view).inverse();
    let light_dir = (light_transform * Vec4::new(0.0, 0.0, 1.0, 0.0))
        .truncate()
        .normalize();
    let up = if light_dir.cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    };

    let mut shadow = DirectShadowUb::default();
    let mut last_split = 0.0;
    for (i, &split) in splits.iter().enumerate() {
        let mut corners = [
            Vec3::new(-1.0, 1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(-1.0, -1.0, 1.0),
        ]
        .map(|ndc| inverse.project_point3(ndc));

        for j in 0..4 {
            let edge = corners[j + 4] - corners[j];
            corners[j + 4] = corners[j] + edge * split;
            corners[j] += edge * last_split;
        }

        let center = corners.iter().copied().sum::<Vec3>() / 8.0;
        let radius = corners
            .iter()
            .map(|corner| corner.distance(center))
            .fold(0.0f32, f32::max);
        let radius = (radius * 16.0).ceil() / 16.0;

        let light_view = Mat4::look_at_rh(center - light_dir * radius, center, up);
        let light_ortho = Mat4::orthographic_rh(-radius, radius, -radius, radius, -2.0 * radius, 2.0 * radius);

        shadow.cascade_splits[i] = -(near + split * (far - near));
        shadow.cascade_view_proj[i] = light_ortho * light_view;
        last_split = split;
    }
    shadow.light_direction = light_dir.extend(0.0);
    shadow
}

/// Vertex push constant: model matrix and the cascade being rendered
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowPushConstants {
    pub model: [f32; 16],
    pub cascade_index: u32,
}

pub const SHADOW_SHADER: &str = r#"
struct DirectShadow {
    cascade_view_proj: array<mat4x4<f32>, 4>,
    cascade_splits: vec4<f32>,
    light_direction: vec4<f32>,
    light_color: vec4<f32>,
}

struct Push {
    model: mat4x4<f32>,
    cascade_index: u32,
}

@group(0) @binding(0) var<uniform> shadow: DirectShadow;
var<push_constant> push: Push;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> @builtin(position) vec4<f32> {
    let world = push.model * vec4<f32>(in.position, 1.0);
    return shadow.cascade_view_proj[push.cascade_index] * world;
}

@fragment
fn fs_main() {}
"#;

pub fn shader_info(dir: Option<&Path>) -> ShaderCreateInfo {
    ShaderCreateInfo::graphics(
        "shadow",
        ShaderSource::with_override(SHADOW_SHADER, dir, "shadow.wgsl"),
    )
}

pub fn pipeline_description() -> PipelineDescription {
    PipelineDescription::new("Shadow")
        .with_set(vec![layout_entry(
            0,
            DescriptorType::UniformBuffer,
            ShaderStageFlags::VERTEX,
        )])
        .with_push_constants(
            ShaderStageFlags::VERTEX,
            0,
            std::mem::size_of::<ShadowPushConstants>() as u32,
        )
        .with_vertex_layout(Vertex::layout())
        .with_depth(
            SHADOW_FORMAT,
            ImageLayout::ShaderReadOnly,
            DepthStencilState {
                depth_test_enabled: true,
                depth_write_enabled: true,
                depth_compare: CompareFunction::LessEqual,
            },
        )
        .with_depth_clamp()
}

/// Depth of every submitted mesh into each cascade layer
pub fn create_pass(
    pipeline: PipelineId,
    set: DescriptorSetId,
    cascades: Vec<FramebufferId>,
    size: u32,
) -> RenderGraphPass {
    RenderGraphPass::graphics("Direct Shadow Depth Pass", move |ctx| {
        ctx.set_viewport_and_scissor(Viewport::from_extent(ctx.extent));
        ctx.bind_pipeline(pipeline);
        ctx.bind_descriptor_sets(pipeline, 0, &[set]);
        let cascade_index = ctx.framebuffer_index as u32;
        for entry in &ctx.frame.meshes {
            let push = ShadowPushConstants {
                model: entry.transform.to_cols_array(),
                cascade_index,
            };
            ctx.push_constants(pipeline, ShaderStageFlags::VERTEX, 0, &push);
            ctx.draw_mesh(entry);
        }
    })
    .with_pipeline(pipeline)
    .with_framebuffers(cascades)
    .with_clear_values(vec![ClearValue::DepthStencil {
        depth: 1.0,
        stencil: 0,
    }])
    .with_render_area(Extent2D::new(size, size))
    .with_descriptor_sets(vec![set])
    .run_with_condition(|config| config.direct_shadows.enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    const NEAR: f32 = 0.1;
    const FAR: f32 = 1000.0;

    fn camera_matrices() -> (Mat4, Mat4) {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(60f32.to_radians(), 16.0 / 9.0, NEAR, FAR);
        (view, projection)
    }

    #[test]
    fn test_splits_increase_to_one() {
        let splits = cascade_splits(NEAR, FAR);
        assert!(splits[0] > 0.0);
        assert!(splits.windows(2).all(|w| w[0] < w[1]));
        assert!((splits[SHADOW_MAP_CASCADE_COUNT - 1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_split_depths_are_negative_view_space() {
        let (view, projection) = camera_matrices();
        let shadow = compute_cascades(view, projection, NEAR, FAR, Mat4::IDENTITY);
        assert!(shadow.cascade_splits.windows(2).all(|w| w[0] > w[1]));
        assert!((shadow.cascade_splits[3] + FAR).abs() < 1e-2);
    }

    #[test]
    fn test_cascade_center_maps_to_clip_center() {
        let (view, projection) = camera_matrices();
        let light = Mat4::from_quat(Quat::from_rotation_x(-0.8));
        let shadow = compute_cascades(view, projection, NEAR, FAR, light);

        // Reconstruct cascade 0's center from the camera frustum slice
        let split = cascade_splits(NEAR, FAR)[0];
        let inverse = (projection * view).inverse();
        let mut center = Vec3::ZERO;
        for (x, y) in [(-1.0, 1.0), (1.0, 1.0), (1.0, -1.0), (-1.0, -1.0)] {
            let near = inverse.project_point3(Vec3::new(x, y, 0.0));
            let far = inverse.project_point3(Vec3::new(x, y, 1.0));
            center += near + (far - near) * split;
            center += near;
        }
        center /= 8.0;

        let clip = shadow.cascade_view_proj[0].project_point3(center);
        assert!(clip.x.abs() < 1e-3 && clip.y.abs() < 1e-3);
        assert!((clip.z - 0.75).abs() < 1e-3);
    }

    /// Cascade 0 for a camera at (0, 3, 8) looking at the origin, 60 degree
    /// fov, aspect 2, clip range 0.5..50, light shining along (0, -0.8, -0.6)
    const REFERENCE_CASCADE_0: [[f32; 4]; 4] = [
        [0.3404255, 0.0, 0.0, 0.0],
        [0.0, 0.2042553, -0.0680851, 0.0],
        [0.0, -0.2723404, -0.0510638, 0.0],
        [0.0, 1.3234915, 1.2678880, 1.0],
    ];

    #[test]
    fn test_cascade_zero_matches_reference() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 3.0, 8.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(60f32.to_radians(), 2.0, 0.5, 50.0);
        let light = Mat4::from_cols(Vec4::X, Vec4::Y, Vec4::new(0.0, -0.8, -0.6, 0.0), Vec4::W);
        let shadow = compute_cascades(view, projection, 0.5, 50.0, light);

        let reference = Mat4::from_cols_array_2d(&REFERENCE_CASCADE_0);
        assert!(
            shadow.cascade_view_proj[0].abs_diff_eq(reference, 1e-4),
            "{:?}",
            shadow.cascade_view_proj[0]
        );
        assert!((shadow.cascade_splits[0] + 2.1458319).abs() < 1e-4);
    }

    #[test]
    fn test_vertical_light_uses_fallback_up() {
        let (view, projection) = camera_matrices();
        // +Z rotated onto -Y: the sun straight overhead
        let light = Mat4::from_quat(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2));
        let shadow = compute_cascades(view, projection, NEAR, FAR, light);
        assert!(shadow.cascade_view_proj.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn test_push_constants_fit_the_range() {
        assert_eq!(std::mem::size_of::<ShadowPushConstants>(), 68);
    }
}
