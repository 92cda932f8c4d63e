//! GPU-side uniform and storage layouts
//!
//! All structs are `#[repr(C)]` and padded to std140 so they can be written
//! with `bytemuck::bytes_of`.

use crate::config::RendererConfig;
use crate::pipeline::shadow::SHADOW_MAP_CASCADE_COUNT;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec3, Vec4};

/// Camera matrices shared by the vertex stages and the compute passes
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct UboVs {
    /// Y-flipped projection
    pub projection: Mat4,
    pub view: Mat4,
    pub cam_pos: Vec4,
}

impl Default for UboVs {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            cam_pos: Vec4::ZERO,
        }
    }
}

/// Parameters of the PBR pass and the tiled light culling passes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PbrPassParams {
    pub num_threads: UVec2,
    pub num_thread_groups: UVec2,
    pub screen_dimensions: UVec2,
    pub num_lights: u32,
    /// Mip bias applied when sampling the prefiltered sky light
    pub lod_bias: f32,
    /// Nonzero when the PBR pass reads the per-tile light lists
    pub tiled_lighting: u32,
    pub _padding: [u32; 3],
}

/// Cascade matrices and view-space split depths of the shadowing sun
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DirectShadowUb {
    pub cascade_view_proj: [Mat4; SHADOW_MAP_CASCADE_COUNT],
    pub cascade_splits: [f32; SHADOW_MAP_CASCADE_COUNT],
    /// xyz direction the sun shines along, w intensity; zero until a directional light is submitted
    pub light_direction: Vec4,
    pub light_color: Vec4,
}

impl Default for DirectShadowUb {
    fn default() -> Self {
        Self {
            cascade_view_proj: [Mat4::IDENTITY; SHADOW_MAP_CASCADE_COUNT],
            cascade_splits: [0.0; SHADOW_MAP_CASCADE_COUNT],
            light_direction: Vec4::ZERO,
            light_color: Vec4::ZERO,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SsaoParams {
    pub radius: f32,
    pub bias: f32,
    pub _padding: [f32; 2],
}

impl SsaoParams {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            radius: config.ssao.radius,
            bias: 0.025,
            _padding: [0.0; 2],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SsrParams {
    pub samples: i32,
    pub max_distance: f32,
    pub _padding: [f32; 2],
}

impl SsrParams {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            samples: config.ssr.samples,
            max_distance: config.ssr.max_distance,
            _padding: [0.0; 2],
        }
    }
}

/// Tonemapping and effect toggles read by the composite and post-process passes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PostProcessParams {
    pub tonemapper: i32,
    pub exposure: f32,
    pub gamma: f32,
    pub enable_ssao: i32,
    pub enable_bloom: i32,
    pub enable_ssr: i32,
    pub _padding: [i32; 2],
}

impl PostProcessParams {
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            tonemapper: config.color.tonemapper.index(),
            exposure: config.color.exposure,
            gamma: config.color.gamma,
            enable_ssao: config.ssao.enabled as i32,
            enable_bloom: config.bloom.enabled as i32,
            enable_ssr: config.ssr.enabled as i32,
            _padding: [0; 2],
        }
    }
}

/// Mean distance from the earth to the sun in meters
pub const SUN_DISTANCE: f32 = 149_600_000e3;

/// Sky cubemap parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AtmosphereParams {
    /// Inverse view of each cube face, in +X, -X, +Y, -Y, +Z, -Z order
    pub inv_views: [Mat4; 6],
    pub inv_projection: Mat4,
    pub light_pos: Vec4,
}

impl Default for AtmosphereParams {
    fn default() -> Self {
        Self {
            inv_views: cube_face_inverse_views(),
            inv_projection: Mat4::IDENTITY,
            light_pos: Vec4::ZERO,
        }
    }
}

impl AtmosphereParams {
    pub fn new(inv_projection: Mat4, time: f32) -> Self {
        Self {
            inv_views: cube_face_inverse_views(),
            inv_projection,
            light_pos: sun_position(time).extend(0.0),
        }
    }
}

/// Sun position for a time of day in `[0, 1)`, one full turn per unit
pub fn sun_position(time: f32) -> Vec3 {
    let angle = (time * 360.0).to_radians();
    Vec3::new(0.0, angle.sin(), angle.cos()) * SUN_DISTANCE
}

/// Inverse views looking down each cube face from the origin
pub fn cube_face_inverse_views() -> [Mat4; 6] {
    const FACES: [(Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::NEG_Y),
        (Vec3::NEG_X, Vec3::NEG_Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_Y),
        (Vec3::NEG_Z, Vec3::NEG_Y),
    ];
    FACES.map(|(forward, up)| Mat4::look_to_rh(Vec3::ZERO, forward, up).inverse())
}

/// Packed light as read by the culling and PBR shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LightingData {
    /// xyz world position, w intensity
    pub position_intensity: Vec4,
    /// rgb color, w range
    pub color_range: Vec4,
    /// xyz euler rotation, w unused
    pub rotation: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layouts_are_std140_sized() {
        assert_eq!(std::mem::size_of::<UboVs>(), 144);
        assert_eq!(std::mem::size_of::<PbrPassParams>(), 48);
        assert_eq!(std::mem::size_of::<DirectShadowUb>(), 304);
        assert_eq!(std::mem::size_of::<PostProcessParams>(), 32);
        assert_eq!(std::mem::size_of::<AtmosphereParams>(), 464);
        assert_eq!(std::mem::size_of::<LightingData>(), 48);
    }

    #[test]
    fn test_sun_rises_at_quarter_day() {
        let noon = sun_position(0.25);
        assert!((noon.y - SUN_DISTANCE).abs() / SUN_DISTANCE < 1e-5);
        assert!(noon.z.abs() / SUN_DISTANCE < 1e-5);
        let midnight = sun_position(0.0);
        assert!((midnight.z - SUN_DISTANCE).abs() / SUN_DISTANCE < 1e-5);
    }

    #[test]
    fn test_cube_faces_look_down_their_axis() {
        let views = cube_face_inverse_views();
        let forward = |m: &Mat4| m.transform_vector3(Vec3::NEG_Z);
        assert!(forward(&views[0]).abs_diff_eq(Vec3::X, 1e-6));
        assert!(forward(&views[3]).abs_diff_eq(Vec3::NEG_Y, 1e-6));
        assert!(forward(&views[5]).abs_diff_eq(Vec3::NEG_Z, 1e-6));
    }

    #[test]
    fn test_post_process_toggles_follow_config() {
        let mut config = RendererConfig::default();
        config.ssao.enabled = false;
        let params = PostProcessParams::from_config(&config);
        assert_eq!(params.enable_ssao, 0);
        assert_eq!(params.enable_bloom, 1);
        assert_eq!(params.gamma, 2.2);
    }
}
