//! Light types for the scene

use crate::pipeline::light_culling::MAX_NUM_LIGHTS;
use crate::pipeline::uniforms::LightingData;
use crate::resources::ImageId;
use crate::scene::Transform;
use bevy_ecs::prelude::*;
use glam::{EulerRot, Mat4, Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightType {
    /// Lights along the transform's +Z, like the sun
    #[default]
    Directional,
    Point,
    Spot,
}

/// Light component
/// Position and orientation come from the Transform component on the same entity
#[derive(Component, Debug, Clone, Copy)]
pub struct LightComponent {
    pub light_type: LightType,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
}

impl Default for LightComponent {
    fn default() -> Self {
        Self {
            light_type: LightType::Directional,
            color: Vec3::ONE,
            intensity: 1.0,
            range: 10.0,
        }
    }
}

impl LightComponent {
    pub fn point(color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            light_type: LightType::Point,
            color,
            intensity,
            range,
        }
    }

    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            color,
            intensity,
            ..Default::default()
        }
    }
}

/// A light as submitted to the renderer for one frame
#[derive(Debug, Clone, Copy)]
pub struct Light {
    pub component: LightComponent,
    /// World transform of the light
    pub transform: Mat4,
}

impl Light {
    pub fn new(component: LightComponent, transform: Mat4) -> Self {
        Self { component, transform }
    }

    pub fn light_type(&self) -> LightType {
        self.component.light_type
    }

    pub fn position(&self) -> Vec3 {
        self.transform.w_axis.truncate()
    }

    /// Normalized direction the light's +Z axis points to in world space
    pub fn direction(&self) -> Vec3 {
        (self.transform * Vec4::new(0.0, 0.0, 1.0, 0.0))
            .truncate()
            .normalize_or_zero()
    }

    /// Pack as `{position, intensity}, {color, range}, {rotation, 1}`
    pub fn to_lighting_data(&self) -> LightingData {
        let (_, rotation, _) = self.transform.to_scale_rotation_translation();
        let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
        LightingData {
            position_intensity: self.position().extend(self.component.intensity),
            color_range: self.component.color.extend(self.component.range),
            rotation: Vec4::new(x, y, z, 1.0),
        }
    }
}

/// Image based lighting source
#[derive(Component, Debug, Clone, Copy, PartialEq, Default)]
pub struct SkyLight {
    /// Environment cubemap; `None` keeps the one loaded at init
    pub cubemap: Option<ImageId>,
    /// Mip bias applied when sampling the prefiltered map
    pub lod_bias: f32,
}

/// Gather every light entity of `world`
pub fn collect_lights(world: &mut World) -> Vec<Light> {
    let mut query = world.query::<(&LightComponent, &Transform)>();
    query
        .iter(world)
        .map(|(light, transform)| Light::new(*light, transform.matrix()))
        .collect()
}

/// First directional light, which drives the shadow cascades
pub fn first_directional(lights: &[Light]) -> Option<&Light> {
    lights
        .iter()
        .find(|light| light.light_type() == LightType::Directional)
}

/// Pack the point lights for the light buffer, at most [`MAX_NUM_LIGHTS`]
pub fn pack_point_lights(lights: &[Light]) -> Vec<LightingData> {
    let packed: Vec<LightingData> = lights
        .iter()
        .filter(|light| light.light_type() == LightType::Point)
        .map(Light::to_lighting_data)
        .collect();
    if packed.len() > MAX_NUM_LIGHTS as usize {
        log::warn!(
            "{} point lights submitted, only the first {} are shaded",
            packed.len(),
            MAX_NUM_LIGHTS
        );
        return packed[..MAX_NUM_LIGHTS as usize].to_vec();
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_point_light_packing() {
        let light = Light::new(
            LightComponent::point(Vec3::new(1.0, 0.5, 0.25), 4.0, 12.0),
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
        );
        let data = light.to_lighting_data();
        assert_eq!(data.position_intensity, Vec4::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(data.color_range, Vec4::new(1.0, 0.5, 0.25, 12.0));
        assert_eq!(data.rotation.w, 1.0);
    }

    #[test]
    fn test_only_point_lights_are_packed() {
        let lights = vec![
            Light::new(LightComponent::directional(Vec3::ONE, 1.0), Mat4::IDENTITY),
            Light::new(LightComponent::point(Vec3::ONE, 1.0, 5.0), Mat4::IDENTITY),
        ];
        assert_eq!(pack_point_lights(&lights).len(), 1);
        assert_eq!(first_directional(&lights).map(|l| l.light_type()), Some(LightType::Directional));
    }

    #[test]
    fn test_packing_is_clamped() {
        let lights = vec![
            Light::new(LightComponent::point(Vec3::ONE, 1.0, 1.0), Mat4::IDENTITY);
            MAX_NUM_LIGHTS as usize + 5
        ];
        assert_eq!(pack_point_lights(&lights).len(), MAX_NUM_LIGHTS as usize);
    }

    #[test]
    fn test_direction_follows_rotation() {
        let rotation = Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2);
        let light = Light::new(
            LightComponent::directional(Vec3::ONE, 1.0),
            Mat4::from_quat(rotation),
        );
        assert!(light.direction().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn test_collect_lights_from_world() {
        let mut world = World::new();
        world.spawn((
            LightComponent::point(Vec3::ONE, 2.0, 8.0),
            Transform::from_position(Vec3::new(0.0, 5.0, 0.0)),
        ));
        world.spawn(Transform::default());
        let lights = collect_lights(&mut world);
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].position(), Vec3::new(0.0, 5.0, 0.0));
    }
}
