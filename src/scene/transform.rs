//! Placement of scene entities
//!
//! Lights are oriented by their local +Z axis: a directional light shines
//! along it, and [`Light::direction`](crate::scene::Light::direction) reads it
//! back from the matrix built here.

use bevy_ecs::prelude::*;
use glam::{Mat4, Quat, Vec3};

#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Place at `position` with the local +Z axis turned onto `direction`
    ///
    /// A zero direction keeps the identity rotation.
    pub fn aimed_along(position: Vec3, direction: Vec3) -> Self {
        let rotation = direction
            .try_normalize()
            .map_or(Quat::IDENTITY, |dir| Quat::from_rotation_arc(Vec3::Z, dir));
        Self::from_position_rotation(position, rotation)
    }

    /// World matrix: scale, then rotation, then translation
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// World-space direction of the local +Z axis
    pub fn light_axis(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Light, LightComponent};

    #[test]
    fn test_matrix_applies_scale_then_rotation_then_translation() {
        let transform = Transform {
            position: Vec3::new(1.0, 0.0, 0.0),
            rotation: Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            scale: Vec3::splat(2.0),
        };
        let p = transform.matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(1.0, 0.0, -2.0), 1e-5));
    }

    #[test]
    fn test_aimed_light_shines_along_direction() {
        let down = Vec3::new(0.3, -1.0, 0.2).normalize();
        let transform = Transform::aimed_along(Vec3::new(0.0, 10.0, 0.0), down);
        assert!(transform.light_axis().abs_diff_eq(down, 1e-5));

        let sun = Light::new(LightComponent::directional(Vec3::ONE, 1.0), transform.matrix());
        assert!(sun.direction().abs_diff_eq(down, 1e-5));
        assert!(sun.position().abs_diff_eq(Vec3::new(0.0, 10.0, 0.0), 1e-5));
    }

    #[test]
    fn test_aimed_along_zero_keeps_identity() {
        let transform = Transform::aimed_along(Vec3::ONE, Vec3::ZERO);
        assert_eq!(transform.rotation, Quat::IDENTITY);
    }
}
