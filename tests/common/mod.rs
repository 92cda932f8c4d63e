//! Shared fixtures for the renderer integration tests.
//!
//! Every test drives a full [`Renderer`] over the recording
//! [`HeadlessBackend`], with the embedded shaders validated by the
//! headless compiler and no panorama on disk.

use std::path::PathBuf;
use std::sync::Arc;

use glam::{Quat, Vec3};
use tiled_renderer::backend::{Extent2D, HeadlessBackend};
use tiled_renderer::pipeline::shader::HeadlessCompiler;
use tiled_renderer::scene::{Camera, Light, LightComponent, Transform};
use tiled_renderer::{Renderer, RendererDesc};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn renderer_desc(extent: Extent2D) -> RendererDesc {
    RendererDesc {
        extent,
        config_path: None,
        resources_path: PathBuf::from("nonexistent"),
        shader_dir: None,
        compiler: Arc::new(HeadlessCompiler),
    }
}

/// A renderer over a fresh headless backend, camera looking at the origin
pub fn headless_renderer(width: u32, height: u32) -> Renderer<HeadlessBackend> {
    init_logging();
    let extent = Extent2D::new(width, height);
    let mut renderer = Renderer::init(HeadlessBackend::new(extent), renderer_desc(extent))
        .expect("headless renderer should initialize");
    renderer.set_camera(Camera::new(Vec3::new(0.0, 3.0, 8.0), Vec3::ZERO));
    renderer
}

/// A sun tilted towards the scene
#[allow(dead_code)]
pub fn sun() -> Light {
    let transform = Transform::from_position_rotation(
        Vec3::ZERO,
        Quat::from_euler(glam::EulerRot::XYZ, -0.8, 0.3, 0.0),
    );
    Light::new(
        LightComponent::directional(Vec3::new(1.0, 0.9, 0.8), 2.5),
        transform.matrix(),
    )
}

#[allow(dead_code)]
pub fn point_light(position: Vec3) -> Light {
    Light::new(
        LightComponent::point(Vec3::ONE, 10.0, 5.0),
        Transform::from_position(position).matrix(),
    )
}
