//! Scene description consumed by the renderer
//!
//! Lights live as `bevy_ecs` components; [`collect_lights`] turns them into
//! the per-frame list handed to the renderer. Meshes and the camera are
//! submitted directly.

mod camera;
mod light;
mod transform;

pub use camera::*;
pub use light::*;
pub use transform::*;
