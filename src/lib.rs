//! Tiled Renderer - a render graph driven PBR renderer with tiled light culling
//!
//! The frame is an ordered list of passes: depth pre-pass, tiled light
//! culling, cascaded shadows, atmosphere, PBR shading, SSAO, screen-space
//! reflections, bloom, depth of field, composite and post-process, finished by
//! a swapchain pass drawing the final image and the UI.
//!
//! Two backends implement [`backend::GraphicsBackend`]:
//! - **Vulkan**: ash + gpu-allocator, presenting to a winit window
//! - **Headless**: records commands in host memory for tests and offline runs
//!
//! # Features
//! - Passes gated by the live [`config::RendererConfig`], evaluated every frame
//! - Window-sized targets recreated on resize, with descriptor sets rewired
//! - Image based lighting built from an equirectangular panorama
//! - Lights described as Bevy ECS components

pub mod backend;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod resources;
pub mod scene;

// Re-export Bevy ECS prelude for scene setup
pub use bevy_ecs::prelude::*;

pub use config::{ConfigStore, RendererConfig};
pub use error::{RendererError, RendererResult};
pub use renderer::{Renderer, RendererDesc};
