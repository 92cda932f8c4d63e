//! Graphics backend abstraction layer
//!
//! The renderer talks to the device through the low-level [`GraphicsBackend`]
//! trait. Two implementations are provided:
//! - **Vulkan**: ash + gpu-allocator, presenting to a winit window (native only)
//! - **Headless**: records commands in host memory, used by tests and offline runs

pub mod headless;
pub mod traits;
pub mod types;

#[cfg(not(target_arch = "wasm32"))]
pub mod vulkan;

pub use headless::HeadlessBackend;
pub use traits::*;
pub use types::*;
