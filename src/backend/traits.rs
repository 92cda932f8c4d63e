//! Core backend abstraction traits
//!
//! The renderer records every pass through [`GraphicsBackend`]. Both the Vulkan
//! backend and the headless recording backend implement it.

use crate::backend::types::*;
use std::ops::Range;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create image: {0}")]
    ImageCreationFailed(String),
    #[error("Failed to create descriptor: {0}")]
    DescriptorCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Command recording failed: {0}")]
    CommandRecordingFailed(String),
    #[error("Queue submission failed: {0}")]
    SubmitFailed(String),
    #[error("Write of {len} bytes at offset {offset} exceeds buffer '{label}' of {size} bytes")]
    BufferWriteOutOfRange {
        label: String,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("Unknown {0} handle")]
    InvalidHandle(&'static str),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(pub(crate) u64);

/// Handle to an image view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageViewHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetLayoutHandle(pub(crate) u64);

/// Handle to a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorSetHandle(pub(crate) u64);

/// Handle to a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderPassHandle(pub(crate) u64);

/// Handle to a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a graphics or compute pipeline (and its layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub(crate) u64);

/// Handle to a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandBufferHandle(pub(crate) u64);

/// Low-level graphics backend
///
/// Recording calls target the command buffer opened by the last
/// [`GraphicsBackend::begin_command_buffer`].
pub trait GraphicsBackend {
    // Device and swapchain

    fn limits(&self) -> DeviceLimits;
    fn surface_extent(&self) -> Extent2D;
    fn swapchain_format(&self) -> TextureFormat;
    fn frames_in_flight(&self) -> u32;
    fn set_vsync(&mut self, vsync: bool);
    fn wait_idle(&mut self) -> BackendResult<()>;
    /// Wait for the next frame slot and acquire a swapchain image
    fn acquire_frame(&mut self) -> BackendResult<AcquireResult>;
    /// Recreate the swapchain for the given extent, returning the actual extent
    fn recreate_swapchain(&mut self, extent: Extent2D) -> BackendResult<Extent2D>;
    /// Present the acquired image; `Ok(false)` means the swapchain is out of date
    fn present(&mut self) -> BackendResult<bool>;

    // Resources

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_image(&mut self, info: &ImageCreateInfo) -> BackendResult<ImageHandle>;
    fn create_image_view(
        &mut self,
        image: ImageHandle,
        desc: &ImageViewDescriptor,
    ) -> BackendResult<ImageViewHandle>;
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;
    /// Upload tightly packed texel data into mip 0 of `layer`
    fn write_image(
        &mut self,
        image: ImageHandle,
        layer: u32,
        data: &[u8],
        extent: Extent2D,
    ) -> BackendResult<()>;
    /// Run a one-time layout transition on a disposable command buffer
    fn transition_image_layout(
        &mut self,
        image: ImageHandle,
        transition: &ImageTransition,
    ) -> BackendResult<()>;
    fn destroy_image_view(&mut self, view: ImageViewHandle);
    fn destroy_sampler(&mut self, sampler: SamplerHandle);
    fn destroy_image(&mut self, image: ImageHandle);

    fn create_descriptor_set_layout(
        &mut self,
        entries: &[DescriptorSetLayoutEntry],
    ) -> BackendResult<DescriptorSetLayoutHandle>;
    fn allocate_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;
    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    fn create_render_pass(&mut self, layout: &RenderPassLayout) -> BackendResult<RenderPassHandle>;
    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2D,
    ) -> BackendResult<FramebufferHandle>;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// Render pass compatible with the swapchain images
    fn swapchain_render_pass(&self) -> RenderPassHandle;

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle>;

    fn create_command_buffer(&mut self, queue: QueueType) -> BackendResult<CommandBufferHandle>;

    // Recording

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()>;
    fn end_command_buffer(&mut self) -> BackendResult<()>;
    fn begin_debug_label(&mut self, name: &str);
    fn end_debug_label(&mut self);
    fn begin_render_pass(&mut self, begin: &RenderPassBegin);
    /// Begin the render pass targeting the acquired swapchain image
    fn begin_swapchain_render_pass(&mut self, clear: [f32; 4]);
    fn end_render_pass(&mut self);
    fn bind_pipeline(&mut self, pipeline: PipelineHandle);
    fn bind_descriptor_sets(
        &mut self,
        pipeline: PipelineHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    );
    fn push_constants(
        &mut self,
        pipeline: PipelineHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_scissor(&mut self, rect: Rect2D);
    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);
    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);
    fn dispatch(&mut self, x: u32, y: u32, z: u32);
    fn pipeline_barrier(&mut self, barrier: &PipelineBarrier);

    // Submission

    fn submit(&mut self, queue: QueueType, command_buffer: CommandBufferHandle) -> BackendResult<()>;
    /// Submit the command buffer that writes the swapchain image; waits on image
    /// acquisition and signals presentation
    fn submit_frame(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()>;
}
