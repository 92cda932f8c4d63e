//! Common types shared between backends

use crate::backend::traits::*;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};
use std::sync::Arc;

macro_rules! flag_ops {
    ($name:ident) => {
        impl $name {
            pub const fn empty() -> Self {
                Self(0)
            }

            pub fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn intersects(&self, other: Self) -> bool {
                (self.0 & other.0) != 0
            }

            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }

            pub fn bits(&self) -> u32 {
                self.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self::Output {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

/// Two-dimensional extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Divide both dimensions, never going below one pixel
    pub fn scaled_down(&self, divisor: u32) -> Self {
        let divisor = divisor.max(1);
        Self {
            width: (self.width / divisor).max(1),
            height: (self.height / divisor).max(1),
        }
    }
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
    R32Float,
    Rg32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const STORAGE_BINDING: Self = Self(1 << 3);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);
    pub const INPUT_ATTACHMENT: Self = Self(1 << 5);
}

flag_ops!(TextureUsage);

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const MAP_READ: Self = Self(1 << 0);
    pub const MAP_WRITE: Self = Self(1 << 1);
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const INDEX: Self = Self(1 << 4);
    pub const VERTEX: Self = Self(1 << 5);
    pub const UNIFORM: Self = Self(1 << 6);
    pub const STORAGE: Self = Self(1 << 7);
    pub const INDIRECT: Self = Self(1 << 8);
}

flag_ops!(BufferUsage);

/// Shader stage visibility flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const COMPUTE: Self = Self(1 << 2);
    pub const VERTEX_FRAGMENT: Self = Self((1 << 0) | (1 << 1));
    pub const ALL: Self = Self((1 << 0) | (1 << 1) | (1 << 2));
}

flag_ops!(ShaderStageFlags);

/// Pipeline stages used as barrier scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineStages(u32);

impl PipelineStages {
    pub const TOP_OF_PIPE: Self = Self(1 << 0);
    pub const VERTEX_SHADER: Self = Self(1 << 1);
    pub const FRAGMENT_SHADER: Self = Self(1 << 2);
    pub const EARLY_FRAGMENT_TESTS: Self = Self(1 << 3);
    pub const LATE_FRAGMENT_TESTS: Self = Self(1 << 4);
    pub const COLOR_ATTACHMENT_OUTPUT: Self = Self(1 << 5);
    pub const COMPUTE_SHADER: Self = Self(1 << 6);
    pub const TRANSFER: Self = Self(1 << 7);
    pub const BOTTOM_OF_PIPE: Self = Self(1 << 8);
}

flag_ops!(PipelineStages);

/// Memory access kinds used by barriers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessFlags(u32);

impl AccessFlags {
    pub const SHADER_READ: Self = Self(1 << 0);
    pub const SHADER_WRITE: Self = Self(1 << 1);
    pub const COLOR_ATTACHMENT_WRITE: Self = Self(1 << 2);
    pub const DEPTH_STENCIL_ATTACHMENT_WRITE: Self = Self(1 << 3);
    pub const TRANSFER_READ: Self = Self(1 << 4);
    pub const TRANSFER_WRITE: Self = Self(1 << 5);
    pub const HOST_WRITE: Self = Self(1 << 6);
}

flag_ops!(AccessFlags);

/// Image layouts the renderer transitions between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

/// Dimensionality of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageType {
    #[default]
    D2,
    D2Array,
    Cube,
}

/// Image creation parameters consumed by the backend
#[derive(Debug, Clone)]
pub struct ImageCreateInfo {
    pub label: String,
    pub extent: Extent2D,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub image_type: ImageType,
    pub mip_levels: u32,
    pub array_layers: u32,
}

/// Subresource selection for an image view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewDescriptor {
    pub view_type: ImageType,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

/// One-time layout transition for a whole image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub mip_levels: u32,
    pub array_layers: u32,
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    ClampToBorder,
    Repeat,
    MirrorRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

/// Sampler descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDescriptor {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub address_mode: AddressMode,
    pub border_color: BorderColor,
    pub compare: Option<CompareFunction>,
    pub max_lod: f32,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
            border_color: BorderColor::OpaqueBlack,
            compare: None,
            max_lod: 1000.0,
        }
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 | VertexFormat::Unorm8x4 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout
#[derive(Debug, Clone)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

/// Standard vertex with position, normal, UV, and tangent
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x3,
                    offset: 12,
                },
                VertexAttribute {
                    location: 2,
                    format: VertexFormat::Float32x2,
                    offset: 24,
                },
                VertexAttribute {
                    location: 3,
                    format: VertexFormat::Float32x4,
                    offset: 32,
                },
            ],
        }
    }
}

/// Vertex layout of UI draw data: position, uv, packed color
pub fn ui_vertex_layout() -> VertexBufferLayout {
    VertexBufferLayout {
        array_stride: 20,
        attributes: vec![
            VertexAttribute {
                location: 0,
                format: VertexFormat::Float32x2,
                offset: 0,
            },
            VertexAttribute {
                location: 1,
                format: VertexFormat::Float32x2,
                offset: 8,
            },
            VertexAttribute {
                location: 2,
                format: VertexFormat::Unorm8x4,
                offset: 16,
            },
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    Ccw,
    Cw,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Compare function for depth/stencil
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Blend component state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

/// Blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub fn alpha_blending() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepthStencilState {
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

impl DepthStencilState {
    pub fn disabled() -> Self {
        Self {
            depth_test_enabled: false,
            depth_write_enabled: false,
            depth_compare: CompareFunction::Always,
        }
    }
}

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn flags(&self) -> ShaderStageFlags {
        match self {
            ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => ShaderStageFlags::COMPUTE,
        }
    }
}

/// SPIR-V code for a single shader stage
#[derive(Debug, Clone)]
pub struct ShaderModuleCode {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub spirv: Arc<Vec<u32>>,
}

/// Kind of descriptor bound at a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    StorageImage,
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutEntry {
    pub binding: u32,
    pub count: u32,
    pub ty: DescriptorType,
    pub visibility: ShaderStageFlags,
}

/// Resolved image descriptor: view, optional sampler and the layout it is read in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDescriptorInfo {
    pub view: ImageViewHandle,
    pub sampler: Option<SamplerHandle>,
    pub layout: ImageLayout,
}

/// Resolved contents of one descriptor write
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    Images(Vec<ImageDescriptorInfo>),
}

/// Write submitted to the device for a single binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub ty: DescriptorType,
    pub resource: DescriptorResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Clear,
    Load,
    DontCare,
}

/// Attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDescription {
    pub format: TextureFormat,
    pub load_op: LoadOp,
    pub final_layout: ImageLayout,
}

/// Attachments of a single-subpass render pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassLayout {
    pub label: String,
    pub color_attachments: Vec<AttachmentDescription>,
    pub depth_attachment: Option<AttachmentDescription>,
}

/// Push constant range of a pipeline layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    pub stages: ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// Graphics pipeline descriptor
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub label: String,
    pub stages: Vec<ShaderModuleCode>,
    pub vertex_layout: Option<VertexBufferLayout>,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    pub render_pass: RenderPassHandle,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_stencil: DepthStencilState,
    pub blend: Vec<Option<BlendState>>,
    pub depth_clamp: bool,
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: String,
    pub stage: ShaderModuleCode,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

/// Clear value for an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_extent(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Negative-height viewport that flips Y
    pub fn flipped(extent: Extent2D) -> Self {
        Self {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub extent: Extent2D,
}

impl Rect2D {
    pub fn from_extent(extent: Extent2D) -> Self {
        Self { x: 0, y: 0, extent }
    }
}

/// Begin info for a render pass instance
#[derive(Debug, Clone)]
pub struct RenderPassBegin {
    pub render_pass: RenderPassHandle,
    pub framebuffer: FramebufferHandle,
    pub render_area: Rect2D,
    pub clear_values: Vec<ClearValue>,
}

/// Queue a command buffer is submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
}

/// Memory barrier on a buffer range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub offset: u64,
    pub size: u64,
}

/// Memory barrier and layout transition on an image subresource range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub depth: bool,
}

/// Pipeline barrier recorded into a command buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineBarrier {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub by_region: bool,
    pub buffers: Vec<BufferBarrier>,
    pub images: Vec<ImageBarrier>,
}

/// Device limits relevant to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_image_dimension_2d: u32,
    pub max_compute_work_group_count: [u32; 3],
    pub max_push_constants_size: u32,
    pub max_bound_descriptor_sets: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_image_dimension_2d: 16384,
            max_compute_work_group_count: [65535; 3],
            max_push_constants_size: 128,
            max_bound_descriptor_sets: 8,
        }
    }
}

/// Outcome of acquiring the next swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired { frame_index: u32 },
    NeedsResize,
}
