//! GPU pipelines and the passes built on them
//!
//! Every pass module follows the same shape: an embedded WGSL source, a
//! `shader_info` describing which stages to compile, a `pipeline_description`
//! with the layout and fixed-function state, and a `create_pass` returning the
//! [`RenderGraphPass`](crate::render_graph::RenderGraphPass) that records it.
//!
//! Frame order:
//! 1. Atmosphere (optional) - sky cubemap
//! 2. Depth pre-pass - depth + view-space normals
//! 3. Frustum grid / light list (dormant) - tiled light culling
//! 4. Shadow cascades - one depth layer per cascade
//! 5. SSAO + blur
//! 6. PBR - skybox, meshes, quads
//! 7. SSR, bloom, depth of field
//! 8. Composite, post-process
//! 9. Swapchain - final image + UI

pub mod atmosphere;
pub mod bloom;
pub mod composite;
pub mod depth_prepass;
pub mod dof;
pub mod light_culling;
pub mod pbr;
pub mod post_process;
pub mod shader;
pub mod shadow;
pub mod ssao;
pub mod ssr;
pub mod swapchain;
pub mod uniforms;

use crate::backend::traits::*;
use crate::backend::types::*;
use shader::Shader;

/// Whether a pipeline rasterizes or dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// Workgroup edge shared by the screen-space compute shaders
pub const COMPUTE_GROUP_SIZE: u32 = 8;

/// Workgroups covering `extent` with square groups of [`COMPUTE_GROUP_SIZE`]
pub fn group_count(extent: Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(COMPUTE_GROUP_SIZE),
        extent.height.div_ceil(COMPUTE_GROUP_SIZE),
    )
}

/// Shorthand for a single-descriptor layout entry
pub fn layout_entry(
    binding: u32,
    ty: DescriptorType,
    visibility: ShaderStageFlags,
) -> DescriptorSetLayoutEntry {
    DescriptorSetLayoutEntry {
        binding,
        count: 1,
        ty,
        visibility,
    }
}

/// Layout entry holding an array of `count` descriptors
pub fn layout_array(
    binding: u32,
    count: u32,
    ty: DescriptorType,
    visibility: ShaderStageFlags,
) -> DescriptorSetLayoutEntry {
    DescriptorSetLayoutEntry {
        binding,
        count,
        ty,
        visibility,
    }
}

/// Everything needed to build a pipeline besides its shader
#[derive(Debug, Clone)]
pub struct PipelineDescription {
    pub name: String,
    /// One entry list per descriptor set, in set order
    pub set_layouts: Vec<Vec<DescriptorSetLayoutEntry>>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    pub vertex_layout: Option<VertexBufferLayout>,
    pub color_attachments: Vec<AttachmentDescription>,
    pub depth_attachment: Option<AttachmentDescription>,
    /// Render into an existing render pass instead of creating one
    pub render_pass: Option<RenderPassHandle>,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_stencil: DepthStencilState,
    pub blend: Option<BlendState>,
    pub depth_clamp: bool,
}

impl PipelineDescription {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            vertex_layout: None,
            color_attachments: Vec::new(),
            depth_attachment: None,
            render_pass: None,
            cull_mode: CullMode::None,
            front_face: FrontFace::Ccw,
            depth_stencil: DepthStencilState::disabled(),
            blend: None,
            depth_clamp: false,
        }
    }

    pub fn with_set(mut self, entries: Vec<DescriptorSetLayoutEntry>) -> Self {
        self.set_layouts.push(entries);
        self
    }

    pub fn with_push_constants(mut self, stages: ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constant_ranges.push(PushConstantRange {
            stages,
            offset,
            size,
        });
        self
    }

    pub fn with_vertex_layout(mut self, layout: VertexBufferLayout) -> Self {
        self.vertex_layout = Some(layout);
        self
    }

    pub fn with_color(mut self, format: TextureFormat, final_layout: ImageLayout) -> Self {
        self.color_attachments.push(AttachmentDescription {
            format,
            load_op: LoadOp::Clear,
            final_layout,
        });
        self
    }

    pub fn with_depth(mut self, format: TextureFormat, final_layout: ImageLayout, state: DepthStencilState) -> Self {
        self.depth_attachment = Some(AttachmentDescription {
            format,
            load_op: LoadOp::Clear,
            final_layout,
        });
        self.depth_stencil = state;
        self
    }

    pub fn with_render_pass(mut self, render_pass: RenderPassHandle) -> Self {
        self.render_pass = Some(render_pass);
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_depth_stencil(mut self, state: DepthStencilState) -> Self {
        self.depth_stencil = state;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn with_depth_clamp(mut self) -> Self {
        self.depth_clamp = true;
        self
    }
}

/// Compiled GPU program with its layout, immutable once built
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub kind: PipelineKind,
    pub handle: PipelineHandle,
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constant_ranges: Vec<PushConstantRange>,
    /// Render pass the pipeline draws in; `None` for compute
    pub render_pass: Option<RenderPassHandle>,
}

impl Pipeline {
    fn create_set_layouts(
        backend: &mut dyn GraphicsBackend,
        desc: &PipelineDescription,
    ) -> BackendResult<Vec<DescriptorSetLayoutHandle>> {
        desc.set_layouts
            .iter()
            .map(|entries| backend.create_descriptor_set_layout(entries))
            .collect()
    }

    pub fn create_graphics(
        backend: &mut dyn GraphicsBackend,
        shader: &Shader,
        desc: &PipelineDescription,
    ) -> BackendResult<Self> {
        let missing = |stage: &str| {
            BackendError::PipelineCreationFailed(format!(
                "shader '{}' has no {} stage for pipeline '{}'",
                shader.name, stage, desc.name
            ))
        };
        let vertex = shader.stage(ShaderStage::Vertex).ok_or_else(|| missing("vertex"))?;
        let fragment = shader
            .stage(ShaderStage::Fragment)
            .ok_or_else(|| missing("fragment"))?;

        let set_layouts = Self::create_set_layouts(backend, desc)?;
        let render_pass = match desc.render_pass {
            Some(render_pass) => render_pass,
            None => backend.create_render_pass(&RenderPassLayout {
                label: desc.name.clone(),
                color_attachments: desc.color_attachments.clone(),
                depth_attachment: desc.depth_attachment,
            })?,
        };

        // Blend state per color attachment; the swapchain pass has exactly one
        let attachment_count = desc.color_attachments.len().max(1);
        let handle = backend.create_graphics_pipeline(&GraphicsPipelineDescriptor {
            label: desc.name.clone(),
            stages: vec![vertex.clone(), fragment.clone()],
            vertex_layout: desc.vertex_layout.clone(),
            set_layouts: set_layouts.clone(),
            push_constant_ranges: desc.push_constant_ranges.clone(),
            render_pass,
            cull_mode: desc.cull_mode,
            front_face: desc.front_face,
            depth_stencil: desc.depth_stencil.clone(),
            blend: vec![desc.blend; attachment_count],
            depth_clamp: desc.depth_clamp,
        })?;
        log::debug!("Created graphics pipeline '{}'", desc.name);

        Ok(Self {
            name: desc.name.clone(),
            kind: PipelineKind::Graphics,
            handle,
            set_layouts,
            push_constant_ranges: desc.push_constant_ranges.clone(),
            render_pass: Some(render_pass),
        })
    }

    pub fn create_compute(
        backend: &mut dyn GraphicsBackend,
        shader: &Shader,
        desc: &PipelineDescription,
    ) -> BackendResult<Self> {
        let stage = shader.stage(ShaderStage::Compute).ok_or_else(|| {
            BackendError::PipelineCreationFailed(format!(
                "shader '{}' has no compute stage for pipeline '{}'",
                shader.name, desc.name
            ))
        })?;
        let set_layouts = Self::create_set_layouts(backend, desc)?;
        let handle = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: desc.name.clone(),
            stage: stage.clone(),
            set_layouts: set_layouts.clone(),
            push_constant_ranges: desc.push_constant_ranges.clone(),
        })?;
        log::debug!("Created compute pipeline '{}'", desc.name);

        Ok(Self {
            name: desc.name.clone(),
            kind: PipelineKind::Compute,
            handle,
            set_layouts,
            push_constant_ranges: desc.push_constant_ranges.clone(),
            render_pass: None,
        })
    }

    /// Build the pipeline matching the shader's stages
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        shader: &Shader,
        desc: &PipelineDescription,
    ) -> BackendResult<Self> {
        if shader.is_compute() {
            Self::create_compute(backend, shader, desc)
        } else {
            Self::create_graphics(backend, shader, desc)
        }
    }

    pub fn set_layout(&self, index: usize) -> Option<DescriptorSetLayoutHandle> {
        self.set_layouts.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::pipeline::shader::{HeadlessCompiler, ShaderCreateInfo, ShaderLibrary, ShaderSource};
    use std::sync::Arc;

    fn library() -> ShaderLibrary {
        ShaderLibrary::new(Arc::new(HeadlessCompiler))
    }

    #[test]
    fn test_group_count_rounds_up() {
        assert_eq!(group_count(Extent2D::new(1920, 1080)), (240, 135));
        assert_eq!(group_count(Extent2D::new(9, 1)), (2, 1));
    }

    #[test]
    fn test_graphics_pipeline_owns_render_pass() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let shader = library()
            .create_shader(ShaderCreateInfo::graphics("blit", ShaderSource::Wgsl("")))
            .unwrap();
        let desc = PipelineDescription::new("Blit")
            .with_set(vec![layout_entry(
                0,
                DescriptorType::CombinedImageSampler,
                ShaderStageFlags::FRAGMENT,
            )])
            .with_color(TextureFormat::Rgba16Float, ImageLayout::ShaderReadOnly);
        let pipeline = Pipeline::create(&mut backend, &shader, &desc).unwrap();

        assert_eq!(pipeline.kind, PipelineKind::Graphics);
        assert!(pipeline.render_pass.is_some());
        assert!(pipeline.set_layout(0).is_some());
        assert!(pipeline.set_layout(1).is_none());
        assert_eq!(backend.pipeline_label(pipeline.handle), Some("Blit"));
    }

    #[test]
    fn test_compute_pipeline_rejects_graphics_shader() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let shader = library()
            .create_shader(ShaderCreateInfo::graphics("blit", ShaderSource::Wgsl("")))
            .unwrap();
        let result = Pipeline::create_compute(&mut backend, &shader, &PipelineDescription::new("Blit"));
        assert!(matches!(result, Err(BackendError::PipelineCreationFailed(_))));
    }

    #[test]
    fn test_existing_render_pass_is_reused() {
        let mut backend = HeadlessBackend::new(Extent2D::new(8, 8));
        let shader = library()
            .create_shader(ShaderCreateInfo::graphics("quad", ShaderSource::Wgsl("")))
            .unwrap();
        let swapchain = backend.swapchain_render_pass();
        let desc = PipelineDescription::new("Quad").with_render_pass(swapchain);
        let pipeline = Pipeline::create(&mut backend, &shader, &desc).unwrap();
        assert_eq!(pipeline.render_pass, Some(swapchain));
    }
}
