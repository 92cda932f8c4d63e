//! Render graph passes and the context handed to their record callbacks

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::render_graph::barrier::BufferBarrierPair;
use crate::render_graph::frame::{FrameData, MeshDrawEntry};
use crate::resources::{BufferId, DescriptorSetId, FramebufferId, PipelineId, RendererResources};
use bytemuck::Pod;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassId(pub(crate) u32);

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Begins one render pass instance per target framebuffer
    Graphics,
    Compute,
}

/// Records the commands of a pass; never fails, records nothing when it cannot proceed
pub type RecordFn = Box<dyn Fn(&mut PassContext<'_>)>;

/// Evaluated against the live configuration every frame
pub type PassCondition = Box<dyn Fn(&RendererConfig) -> bool>;

/// Context for recording a render pass
pub struct PassContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub resources: &'a RendererResources,
    pub frame: &'a FrameData,
    /// Index of the framebuffer being recorded, 0 for passes without framebuffers
    pub framebuffer_index: usize,
    /// Render area of the current framebuffer, or the window extent
    pub extent: Extent2D,
    pub(crate) barriers: Option<&'a BufferBarrierPair>,
}

impl<'a> PassContext<'a> {
    pub fn config(&self) -> &RendererConfig {
        &self.frame.config
    }

    /// Barrier pair built for this pass, if it declared one
    pub fn barriers(&self) -> Option<&'a BufferBarrierPair> {
        self.barriers
    }

    pub fn bind_pipeline(&mut self, pipeline: PipelineId) {
        let handle = self.resources.pipeline(pipeline).handle;
        self.backend.bind_pipeline(handle);
    }

    pub fn bind_descriptor_sets(&mut self, pipeline: PipelineId, first_set: u32, sets: &[DescriptorSetId]) {
        let handles: Vec<_> = sets
            .iter()
            .map(|id| self.resources.descriptor_set(*id).handle)
            .collect();
        let pipeline = self.resources.pipeline(pipeline).handle;
        self.backend.bind_descriptor_sets(pipeline, first_set, &handles);
    }

    pub fn push_constants<T: Pod>(
        &mut self,
        pipeline: PipelineId,
        stages: ShaderStageFlags,
        offset: u32,
        value: &T,
    ) {
        let pipeline = self.resources.pipeline(pipeline).handle;
        self.backend
            .push_constants(pipeline, stages, offset, bytemuck::bytes_of(value));
    }

    pub fn set_viewport_and_scissor(&mut self, viewport: Viewport) {
        self.backend.set_viewport(viewport);
        self.backend.set_scissor(Rect2D::from_extent(self.extent));
    }

    /// Bind the entry's geometry and draw its submesh
    pub fn draw_mesh(&mut self, entry: &MeshDrawEntry) {
        entry.mesh.bind(&mut *self.backend, self.resources);
        entry.mesh.draw_submesh(&mut *self.backend, entry.submesh_index);
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.backend.dispatch(x, y, z);
    }

    pub fn barrier(&mut self, barrier: &PipelineBarrier) {
        self.backend.pipeline_barrier(barrier);
    }

    /// Barrier between two compute dispatches on the given images
    pub fn compute_barrier(&mut self, images: Vec<ImageBarrier>) {
        self.backend.pipeline_barrier(&PipelineBarrier {
            src_stages: PipelineStages::COMPUTE_SHADER,
            dst_stages: PipelineStages::COMPUTE_SHADER,
            by_region: true,
            buffers: Vec::new(),
            images,
        });
    }
}

pub(crate) struct InnerPass {
    pub(crate) name: String,
    pub(crate) record: RecordFn,
}

struct PendingBarriers {
    buffers: Vec<BufferId>,
    reader: PipelineStages,
    writer: PipelineStages,
}

/// A pass before it joins the graph
pub struct RenderGraphPass {
    pub(crate) name: String,
    pub(crate) kind: PassKind,
    pub(crate) queue: QueueType,
    pub(crate) pipeline: Option<PipelineId>,
    pub(crate) framebuffers: Vec<FramebufferId>,
    pub(crate) record: RecordFn,
    pub(crate) clear_values: Vec<ClearValue>,
    pub(crate) render_area: Option<Extent2D>,
    pub(crate) condition: Option<PassCondition>,
    pub(crate) inner_passes: Vec<InnerPass>,
    pub(crate) descriptor_sets: Vec<DescriptorSetId>,
    pending_barriers: Option<PendingBarriers>,
    pub(crate) barriers: Option<BufferBarrierPair>,
    pub(crate) command_buffers: Vec<CommandBufferHandle>,
}

impl RenderGraphPass {
    pub fn new(name: &str, kind: PassKind, record: impl Fn(&mut PassContext<'_>) + 'static) -> Self {
        Self {
            name: name.to_string(),
            kind,
            queue: QueueType::Graphics,
            pipeline: None,
            framebuffers: Vec::new(),
            record: Box::new(record),
            clear_values: Vec::new(),
            render_area: None,
            condition: None,
            inner_passes: Vec::new(),
            descriptor_sets: Vec::new(),
            pending_barriers: None,
            barriers: None,
            command_buffers: Vec::new(),
        }
    }

    pub fn graphics(name: &str, record: impl Fn(&mut PassContext<'_>) + 'static) -> Self {
        Self::new(name, PassKind::Graphics, record)
    }

    pub fn compute(name: &str, record: impl Fn(&mut PassContext<'_>) + 'static) -> Self {
        Self::new(name, PassKind::Compute, record)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    pub fn pipeline(&self) -> Option<PipelineId> {
        self.pipeline
    }

    pub fn with_pipeline(mut self, pipeline: PipelineId) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_framebuffers(mut self, framebuffers: Vec<FramebufferId>) -> Self {
        self.framebuffers = framebuffers;
        self
    }

    pub fn with_clear_values(mut self, clear_values: Vec<ClearValue>) -> Self {
        self.clear_values = clear_values;
        self
    }

    pub fn with_render_area(mut self, extent: Extent2D) -> Self {
        self.render_area = Some(extent);
        self
    }

    pub fn with_queue(mut self, queue: QueueType) -> Self {
        self.queue = queue;
        self
    }

    /// Descriptor sets the pass binds; a stale set skips the whole frame
    pub fn with_descriptor_sets(mut self, sets: Vec<DescriptorSetId>) -> Self {
        self.descriptor_sets = sets;
        self
    }

    /// Build a read/write barrier pair over `buffers` when the pass joins the graph
    pub fn with_buffer_barriers(
        mut self,
        buffers: Vec<BufferId>,
        reader: PipelineStages,
        writer: PipelineStages,
    ) -> Self {
        self.pending_barriers = Some(PendingBarriers {
            buffers,
            reader,
            writer,
        });
        self
    }

    /// Skip the pass entirely on frames where `condition` is false
    pub fn run_with_condition(mut self, condition: impl Fn(&RendererConfig) -> bool + 'static) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Record `record` inside this pass's scope, after its own commands
    pub fn add_inner_pass(mut self, name: &str, record: impl Fn(&mut PassContext<'_>) + 'static) -> Self {
        self.inner_passes.push(InnerPass {
            name: name.to_string(),
            record: Box::new(record),
        });
        self
    }

    pub(crate) fn is_enabled(&self, config: &RendererConfig) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition(config))
    }

    pub(crate) fn prepare(
        &mut self,
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        for _ in 0..backend.frames_in_flight().max(1) {
            self.command_buffers
                .push(backend.create_command_buffer(self.queue)?);
        }
        if let Some(pending) = self.pending_barriers.take() {
            self.barriers = Some(BufferBarrierPair::build(
                resources,
                &pending.buffers,
                pending.reader,
                pending.writer,
            ));
        }
        Ok(())
    }
}
