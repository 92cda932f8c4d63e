//! Ordered render graph execution

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;
use crate::render_graph::frame::FrameData;
use crate::render_graph::pass::*;
use crate::resources::{DescriptorSetId, RendererResources};

/// Final pass rendering into the acquired swapchain image
pub struct SwapchainPass {
    name: String,
    clear_color: [f32; 4],
    record: RecordFn,
    command_buffers: Vec<CommandBufferHandle>,
}

impl SwapchainPass {
    pub fn new(name: &str, clear_color: [f32; 4], record: impl Fn(&mut PassContext<'_>) + 'static) -> Self {
        Self {
            name: name.to_string(),
            clear_color,
            record: Box::new(record),
            command_buffers: Vec::new(),
        }
    }
}

/// Passes executed in registration order, graphics and compute interleaved
pub struct RenderGraph {
    passes: Vec<RenderGraphPass>,
    swapchain_pass: Option<SwapchainPass>,
    frame_index: u32,
    resize_pending: bool,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            swapchain_pass: None,
            frame_index: 0,
            resize_pending: false,
        }
    }

    fn push(
        &mut self,
        mut pass: RenderGraphPass,
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<PassId> {
        pass.prepare(resources, backend)?;
        log::debug!("Added {:?} pass '{}' to the render graph", pass.kind, pass.name);
        self.passes.push(pass);
        Ok(PassId(self.passes.len() as u32 - 1))
    }

    /// Append a graphics pass
    pub fn add_to_graph(
        &mut self,
        mut pass: RenderGraphPass,
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<PassId> {
        pass.kind = PassKind::Graphics;
        self.push(pass, resources, backend)
    }

    /// Append a compute pass
    pub fn add_to_graph_compute(
        &mut self,
        mut pass: RenderGraphPass,
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<PassId> {
        pass.kind = PassKind::Compute;
        self.push(pass, resources, backend)
    }

    pub fn set_swapchain_pass(
        &mut self,
        mut pass: SwapchainPass,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        for _ in 0..backend.frames_in_flight().max(1) {
            pass.command_buffers
                .push(backend.create_command_buffer(QueueType::Graphics)?);
        }
        self.swapchain_pass = Some(pass);
        Ok(())
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn pass(&self, id: PassId) -> Option<&RenderGraphPass> {
        self.passes.get(id.0 as usize)
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn set_resize_pending(&mut self) {
        self.resize_pending = true;
    }

    pub fn clear_resize_pending(&mut self) {
        self.resize_pending = false;
    }

    pub fn is_resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Descriptor sets of enabled passes that still reference recreated resources
    pub fn stale_descriptor_sets<'r>(
        &self,
        resources: &'r RendererResources,
        config: &RendererConfig,
    ) -> Vec<&'r str> {
        let sets: Vec<DescriptorSetId> = self
            .passes
            .iter()
            .filter(|p| p.is_enabled(config))
            .flat_map(|p| p.descriptor_sets.iter().copied())
            .collect();
        resources.stale_descriptor_sets(&sets)
    }

    /// Acquire the next frame, then record and submit every enabled pass in order
    ///
    /// Returns `Ok(false)` without recording anything when the swapchain needs
    /// to be resized first.
    pub fn update(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        resources: &RendererResources,
        frame: &FrameData,
    ) -> BackendResult<bool> {
        if !self.acquire(backend)? {
            return Ok(false);
        }
        self.record(backend, resources, frame)?;
        Ok(true)
    }

    /// Wait for the frame slot and take the next swapchain image
    ///
    /// Once this returns `Ok(true)` the host may write frame buffers: no
    /// earlier frame is still reading them.
    pub fn acquire(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<bool> {
        if self.resize_pending {
            return Ok(false);
        }
        self.frame_index = match backend.acquire_frame()? {
            AcquireResult::Acquired { frame_index } => frame_index,
            AcquireResult::NeedsResize => {
                self.resize_pending = true;
                return Ok(false);
            }
        };
        Ok(true)
    }

    /// Record and submit every enabled pass of the acquired frame in order
    pub fn record(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        resources: &RendererResources,
        frame: &FrameData,
    ) -> BackendResult<()> {
        for pass in &mut self.passes {
            if !pass.is_enabled(&frame.config) {
                continue;
            }
            if let Some(barriers) = &mut pass.barriers {
                if barriers.is_outdated(resources) {
                    barriers.rebuild(resources);
                }
            }
            let command_buffer =
                pass.command_buffers[self.frame_index as usize % pass.command_buffers.len()];
            backend.begin_command_buffer(command_buffer)?;
            backend.begin_debug_label(&pass.name);
            record_pass(pass, backend, resources, frame);
            backend.end_debug_label();
            backend.end_command_buffer()?;
            backend.submit(pass.queue, command_buffer)?;
            log::trace!("Submitted pass '{}'", pass.name);
        }
        Ok(())
    }

    /// Record the swapchain pass, submit it with the present synchronization and present
    ///
    /// Returns `Ok(false)` when presentation reported an out-of-date swapchain.
    pub fn submit_swapchain_pass(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        resources: &RendererResources,
        frame: &FrameData,
    ) -> BackendResult<bool> {
        let Some(pass) = &self.swapchain_pass else {
            return Err(BackendError::CommandRecordingFailed(
                "no swapchain pass set".into(),
            ));
        };
        let command_buffer =
            pass.command_buffers[self.frame_index as usize % pass.command_buffers.len()];
        backend.begin_command_buffer(command_buffer)?;
        backend.begin_debug_label(&pass.name);
        backend.begin_swapchain_render_pass(pass.clear_color);
        let mut ctx = PassContext {
            extent: backend.surface_extent(),
            backend: &mut *backend,
            resources,
            frame,
            framebuffer_index: 0,
            barriers: None,
        };
        (pass.record)(&mut ctx);
        backend.end_render_pass();
        backend.end_debug_label();
        backend.end_command_buffer()?;
        backend.submit_frame(command_buffer)?;

        let presented = backend.present()?;
        if !presented {
            self.resize_pending = true;
        }
        Ok(presented)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn record_inner_passes(pass: &RenderGraphPass, ctx: &mut PassContext<'_>) {
    for inner in &pass.inner_passes {
        ctx.backend.begin_debug_label(&inner.name);
        (inner.record)(ctx);
        ctx.backend.end_debug_label();
    }
}

fn record_pass(
    pass: &RenderGraphPass,
    backend: &mut dyn GraphicsBackend,
    resources: &RendererResources,
    frame: &FrameData,
) {
    let barriers = pass.barriers.as_ref();
    if pass.kind == PassKind::Compute || pass.framebuffers.is_empty() {
        let mut ctx = PassContext {
            backend,
            resources,
            frame,
            framebuffer_index: 0,
            extent: pass.render_area.unwrap_or(frame.extent),
            barriers,
        };
        (pass.record)(&mut ctx);
        record_inner_passes(pass, &mut ctx);
        return;
    }

    for (index, id) in pass.framebuffers.iter().enumerate() {
        let framebuffer = resources.framebuffer(*id);
        let extent = pass.render_area.unwrap_or(framebuffer.extent());
        backend.begin_render_pass(&RenderPassBegin {
            render_pass: framebuffer.render_pass(),
            framebuffer: framebuffer.handle,
            render_area: Rect2D::from_extent(extent),
            clear_values: pass.clear_values.clone(),
        });
        let mut ctx = PassContext {
            backend: &mut *backend,
            resources,
            frame,
            framebuffer_index: index,
            extent,
            barriers,
        };
        (pass.record)(&mut ctx);
        record_inner_passes(pass, &mut ctx);
        backend.end_render_pass();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::RecordedCommand;
    use crate::backend::HeadlessBackend;
    use crate::resources::{
        AttachmentSource, ExtentSource, FramebufferDescription, GpuBuffer, ImageDescription,
    };

    fn setup() -> (HeadlessBackend, RendererResources, FrameData) {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 32));
        let resources = RendererResources::new(&mut backend).unwrap();
        let frame = FrameData {
            extent: Extent2D::new(64, 32),
            ..Default::default()
        };
        (backend, resources, frame)
    }

    fn present(graph: &mut RenderGraph, backend: &mut HeadlessBackend, resources: &RendererResources, frame: &FrameData) {
        graph.set_swapchain_pass(SwapchainPass::new("Swapchain", [0.0; 4], |_| {}), backend).unwrap();
        assert!(graph.update(backend, resources, frame).unwrap());
        assert!(graph.submit_swapchain_pass(backend, resources, frame).unwrap());
    }

    #[test]
    fn test_passes_run_in_registration_order() {
        let (mut backend, resources, frame) = setup();
        let mut graph = RenderGraph::new();
        graph
            .add_to_graph_compute(RenderGraphPass::compute("A", |ctx| ctx.dispatch(1, 1, 1)), &resources, &mut backend)
            .unwrap();
        graph
            .add_to_graph(RenderGraphPass::graphics("B", |_| {}), &resources, &mut backend)
            .unwrap();
        graph
            .add_to_graph_compute(RenderGraphPass::compute("C", |ctx| ctx.dispatch(2, 1, 1)), &resources, &mut backend)
            .unwrap();
        present(&mut graph, &mut backend, &resources, &frame);

        assert_eq!(backend.last_frame_labels(), vec!["A", "B", "C", "Swapchain"]);
        assert!(backend.last_frame().last().unwrap().presents);
    }

    #[test]
    fn test_condition_is_evaluated_every_frame() {
        let (mut backend, resources, mut frame) = setup();
        let mut graph = RenderGraph::new();
        graph
            .add_to_graph_compute(
                RenderGraphPass::compute("SSAO Pass", |ctx| ctx.dispatch(1, 1, 1))
                    .run_with_condition(|config| config.ssao.enabled),
                &resources,
                &mut backend,
            )
            .unwrap();
        present(&mut graph, &mut backend, &resources, &frame);
        assert!(backend.last_frame_submission("SSAO Pass").is_some());

        frame.config.ssao.enabled = false;
        assert!(graph.update(&mut backend, &resources, &frame).unwrap());
        graph.submit_swapchain_pass(&mut backend, &resources, &frame).unwrap();
        assert!(backend.last_frame_submission("SSAO Pass").is_none());
    }

    #[test]
    fn test_inner_passes_record_inside_parent_scope() {
        let (mut backend, resources, frame) = setup();
        let mut graph = RenderGraph::new();
        graph
            .add_to_graph_compute(
                RenderGraphPass::compute("Parent", |ctx| ctx.dispatch(1, 1, 1))
                    .add_inner_pass("Inner", |ctx| ctx.dispatch(2, 2, 1)),
                &resources,
                &mut backend,
            )
            .unwrap();
        present(&mut graph, &mut backend, &resources, &frame);

        let submission = backend.last_frame_submission("Parent").unwrap();
        assert_eq!(submission.dispatches(), vec![[1, 1, 1], [2, 2, 1]]);
        assert_eq!(backend.last_frame().len(), 2);
        assert!(submission.commands.contains(&RecordedCommand::BeginLabel("Inner".into())));
    }

    #[test]
    fn test_graphics_pass_begins_one_render_pass_per_framebuffer() {
        let (mut backend, mut resources, frame) = setup();
        let render_pass = backend
            .create_render_pass(&RenderPassLayout {
                label: "Shadow".into(),
                color_attachments: vec![],
                depth_attachment: Some(AttachmentDescription {
                    format: TextureFormat::Depth32Float,
                    load_op: LoadOp::Clear,
                    final_layout: ImageLayout::ShaderReadOnly,
                }),
            })
            .unwrap();
        let framebuffers: Vec<_> = (0..3)
            .map(|i| {
                resources
                    .create_framebuffer(
                        &mut backend,
                        FramebufferDescription {
                            label: format!("Cascade {}", i),
                            render_pass,
                            attachments: vec![AttachmentSource::Owned(ImageDescription::new(
                                "depth",
                                Extent2D::default(),
                                TextureFormat::Depth32Float,
                                TextureUsage::RENDER_ATTACHMENT,
                            ))],
                            extent: Extent2D::new(16, 16),
                            extent_source: Some(ExtentSource::FULL),
                        },
                    )
                    .unwrap()
            })
            .collect();

        let mut graph = RenderGraph::new();
        graph
            .add_to_graph(
                RenderGraphPass::graphics("Shadows", |ctx| {
                    let index = ctx.framebuffer_index as u32;
                    ctx.backend.draw(0..3, index..index + 1);
                })
                .with_framebuffers(framebuffers)
                .with_render_area(Extent2D::new(8, 8)),
                &resources,
                &mut backend,
            )
            .unwrap();
        present(&mut graph, &mut backend, &resources, &frame);

        let submission = backend.last_frame_submission("Shadows").unwrap();
        let begins: Vec<_> = submission
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { render_area, .. } => Some(render_area.extent),
                _ => None,
            })
            .collect();
        assert_eq!(begins, vec![Extent2D::new(8, 8); 3]);
        let instances: Vec<_> = submission
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Draw { instances, .. } => Some(instances.start),
                _ => None,
            })
            .collect();
        assert_eq!(instances, vec![0, 1, 2]);
    }

    #[test]
    fn test_acquire_precedes_recording() {
        let (mut backend, resources, frame) = setup();
        let mut graph = RenderGraph::new();
        graph
            .add_to_graph_compute(RenderGraphPass::compute("A", |ctx| ctx.dispatch(1, 1, 1)), &resources, &mut backend)
            .unwrap();

        assert!(graph.acquire(&mut backend).unwrap());
        assert_eq!(graph.frame_index(), 0);
        assert!(backend.pending_submissions().is_empty());

        graph.record(&mut backend, &resources, &frame).unwrap();
        assert_eq!(backend.pending_submissions().len(), 1);
    }

    #[test]
    fn test_resize_skips_frame_until_cleared() {
        let (mut backend, resources, frame) = setup();
        let mut graph = RenderGraph::new();
        graph
            .add_to_graph_compute(RenderGraphPass::compute("A", |ctx| ctx.dispatch(1, 1, 1)), &resources, &mut backend)
            .unwrap();

        backend.request_resize(Extent2D::new(32, 32));
        assert!(!graph.update(&mut backend, &resources, &frame).unwrap());
        assert!(graph.is_resize_pending());
        assert!(backend.pending_submissions().is_empty());

        backend.recreate_swapchain(Extent2D::new(32, 32)).unwrap();
        assert!(!graph.update(&mut backend, &resources, &frame).unwrap());
        graph.clear_resize_pending();
        assert!(graph.update(&mut backend, &resources, &frame).unwrap());
    }

    #[test]
    fn test_barrier_pair_is_refreshed_before_recording() {
        let (mut backend, mut resources, frame) = setup();
        let lights = resources.add_buffer(GpuBuffer::storage(&mut backend, "lights", 64).unwrap());
        let mut graph = RenderGraph::new();
        graph
            .add_to_graph_compute(
                RenderGraphPass::compute("Light List Pass", |ctx| {
                    let Some(barriers) = ctx.barriers() else {
                        return;
                    };
                    ctx.barrier(&barriers.before);
                    ctx.dispatch(1, 1, 1);
                    ctx.barrier(&barriers.after);
                })
                .with_buffer_barriers(
                    vec![lights],
                    PipelineStages::FRAGMENT_SHADER,
                    PipelineStages::COMPUTE_SHADER,
                ),
                &resources,
                &mut backend,
            )
            .unwrap();

        resources.buffer_mut(lights).recreate(&mut backend).unwrap();
        present(&mut graph, &mut backend, &resources, &frame);

        let submission = backend.last_frame_submission("Light List Pass").unwrap();
        let barriers = submission.barriers();
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].buffers[0].buffer, resources.buffer(lights).handle);
        assert_eq!(barriers[1].buffers[0].dst_access, AccessFlags::SHADER_READ);
    }
}
