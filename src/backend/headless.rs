//! Headless recording backend
//!
//! Performs no GPU work. Every resource is tracked in host memory and every
//! recorded command is kept per command buffer, so the renderer can be driven
//! end to end without a device and the recorded stream inspected afterwards.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

/// A command captured by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginLabel(String),
    EndLabel,
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        render_area: Rect2D,
        clear_values: Vec<ClearValue>,
    },
    BeginSwapchainRenderPass {
        clear: [f32; 4],
    },
    EndRenderPass,
    BindPipeline(PipelineHandle),
    BindDescriptorSets {
        pipeline: PipelineHandle,
        first_set: u32,
        sets: Vec<DescriptorSetHandle>,
    },
    PushConstants {
        pipeline: PipelineHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    SetViewport(Viewport),
    SetScissor(Rect2D),
    BindVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        format: IndexFormat,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    PipelineBarrier(PipelineBarrier),
}

/// A command buffer as it was submitted
#[derive(Debug, Clone)]
pub struct Submission {
    pub queue: QueueType,
    pub command_buffer: CommandBufferHandle,
    pub commands: Vec<RecordedCommand>,
    pub presents: bool,
}

impl Submission {
    /// Label of the first debug region, which the render graph sets to the pass name
    pub fn label(&self) -> Option<&str> {
        self.commands.iter().find_map(|c| match c {
            RecordedCommand::BeginLabel(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn dispatches(&self) -> Vec<[u32; 3]> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Dispatch { x, y, z } => Some([*x, *y, *z]),
                _ => None,
            })
            .collect()
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
                )
            })
            .count()
    }

    pub fn barriers(&self) -> Vec<&PipelineBarrier> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::PipelineBarrier(b) => Some(b),
                _ => None,
            })
            .collect()
    }
}

struct HeadlessBuffer {
    label: String,
    data: Vec<u8>,
    writes: u32,
    /// Presents counted when the buffer was created
    created_at: u64,
}

/// Backend that records instead of rendering
pub struct HeadlessBackend {
    extent: Extent2D,
    format: TextureFormat,
    frames_in_flight: u32,
    frame_counter: u64,
    vsync: bool,
    resize_requested: Option<Extent2D>,
    acquired: bool,
    /// A presented frame may still be executing until the next acquire or idle wait
    frame_in_flight: bool,

    next_id: u64,
    buffers: HashMap<BufferHandle, HeadlessBuffer>,
    images: HashMap<ImageHandle, ImageCreateInfo>,
    image_views: HashMap<ImageViewHandle, ImageHandle>,
    samplers: HashSet<SamplerHandle>,
    set_layouts: HashMap<DescriptorSetLayoutHandle, Vec<DescriptorSetLayoutEntry>>,
    descriptor_sets: HashMap<DescriptorSetHandle, DescriptorSetLayoutHandle>,
    descriptor_writes: HashMap<DescriptorSetHandle, BTreeMap<u32, DescriptorWrite>>,
    render_passes: HashMap<RenderPassHandle, RenderPassLayout>,
    framebuffers: HashMap<FramebufferHandle, Vec<ImageViewHandle>>,
    pipelines: HashMap<PipelineHandle, String>,
    command_buffers: HashMap<CommandBufferHandle, Vec<RecordedCommand>>,
    recording: Option<CommandBufferHandle>,
    swapchain_render_pass: RenderPassHandle,

    frame_submissions: Vec<Submission>,
    last_frame: Vec<Submission>,
    layout_transitions: Vec<(ImageHandle, ImageTransition)>,
    idle_waits: u32,
    unfenced_writes: u32,
    presents: u64,
    swapchain_recreations: u32,
}

impl HeadlessBackend {
    pub fn new(extent: Extent2D) -> Self {
        let mut backend = Self {
            extent,
            format: TextureFormat::Bgra8UnormSrgb,
            frames_in_flight: 2,
            frame_counter: 0,
            vsync: true,
            resize_requested: None,
            acquired: false,
            frame_in_flight: false,
            next_id: 1,
            buffers: HashMap::new(),
            images: HashMap::new(),
            image_views: HashMap::new(),
            samplers: HashSet::new(),
            set_layouts: HashMap::new(),
            descriptor_sets: HashMap::new(),
            descriptor_writes: HashMap::new(),
            render_passes: HashMap::new(),
            framebuffers: HashMap::new(),
            pipelines: HashMap::new(),
            command_buffers: HashMap::new(),
            recording: None,
            swapchain_render_pass: RenderPassHandle(0),
            frame_submissions: Vec::new(),
            last_frame: Vec::new(),
            layout_transitions: Vec::new(),
            idle_waits: 0,
            unfenced_writes: 0,
            presents: 0,
            swapchain_recreations: 0,
        };
        let id = backend.next_handle();
        backend.swapchain_render_pass = RenderPassHandle(id);
        backend.render_passes.insert(
            backend.swapchain_render_pass,
            RenderPassLayout {
                label: "Swapchain".into(),
                color_attachments: vec![AttachmentDescription {
                    format: backend.format,
                    load_op: LoadOp::Clear,
                    final_layout: ImageLayout::PresentSrc,
                }],
                depth_attachment: None,
            },
        );
        backend
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: RecordedCommand) {
        match self.recording.and_then(|cb| self.command_buffers.get_mut(&cb)) {
            Some(commands) => {
                log::trace!("HeadlessBackend: {:?}", command);
                commands.push(command);
            }
            None => log::warn!("HeadlessBackend: {:?} recorded outside a command buffer", command),
        }
    }

    /// Make the next acquire report an out-of-date swapchain with the new surface extent
    pub fn request_resize(&mut self, extent: Extent2D) {
        self.resize_requested = Some(extent);
    }

    /// Submissions of the last presented frame, in submission order
    pub fn last_frame(&self) -> &[Submission] {
        &self.last_frame
    }

    /// Submissions recorded since the last acquire
    pub fn pending_submissions(&self) -> &[Submission] {
        &self.frame_submissions
    }

    /// Pass labels of the last presented frame, in submission order
    pub fn last_frame_labels(&self) -> Vec<String> {
        self.last_frame
            .iter()
            .filter_map(|s| s.label().map(str::to_string))
            .collect()
    }

    /// The submission of the last presented frame labelled `label`
    pub fn last_frame_submission(&self, label: &str) -> Option<&Submission> {
        self.last_frame.iter().find(|s| s.label() == Some(label))
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    /// Number of writes into `buffer` since it was created
    pub fn buffer_write_count(&self, buffer: BufferHandle) -> u32 {
        self.buffers.get(&buffer).map_or(0, |b| b.writes)
    }

    /// Current contents of every descriptor set, keyed by set handle then binding
    pub fn descriptor_writes(&self) -> BTreeMap<DescriptorSetHandle, BTreeMap<u32, DescriptorWrite>> {
        self.descriptor_writes
            .iter()
            .map(|(set, writes)| (*set, writes.clone()))
            .collect()
    }

    /// Image views referenced by descriptor sets that no longer exist
    pub fn dangling_descriptor_views(&self) -> Vec<ImageViewHandle> {
        self.descriptor_writes
            .values()
            .flat_map(|writes| writes.values())
            .filter_map(|w| match &w.resource {
                DescriptorResource::Images(infos) => Some(infos.iter().map(|i| i.view)),
                DescriptorResource::Buffer { .. } => None,
            })
            .flatten()
            .filter(|view| !self.image_views.contains_key(view))
            .collect()
    }

    pub fn image_info(&self, image: ImageHandle) -> Option<&ImageCreateInfo> {
        self.images.get(&image)
    }

    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn layout_transitions(&self) -> &[(ImageHandle, ImageTransition)] {
        &self.layout_transitions
    }

    pub fn pipeline_label(&self, pipeline: PipelineHandle) -> Option<&str> {
        self.pipelines.get(&pipeline).map(String::as_str)
    }

    pub fn idle_waits(&self) -> u32 {
        self.idle_waits
    }

    /// Writes to existing buffers between a present and the next acquire
    pub fn unfenced_buffer_writes(&self) -> u32 {
        self.unfenced_writes
    }

    pub fn present_count(&self) -> u64 {
        self.presents
    }

    pub fn swapchain_recreations(&self) -> u32 {
        self.swapchain_recreations
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn limits(&self) -> DeviceLimits {
        DeviceLimits::default()
    }

    fn surface_extent(&self) -> Extent2D {
        self.extent
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        self.idle_waits += 1;
        self.frame_in_flight = false;
        Ok(())
    }

    fn acquire_frame(&mut self) -> BackendResult<AcquireResult> {
        if let Some(extent) = self.resize_requested {
            self.extent = extent;
            return Ok(AcquireResult::NeedsResize);
        }
        self.frame_submissions.clear();
        self.acquired = true;
        self.frame_in_flight = false;
        let frame_index = (self.frame_counter % self.frames_in_flight as u64) as u32;
        self.frame_counter += 1;
        Ok(AcquireResult::Acquired { frame_index })
    }

    fn recreate_swapchain(&mut self, extent: Extent2D) -> BackendResult<Extent2D> {
        self.resize_requested = None;
        self.extent = extent;
        self.swapchain_recreations += 1;
        log::debug!(
            "HeadlessBackend: swapchain recreated at {}x{}",
            extent.width,
            extent.height
        );
        Ok(extent)
    }

    fn present(&mut self) -> BackendResult<bool> {
        if !self.acquired {
            return Err(BackendError::PresentFailed("no image acquired".into()));
        }
        self.acquired = false;
        self.frame_in_flight = true;
        self.presents += 1;
        self.last_frame = std::mem::take(&mut self.frame_submissions);
        Ok(true)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "HeadlessBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let handle = BufferHandle(self.next_handle());
        self.buffers.insert(
            handle,
            HeadlessBuffer {
                label: desc.label.clone().unwrap_or_else(|| "buffer".into()),
                data: vec![0; desc.size as usize],
                writes: 0,
                created_at: self.presents,
            },
        );
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let target = self
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::InvalidHandle("buffer"))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(BackendError::BufferWriteOutOfRange {
                label: target.label.clone(),
                offset,
                len: data.len() as u64,
                size: target.data.len() as u64,
            });
        }
        target.data[start..end].copy_from_slice(data);
        target.writes += 1;
        if self.frame_in_flight && target.created_at < self.presents {
            log::warn!("HeadlessBackend: '{}' written while a frame may read it", target.label);
            self.unfenced_writes += 1;
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn create_image(&mut self, info: &ImageCreateInfo) -> BackendResult<ImageHandle> {
        if info.extent.is_empty() {
            return Err(BackendError::ImageCreationFailed(format!(
                "image '{}' has an empty extent",
                info.label
            )));
        }
        log::trace!(
            "HeadlessBackend: creating image {} ({}x{}, {} mips)",
            info.label,
            info.extent.width,
            info.extent.height,
            info.mip_levels
        );
        let handle = ImageHandle(self.next_handle());
        self.images.insert(handle, info.clone());
        Ok(handle)
    }

    fn create_image_view(
        &mut self,
        image: ImageHandle,
        desc: &ImageViewDescriptor,
    ) -> BackendResult<ImageViewHandle> {
        let info = self
            .images
            .get(&image)
            .ok_or(BackendError::InvalidHandle("image"))?;
        if desc.base_mip_level + desc.mip_level_count > info.mip_levels
            || desc.base_array_layer + desc.array_layer_count > info.array_layers
        {
            return Err(BackendError::ImageCreationFailed(format!(
                "view {:?} out of range for image '{}'",
                desc, info.label
            )));
        }
        let handle = ImageViewHandle(self.next_handle());
        self.image_views.insert(handle, image);
        Ok(handle)
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let handle = SamplerHandle(self.next_handle());
        self.samplers.insert(handle);
        Ok(handle)
    }

    fn write_image(
        &mut self,
        image: ImageHandle,
        layer: u32,
        data: &[u8],
        extent: Extent2D,
    ) -> BackendResult<()> {
        let info = self
            .images
            .get(&image)
            .ok_or(BackendError::InvalidHandle("image"))?;
        if layer >= info.array_layers {
            return Err(BackendError::ImageCreationFailed(format!(
                "layer {} out of range for '{}'",
                layer, info.label
            )));
        }
        let expected = (extent.width * extent.height * info.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(BackendError::ImageCreationFailed(format!(
                "expected {} bytes for '{}', got {}",
                expected,
                info.label,
                data.len()
            )));
        }
        Ok(())
    }

    fn transition_image_layout(
        &mut self,
        image: ImageHandle,
        transition: &ImageTransition,
    ) -> BackendResult<()> {
        if !self.images.contains_key(&image) {
            return Err(BackendError::InvalidHandle("image"));
        }
        self.layout_transitions.push((image, *transition));
        Ok(())
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        self.image_views.remove(&view);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler);
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        self.images.remove(&image);
    }

    fn create_descriptor_set_layout(
        &mut self,
        entries: &[DescriptorSetLayoutEntry],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let handle = DescriptorSetLayoutHandle(self.next_handle());
        self.set_layouts.insert(handle, entries.to_vec());
        Ok(handle)
    }

    fn allocate_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        if !self.set_layouts.contains_key(&layout) {
            return Err(BackendError::InvalidHandle("descriptor set layout"));
        }
        let handle = DescriptorSetHandle(self.next_handle());
        self.descriptor_sets.insert(handle, layout);
        self.descriptor_writes.insert(handle, BTreeMap::new());
        Ok(handle)
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        match self.descriptor_writes.get_mut(&set) {
            Some(current) => {
                for write in writes {
                    current.insert(write.binding, write.clone());
                }
            }
            None => log::warn!("HeadlessBackend: update of unknown descriptor set {:?}", set),
        }
    }

    fn create_render_pass(&mut self, layout: &RenderPassLayout) -> BackendResult<RenderPassHandle> {
        let handle = RenderPassHandle(self.next_handle());
        self.render_passes.insert(handle, layout.clone());
        Ok(handle)
    }

    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2D,
    ) -> BackendResult<FramebufferHandle> {
        let layout = self
            .render_passes
            .get(&render_pass)
            .ok_or(BackendError::InvalidHandle("render pass"))?;
        let expected = layout.color_attachments.len() + usize::from(layout.depth_attachment.is_some());
        if attachments.len() != expected || extent.is_empty() {
            return Err(BackendError::FramebufferCreationFailed(format!(
                "'{}' expects {} attachments, got {}",
                layout.label,
                expected,
                attachments.len()
            )));
        }
        if let Some(missing) = attachments.iter().find(|v| !self.image_views.contains_key(v)) {
            return Err(BackendError::FramebufferCreationFailed(format!(
                "attachment {:?} is not a live view",
                missing
            )));
        }
        let handle = FramebufferHandle(self.next_handle());
        self.framebuffers.insert(handle, attachments.to_vec());
        Ok(handle)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
    }

    fn swapchain_render_pass(&self) -> RenderPassHandle {
        self.swapchain_render_pass
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        if !self.render_passes.contains_key(&desc.render_pass) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "'{}' references an unknown render pass",
                desc.label
            )));
        }
        let handle = PipelineHandle(self.next_handle());
        self.pipelines.insert(handle, desc.label.clone());
        Ok(handle)
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let handle = PipelineHandle(self.next_handle());
        self.pipelines.insert(handle, desc.label.clone());
        Ok(handle)
    }

    fn create_command_buffer(&mut self, _queue: QueueType) -> BackendResult<CommandBufferHandle> {
        let handle = CommandBufferHandle(self.next_handle());
        self.command_buffers.insert(handle, Vec::new());
        Ok(handle)
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        if self.recording.is_some() {
            return Err(BackendError::CommandRecordingFailed(
                "a command buffer is already recording".into(),
            ));
        }
        let commands = self
            .command_buffers
            .get_mut(&command_buffer)
            .ok_or(BackendError::InvalidHandle("command buffer"))?;
        commands.clear();
        self.recording = Some(command_buffer);
        Ok(())
    }

    fn end_command_buffer(&mut self) -> BackendResult<()> {
        self.recording
            .take()
            .map(|_| ())
            .ok_or_else(|| BackendError::CommandRecordingFailed("no command buffer is recording".into()))
    }

    fn begin_debug_label(&mut self, name: &str) {
        self.record(RecordedCommand::BeginLabel(name.to_string()));
    }

    fn end_debug_label(&mut self) {
        self.record(RecordedCommand::EndLabel);
    }

    fn begin_render_pass(&mut self, begin: &RenderPassBegin) {
        self.record(RecordedCommand::BeginRenderPass {
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            render_area: begin.render_area,
            clear_values: begin.clear_values.clone(),
        });
    }

    fn begin_swapchain_render_pass(&mut self, clear: [f32; 4]) {
        self.record(RecordedCommand::BeginSwapchainRenderPass { clear });
    }

    fn end_render_pass(&mut self) {
        self.record(RecordedCommand::EndRenderPass);
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.record(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_descriptor_sets(
        &mut self,
        pipeline: PipelineHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        self.record(RecordedCommand::BindDescriptorSets {
            pipeline,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn push_constants(
        &mut self,
        pipeline: PipelineHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(RecordedCommand::PushConstants {
            pipeline,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record(RecordedCommand::SetViewport(viewport));
    }

    fn set_scissor(&mut self, rect: Rect2D) {
        self.record(RecordedCommand::SetScissor(rect));
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(RecordedCommand::BindVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.record(RecordedCommand::BindIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(RecordedCommand::Draw {
            vertices,
            instances,
        });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(RecordedCommand::Dispatch { x, y, z });
    }

    fn pipeline_barrier(&mut self, barrier: &PipelineBarrier) {
        self.record(RecordedCommand::PipelineBarrier(barrier.clone()));
    }

    fn submit(&mut self, queue: QueueType, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        if self.recording == Some(command_buffer) {
            return Err(BackendError::SubmitFailed(
                "command buffer is still recording".into(),
            ));
        }
        let commands = self
            .command_buffers
            .get(&command_buffer)
            .ok_or(BackendError::InvalidHandle("command buffer"))?
            .clone();
        self.frame_submissions.push(Submission {
            queue,
            command_buffer,
            commands,
            presents: false,
        });
        Ok(())
    }

    fn submit_frame(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        self.submit(QueueType::Graphics, command_buffer)?;
        if let Some(last) = self.frame_submissions.last_mut() {
            last.presents = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(backend: &mut HeadlessBackend, size: u64) -> BufferHandle {
        backend
            .create_buffer(&BufferDescriptor {
                label: Some("test".into()),
                size,
                usage: BufferUsage::UNIFORM | BufferUsage::MAP_WRITE,
                mapped_at_creation: true,
            })
            .unwrap()
    }

    #[test]
    fn test_write_buffer_bounds() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let handle = buffer(&mut backend, 8);

        backend.write_buffer(handle, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.buffer_contents(handle).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);

        let err = backend.write_buffer(handle, 6, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, BackendError::BufferWriteOutOfRange { size: 8, .. }));
    }

    #[test]
    fn test_commands_are_captured_per_submission() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let cb = backend.create_command_buffer(QueueType::Compute).unwrap();

        assert_eq!(
            backend.acquire_frame().unwrap(),
            AcquireResult::Acquired { frame_index: 0 }
        );
        backend.begin_command_buffer(cb).unwrap();
        backend.begin_debug_label("Pass");
        backend.dispatch(2, 3, 1);
        backend.end_debug_label();
        backend.end_command_buffer().unwrap();
        backend.submit(QueueType::Compute, cb).unwrap();
        assert!(backend.present().unwrap());

        let frame = backend.last_frame();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].label(), Some("Pass"));
        assert_eq!(frame[0].dispatches(), vec![[2, 3, 1]]);
    }

    #[test]
    fn test_writes_between_present_and_acquire_are_counted() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let old = buffer(&mut backend, 4);
        backend.acquire_frame().unwrap();
        backend.write_buffer(old, 0, &[1]).unwrap();
        assert!(backend.present().unwrap());

        // Fresh buffers are not read by the frame in flight
        let fresh = buffer(&mut backend, 4);
        backend.write_buffer(fresh, 0, &[1]).unwrap();
        assert_eq!(backend.unfenced_buffer_writes(), 0);

        backend.write_buffer(old, 0, &[2]).unwrap();
        assert_eq!(backend.unfenced_buffer_writes(), 1);

        backend.wait_idle().unwrap();
        backend.write_buffer(old, 0, &[3]).unwrap();
        assert_eq!(backend.unfenced_buffer_writes(), 1);
    }

    #[test]
    fn test_requested_resize_is_reported_once() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        backend.request_resize(Extent2D::new(32, 16));

        assert_eq!(backend.acquire_frame().unwrap(), AcquireResult::NeedsResize);
        assert_eq!(backend.surface_extent(), Extent2D::new(32, 16));

        backend.recreate_swapchain(Extent2D::new(32, 16)).unwrap();
        assert!(matches!(
            backend.acquire_frame().unwrap(),
            AcquireResult::Acquired { .. }
        ));
    }

    #[test]
    fn test_dangling_views_are_detected() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let image = backend
            .create_image(&ImageCreateInfo {
                label: "img".into(),
                extent: Extent2D::new(4, 4),
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::TEXTURE_BINDING,
                image_type: ImageType::D2,
                mip_levels: 1,
                array_layers: 1,
            })
            .unwrap();
        let view = backend
            .create_image_view(
                image,
                &ImageViewDescriptor {
                    view_type: ImageType::D2,
                    base_mip_level: 0,
                    mip_level_count: 1,
                    base_array_layer: 0,
                    array_layer_count: 1,
                },
            )
            .unwrap();
        let layout = backend
            .create_descriptor_set_layout(&[DescriptorSetLayoutEntry {
                binding: 0,
                count: 1,
                ty: DescriptorType::CombinedImageSampler,
                visibility: ShaderStageFlags::FRAGMENT,
            }])
            .unwrap();
        let set = backend.allocate_descriptor_set(layout).unwrap();
        backend.update_descriptor_set(
            set,
            &[DescriptorWrite {
                binding: 0,
                ty: DescriptorType::CombinedImageSampler,
                resource: DescriptorResource::Images(vec![ImageDescriptorInfo {
                    view,
                    sampler: None,
                    layout: ImageLayout::ShaderReadOnly,
                }]),
            }],
        );
        assert!(backend.dangling_descriptor_views().is_empty());

        backend.destroy_image_view(view);
        assert_eq!(backend.dangling_descriptor_views(), vec![view]);
    }
}
