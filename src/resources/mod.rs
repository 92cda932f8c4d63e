//! Resource management
//!
//! [`RendererResources`] owns every buffer, image, descriptor set, pipeline and
//! framebuffer the renderer creates. Everything else refers to them through
//! small copyable ids, which stay valid when the underlying device objects
//! are recreated on resize.

mod buffer;
mod descriptor;
mod framebuffer;
mod image;
mod material;
mod mesh;
mod pool;
mod texture;

pub use buffer::*;
pub use descriptor::*;
pub use framebuffer::*;
pub use image::*;
pub use material::*;
pub use mesh::*;
pub use pool::*;
pub use texture::*;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::Pipeline;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }
    };
}

resource_id!(
    /// Index into the buffer table
    BufferId
);
resource_id!(
    /// Index into the image table
    ImageId
);
resource_id!(
    /// Index into the descriptor set table
    DescriptorSetId
);
resource_id!(
    /// Index into the pipeline table
    PipelineId
);
resource_id!(
    /// Index into the framebuffer table
    FramebufferId
);

/// Owner of all renderer GPU resources
pub struct RendererResources {
    buffers: Vec<GpuBuffer>,
    images: Vec<GpuImage>,
    descriptor_sets: Vec<DescriptorSet>,
    pipelines: Vec<Pipeline>,
    framebuffers: Vec<Framebuffer>,
    sampled_image_layout: DescriptorSetLayoutHandle,
}

impl RendererResources {
    pub fn new(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        let sampled_image_layout = backend.create_descriptor_set_layout(&[DescriptorSetLayoutEntry {
            binding: 0,
            count: 1,
            ty: DescriptorType::CombinedImageSampler,
            visibility: ShaderStageFlags::FRAGMENT,
        }])?;
        Ok(Self {
            buffers: Vec::new(),
            images: Vec::new(),
            descriptor_sets: Vec::new(),
            pipelines: Vec::new(),
            framebuffers: Vec::new(),
            sampled_image_layout,
        })
    }

    /// Layout of the single-image sets created with [`ImageDescription::with_descriptor_set`]
    pub fn sampled_image_layout(&self) -> DescriptorSetLayoutHandle {
        self.sampled_image_layout
    }

    // Buffers

    pub fn add_buffer(&mut self, buffer: GpuBuffer) -> BufferId {
        self.buffers.push(buffer);
        BufferId(self.buffers.len() as u32 - 1)
    }

    pub fn buffer(&self, id: BufferId) -> &GpuBuffer {
        &self.buffers[id.index()]
    }

    pub fn try_buffer(&self, id: BufferId) -> Option<&GpuBuffer> {
        self.buffers.get(id.index())
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut GpuBuffer {
        &mut self.buffers[id.index()]
    }

    // Images

    pub fn create_image(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        desc: ImageDescription,
    ) -> BackendResult<ImageId> {
        let image = GpuImage::create(backend, desc, self.sampled_image_layout)?;
        Ok(self.add_image(image))
    }

    pub fn add_image(&mut self, image: GpuImage) -> ImageId {
        self.images.push(image);
        ImageId(self.images.len() as u32 - 1)
    }

    pub fn image(&self, id: ImageId) -> &GpuImage {
        &self.images[id.index()]
    }

    pub fn try_image(&self, id: ImageId) -> Option<&GpuImage> {
        self.images.get(id.index())
    }

    pub fn image_mut(&mut self, id: ImageId) -> &mut GpuImage {
        &mut self.images[id.index()]
    }

    // Descriptor sets

    pub fn add_descriptor_set(&mut self, set: DescriptorSet) -> DescriptorSetId {
        self.descriptor_sets.push(set);
        DescriptorSetId(self.descriptor_sets.len() as u32 - 1)
    }

    pub fn descriptor_set(&self, id: DescriptorSetId) -> &DescriptorSet {
        &self.descriptor_sets[id.index()]
    }

    pub fn descriptor_set_mut(&mut self, id: DescriptorSetId) -> &mut DescriptorSet {
        &mut self.descriptor_sets[id.index()]
    }

    /// Re-resolve a set's bindings and submit them to the device
    pub fn update_descriptor_set(
        &mut self,
        id: DescriptorSetId,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        let set = &self.descriptor_sets[id.index()];
        let writes = set.resolve(self)?;
        let snapshot = set.generations(self);
        backend.update_descriptor_set(set.handle, &writes);
        self.descriptor_sets[id.index()].commit(writes, snapshot);
        Ok(())
    }

    /// Labels of the given sets that reference recreated resources
    pub fn stale_descriptor_sets(&self, ids: &[DescriptorSetId]) -> Vec<&str> {
        ids.iter()
            .map(|id| self.descriptor_set(*id))
            .filter(|set| set.is_stale(self))
            .map(|set| set.label.as_str())
            .collect()
    }

    pub fn generation_of(&self, resource: ResourceRef) -> u64 {
        match resource {
            ResourceRef::Buffer(id) => self.try_buffer(id).map_or(u64::MAX, |b| b.generation),
            ResourceRef::Image(id) => self.try_image(id).map_or(u64::MAX, |i| i.generation),
        }
    }

    // Pipelines

    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> PipelineId {
        self.pipelines.push(pipeline);
        PipelineId(self.pipelines.len() as u32 - 1)
    }

    pub fn pipeline(&self, id: PipelineId) -> &Pipeline {
        &self.pipelines[id.index()]
    }

    // Framebuffers

    /// Create a framebuffer, allocating its owned attachment images at the framebuffer extent
    pub fn create_framebuffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        desc: FramebufferDescription,
    ) -> BackendResult<FramebufferId> {
        let mut images = Vec::with_capacity(desc.attachments.len());
        for attachment in &desc.attachments {
            let image = match attachment {
                AttachmentSource::Owned(image_desc) => {
                    let mut image_desc = image_desc.clone();
                    image_desc.extent = desc.extent;
                    self.create_image(backend, image_desc)?
                }
                AttachmentSource::ImageLayer { image, .. } => *image,
            };
            images.push(image);
        }
        let views = self.attachment_views(&desc, &images)?;
        let handle = backend.create_framebuffer(desc.render_pass, &views, desc.extent)?;
        self.framebuffers.push(Framebuffer {
            desc,
            handle,
            images,
            generation: 0,
        });
        Ok(FramebufferId(self.framebuffers.len() as u32 - 1))
    }

    fn attachment_views(
        &self,
        desc: &FramebufferDescription,
        images: &[ImageId],
    ) -> BackendResult<Vec<ImageViewHandle>> {
        desc.attachments
            .iter()
            .zip(images)
            .map(|(source, image)| match source {
                AttachmentSource::Owned(_) => Ok(self.image(*image).view),
                AttachmentSource::ImageLayer { layer, .. } => self
                    .image(*image)
                    .layer_view(*layer)
                    .ok_or(BackendError::InvalidHandle("layer view")),
            })
            .collect()
    }

    /// Recreate a framebuffer and its owned images at a new extent
    pub fn resize_framebuffer(
        &mut self,
        id: FramebufferId,
        backend: &mut dyn GraphicsBackend,
        extent: Extent2D,
    ) -> BackendResult<()> {
        let owned: Vec<ImageId> = self.framebuffer(id).owned_images().collect();
        self.framebuffer(id).destroy(backend);
        for image in owned {
            let mip_levels = self.image(image).description().mip_levels;
            self.image_mut(image).recreate(backend, extent, mip_levels)?;
        }

        let framebuffer = &self.framebuffers[id.index()];
        let views = self.attachment_views(&framebuffer.desc, &framebuffer.images)?;
        let handle = backend.create_framebuffer(framebuffer.desc.render_pass, &views, extent)?;

        let framebuffer = &mut self.framebuffers[id.index()];
        framebuffer.handle = handle;
        framebuffer.desc.extent = extent;
        framebuffer.generation += 1;
        log::debug!(
            "Recreated framebuffer '{}' at {}x{}",
            framebuffer.desc.label,
            extent.width,
            extent.height
        );
        Ok(())
    }

    pub fn framebuffer(&self, id: FramebufferId) -> &Framebuffer {
        &self.framebuffers[id.index()]
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Destroy every device object owned by the tables
    pub fn destroy_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for framebuffer in self.framebuffers.drain(..) {
            framebuffer.destroy(backend);
        }
        for mut image in self.images.drain(..) {
            image.destroy(backend);
        }
        for buffer in self.buffers.drain(..) {
            buffer.destroy(backend);
        }
        self.descriptor_sets.clear();
        self.pipelines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    fn depth_pass(backend: &mut HeadlessBackend) -> RenderPassHandle {
        backend
            .create_render_pass(&RenderPassLayout {
                label: "depth".into(),
                color_attachments: vec![],
                depth_attachment: Some(AttachmentDescription {
                    format: TextureFormat::Depth32Float,
                    load_op: LoadOp::Clear,
                    final_layout: ImageLayout::ShaderReadOnly,
                }),
            })
            .unwrap()
    }

    #[test]
    fn test_owned_attachments_follow_framebuffer_extent() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let render_pass = depth_pass(&mut backend);
        let fb = resources
            .create_framebuffer(
                &mut backend,
                FramebufferDescription {
                    label: "Depth".into(),
                    render_pass,
                    attachments: vec![AttachmentSource::Owned(ImageDescription::new(
                        "depth",
                        Extent2D::default(),
                        TextureFormat::Depth32Float,
                        TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                    ))],
                    extent: Extent2D::new(64, 64),
                    extent_source: Some(ExtentSource::FULL),
                },
            )
            .unwrap();
        let depth = resources.framebuffer(fb).image(0).unwrap();
        assert_eq!(resources.image(depth).extent(), Extent2D::new(64, 64));

        resources
            .resize_framebuffer(fb, &mut backend, Extent2D::new(32, 16))
            .unwrap();
        assert_eq!(resources.image(depth).extent(), Extent2D::new(32, 16));
        assert_eq!(resources.image(depth).generation, 1);
        assert_eq!(resources.framebuffer(fb).generation, 1);
    }

    #[test]
    fn test_layer_attachments_are_not_owned() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let render_pass = depth_pass(&mut backend);
        let shadow = resources
            .create_image(
                &mut backend,
                ImageDescription::new(
                    "shadow",
                    Extent2D::new(256, 256),
                    TextureFormat::Depth32Float,
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                )
                .with_layers(4),
            )
            .unwrap();
        let fb = resources
            .create_framebuffer(
                &mut backend,
                FramebufferDescription {
                    label: "Cascade 2".into(),
                    render_pass,
                    attachments: vec![AttachmentSource::ImageLayer { image: shadow, layer: 2 }],
                    extent: Extent2D::new(256, 256),
                    extent_source: None,
                },
            )
            .unwrap();
        assert_eq!(resources.framebuffer(fb).owned_images().count(), 0);
        assert_eq!(resources.framebuffer(fb).image(0), Some(shadow));

        resources.destroy_all(&mut backend);
        assert_eq!(backend.live_image_count(), 0);
    }
}
