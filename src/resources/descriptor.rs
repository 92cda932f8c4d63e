//! Descriptor sets whose bindings reference resources by id

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{BufferId, GpuImage, ImageId, RendererResources};

/// What a binding points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingSource {
    Buffer(BufferId),
    Image(ImageId),
    /// The first `count` mip views of an image; missing slots repeat the last mip
    ImageMips { image: ImageId, count: u32 },
    /// A single layer of an array image
    ImageLayer { image: ImageId, layer: u32 },
    Images(Vec<ImageId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub source: BindingSource,
}

impl Binding {
    pub fn uniform(binding: u32, buffer: BufferId) -> Self {
        Self {
            binding,
            ty: DescriptorType::UniformBuffer,
            source: BindingSource::Buffer(buffer),
        }
    }

    pub fn storage_buffer(binding: u32, buffer: BufferId) -> Self {
        Self {
            binding,
            ty: DescriptorType::StorageBuffer,
            source: BindingSource::Buffer(buffer),
        }
    }

    pub fn sampled(binding: u32, image: ImageId) -> Self {
        Self {
            binding,
            ty: DescriptorType::CombinedImageSampler,
            source: BindingSource::Image(image),
        }
    }

    pub fn storage_image(binding: u32, image: ImageId) -> Self {
        Self {
            binding,
            ty: DescriptorType::StorageImage,
            source: BindingSource::Image(image),
        }
    }

    pub fn storage_mips(binding: u32, image: ImageId, count: u32) -> Self {
        Self {
            binding,
            ty: DescriptorType::StorageImage,
            source: BindingSource::ImageMips { image, count },
        }
    }

    /// Layout the shader reads the bound images in
    fn image_layout(&self) -> ImageLayout {
        match self.ty {
            DescriptorType::StorageImage => ImageLayout::General,
            _ => ImageLayout::ShaderReadOnly,
        }
    }
}

/// Depth targets and storage images are sampled in the layout they live in
fn read_layout(layout: ImageLayout, image: &GpuImage) -> ImageLayout {
    match (layout, image.final_layout()) {
        (ImageLayout::ShaderReadOnly, ImageLayout::DepthReadOnly) => ImageLayout::DepthReadOnly,
        (ImageLayout::ShaderReadOnly, ImageLayout::General) => ImageLayout::General,
        _ => layout,
    }
}

/// Resource referenced by a set, used to detect recreation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Buffer(BufferId),
    Image(ImageId),
}

/// Device descriptor set plus the bindings it was written from
#[derive(Debug)]
pub struct DescriptorSet {
    pub label: String,
    pub layout: DescriptorSetLayoutHandle,
    pub handle: DescriptorSetHandle,
    bindings: Vec<Binding>,
    snapshot: Vec<(ResourceRef, u64)>,
    last_writes: Vec<DescriptorWrite>,
}

impl DescriptorSet {
    pub fn allocate(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        layout: DescriptorSetLayoutHandle,
        bindings: Vec<Binding>,
    ) -> BackendResult<Self> {
        let handle = backend.allocate_descriptor_set(layout)?;
        Ok(Self {
            label: label.to_string(),
            layout,
            handle,
            bindings,
            snapshot: Vec::new(),
            last_writes: Vec::new(),
        })
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Insert or replace a binding; takes effect on the next update
    pub fn bind(&mut self, binding: Binding) {
        match self.bindings.iter_mut().find(|b| b.binding == binding.binding) {
            Some(existing) => *existing = binding,
            None => self.bindings.push(binding),
        }
    }

    pub fn last_writes(&self) -> &[DescriptorWrite] {
        &self.last_writes
    }

    fn references(&self) -> Vec<ResourceRef> {
        let mut refs = Vec::new();
        for binding in &self.bindings {
            match &binding.source {
                BindingSource::Buffer(id) => refs.push(ResourceRef::Buffer(*id)),
                BindingSource::Image(id)
                | BindingSource::ImageMips { image: id, .. }
                | BindingSource::ImageLayer { image: id, .. } => refs.push(ResourceRef::Image(*id)),
                BindingSource::Images(ids) => refs.extend(ids.iter().map(|id| ResourceRef::Image(*id))),
            }
        }
        refs
    }

    /// Resolve every binding against the current resources
    pub fn resolve(&self, resources: &RendererResources) -> BackendResult<Vec<DescriptorWrite>> {
        self.bindings
            .iter()
            .map(|binding| {
                let layout = binding.image_layout();
                let resource = match &binding.source {
                    BindingSource::Buffer(id) => {
                        let buffer = resources.try_buffer(*id).ok_or(BackendError::InvalidHandle("buffer id"))?;
                        DescriptorResource::Buffer {
                            buffer: buffer.handle,
                            offset: 0,
                            range: buffer.size,
                        }
                    }
                    BindingSource::Image(id) => {
                        let image = resources.try_image(*id).ok_or(BackendError::InvalidHandle("image id"))?;
                        DescriptorResource::Images(vec![image.descriptor_info(read_layout(layout, image))])
                    }
                    BindingSource::ImageMips { image, count } => {
                        let image = resources.try_image(*image).ok_or(BackendError::InvalidHandle("image id"))?;
                        let last = image.mip_levels().saturating_sub(1);
                        let infos = (0..*count)
                            .map(|level| {
                                let view = image
                                    .mip_view(level.min(last))
                                    .ok_or(BackendError::InvalidHandle("mip view"))?;
                                Ok(ImageDescriptorInfo {
                                    view,
                                    sampler: image.sampler(),
                                    layout,
                                })
                            })
                            .collect::<BackendResult<Vec<_>>>()?;
                        DescriptorResource::Images(infos)
                    }
                    BindingSource::ImageLayer { image, layer } => {
                        let image = resources.try_image(*image).ok_or(BackendError::InvalidHandle("image id"))?;
                        let view = image
                            .layer_view(*layer)
                            .ok_or(BackendError::InvalidHandle("layer view"))?;
                        DescriptorResource::Images(vec![ImageDescriptorInfo {
                            view,
                            sampler: image.sampler(),
                            layout: read_layout(layout, image),
                        }])
                    }
                    BindingSource::Images(ids) => DescriptorResource::Images(
                        ids.iter()
                            .map(|id| {
                                resources
                                    .try_image(*id)
                                    .map(|image| image.descriptor_info(read_layout(layout, image)))
                                    .ok_or(BackendError::InvalidHandle("image id"))
                            })
                            .collect::<BackendResult<Vec<_>>>()?,
                    ),
                };
                Ok(DescriptorWrite {
                    binding: binding.binding,
                    ty: binding.ty,
                    resource,
                })
            })
            .collect()
    }

    /// Current generation of every referenced resource
    pub(crate) fn generations(&self, resources: &RendererResources) -> Vec<(ResourceRef, u64)> {
        self.references()
            .into_iter()
            .map(|r| (r, resources.generation_of(r)))
            .collect()
    }

    /// Record the writes submitted to the device and the generations they saw
    pub(crate) fn commit(&mut self, writes: Vec<DescriptorWrite>, snapshot: Vec<(ResourceRef, u64)>) {
        self.snapshot = snapshot;
        self.last_writes = writes;
    }

    /// True if the set was never written or a referenced resource was recreated since
    pub fn is_stale(&self, resources: &RendererResources) -> bool {
        if self.bindings.is_empty() {
            return false;
        }
        let refs = self.references();
        refs.len() != self.snapshot.len()
            || refs
                .iter()
                .zip(&self.snapshot)
                .any(|(r, (seen, generation))| r != seen || resources.generation_of(*r) != *generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::resources::image::{ImageDescription, MipLevels};
    use crate::resources::GpuBuffer;

    fn storage_layout(backend: &mut HeadlessBackend) -> DescriptorSetLayoutHandle {
        backend
            .create_descriptor_set_layout(&[
                DescriptorSetLayoutEntry {
                    binding: 0,
                    count: 1,
                    ty: DescriptorType::UniformBuffer,
                    visibility: ShaderStageFlags::COMPUTE,
                },
                DescriptorSetLayoutEntry {
                    binding: 1,
                    count: 8,
                    ty: DescriptorType::StorageImage,
                    visibility: ShaderStageFlags::COMPUTE,
                },
            ])
            .unwrap()
    }

    #[test]
    fn test_unused_mip_slots_repeat_last_mip() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let image = resources
            .create_image(
                &mut backend,
                ImageDescription::storage("down", Extent2D::new(4, 4), TextureFormat::Rgba16Float)
                    .with_mips(MipLevels::FullChain { min: 2, drop: 0 }),
            )
            .unwrap();
        let layout = storage_layout(&mut backend);
        let set = DescriptorSet::allocate(
            &mut backend,
            "bloom",
            layout,
            vec![Binding::storage_mips(1, image, 8)],
        )
        .unwrap();

        let writes = set.resolve(&resources).unwrap();
        let DescriptorResource::Images(infos) = &writes[0].resource else {
            panic!("expected images");
        };
        assert_eq!(infos.len(), 8);
        let last = resources.image(image).mip_view(2).unwrap();
        assert!(infos[2..].iter().all(|info| info.view == last));
        assert!(infos.iter().all(|info| info.layout == ImageLayout::General));
    }

    #[test]
    fn test_staleness_follows_generations() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let buffer = resources.add_buffer(GpuBuffer::uniform::<[f32; 4]>(&mut backend, "params").unwrap());
        let image = resources
            .create_image(
                &mut backend,
                ImageDescription::storage("ssao", Extent2D::new(16, 16), TextureFormat::Rgba8Unorm),
            )
            .unwrap();
        let layout = storage_layout(&mut backend);
        let set = DescriptorSet::allocate(
            &mut backend,
            "ssao",
            layout,
            vec![Binding::uniform(0, buffer), Binding::storage_image(1, image)],
        )
        .unwrap();
        let set = resources.add_descriptor_set(set);
        assert!(resources.descriptor_set(set).is_stale(&resources));

        resources.update_descriptor_set(set, &mut backend).unwrap();
        assert!(!resources.descriptor_set(set).is_stale(&resources));

        resources
            .image_mut(image)
            .recreate(&mut backend, Extent2D::new(8, 8), MipLevels::Fixed(1))
            .unwrap();
        assert!(resources.descriptor_set(set).is_stale(&resources));
        assert_eq!(backend.dangling_descriptor_views().len(), 1);

        resources.update_descriptor_set(set, &mut backend).unwrap();
        assert!(!resources.descriptor_set(set).is_stale(&resources));
        assert!(backend.dangling_descriptor_views().is_empty());
    }
}
