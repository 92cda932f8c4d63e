//! GPU images with their views, sampler and optional descriptor set

use crate::backend::traits::*;
use crate::backend::types::*;

/// Number of mips in a full chain down to 1x1
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    32 - largest.leading_zeros()
}

/// Extent of mip `level`, never smaller than one texel
pub fn mip_extent(extent: Extent2D, level: u32) -> Extent2D {
    Extent2D {
        width: (extent.width >> level).max(1),
        height: (extent.height >> level).max(1),
    }
}

/// Mip policy, re-evaluated whenever an image is recreated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipLevels {
    Fixed(u32),
    /// Full chain for the extent, raised to at least `min`, then minus `drop`
    FullChain { min: u32, drop: u32 },
}

impl Default for MipLevels {
    fn default() -> Self {
        MipLevels::Fixed(1)
    }
}

impl MipLevels {
    pub fn resolve(&self, extent: Extent2D) -> u32 {
        match *self {
            MipLevels::Fixed(count) => count.max(1),
            MipLevels::FullChain { min, drop } => mip_level_count(extent.width, extent.height)
                .max(min)
                .saturating_sub(drop)
                .max(1),
        }
    }
}

/// Everything needed to (re)create a [`GpuImage`]
#[derive(Debug, Clone)]
pub struct ImageDescription {
    pub label: String,
    pub extent: Extent2D,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub image_type: ImageType,
    pub mip_levels: MipLevels,
    pub array_layers: u32,
    /// Layout the image is expected in when passes read it
    pub final_layout: ImageLayout,
    pub transition_layout_at_create: bool,
    pub sampler: Option<SamplerDescriptor>,
    /// Allocate a single-binding sampled-image set for this image
    pub create_descriptor_set: bool,
    pub mip_views: bool,
    pub layer_views: bool,
}

impl ImageDescription {
    pub fn new(label: &str, extent: Extent2D, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: label.to_string(),
            extent,
            format,
            usage,
            image_type: ImageType::D2,
            mip_levels: MipLevels::Fixed(1),
            array_layers: 1,
            final_layout: ImageLayout::ShaderReadOnly,
            transition_layout_at_create: false,
            sampler: None,
            create_descriptor_set: false,
            mip_views: false,
            layer_views: false,
        }
    }

    /// Sampled storage image written by a compute pass, kept in GENERAL layout
    pub fn storage(label: &str, extent: Extent2D, format: TextureFormat) -> Self {
        Self::new(
            label,
            extent,
            format,
            TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
        )
        .with_final_layout(ImageLayout::General)
        .with_transition_at_create()
        .with_sampler(SamplerDescriptor {
            address_mode: AddressMode::ClampToEdge,
            ..Default::default()
        })
    }

    pub fn cube(mut self) -> Self {
        self.image_type = ImageType::Cube;
        self.array_layers = 6;
        self
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        self.image_type = ImageType::D2Array;
        self.array_layers = layers;
        self.layer_views = true;
        self
    }

    pub fn with_mips(mut self, mip_levels: MipLevels) -> Self {
        self.mip_levels = mip_levels;
        self.mip_views = true;
        self
    }

    pub fn with_final_layout(mut self, layout: ImageLayout) -> Self {
        self.final_layout = layout;
        self
    }

    pub fn with_transition_at_create(mut self) -> Self {
        self.transition_layout_at_create = true;
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerDescriptor) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn with_descriptor_set(mut self) -> Self {
        self.create_descriptor_set = true;
        if self.sampler.is_none() {
            self.sampler = Some(SamplerDescriptor::default());
        }
        self
    }
}

/// A device image owned together with its views
#[derive(Debug)]
pub struct GpuImage {
    desc: ImageDescription,
    pub handle: ImageHandle,
    pub view: ImageViewHandle,
    mip_views: Vec<ImageViewHandle>,
    layer_views: Vec<ImageViewHandle>,
    sampler: Option<SamplerHandle>,
    descriptor_set: Option<DescriptorSetHandle>,
    mip_count: u32,
    /// Bumped every time the image is recreated
    pub generation: u64,
}

impl GpuImage {
    /// Create the image; `sampled_layout` is used when a descriptor set is requested
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        desc: ImageDescription,
        sampled_layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<Self> {
        let sampler = desc
            .sampler
            .as_ref()
            .map(|s| backend.create_sampler(s))
            .transpose()?;
        let mut image = Self {
            desc,
            handle: ImageHandle(0),
            view: ImageViewHandle(0),
            mip_views: Vec::new(),
            layer_views: Vec::new(),
            sampler,
            descriptor_set: None,
            mip_count: 1,
            generation: 0,
        };
        image.allocate(backend)?;
        if image.desc.create_descriptor_set {
            image.descriptor_set = Some(backend.allocate_descriptor_set(sampled_layout)?);
        }
        image.write_descriptor_set(backend);
        Ok(image)
    }

    fn allocate(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let desc = &self.desc;
        self.mip_count = desc.mip_levels.resolve(desc.extent);
        self.handle = backend.create_image(&ImageCreateInfo {
            label: desc.label.clone(),
            extent: desc.extent,
            format: desc.format,
            usage: desc.usage,
            image_type: desc.image_type,
            mip_levels: self.mip_count,
            array_layers: desc.array_layers,
        })?;

        self.view = backend.create_image_view(
            self.handle,
            &ImageViewDescriptor {
                view_type: desc.image_type,
                base_mip_level: 0,
                mip_level_count: self.mip_count,
                base_array_layer: 0,
                array_layer_count: desc.array_layers,
            },
        )?;

        self.mip_views.clear();
        if desc.mip_views {
            // Storage writes address cube faces as array layers
            let view_type = match desc.image_type {
                ImageType::D2 => ImageType::D2,
                ImageType::D2Array | ImageType::Cube => ImageType::D2Array,
            };
            for level in 0..self.mip_count {
                self.mip_views.push(backend.create_image_view(
                    self.handle,
                    &ImageViewDescriptor {
                        view_type,
                        base_mip_level: level,
                        mip_level_count: 1,
                        base_array_layer: 0,
                        array_layer_count: desc.array_layers,
                    },
                )?);
            }
        }

        self.layer_views.clear();
        if desc.layer_views {
            for layer in 0..desc.array_layers {
                self.layer_views.push(backend.create_image_view(
                    self.handle,
                    &ImageViewDescriptor {
                        view_type: ImageType::D2,
                        base_mip_level: 0,
                        mip_level_count: 1,
                        base_array_layer: layer,
                        array_layer_count: 1,
                    },
                )?);
            }
        }

        if desc.transition_layout_at_create {
            backend.transition_image_layout(
                self.handle,
                &ImageTransition {
                    old_layout: ImageLayout::Undefined,
                    new_layout: desc.final_layout,
                    mip_levels: self.mip_count,
                    array_layers: desc.array_layers,
                },
            )?;
        }
        Ok(())
    }

    fn write_descriptor_set(&self, backend: &mut dyn GraphicsBackend) {
        if let Some(set) = self.descriptor_set {
            backend.update_descriptor_set(
                set,
                &[DescriptorWrite {
                    binding: 0,
                    ty: DescriptorType::CombinedImageSampler,
                    resource: DescriptorResource::Images(vec![
                        self.descriptor_info(self.desc.final_layout)
                    ]),
                }],
            );
        }
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for view in self.mip_views.drain(..).chain(self.layer_views.drain(..)) {
            backend.destroy_image_view(view);
        }
        backend.destroy_image_view(self.view);
        backend.destroy_image(self.handle);
    }

    /// Destroy and recreate the image wholesale at a new extent
    ///
    /// The per-image descriptor set keeps its handle and is rewritten to the
    /// new view.
    pub fn recreate(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        extent: Extent2D,
        mip_levels: MipLevels,
    ) -> BackendResult<()> {
        self.release(backend);
        self.desc.extent = extent;
        self.desc.mip_levels = mip_levels;
        self.allocate(backend)?;
        self.generation += 1;
        self.write_descriptor_set(backend);
        log::debug!(
            "Recreated image '{}' at {}x{} ({} mips)",
            self.desc.label,
            extent.width,
            extent.height,
            self.mip_count
        );
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release(backend);
        if let Some(sampler) = self.sampler.take() {
            backend.destroy_sampler(sampler);
        }
    }

    pub fn description(&self) -> &ImageDescription {
        &self.desc
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn extent(&self) -> Extent2D {
        self.desc.extent
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_count
    }

    pub fn array_layers(&self) -> u32 {
        self.desc.array_layers
    }

    pub fn final_layout(&self) -> ImageLayout {
        self.desc.final_layout
    }

    pub fn mip_view(&self, level: u32) -> Option<ImageViewHandle> {
        self.mip_views.get(level as usize).copied()
    }

    pub fn layer_view(&self, layer: u32) -> Option<ImageViewHandle> {
        self.layer_views.get(layer as usize).copied()
    }

    pub fn sampler(&self) -> Option<SamplerHandle> {
        self.sampler
    }

    pub fn descriptor_set(&self) -> Option<DescriptorSetHandle> {
        self.descriptor_set
    }

    pub fn descriptor_info(&self, layout: ImageLayout) -> ImageDescriptorInfo {
        ImageDescriptorInfo {
            view: self.view,
            sampler: self.sampler,
            layout,
        }
    }

    /// Barrier covering every mip and layer of the image
    pub fn barrier(
        &self,
        src_access: AccessFlags,
        dst_access: AccessFlags,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> ImageBarrier {
        ImageBarrier {
            image: self.handle,
            src_access,
            dst_access,
            old_layout,
            new_layout,
            base_mip_level: 0,
            mip_level_count: self.mip_count,
            array_layer_count: self.desc.array_layers,
            depth: self.desc.format.is_depth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1, 1)]
    #[case(2, 1, 2)]
    #[case(1920, 1080, 11)]
    #[case(960, 540, 10)]
    #[case(0, 0, 1)]
    fn test_mip_level_count(#[case] width: u32, #[case] height: u32, #[case] expected: u32) {
        assert_eq!(mip_level_count(width, height), expected);
    }

    #[rstest]
    #[case(Extent2D::new(960, 540), 10, 9)]
    #[case(Extent2D::new(1, 1), 2, 1)]
    #[case(Extent2D::new(2, 2), 2, 1)]
    fn test_full_chain_policy(#[case] extent: Extent2D, #[case] down: u32, #[case] up: u32) {
        assert_eq!(MipLevels::FullChain { min: 2, drop: 0 }.resolve(extent), down);
        assert_eq!(MipLevels::FullChain { min: 2, drop: 1 }.resolve(extent), up);
    }

    #[test]
    fn test_mip_extent_clamps_to_one() {
        assert_eq!(mip_extent(Extent2D::new(8, 2), 2), Extent2D::new(2, 1));
        assert_eq!(mip_extent(Extent2D::new(8, 2), 10), Extent2D::new(1, 1));
    }

    #[test]
    fn test_recreate_rewrites_own_descriptor_set() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let layout = backend
            .create_descriptor_set_layout(&[DescriptorSetLayoutEntry {
                binding: 0,
                count: 1,
                ty: DescriptorType::CombinedImageSampler,
                visibility: ShaderStageFlags::FRAGMENT,
            }])
            .unwrap();
        let desc = ImageDescription::storage("bloom", Extent2D::new(32, 16), TextureFormat::Rgba16Float)
            .with_mips(MipLevels::FullChain { min: 2, drop: 0 })
            .with_descriptor_set();
        let mut image = GpuImage::create(&mut backend, desc, layout).unwrap();
        assert_eq!(image.mip_levels(), 6);
        assert!(image.mip_view(5).is_some());

        image
            .recreate(&mut backend, Extent2D::new(8, 8), MipLevels::FullChain { min: 2, drop: 0 })
            .unwrap();
        assert_eq!(image.generation, 1);
        assert_eq!(image.mip_levels(), 4);
        assert!(image.mip_view(4).is_none());
        assert!(backend.dangling_descriptor_views().is_empty());
        assert_eq!(backend.live_image_count(), 1);
    }

    #[test]
    fn test_layer_views_per_cascade() {
        let mut backend = HeadlessBackend::new(Extent2D::new(64, 64));
        let layout = backend.create_descriptor_set_layout(&[]).unwrap();
        let desc = ImageDescription::new(
            "shadow",
            Extent2D::new(512, 512),
            TextureFormat::Depth32Float,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        )
        .with_layers(4);
        let image = GpuImage::create(&mut backend, desc, layout).unwrap();
        assert!(image.layer_view(3).is_some());
        assert!(image.layer_view(4).is_none());
        assert!(image.barrier(AccessFlags::empty(), AccessFlags::SHADER_READ, ImageLayout::Undefined, ImageLayout::ShaderReadOnly).depth);
    }
}
