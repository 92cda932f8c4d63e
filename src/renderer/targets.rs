//! Render targets of the frame and the pools that resize them

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::atmosphere::{ATMOSPHERE_CUBE_SIZE, ATMOSPHERE_FORMAT};
use crate::pipeline::bloom::{BLOOM_FORMAT, DOWNSAMPLE_MIPS, UPSAMPLE_MIPS};
use crate::pipeline::composite::COMPOSITE_FORMAT;
use crate::pipeline::depth_prepass::NORMAL_FORMAT;
use crate::pipeline::dof::DOF_FORMAT;
use crate::pipeline::pbr::{DEPTH_FORMAT, PBR_COLOR_FORMAT};
use crate::pipeline::post_process::POST_PROCESS_FORMAT;
use crate::pipeline::shadow::{SHADOW_FORMAT, SHADOW_MAP_CASCADE_COUNT};
use crate::pipeline::ssao::SSAO_FORMAT;
use crate::pipeline::ssr::SSR_FORMAT;
use crate::renderer::bindings::RendererSets;
use crate::renderer::pipelines::{render_pass_of, RendererPipelines};
use crate::resources::*;

fn clamped() -> SamplerDescriptor {
    SamplerDescriptor {
        address_mode: AddressMode::ClampToEdge,
        ..Default::default()
    }
}

/// Attachment sampled by later passes
fn sampled_attachment(label: &str, format: TextureFormat, final_layout: ImageLayout) -> AttachmentSource {
    AttachmentSource::Owned(
        ImageDescription::new(
            label,
            Extent2D::default(),
            format,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        )
        .with_final_layout(final_layout)
        .with_sampler(clamped()),
    )
}

#[derive(Debug, Clone)]
pub struct RenderTargets {
    pub depth_normal: FramebufferId,
    pub normal: ImageId,
    pub depth: ImageId,
    /// Cascade depth layers, one framebuffer per layer
    pub shadow_map: ImageId,
    pub shadow_cascades: Vec<FramebufferId>,
    pub shadow_size: u32,
    pub pbr: FramebufferId,
    pub pbr_color: ImageId,
    pub post_process: FramebufferId,
    pub post_process_color: ImageId,
    pub ssao: ImageId,
    pub ssao_blur: ImageId,
    pub ssr: ImageId,
    pub bloom_downsample: ImageId,
    pub bloom_upsample: ImageId,
    pub dof: ImageId,
    pub composite: ImageId,
    pub atmosphere: ImageId,
}

impl RenderTargets {
    pub fn create(
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        pipelines: &RendererPipelines,
        extent: Extent2D,
        shadow_size: u32,
    ) -> BackendResult<Self> {
        let depth_normal = resources.create_framebuffer(
            backend,
            FramebufferDescription {
                label: "Depth Normal".into(),
                render_pass: render_pass_of(resources, pipelines.depth_prepass)?,
                attachments: vec![
                    sampled_attachment("Normal", NORMAL_FORMAT, ImageLayout::ShaderReadOnly),
                    sampled_attachment("Depth", DEPTH_FORMAT, ImageLayout::DepthReadOnly),
                ],
                extent,
                extent_source: Some(ExtentSource::FULL),
            },
        )?;

        let shadow_extent = Extent2D::new(shadow_size, shadow_size);
        let shadow_map = resources.create_image(
            backend,
            ImageDescription::new(
                "Direct Shadow Map",
                shadow_extent,
                SHADOW_FORMAT,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            )
            .with_layers(SHADOW_MAP_CASCADE_COUNT as u32)
            .with_final_layout(ImageLayout::ShaderReadOnly)
            .with_transition_at_create()
            .with_sampler(clamped()),
        )?;
        let shadow_pass = render_pass_of(resources, pipelines.shadow)?;
        let shadow_cascades = (0..SHADOW_MAP_CASCADE_COUNT as u32)
            .map(|layer| {
                resources.create_framebuffer(
                    backend,
                    FramebufferDescription {
                        label: format!("Shadow Cascade {}", layer),
                        render_pass: shadow_pass,
                        attachments: vec![AttachmentSource::ImageLayer {
                            image: shadow_map,
                            layer,
                        }],
                        extent: shadow_extent,
                        extent_source: None,
                    },
                )
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let pbr = resources.create_framebuffer(
            backend,
            FramebufferDescription {
                label: "PBR".into(),
                render_pass: render_pass_of(resources, pipelines.pbr)?,
                attachments: vec![
                    sampled_attachment("PBR Color", PBR_COLOR_FORMAT, ImageLayout::ShaderReadOnly),
                    AttachmentSource::Owned(
                        ImageDescription::new(
                            "PBR Depth",
                            Extent2D::default(),
                            DEPTH_FORMAT,
                            TextureUsage::RENDER_ATTACHMENT,
                        )
                        .with_final_layout(ImageLayout::DepthStencilAttachment),
                    ),
                ],
                extent,
                extent_source: Some(ExtentSource::FULL),
            },
        )?;

        let post_process = resources.create_framebuffer(
            backend,
            FramebufferDescription {
                label: "Post Process".into(),
                render_pass: render_pass_of(resources, pipelines.post_process)?,
                attachments: vec![sampled_attachment(
                    "Final Image",
                    POST_PROCESS_FORMAT,
                    ImageLayout::ShaderReadOnly,
                )],
                extent,
                extent_source: Some(ExtentSource::FULL),
            },
        )?;

        let attachment = |resources: &RendererResources, framebuffer: FramebufferId, index: usize| {
            resources
                .framebuffer(framebuffer)
                .image(index)
                .ok_or(BackendError::InvalidHandle("framebuffer attachment"))
        };
        let normal = attachment(resources, depth_normal, 0)?;
        let depth = attachment(resources, depth_normal, 1)?;
        let pbr_color = attachment(resources, pbr, 0)?;
        let post_process_color = attachment(resources, post_process, 0)?;

        let ssao = resources.create_image(backend, ImageDescription::storage("SSAO", extent, SSAO_FORMAT))?;
        let ssao_blur =
            resources.create_image(backend, ImageDescription::storage("SSAO Blur", extent, SSAO_FORMAT))?;
        let ssr = resources.create_image(
            backend,
            ImageDescription::storage("SSR", extent, SSR_FORMAT).with_sampler(SamplerDescriptor {
                address_mode: AddressMode::ClampToBorder,
                border_color: BorderColor::TransparentBlack,
                ..Default::default()
            }),
        )?;

        let half = ExtentSource::HALF.resolve(extent);
        let bloom_sampler = SamplerDescriptor {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
            ..Default::default()
        };
        let bloom_downsample = resources.create_image(
            backend,
            ImageDescription::storage("Bloom Downsample", half, BLOOM_FORMAT)
                .with_mips(DOWNSAMPLE_MIPS)
                .with_sampler(bloom_sampler),
        )?;
        let bloom_upsample = resources.create_image(
            backend,
            ImageDescription::storage("Bloom Upsample", half, BLOOM_FORMAT)
                .with_mips(UPSAMPLE_MIPS)
                .with_sampler(bloom_sampler),
        )?;

        let dof = resources.create_image(backend, ImageDescription::storage("Depth of Field", extent, DOF_FORMAT))?;
        let composite =
            resources.create_image(backend, ImageDescription::storage("Composite", extent, COMPOSITE_FORMAT))?;
        let atmosphere = resources.create_image(
            backend,
            ImageDescription::storage(
                "Atmosphere",
                Extent2D::new(ATMOSPHERE_CUBE_SIZE, ATMOSPHERE_CUBE_SIZE),
                ATMOSPHERE_FORMAT,
            )
            .cube()
            .with_mips(MipLevels::Fixed(1)),
        )?;

        log::debug!(
            "Created render targets at {}x{}, shadow map {}",
            extent.width,
            extent.height,
            shadow_size
        );
        Ok(Self {
            depth_normal,
            normal,
            depth,
            shadow_map,
            shadow_cascades,
            shadow_size,
            pbr,
            pbr_color,
            post_process,
            post_process_color,
            ssao,
            ssao_blur,
            ssr,
            bloom_downsample,
            bloom_upsample,
            dof,
            composite,
            atmosphere,
        })
    }

    /// Register every target with the pool that resizes it
    ///
    /// Each callback re-resolves the descriptor sets reading that target.
    pub fn pools(&self, sets: &RendererSets) -> RenderPools {
        let mut framebuffers = FramebufferPool::new();
        framebuffers.add_to_pool(
            self.depth_normal,
            Some(rewire(vec![sets.light_culling, sets.ssao, sets.ssr, sets.dof])),
        );
        for cascade in &self.shadow_cascades {
            framebuffers.add_to_pool(*cascade, None);
        }
        framebuffers.add_to_pool(self.pbr, Some(rewire(vec![sets.ssr, sets.dof, sets.bloom])));
        framebuffers.add_to_pool(self.post_process, Some(rewire(vec![sets.quad])));

        let mut images = ImagePool::new();
        let full = Some(ExtentSource::FULL);
        let single = MipLevels::Fixed(1);
        images.add_to_pool(self.ssao, full, Some(rewire(vec![sets.ssao, sets.ssao_blur])), single);
        images.add_to_pool(self.ssao_blur, full, Some(rewire(vec![sets.ssao_blur, sets.composite])), single);
        images.add_to_pool(self.ssr, full, Some(rewire(vec![sets.ssr, sets.composite])), single);
        images.add_to_pool(
            self.bloom_downsample,
            Some(ExtentSource::HALF),
            Some(rewire(vec![sets.bloom])),
            DOWNSAMPLE_MIPS,
        );
        images.add_to_pool(
            self.bloom_upsample,
            Some(ExtentSource::HALF),
            Some(rewire(vec![sets.bloom, sets.composite])),
            UPSAMPLE_MIPS,
        );
        images.add_to_pool(self.dof, full, Some(rewire(vec![sets.dof, sets.composite])), single);
        images.add_to_pool(self.composite, full, Some(rewire(vec![sets.composite, sets.post_process])), single);
        images.add_to_pool(
            self.atmosphere,
            None,
            Some(rewire(vec![sets.atmosphere, sets.atmosphere_skybox])),
            single,
        );
        images.add_to_pool(self.shadow_map, None, Some(rewire(vec![sets.pbr])), single);

        RenderPools { framebuffers, images }
    }
}

/// Window-sized resources, resized framebuffers first
pub struct RenderPools {
    pub framebuffers: FramebufferPool,
    pub images: ImagePool,
}

impl RenderPools {
    /// Recreate whatever changed size; returns the number of recreated members
    pub fn resize(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        extent: Extent2D,
    ) -> BackendResult<usize> {
        let framebuffers = self.framebuffers.resize_buffers(resources, backend, extent)?;
        let images = self.images.resize_images(resources, backend, extent)?;
        Ok(framebuffers + images)
    }

    /// Initial wiring of every pooled set
    pub fn rewire_all(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        self.framebuffers.rewire_all(resources, backend)?;
        self.images.rewire_all(resources, backend)
    }
}
