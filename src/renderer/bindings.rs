//! Descriptor sets of every pass and what each binding points at

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::bloom::{DOWNSAMPLE_VIEWS, UPSAMPLE_VIEWS};
use crate::renderer::environment::EnvironmentMaps;
use crate::renderer::pipelines::{set_layout_of, RendererPipelines};
use crate::renderer::targets::RenderTargets;
use crate::renderer::uniforms::FrameBuffers;
use crate::resources::*;

#[derive(Debug, Clone, Copy)]
pub struct RendererSets {
    /// Shared by the depth pre-pass and the PBR pass
    pub pbr: DescriptorSetId,
    pub default_material: DescriptorSetId,
    pub skybox: DescriptorSetId,
    pub atmosphere_skybox: DescriptorSetId,
    /// Shared by the frustum grid and light list passes
    pub light_culling: DescriptorSetId,
    pub shadow: DescriptorSetId,
    pub ssao: DescriptorSetId,
    pub ssao_blur: DescriptorSetId,
    pub ssr: DescriptorSetId,
    pub bloom: DescriptorSetId,
    pub dof: DescriptorSetId,
    pub composite: DescriptorSetId,
    pub atmosphere: DescriptorSetId,
    pub post_process: DescriptorSetId,
    pub quad: DescriptorSetId,
}

struct SetBuilder<'a> {
    resources: &'a mut RendererResources,
    backend: &'a mut dyn GraphicsBackend,
}

impl SetBuilder<'_> {
    fn allocate(
        &mut self,
        label: &str,
        pipeline: PipelineId,
        bindings: Vec<Binding>,
    ) -> BackendResult<DescriptorSetId> {
        let layout = set_layout_of(self.resources, pipeline, 0)?;
        let set = DescriptorSet::allocate(self.backend, label, layout, bindings)?;
        Ok(self.resources.add_descriptor_set(set))
    }
}

impl RendererSets {
    /// Allocate every set; nothing is written until the pools rewire them
    /// and [`RendererSets::write_static`] runs
    pub fn allocate(
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        pipelines: &RendererPipelines,
        buffers: &FrameBuffers,
        targets: &RenderTargets,
        environment: &EnvironmentMaps,
        fallback: ImageId,
    ) -> BackendResult<Self> {
        let p = pipelines;
        let b = buffers;
        let t = targets;

        let mut default_material = Material::default();
        let material_layout = set_layout_of(resources, p.pbr, 1)?;
        let default_material =
            default_material.create_descriptor_set(resources, backend, material_layout, fallback)?;

        let mut sets = SetBuilder { resources, backend };
        let pbr = sets.allocate(
            "PBR",
            p.pbr,
            vec![
                Binding::uniform(0, b.vs),
                Binding::uniform(1, b.pbr_params),
                Binding::storage_buffer(2, b.lights),
                Binding::storage_buffer(3, b.frustums),
                Binding::storage_buffer(4, b.light_index),
                Binding::storage_buffer(5, b.light_grid),
                Binding::sampled(6, environment.irradiance),
                Binding::sampled(7, environment.brdf_lut),
                Binding::sampled(8, environment.environment),
                Binding::sampled(9, t.shadow_map),
                Binding::uniform(11, b.direct_shadow),
            ],
        )?;
        let skybox_bindings = |cube: ImageId| {
            vec![
                Binding::uniform(0, b.skybox),
                Binding::uniform(1, b.post_process),
                Binding::sampled(6, cube),
            ]
        };
        let skybox = sets.allocate("Skybox", p.skybox, skybox_bindings(environment.environment))?;
        let atmosphere_skybox =
            sets.allocate("Atmosphere Skybox", p.skybox, skybox_bindings(t.atmosphere))?;
        let light_culling = sets.allocate(
            "Light Culling",
            p.light_list,
            vec![
                Binding::uniform(0, b.vs),
                Binding::uniform(1, b.pbr_params),
                Binding::storage_buffer(2, b.lights),
                Binding::storage_buffer(3, b.frustums),
                Binding::storage_buffer(4, b.light_index),
                Binding::storage_buffer(5, b.light_grid),
                Binding::sampled(6, t.depth),
            ],
        )?;
        let shadow = sets.allocate("Direct Shadow", p.shadow, vec![Binding::uniform(0, b.direct_shadow)])?;
        let ssao = sets.allocate(
            "SSAO",
            p.ssao,
            vec![
                Binding::uniform(0, b.vs),
                Binding::sampled(1, t.depth),
                Binding::storage_image(2, t.ssao),
                Binding::sampled(3, t.normal),
                Binding::uniform(4, b.ssao_params),
            ],
        )?;
        let ssao_blur = sets.allocate(
            "SSAO Blur",
            p.ssao_blur,
            vec![Binding::storage_image(0, t.ssao_blur), Binding::sampled(1, t.ssao)],
        )?;
        let ssr = sets.allocate(
            "SSR",
            p.ssr,
            vec![
                Binding::storage_image(0, t.ssr),
                Binding::sampled(1, t.pbr_color),
                Binding::sampled(2, t.depth),
                Binding::sampled(3, environment.environment),
                Binding::sampled(4, t.normal),
                Binding::uniform(5, b.vs),
                Binding::uniform(6, b.ssr_params),
            ],
        )?;
        let bloom = sets.allocate(
            "Bloom",
            p.bloom,
            vec![
                Binding {
                    binding: 0,
                    ty: DescriptorType::CombinedImageSampler,
                    source: BindingSource::Images(vec![t.pbr_color, t.bloom_downsample, t.bloom_upsample]),
                },
                Binding::storage_mips(1, t.bloom_downsample, DOWNSAMPLE_VIEWS),
                Binding::storage_mips(2, t.bloom_upsample, UPSAMPLE_VIEWS),
            ],
        )?;
        let dof = sets.allocate(
            "Depth of Field",
            p.dof,
            vec![
                Binding::storage_image(0, t.dof),
                Binding::sampled(1, t.pbr_color),
                Binding::sampled(2, t.depth),
            ],
        )?;
        let composite = sets.allocate(
            "Composite",
            p.composite,
            vec![
                Binding::storage_image(0, t.composite),
                Binding::sampled(1, t.dof),
                Binding::sampled(2, t.ssao_blur),
                Binding::sampled(3, t.bloom_upsample),
                Binding::sampled(4, t.ssr),
                Binding::uniform(5, b.post_process),
            ],
        )?;
        let atmosphere = sets.allocate(
            "Atmosphere",
            p.atmosphere,
            vec![Binding::storage_image(0, t.atmosphere), Binding::uniform(1, b.atmosphere)],
        )?;
        let post_process = sets.allocate(
            "Post Process",
            p.post_process,
            vec![Binding::sampled(0, t.composite), Binding::uniform(1, b.post_process)],
        )?;
        let quad = sets.allocate("Swapchain Quad", p.quad, vec![Binding::sampled(0, t.post_process_color)])?;

        Ok(Self {
            pbr,
            default_material,
            skybox,
            atmosphere_skybox,
            light_culling,
            shadow,
            ssao,
            ssao_blur,
            ssr,
            bloom,
            dof,
            composite,
            atmosphere,
            post_process,
            quad,
        })
    }

    /// Write the sets no pooled resource rewires
    pub fn write_static(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        resources.update_descriptor_set(self.skybox, backend)?;
        resources.update_descriptor_set(self.shadow, backend)
    }

    /// Rewrite the sets binding the per-tile culling buffers after they were recreated
    pub fn rewrite_tile_buffers(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        resources.update_descriptor_set(self.pbr, backend)?;
        resources.update_descriptor_set(self.light_culling, backend)
    }

    /// Point every sky cube binding at `cube`; irradiance keeps its map
    pub fn rebind_sky_cube(
        &self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        cube: ImageId,
    ) -> BackendResult<()> {
        for (set, binding) in [(self.skybox, 6), (self.pbr, 8), (self.ssr, 3)] {
            resources.descriptor_set_mut(set).bind(Binding::sampled(binding, cube));
            resources.update_descriptor_set(set, backend)?;
        }
        Ok(())
    }
}
