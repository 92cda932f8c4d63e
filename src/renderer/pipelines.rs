//! Every pipeline the frame uses, built once at init

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RendererError, RendererResult};
use crate::pipeline::shader::{ShaderCreateInfo, ShaderLibrary};
use crate::pipeline::*;
use crate::resources::{PipelineId, RendererResources};
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct RendererPipelines {
    pub depth_prepass: PipelineId,
    pub frustum_grid: PipelineId,
    pub light_list: PipelineId,
    pub shadow: PipelineId,
    pub atmosphere: PipelineId,
    pub pbr: PipelineId,
    pub skybox: PipelineId,
    pub unlit: PipelineId,
    pub ssao: PipelineId,
    pub ssao_blur: PipelineId,
    pub ssr: PipelineId,
    pub bloom: PipelineId,
    pub dof: PipelineId,
    pub composite: PipelineId,
    pub post_process: PipelineId,
    pub quad: PipelineId,
    pub ui: PipelineId,
}

/// Shaders in the order the pipelines below consume them
fn shader_infos(dir: Option<&Path>) -> Vec<ShaderCreateInfo> {
    vec![
        depth_prepass::shader_info(dir),
        light_culling::frustum_grid_shader_info(dir),
        light_culling::light_list_shader_info(dir),
        shadow::shader_info(dir),
        atmosphere::shader_info(dir),
        pbr::shader_info(dir),
        pbr::skybox_shader_info(dir),
        pbr::unlit_shader_info(dir),
        ssao::shader_info(dir),
        ssao::blur_shader_info(dir),
        ssr::shader_info(dir),
        bloom::shader_info(dir),
        dof::shader_info(dir),
        composite::shader_info(dir),
        post_process::shader_info(dir),
        swapchain::quad_shader_info(dir),
        swapchain::ui_shader_info(dir),
    ]
}

impl RendererPipelines {
    /// Compile all shaders in parallel, join, then build the pipelines in order
    pub fn create(
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        shaders: &ShaderLibrary,
        shader_dir: Option<&Path>,
    ) -> RendererResult<Self> {
        let tasks: Vec<_> = shader_infos(shader_dir)
            .into_iter()
            .map(|info| shaders.create_shader_async(info))
            .collect();
        let shader_count = tasks.len();
        let mut compiled = Vec::with_capacity(shader_count);
        for task in tasks {
            compiled.push(task.wait()?);
        }
        let mut compiled = compiled.into_iter();
        let mut build = |resources: &mut RendererResources,
                         backend: &mut dyn GraphicsBackend,
                         desc: PipelineDescription|
         -> RendererResult<PipelineId> {
            let shader = compiled.next().ok_or_else(|| {
                RendererError::Backend(BackendError::PipelineCreationFailed(format!(
                    "no shader left for pipeline '{}'",
                    desc.name
                )))
            })?;
            let pipeline = Pipeline::create(backend, &shader, &desc)?;
            Ok(resources.add_pipeline(pipeline))
        };

        let depth_prepass = build(resources, backend, depth_prepass::pipeline_description())?;
        let frustum_grid = build(resources, backend, light_culling::frustum_grid_pipeline_description())?;
        let light_list = build(resources, backend, light_culling::light_list_pipeline_description())?;
        let shadow = build(resources, backend, shadow::pipeline_description())?;
        let atmosphere = build(resources, backend, atmosphere::pipeline_description())?;
        let pbr = build(resources, backend, pbr::pipeline_description())?;
        let pbr_pass = render_pass_of(resources, pbr)?;
        let skybox = build(resources, backend, pbr::skybox_pipeline_description(pbr_pass))?;
        let unlit = build(resources, backend, pbr::unlit_pipeline_description(pbr_pass))?;
        let ssao = build(resources, backend, ssao::pipeline_description())?;
        let ssao_blur = build(resources, backend, ssao::blur_pipeline_description())?;
        let ssr = build(resources, backend, ssr::pipeline_description())?;
        let bloom = build(resources, backend, bloom::pipeline_description())?;
        let dof = build(resources, backend, dof::pipeline_description())?;
        let composite = build(resources, backend, composite::pipeline_description())?;
        let post_process = build(resources, backend, post_process::pipeline_description())?;
        let swapchain_pass = backend.swapchain_render_pass();
        let quad = build(resources, backend, swapchain::quad_pipeline_description(swapchain_pass))?;
        let ui = build(resources, backend, swapchain::ui_pipeline_description(swapchain_pass))?;

        log::info!("Built {} pipelines", shader_count);
        Ok(Self {
            depth_prepass,
            frustum_grid,
            light_list,
            shadow,
            atmosphere,
            pbr,
            skybox,
            unlit,
            ssao,
            ssao_blur,
            ssr,
            bloom,
            dof,
            composite,
            post_process,
            quad,
            ui,
        })
    }
}

/// Render pass a graphics pipeline was built against
pub fn render_pass_of(resources: &RendererResources, pipeline: PipelineId) -> BackendResult<RenderPassHandle> {
    resources
        .pipeline(pipeline)
        .render_pass
        .ok_or(BackendError::InvalidHandle("graphics pipeline render pass"))
}

/// Layout of descriptor set `index` of a pipeline
pub fn set_layout_of(
    resources: &RendererResources,
    pipeline: PipelineId,
    index: usize,
) -> BackendResult<DescriptorSetLayoutHandle> {
    resources
        .pipeline(pipeline)
        .set_layout(index)
        .ok_or(BackendError::InvalidHandle("pipeline set layout"))
}
