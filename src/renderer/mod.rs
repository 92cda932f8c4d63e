//! Renderer facade
//!
//! [`Renderer`] owns the backend, every GPU resource and the render graph.
//! Scene data is submitted between frames; [`Renderer::draw`] writes the
//! per-frame uniforms, records and submits every enabled pass, presents, and
//! clears the draw lists. Window resizes drain the device, recreate the
//! swapchain, then let the pools recreate their targets and rewire the
//! descriptor sets reading them.

pub mod bindings;
pub mod environment;
pub mod pipelines;
pub mod targets;
pub mod uniforms;

pub use bindings::RendererSets;
pub use environment::EnvironmentMaps;
pub use pipelines::RendererPipelines;
pub use targets::{RenderPools, RenderTargets};
pub use uniforms::{FrameBuffers, FrameUniforms};

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::{ConfigStore, RendererConfig};
use crate::error::{RendererError, RendererResult};
use crate::pipeline::shader::{ShaderCompiler, ShaderLibrary};
use crate::pipeline::swapchain::{SharedUiRenderer, UiRenderer};
use crate::pipeline::*;
use crate::render_graph::{FrameData, MeshDrawEntry, QuadDrawEntry, RenderGraph};
use crate::resources::*;
use crate::scene::{pack_point_lights, Camera, Light, SkyLight};
use glam::{Mat4, Vec4};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Init parameters of a [`Renderer`]
pub struct RendererDesc {
    pub extent: Extent2D,
    /// TOML file loaded at init and saved at shutdown; `None` keeps the defaults in memory
    pub config_path: Option<PathBuf>,
    /// Root of the asset directory holding `HDRs/`
    pub resources_path: PathBuf,
    /// Directory of `.wgsl` files overriding the embedded shaders
    pub shader_dir: Option<PathBuf>,
    pub compiler: Arc<dyn ShaderCompiler>,
}

/// Renderer over any [`GraphicsBackend`]
pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    resources: RendererResources,
    shaders: ShaderLibrary,
    graph: RenderGraph,
    config: ConfigStore,
    config_path: Option<PathBuf>,
    /// Revision broadcast to the config subscribers
    config_revision: u64,
    extent: Extent2D,
    /// Extent asked for by `on_resize`, applied before the next frame
    requested_extent: Option<Extent2D>,

    pipelines: RendererPipelines,
    targets: RenderTargets,
    sets: RendererSets,
    pools: RenderPools,
    uniforms: FrameUniforms,
    environment: EnvironmentMaps,
    sky_cube: ImageId,
    white: ImageId,
    ui: SharedUiRenderer,

    camera: Option<Camera>,
    lights: Vec<Light>,
    /// Light list changed since the last upload
    lights_dirty: bool,
    meshes: Vec<MeshDrawEntry>,
    quads: Vec<QuadDrawEntry>,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Build every resource and pass; shader compilation is joined before the first pipeline
    pub fn init(mut backend: B, desc: RendererDesc) -> RendererResult<Self> {
        let config = match &desc.config_path {
            Some(path) => RendererConfig::load_or_create(path)?,
            None => RendererConfig::default(),
        };
        let extent = desc.extent;
        log::info!(
            "Initializing renderer at {}x{} ({} frames in flight)",
            extent.width,
            extent.height,
            backend.frames_in_flight()
        );
        backend.set_vsync(config.display.vsync);

        let mut resources = RendererResources::new(&mut backend)?;
        let shaders = ShaderLibrary::new(desc.compiler);
        let pipelines =
            RendererPipelines::create(&mut resources, &mut backend, &shaders, desc.shader_dir.as_deref())?;

        let uniforms = FrameUniforms::create(&mut resources, &mut backend, extent)?;
        uniforms.broadcast_config(&config, &resources, &mut backend)?;

        let white = TextureData::white().upload(&mut resources, &mut backend)?;
        let environment = EnvironmentMaps::load(&mut resources, &mut backend, &desc.resources_path)?;
        let targets = RenderTargets::create(
            &mut resources,
            &mut backend,
            &pipelines,
            extent,
            config.direct_shadows.size,
        )?;
        let sets = RendererSets::allocate(
            &mut resources,
            &mut backend,
            &pipelines,
            &uniforms.buffers,
            &targets,
            &environment,
            white,
        )?;
        let pools = targets.pools(&sets);
        pools.rewire_all(&mut resources, &mut backend)?;
        sets.write_static(&mut resources, &mut backend)?;

        let cube = GpuMesh::upload(&mut resources, &mut backend, &Mesh::cube())?;
        let quad = GpuMesh::upload(&mut resources, &mut backend, &Mesh::quad())?;
        let triangle = GpuMesh::upload(&mut resources, &mut backend, &Mesh::fullscreen_triangle())?;
        let ui: SharedUiRenderer = Arc::new(Mutex::new(None));

        let mut graph = RenderGraph::new();
        build_graph(
            &mut graph,
            &resources,
            &mut backend,
            &pipelines,
            &sets,
            &targets,
            &uniforms.buffers,
            GraphMeshes { cube, quad, triangle },
            ui.clone(),
        )?;
        log::info!("Render graph: {}", graph.pass_names().join(" -> "));

        Ok(Self {
            backend,
            resources,
            shaders,
            graph,
            config: ConfigStore::new(config),
            config_path: desc.config_path,
            config_revision: 0,
            extent,
            requested_extent: None,
            pipelines,
            targets,
            sets,
            pools,
            uniforms,
            sky_cube: environment.environment,
            environment,
            white,
            ui,
            camera: None,
            lights: Vec::new(),
            lights_dirty: false,
            meshes: Vec::new(),
            quads: Vec::new(),
        })
    }

    // Scene submission

    /// Queue one submesh for the next frame
    pub fn submit_mesh(
        &mut self,
        mesh: Arc<GpuMesh>,
        transform: Mat4,
        materials: Vec<Arc<Material>>,
        submesh_index: usize,
    ) {
        self.meshes.push(MeshDrawEntry {
            mesh,
            transform,
            materials,
            submesh_index,
        });
    }

    /// Replace the light list; point lights are uploaded once the next frame is acquired
    pub fn submit_lights(&mut self, lights: &[Light]) -> RendererResult<()> {
        self.lights = lights.to_vec();
        self.lights_dirty = true;
        log::debug!("Submitted {} lights", lights.len());
        Ok(())
    }

    /// Swap the sky cubemap and LOD bias
    ///
    /// A new cubemap drains the device and re-points every set sampling the sky.
    pub fn submit_sky_light(&mut self, sky_light: &SkyLight) -> RendererResult<()> {
        self.uniforms.lod_bias = sky_light.lod_bias;
        let Some(cube) = sky_light.cubemap else {
            return Ok(());
        };
        if cube == self.sky_cube {
            return Ok(());
        }
        if self.resources.try_image(cube).is_none() {
            log::error!("Sky light cubemap {:?} does not exist, keeping the current sky", cube);
            return Ok(());
        }
        self.backend.wait_idle()?;
        self.sets
            .rebind_sky_cube(&mut self.resources, &mut self.backend, cube)?;
        self.sky_cube = cube;
        log::info!("Sky cubemap replaced by '{}'", self.resources.image(cube).label());
        Ok(())
    }

    /// Queue one textured quad for the next frame; the image needs its own descriptor set
    pub fn submit_quad(&mut self, transform: Mat4, image: ImageId, color: Vec4) {
        self.quads.push(QuadDrawEntry {
            transform,
            image,
            color,
        });
    }

    pub fn set_camera(&mut self, mut camera: Camera) {
        camera.set_aspect(self.extent.width as f32, self.extent.height as f32);
        self.camera = Some(camera);
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    // Assets

    pub fn upload_mesh(&mut self, mesh: &Mesh) -> RendererResult<Arc<GpuMesh>> {
        Ok(GpuMesh::upload(&mut self.resources, &mut self.backend, mesh)?)
    }

    /// Upload a texture with its own descriptor set, usable by materials and quads
    pub fn upload_texture(&mut self, texture: &TextureData) -> RendererResult<ImageId> {
        Ok(texture.upload(&mut self.resources, &mut self.backend)?)
    }

    /// Give a material its texture set; missing textures sample white
    pub fn create_material(&mut self, mut material: Material) -> RendererResult<Arc<Material>> {
        let layout = pipelines::set_layout_of(&self.resources, self.pipelines.pbr, 1)?;
        material.create_descriptor_set(&mut self.resources, &mut self.backend, layout, self.white)?;
        Ok(Arc::new(material))
    }

    // Frame

    /// Render and present one frame
    ///
    /// Returns `Ok(false)` when the frame was skipped: no camera, stale
    /// descriptor sets, or a swapchain that had to be resized first.
    pub fn draw(&mut self) -> RendererResult<bool> {
        if self.graph.is_resize_pending() {
            self.resize_buffers()?;
            if self.graph.is_resize_pending() {
                self.clear_draw_lists();
                return Ok(false);
            }
        }

        let Some(camera) = self.camera.clone() else {
            log::error!("No camera set, frame skipped");
            self.clear_draw_lists();
            return Ok(false);
        };
        let config = self.config.snapshot();
        let stale = self.graph.stale_descriptor_sets(&self.resources, &config);
        if !stale.is_empty() {
            log::error!("Descriptor sets {:?} reference recreated resources, frame skipped", stale);
            self.clear_draw_lists();
            return Ok(false);
        }

        let acquired = self.graph.acquire(&mut self.backend).map_err(|e| {
            log::error!("Acquiring a frame failed: {}", e);
            RendererError::from(e)
        })?;
        if !acquired {
            log::debug!("Swapchain out of date, frame skipped");
            self.clear_draw_lists();
            self.resize_buffers()?;
            return Ok(false);
        }

        // Host writes wait for the acquire: it fences every earlier frame
        self.broadcast_config()?;
        self.upload_lights()?;
        self.uniforms.update(
            &self.resources,
            &mut self.backend,
            &camera,
            &self.lights,
            &config,
            self.extent,
        )?;

        let frame = FrameData {
            config,
            extent: self.extent,
            frame_index: self.graph.frame_index(),
            meshes: std::mem::take(&mut self.meshes),
            quads: std::mem::take(&mut self.quads),
            skybox_view: camera.skybox_view_matrix(),
            view_projection: camera.flipped_projection_matrix() * camera.view_matrix(),
        };

        let presented = self
            .graph
            .record(&mut self.backend, &self.resources, &frame)
            .and_then(|()| {
                self.graph
                    .submit_swapchain_pass(&mut self.backend, &self.resources, &frame)
            })
            .map_err(|e| {
                log::error!("Frame {} failed: {}", frame.frame_index, e);
                RendererError::from(e)
            })?;

        if !presented {
            log::debug!("Swapchain out of date after present");
            self.resize_buffers()?;
        }
        Ok(presented)
    }

    fn upload_lights(&mut self) -> RendererResult<()> {
        if !self.lights_dirty {
            return Ok(());
        }
        let packed = pack_point_lights(&self.lights);
        self.uniforms
            .upload_lights(&packed, &self.resources, &mut self.backend)?;
        self.lights_dirty = false;
        log::trace!("Uploaded {} point lights", packed.len());
        Ok(())
    }

    fn clear_draw_lists(&mut self) {
        self.meshes.clear();
        self.quads.clear();
    }

    /// Write the config subscribers when the store changed since the last frame
    fn broadcast_config(&mut self) -> RendererResult<()> {
        let revision = self.config.revision();
        if revision == self.config_revision {
            return Ok(());
        }
        let config = self.config.snapshot();
        self.uniforms
            .broadcast_config(&config, &self.resources, &mut self.backend)?;
        self.backend.set_vsync(config.display.vsync);
        self.config_revision = revision;
        log::debug!("Broadcast config revision {}", revision);
        Ok(())
    }

    // Resize

    /// Record a new window extent; targets are recreated before the next frame
    pub fn on_resize(&mut self, extent: Extent2D) {
        self.requested_extent = Some(extent);
        self.graph.set_resize_pending();
    }

    /// Drain the device, recreate the swapchain, then every pooled target
    pub fn resize_buffers(&mut self) -> RendererResult<()> {
        self.backend.wait_idle()?;
        let requested = self
            .requested_extent
            .take()
            .unwrap_or_else(|| self.backend.surface_extent());
        let extent = self.backend.recreate_swapchain(requested)?;
        if extent.is_empty() {
            log::debug!("Window minimized, resize deferred");
            self.graph.set_resize_pending();
            return Ok(());
        }

        let recreated = self
            .pools
            .resize(&mut self.resources, &mut self.backend, extent)?;
        if self
            .uniforms
            .ensure_tile_capacity(&mut self.resources, &mut self.backend, extent)?
        {
            self.sets
                .rewrite_tile_buffers(&mut self.resources, &mut self.backend)?;
        }
        self.extent = extent;
        if let Some(camera) = &mut self.camera {
            camera.set_aspect(extent.width as f32, extent.height as f32);
        }
        self.uniforms.invalidate_frustums();
        self.graph.clear_resize_pending();
        log::debug!(
            "Resized to {}x{}, {} targets recreated",
            extent.width,
            extent.height,
            recreated
        );
        Ok(())
    }

    // Accessors

    /// Shared configuration; edits are picked up at the start of the next frame
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn save_config(&self) -> RendererResult<()> {
        if let Some(path) = &self.config_path {
            self.config.snapshot().save(path)?;
            log::info!("Saved renderer config to {}", path.display());
        }
        Ok(())
    }

    /// Color image of the post-process framebuffer, the frame before UI
    pub fn final_image(&self) -> ImageId {
        self.targets.post_process_color
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn limits(&self) -> DeviceLimits {
        self.backend.limits()
    }

    /// Install the UI drawn over the final image
    pub fn set_ui_renderer(&mut self, ui: Option<Box<dyn UiRenderer>>) {
        *self.ui.lock() = ui;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn resources(&self) -> &RendererResources {
        &self.resources
    }

    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn sets(&self) -> &RendererSets {
        &self.sets
    }

    pub fn uniforms(&self) -> &FrameUniforms {
        &self.uniforms
    }

    pub fn environment(&self) -> &EnvironmentMaps {
        &self.environment
    }

    pub fn pending_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn pending_quads(&self) -> usize {
        self.quads.len()
    }

    /// Save the config, drain the device and destroy every resource
    pub fn shutdown(mut self) -> RendererResult<B> {
        self.save_config()?;
        self.backend.wait_idle()?;
        self.shaders.unload_shaders();
        self.resources.destroy_all(&mut self.backend);
        log::info!("Renderer shut down");
        Ok(self.backend)
    }
}

/// Built-in meshes drawn by the passes themselves
struct GraphMeshes {
    cube: Arc<GpuMesh>,
    quad: Arc<GpuMesh>,
    triangle: Arc<GpuMesh>,
}

/// Register every pass in execution order
#[allow(clippy::too_many_arguments)]
fn build_graph(
    graph: &mut RenderGraph,
    resources: &RendererResources,
    backend: &mut dyn GraphicsBackend,
    p: &RendererPipelines,
    sets: &RendererSets,
    targets: &RenderTargets,
    buffers: &FrameBuffers,
    meshes: GraphMeshes,
    ui: SharedUiRenderer,
) -> BackendResult<()> {
    graph.add_to_graph(
        depth_prepass::create_pass(p.depth_prepass, sets.pbr, sets.default_material, targets.depth_normal),
        resources,
        backend,
    )?;
    graph.add_to_graph_compute(
        light_culling::create_frustum_grid_pass(p.frustum_grid, sets.light_culling),
        resources,
        backend,
    )?;
    graph.add_to_graph_compute(
        light_culling::create_light_list_pass(
            p.light_list,
            sets.light_culling,
            buffers.lights,
            buffers.light_index,
            buffers.light_grid,
        ),
        resources,
        backend,
    )?;
    graph.add_to_graph(
        shadow::create_pass(p.shadow, sets.shadow, targets.shadow_cascades.clone(), targets.shadow_size),
        resources,
        backend,
    )?;
    graph.add_to_graph_compute(
        atmosphere::create_pass(p.atmosphere, sets.atmosphere, targets.atmosphere),
        resources,
        backend,
    )?;
    graph.add_to_graph(
        pbr::create_pass(pbr::PbrPassInputs {
            pipeline: p.pbr,
            skybox_pipeline: p.skybox,
            unlit_pipeline: p.unlit,
            set: sets.pbr,
            skybox_set: sets.skybox,
            atmosphere_skybox_set: sets.atmosphere_skybox,
            default_material_set: sets.default_material,
            framebuffer: targets.pbr,
            cube: meshes.cube,
            quad: meshes.quad,
        }),
        resources,
        backend,
    )?;
    graph.add_to_graph_compute(
        ssao::create_pass(p.ssao, sets.ssao, p.ssao_blur, sets.ssao_blur, targets.ssao),
        resources,
        backend,
    )?;
    graph.add_to_graph_compute(ssr::create_pass(p.ssr, sets.ssr), resources, backend)?;
    graph.add_to_graph_compute(
        bloom::create_pass(p.bloom, sets.bloom, targets.bloom_downsample, targets.bloom_upsample),
        resources,
        backend,
    )?;
    graph.add_to_graph_compute(dof::create_pass(p.dof, sets.dof), resources, backend)?;
    let composite_images = composite::CompositeImages {
        inputs: vec![targets.dof, targets.ssao_blur, targets.bloom_upsample, targets.ssr],
        output: targets.composite,
    };
    graph.add_to_graph_compute(
        composite::create_pass(p.composite, sets.composite, composite_images),
        resources,
        backend,
    )?;
    graph.add_to_graph(
        post_process::create_pass(p.post_process, sets.post_process, targets.post_process, meshes.triangle),
        resources,
        backend,
    )?;
    graph.set_swapchain_pass(swapchain::create_pass(p.quad, sets.quad, p.ui, ui), backend)
}
