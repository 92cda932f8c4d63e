//! Per-frame uniform and storage buffers owned by the renderer

use crate::backend::traits::*;
use crate::backend::types::Extent2D;
use crate::config::RendererConfig;
use crate::pipeline::light_culling::{
    compute_tile_frustums, num_thread_groups, num_threads, tile_capacity, TileBufferSizes,
    LIGHTS_BUFFER_SIZE,
};
use crate::pipeline::shadow::compute_cascades;
use crate::pipeline::uniforms::*;
use crate::resources::{BufferId, BufferSubscriptions, GpuBuffer, RendererResources};
use crate::scene::{first_directional, Camera, Light};
use glam::{Mat4, UVec2};
use std::f32::consts::FRAC_PI_2;

/// Ids of every buffer the passes bind
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffers {
    pub vs: BufferId,
    pub skybox: BufferId,
    pub pbr_params: BufferId,
    pub lights: BufferId,
    pub frustums: BufferId,
    pub light_index: BufferId,
    pub light_grid: BufferId,
    pub direct_shadow: BufferId,
    pub ssao_params: BufferId,
    pub ssr_params: BufferId,
    pub post_process: BufferId,
    pub atmosphere: BufferId,
}

/// Renderer-side state feeding the buffers
pub struct FrameUniforms {
    pub buffers: FrameBuffers,
    /// Buffers rewritten when the configuration changes
    pub config_subscriptions: BufferSubscriptions<RendererConfig>,
    /// Buffers rewritten when a new light list is uploaded
    pub light_subscriptions: BufferSubscriptions<[LightingData]>,
    pub num_lights: u32,
    pub lod_bias: f32,
    /// Projection and extent the uploaded tile frustums were computed for
    frustum_key: Option<(Mat4, Extent2D)>,
    /// Tiles the frustum, light index and light grid buffers hold
    tile_capacity: u32,
}

impl FrameUniforms {
    pub fn create(
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        extent: Extent2D,
    ) -> BackendResult<Self> {
        let capacity = tile_capacity(extent);
        let tiles = TileBufferSizes::new(capacity);
        let mut add = |buffer: BackendResult<GpuBuffer>| buffer.map(|b| resources.add_buffer(b));
        let buffers = FrameBuffers {
            vs: add(GpuBuffer::uniform::<UboVs>(backend, "VS UBO"))?,
            skybox: add(GpuBuffer::uniform::<UboVs>(backend, "Skybox UBO"))?,
            pbr_params: add(GpuBuffer::uniform::<PbrPassParams>(backend, "PBR Params"))?,
            lights: add(GpuBuffer::storage(backend, "Lights", LIGHTS_BUFFER_SIZE))?,
            frustums: add(GpuBuffer::storage(backend, "Frustums", tiles.frustums))?,
            light_index: add(GpuBuffer::storage(backend, "Light Index", tiles.light_index))?,
            light_grid: add(GpuBuffer::storage(backend, "Light Grid", tiles.light_grid))?,
            direct_shadow: add(GpuBuffer::uniform::<DirectShadowUb>(backend, "Direct Shadow UBO"))?,
            ssao_params: add(GpuBuffer::uniform::<SsaoParams>(backend, "SSAO Params"))?,
            ssr_params: add(GpuBuffer::uniform::<SsrParams>(backend, "SSR Params"))?,
            post_process: add(GpuBuffer::uniform::<PostProcessParams>(backend, "Post Process Params"))?,
            atmosphere: add(GpuBuffer::uniform::<AtmosphereParams>(backend, "Atmosphere Params"))?,
        };

        let mut config_subscriptions = BufferSubscriptions::new();
        config_subscriptions.subscribe(buffers.ssao_params, |config: &RendererConfig| {
            bytemuck::bytes_of(&SsaoParams::from_config(config)).to_vec()
        });
        config_subscriptions.subscribe(buffers.ssr_params, |config: &RendererConfig| {
            bytemuck::bytes_of(&SsrParams::from_config(config)).to_vec()
        });
        config_subscriptions.subscribe(buffers.post_process, |config: &RendererConfig| {
            bytemuck::bytes_of(&PostProcessParams::from_config(config)).to_vec()
        });

        let mut light_subscriptions = BufferSubscriptions::new();
        light_subscriptions.subscribe(buffers.lights, |lights: &[LightingData]| {
            bytemuck::cast_slice(lights).to_vec()
        });

        resources
            .buffer(buffers.direct_shadow)
            .write_pod(backend, &DirectShadowUb::default())?;

        Ok(Self {
            buffers,
            config_subscriptions,
            light_subscriptions,
            num_lights: 0,
            lod_bias: 0.0,
            frustum_key: None,
            tile_capacity: capacity,
        })
    }

    pub fn tile_capacity(&self) -> u32 {
        self.tile_capacity
    }

    /// Grow the per-tile buffers when `extent` has more tiles than they hold
    ///
    /// Returns true when the buffers were recreated; sets binding them must be rewritten.
    pub fn ensure_tile_capacity(
        &mut self,
        resources: &mut RendererResources,
        backend: &mut dyn GraphicsBackend,
        extent: Extent2D,
    ) -> BackendResult<bool> {
        let capacity = tile_capacity(extent);
        if capacity <= self.tile_capacity {
            return Ok(false);
        }
        let sizes = TileBufferSizes::new(capacity);
        let b = self.buffers;
        resources.buffer_mut(b.frustums).resize(backend, sizes.frustums)?;
        resources.buffer_mut(b.light_index).resize(backend, sizes.light_index)?;
        resources.buffer_mut(b.light_grid).resize(backend, sizes.light_grid)?;
        log::info!("Tile buffers grown from {} to {} tiles", self.tile_capacity, capacity);
        self.tile_capacity = capacity;
        self.frustum_key = None;
        Ok(true)
    }

    /// Rewrite the config-derived buffers
    pub fn broadcast_config(
        &self,
        config: &RendererConfig,
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        self.config_subscriptions.notify(config, resources, backend)
    }

    /// Rewrite the light buffer; an empty list leaves its contents untouched
    pub fn upload_lights(
        &mut self,
        lights: &[LightingData],
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        self.num_lights = lights.len() as u32;
        if lights.is_empty() {
            return Ok(());
        }
        self.light_subscriptions.notify(lights, resources, backend)
    }

    /// Write everything derived from the camera, lights and extent for the next frame
    pub fn update(
        &mut self,
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
        camera: &Camera,
        lights: &[Light],
        config: &RendererConfig,
        extent: Extent2D,
    ) -> BackendResult<()> {
        let b = &self.buffers;
        resources.buffer(b.vs).write_pod(backend, &camera.ubo_vs())?;
        let skybox = UboVs {
            view: camera.skybox_view_matrix(),
            ..camera.ubo_vs()
        };
        resources.buffer(b.skybox).write_pod(backend, &skybox)?;

        let params = PbrPassParams {
            num_threads: num_threads(extent),
            num_thread_groups: num_thread_groups(extent),
            screen_dimensions: UVec2::new(extent.width, extent.height),
            num_lights: self.num_lights,
            lod_bias: self.lod_bias,
            tiled_lighting: config.tiled_lighting.enabled as u32,
            _padding: [0; 3],
        };
        resources.buffer(b.pbr_params).write_pod(backend, &params)?;

        if let Some(sun) = first_directional(lights) {
            let mut shadow = compute_cascades(
                camera.view_matrix(),
                camera.projection_matrix(),
                camera.near(),
                camera.far(),
                sun.transform,
            );
            shadow.light_direction.w = sun.component.intensity;
            shadow.light_color = sun.component.color.extend(1.0);
            resources.buffer(b.direct_shadow).write_pod(backend, &shadow)?;
        }

        if config.atmosphere.enabled {
            let atmosphere = AtmosphereParams::new(cube_face_projection().inverse(), config.atmosphere.time);
            resources.buffer(b.atmosphere).write_pod(backend, &atmosphere)?;
        }

        if !config.tiled_lighting.enabled {
            return Ok(());
        }
        self.upload_frustums(resources, backend, camera.flipped_projection_matrix(), extent)
    }

    /// Upload CPU tile frustums when the projection or the extent changed
    pub fn upload_frustums(
        &mut self,
        resources: &RendererResources,
        backend: &mut dyn GraphicsBackend,
        projection: Mat4,
        extent: Extent2D,
    ) -> BackendResult<()> {
        if self.frustum_key == Some((projection, extent)) {
            return Ok(());
        }
        let frustums = compute_tile_frustums(projection, extent);
        resources
            .buffer(self.buffers.frustums)
            .write(backend, 0, bytemuck::cast_slice(&frustums))?;
        self.frustum_key = Some((projection, extent));
        log::debug!("Uploaded {} tile frustums", frustums.len());
        Ok(())
    }

    /// Force the next update to recompute the tile frustums
    pub fn invalidate_frustums(&mut self) {
        self.frustum_key = None;
    }
}

/// 90 degree square projection of one sky cube face
pub fn cube_face_projection() -> Mat4 {
    Mat4::perspective_rh(FRAC_PI_2, 1.0, 0.1, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::scene::LightComponent;
    use glam::{Quat, Vec3};

    fn setup() -> (HeadlessBackend, RendererResources, FrameUniforms) {
        setup_at(Extent2D::new(64, 32))
    }

    fn setup_at(extent: Extent2D) -> (HeadlessBackend, RendererResources, FrameUniforms) {
        let mut backend = HeadlessBackend::new(extent);
        let mut resources = RendererResources::new(&mut backend).unwrap();
        let uniforms = FrameUniforms::create(&mut resources, &mut backend, extent).unwrap();
        (backend, resources, uniforms)
    }

    fn read<T: bytemuck::Pod>(backend: &HeadlessBackend, resources: &RendererResources, id: BufferId) -> T {
        let bytes = backend.buffer_contents(resources.buffer(id).handle).unwrap();
        bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()])
    }

    #[test]
    fn test_params_carry_light_count_and_tiles() {
        let (mut backend, resources, mut uniforms) = setup();
        let lights = vec![LightingData::default(); 3];
        uniforms.upload_lights(&lights, &resources, &mut backend).unwrap();
        uniforms
            .update(
                &resources,
                &mut backend,
                &Camera::default(),
                &[],
                &RendererConfig::default(),
                Extent2D::new(64, 32),
            )
            .unwrap();

        let params: PbrPassParams = read(&backend, &resources, uniforms.buffers.pbr_params);
        assert_eq!(params.num_lights, 3);
        assert_eq!(params.num_threads, UVec2::new(4, 2));
        assert_eq!(params.screen_dimensions, UVec2::new(64, 32));
    }

    #[test]
    fn test_shadow_buffer_kept_without_directional_light() {
        let (mut backend, resources, mut uniforms) = setup();
        let camera = Camera::default();
        let config = RendererConfig::default();
        let sun = Light::new(
            LightComponent::directional(Vec3::ONE, 2.0),
            Mat4::from_quat(Quat::from_rotation_x(-1.0)),
        );
        uniforms
            .update(&resources, &mut backend, &camera, &[sun], &config, Extent2D::new(64, 32))
            .unwrap();
        let first: DirectShadowUb = read(&backend, &resources, uniforms.buffers.direct_shadow);
        assert_eq!(first.light_direction.w, 2.0);

        uniforms
            .update(&resources, &mut backend, &camera, &[], &config, Extent2D::new(64, 32))
            .unwrap();
        let second: DirectShadowUb = read(&backend, &resources, uniforms.buffers.direct_shadow);
        assert_eq!(first, second);
    }

    #[test]
    fn test_frustums_uploaded_once_per_projection_and_extent() {
        let (mut backend, resources, mut uniforms) = setup();
        let projection = Camera::default().flipped_projection_matrix();
        let frustums = resources.buffer(uniforms.buffers.frustums).handle;

        uniforms
            .upload_frustums(&resources, &mut backend, projection, Extent2D::new(64, 32))
            .unwrap();
        let writes = backend.buffer_write_count(frustums);
        uniforms
            .upload_frustums(&resources, &mut backend, projection, Extent2D::new(64, 32))
            .unwrap();
        assert_eq!(backend.buffer_write_count(frustums), writes);

        uniforms
            .upload_frustums(&resources, &mut backend, projection, Extent2D::new(32, 32))
            .unwrap();
        assert_eq!(backend.buffer_write_count(frustums), writes + 1);
    }

    #[test]
    fn test_frustums_skipped_while_tiled_lighting_is_off() {
        let (mut backend, resources, mut uniforms) = setup();
        let frustums = resources.buffer(uniforms.buffers.frustums).handle;
        let mut config = RendererConfig::default();
        let camera = Camera::default();

        uniforms
            .update(&resources, &mut backend, &camera, &[], &config, Extent2D::new(64, 32))
            .unwrap();
        assert_eq!(backend.buffer_write_count(frustums), 0);

        config.tiled_lighting.enabled = true;
        uniforms
            .update(&resources, &mut backend, &camera, &[], &config, Extent2D::new(64, 32))
            .unwrap();
        assert_eq!(backend.buffer_write_count(frustums), 1);
    }

    #[test]
    fn test_tile_buffers_grow_with_extent() {
        let (mut backend, mut resources, mut uniforms) = setup();
        let large = Extent2D::new(5120, 2880);
        let projection = Camera::default().flipped_projection_matrix();
        assert!(uniforms
            .upload_frustums(&resources, &mut backend, projection, large)
            .is_err());

        assert!(uniforms
            .ensure_tile_capacity(&mut resources, &mut backend, large)
            .unwrap());
        assert_eq!(uniforms.tile_capacity(), 65536);
        let frustums = resources.buffer(uniforms.buffers.frustums);
        assert_eq!(frustums.generation, 1);
        assert_eq!(resources.buffer(uniforms.buffers.light_grid).size, 65536 * 8);
        uniforms
            .upload_frustums(&resources, &mut backend, projection, large)
            .unwrap();

        // Shrinking keeps the larger buffers
        assert!(!uniforms
            .ensure_tile_capacity(&mut resources, &mut backend, Extent2D::new(64, 32))
            .unwrap());
        assert_eq!(resources.buffer(uniforms.buffers.frustums).generation, 1);
    }

    #[test]
    fn test_large_extent_creates_large_tile_buffers() {
        let (_, resources, uniforms) = setup_at(Extent2D::new(7680, 4320));
        assert_eq!(uniforms.tile_capacity(), 131072);
        assert_eq!(resources.buffer(uniforms.buffers.light_grid).size, 131072 * 8);
    }
}
