//! Tiled renderer demo
//!
//! Renders a small scene of cubes over a plane lit by a sun and a ring of
//! point lights. Keys toggle the optional passes: `O` SSAO, `B` bloom,
//! `R` reflections, `A` atmosphere, `S` shadows, `V` vsync.
//!
//! `--headless` renders a fixed number of frames without a window.

use clap::Parser;
use glam::{Mat4, Quat, Vec3};
use std::path::PathBuf;
use std::sync::Arc;
use tiled_renderer::backend::{Extent2D, GraphicsBackend, HeadlessBackend};
use tiled_renderer::pipeline::shader::WgslCompiler;
use tiled_renderer::resources::{GpuMesh, Material, Mesh};
use tiled_renderer::scene::{collect_lights, Camera, LightComponent, Transform};
use tiled_renderer::{Renderer, RendererDesc, RendererResult, World};

#[derive(Parser, Debug)]
#[command(name = "demo", about = "Tiled renderer demo scene")]
struct Args {
    /// Render without a window using the recording backend
    #[arg(long)]
    headless: bool,

    /// Frames rendered by a headless run
    #[arg(long, default_value_t = 60)]
    frames: u32,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Asset directory holding `HDRs/`
    #[arg(long, default_value = "resources")]
    resources: PathBuf,

    /// Renderer settings file, created with defaults when missing
    #[arg(long, default_value = "renderer.toml")]
    config: PathBuf,

    /// Directory of `.wgsl` overrides for the embedded shaders
    #[arg(long)]
    shaders: Option<PathBuf>,

    /// Enable the Vulkan validation layer
    #[arg(long)]
    validation: bool,
}

struct DemoScene {
    world: World,
    cube: Arc<GpuMesh>,
    plane: Arc<GpuMesh>,
    materials: Vec<Arc<Material>>,
    floor: Arc<Material>,
    time: f32,
}

impl DemoScene {
    fn new<B: GraphicsBackend>(renderer: &mut Renderer<B>) -> RendererResult<Self> {
        let cube = renderer.upload_mesh(&Mesh::cube())?;
        let plane = renderer.upload_mesh(&Mesh::plane(20.0, 20.0, 4))?;
        let floor = renderer.create_material(Material::plastic(Vec3::splat(0.6)))?;
        let materials = vec![
            renderer.create_material(Material::metal(Vec3::new(0.95, 0.64, 0.54), 0.3))?,
            renderer.create_material(Material::plastic(Vec3::new(0.2, 0.4, 0.9)))?,
            renderer.create_material(Material::metal(Vec3::new(0.91, 0.92, 0.92), 0.1))?,
        ];

        let mut world = World::new();
        world.spawn((
            LightComponent::directional(Vec3::new(1.0, 0.95, 0.9), 3.0),
            Transform::aimed_along(Vec3::ZERO, Vec3::new(-0.4, -1.0, -0.6)),
        ));
        for i in 0..8 {
            let angle = i as f32 / 8.0 * std::f32::consts::TAU;
            let color = Vec3::new(angle.sin() * 0.5 + 0.5, 0.6, angle.cos() * 0.5 + 0.5);
            world.spawn((
                LightComponent::point(color, 20.0, 6.0),
                Transform::from_position(Vec3::new(angle.cos() * 5.0, 1.0, angle.sin() * 5.0)),
            ));
        }

        renderer.set_camera(Camera::new(Vec3::new(0.0, 4.0, 10.0), Vec3::ZERO));
        Ok(Self {
            world,
            cube,
            plane,
            materials,
            floor,
            time: 0.0,
        })
    }

    /// Advance the orbit camera and queue the scene for one frame
    fn submit<B: GraphicsBackend>(&mut self, renderer: &mut Renderer<B>, dt: f32) -> RendererResult<()> {
        self.time += dt;
        let orbit = self.time * 0.2;
        let mut camera = renderer.camera().cloned().unwrap_or_default();
        camera.set_position(Vec3::new(orbit.cos() * 10.0, 4.0, orbit.sin() * 10.0));
        camera.look_at(Vec3::ZERO);
        renderer.set_camera(camera);

        let lights = collect_lights(&mut self.world);
        renderer.submit_lights(&lights)?;

        renderer.submit_mesh(self.plane.clone(), Mat4::IDENTITY, vec![self.floor.clone()], 0);
        for (i, material) in self.materials.iter().enumerate() {
            let x = (i as f32 - 1.0) * 3.0;
            let spin = Quat::from_rotation_y(self.time + i as f32);
            let transform = Mat4::from_rotation_translation(spin, Vec3::new(x, 1.0, 0.0));
            renderer.submit_mesh(self.cube.clone(), transform, vec![material.clone()], 0);
        }
        Ok(())
    }
}

fn renderer_desc(args: &Args, extent: Extent2D) -> RendererDesc {
    RendererDesc {
        extent,
        config_path: Some(args.config.clone()),
        resources_path: args.resources.clone(),
        shader_dir: args.shaders.clone(),
        compiler: Arc::new(WgslCompiler),
    }
}

fn run_headless(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let extent = Extent2D::new(args.width, args.height);
    let mut renderer = Renderer::init(HeadlessBackend::new(extent), renderer_desc(args, extent))?;
    let mut scene = DemoScene::new(&mut renderer)?;

    let mut presented = 0;
    for _ in 0..args.frames {
        scene.submit(&mut renderer, 1.0 / 60.0)?;
        if renderer.draw()? {
            presented += 1;
        }
    }
    let backend = renderer.shutdown()?;
    log::info!(
        "Headless run finished: {} of {} frames presented, {} images still alive",
        presented,
        args.frames,
        backend.live_image_count()
    );
    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
fn run_windowed(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    use std::time::Instant;
    use tiled_renderer::backend::vulkan::{VulkanBackend, VulkanSettings};
    use winit::dpi::PhysicalSize;
    use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
    use winit::event_loop::{ControlFlow, EventLoop};
    use winit::keyboard::Key;
    use winit::window::WindowBuilder;

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Tiled Renderer")
            .with_inner_size(PhysicalSize::new(args.width, args.height))
            .build(&event_loop)?,
    );
    let size = window.inner_size();
    let extent = Extent2D::new(size.width, size.height);

    let backend = VulkanBackend::new(
        window.clone(),
        VulkanSettings {
            validation: args.validation,
            ..Default::default()
        },
    )?;
    let mut renderer = Renderer::init(backend, renderer_desc(&args, extent))?;
    let mut scene = DemoScene::new(&mut renderer)?;
    let mut renderer = Some(renderer);
    let mut last_frame = Instant::now();

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);
        let Some(active) = renderer.as_mut() else {
            return;
        };
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    if let Some(renderer) = renderer.take() {
                        if let Err(e) = renderer.shutdown() {
                            log::error!("Shutdown failed: {}", e);
                        }
                    }
                    elwt.exit();
                }
                WindowEvent::Resized(size) => {
                    active.on_resize(Extent2D::new(size.width, size.height));
                }
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            logical_key: Key::Character(key),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => {
                    active.config().update(|config| match key.as_str() {
                        "o" => config.ssao.enabled = !config.ssao.enabled,
                        "b" => config.bloom.enabled = !config.bloom.enabled,
                        "r" => config.ssr.enabled = !config.ssr.enabled,
                        "a" => config.atmosphere.enabled = !config.atmosphere.enabled,
                        "s" => config.direct_shadows.enabled = !config.direct_shadows.enabled,
                        "v" => config.display.vsync = !config.display.vsync,
                        _ => {}
                    });
                }
                WindowEvent::RedrawRequested => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;
                    let result = scene
                        .submit(active, dt)
                        .and_then(|_| active.draw());
                    if let Err(e) = result {
                        log::error!("Frame failed: {}", e);
                        elwt.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => window.request_redraw(),
            _ => {}
        }
    })?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.headless {
        return run_headless(&args);
    }
    #[cfg(not(target_arch = "wasm32"))]
    return run_windowed(args);
    #[cfg(target_arch = "wasm32")]
    Err("windowed runs need a native target".into())
}
