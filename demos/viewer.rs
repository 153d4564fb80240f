//! Scene viewer
//!
//! Renders a small scene with either render path.
//!
//! Keys: `P` switches path, `V` cycles the view mode, `W` toggles the
//! wireframe overlay on the scene's objects, `T` toggles temporal
//! anti-aliasing, arrows orbit the camera, `+`/`-` zoom and `Esc` quits.
//!
//! `--headless` renders offscreen for `--frames` frames and exits.

use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use glam::{Mat4, Vec3};
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

use render_core::scene::{EnvironmentType, StandardMaterial};
use render_core::{
    BackendPreference, Camera, DeviceConfig, Environment, Mesh, MeshData, RenderDevice, RenderLight,
    RenderObject, RenderPath, RenderScene, Renderer, RendererConfig,
};

const VIEW_ID: u64 = 0;
const ORBIT_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliBackend {
    Auto,
    Hardware,
    Software,
    Null,
}

impl From<CliBackend> for BackendPreference {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Auto => BackendPreference::Auto,
            CliBackend::Hardware => BackendPreference::Hardware,
            CliBackend::Software => BackendPreference::Software,
            CliBackend::Null => BackendPreference::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPath {
    Realtime,
    PathTraced,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliEnvironment {
    Solid,
    Gradient,
    Sky,
}

/// Render core scene viewer
#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Renders a small scene with the realtime or path-traced path")]
struct Args {
    /// Graphics backend to use
    #[arg(long, default_value = "auto", value_enum)]
    backend: CliBackend,

    /// Initial render path
    #[arg(long, default_value = "realtime", value_enum)]
    path: CliPath,

    /// Background model
    #[arg(long, default_value = "sky", value_enum)]
    environment: CliEnvironment,

    /// Window (or offscreen) width in pixels
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Window (or offscreen) height in pixels
    #[arg(long, default_value = "720")]
    height: u32,

    /// Disable temporal anti-aliasing
    #[arg(long)]
    no_taa: bool,

    /// Start with the wireframe overlay on
    #[arg(long)]
    wireframe: bool,

    /// Sample count of the wireframe overlay; 1 draws directly
    #[arg(long, default_value = "4")]
    msaa: u32,

    /// Path tracer bounces per sample
    #[arg(long, default_value = "4")]
    bounces: u32,

    /// Disable vsync
    #[arg(long)]
    no_vsync: bool,

    /// Render without a window
    #[arg(long)]
    headless: bool,

    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

struct SceneAssets {
    cube: Mesh,
    sphere: Mesh,
    floor: Mesh,
    lamp: Mesh,
    red: StandardMaterial,
    gold: StandardMaterial,
    floor_material: StandardMaterial,
    lamp_material: StandardMaterial,
    environment: Environment,
}

impl SceneAssets {
    fn new(device: &mut RenderDevice, env_type: EnvironmentType) -> Self {
        let mut mesh = |data: MeshData| device.create_mesh(&data).expect("Failed to create mesh");
        Self {
            cube: mesh(MeshData::cube()),
            sphere: mesh(MeshData::sphere(32, 16)),
            floor: mesh(MeshData::plane(10.0, 10.0, 4)),
            lamp: mesh(MeshData::quad()),
            red: StandardMaterial::plastic(Vec3::new(0.8, 0.1, 0.1)),
            gold: StandardMaterial::gold(),
            floor_material: StandardMaterial::rubber(Vec3::splat(0.6)),
            lamp_material: StandardMaterial::emissive(Vec3::new(1.0, 0.9, 0.7), 8.0),
            environment: Environment {
                env_type,
                ..Default::default()
            },
        }
    }

    fn scene(&self, time: f32) -> RenderScene<'_> {
        let spin = Mat4::from_rotation_y(time * 0.5);
        let mut scene = RenderScene::new().with_environment(self.environment);
        scene.add_object(RenderObject::new(
            1,
            &self.floor,
            &self.floor_material,
            Mat4::IDENTITY,
        ));
        scene.add_object(RenderObject::new(
            2,
            &self.cube,
            &self.red,
            Mat4::from_translation(Vec3::new(-1.2, 0.5, 0.0)) * spin,
        ));
        scene.add_object(RenderObject::new(
            3,
            &self.sphere,
            &self.gold,
            Mat4::from_translation(Vec3::new(1.2, 0.5, 0.0)),
        ));
        scene.add_object(RenderObject::new(
            4,
            &self.lamp,
            &self.lamp_material,
            Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0))
                * Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2),
        ));
        scene.add_light(RenderLight::directional(
            1,
            Vec3::new(-0.4, -1.0, -0.3),
            Vec3::new(1.0, 0.95, 0.9),
            2.5,
        ));
        scene
    }
}

/// Everything but the floor gets the wireframe overlay.
fn outlined<'s, 'a>(scene: &'s RenderScene<'a>) -> &'s [RenderObject<'a>] {
    scene.objects.get(1..).unwrap_or(&[])
}

struct Viewer {
    device: RenderDevice,
    renderer: Renderer,
    assets: SceneAssets,
    camera: Camera,
    wireframe: bool,
    started: Instant,
    frames: u64,
    max_frames: Option<u64>,
}

impl Viewer {
    fn new(mut device: RenderDevice, args: &Args) -> Self {
        let config = RendererConfig {
            temporal_aa: !args.no_taa,
            wireframe_msaa_samples: args.msaa,
            max_bounces: args.bounces,
            ..Default::default()
        };
        let mut renderer = Renderer::new(&mut device, config);
        let path = match args.path {
            CliPath::Realtime => RenderPath::Realtime,
            CliPath::PathTraced => RenderPath::PathTraced,
        };
        renderer.set_view_path(VIEW_ID, path);
        let env_type = match args.environment {
            CliEnvironment::Solid => EnvironmentType::SolidColor,
            CliEnvironment::Gradient => EnvironmentType::Gradient,
            CliEnvironment::Sky => EnvironmentType::Sky,
        };
        let assets = SceneAssets::new(&mut device, env_type);
        let (width, height) = device.surface_size();
        let mut camera = Camera::new(Vec3::new(0.0, 2.0, 6.0), Vec3::new(0.0, 0.5, 0.0));
        camera.set_aspect(width as f32, height as f32);

        Self {
            device,
            renderer,
            assets,
            camera,
            wireframe: args.wireframe,
            started: Instant::now(),
            frames: 0,
            max_frames: args.frames,
        }
    }

    /// Render one frame. Returns `false` once the frame limit is reached.
    fn frame(&mut self) -> bool {
        let time = self.started.elapsed().as_secs_f32();
        let scene = self.assets.scene(time);
        if let Err(e) = self.renderer.render_frame(
            &mut self.device,
            VIEW_ID,
            &scene,
            self.camera.view_matrix(),
            self.camera.projection_matrix(),
            self.wireframe.then(|| outlined(&scene)),
        ) {
            log::warn!("Frame failed: {}", e);
        }

        self.frames += 1;
        if self.frames % 120 == 0 {
            let stats = self.device.stats();
            log::info!(
                "Frame {}: {} pooled targets ({} free), {} history, {} constant buffers, gpu {:?} ms, {} path samples",
                stats.frame,
                stats.render_targets,
                stats.free_render_targets,
                stats.prev_targets,
                stats.constant_buffers,
                self.renderer.frames().gpu_frame_time(VIEW_ID),
                self.renderer.path_tracer().sample_count()
            );
        }
        self.max_frames.map_or(true, |max| self.frames < max)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.device.resize(width, height);
        let (width, height) = self.device.surface_size();
        self.camera.set_aspect(width as f32, height as f32);
    }

    fn key(&mut self, code: KeyCode) {
        match code {
            KeyCode::KeyP => {
                let path = match self.renderer.view_path(VIEW_ID) {
                    RenderPath::Realtime => RenderPath::PathTraced,
                    RenderPath::PathTraced => RenderPath::Realtime,
                };
                log::info!("Render path: {:?}", path);
                self.renderer.set_view_path(VIEW_ID, path);
            }
            KeyCode::KeyV => {
                let mode = self.renderer.view_mode(VIEW_ID).next();
                log::info!("View mode: {:?}", mode);
                self.renderer.set_view_mode(VIEW_ID, mode);
            }
            KeyCode::KeyW => self.wireframe = !self.wireframe,
            KeyCode::KeyT => {
                let enabled = !self.renderer.config().temporal_aa;
                log::info!("Temporal AA: {}", enabled);
                self.renderer.set_temporal_aa(enabled);
            }
            KeyCode::ArrowLeft => self.camera.orbit(-ORBIT_STEP, 0.0),
            KeyCode::ArrowRight => self.camera.orbit(ORBIT_STEP, 0.0),
            KeyCode::ArrowUp => self.camera.orbit(0.0, ORBIT_STEP),
            KeyCode::ArrowDown => self.camera.orbit(0.0, -ORBIT_STEP),
            KeyCode::Equal => self.camera.zoom(0.9),
            KeyCode::Minus => self.camera.zoom(1.1),
            _ => {}
        }
    }
}

fn device_config(args: &Args) -> DeviceConfig {
    DeviceConfig {
        backend: args.backend.into(),
        vsync: !args.no_vsync,
        headless_size: (args.width, args.height),
        ..Default::default()
    }
}

fn run_headless(args: &Args) {
    let device = RenderDevice::new(None, device_config(args)).expect("No usable graphics backend");
    let mut viewer = Viewer::new(device, args);
    let frames = args.frames.unwrap_or(60);
    viewer.max_frames = Some(frames);
    while viewer.frame() {}
    log::info!("Rendered {} frames headless: {:?}", frames, viewer.device.stats());
}

fn run_windowed(args: &Args) {
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("render-core viewer")
            .with_inner_size(PhysicalSize::new(args.width, args.height))
            .build(&event_loop)
            .expect("Failed to create window"),
    );
    let device = RenderDevice::new(Some(window.clone()), device_config(args)).expect("No usable graphics backend");
    let mut viewer = Viewer::new(device, args);

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);
            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::Resized(size) => viewer.resize(size.width, size.height),
                    WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                physical_key: PhysicalKey::Code(code),
                                state: ElementState::Pressed,
                                repeat: false,
                                ..
                            },
                        ..
                    } => {
                        if code == KeyCode::Escape {
                            elwt.exit();
                        } else {
                            viewer.key(code);
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        if !viewer.frame() {
                            elwt.exit();
                        }
                    }
                    _ => {}
                },
                Event::AboutToWait => window.request_redraw(),
                _ => {}
            }
        })
        .expect("Event loop failed");
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    log::info!("Starting viewer: {:?}", args);

    if args.headless {
        run_headless(&args);
    } else {
        run_windowed(&args);
    }
}
