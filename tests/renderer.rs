//! Whole frames through both render paths.

mod common;

use glam::{Mat4, Vec3};
use rstest::rstest;

use render_core::backend::FillMode;
use render_core::scene::{EnvironmentType, StandardMaterial};
use render_core::{
    BackendPreference, Camera, DeviceConfig, Environment, Mesh, MeshData, NullCounters, RenderDevice,
    RenderLight, RenderObject, RenderPath, RenderScene, Renderer, RendererConfig, ViewMode,
};

use common::{init_logger, null_device, snapshot, Counters};

struct Assets {
    cube: Mesh,
    floor: Mesh,
    lamp: Mesh,
    red: StandardMaterial,
    grey: StandardMaterial,
    light: StandardMaterial,
}

impl Assets {
    fn new(device: &mut RenderDevice) -> Self {
        Self {
            cube: device.create_mesh(&MeshData::cube()).unwrap(),
            floor: device.create_mesh(&MeshData::plane(4.0, 4.0, 1)).unwrap(),
            lamp: device.create_mesh(&MeshData::quad()).unwrap(),
            red: StandardMaterial::plastic(Vec3::new(0.9, 0.1, 0.1)),
            grey: StandardMaterial::rubber(Vec3::splat(0.5)),
            light: StandardMaterial::emissive(Vec3::ONE, 5.0),
        }
    }

    fn scene(&self, env_type: EnvironmentType) -> RenderScene<'_> {
        let mut scene = RenderScene::new().with_environment(Environment {
            env_type,
            ..Default::default()
        });
        scene.add_object(RenderObject::new(1, &self.floor, &self.grey, Mat4::IDENTITY));
        scene.add_object(RenderObject::new(
            2,
            &self.cube,
            &self.red,
            Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0)),
        ));
        scene.add_object(RenderObject::new(
            3,
            &self.lamp,
            &self.light,
            Mat4::from_translation(Vec3::new(0.0, 2.5, 0.0)),
        ));
        scene.add_light(RenderLight::directional(1, Vec3::new(-0.3, -1.0, -0.2), Vec3::ONE, 3.0));
        scene
    }

    /// A row of `count` red cubes lit by `lights` directional lights.
    fn cubes(&self, count: usize, lights: usize) -> RenderScene<'_> {
        let mut scene = RenderScene::new();
        for i in 0..count {
            let offset = Vec3::new(i as f32 * 1.5 - 3.0, 0.5, 0.0);
            let world = Mat4::from_translation(offset);
            scene.add_object(RenderObject::new(10 + i as u64, &self.cube, &self.red, world));
        }
        for i in 0..lights {
            let direction = Vec3::new(i as f32, -1.0, 0.0);
            scene.add_light(RenderLight::directional(i as u64, direction, Vec3::ONE, 1.0));
        }
        scene
    }
}

fn camera(width: u32, height: u32) -> Camera {
    let mut camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO);
    camera.set_aspect(width as f32, height as f32);
    camera
}

/// Render one frame and return the counter deltas it produced.
fn one_frame(
    renderer: &mut Renderer,
    device: &mut RenderDevice,
    counters: &Counters,
    scene: &RenderScene<'_>,
    outlined: Option<&[RenderObject<'_>]>,
) -> NullCounters {
    let camera = camera(64, 64);
    let before = snapshot(counters);
    renderer
        .render_frame(device, 0, scene, camera.view_matrix(), camera.projection_matrix(), outlined)
        .unwrap();
    let after = snapshot(counters);
    NullCounters {
        draws: after.draws - before.draws,
        clears: after.clears - before.clears,
        buffer_writes: after.buffer_writes - before.buffer_writes,
        ..Default::default()
    }
}

#[rstest]
fn realtime_modes_render_and_leave_the_stack_balanced(
    #[values(
        ViewMode::Final,
        ViewMode::Albedo,
        ViewMode::Normal,
        ViewMode::Material,
        ViewMode::Velocity,
        ViewMode::Diffuse,
        ViewMode::Specular,
        ViewMode::Depth
    )]
    mode: ViewMode,
    #[values(false, true)] wireframe: bool,
) {
    let (mut device, counters) = null_device(96, 64);
    let assets = Assets::new(&mut device);
    let mut renderer = Renderer::new(&mut device, RendererConfig::default());
    renderer.set_view_mode(0, mode);
    let camera = camera(96, 64);

    for _ in 0..3 {
        let scene = assets.scene(EnvironmentType::Sky);
        let outlined = wireframe.then_some(scene.objects.as_slice());
        renderer
            .render_frame(&mut device, 0, &scene, camera.view_matrix(), camera.projection_matrix(), outlined)
            .unwrap();
        assert_eq!(device.state_stack_depth(), 0);
    }

    let counters = snapshot(&counters);
    assert!(counters.draws > 0);
    assert_eq!(counters.frames, 3);
    // Every transient target went back to the pool.
    let stats = device.stats();
    assert_eq!(stats.free_render_targets, stats.render_targets);
}

#[rstest]
#[case(EnvironmentType::SolidColor)]
#[case(EnvironmentType::Gradient)]
#[case(EnvironmentType::Sky)]
fn path_tracer_accumulates_while_nothing_moves(#[case] env_type: EnvironmentType) {
    let (mut device, counters) = null_device(64, 64);
    let assets = Assets::new(&mut device);
    let mut renderer = Renderer::new(&mut device, RendererConfig::default());
    renderer.set_view_path(0, RenderPath::PathTraced);
    let camera = camera(64, 64);

    for _ in 0..4 {
        let scene = assets.scene(env_type);
        renderer
            .render_frame(&mut device, 0, &scene, camera.view_matrix(), camera.projection_matrix(), None)
            .unwrap();
    }
    assert_eq!(renderer.path_tracer().sample_count(), 4);
    assert_eq!(snapshot(&counters).dispatches, 4);
    assert_eq!(device.state_stack_depth(), 0);

    let moved = Mat4::from_translation(Vec3::X) * camera.view_matrix();
    let scene = assets.scene(env_type);
    renderer
        .render_frame(&mut device, 0, &scene, moved, camera.projection_matrix(), None)
        .unwrap();
    assert_eq!(renderer.path_tracer().sample_count(), 1);
}

#[rstest]
#[case::direct(1, 0)]
#[case::multisampled(4, 1)]
fn wireframe_outlines_only_the_given_objects(#[case] samples: u32, #[case] resolve_draws: usize) {
    let (mut device, counters) = null_device(64, 64);
    let assets = Assets::new(&mut device);
    let config = RendererConfig {
        temporal_aa: false,
        wireframe_msaa_samples: samples,
        ..Default::default()
    };
    let mut renderer = Renderer::new(&mut device, config);
    let scene = assets.cubes(5, 1);

    one_frame(&mut renderer, &mut device, &counters, &scene, None);
    let plain = one_frame(&mut renderer, &mut device, &counters, &scene, None).draws;
    for count in [1, 2, 5] {
        let outlined = &scene.objects[..count];
        let draws = one_frame(&mut renderer, &mut device, &counters, &scene, Some(outlined)).draws;
        assert_eq!(draws - plain, count + resolve_draws, "{count} outlined");
        assert_eq!(device.state().raster.fill, FillMode::Solid);
    }

    let nothing = &scene.objects[..0];
    let empty = one_frame(&mut renderer, &mut device, &counters, &scene, Some(nothing)).draws;
    assert_eq!(empty, plain);
}

#[test]
fn lighting_is_skipped_without_lights() {
    let (mut device, counters) = null_device(64, 64);
    let assets = Assets::new(&mut device);
    let config = RendererConfig {
        temporal_aa: false,
        ..Default::default()
    };
    let mut renderer = Renderer::new(&mut device, config);

    let lit_scene = assets.cubes(3, 2);
    one_frame(&mut renderer, &mut device, &counters, &lit_scene, None);
    let lit = one_frame(&mut renderer, &mut device, &counters, &lit_scene, None);
    let dark = one_frame(&mut renderer, &mut device, &counters, &assets.cubes(3, 0), None);

    assert_eq!(lit.draws - dark.draws, lit_scene.lights.len());
    // Diffuse and specular are still cleared.
    assert_eq!(dark.clears, lit.clears);
    assert_eq!(device.state_stack_depth(), 0);
}

#[test]
fn scene_edits_restart_accumulation_and_reupload_triangles() {
    let (mut device, counters) = null_device(64, 64);
    let assets = Assets::new(&mut device);
    let mut renderer = Renderer::new(&mut device, RendererConfig::default());
    renderer.set_view_path(0, RenderPath::PathTraced);

    let base = assets.scene(EnvironmentType::Gradient);
    for _ in 0..3 {
        one_frame(&mut renderer, &mut device, &counters, &base, None);
    }
    assert_eq!(renderer.path_tracer().sample_count(), 3);
    let unchanged = one_frame(&mut renderer, &mut device, &counters, &base, None);
    assert_eq!(unchanged.buffer_writes, 0);
    assert_eq!(renderer.path_tracer().sample_count(), 4);

    let mut added = assets.scene(EnvironmentType::Gradient);
    added.add_object(RenderObject::new(
        9,
        &assets.cube,
        &assets.grey,
        Mat4::from_translation(Vec3::new(1.5, 0.5, 0.0)),
    ));
    let frame = one_frame(&mut renderer, &mut device, &counters, &added, None);
    assert!(frame.buffer_writes > 0);
    assert_eq!(renderer.path_tracer().sample_count(), 1);
    let triangles = renderer.path_tracer().triangle_buffer().unwrap();
    assert_eq!(triangles.len(), 16 + 12);

    one_frame(&mut renderer, &mut device, &counters, &added, None);
    assert_eq!(renderer.path_tracer().sample_count(), 2);

    let mut moved = assets.scene(EnvironmentType::Gradient);
    moved.add_object(RenderObject::new(
        9,
        &assets.cube,
        &assets.grey,
        Mat4::from_translation(Vec3::new(-1.5, 0.5, 0.0)),
    ));
    let frame = one_frame(&mut renderer, &mut device, &counters, &moved, None);
    assert!(frame.buffer_writes > 0);
    assert_eq!(renderer.path_tracer().sample_count(), 1);
}

fn with_grid<'a>(assets: &'a Assets, grid: &'a Mesh, height: f32) -> RenderScene<'a> {
    let mut scene = assets.scene(EnvironmentType::SolidColor);
    scene.add_object(RenderObject::new(
        20,
        grid,
        &assets.grey,
        Mat4::from_translation(Vec3::new(0.0, height, 0.0)),
    ));
    scene
}

#[test]
fn triangle_buffer_grows_only_past_its_capacity() {
    let (mut device, counters) = null_device(64, 64);
    let assets = Assets::new(&mut device);
    // 128 and 288 triangles
    let small_grid = device.create_mesh(&MeshData::plane(2.0, 2.0, 8)).unwrap();
    let large_grid = device.create_mesh(&MeshData::plane(2.0, 2.0, 12)).unwrap();
    let mut renderer = Renderer::new(&mut device, RendererConfig::default());
    renderer.set_view_path(0, RenderPath::PathTraced);
    let capacity = renderer.path_tracer().triangle_buffer().unwrap().capacity();
    assert_eq!(capacity, 256);

    one_frame(&mut renderer, &mut device, &counters, &with_grid(&assets, &small_grid, 1.0), None);
    let triangles = renderer.path_tracer().triangle_buffer().unwrap();
    assert_eq!(triangles.len(), 16 + 128);
    assert_eq!(triangles.reallocations(), 0);

    one_frame(&mut renderer, &mut device, &counters, &with_grid(&assets, &large_grid, 1.0), None);
    let triangles = renderer.path_tracer().triangle_buffer().unwrap();
    assert_eq!(triangles.len(), 16 + 288);
    assert_eq!(triangles.reallocations(), 1);
    assert!(triangles.capacity() >= 16 + 288);

    // Same size, new transform: uploaded again into the existing storage.
    let raised = with_grid(&assets, &large_grid, 2.0);
    let frame = one_frame(&mut renderer, &mut device, &counters, &raised, None);
    assert!(frame.buffer_writes > 0);
    assert_eq!(renderer.path_tracer().triangle_buffer().unwrap().reallocations(), 1);
    assert_eq!(renderer.path_tracer().sample_count(), 1);
}

#[test]
fn switching_paths_restarts_accumulation() {
    let (mut device, _) = null_device(32, 32);
    let assets = Assets::new(&mut device);
    let mut renderer = Renderer::new(&mut device, RendererConfig::default());
    let camera = camera(32, 32);
    renderer.set_view_path(0, RenderPath::PathTraced);

    for _ in 0..2 {
        let scene = assets.scene(EnvironmentType::Gradient);
        renderer
            .render_frame(&mut device, 0, &scene, camera.view_matrix(), camera.projection_matrix(), None)
            .unwrap();
    }
    assert_eq!(renderer.path_tracer().sample_count(), 2);

    renderer.set_view_path(0, RenderPath::Realtime);
    assert_eq!(renderer.path_tracer().sample_count(), 0);
}

#[test]
fn temporal_history_survives_across_frames() {
    let (mut device, counters) = null_device(48, 48);
    let assets = Assets::new(&mut device);
    let mut renderer = Renderer::new(&mut device, RendererConfig::default());
    let camera = camera(48, 48);

    for _ in 0..6 {
        let scene = assets.scene(EnvironmentType::SolidColor);
        renderer
            .render_frame(&mut device, 0, &scene, camera.view_matrix(), camera.projection_matrix(), None)
            .unwrap();
    }
    assert_eq!(device.stats().prev_targets, 1);
    // Pooled targets are reused rather than recreated every frame.
    let created = snapshot(&counters).textures_created;
    let scene = assets.scene(EnvironmentType::SolidColor);
    renderer
        .render_frame(&mut device, 0, &scene, camera.view_matrix(), camera.projection_matrix(), None)
        .unwrap();
    assert_eq!(snapshot(&counters).textures_created, created);
}

#[test]
fn empty_scene_still_presents() {
    let (mut device, counters) = null_device(32, 32);
    let mut renderer = Renderer::new(&mut device, RendererConfig::default());
    let scene = RenderScene::new();
    renderer
        .render_frame(&mut device, 0, &scene, Mat4::IDENTITY, Mat4::IDENTITY, None)
        .unwrap();
    assert_eq!(snapshot(&counters).frames, 1);
}

/// Needs a GPU adapter; skipped where none is available.
#[test]
fn wgpu_headless_frames() {
    init_logger();
    let config = DeviceConfig {
        backend: BackendPreference::Auto,
        headless_size: (64, 64),
        shader_dump_dir: None,
        ..Default::default()
    };
    let mut device = match RenderDevice::new(None, config) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("skipping: no wgpu adapter ({e})");
            return;
        }
    };
    let assets = Assets::new(&mut device);
    let mut renderer = Renderer::new(&mut device, RendererConfig::default());
    let camera = camera(64, 64);

    for path in [RenderPath::Realtime, RenderPath::PathTraced] {
        renderer.set_view_path(0, path);
        for _ in 0..2 {
            let scene = assets.scene(EnvironmentType::Sky);
            renderer
                .render_frame(
                    &mut device,
                    0,
                    &scene,
                    camera.view_matrix(),
                    camera.projection_matrix(),
                    Some(scene.objects.as_slice()),
                )
                .unwrap();
        }
    }
    assert_eq!(device.state_stack_depth(), 0);
}
