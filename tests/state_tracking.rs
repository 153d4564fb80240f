//! Redundant-state elimination and the state stack.

mod common;

use render_core::backend::{BlendDesc, BlendFactor, CompareFunction, CullMode, FillMode, TextureFormat};
use render_core::resources::RenderTargetDesc;

use common::{null_device, snapshot, TINT_PROGRAM};

#[test]
fn equal_blend_states_bind_once() {
    let (mut device, counters) = null_device(64, 64);
    let before = snapshot(&counters).blend_binds;

    device.set_blend_state(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
    device.set_blend_state(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);
    device.set_blend_state(BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha);

    assert_eq!(snapshot(&counters).blend_binds - before, 1);
}

#[test]
fn two_descriptors_bind_twice_and_pop_rebinds_the_first() {
    let (mut device, counters) = null_device(64, 64);
    device.set_blend(BlendDesc::ALPHA);
    let after_first = snapshot(&counters).blend_binds;

    device.push_states();
    device.set_blend(BlendDesc::ADDITIVE);
    assert_eq!(snapshot(&counters).blend_binds, after_first + 1);

    device.pop_states();
    let counters = snapshot(&counters);
    assert_eq!(counters.blend_binds, after_first + 2);
    assert_eq!(counters.bound_blend, Some(BlendDesc::ALPHA));
    assert_eq!(device.state().blend, BlendDesc::ALPHA);
}

#[test]
fn pop_without_changes_binds_nothing() {
    let (mut device, counters) = null_device(64, 64);
    device.set_culling_mode(CullMode::None);
    let before = snapshot(&counters);

    device.push_states();
    device.pop_states();

    let after = snapshot(&counters);
    assert_eq!(after.blend_binds, before.blend_binds);
    assert_eq!(after.depth_binds, before.depth_binds);
    assert_eq!(after.raster_binds, before.raster_binds);
    assert_eq!(device.state_stack_depth(), 0);
}

#[test]
fn pop_on_empty_stack_is_a_no_op() {
    let (mut device, counters) = null_device(64, 64);
    let before = snapshot(&counters);
    device.pop_states();
    assert_eq!(snapshot(&counters).raster_binds, before.raster_binds);
}

#[test]
fn depth_and_raster_setters_share_cached_objects() {
    let (mut device, counters) = null_device(64, 64);
    device.set_depth_func(CompareFunction::LessEqual);
    device.set_depth_func(CompareFunction::Less);
    device.set_depth_func(CompareFunction::LessEqual);
    device.set_filling_mode(FillMode::Wireframe);
    device.set_filling_mode(FillMode::Solid);
    device.set_filling_mode(FillMode::Wireframe);

    let counters = snapshot(&counters);
    // Default plus LessEqual; default plus wireframe
    assert_eq!(counters.depth_states_created, 2);
    assert_eq!(counters.raster_states_created, 2);
    assert_eq!(counters.depth_binds, 1 + 3);
    assert_eq!(counters.raster_binds, 1 + 3);
}

#[test]
fn shader_and_targets_are_diffed() {
    let (mut device, counters) = null_device(64, 64);
    let shader = device
        .create_shader("tint", TINT_PROGRAM, "vs_main", Some("fs_main"))
        .expect("program builds");
    let target = device
        .get_render_texture(&RenderTargetDesc::new(64, 64, TextureFormat::Rgba8Unorm))
        .unwrap();
    let before = snapshot(&counters);

    for _ in 0..3 {
        device.set_shader(Some(shader));
        device.set_render_targets(&[target.texture], None);
        device.bind_textures(&[Some(target.texture)]);
    }

    let after = snapshot(&counters);
    assert_eq!(after.shader_binds - before.shader_binds, 1);
    assert_eq!(after.render_target_binds - before.render_target_binds, 1);
    assert_eq!(after.texture_binds - before.texture_binds, 1);
}

#[test]
fn binding_a_destroyed_program_is_rejected() {
    let (mut device, _) = null_device(64, 64);
    let shader = device
        .create_shader("tint", TINT_PROGRAM, "vs_main", Some("fs_main"))
        .unwrap();
    device.destroy_shader(shader);
    device.set_shader(Some(shader));
    assert_eq!(device.state().shader, None);
}
