//! Constant buffer sharing and parameter dirty tracking.

mod common;

use glam::Vec4;

use common::{null_device, snapshot, TINT_PROGRAM};

/// Same `Tint` block as [`TINT_PROGRAM`] behind different entry points.
const TINT_TWICE: &str = r#"
struct Tint {
    color: vec4<f32>,
    strength: f32,
}

@group(0) @binding(0) var<uniform> tint: Tint;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let y = f32(index >> 1u);
    return vec4<f32>(0.0, y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return tint.color * tint.strength * 2.0;
}
"#;

/// `Tint` with its members swapped, so every offset moves.
const TINT_REORDERED: &str = r#"
struct Tint {
    strength: f32,
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> tint: Tint;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(index & 1u);
    return vec4<f32>(x, 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return tint.color * tint.strength;
}
"#;

#[test]
fn identical_layouts_share_one_buffer() {
    let (mut device, _) = null_device(64, 64);
    let before = device.stats().constant_buffers;

    let a = device.create_shader("a", TINT_PROGRAM, "vs_main", Some("fs_main")).unwrap();
    let b = device.create_shader("b", TINT_TWICE, "vs_main", Some("fs_main")).unwrap();
    assert_eq!(device.stats().constant_buffers - before, 1);

    // Writing through one program is visible through the other.
    assert!(device.set_f32(a, "strength", 0.25));
    assert!(!device.set_f32(b, "strength", 0.25));
}

#[test]
fn a_moved_offset_gets_its_own_buffer() {
    let (mut device, _) = null_device(64, 64);
    let before = device.stats().constant_buffers;

    device.create_shader("a", TINT_PROGRAM, "vs_main", Some("fs_main")).unwrap();
    device
        .create_shader("reordered", TINT_REORDERED, "vs_main", Some("fs_main"))
        .unwrap();
    assert_eq!(device.stats().constant_buffers - before, 2);
}

#[test]
fn setting_an_equal_value_uploads_nothing() {
    let (mut device, counters) = null_device(64, 64);
    let shader = device.create_shader("tint", TINT_PROGRAM, "vs_main", Some("fs_main")).unwrap();
    device.set_shader(Some(shader));

    assert!(device.set_f32(shader, "strength", 1.5));
    let before = snapshot(&counters).constant_uploads;
    assert_eq!(device.flush_parameters(), 1);
    assert_eq!(snapshot(&counters).constant_uploads, before + 1);

    assert!(!device.set_f32(shader, "strength", 1.5));
    assert_eq!(device.flush_parameters(), 0);
    assert_eq!(snapshot(&counters).constant_uploads, before + 1);
}

#[test]
fn every_changed_write_marks_the_block_dirty() {
    let (mut device, _) = null_device(64, 64);
    let shader = device.create_shader("tint", TINT_PROGRAM, "vs_main", Some("fs_main")).unwrap();
    device.set_shader(Some(shader));
    device.flush_parameters();

    assert!(device.set_vec4(shader, "color", Vec4::new(1.0, 0.5, 0.25, 1.0)));
    assert!(device.set_f32(shader, "strength", 3.0));
    // Both parameters live in the same block.
    assert_eq!(device.flush_parameters(), 1);
}

#[test]
fn unknown_parameters_are_rejected() {
    let (mut device, counters) = null_device(64, 64);
    let shader = device.create_shader("tint", TINT_PROGRAM, "vs_main", Some("fs_main")).unwrap();
    device.set_shader(Some(shader));
    device.flush_parameters();
    let before = snapshot(&counters).constant_uploads;

    assert!(!device.set_f32(shader, "exposure", 2.0));
    assert!(!device.set_f32(shader, "exposure", 2.0));
    assert_eq!(device.flush_parameters(), 0);
    assert_eq!(snapshot(&counters).constant_uploads, before);
}

#[test]
fn draws_flush_before_submitting() {
    let (mut device, counters) = null_device(64, 64);
    let shader = device.create_shader("tint", TINT_PROGRAM, "vs_main", Some("fs_main")).unwrap();
    device.set_shader(Some(shader));
    device.draw_fullscreen();
    let before = snapshot(&counters).constant_uploads;

    device.set_f32(shader, "strength", 0.5);
    device.draw_fullscreen();
    device.draw_fullscreen();

    let after = snapshot(&counters);
    assert_eq!(after.constant_uploads, before + 1);
    assert_eq!(after.draws, 3);
}
