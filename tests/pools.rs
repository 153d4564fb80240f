//! Render-target pool, previous-frame registry and eviction.

mod common;

use rstest::rstest;

use render_core::backend::TextureFormat;
use render_core::resources::{PrevSemantic, RenderTargetDesc};

use common::{null_device, snapshot};

fn rgba8(size: u32) -> RenderTargetDesc {
    RenderTargetDesc::new(size, size, TextureFormat::Rgba8Unorm)
}

#[test]
fn two_gets_without_release_are_distinct() {
    let (mut device, _) = null_device(64, 64);
    let a = device.get_render_texture(&rgba8(128)).unwrap();
    let b = device.get_render_texture(&rgba8(128)).unwrap();
    assert_ne!(a.id, b.id);
    assert_ne!(a.texture, b.texture);
}

#[test]
fn release_then_get_returns_the_same_texture() {
    let (mut device, counters) = null_device(64, 64);
    let first = device.get_render_texture(&rgba8(128)).unwrap();
    device.release_render_texture(first.id);
    let second = device.get_render_texture(&rgba8(128)).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.texture, second.texture);
    assert_eq!(snapshot(&counters).textures_created, 1);
}

#[rstest]
#[case::samples(rgba8(128).with_samples(4))]
#[case::format(RenderTargetDesc::new(128, 128, TextureFormat::Rgba16Float))]
#[case::size(rgba8(256))]
#[case::history_flags(RenderTargetDesc::history(128, 128, TextureFormat::Rgba8Unorm))]
fn keys_must_match_exactly(#[case] other: RenderTargetDesc) {
    let (mut device, _) = null_device(64, 64);
    let first = device.get_render_texture(&rgba8(128)).unwrap();
    device.release_render_texture(first.id);
    let second = device.get_render_texture(&other).unwrap();
    assert_ne!(first.texture, second.texture);
}

#[test]
fn double_release_is_ignored() {
    let (mut device, _) = null_device(64, 64);
    let target = device.get_render_texture(&rgba8(32)).unwrap();
    device.release_render_texture(target.id);
    device.release_render_texture(target.id);
    assert_eq!(device.stats().free_render_targets, 1);
}

#[rstest]
#[case(1, false)]
#[case(3, false)]
#[case(4, true)]
#[case(6, true)]
fn released_targets_are_evicted_after_three_idle_frames(#[case] updates: u32, #[case] destroyed: bool) {
    let (mut device, counters) = null_device(64, 64);
    let target = device.get_render_texture(&rgba8(64)).unwrap();
    device.release_render_texture(target.id);
    for _ in 0..updates {
        device.update();
    }
    assert_eq!(snapshot(&counters).textures_destroyed == 1, destroyed);
    assert_eq!(device.render_target(target.id).is_none(), destroyed);
}

#[test]
fn checked_out_targets_are_never_evicted() {
    let (mut device, counters) = null_device(64, 64);
    let target = device.get_render_texture(&rgba8(64)).unwrap();
    for _ in 0..10 {
        device.update();
    }
    assert_eq!(snapshot(&counters).textures_destroyed, 0);
    assert!(device.render_target(target.id).is_some());
}

#[test]
fn end_to_end_512_rgba8() {
    let (mut device, counters) = null_device(64, 64);
    let desc = RenderTargetDesc::new(512, 512, TextureFormat::Rgba8Unorm);

    let target = device.get_render_texture(&desc).unwrap();
    device.write_texture(target.texture, &vec![0x80; 512 * 512 * 4]);
    device.release_render_texture(target.id);
    for _ in 0..3 {
        device.update();
    }
    assert_eq!(snapshot(&counters).textures_destroyed, 0);
    device.update();
    assert_eq!(snapshot(&counters).textures_destroyed, 1);
    assert_eq!(snapshot(&counters).destroyed_textures, vec![target.texture]);

    let again = device.get_render_texture(&desc).unwrap();
    assert_ne!(again.texture, target.texture);
    assert_eq!(snapshot(&counters).textures_created, 2);
}

#[test]
fn exchange_swaps_history_and_frees_the_target() {
    let (mut device, _) = null_device(64, 64);
    let format = TextureFormat::Rgba16Float;
    let prev = device
        .get_prev_render_texture(PrevSemantic::ColorHistory, 64, 64, format)
        .unwrap();
    assert!(prev.fresh);
    let current = device
        .get_render_texture(&RenderTargetDesc::history(64, 64, format))
        .unwrap();

    assert!(device.exchange_prev_render_texture(prev.id, current.id));
    assert_eq!(device.prev_render_texture(prev.id), Some(current.texture));
    assert_eq!(device.render_target(current.id).unwrap().texture, prev.texture);

    // The old history is back in the pool under the same key.
    let next = device
        .get_render_texture(&RenderTargetDesc::history(64, 64, format))
        .unwrap();
    assert_eq!(next.texture, prev.texture);
}

#[test]
fn exchange_with_a_free_target_fails_without_change() {
    let (mut device, _) = null_device(64, 64);
    let format = TextureFormat::Rgba16Float;
    let prev = device
        .get_prev_render_texture(PrevSemantic::PathTraceAccumulation, 32, 32, format)
        .unwrap();
    let current = device
        .get_render_texture(&RenderTargetDesc::history(32, 32, format))
        .unwrap();
    device.release_render_texture(current.id);

    assert!(!device.exchange_prev_render_texture(prev.id, current.id));
    assert_eq!(device.prev_render_texture(prev.id), Some(prev.texture));
}

#[test]
fn history_slots_are_per_semantic_and_evicted_when_idle() {
    let (mut device, counters) = null_device(64, 64);
    let format = TextureFormat::Rgba16Float;
    let color = device
        .get_prev_render_texture(PrevSemantic::ColorHistory, 16, 16, format)
        .unwrap();
    let accumulation = device
        .get_prev_render_texture(PrevSemantic::PathTraceAccumulation, 16, 16, format)
        .unwrap();
    assert_ne!(color.texture, accumulation.texture);
    assert_eq!(device.stats().prev_targets, 2);

    for _ in 0..4 {
        device.update();
    }
    assert_eq!(device.stats().prev_targets, 0);
    assert_eq!(snapshot(&counters).textures_destroyed, 2);
}
