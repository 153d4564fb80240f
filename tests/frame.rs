//! Jitter cycle, camera history and GPU frame timing across device frames.

mod common;

use glam::{Mat4, Vec2, Vec3};
use rstest::rstest;

use render_core::frame::{jitter_offset, jitter_sequence, JITTER_SEQUENCE_LEN, TIMER_RING_LEN};
use render_core::FrameOrchestrator;

use common::null_device;

fn proj() -> Mat4 {
    Mat4::perspective_rh(1.2, 16.0 / 9.0, 0.1, 200.0)
}

fn look_from(x: f32) -> Mat4 {
    Mat4::look_at_rh(Vec3::new(x, 2.0, 6.0), Vec3::ZERO, Vec3::Y)
}

#[rstest]
#[case(0)]
#[case(5)]
#[case(15)]
#[case(1_000_003)]
fn jitter_repeats_every_sixteen_frames(#[case] frame: u64) {
    let a = jitter_offset(frame);
    let b = jitter_offset(frame + JITTER_SEQUENCE_LEN as u64);
    assert_eq!(a.x.to_bits(), b.x.to_bits());
    assert_eq!(a.y.to_bits(), b.y.to_bits());
}

#[test]
fn jitter_stays_within_half_a_pixel() {
    for offset in jitter_sequence() {
        assert!(offset.x.abs() < 0.5 && offset.y.abs() < 0.5, "{offset:?}");
    }
    assert_ne!(jitter_offset(0), jitter_offset(1));
}

#[test]
fn first_frame_of_a_view_uses_itself_as_history() {
    let (mut device, _) = null_device(320, 180);
    let mut frames = FrameOrchestrator::new(true, 1.0);
    let frame = frames.frame_begin(&mut device, 9, look_from(0.0), proj(), (320, 180), true);
    assert!(frame.first_frame);
    assert_eq!(frame.prev, frame.current);
    frames.frame_end(&mut device, 9);
}

#[test]
fn jitter_follows_the_device_frame() {
    let (mut device, _) = null_device(320, 180);
    let mut frames = FrameOrchestrator::new(true, 1.0);
    for _ in 0..(JITTER_SEQUENCE_LEN + 2) {
        let frame = frames.frame_begin(&mut device, 0, look_from(0.0), proj(), (320, 180), true);
        assert_eq!(frame.current.jitter, jitter_offset(device.frame()));
        frames.frame_end(&mut device, 0);
        device.update();
    }
}

#[test]
fn history_tracks_the_previous_camera_and_rejitters_it() {
    let (mut device, _) = null_device(320, 180);
    let mut frames = FrameOrchestrator::new(true, 1.0);
    let viewport = Vec2::new(320.0, 180.0);

    for step in 0..4 {
        let frame = frames.frame_begin(&mut device, 0, look_from(step as f32), proj(), (320, 180), true);
        if step > 0 {
            assert_eq!(frame.prev.view, look_from(step as f32 - 1.0));
            // Previous jitter is replaced by the current one.
            let shifted = render_core::frame::apply_jitter(proj(), frame.current.jitter, viewport);
            assert_eq!(frame.prev_view_proj_rejittered, shifted * frame.prev.view);
        }
        frames.frame_end(&mut device, 0);
        device.update();
    }
}

#[test]
fn disabling_temporal_aa_removes_jitter() {
    let (mut device, _) = null_device(320, 180);
    let mut frames = FrameOrchestrator::new(true, 1.0);
    frames.set_temporal_aa(false);
    let frame = frames.frame_begin(&mut device, 0, look_from(0.0), proj(), (320, 180), true);
    assert_eq!(frame.current.jitter, Vec2::ZERO);
    assert_eq!(frame.current.view_proj_jittered, frame.current.view_proj);
}

#[test]
fn gpu_time_appears_after_a_full_timer_ring() {
    let (mut device, counters) = null_device(64, 64);
    let mut frames = FrameOrchestrator::new(false, 1.0);
    for _ in 0..TIMER_RING_LEN {
        frames.frame_begin(&mut device, 0, Mat4::IDENTITY, proj(), (64, 64), false);
        frames.frame_end(&mut device, 0);
        device.update();
        assert_eq!(frames.gpu_frame_time(0), None);
    }
    frames.frame_begin(&mut device, 0, Mat4::IDENTITY, proj(), (64, 64), false);
    frames.frame_end(&mut device, 0);
    assert!(frames.gpu_frame_time(0).is_some());
    assert_eq!(counters.lock().timers_begun, TIMER_RING_LEN + 1);
}

#[test]
fn forgotten_views_start_over() {
    let (mut device, _) = null_device(64, 64);
    let mut frames = FrameOrchestrator::new(true, 1.0);
    frames.frame_begin(&mut device, 3, look_from(0.0), proj(), (64, 64), true);
    frames.frame_end(&mut device, 3);
    device.update();
    frames.forget_view(3);
    let frame = frames.frame_begin(&mut device, 3, look_from(1.0), proj(), (64, 64), true);
    assert!(frame.first_frame);
}
