//! Sub-pixel projection jitter

use glam::{Mat4, Vec2, Vec3};

/// Length of the jitter cycle
pub const JITTER_SEQUENCE_LEN: usize = 16;

/// Radical inverse of `index` in `base`
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut result = 0.0;
    let mut fraction = 1.0 / base as f32;
    while index > 0 {
        result += (index % base) as f32 * fraction;
        index /= base;
        fraction /= base as f32;
    }
    result
}

/// Halton(2, 3) offsets in pixels, centered on zero
pub fn jitter_sequence() -> [Vec2; JITTER_SEQUENCE_LEN] {
    std::array::from_fn(|i| {
        // Index 0 of the sequence is the origin; start at 1.
        let i = i as u32 + 1;
        Vec2::new(halton(i, 2) - 0.5, halton(i, 3) - 0.5)
    })
}

/// Jitter offset for a frame, in pixels
pub fn jitter_offset(frame: u64) -> Vec2 {
    jitter_sequence()[(frame % JITTER_SEQUENCE_LEN as u64) as usize]
}

/// Shift the projection's principal point by `offset` pixels of a `viewport` sized target.
///
/// The translation happens in clip space, so it works for perspective and
/// orthographic projections alike.
pub fn apply_jitter(proj: Mat4, offset: Vec2, viewport: Vec2) -> Mat4 {
    if offset == Vec2::ZERO || viewport.x <= 0.0 || viewport.y <= 0.0 {
        return proj;
    }
    let ndc = Vec3::new(offset.x * 2.0 / viewport.x, offset.y * 2.0 / viewport.y, 0.0);
    Mat4::from_translation(ndc) * proj
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn halton_matches_known_values() {
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(2, 2), 0.25);
        assert_eq!(halton(3, 2), 0.75);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-6);
        assert!((halton(2, 3) - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn offsets_stay_within_half_a_pixel() {
        for offset in jitter_sequence() {
            assert!(offset.x.abs() <= 0.5 && offset.y.abs() <= 0.5);
        }
    }

    #[test]
    fn jitter_moves_projected_points_by_the_offset() {
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let jittered = apply_jitter(proj, Vec2::new(0.5, -0.25), Vec2::new(100.0, 100.0));
        let point = Vec4::new(0.3, 0.2, -5.0, 1.0);
        let a = proj * point;
        let b = jittered * point;
        let delta_x = b.x / b.w - a.x / a.w;
        let delta_y = b.y / b.w - a.y / a.w;
        assert!((delta_x - 0.01).abs() < 1e-5);
        assert!((delta_y + 0.005).abs() < 1e-5);
        assert_eq!(a.z / a.w, b.z / b.w);
    }
}
