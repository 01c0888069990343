//! Equal-power stereo panner

use std::f32::consts::FRAC_PI_2;

/// Pan a stereo frame. `pan` is -1.0 (left) to 1.0 (right); 0.0 leaves
/// the frame unchanged.
///
/// Panning toward one side folds the opposite channel into it with
/// equal-power gains, so a hard-panned stereo signal keeps its energy.
#[inline]
pub fn pan_stereo(left: f32, right: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        let (gain_l, gain_r) = (x.cos(), x.sin());
        (left + right * gain_l, right * gain_r)
    } else {
        let x = pan * FRAC_PI_2;
        let (gain_l, gain_r) = (x.cos(), x.sin());
        (left * gain_l, right + left * gain_r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
    }

    #[test]
    fn test_center_is_identity() {
        assert!(close(pan_stereo(0.3, -0.7, 0.0), (0.3, -0.7)));
    }

    #[test]
    fn test_hard_left_and_right() {
        assert!(close(pan_stereo(0.5, 0.25, -1.0), (0.75, 0.0)));
        assert!(close(pan_stereo(0.5, 0.25, 1.0), (0.0, 0.75)));
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(pan_stereo(0.5, 0.25, -4.0), pan_stereo(0.5, 0.25, -1.0));
    }

    #[test]
    fn test_half_right_is_equal_power() {
        let (l, r) = pan_stereo(1.0, 0.0, 0.5);
        // A mono source on the left moved halfway: both sides at -3 dB.
        assert!((l * l + r * r - 1.0).abs() < 1e-6);
        assert!((l - r).abs() < 1e-6);
    }
}
