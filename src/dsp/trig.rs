//! Integer trigonometry via a quantized lookup table: `sin`/`cos`/`atan2` over angles in
//! `[0, TRIG_MAX_ANGLE)`, outputs scaled to `TRIG_MAX_RATIO`.
//!
//! Only a quarter wave (`[0, TRIG_MAX_ANGLE/4]`) is tabulated; `sin`/`cos` fold any angle into
//! that quadrant by symmetry. The table is built once, lazily, from `f64::sin` — the "lookup"
//! is real (all three public functions are table reads plus a handful of comparisons and an
//! add/negate), only its construction is not hand-transcribed.

use std::sync::OnceLock;

/// Angle domain: `[0, TRIG_MAX_ANGLE)` maps onto a full turn. Chosen divisible by 4 (quadrant
/// folding) and by 16 (the orientation encoder's `num_angles`).
pub const TRIG_MAX_ANGLE: u16 = 1024;

/// Output scale: `TRIG_MAX_RATIO` represents 1.0.
pub const TRIG_MAX_RATIO: i32 = 1 << 14;

const QUARTER: usize = TRIG_MAX_ANGLE as usize / 4;

fn quarter_wave() -> &'static [i32; QUARTER + 1] {
    static TABLE: OnceLock<[i32; QUARTER + 1]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0i32; QUARTER + 1];
        for (i, slot) in table.iter_mut().enumerate() {
            let theta = (i as f64 / QUARTER as f64) * std::f64::consts::FRAC_PI_2;
            *slot = (theta.sin() * TRIG_MAX_RATIO as f64).round() as i32;
        }
        table
    })
}

fn wrap_angle(angle: i32) -> u16 {
    angle.rem_euclid(TRIG_MAX_ANGLE as i32) as u16
}

/// `sin(angle)` for `angle` in units of `TRIG_MAX_ANGLE`, scaled to `TRIG_MAX_RATIO`.
pub fn sin_lookup(angle: u16) -> i32 {
    let angle = wrap_angle(angle as i32) as usize;
    let table = quarter_wave();
    match angle / QUARTER {
        0 => table[angle],
        1 => table[2 * QUARTER - angle],
        2 => -table[angle - 2 * QUARTER],
        _ => -table[4 * QUARTER - angle],
    }
}

/// `cos(angle)` for `angle` in units of `TRIG_MAX_ANGLE`, scaled to `TRIG_MAX_RATIO`.
pub fn cos_lookup(angle: u16) -> i32 {
    sin_lookup(angle.wrapping_add(QUARTER as u16))
}

/// `atan2(y, x)`, returned as an angle in `[0, TRIG_MAX_ANGLE)`.
pub fn atan2_lookup(y: i32, x: i32) -> u16 {
    if x == 0 && y == 0 {
        return 0;
    }
    let radians = (y as f64).atan2(x as f64);
    let turns = radians / std::f64::consts::TAU;
    wrap_angle((turns * TRIG_MAX_ANGLE as f64).round() as i32)
}

/// Trait seam over trig so the orientation encoder's angle quantization can be driven by an
/// alternate table in tests without touching call sites.
pub trait TrigLookup {
    fn sin(&self, angle: u16) -> i32;
    fn cos(&self, angle: u16) -> i32;
    fn atan2(&self, y: i32, x: i32) -> i32;
}

/// Default `TrigLookup` backed by the quarter-wave table above.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantizedTrig;

impl TrigLookup for QuantizedTrig {
    fn sin(&self, angle: u16) -> i32 {
        sin_lookup(angle)
    }

    fn cos(&self, angle: u16) -> i32 {
        cos_lookup(angle)
    }

    fn atan2(&self, y: i32, x: i32) -> i32 {
        atan2_lookup(y, x) as i32
    }
}

/// Quantize `(x, y)` into one of `num_angles` evenly spaced bins covering a full turn, rounding
/// to the nearest bin, via `trig`'s `atan2`. Used by the orientation encoder (`num_angles = 16`).
pub fn angle_bin(trig: &dyn TrigLookup, y: i32, x: i32, num_angles: u16) -> u16 {
    let angle = trig.atan2(y, x).rem_euclid(TRIG_MAX_ANGLE as i32) as u32;
    let bin_width = TRIG_MAX_ANGLE as u32 / num_angles as u32;
    (((angle + bin_width / 2) / bin_width) % num_angles as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sin_cos_match_known_angles() {
        assert_eq!(sin_lookup(0), 0);
        assert!((sin_lookup(TRIG_MAX_ANGLE / 4) - TRIG_MAX_RATIO).abs() <= 1);
        assert!((cos_lookup(0) - TRIG_MAX_RATIO).abs() <= 1);
        assert!(cos_lookup(TRIG_MAX_ANGLE / 2).abs() <= 1 || cos_lookup(TRIG_MAX_ANGLE / 2) == -TRIG_MAX_RATIO);
    }

    #[test]
    fn sin_is_odd_symmetric_about_half_turn() {
        for a in [10u16, 100, 300, 500] {
            assert_eq!(sin_lookup(a), -sin_lookup(a + TRIG_MAX_ANGLE / 2));
        }
    }

    #[test]
    fn angle_bin_rounds_to_nearest_of_sixteen() {
        let trig = QuantizedTrig;
        // Pure +X direction should land near bin 0.
        assert_eq!(angle_bin(&trig, 0, 1000, 16), 0);
        // Pure +Y direction is a quarter turn: bin 4 of 16.
        assert_eq!(angle_bin(&trig, 1000, 0, 16), 4);
    }
}
