//! In-place radix-2 real FFT and its magnitude reduction.
//!
//! `real_fft` runs a standard bit-reversal permutation followed by `log2(N)` butterfly passes
//! on a complex buffer seeded with a real-valued signal (zero imaginary part), using the
//! quantized trig lookup for twiddle factors. The transform result is then re-packed into a
//! single real array `d` in the classic "packed real FFT" layout: `d[0]` and `d[N/2]` are the
//! (purely real) DC and Nyquist bins, and for `0 < i < N/2`, `d[i]` holds the real part of bin
//! `i` and `d[N-i]` holds its imaginary part. `magnitudes` then reduces that layout to
//! `isqrt(re^2 + im^2)` per bin.

use crate::dsp::{isqrt, trig};

/// Run an in-place FFT over `re`/`im` (both length `N`, a power of two). `im` is typically all
/// zero on entry (a real-valued signal); returns nothing — `re`/`im` hold the transform.
pub fn fft_in_place(re: &mut [i32], im: &mut [i32]) {
    let n = re.len();
    assert_eq!(im.len(), n);
    assert!(n.is_power_of_two());

    bit_reverse_permute(re);
    bit_reverse_permute(im);

    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let angle_step = (trig::TRIG_MAX_ANGLE as usize) / size;
        for start in (0..n).step_by(size) {
            for k in 0..half {
                let angle = (k * angle_step) as u16;
                // Butterfly twiddle is e^{-i*theta}; cos is even, sin is negated.
                let wr = trig::cos_lookup(angle);
                let wi = -trig::sin_lookup(angle);

                let i_top = start + k;
                let i_bot = start + k + half;

                let (tr, ti) = scaled_complex_mul(re[i_bot], im[i_bot], wr, wi);
                let (or, oi) = (re[i_top], im[i_top]);

                re[i_bot] = or - tr;
                im[i_bot] = oi - ti;
                re[i_top] = or + tr;
                im[i_top] = oi + ti;
            }
        }
        size *= 2;
    }
}

/// `(a + bi) * (c + di)` scaled back down by `TRIG_MAX_RATIO` (the twiddle's fixed-point scale).
fn scaled_complex_mul(a: i32, b: i32, c: i32, d: i32) -> (i32, i32) {
    let scale = trig::TRIG_MAX_RATIO as i64;
    let re = (a as i64 * c as i64 - b as i64 * d as i64) / scale;
    let im = (a as i64 * d as i64 + b as i64 * c as i64) / scale;
    (re as i32, im as i32)
}

fn bit_reverse_permute(buf: &mut [i32]) {
    let n = buf.len();
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - bits);
        if j > i {
            buf.swap(i, j);
        }
    }
}

/// Run the real FFT over `samples` (length `N`, a power of two, already windowed/padded) and
/// return the packed real layout described above.
pub fn real_fft_packed(samples: &[i32]) -> Vec<i32> {
    let n = samples.len();
    let mut re = samples.to_vec();
    let mut im = vec![0i32; n];
    fft_in_place(&mut re, &mut im);

    let mut d = vec![0i32; n];
    d[0] = re[0];
    d[n / 2] = re[n / 2];
    for i in 1..n / 2 {
        d[i] = re[i];
        d[n - i] = im[i];
    }
    d
}

/// Reduce a packed real FFT result to the first `N/2` magnitudes: `isqrt(re^2 + im^2)`, with
/// `d[0]` treated as purely real (no paired imaginary slot).
pub fn magnitudes(d: &[i32]) -> Vec<u32> {
    let n = d.len();
    let half = n / 2;
    let mut out = vec![0u32; half];
    out[0] = (d[0] as i64).unsigned_abs() as u32;
    for i in 1..half {
        let re = d[i] as i64;
        let im = d[n - i] as i64;
        let energy = (re * re + im * im).clamp(0, u32::MAX as i64);
        out[i] = isqrt(energy as u32);
    }
    out
}
