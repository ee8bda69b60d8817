//! The 5-second epoch engine: band-pass PIM filter, VMC, FFT magnitudes, and step
//! classification. The hardest single piece of the pipeline.

use std::sync::OnceLock;

use crate::dsp::{self, fft, trig};
use crate::fixed::{eval_filter, Q31_32};
use crate::{EPOCH_SAMPLES, FFT_WIDTH, SAMPLE_HZ};

/// Divisor applied to each axis's PIM value before squaring, so the sum-of-squares stays small
/// enough to root in `u32`.
pub const VMCPM_SCALE: u32 = 10;

/// Per-axis PIM clip applied before squaring, to keep the sum-of-squares inside `u32`.
const PIM_AXIS_CLIP: u32 = 37_500;

const MIN_STEP_FREQ: usize = 7;
const MAX_STEP_FREQ: usize = 20;

/// Noise floor subtracted from each second's summed abs filter output before clamping to zero:
/// `3.75 * N / 1000` with `N = SAMPLE_HZ` samples per second. `3.75 * 25 / 1000 == 0.09375 ==
/// 3/32`, which is exactly representable in Q31.32 (`0.09375 * 2^32 == 402_653_184`).
const PIM_FLOOR: Q31_32 = Q31_32::from_raw(402_653_184);

/// Real-world Vector Magnitude Counts from a per-axis PIM triple: clip each axis,
/// root-sum-of-squares via `isqrt`, then calibrate from Pebble units to Actigraph units.
pub fn real_vmc_from_pim(pim: [u32; 3]) -> u32 {
    let sum_sq: u64 = pim
        .iter()
        .map(|&p| {
            let clipped = p.min(PIM_AXIS_CLIP) / VMCPM_SCALE;
            (clipped as u64) * (clipped as u64)
        })
        .sum();
    let raw_vmc = VMCPM_SCALE as u64 * dsp::isqrt(sum_sq.min(u32::MAX as u64) as u32) as u64;
    ((raw_vmc * 2408) / 12500) as u32
}

/// Per-axis band-pass (0.25 Hz – 1.75 Hz) filter state: a 2nd-order highpass (0.25 Hz) cascaded
/// with a 2nd-order lowpass (1.75 Hz), combined into a single 5-input-tap/4-output-tap direct
/// form, plus the odd-symmetric priming flag.
#[derive(Clone, Default)]
pub struct AxisFilter {
    state_x: [Q31_32; 5],
    state_y: [Q31_32; 4],
}

impl AxisFilter {
    fn step(&mut self, x: Q31_32) -> Q31_32 {
        let (b, a) = band_pass_coeffs();
        eval_filter(x, b, a, &mut self.state_x, &mut self.state_y)
    }
}

/// Cascade a Butterworth highpass at 0.25 Hz with a Butterworth lowpass at 1.75 Hz (both
/// RBJ-cookbook biquads, Q = 1/sqrt(2)) into one 5-tap-b / 4-tap-a direct-form filter, computed
/// once and cached. `eval_filter`'s convention is `y = sum(b*x) + sum(a*y_prev)`, so the
/// combined denominator coefficients are negated relative to the textbook `a0=1, -a1, -a2, ...`
/// form.
fn band_pass_coeffs() -> &'static ([Q31_32; 5], [Q31_32; 4]) {
    static COEFFS: OnceLock<([Q31_32; 5], [Q31_32; 4])> = OnceLock::new();
    COEFFS.get_or_init(|| {
        let fs = SAMPLE_HZ as f64;
        let (b_hp, a_hp) = biquad_highpass(0.25, fs);
        let (b_lp, a_lp) = biquad_lowpass(1.75, fs);

        let b = convolve3(b_hp, b_lp);
        let a_full = convolve3(a_hp, a_lp); // a_full[0] == 1.0 (overall a0)

        let to_q = |v: f64| Q31_32::from_raw((v * (1i64 << 32) as f64).round() as i64);
        let b_q = [to_q(b[0]), to_q(b[1]), to_q(b[2]), to_q(b[3]), to_q(b[4])];
        // Negate: eval_filter adds a[i]*y[i], textbook form subtracts a_std[i]*y[i].
        let a_q = [
            to_q(-a_full[1]),
            to_q(-a_full[2]),
            to_q(-a_full[3]),
            to_q(-a_full[4]),
        ];
        (b_q, a_q)
    })
}

fn convolve3(p: [f64; 3], q: [f64; 3]) -> [f64; 5] {
    let mut out = [0.0f64; 5];
    for (i, &pi) in p.iter().enumerate() {
        for (j, &qj) in q.iter().enumerate() {
            out[i + j] += pi * qj;
        }
    }
    out
}

/// RBJ cookbook lowpass biquad, normalized so `a0 == 1.0`. Returns `(b0,b1,b2)`, `(1,a1,a2)`.
fn biquad_lowpass(f0: f64, fs: f64) -> ([f64; 3], [f64; 3]) {
    let w0 = std::f64::consts::TAU * f0 / fs;
    let q = std::f64::consts::FRAC_1_SQRT_2;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();

    let a0 = 1.0 + alpha;
    let b0 = (1.0 - cos_w0) / 2.0 / a0;
    let b1 = (1.0 - cos_w0) / a0;
    let b2 = b0;
    let a1 = -2.0 * cos_w0 / a0;
    let a2 = (1.0 - alpha) / a0;
    ([b0, b1, b2], [1.0, a1, a2])
}

/// RBJ cookbook highpass biquad, normalized so `a0 == 1.0`.
fn biquad_highpass(f0: f64, fs: f64) -> ([f64; 3], [f64; 3]) {
    let w0 = std::f64::consts::TAU * f0 / fs;
    let q = std::f64::consts::FRAC_1_SQRT_2;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();

    let a0 = 1.0 + alpha;
    let b0 = (1.0 + cos_w0) / 2.0 / a0;
    let b1 = -(1.0 + cos_w0) / a0;
    let b2 = b0;
    let a1 = -2.0 * cos_w0 / a0;
    let a2 = (1.0 - alpha) / a0;
    ([b0, b1, b2], [1.0, a1, a2])
}

/// Full FFT magnitude spectrum (first 64 bins) for one axis.
pub type AxisSpectrum = [u32; FFT_WIDTH / 2];

/// Classification outcome for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochKind {
    None,
    Half,
    Full,
}

/// Everything an epoch's step classification produced, including the stats-callback scores.
#[derive(Debug, Clone, Copy)]
pub struct EpochClassification {
    pub kind: EpochKind,
    pub walk_hz: u16,
    pub score_0: i64,
    pub score_hf: i64,
    pub score_lf: i64,
    pub total_abs_energy: u64,
}

fn choose_band(vmc: u32) -> (usize, usize) {
    if vmc < 340 {
        (MIN_STEP_FREQ, 10)
    } else if vmc < 2000 {
        (MIN_STEP_FREQ, 12)
    } else {
        (10, MAX_STEP_FREQ)
    }
}

fn band_energy(mag: &AxisSpectrum, lo: usize, hi: usize) -> u64 {
    dsp::abs_integral(mag, lo.min(mag.len()), Some((hi + 1).min(mag.len())))
}

/// Sum of `mag[center-radius ..= center+radius]`, clipped to the array's bounds; out-of-range
/// harmonics (beyond 63 Hz, or below 0) contribute nothing rather than panicking.
fn window_sum(mag: &AxisSpectrum, center: i64, radius: i64) -> u64 {
    let len = mag.len() as i64;
    let lo = (center - radius).max(0);
    let hi = (center + radius).min(len - 1);
    if lo > hi {
        return 0;
    }
    (lo..=hi).map(|i| mag[i as usize] as u64).sum()
}

/// Signal energy and arm-swing frequency for candidate walk frequency `w`.
fn signal_energy(mag: &AxisSpectrum, w: usize) -> (u64, usize) {
    let wi = w as i64;
    let arm = w / 2;
    let armi = arm as i64;

    let fundamental = mag[w] as u64;
    let arm_energy = if arm >= 5 { window_sum(mag, armi, 1) } else { 0 };
    let third_harmonic_of_arm = window_sum(mag, wi + armi, 1); // w + arm
    let second_harmonic_of_walk = window_sum(mag, 2 * wi, 1); // 2w
    let fifth_harmonic_of_arm = window_sum(mag, 2 * wi + armi, 1); // 2w + arm
    let third_harmonic_of_walk = window_sum(mag, 3 * wi, 1);
    let fourth_harmonic_of_walk = window_sum(mag, 4 * wi, 1);
    let fifth_harmonic_of_walk = window_sum(mag, 5 * wi, 1);

    let energy = fundamental
        + arm_energy
        + third_harmonic_of_arm
        + second_harmonic_of_walk
        + fifth_harmonic_of_arm
        + third_harmonic_of_walk
        + fourth_harmonic_of_walk
        + fifth_harmonic_of_walk;
    (energy, arm)
}

/// Classify one epoch's composite magnitude spectrum against its real VMC.
pub fn classify_epoch(mag: &AxisSpectrum, vmc: u32) -> EpochClassification {
    let mut band = choose_band(vmc);
    if vmc >= 1000 && band == (MIN_STEP_FREQ, 12) {
        let orig = band_energy(mag, band.0, band.1);
        let rescan = band_energy(mag, 12, MAX_STEP_FREQ);
        if rescan * 2 > orig * 3 {
            band = (12, MAX_STEP_FREQ);
        }
    }

    let peak = (band.0..=band.1.min(mag.len() - 1))
        .max_by_key(|&h| mag[h])
        .unwrap_or(band.0);

    let lo = peak.saturating_sub(2).max(1);
    let hi = (peak + 2).min(mag.len() - 1);

    let total_abs_energy = dsp::abs_integral(mag, 0, None);

    let mut best_w = lo;
    let mut best_energy = 0u64;
    for w in lo..=hi {
        let (energy, _) = signal_energy(mag, w);
        if energy > best_energy {
            best_energy = energy;
            best_w = w;
        }
    }

    let energy = best_energy.max(1);
    let score_0 = (100 * best_energy / total_abs_energy.max(1)) as i64;
    let score_hf = (100 * dsp::abs_integral(mag, 50, None) / energy) as i64;
    let score_lf = (100 * dsp::abs_integral(mag, 0, Some(4)) / energy) as i64;

    let walk_hz = best_w as u16;
    let is_full = (MIN_STEP_FREQ..=MAX_STEP_FREQ).contains(&best_w)
        && score_0 >= 15
        && vmc >= 135
        && score_hf <= 120
        && score_lf <= 145
        && total_abs_energy >= 1000
        && !(best_w >= 12 && vmc < 1000);
    let is_half =
        !is_full && (6..=MAX_STEP_FREQ).contains(&best_w) && score_0 >= 9 && vmc >= 120;

    let kind = if is_full {
        EpochKind::Full
    } else if is_half {
        EpochKind::Half
    } else {
        EpochKind::None
    };

    EpochClassification {
        kind,
        walk_hz,
        score_0,
        score_hf,
        score_lf,
        total_abs_energy,
    }
}

/// Step count to emit for this epoch given the previous epoch's classification. The
/// result is always in `[0, MAX_STEP_FREQ + MAX_STEP_FREQ/2] == [0, 30]`.
pub fn steps_for_transition(prev: EpochClassification, this: EpochClassification) -> u32 {
    let mut steps = match this.kind {
        EpochKind::Full => this.walk_hz as u32,
        _ => 0,
    };
    match (prev.kind, this.kind) {
        (EpochKind::Half, EpochKind::Full) => steps += this.walk_hz as u32 / 2,
        (EpochKind::Full, EpochKind::Half) => steps += prev.walk_hz as u32 / 2,
        _ => {}
    }
    steps
}

impl Default for EpochClassification {
    fn default() -> Self {
        Self {
            kind: EpochKind::None,
            walk_hz: 0,
            score_0: 0,
            score_hf: 0,
            score_lf: 0,
            total_abs_energy: 0,
        }
    }
}

/// Per-minute mean/PIM accumulators, filled by the epoch engine and drained by
/// `minute::summarize`.
#[derive(Clone, Default)]
pub struct MinuteAccumulators {
    pub mean_acc: [i32; 3],
    pub pim_acc: [u32; 3],
}

impl MinuteAccumulators {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The epoch engine: per-axis filter state, the minute accumulators it feeds, and enough history
/// to compute step deltas across the half/full epoch boundary.
#[derive(Clone)]
pub struct EpochEngine {
    filters: [AxisFilter; 3],
    primed: bool,
    pub minute_acc: MinuteAccumulators,
    prev_classification: EpochClassification,
}

impl Default for EpochEngine {
    fn default() -> Self {
        Self {
            filters: Default::default(),
            primed: false,
            minute_acc: MinuteAccumulators::default(),
            prev_classification: EpochClassification::default(),
        }
    }
}

/// Everything produced by processing one full epoch.
pub struct EpochResult {
    pub new_steps: u32,
    pub real_vmc: u32,
    pub classification: EpochClassification,
}

impl EpochEngine {
    /// Prime the band-pass filter once, per axis, with an odd-symmetric reflection of the first
    /// 10 samples around `x[0]`, discarding the filter output.
    fn prime(&mut self, axis: usize, samples: &[i16; EPOCH_SAMPLES]) {
        for i in 0..10 {
            let p = 2 * samples[0] as i64 - samples[EPOCH_SAMPLES - 1 - i] as i64;
            self.filters[axis].step(Q31_32::from_int(p as i32));
        }
    }

    /// Run one second (25 samples) of one axis through the band-pass filter, sum `|output|`,
    /// subtract the noise floor with a zero clamp, and return the PIM for that second.
    fn pim_for_second(&mut self, axis: usize, samples: &[i16]) -> u32 {
        let mut sum = Q31_32::from_raw(0);
        for &s in samples {
            let y = self.filters[axis].step(Q31_32::from_int(s as i32));
            let abs_raw = y.0.unsigned_abs() as i64;
            sum = sum + Q31_32::from_raw(abs_raw);
        }
        let floored = sum - PIM_FLOOR;
        if floored.0 <= 0 {
            0
        } else {
            floored.parts().0.max(0) as u32
        }
    }

    /// Process one complete 125-sample epoch (three axes). Advances the minute accumulators,
    /// classifies the epoch, and returns the step delta to add to the running count.
    pub fn process_epoch(&mut self, axes: &[[i16; EPOCH_SAMPLES]; 3]) -> EpochResult {
        if !self.primed {
            for axis in 0..3 {
                self.prime(axis, &axes[axis]);
            }
            self.primed = true;
        }

        let mut pim_total = [0u32; 3];
        let mut spectra: [AxisSpectrum; 3] = [[0u32; FFT_WIDTH / 2]; 3];

        for axis in 0..3 {
            self.minute_acc.mean_acc[axis] += dsp::mean(&axes[axis]);

            let mut epoch_pim = 0u32;
            for second in 0..5 {
                let start = second * SAMPLE_HZ;
                let pim = self.pim_for_second(axis, &axes[axis][start..start + SAMPLE_HZ]);
                self.minute_acc.pim_acc[axis] += pim;
                epoch_pim += pim;
            }
            pim_total[axis] = epoch_pim;

            let mut padded = [0i32; FFT_WIDTH];
            for (i, &s) in axes[axis].iter().enumerate() {
                padded[i] = s as i32;
            }
            dsp::cosine_taper_window(&mut padded[..EPOCH_SAMPLES], 1);
            let packed = fft::real_fft_packed(&padded);
            let mags = fft::magnitudes(&packed);
            spectra[axis][..mags.len()].copy_from_slice(&mags);
        }

        let mut composite: AxisSpectrum = [0u32; FFT_WIDTH / 2];
        for i in 0..composite.len() {
            let sum_sq: u64 = spectra.iter().map(|s| (s[i] as u64) * (s[i] as u64)).sum();
            composite[i] = dsp::isqrt(sum_sq.min(u32::MAX as u64) as u32);
        }

        let real_vmc = real_vmc_from_pim(pim_total);
        let classification = classify_epoch(&composite, real_vmc);
        let new_steps = steps_for_transition(self.prev_classification, classification);
        self.prev_classification = classification;

        EpochResult {
            new_steps,
            real_vmc,
            classification,
        }
    }
}

/// Orientation quantization: `phi` from Z versus the XY-plane magnitude, and
/// `theta` in the XY plane, both quantized into `num_angles = 16` bins via `trig`.
pub fn orientation_byte(trig: &dyn trig::TrigLookup, mean_xyz: [i32; 3]) -> u8 {
    let [mx, my, mz] = mean_xyz;
    let theta = trig::angle_bin(trig, my, mx, 16);
    let xy_sq = (mx as i64 * mx as i64 + my as i64 * my as i64).clamp(0, u32::MAX as i64);
    let xy_mag = dsp::isqrt(xy_sq as u32) as i32;
    let phi = trig::angle_bin(trig, mz, xy_mag, 16);
    (16 * phi + theta) as u8
}
