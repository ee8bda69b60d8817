//! Real-time step, sleep, and activity-session classification from a continuous stream of
//! triaxial accelerometer samples, sized to run on a resource-constrained microcontroller.
//!
//! ## Modules
//!
//! - **fixed** – Q13.3 / Q15.16 / Q31.32 fixed-point arithmetic and a generic recursive
//!   (biquad-style) filter evaluator.
//! - **dsp** – integer square root, mean, absolute-value integrals, an in-place real FFT,
//!   a cosine-taper window, and quantized integer trig (used for orientation encoding).
//! - **epoch** – the 5-second epoch engine: band-pass PIM filter, VMC, FFT magnitudes, and
//!   step classification.
//! - **minute** – converts accumulated per-epoch mean/PIM into a minute's VMC and orientation.
//! - **sleep** – rolling minute history, sleep-score convolution, sleep-session state machine.
//! - **deep_sleep** – child state machine tracking restful (deep) sleep segments.
//! - **not_worn** – low-VMC / stationary-orientation run detector; vetoes sleep sessions.
//! - **activity** – walk/run session tracker, driven by per-minute step counts.
//! - **callback** – the external seams: session/stats sinks, HRM subscription.
//! - **engine** – the facade tying all of the above to one state struct and one call sequence.

pub mod activity;
pub mod callback;
pub mod deep_sleep;
pub mod dsp;
pub mod engine;
pub mod epoch;
pub mod fixed;
pub mod minute;
pub mod not_worn;
pub mod sleep;

pub use callback::{
    Activity, HrmFeatures, HrmHandle, HrmSubscriber, NullHrm, SessionEvent, SessionRef,
    SessionSink, StatsSample, StatsSink,
};
pub use engine::{EngineError, EngineState};

/// Samples per second the accelerometer is read at.
pub const SAMPLE_HZ: usize = 25;

/// Samples per epoch: 5 seconds of accelerometer data.
pub const EPOCH_SAMPLES: usize = SAMPLE_HZ * 5;

/// Smallest power of two that can hold one zero-padded epoch (128 >= 125).
pub const FFT_WIDTH: usize = 128;

/// Rolling minute-history length the sleep-score convolution is centered on.
pub const FILTER_WIDTH: usize = 9;

/// Index into the rolling minute history the sleep score is computed for (centre of the
/// 9-tap convolution). Because the score for "now" is only known once `FILTER_WIDTH - 1 -
/// HALF_WIDTH` future minutes have arrived, all sleep/deep-sleep timestamps lag real time
/// by `HALF_WIDTH` minutes.
pub const HALF_WIDTH: usize = 4;
