//! Per-minute summary: reduce the epoch engine's minute accumulators into a VMC and an
//! orientation byte, then reset them.

use crate::dsp::trig::QuantizedTrig;
use crate::epoch::{real_vmc_from_pim, EpochEngine};

/// One minute's worth of motion summary, handed to the engine facade's `minute_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteSummary {
    pub real_vmc: u32,
    /// `16*phi + theta`, both quantized into 16 bins.
    pub orientation: u8,
    /// Reserved; always false.
    pub still: bool,
}

/// Drain `engine`'s minute accumulators into a `MinuteSummary`, resetting them for the next
/// minute. Orientation is computed from the accumulated per-axis means.
pub fn summarize(engine: &mut EpochEngine) -> MinuteSummary {
    let pim = engine.minute_acc.pim_acc;
    let mean = engine.minute_acc.mean_acc;

    let real_vmc = real_vmc_from_pim(pim);
    let orientation = crate::epoch::orientation_byte(&QuantizedTrig, mean);

    engine.minute_acc.reset();

    MinuteSummary {
        real_vmc,
        orientation,
        still: false,
    }
}
