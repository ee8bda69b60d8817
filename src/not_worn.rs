//! Not-worn detection: low-VMC / stationary-orientation runs, kept as a 3-slot ring of candidate
//! sections and used to veto sleep sessions.

const RING_SIZE: usize = 3;
const MAYBE_VMC_THRESHOLD: u16 = 4;
const OVERRIDE_VMC_THRESHOLD: u16 = 2500;
const DEFINITELY_NOT_WORN_RUN_MINUTES: u32 = 180;

#[derive(Debug, Clone, Copy, Default)]
struct Candidate {
    start_utc: i64,
    len_m: u32,
}

/// Tracks whether the watch is currently being worn, via a 3-slot history of candidate
/// not-worn runs (index 0 = most recent).
#[derive(Clone)]
pub struct NotWornDetector {
    maybe_not_worn_count: u32,
    ring: [Candidate; RING_SIZE],
    prev_orientation: Option<u8>,
    prev_vmc: Option<u16>,
}

impl Default for NotWornDetector {
    fn default() -> Self {
        Self {
            maybe_not_worn_count: 0,
            ring: [Candidate::default(); RING_SIZE],
            prev_orientation: None,
            prev_vmc: None,
        }
    }
}

impl NotWornDetector {
    /// Feed one minute's summary. Returns this minute's not-worn status.
    pub fn process_minute(&mut self, utc_now: i64, vmc: u16, orientation: u8, plugged_in: bool) -> bool {
        // `orientation == 16*phi + theta`; phi is the Z-axis quantum.
        let z_quantum = orientation / 16;
        let same_orientation = self.prev_orientation == Some(orientation);
        let both_still = self.prev_vmc.is_some_and(|p| p < MAYBE_VMC_THRESHOLD) && vmc < MAYBE_VMC_THRESHOLD;
        let lying_flat = z_quantum == 0 || z_quantum == 8;

        let mut maybe = same_orientation || both_still || lying_flat;
        if vmc > OVERRIDE_VMC_THRESHOLD {
            maybe = false;
        }
        let definitely = plugged_in;

        if maybe {
            if self.maybe_not_worn_count == 0 {
                self.start_candidate(utc_now);
            }
            self.maybe_not_worn_count += 1;
            self.extend_candidate(self.maybe_not_worn_count);
        } else if self.maybe_not_worn_count > 0 {
            self.maybe_not_worn_count = 0;
            self.shift_ring();
        }

        self.prev_orientation = Some(orientation);
        self.prev_vmc = Some(vmc);

        definitely || self.maybe_not_worn_count >= DEFINITELY_NOT_WORN_RUN_MINUTES
    }

    fn start_candidate(&mut self, utc_now: i64) {
        self.ring[0] = Candidate {
            start_utc: utc_now,
            len_m: 0,
        };
    }

    fn extend_candidate(&mut self, run_minutes: u32) {
        self.ring[0].len_m = run_minutes;
    }

    fn shift_ring(&mut self) {
        for i in (1..RING_SIZE).rev() {
            self.ring[i] = self.ring[i - 1];
        }
        self.ring[0] = Candidate::default();
    }

    /// Veto check for a sleep session about to close.
    pub fn not_worn_during_session(&self, start: i64, len_m: u32, ongoing: bool) -> bool {
        let session_end = start + len_m as i64 * 60;
        for candidate in &self.ring {
            if candidate.len_m == 0 {
                continue;
            }
            let c_end = candidate.start_utc + candidate.len_m as i64 * 60;
            let overlap_start = start.max(candidate.start_utc);
            let overlap_end = session_end.min(c_end);
            let overlap_m = (overlap_end - overlap_start).max(0) / 60;
            if overlap_m >= 150 {
                return true;
            }
            if !ongoing {
                let start_tol = (len_m as i64 / 10).max(0) * 60;
                let end_tol = (len_m as i64 / 8).max(0) * 60;
                if (candidate.start_utc - start).abs() <= start_tol && (c_end - session_end).abs() <= end_tol {
                    return true;
                }
            }
        }
        false
    }
}
