//! Sleep score convolution and the sleep-session state machine.

use tracing::{debug, warn};

use crate::callback::{Activity, SessionEvent, SessionSink};
use crate::deep_sleep::{DeepSleepEngine, DeepSleepSignal};
use crate::not_worn::NotWornDetector;
use crate::{FILTER_WIDTH, HALF_WIDTH};

/// Convolution weights, divided by 100, centered on history index `HALF_WIDTH`.
const SCORE_WEIGHTS: [i64; FILTER_WIDTH] = [10, 15, 28, 31, 85, 15, 10, 0, 0];

const IS_SLEEP_SCORE_MAX: i64 = 330;
const SESSION_MIN_DURATION_M: u32 = 60;
const SESSION_ONGOING_FLOOR_M: u32 = 60;
const SHORT_WAKE_THRESHOLD_M: u32 = 60;
const MAX_WAKE_EARLY: u32 = 14;
const MAX_WAKE_LATE: u32 = 11;
const VMC_END_THRESHOLD: u16 = 10_000;
const SCORE_END_THRESHOLD: i64 = 8_000;
const REJECT_CHECK_DURATION_M: u32 = 39;
const REJECT_NON_ZERO_PCT: i64 = 89;
const REJECT_CLIPPED_VMC_AVG: i64 = 180;
const CLIPPED_VMC_CAP: i64 = 1000;
/// VMC above this counts as "non-zero" for the reject check below: noise-floor motion (breathing,
/// micro-adjustments) shouldn't itself flag a session as broken.
const NON_ZERO_VMC_THRESHOLD: u16 = 50;
const MAX_UNCERTAIN_SLEEP_M: i64 = MAX_WAKE_EARLY as i64 + HALF_WIDTH as i64 + 1;

#[derive(Debug, Clone, Copy, Default)]
struct MinuteSample {
    vmc: u16,
    orientation: u8,
    plugged_in: bool,
}

/// Latest closed or ongoing session, for external queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepSummaryStats {
    pub sleep_start_utc: Option<i64>,
    pub uncertain_start_utc: Option<i64>,
    pub sleep_len_m: u32,
}

#[derive(Clone)]
pub struct SleepEngine {
    history: [MinuteSample; FILTER_WIDTH],
    history_len: usize,

    start_time: Option<i64>,
    consecutive_sleep_minutes: u32,
    consecutive_awake_minutes: u32,
    num_non_zero_minutes: u32,
    vmc_sum: u64,
    clipped_vmc_sum: u64,
    last_sample_utc: Option<i64>,

    emitted_ongoing: bool,
    rejected_for_integrity: bool,
    pub summary_stats: SleepSummaryStats,
}

impl Default for SleepEngine {
    fn default() -> Self {
        Self {
            history: [MinuteSample::default(); FILTER_WIDTH],
            history_len: 0,
            start_time: None,
            consecutive_sleep_minutes: 0,
            consecutive_awake_minutes: 0,
            num_non_zero_minutes: 0,
            vmc_sum: 0,
            clipped_vmc_sum: 0,
            last_sample_utc: None,
            emitted_ongoing: false,
            rejected_for_integrity: false,
            summary_stats: SleepSummaryStats::default(),
        }
    }
}

impl SleepEngine {
    /// Feed one minute's summary. Drives the rolling history, the sleep-session state machine,
    /// and the deep-sleep child machine; emits `Sleep`/`RestfulSleep` events to `sink`.
    #[allow(clippy::too_many_arguments)]
    pub fn process_minute(
        &mut self,
        utc_now: i64,
        vmc: u16,
        orientation: u8,
        plugged_in: bool,
        not_worn_now: bool,
        shutting_down: bool,
        not_worn: &NotWornDetector,
        deep: &mut DeepSleepEngine,
        sink: &mut dyn SessionSink,
    ) {
        self.last_sample_utc = Some(utc_now);
        self.push_history(MinuteSample {
            vmc,
            orientation,
            plugged_in,
        });

        if self.history_len < FILTER_WIDTH {
            if shutting_down {
                self.force_end(not_worn, sink, deep);
            }
            return;
        }

        let score = self.convolved_score();
        let is_sleep_minute = score <= IS_SLEEP_SCORE_MAX && !not_worn_now;

        if is_sleep_minute {
            self.consecutive_sleep_minutes += 1;
            self.consecutive_awake_minutes = 0;
        } else {
            self.consecutive_awake_minutes += 1;
            self.consecutive_sleep_minutes = 0;
        }

        if self.start_time.is_none() {
            if self.consecutive_sleep_minutes >= 5 {
                self.start_time = Some(utc_now - 5 * 60);
                self.num_non_zero_minutes = 0;
                self.vmc_sum = 0;
                self.clipped_vmc_sum = 0;
                self.rejected_for_integrity = false;
                debug!(start_utc = self.start_time, "sleep session started");
                deep.process(DeepSleepSignal::Start, utc_now, self.start_time, sink);
            }
            if shutting_down {
                self.force_end(not_worn, sink, deep);
            }
            return;
        }

        if vmc > NON_ZERO_VMC_THRESHOLD {
            self.num_non_zero_minutes += 1;
        }
        self.vmc_sum += vmc as u64;
        self.clipped_vmc_sum += (vmc as i64).min(CLIPPED_VMC_CAP) as u64;

        let duration_m = self.duration_minutes(utc_now);
        let max_wake = if duration_m < SHORT_WAKE_THRESHOLD_M {
            MAX_WAKE_EARLY
        } else {
            MAX_WAKE_LATE
        };

        let mut should_end = self.consecutive_awake_minutes >= max_wake
            || vmc > VMC_END_THRESHOLD
            || score > SCORE_END_THRESHOLD
            || not_worn.not_worn_during_session(self.start_time.unwrap(), duration_m, true)
            || shutting_down;

        if duration_m > REJECT_CHECK_DURATION_M {
            let non_zero_pct = (self.num_non_zero_minutes as i64 * 100) / duration_m as i64;
            let clipped_avg = self.clipped_vmc_sum as i64 / duration_m as i64;
            if non_zero_pct > REJECT_NON_ZERO_PCT || clipped_avg > REJECT_CLIPPED_VMC_AVG {
                self.rejected_for_integrity = true;
                should_end = true;
            }
        }

        deep.process(
            DeepSleepSignal::Continue {
                score,
                ok_to_register: duration_m >= SESSION_ONGOING_FLOOR_M,
            },
            utc_now,
            self.start_time,
            sink,
        );

        if should_end {
            self.end_session(utc_now, not_worn, sink, deep);
            return;
        }

        if duration_m >= SESSION_ONGOING_FLOOR_M {
            self.emit_ongoing(utc_now, duration_m, sink);
        }
    }

    fn push_history(&mut self, sample: MinuteSample) {
        if self.history_len < FILTER_WIDTH {
            self.history[self.history_len] = sample;
            self.history_len += 1;
        } else {
            self.history.rotate_left(1);
            self.history[FILTER_WIDTH - 1] = sample;
        }
    }

    fn convolved_score(&self) -> i64 {
        let sum: i64 = self
            .history
            .iter()
            .zip(SCORE_WEIGHTS.iter())
            .map(|(s, &w)| s.vmc as i64 * w)
            .sum();
        sum / 100
    }

    fn duration_minutes(&self, utc_now: i64) -> u32 {
        match self.start_time {
            Some(start) => ((utc_now - start) / 60).max(0) as u32,
            None => 0,
        }
    }

    fn emit_ongoing(&mut self, utc_now: i64, duration_m: u32, sink: &mut dyn SessionSink) {
        let start = self.start_time.unwrap();
        sink.emit(SessionEvent {
            activity: Activity::Sleep,
            start_utc: start,
            duration_sec: duration_m * 60,
            ongoing: true,
            delete: false,
            steps: 0,
            resting_cal: 0,
            active_cal: 0,
            distance_mm: 0,
        });
        self.emitted_ongoing = true;
        self.summary_stats = SleepSummaryStats {
            sleep_start_utc: Some(start),
            uncertain_start_utc: Some(utc_now - MAX_UNCERTAIN_SLEEP_M * 60),
            sleep_len_m: duration_m,
        };
    }

    fn end_session(
        &mut self,
        utc_now: i64,
        not_worn: &NotWornDetector,
        sink: &mut dyn SessionSink,
        deep: &mut DeepSleepEngine,
    ) {
        let start = self.start_time.unwrap();
        let duration_m = self.duration_minutes(utc_now);
        let rejected_for_not_worn = not_worn.not_worn_during_session(start, duration_m, false);
        let rejected =
            duration_m < SESSION_MIN_DURATION_M || rejected_for_not_worn || self.rejected_for_integrity;

        if rejected {
            warn!(start_utc = start, duration_m, "sleep session rejected");
            if self.emitted_ongoing {
                sink.emit(SessionEvent {
                    activity: Activity::Sleep,
                    start_utc: start,
                    duration_sec: duration_m * 60,
                    ongoing: false,
                    delete: true,
                    steps: 0,
                    resting_cal: 0,
                    active_cal: 0,
                    distance_mm: 0,
                });
            }
            deep.process(DeepSleepSignal::Abort, utc_now, self.start_time, sink);
        } else {
            debug!(start_utc = start, duration_m, "sleep session accepted");
            sink.emit(SessionEvent {
                activity: Activity::Sleep,
                start_utc: start,
                duration_sec: duration_m * 60,
                ongoing: false,
                delete: false,
                steps: 0,
                resting_cal: 0,
                active_cal: 0,
                distance_mm: 0,
            });
            deep.process(DeepSleepSignal::End, utc_now, self.start_time, sink);
            self.summary_stats = SleepSummaryStats {
                sleep_start_utc: Some(start),
                uncertain_start_utc: None,
                sleep_len_m: duration_m,
            };
        }

        self.reset_session_state();
    }

    fn force_end(&mut self, not_worn: &NotWornDetector, sink: &mut dyn SessionSink, deep: &mut DeepSleepEngine) {
        if self.start_time.is_some() {
            let utc_now = self.last_sample_utc.unwrap_or_default();
            self.end_session(utc_now, not_worn, sink, deep);
        }
    }

    fn reset_session_state(&mut self) {
        self.start_time = None;
        self.consecutive_sleep_minutes = 0;
        self.consecutive_awake_minutes = 0;
        self.num_non_zero_minutes = 0;
        self.vmc_sum = 0;
        self.clipped_vmc_sum = 0;
        self.emitted_ongoing = false;
        self.rejected_for_integrity = false;
    }

    /// Reset all rolling state (used by the engine facade's time-travel guard).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<SessionEvent>);

    impl SessionSink for Recorder {
        fn emit(&mut self, event: SessionEvent) {
            self.0.push(event);
        }
    }

    #[test]
    fn low_vmc_minutes_eventually_start_and_accept_a_session() {
        let mut sleep = SleepEngine::default();
        let mut deep = DeepSleepEngine::default();
        let not_worn = NotWornDetector::default();
        let mut rec = Recorder(Vec::new());

        let mut t = 0i64;
        for _ in 0..400 {
            sleep.process_minute(t, 5, 1, false, false, false, &not_worn, &mut deep, &mut rec);
            t += 60;
        }
        // force the trailing wake-out to close the session
        for _ in 0..20 {
            sleep.process_minute(t, 5000, 1, false, false, false, &not_worn, &mut deep, &mut rec);
            t += 60;
        }

        let accepted = rec
            .0
            .iter()
            .any(|e| e.activity == Activity::Sleep && !e.ongoing && !e.delete && e.duration_sec >= 60 * 60);
        assert!(accepted, "expected a finalized sleep session of at least an hour");
    }

    #[test]
    fn plugged_in_sessions_are_rejected() {
        let mut sleep = SleepEngine::default();
        let mut deep = DeepSleepEngine::default();
        let mut not_worn = NotWornDetector::default();
        let mut rec = Recorder(Vec::new());

        let mut t = 0i64;
        for _ in 0..400 {
            let status = not_worn.process_minute(t, 5, 1, true);
            sleep.process_minute(t, 5, 1, true, status, false, &not_worn, &mut deep, &mut rec);
            t += 60;
        }

        assert!(
            !rec.0
                .iter()
                .any(|e| e.activity == Activity::Sleep && !e.ongoing && !e.delete),
            "no finalized sleep session should exist while plugged in"
        );
    }

    #[test]
    fn integrity_reject_fires_even_past_min_duration() {
        let mut sleep = SleepEngine::default();
        let mut deep = DeepSleepEngine::default();
        let not_worn = NotWornDetector::default();
        let mut rec = Recorder(Vec::new());

        // Fast-forward to a long-running session (70 minutes) that's already almost entirely
        // non-zero VMC, well past both SESSION_MIN_DURATION_M and REJECT_CHECK_DURATION_M.
        sleep.history_len = FILTER_WIDTH;
        sleep.start_time = Some(0);
        sleep.num_non_zero_minutes = 68;

        // A spike that ends the session via the wake-out threshold, not the integrity check.
        sleep.process_minute(70 * 60, 20_000, 1, false, false, false, &not_worn, &mut deep, &mut rec);

        assert!(
            !rec.0
                .iter()
                .any(|e| e.activity == Activity::Sleep && !e.ongoing && !e.delete),
            "a session that fails the integrity check must be rejected even once duration clears the minimum"
        );
    }
}
