//! Engine facade: the single owning state struct, time-travel guard, and the public entry points
//! a caller drives the whole pipeline through.

use thiserror::Error;
use tracing::warn;

use crate::activity::{StepActivityTracker, RUN_RANGE, WALK_RANGE};
use crate::callback::{Activity, HrmSubscriber, SessionRef, SessionSink, StatsSample, StatsSink};
use crate::deep_sleep::DeepSleepEngine;
use crate::epoch::EpochEngine;
use crate::minute::{self, MinuteSummary};
use crate::not_worn::NotWornDetector;
use crate::sleep::{SleepEngine, SleepSummaryStats};
use crate::{EPOCH_SAMPLES, HALF_WIDTH};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("expected a non-zero sample count, got {got}")]
    InvalidSampleCount { got: usize },
}

/// Time-travel guard window: a jump forward of more than this many seconds, or any
/// jump backward, resets all detector state.
const TIME_TRAVEL_WINDOW_SEC: i64 = 5 * 60;

/// Activities the caller can query `activity_last_processed_time` for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Sleep,
    DeepSleep,
    Walk,
    Run,
}

/// The single owning state struct: epoch engine, sleep/deep-sleep/not-worn detectors, and the
/// walk/run trackers, all as plain fields rather than behind indirection.
pub struct EngineState {
    epoch: EpochEngine,
    sleep: SleepEngine,
    deep_sleep: DeepSleepEngine,
    not_worn: NotWornDetector,
    walk: StepActivityTracker,
    run: StepActivityTracker,

    num_samples: usize,
    sample_buf: [[i16; EPOCH_SAMPLES]; 3],

    last_update: Option<i64>,
    enabled: bool,

    stats_sink: Option<Box<dyn StatsSink>>,
}

impl EngineState {
    /// Zero-initialize. `stats_sink` may be `None` if no calibration sink is wired up.
    pub fn new(stats_sink: Option<Box<dyn StatsSink>>) -> Self {
        Self {
            epoch: EpochEngine::default(),
            sleep: SleepEngine::default(),
            deep_sleep: DeepSleepEngine::default(),
            not_worn: NotWornDetector::default(),
            walk: StepActivityTracker::new(Activity::Walk, WALK_RANGE, SessionRef(1)),
            run: StepActivityTracker::new(Activity::Run, RUN_RANGE, SessionRef(2)),
            num_samples: 0,
            sample_buf: [[0i16; EPOCH_SAMPLES]; 3],
            last_update: None,
            enabled: true,
            stats_sink,
        }
    }

    /// Buffer `samples` (one `(x,y,z)` triple per element, already scaled to 125=1g) until an
    /// epoch fills, processing any full epochs along the way. Returns `(new_steps, consumed)`;
    /// `consumed` is always a multiple of `EPOCH_SAMPLES` or 0.
    pub fn analyze_samples(&mut self, samples: &[[i16; 3]]) -> Result<(u32, usize), EngineError> {
        if samples.is_empty() {
            return Err(EngineError::InvalidSampleCount { got: 0 });
        }

        let mut new_steps = 0u32;
        let mut epochs_completed = 0usize;

        for &[x, y, z] in samples {
            self.sample_buf[0][self.num_samples] = x;
            self.sample_buf[1][self.num_samples] = y;
            self.sample_buf[2][self.num_samples] = z;
            self.num_samples += 1;

            if self.num_samples == EPOCH_SAMPLES {
                new_steps += self.run_epoch();
                epochs_completed += 1;
            }
        }

        // `consumed` counts samples now accounted for by a completed epoch, which may include
        // samples buffered from earlier calls — not just ones passed in this call.
        Ok((new_steps, epochs_completed * EPOCH_SAMPLES))
    }

    /// Force processing of whatever partial epoch is buffered (used before long suspends).
    /// Resets `num_samples` to 0 regardless of whether a partial epoch existed.
    pub fn analyze_finish_epoch(&mut self) -> u32 {
        if self.num_samples == 0 {
            return 0;
        }
        for axis in self.sample_buf.iter_mut() {
            for slot in axis[self.num_samples..].iter_mut() {
                *slot = 0;
            }
        }
        let steps = self.run_epoch_partial();
        self.num_samples = 0;
        steps
    }

    fn run_epoch(&mut self) -> u32 {
        let steps = self.run_epoch_partial();
        self.num_samples = 0;
        steps
    }

    fn run_epoch_partial(&mut self) -> u32 {
        let result = self.epoch.process_epoch(&self.sample_buf);
        if let Some(sink) = self.stats_sink.as_mut() {
            sink.sample(StatsSample {
                steps: result.new_steps,
                freq: result.classification.walk_hz,
                vmc: result.real_vmc,
                score_0: result.classification.score_0,
                score_hf: result.classification.score_hf,
                score_lf: result.classification.score_lf,
                total: result.classification.total_abs_energy,
            });
        }
        result.new_steps
    }

    /// Read and clear the minute accumulators.
    pub fn minute_stats(&mut self) -> (u16, u8, bool) {
        let MinuteSummary {
            real_vmc,
            orientation,
            still,
        } = minute::summarize(&mut self.epoch);
        (real_vmc.min(u16::MAX as u32) as u16, orientation, still)
    }

    /// Drive the walk/run/sleep/not-worn/deep-sleep detectors for one minute. Applies the
    /// time-travel guard first.
    #[allow(clippy::too_many_arguments)]
    pub fn activities_update(
        &mut self,
        utc_now: i64,
        steps_this_minute: u32,
        vmc: u16,
        orientation: u8,
        plugged_in: bool,
        resting_cal: u32,
        active_cal: u32,
        distance_mm: u32,
        shutting_down: bool,
        hrm: &mut dyn HrmSubscriber,
        sink: &mut dyn SessionSink,
    ) {
        if let Some(last) = self.last_update {
            if utc_now < last || utc_now > last + TIME_TRAVEL_WINDOW_SEC {
                warn!(last_update = last, utc_now, "time travel detected, resetting detectors");
                self.reset_detectors();
            }
        }
        self.last_update = Some(utc_now);

        if !self.enabled {
            return;
        }

        let not_worn_now = self.not_worn.process_minute(utc_now, vmc, orientation, plugged_in);

        self.walk.process_minute(
            utc_now,
            steps_this_minute,
            resting_cal,
            active_cal,
            distance_mm,
            shutting_down,
            hrm,
            sink,
        );
        self.run.process_minute(
            utc_now,
            steps_this_minute,
            resting_cal,
            active_cal,
            distance_mm,
            shutting_down,
            hrm,
            sink,
        );
        self.sleep.process_minute(
            utc_now,
            vmc,
            orientation,
            plugged_in,
            not_worn_now,
            shutting_down,
            &self.not_worn,
            &mut self.deep_sleep,
            sink,
        );
    }

    /// For `Sleep`/`DeepSleep`, the last processed minute's classification lags `last_update` by
    /// `HALF_WIDTH` minutes (the convolution needs that much lookahead). For `Walk`/`Run`, it's
    /// exactly `last_update`.
    pub fn activity_last_processed_time(&self, activity: ActivityKind) -> Option<i64> {
        let last = self.last_update?;
        match activity {
            ActivityKind::Sleep | ActivityKind::DeepSleep => Some(last - HALF_WIDTH as i64 * 60),
            ActivityKind::Walk | ActivityKind::Run => Some(last),
        }
    }

    pub fn get_sleep_stats(&self) -> SleepSummaryStats {
        self.sleep.summary_stats
    }

    /// Toggle the enable flag gating all three detectors; resets state on every toggle.
    pub fn enable_activity_tracking(&mut self, enable: bool) {
        self.enabled = enable;
        self.reset_detectors();
    }

    fn reset_detectors(&mut self) {
        self.sleep.reset();
        self.deep_sleep = DeepSleepEngine::default();
        self.not_worn = NotWornDetector::default();
        self.walk = StepActivityTracker::new(Activity::Walk, WALK_RANGE, SessionRef(1));
        self.run = StepActivityTracker::new(Activity::Run, RUN_RANGE, SessionRef(2));
    }
}
