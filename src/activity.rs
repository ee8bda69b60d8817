//! Generic walk/run step-activity tracker. One instance each for Walk and Run,
//! distinguished only by their steps-per-minute range.

use tracing::debug;

use crate::callback::{
    Activity, HrmFeatures, HrmHandle, HrmSubscriber, SessionEvent, SessionRef, SessionSink,
};

const INACTIVE_GRACE_MINUTES: u32 = 6;
const HRM_ACQUIRE_MINUTES: u32 = 3;
const EMIT_THRESHOLD_SEC: u32 = 600;

/// Steps/minute range that counts as "active" for this tracker.
#[derive(Debug, Clone, Copy)]
pub struct StepRange {
    pub min_per_minute: u32,
    pub max_per_minute: u32,
}

pub const WALK_RANGE: StepRange = StepRange {
    min_per_minute: 40,
    max_per_minute: 130,
};
pub const RUN_RANGE: StepRange = StepRange {
    min_per_minute: 130,
    max_per_minute: 255,
};

#[derive(Clone)]
pub struct StepActivityTracker {
    activity: Activity,
    range: StepRange,
    start_time: Option<i64>,
    inactive_minute_count: u32,
    steps: u32,
    resting_calories: u32,
    active_calories: u32,
    distance_mm: u32,
    hrm_session: HrmHandle,
    session_ref: SessionRef,
}

impl StepActivityTracker {
    pub fn new(activity: Activity, range: StepRange, session_ref: SessionRef) -> Self {
        Self {
            activity,
            range,
            start_time: None,
            inactive_minute_count: 0,
            steps: 0,
            resting_calories: 0,
            active_calories: 0,
            distance_mm: 0,
            hrm_session: HrmHandle::INVALID,
            session_ref,
        }
    }

    fn is_active(&self, steps_this_minute: u32) -> bool {
        (self.range.min_per_minute..=self.range.max_per_minute).contains(&steps_this_minute)
    }

    /// Whether a session is currently open. Exposed for the engine facade's tests.
    pub(crate) fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    /// Feed one minute's step count and roll-up deltas.
    #[allow(clippy::too_many_arguments)]
    pub fn process_minute(
        &mut self,
        utc_now: i64,
        steps_this_minute: u32,
        resting_cal_delta: u32,
        active_cal_delta: u32,
        distance_mm_delta: u32,
        shutting_down: bool,
        hrm: &mut dyn HrmSubscriber,
        sink: &mut dyn SessionSink,
    ) {
        let active = self.is_active(steps_this_minute);

        if self.start_time.is_none() {
            if active {
                self.start_time = Some(utc_now - 60);
                self.accumulate(resting_cal_delta, active_cal_delta, distance_mm_delta, steps_this_minute);
            }
            if shutting_down {
                self.finish(utc_now, hrm, sink);
            }
            return;
        }

        if active {
            self.inactive_minute_count = 0;
        } else {
            self.inactive_minute_count += 1;
        }
        self.accumulate(resting_cal_delta, active_cal_delta, distance_mm_delta, steps_this_minute);

        let duration_sec = (utc_now - self.start_time.unwrap()).max(0) as u32;

        if self.hrm_session == HrmHandle::INVALID && duration_sec >= HRM_ACQUIRE_MINUTES * 60 {
            self.hrm_session = hrm.subscribe(self.session_ref, 1, 0, HrmFeatures::default());
            debug!(activity = ?self.activity, "hrm session acquired");
        }

        if self.inactive_minute_count > INACTIVE_GRACE_MINUTES || shutting_down {
            self.finish(utc_now, hrm, sink);
            return;
        }

        if duration_sec >= EMIT_THRESHOLD_SEC {
            self.emit(utc_now, duration_sec, true, sink);
        }
    }

    fn accumulate(&mut self, resting_cal: u32, active_cal: u32, distance_mm: u32, steps: u32) {
        self.resting_calories += resting_cal;
        self.active_calories += active_cal;
        self.distance_mm += distance_mm;
        self.steps += steps;
    }

    fn finish(&mut self, utc_now: i64, hrm: &mut dyn HrmSubscriber, sink: &mut dyn SessionSink) {
        if let Some(start) = self.start_time {
            let duration_sec = (utc_now - start).max(0) as u32;
            if duration_sec >= EMIT_THRESHOLD_SEC {
                self.emit(utc_now, duration_sec, false, sink);
            }
        }
        if self.hrm_session != HrmHandle::INVALID {
            hrm.unsubscribe(self.hrm_session);
        }
        self.reset();
    }

    fn emit(&self, _utc_now: i64, duration_sec: u32, ongoing: bool, sink: &mut dyn SessionSink) {
        sink.emit(SessionEvent {
            activity: self.activity,
            start_utc: self.start_time.unwrap(),
            duration_sec,
            ongoing,
            delete: false,
            steps: self.steps,
            resting_cal: self.resting_calories,
            active_cal: self.active_calories,
            distance_mm: self.distance_mm,
        });
    }

    fn reset(&mut self) {
        self.start_time = None;
        self.inactive_minute_count = 0;
        self.steps = 0;
        self.resting_calories = 0;
        self.active_calories = 0;
        self.distance_mm = 0;
        self.hrm_session = HrmHandle::INVALID;
    }
}
