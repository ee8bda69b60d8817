//! End-to-end scenarios (S1–S6) plus the invariants that aren't already covered by unit tests
//! colocated with the modules they exercise.

use wrist_activity_engine::callback::{
    Activity, HrmFeatures, HrmHandle, HrmSubscriber, NullHrm, SessionEvent, SessionRef, SessionSink,
};
use wrist_activity_engine::engine::{ActivityKind, EngineState};
use wrist_activity_engine::SAMPLE_HZ;

/// Install a `tracing` subscriber so `--nocapture` shows session transitions and time-travel
/// resets. Safe to call from every test: only the first call wins.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Default)]
struct RecordingSessionSink {
    events: Vec<SessionEvent>,
}

impl SessionSink for RecordingSessionSink {
    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

impl RecordingSessionSink {
    fn finalized(&self, activity: Activity) -> Vec<&SessionEvent> {
        self.events
            .iter()
            .filter(|e| e.activity == activity && !e.ongoing && !e.delete)
            .collect()
    }

    fn ongoing(&self, activity: Activity) -> Vec<&SessionEvent> {
        self.events
            .iter()
            .filter(|e| e.activity == activity && e.ongoing)
            .collect()
    }
}

struct CountingHrm {
    active: Vec<HrmHandle>,
    next: u32,
}

impl Default for CountingHrm {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            next: 1,
        }
    }
}

impl HrmSubscriber for CountingHrm {
    fn subscribe(
        &mut self,
        _session_ref: SessionRef,
        _interval_sec: u32,
        _expire_sec: u32,
        _features: HrmFeatures,
    ) -> HrmHandle {
        let h = HrmHandle(self.next);
        self.next += 1;
        self.active.push(h);
        h
    }

    fn unsubscribe(&mut self, handle: HrmHandle) {
        self.active.retain(|&h| h != handle);
    }
}

const SAMPLES_PER_MINUTE: usize = SAMPLE_HZ * 60;

/// S1 — 30 minutes of all-zero samples: no steps, no sessions, ~zero VMC.
#[test]
fn s1_all_zeros_produces_no_steps_or_sessions() {
    init_tracing();
    let mut engine = EngineState::new(None);
    let mut hrm = NullHrm;
    let mut sink = RecordingSessionSink::default();

    let silent_minute = vec![[0i16; 3]; SAMPLES_PER_MINUTE];
    let mut total_steps = 0u32;
    let mut utc = 0i64;

    for _ in 0..30 {
        let (steps, consumed) = engine.analyze_samples(&silent_minute).unwrap();
        assert_eq!(consumed, SAMPLES_PER_MINUTE);
        total_steps += steps;

        let (vmc, orientation, _still) = engine.minute_stats();
        utc += 60;
        engine.activities_update(
            utc, steps, vmc, orientation, false, 0, 0, 0, false, &mut hrm, &mut sink,
        );
    }

    assert_eq!(total_steps, 0);
    assert!(sink.events.is_empty(), "silence must never emit a session");
}

/// S2 — a clean 1.2 Hz oscillation on X should drive nonzero steps through the full epoch/FFT
/// pipeline (band-pass filter -> VMC -> FFT magnitude -> step classification).
#[test]
fn s2_steady_oscillation_drives_nonzero_steps() {
    init_tracing();
    let mut engine = EngineState::new(None);
    let mut hrm = NullHrm;
    let mut sink = RecordingSessionSink::default();

    let freq_hz = 1.2f64;
    let amplitude = 400i32;
    let mut total_steps = 0u32;
    let mut utc = 0i64;
    let mut sample_index = 0u64;

    for _ in 0..15 {
        let mut minute = Vec::with_capacity(SAMPLES_PER_MINUTE);
        for _ in 0..SAMPLES_PER_MINUTE {
            let t = sample_index as f64 / SAMPLE_HZ as f64;
            let x = (amplitude as f64 * (std::f64::consts::TAU * freq_hz * t).sin()).round() as i16;
            minute.push([x, 0i16, 1000i16]);
            sample_index += 1;
        }

        let (steps, consumed) = engine.analyze_samples(&minute).unwrap();
        assert_eq!(consumed, SAMPLES_PER_MINUTE);
        total_steps += steps;

        let (vmc, orientation, _still) = engine.minute_stats();
        utc += 60;
        engine.activities_update(
            utc, steps, vmc, orientation, false, 0, 5, 70, false, &mut hrm, &mut sink,
        );
    }

    assert!(
        total_steps > 0,
        "a clean in-band 1.2 Hz oscillation should register steps"
    );
}

/// S3 — 400 minutes of uniform low VMC accepts exactly one long Sleep session with at least one
/// RestfulSleep segment nested inside it.
#[test]
fn s3_sleep_cycle_is_accepted_with_a_restful_segment() {
    init_tracing();
    let mut engine = EngineState::new(None);
    let mut hrm = NullHrm;
    let mut sink = RecordingSessionSink::default();

    // Orientation alternates between two non-flat values each minute: a real wrist shifts
    // slightly even during sleep, and holding it byte-identical would itself read as
    // maybe-not-worn ("same orientation as previous minute") long before 400 minutes are up.
    let mut utc = 0i64;
    for minute in 0..400 {
        utc += 60;
        let orientation = if minute % 2 == 0 { 20 } else { 36 };
        engine.activities_update(utc, 0, 5, orientation, false, 0, 0, 0, false, &mut hrm, &mut sink);
    }
    // Trailing wake-up to force the session closed.
    for minute in 0..20 {
        utc += 60;
        let orientation = if minute % 2 == 0 { 20 } else { 36 };
        engine.activities_update(utc, 0, 5000, orientation, false, 0, 0, 0, false, &mut hrm, &mut sink);
    }

    let sleeps = sink.finalized(Activity::Sleep);
    assert_eq!(sleeps.len(), 1, "expected exactly one finalized sleep session");
    assert!(sleeps[0].duration_sec >= 60 * 60, "session should span most of the 400 minutes");

    let restful = sink.finalized(Activity::RestfulSleep);
    let sleep = sleeps[0];
    assert!(
        restful
            .iter()
            .any(|r| r.start_utc >= sleep.start_utc
                && r.start_utc + r.duration_sec as i64 <= sleep.start_utc + sleep.duration_sec as i64),
        "expected at least one restful-sleep segment nested inside the sleep session"
    );
}

/// S4 — the same low-VMC stream, but plugged in throughout, never finalizes a Sleep session.
#[test]
fn s4_plugged_in_rejects_the_sleep_session() {
    init_tracing();
    let mut engine = EngineState::new(None);
    let mut hrm = NullHrm;
    let mut sink = RecordingSessionSink::default();

    let mut utc = 0i64;
    for minute in 0..400 {
        utc += 60;
        let orientation = if minute % 2 == 0 { 20 } else { 36 };
        engine.activities_update(utc, 0, 5, orientation, true, 0, 0, 0, false, &mut hrm, &mut sink);
    }

    assert!(sink.finalized(Activity::Sleep).is_empty());
    assert!(
        sink.events.iter().all(|e| !(e.activity == Activity::Sleep && !e.delete && !e.ongoing)),
        "plugged-in minutes must never finalize a sleep session"
    );
}

/// S5 — an ongoing Walk session, then a 10-minute jump backward: the engine must reset and not
/// keep updating the stale session.
#[test]
fn s5_time_travel_resets_in_flight_activity() {
    init_tracing();
    let mut engine = EngineState::new(None);
    let mut hrm = CountingHrm::default();
    let mut sink = RecordingSessionSink::default();

    let mut utc = 0i64;
    for _ in 0..30 {
        utc += 60;
        engine.activities_update(utc, 90, 50, 1, false, 0, 5, 70, false, &mut hrm, &mut sink);
    }
    assert!(!sink.ongoing(Activity::Walk).is_empty(), "expected an ongoing walk by minute 30");
    let events_before_jump = sink.events.len();

    // Jump 10 minutes into the past.
    utc -= 10 * 60;
    engine.activities_update(utc, 90, 50, 1, false, 0, 5, 70, false, &mut hrm, &mut sink);

    assert_eq!(
        engine.activity_last_processed_time(ActivityKind::Walk),
        Some(utc),
        "last_update should reflect the post-reset call"
    );
    assert_eq!(
        sink.events.len(),
        events_before_jump,
        "the time-travel call itself should not resume the stale walk session"
    );
}

/// S6 — feeding a partial epoch returns `consumed == 0`; the sample that completes it returns
/// `consumed == 125`.
#[test]
fn s6_epoch_boundary_reports_consumed_only_on_completion() {
    init_tracing();
    let mut engine = EngineState::new(None);

    let (steps, consumed) = engine.analyze_samples(&vec![[0i16; 3]; 124]).unwrap();
    assert_eq!(steps, 0);
    assert_eq!(consumed, 0);

    let (steps, consumed) = engine.analyze_samples(&[[0i16; 3]]).unwrap();
    assert_eq!(steps, 0);
    assert_eq!(consumed, 125);
}
