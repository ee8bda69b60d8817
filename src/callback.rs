//! External interfaces the engine drives synchronously: session emission, calibration stats,
//! and the HRM subscribe/unsubscribe seam.

/// The four session kinds the engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Sleep,
    RestfulSleep,
    Walk,
    Run,
}

/// One session-callback invocation. Numeric fields unused by `Sleep`/`RestfulSleep` are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub activity: Activity,
    pub start_utc: i64,
    pub duration_sec: u32,
    pub ongoing: bool,
    pub delete: bool,
    pub steps: u32,
    pub resting_cal: u32,
    pub active_cal: u32,
    pub distance_mm: u32,
}

/// Consumer of session lifecycle events. `ongoing=true, delete=false` begins or updates a
/// session (idempotent under the same `start_utc`); `ongoing=false, delete=false` finalizes it;
/// `delete=true` retracts a previously emitted ongoing session.
pub trait SessionSink {
    fn emit(&mut self, event: SessionEvent);
}

/// Per-epoch calibration sample handed to an optional `StatsSink`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSample {
    pub steps: u32,
    pub freq: u16,
    pub vmc: u32,
    pub score_0: i64,
    pub score_hf: i64,
    pub score_lf: i64,
    pub total: u64,
}

pub trait StatsSink {
    fn sample(&mut self, s: StatsSample);
}

/// Opaque reference the engine passes back to the HRM manager unchanged; the algorithm never
/// inspects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRef(pub u32);

/// Feature bitmask requested from the HRM subscription; meaningless to the engine beyond
/// forwarding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HrmFeatures(pub u32);

/// Opaque subscription handle. `INVALID` means "no active subscription".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HrmHandle(pub u32);

impl HrmHandle {
    pub const INVALID: HrmHandle = HrmHandle(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// HRM subscribe/unsubscribe seam. The engine subscribes purely to keep sensor power
/// management aware of activity; it never reads HRM samples back.
pub trait HrmSubscriber {
    fn subscribe(
        &mut self,
        session_ref: SessionRef,
        interval_sec: u32,
        expire_sec: u32,
        features: HrmFeatures,
    ) -> HrmHandle;

    fn unsubscribe(&mut self, handle: HrmHandle);
}

/// No-op `HrmSubscriber` for callers without an HRM manager, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHrm;

impl HrmSubscriber for NullHrm {
    fn subscribe(
        &mut self,
        _session_ref: SessionRef,
        _interval_sec: u32,
        _expire_sec: u32,
        _features: HrmFeatures,
    ) -> HrmHandle {
        HrmHandle(1)
    }

    fn unsubscribe(&mut self, _handle: HrmHandle) {}
}
