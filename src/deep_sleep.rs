//! The deep (restful) sleep child state machine: driven entirely by signals from the sleep
//! detector, it buffers candidate deep segments until the parent session is long enough to
//! register them.

use crate::callback::{Activity, SessionEvent, SessionSink};

const BUFFER_CAP: usize = 8;
const MIN_DEEP_RUN_MINUTES: u32 = 20;
const DEEP_SCORE_THRESHOLD: i64 = 160;

#[derive(Debug, Clone, Copy)]
struct DeepCandidate {
    /// Offset from the parent session's `start_time`, so the absolute `start_utc` can be
    /// recomputed if the parent's start shifts before registration.
    start_delta_sec: i64,
    len_m: u32,
    emitted_ongoing: bool,
}

/// Signal fed in by the sleep state machine once per minute while (or when starting/ending) a
/// sleep session is active.
#[derive(Debug, Clone, Copy)]
pub enum DeepSleepSignal {
    Start,
    Continue { score: i64, ok_to_register: bool },
    End,
    Abort,
}

#[derive(Clone, Default)]
pub struct DeepSleepEngine {
    sleep_start_time: Option<i64>,
    deep_start_time: Option<i64>,
    deep_score_count: u32,
    non_deep_score_count: u32,
    ok_to_register: bool,
    buffer: Vec<DeepCandidate>,
}

impl DeepSleepEngine {
    /// Drive the child state machine with this minute's signal and the parent session's
    /// (possibly still-mirrored) `start_time`.
    pub fn process(
        &mut self,
        signal: DeepSleepSignal,
        sample_utc: i64,
        parent_start_time: Option<i64>,
        sink: &mut dyn SessionSink,
    ) {
        match signal {
            DeepSleepSignal::Start => self.start(parent_start_time),
            DeepSleepSignal::Continue {
                score,
                ok_to_register,
            } => self.tick(sample_utc, score, ok_to_register, sink),
            DeepSleepSignal::End => self.end(sink),
            DeepSleepSignal::Abort => self.abort(sink),
        }
    }

    fn start(&mut self, parent_start_time: Option<i64>) {
        self.sleep_start_time = parent_start_time;
        self.deep_start_time = None;
        self.deep_score_count = 0;
        self.non_deep_score_count = 0;
        self.ok_to_register = false;
        self.buffer.clear();
    }

    fn tick(&mut self, sample_utc: i64, score: i64, ok_to_register: bool, sink: &mut dyn SessionSink) {
        let is_deep = score <= DEEP_SCORE_THRESHOLD;
        if is_deep {
            self.deep_score_count += 1;
            self.non_deep_score_count = 0;
            if self.deep_start_time.is_none() && self.deep_score_count >= MIN_DEEP_RUN_MINUTES {
                self.deep_start_time = Some(sample_utc - self.deep_score_count as i64 * 60);
            }
        } else {
            self.non_deep_score_count += 1;
            if let Some(start) = self.deep_start_time.take() {
                let len_m = self.deep_score_count;
                let delta = start - self.sleep_start_time.unwrap_or(start);
                // Already registrable (steady state, not just the one-shot transition below):
                // this segment is complete now, so flush it this tick instead of letting it sit
                // in the buffer until the parent session ends (and risk `push_candidate` evicting
                // it once `BUFFER_CAP` unemitted segments pile up).
                self.push_candidate(delta, len_m, ok_to_register);
            }
            self.deep_score_count = 0;
        }

        let became_registrable = !self.ok_to_register && ok_to_register;
        self.ok_to_register = ok_to_register;
        if !self.ok_to_register {
            return;
        }
        if became_registrable {
            for candidate in &mut self.buffer {
                candidate.emitted_ongoing = true;
            }
        }
        self.emit_completed(sink);
        self.emit_open_segment_ongoing(sample_utc, sink);
    }

    fn end(&mut self, sink: &mut dyn SessionSink) {
        if self.ok_to_register {
            if let Some(start) = self.deep_start_time {
                if self.deep_score_count >= MIN_DEEP_RUN_MINUTES {
                    let delta = start - self.sleep_start_time.unwrap_or(start);
                    self.push_candidate(delta, self.deep_score_count, true);
                }
            }
            for candidate in self.buffer.drain(..) {
                sink.emit(self.event(&candidate, false, false));
            }
        }
        self.reset();
    }

    fn abort(&mut self, sink: &mut dyn SessionSink) {
        for candidate in self.buffer.drain(..).filter(|c| c.emitted_ongoing) {
            sink.emit(self.event(&candidate, false, true));
        }
        self.reset();
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn push_candidate(&mut self, start_delta_sec: i64, len_m: u32, emitted_ongoing: bool) {
        if self.buffer.len() == BUFFER_CAP {
            self.buffer.remove(0);
        }
        self.buffer.push(DeepCandidate {
            start_delta_sec,
            len_m,
            emitted_ongoing,
        });
    }

    fn emit_completed(&mut self, sink: &mut dyn SessionSink) {
        let mut i = 0;
        while i < self.buffer.len() {
            if self.buffer[i].emitted_ongoing {
                let candidate = self.buffer.remove(i);
                sink.emit(self.event(&candidate, false, false));
            } else {
                i += 1;
            }
        }
    }

    fn emit_open_segment_ongoing(&self, sample_utc: i64, sink: &mut dyn SessionSink) {
        if let Some(start) = self.deep_start_time {
            if self.deep_score_count >= MIN_DEEP_RUN_MINUTES {
                let delta = start - self.sleep_start_time.unwrap_or(start);
                let len_m = ((sample_utc - start) / 60).max(0) as u32;
                let candidate = DeepCandidate {
                    start_delta_sec: delta,
                    len_m,
                    emitted_ongoing: true,
                };
                sink.emit(self.event(&candidate, true, false));
            }
        }
    }

    fn event(&self, candidate: &DeepCandidate, ongoing: bool, delete: bool) -> SessionEvent {
        let start_utc = self.sleep_start_time.unwrap_or(0) + candidate.start_delta_sec;
        SessionEvent {
            activity: Activity::RestfulSleep,
            start_utc,
            duration_sec: candidate.len_m * 60,
            ongoing,
            delete,
            steps: 0,
            resting_cal: 0,
            active_cal: 0,
            distance_mm: 0,
        }
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
    fn buffers_candidates_until_registrable() {
        let mut deep = DeepSleepEngine::default();
        let mut rec = Recorder(Vec::new());
        deep.process(DeepSleepSignal::Start, 0, Some(0), &mut rec);

        let mut t = 0i64;
        for _ in 0..25 {
            t += 60;
            deep.process(
                DeepSleepSignal::Continue {
                    score: 50,
                    ok_to_register: false,
                },
                t,
                Some(0),
                &mut rec,
            );
        }
        assert!(rec.0.is_empty(), "nothing emitted before ok_to_register");

        t += 60;
        deep.process(
            DeepSleepSignal::Continue {
                score: 900,
                ok_to_register: true,
            },
            t,
            Some(0),
            &mut rec,
        );
        assert!(!rec.0.is_empty(), "buffered candidate flushed once registrable");
    }

    #[test]
    fn steady_state_segment_flushes_as_completed_without_ending_session() {
        let mut deep = DeepSleepEngine::default();
        let mut rec = Recorder(Vec::new());
        deep.process(DeepSleepSignal::Start, 0, Some(0), &mut rec);

        let mut t = 0i64;
        // Already registrable throughout, so nothing here relies on the one-shot transition.
        for _ in 0..MIN_DEEP_RUN_MINUTES {
            t += 60;
            deep.process(
                DeepSleepSignal::Continue {
                    score: 50,
                    ok_to_register: true,
                },
                t,
                Some(0),
                &mut rec,
            );
        }
        rec.0.clear();

        // A non-deep minute closes the segment just registered above.
        t += 60;
        deep.process(
            DeepSleepSignal::Continue {
                score: 900,
                ok_to_register: true,
            },
            t,
            Some(0),
            &mut rec,
        );

        assert!(
            rec.0.iter().any(|e| !e.ongoing && !e.delete),
            "a segment closing in steady state must be emitted as completed the same tick"
        );
    }

    #[test]
    fn abort_deletes_only_previously_emitted() {
        let mut deep = DeepSleepEngine::default();
        let mut rec = Recorder(Vec::new());
        deep.process(DeepSleepSignal::Start, 0, Some(0), &mut rec);
        deep.process(
            DeepSleepSignal::Continue {
                score: 50,
                ok_to_register: true,
            },
            60,
            Some(0),
            &mut rec,
        );
        rec.0.clear();
        deep.process(DeepSleepSignal::Abort, 120, Some(0), &mut rec);
        assert!(rec.0.iter().all(|e| e.delete));
    }
}
