use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::app::pmap::parse::{parse_sample_line, ParsedSample};
use crate::app::pmap::probe::{ProbeError, SampleProbe};
use crate::app::pmap::series::{PushOutcome, SampleRecord, SeriesRecorder};

const PROGRESS_EVERY: usize = 10;
const VERBOSE_FAILURES: usize = 5;
const DRIFT_TOLERANCE: f64 = 1.1;
const SLEEP_SLICE: Duration = Duration::from_millis(50);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn unix_micros(&self) -> i64;
    /// Sleeps up to `duration`, returning early once `cancel` fires.
    fn sleep(&self, duration: Duration, cancel: &CancelToken);
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_micros(&self) -> i64 {
        Utc::now().timestamp_micros()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) {
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if cancel.is_cancelled() {
                break;
            }
            let step = remaining.min(SLEEP_SLICE);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl LoopPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl Default for PhaseCell {
    fn default() -> Self {
        Self(AtomicU8::new(LoopPhase::Idle as u8))
    }
}

impl PhaseCell {
    pub fn get(&self) -> LoopPhase {
        LoopPhase::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, phase: LoopPhase) {
        self.0.store(phase as u8, Ordering::SeqCst);
    }

    /// Moves to `to` only if the current phase is `from`.
    pub fn advance(&self, from: LoopPhase, to: LoopPhase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Sleep(Duration),
    Immediate { drifted: bool },
}

/// Sleep budget for the remainder of an iteration that started `elapsed` ago.
pub fn pace(interval: Duration, elapsed: Duration) -> Pace {
    if elapsed < interval {
        Pace::Sleep(interval - elapsed)
    } else {
        Pace::Immediate {
            drifted: elapsed.as_secs_f64() > interval.as_secs_f64() * DRIFT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerReport {
    pub iterations: usize,
    pub accepted: usize,
    pub probe_failures: usize,
    pub parse_failures: usize,
    pub drift_warnings: usize,
    pub discarded: usize,
}

pub struct Sampler {
    pub probe: Arc<dyn SampleProbe>,
    pub clock: Arc<dyn Clock>,
    pub recorder: Arc<SeriesRecorder>,
    pub settings: SamplerSettings,
    pub cancel: CancelToken,
    pub phase: Arc<PhaseCell>,
    pub trace_id: String,
}

impl Sampler {
    pub fn run(self) -> SamplerReport {
        let mut report = SamplerReport::default();
        self.phase.advance(LoopPhase::Idle, LoopPhase::Running);

        while !self.cancel.is_cancelled() {
            let iteration_start = self.clock.now();
            let timestamp_us = self.clock.unix_micros();
            report.iterations += 1;

            let record = match self.probe.sample(self.settings.probe_timeout, &self.trace_id) {
                Ok(line) => match parse_sample_line(&line) {
                    ParsedSample::Valid {
                        virtual_kb,
                        resident_kb,
                    } => SampleRecord::new(timestamp_us, virtual_kb, resident_kb),
                    ParsedSample::Unparseable { reason } => {
                        report.parse_failures += 1;
                        warn!(
                            trace_id = %self.trace_id,
                            timestamp_us,
                            line = %line,
                            reason = %reason,
                            "recording zero sample for unparseable probe output"
                        );
                        SampleRecord::zero(timestamp_us)
                    }
                },
                Err(err) => {
                    report.probe_failures += 1;
                    self.log_probe_failure(&err, report.probe_failures, timestamp_us);
                    SampleRecord::zero(timestamp_us)
                }
            };

            match self.recorder.push(record) {
                PushOutcome::Accepted { count } => {
                    report.accepted = count;
                    if count % PROGRESS_EVERY == 1 {
                        info!(
                            trace_id = %self.trace_id,
                            count,
                            timestamp_us = record.timestamp_us,
                            virtual_kb = record.virtual_kb,
                            resident_kb = record.resident_kb,
                            "pmap samples collected"
                        );
                    }
                }
                PushOutcome::Discarded => {
                    report.discarded += 1;
                    debug!(
                        trace_id = %self.trace_id,
                        timestamp_us,
                        "series already frozen; dropping late sample"
                    );
                }
            }

            let elapsed = self.clock.now().saturating_duration_since(iteration_start);
            match pace(self.settings.interval, elapsed) {
                Pace::Sleep(remaining) => self.clock.sleep(remaining, &self.cancel),
                Pace::Immediate { drifted: true } => {
                    report.drift_warnings += 1;
                    warn!(
                        trace_id = %self.trace_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        interval_ms = self.settings.interval.as_millis() as u64,
                        "sampling iteration overran the interval"
                    );
                }
                Pace::Immediate { drifted: false } => {}
            }
        }

        self.phase.set(LoopPhase::Stopped);
        report
    }

    fn log_probe_failure(&self, err: &ProbeError, failures: usize, timestamp_us: i64) {
        match err {
            ProbeError::Timeout { .. } => {
                warn!(trace_id = %self.trace_id, timestamp_us, error = %err, "pmap probe timed out");
            }
            _ if failures <= VERBOSE_FAILURES => {
                warn!(
                    trace_id = %self.trace_id,
                    timestamp_us,
                    error = %err,
                    "no anon:Kotlin data; the app may not have started yet"
                );
            }
            _ => {
                debug!(trace_id = %self.trace_id, timestamp_us, error = %err, "pmap probe failed");
            }
        }
    }
}
