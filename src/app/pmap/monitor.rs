use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::hdc::paths::PackageName;
use crate::app::pmap::probe::SampleProbe;
use crate::app::pmap::sampler::{
    CancelToken, Clock, LoopPhase, PhaseCell, Sampler, SamplerReport, SamplerSettings,
    SystemClock,
};
use crate::app::pmap::series::{SampleSeries, SeriesRecorder};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
const MIN_PROBE_TIMEOUT_S: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub package_name: PackageName,
    pub sample_interval_seconds: f64,
    pub probe_timeout_seconds: Option<f64>,
}

impl MonitorConfig {
    pub fn new(package_name: PackageName, sample_interval_seconds: f64) -> Self {
        Self {
            package_name,
            sample_interval_seconds,
            probe_timeout_seconds: None,
        }
    }

    pub fn with_probe_timeout(mut self, seconds: f64) -> Self {
        self.probe_timeout_seconds = Some(seconds);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.sample_interval_seconds.is_finite() && self.sample_interval_seconds > 0.0
    }

    /// `None` when disabled or when the interval does not fit in a `Duration`.
    pub fn interval(&self) -> Option<Duration> {
        if !self.is_enabled() {
            return None;
        }
        Duration::try_from_secs_f64(self.sample_interval_seconds).ok()
    }

    /// Explicit timeout when positive, else the larger of 1s and twice the interval.
    pub fn effective_probe_timeout(&self) -> Duration {
        let seconds = match self.probe_timeout_seconds {
            Some(value) if value.is_finite() && value > 0.0 => value,
            _ => {
                let interval = if self.is_enabled() {
                    self.sample_interval_seconds
                } else {
                    0.0
                };
                MIN_PROBE_TIMEOUT_S.max(interval * 2.0)
            }
        };
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    Stopped,
}

struct ActiveRun {
    cancel: CancelToken,
    recorder: Arc<SeriesRecorder>,
    phase: Arc<PhaseCell>,
    done: mpsc::Receiver<SamplerReport>,
    join: JoinHandle<()>,
}

/// Owns one background sampling thread per `start`/`stop` pair.
pub struct MonitorController {
    config: MonitorConfig,
    probe: Arc<dyn SampleProbe>,
    clock: Arc<dyn Clock>,
    stop_grace: Duration,
    trace_id: String,
    state: MonitorState,
    run: Option<ActiveRun>,
    // Phase of the last stopped run; a detached thread keeps it at `Stopping` until it exits.
    last_phase: Option<Arc<PhaseCell>>,
    last_series: SampleSeries,
}

impl MonitorController {
    pub fn new(config: MonitorConfig, probe: Arc<dyn SampleProbe>, trace_id: impl Into<String>) -> Self {
        Self {
            config,
            probe,
            clock: Arc::new(SystemClock),
            stop_grace: DEFAULT_STOP_GRACE,
            trace_id: trace_id.into(),
            state: MonitorState::Idle,
            run: None,
            last_phase: None,
            last_series: SampleSeries::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn loop_phase(&self) -> LoopPhase {
        match (&self.run, &self.last_phase) {
            (Some(run), _) => run.phase.get(),
            (None, Some(phase)) => phase.get(),
            (None, None) => LoopPhase::Idle,
        }
    }

    /// Samples collected so far in the running series, or the frozen count after `stop`.
    pub fn sample_count(&self) -> usize {
        match &self.run {
            Some(run) => run.recorder.len(),
            None => self.last_series.len(),
        }
    }

    /// The series frozen by the most recent `stop`.
    pub fn series(&self) -> &SampleSeries {
        &self.last_series
    }

    /// Spawns the sampling thread. Returns `Ok(false)` when sampling is disabled.
    pub fn start(&mut self) -> Result<bool, AppError> {
        if !self.config.is_enabled() {
            info!(
                trace_id = %self.trace_id,
                interval_s = self.config.sample_interval_seconds,
                "pmap sampling disabled"
            );
            return Ok(false);
        }
        let interval = self.config.interval().ok_or_else(|| {
            AppError::validation(
                format!(
                    "Sample interval {}s is out of range",
                    self.config.sample_interval_seconds
                ),
                &self.trace_id,
            )
        })?;
        if self.state == MonitorState::Running {
            return Err(AppError::state(
                "pmap monitor already running; stop it before starting again",
                &self.trace_id,
            ));
        }

        let cancel = CancelToken::new();
        let recorder = Arc::new(SeriesRecorder::new());
        let phase = Arc::new(PhaseCell::default());
        let (done_tx, done) = mpsc::channel();
        let settings = SamplerSettings {
            interval,
            probe_timeout: self.config.effective_probe_timeout(),
        };
        let sampler = Sampler {
            probe: Arc::clone(&self.probe),
            clock: Arc::clone(&self.clock),
            recorder: Arc::clone(&recorder),
            settings,
            cancel: cancel.clone(),
            phase: Arc::clone(&phase),
            trace_id: self.trace_id.clone(),
        };

        let join = std::thread::Builder::new()
            .name("pmap-sampler".to_string())
            .spawn(move || {
                let report = sampler.run();
                let _ = done_tx.send(report);
            })
            .map_err(|err| {
                AppError::system(format!("Failed to spawn sampler thread: {err}"), &self.trace_id)
            })?;

        self.last_series = SampleSeries::default();
        self.last_phase = None;
        self.run = Some(ActiveRun {
            cancel,
            recorder,
            phase,
            done,
            join,
        });
        self.state = MonitorState::Running;
        info!(
            trace_id = %self.trace_id,
            package = %self.config.package_name,
            interval_s = self.config.sample_interval_seconds,
            probe_timeout_ms = settings.probe_timeout.as_millis() as u64,
            "pmap monitor started"
        );
        Ok(true)
    }

    /// Signals the sampling thread, waits up to the grace period, and freezes the series.
    /// Safe to call in any state.
    pub fn stop(&mut self) -> SampleSeries {
        let Some(run) = self.run.take() else {
            info!(
                trace_id = %self.trace_id,
                count = self.last_series.len(),
                "pmap monitor not running"
            );
            return self.last_series.clone();
        };

        run.phase.set(LoopPhase::Stopping);
        run.cancel.cancel();

        match run.done.recv_timeout(self.stop_grace) {
            Ok(report) => {
                if run.join.join().is_err() {
                    warn!(trace_id = %self.trace_id, "pmap sampler thread panicked after reporting");
                }
                info!(
                    trace_id = %self.trace_id,
                    iterations = report.iterations,
                    probe_failures = report.probe_failures,
                    parse_failures = report.parse_failures,
                    drift_warnings = report.drift_warnings,
                    "pmap sampler finished"
                );
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread sees the cancel flag after its in-flight probe and exits on its own.
                warn!(
                    trace_id = %self.trace_id,
                    grace_ms = self.stop_grace.as_millis() as u64,
                    "pmap sampler did not finish within the grace period; detaching"
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = run.join.join();
                run.phase.set(LoopPhase::Stopped);
                warn!(trace_id = %self.trace_id, "pmap sampler exited without a report");
            }
        }
        self.last_phase = Some(run.phase);

        let series = run.recorder.freeze();
        self.last_series = series.clone();
        self.state = MonitorState::Stopped;
        info!(
            trace_id = %self.trace_id,
            count = series.len(),
            zero_samples = series.zero_count(),
            "pmap monitor stopped"
        );
        series
    }
}

impl Drop for MonitorController {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.cancel.cancel();
        }
    }
}
