//! Fakes shared by unit tests across modules.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::app::error::AppError;
use crate::app::hdc::runner::{CommandOutput, RemoteShell};
use crate::app::pmap::probe::{ProbeError, SampleProbe};
use crate::app::pmap::sampler::{CancelToken, Clock};
use crate::app::ui::driver::{Point, UiDriver};

pub fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

/// Probe whose behavior is a function of the zero-based call index.
pub struct FnProbe<F> {
    respond: F,
    calls: AtomicUsize,
}

impl<F> FnProbe<F>
where
    F: Fn(usize) -> Result<String, ProbeError> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> SampleProbe for FnProbe<F>
where
    F: Fn(usize) -> Result<String, ProbeError> + Send + Sync,
{
    fn sample(&self, _timeout: Duration, _trace_id: &str) -> Result<String, ProbeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(call)
    }
}

const MANUAL_EPOCH_US: i64 = 1_760_000_000_000_000;

/// Clock that only moves when told to. `sleep` advances it instantly.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }

    fn unix_micros(&self) -> i64 {
        MANUAL_EPOCH_US + self.offset().as_micros() as i64
    }

    fn sleep(&self, duration: Duration, _cancel: &CancelToken) {
        self.sleeps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

type ShellFn = dyn Fn(&str) -> Result<CommandOutput, AppError> + Send + Sync;
type RecvFn = dyn Fn(&str, &Path) -> Result<CommandOutput, AppError> + Send + Sync;

/// Remote shell that answers scripts with a closure and records everything it was asked.
pub struct FakeShell {
    respond: Box<ShellFn>,
    recv: Box<RecvFn>,
    scripts: Mutex<Vec<String>>,
    detached: Mutex<Vec<String>>,
    received: Mutex<Vec<String>>,
}

impl FakeShell {
    pub fn new(
        respond: impl Fn(&str) -> Result<CommandOutput, AppError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            recv: Box::new(|_, _| Ok(ok_output(""))),
            scripts: Mutex::new(Vec::new()),
            detached: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn with_recv(
        mut self,
        recv: impl Fn(&str, &Path) -> Result<CommandOutput, AppError> + Send + Sync + 'static,
    ) -> Self {
        self.recv = Box::new(recv);
        self
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl RemoteShell for FakeShell {
    fn run(&self, script: &str, _timeout: Duration, _trace_id: &str) -> Result<CommandOutput, AppError> {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(script.to_string());
        (self.respond)(script)
    }

    fn recv_file(
        &self,
        remote: &str,
        local: &Path,
        _timeout: Duration,
        _trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        self.received
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(remote.to_string());
        (self.recv)(remote, local)
    }

    fn spawn_detached(&self, script: &str, _trace_id: &str) -> Result<(), AppError> {
        self.detached
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(script.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    StartApp(String),
    StopApp(String),
    Touch(Point),
    Slide(Point, Point),
}

/// UI driver backed by a fixed list of visible `(text, type, centre)` nodes.
pub struct FakeUiDriver {
    nodes: Vec<(String, String, Point)>,
    window: (u32, u32),
    actions: Mutex<Vec<UiAction>>,
}

impl FakeUiDriver {
    pub fn new(nodes: Vec<(&str, &str, Point)>) -> Self {
        Self {
            nodes: nodes
                .into_iter()
                .map(|(text, kind, point)| (text.to_string(), kind.to_string(), point))
                .collect(),
            window: (1260, 2720),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn actions(&self) -> Vec<UiAction> {
        self.actions.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, action: UiAction) {
        self.actions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(action);
    }
}

impl UiDriver for FakeUiDriver {
    fn start_app(&self, package: &str, _trace_id: &str) -> Result<(), AppError> {
        self.record(UiAction::StartApp(package.to_string()));
        Ok(())
    }

    fn stop_app(&self, package: &str, _trace_id: &str) -> Result<(), AppError> {
        self.record(UiAction::StopApp(package.to_string()));
        Ok(())
    }

    fn find_by_text(
        &self,
        text: &str,
        exact: bool,
        node_type: Option<&str>,
        _trace_id: &str,
    ) -> Result<Option<Point>, AppError> {
        Ok(self
            .nodes
            .iter()
            .find(|(node_text, kind, _)| {
                let text_ok = if exact {
                    node_text == text
                } else {
                    node_text.contains(text)
                };
                text_ok && node_type.map_or(true, |wanted| wanted == kind)
            })
            .map(|(_, _, point)| *point))
    }

    fn touch(&self, point: Point, _trace_id: &str) -> Result<(), AppError> {
        self.record(UiAction::Touch(point));
        Ok(())
    }

    fn slide(&self, from: Point, to: Point, _duration: Duration, _trace_id: &str) -> Result<(), AppError> {
        self.record(UiAction::Slide(from, to));
        Ok(())
    }

    fn window_size(&self, _trace_id: &str) -> Result<(u32, u32), AppError> {
        Ok(self.window)
    }
}
