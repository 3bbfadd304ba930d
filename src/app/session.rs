use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::config::{HarnessConfig, MemdumpSettings, OutputSettings, ProfilerSettings};
use crate::app::device::apps::{force_stop_app, kill_script, query_version_code};
use crate::app::device::memdump::{fetch_memdump, write_control_flag, ControlFlag};
use crate::app::device::profiler::{export_profiler_artifacts, start_profiler, ProfilerExport};
use crate::app::error::AppError;
use crate::app::hdc::paths::PackageName;
use crate::app::hdc::runner::RemoteShell;
use crate::app::models::{SeriesStats, SessionSummary};
use crate::app::pmap::handoff::persist_series;
use crate::app::pmap::monitor::MonitorController;
use crate::app::pmap::probe::SampleProbe;
use crate::app::pmap::series::SampleSeries;
use crate::app::ui::driver::{Point, UiDriver};
use crate::app::ui::lookup::{click_first_match, skip_ad_strategies};

const GC_DUMP_AT_REMAINING: u32 = 5;

/// Waits between scenario steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPacing {
    pub settle: Duration,
    pub launch_wait: Duration,
    pub swipe_gap: Duration,
    pub swipe_duration: Duration,
}

impl Default for SessionPacing {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            launch_wait: Duration::from_millis(2800),
            swipe_gap: Duration::from_secs(1),
            swipe_duration: Duration::from_millis(300),
        }
    }
}

impl SessionPacing {
    pub fn instant() -> Self {
        Self {
            settle: Duration::ZERO,
            launch_wait: Duration::ZERO,
            swipe_gap: Duration::ZERO,
            swipe_duration: Duration::from_millis(300),
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// One scripted run against the app: setup, launch with sampling, gestures, teardown.
pub struct TestSession {
    case_name: String,
    package: PackageName,
    shell: Arc<dyn RemoteShell>,
    driver: Arc<dyn UiDriver>,
    monitor: MonitorController,
    memdump: MemdumpSettings,
    profiler: ProfilerSettings,
    output: OutputSettings,
    pacing: SessionPacing,
    trace_id: String,
    version_code: u64,
    swipes: u32,
    skip_ad_strategy: Option<String>,
}

impl TestSession {
    pub fn new(
        config: &HarnessConfig,
        case_name: impl Into<String>,
        shell: Arc<dyn RemoteShell>,
        driver: Arc<dyn UiDriver>,
        probe: Arc<dyn SampleProbe>,
        trace_id: impl Into<String>,
    ) -> Result<Self, AppError> {
        let trace_id = trace_id.into();
        let package = config.package_name(&trace_id)?;
        let monitor = MonitorController::new(config.monitor_config(&trace_id)?, probe, trace_id.clone())
            .with_stop_grace(config.stop_grace(&trace_id)?);
        Ok(Self {
            case_name: case_name.into(),
            package,
            shell,
            driver,
            monitor,
            memdump: config.memdump.clone(),
            profiler: config.profiler.clone(),
            output: config.output.clone(),
            pacing: SessionPacing::default(),
            trace_id,
            version_code: 0,
            swipes: 0,
            skip_ad_strategy: None,
        })
    }

    pub fn with_pacing(mut self, pacing: SessionPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn monitor(&self) -> &MonitorController {
        &self.monitor
    }

    pub fn setup(&mut self) {
        info!(trace_id = %self.trace_id, case = %self.case_name, package = %self.package, "session setup");
        if let Err(err) = self.driver.stop_app(self.package.as_str(), &self.trace_id) {
            warn!(trace_id = %self.trace_id, error = %err, "stop before setup failed");
        }
        pause(self.pacing.settle);

        self.version_code = query_version_code(self.shell.as_ref(), &self.package, &self.trace_id);
        info!(trace_id = %self.trace_id, version_code = self.version_code, "app version");

        if self.memdump.enabled {
            write_control_flag(
                self.shell.as_ref(),
                &self.memdump,
                &self.package,
                ControlFlag::Reset,
                &self.trace_id,
            );
            pause(self.pacing.settle);
        }
        if self.profiler.enabled {
            match start_profiler(self.shell.as_ref(), &self.profiler, &self.package, &self.trace_id) {
                Ok(()) => pause(self.pacing.settle),
                Err(err) => warn!(trace_id = %self.trace_id, error = %err, "profiler not started"),
            }
        }
    }

    /// Cold-starts the app with sampling already running, then dismisses the splash ad.
    pub fn launch_with_monitor(&mut self) -> Result<(), AppError> {
        force_stop_app(self.shell.as_ref(), &self.package, self.pacing.settle, &self.trace_id);
        self.monitor.start()?;
        self.driver.start_app(self.package.as_str(), &self.trace_id)?;
        pause(self.pacing.launch_wait);

        match click_first_match(self.driver.as_ref(), &skip_ad_strategies(), &self.trace_id) {
            Ok(strategy) => self.skip_ad_strategy = Some(strategy.to_string()),
            Err(err) => warn!(trace_id = %self.trace_id, error = %err, "splash ad not dismissed"),
        }
        pause(self.pacing.settle);
        Ok(())
    }

    /// Asks the app to write its memdump. No-op when memdump is disabled.
    pub fn trigger_gc_dump(&self) -> bool {
        if !self.memdump.enabled {
            return false;
        }
        write_control_flag(
            self.shell.as_ref(),
            &self.memdump,
            &self.package,
            ControlFlag::TriggerDump,
            &self.trace_id,
        )
    }

    /// Swipes up the home feed `swipe_count` times. The GC dump fires when five swipes remain.
    pub fn run_home_swipe(&mut self, swipe_count: u32) -> Result<(), AppError> {
        let (width, height) = self.driver.window_size(&self.trace_id)?;
        let x = (width / 2) as i32;
        let from = Point::new(x, (u64::from(height) * 7 / 10) as i32);
        let to = Point::new(x, (u64::from(height) * 2 / 10) as i32);
        info!(trace_id = %self.trace_id, swipe_count, width, height, "home swipe started");

        for index in 0..swipe_count {
            let remaining = swipe_count - index - 1;
            if remaining == GC_DUMP_AT_REMAINING && self.trigger_gc_dump() {
                pause(self.pacing.swipe_gap);
            }
            self.driver
                .slide(from, to, self.pacing.swipe_duration, &self.trace_id)?;
            self.swipes += 1;
            pause(self.pacing.swipe_gap);
        }
        Ok(())
    }

    fn collect_memdump(&self, series: &SampleSeries) -> (Option<PathBuf>, bool, bool) {
        let local_dir = PathBuf::from(&self.output.dump_dir);
        let fetch = match fetch_memdump(
            self.shell.as_ref(),
            &self.memdump,
            &self.package,
            &local_dir,
            &self.case_name,
            &self.trace_id,
        ) {
            Ok(fetch) => fetch,
            Err(err) => {
                warn!(trace_id = %self.trace_id, error = %err, "memdump fetch failed");
                return (None, false, false);
            }
        };
        pause(self.pacing.settle);
        write_control_flag(
            self.shell.as_ref(),
            &self.memdump,
            &self.package,
            ControlFlag::Reset,
            &self.trace_id,
        );

        let appended = persist_series(&fetch.local_path, series, &self.trace_id);
        (Some(fetch.local_path), fetch.received, appended)
    }

    fn collect_profiler(&self) -> ProfilerExport {
        match export_profiler_artifacts(
            self.shell.as_ref(),
            &self.profiler,
            &self.package,
            &PathBuf::from(&self.output.profiler_dir),
            &self.case_name,
            &self.trace_id,
        ) {
            Ok(export) => export,
            Err(err) => {
                warn!(trace_id = %self.trace_id, error = %err, "profiler export failed");
                ProfilerExport::default()
            }
        }
    }

    /// Stops sampling and collects artifacts. Every step logs and carries on.
    pub fn teardown(&mut self) -> SessionSummary {
        let series = self.monitor.stop();

        let (memdump_path, memdump_received, samples_appended) = if self.memdump.enabled {
            self.collect_memdump(&series)
        } else {
            (None, false, false)
        };

        let profiler = if self.profiler.enabled {
            self.collect_profiler()
        } else {
            ProfilerExport::default()
        };

        if let Err(err) = self.driver.stop_app(self.package.as_str(), &self.trace_id) {
            warn!(trace_id = %self.trace_id, error = %err, "stop app failed");
        }
        pause(self.pacing.settle);
        if let Err(err) = self
            .shell
            .run(&kill_script(&self.package), Duration::from_secs(10), &self.trace_id)
        {
            warn!(trace_id = %self.trace_id, error = %err, "kill failed");
        }
        pause(self.pacing.settle);

        let summary = SessionSummary {
            trace_id: self.trace_id.clone(),
            case_name: self.case_name.clone(),
            package: self.package.to_string(),
            version_code: self.version_code,
            swipes: self.swipes,
            skip_ad_strategy: self.skip_ad_strategy.clone(),
            series: SeriesStats::from(&series),
            memdump_path: memdump_path.map(|path| path.display().to_string()),
            memdump_received,
            samples_appended,
            profiler_htrace: profiler.htrace_path.map(|path| path.display().to_string()),
            profiler_hidumper: profiler.hidumper_path.map(|path| path.display().to_string()),
        };
        info!(
            trace_id = %self.trace_id,
            case = %self.case_name,
            samples = summary.series.count,
            swipes = summary.swipes,
            "session finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pmap::monitor::MonitorState;
    use crate::app::testing::{ok_output, FakeShell, FakeUiDriver, FnProbe, UiAction};
    use std::fs;

    fn config(dump_dir: &std::path::Path) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.monitor.sample_interval_seconds = 0.02;
        config.output.dump_dir = dump_dir.display().to_string();
        config
    }

    fn shell() -> Arc<FakeShell> {
        Arc::new(
            FakeShell::new(|script| {
                if script.starts_with("bm dump") {
                    Ok(ok_output("\"versionCode\": 8831,\n"))
                } else {
                    Ok(ok_output(""))
                }
            })
            .with_recv(|_, local| {
                fs::write(local, "PRIOR\n").expect("write");
                Ok(ok_output("FileTransfer finish, Size:6, File count = 1, time:1ms\n"))
            }),
        )
    }

    #[test]
    fn home_swipe_session_appends_samples_to_memdump() {
        let dir = tempfile::tempdir().expect("tempdir");
        let shell = shell();
        let driver = Arc::new(FakeUiDriver::new(vec![]));
        let probe = Arc::new(FnProbe::new(|_| Ok("100 50".to_string())));

        let mut session = TestSession::new(
            &config(dir.path()),
            "TencentVideoHome",
            shell.clone(),
            driver.clone(),
            probe,
            "trace-session",
        )
        .expect("session")
        .with_pacing(SessionPacing::instant());

        session.setup();
        session.launch_with_monitor().expect("launch");
        assert_eq!(session.monitor().state(), MonitorState::Running);
        session.run_home_swipe(6).expect("swipe");
        thread::sleep(Duration::from_millis(120));
        let summary = session.teardown();

        assert_eq!(summary.version_code, 8831);
        assert_eq!(summary.swipes, 6);
        assert_eq!(summary.skip_ad_strategy.as_deref(), Some("point(1139,214)"));
        assert!(summary.memdump_received);
        assert!(summary.samples_appended);
        assert!(summary.series.count >= 1);
        assert!(summary.series.strictly_increasing);
        assert_eq!(summary.profiler_htrace, None);

        let dump = dir.path().join("TencentVideoHome_memdump.log");
        assert_eq!(summary.memdump_path, Some(dump.display().to_string()));
        let body = fs::read_to_string(&dump).expect("read");
        assert!(body.starts_with("PRIOR\n\n"));
        assert!(body.contains(",100,50\n"));

        let control: Vec<String> = shell
            .scripts()
            .into_iter()
            .filter(|script| script.contains("control.log"))
            .collect();
        assert_eq!(control.len(), 3);
        assert!(control[0].starts_with("echo \"0\""));
        assert!(control[1].starts_with("echo \"1\""));
        assert!(control[2].starts_with("echo \"0\""));

        let actions = driver.actions();
        assert_eq!(actions[0], UiAction::StopApp("com.tencent.videohm".to_string()));
        assert_eq!(actions[1], UiAction::StartApp("com.tencent.videohm".to_string()));
        assert_eq!(actions[2], UiAction::Touch(Point::new(1139, 214)));
        let slides = actions
            .iter()
            .filter(|action| {
                **action == UiAction::Slide(Point::new(630, 1904), Point::new(630, 544))
            })
            .count();
        assert_eq!(slides, 6);
        assert_eq!(
            actions.last(),
            Some(&UiAction::StopApp("com.tencent.videohm".to_string()))
        );
    }

    #[test]
    fn memdump_disabled_skips_control_and_transfer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.memdump.enabled = false;
        let shell = shell();
        let driver = Arc::new(FakeUiDriver::new(vec![("跳过", "Text", Point::new(1140, 215))]));
        let probe = Arc::new(FnProbe::new(|_| Ok("0 0".to_string())));

        let mut session = TestSession::new(&config, "Case", shell.clone(), driver, probe, "t")
            .expect("session")
            .with_pacing(SessionPacing::instant());
        session.setup();
        session.launch_with_monitor().expect("launch");
        assert!(!session.trigger_gc_dump());
        session.run_home_swipe(6).expect("swipe");
        let summary = session.teardown();

        assert_eq!(summary.skip_ad_strategy.as_deref(), Some("text=跳过"));
        assert_eq!(summary.memdump_path, None);
        assert!(!summary.samples_appended);
        assert!(shell.received().is_empty());
        assert!(!shell.scripts().iter().any(|script| script.contains("control.log")));
    }

    #[test]
    fn out_of_range_stop_grace_fails_construction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.monitor.stop_grace_seconds = 1e20;
        let result = TestSession::new(
            &config,
            "Case",
            shell(),
            Arc::new(FakeUiDriver::new(vec![])),
            Arc::new(FnProbe::new(|_| Ok("1 1".to_string()))),
            "trace-grace",
        );
        let err = result.err().expect("grace beyond Duration range");
        assert_eq!(err.code, "ERR_VALIDATION");
        assert_eq!(err.trace_id, "trace-grace");
    }

    #[test]
    fn second_launch_while_sampling_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let probe = Arc::new(FnProbe::new(|_| Ok("1 1".to_string())));
        let mut session = TestSession::new(
            &config(dir.path()),
            "Case",
            shell(),
            Arc::new(FakeUiDriver::new(vec![])),
            probe,
            "t",
        )
        .expect("session")
        .with_pacing(SessionPacing::instant());

        session.launch_with_monitor().expect("launch");
        let err = session.launch_with_monitor().expect_err("double launch");
        assert_eq!(err.code, "ERR_STATE");
        session.teardown();
        assert_eq!(session.monitor().state(), MonitorState::Stopped);
    }
}
