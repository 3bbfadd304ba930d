use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::app::error::AppError;
use crate::app::hdc::paths::PackageName;
use crate::app::hdc::runner::{CommandOutput, RemoteShell};
use crate::app::ui::layout::{locate_text, parse_layout, LayoutNode};

const UI_TIMEOUT: Duration = Duration::from_secs(15);
const LAYOUT_REMOTE_PATH: &str = "/data/local/tmp/pmap_harness_layout.json";
const MIN_SWIPE_SPEED: u32 = 200;
const MAX_SWIPE_SPEED: u32 = 40_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// The gestures and lookups a scenario needs from the device UI.
pub trait UiDriver: Send + Sync {
    fn start_app(&self, package: &str, trace_id: &str) -> Result<(), AppError>;
    fn stop_app(&self, package: &str, trace_id: &str) -> Result<(), AppError>;
    fn find_by_text(
        &self,
        text: &str,
        exact: bool,
        node_type: Option<&str>,
        trace_id: &str,
    ) -> Result<Option<Point>, AppError>;
    fn touch(&self, point: Point, trace_id: &str) -> Result<(), AppError>;
    fn slide(&self, from: Point, to: Point, duration: Duration, trace_id: &str) -> Result<(), AppError>;
    fn window_size(&self, trace_id: &str) -> Result<(u32, u32), AppError>;
}

/// Swipe speed in px/s for covering `from -> to` in `duration`, clamped to what uitest accepts.
pub fn swipe_speed(from: Point, to: Point, duration: Duration) -> u32 {
    let dx = f64::from(to.x - from.x);
    let dy = f64::from(to.y - from.y);
    let distance = (dx * dx + dy * dy).sqrt();
    let secs = duration.as_secs_f64();
    if secs <= 0.0 {
        return MAX_SWIPE_SPEED;
    }
    let speed = (distance / secs).round();
    (speed as u32).clamp(MIN_SWIPE_SPEED, MAX_SWIPE_SPEED)
}

/// Drives the device UI through `aa` and `uitest` over the hdc shell.
pub struct HdcUiDriver {
    shell: Arc<dyn RemoteShell>,
    ability: String,
}

impl HdcUiDriver {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Self {
            shell,
            ability: "EntryAbility".to_string(),
        }
    }

    pub fn with_ability(mut self, ability: impl Into<String>) -> Self {
        self.ability = ability.into();
        self
    }

    fn run_checked(&self, script: &str, trace_id: &str) -> Result<CommandOutput, AppError> {
        let output = self.shell.run(script, UI_TIMEOUT, trace_id)?;
        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            return Err(AppError::system(
                format!("`{script}` failed ({:?}): {detail}", output.exit_code),
                trace_id,
            ));
        }
        debug!(trace_id = %trace_id, script = %script, "ui command ok");
        Ok(output)
    }

    fn package(package: &str, trace_id: &str) -> Result<PackageName, AppError> {
        PackageName::parse(package).map_err(|message| AppError::validation(message, trace_id))
    }

    pub fn dump_layout(&self, trace_id: &str) -> Result<LayoutNode, AppError> {
        self.run_checked(&format!("uitest dumpLayout -p {LAYOUT_REMOTE_PATH}"), trace_id)?;
        let output = self.run_checked(&format!("cat {LAYOUT_REMOTE_PATH}"), trace_id)?;
        parse_layout(&output.stdout).map_err(|message| AppError::system(message, trace_id))
    }
}

impl UiDriver for HdcUiDriver {
    fn start_app(&self, package: &str, trace_id: &str) -> Result<(), AppError> {
        let package = Self::package(package, trace_id)?;
        self.run_checked(&format!("aa start -b {package} -a {}", self.ability), trace_id)?;
        Ok(())
    }

    fn stop_app(&self, package: &str, trace_id: &str) -> Result<(), AppError> {
        let package = Self::package(package, trace_id)?;
        self.run_checked(&format!("aa force-stop {package}"), trace_id)?;
        Ok(())
    }

    fn find_by_text(
        &self,
        text: &str,
        exact: bool,
        node_type: Option<&str>,
        trace_id: &str,
    ) -> Result<Option<Point>, AppError> {
        let root = self.dump_layout(trace_id)?;
        Ok(locate_text(&root, text, exact, node_type))
    }

    fn touch(&self, point: Point, trace_id: &str) -> Result<(), AppError> {
        self.run_checked(&format!("uitest uiInput click {} {}", point.x, point.y), trace_id)?;
        Ok(())
    }

    fn slide(&self, from: Point, to: Point, duration: Duration, trace_id: &str) -> Result<(), AppError> {
        let speed = swipe_speed(from, to, duration);
        self.run_checked(
            &format!(
                "uitest uiInput swipe {} {} {} {} {speed}",
                from.x, from.y, to.x, to.y
            ),
            trace_id,
        )?;
        Ok(())
    }

    fn window_size(&self, trace_id: &str) -> Result<(u32, u32), AppError> {
        let root = self.dump_layout(trace_id)?;
        let bounds = root
            .bounds()
            .ok_or_else(|| AppError::system("Layout root has no bounds", trace_id))?;
        Ok((bounds.width(), bounds.height()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{ok_output, FakeShell};

    const LAYOUT: &str = r#"{"attributes":{"bounds":"[0,0][1260,2720]","text":""},
        "children":[{"attributes":{"bounds":"[1080,180][1200,250]","type":"Text","text":"跳过"}}]}"#;

    fn driver(shell: FakeShell) -> (Arc<FakeShell>, HdcUiDriver) {
        let shell = Arc::new(shell);
        let driver = HdcUiDriver::new(shell.clone());
        (shell, driver)
    }

    #[test]
    fn swipe_speed_is_distance_over_time() {
        let speed = swipe_speed(Point::new(630, 1904), Point::new(630, 544), Duration::from_millis(300));
        assert_eq!(speed, 4533);
        assert_eq!(
            swipe_speed(Point::new(0, 0), Point::new(0, 10), Duration::from_secs(1)),
            MIN_SWIPE_SPEED
        );
        assert_eq!(
            swipe_speed(Point::new(0, 0), Point::new(0, 10), Duration::ZERO),
            MAX_SWIPE_SPEED
        );
    }

    #[test]
    fn renders_device_commands() {
        let (shell, driver) = driver(FakeShell::new(|_| Ok(ok_output(""))));
        driver.start_app("com.tencent.videohm", "t").expect("start");
        driver.touch(Point::new(1139, 214), "t").expect("touch");
        driver
            .slide(Point::new(630, 1904), Point::new(630, 544), Duration::from_millis(300), "t")
            .expect("slide");
        driver.stop_app("com.tencent.videohm", "t").expect("stop");
        assert_eq!(
            shell.scripts(),
            vec![
                "aa start -b com.tencent.videohm -a EntryAbility",
                "uitest uiInput click 1139 214",
                "uitest uiInput swipe 630 1904 630 544 4533",
                "aa force-stop com.tencent.videohm",
            ]
        );
    }

    #[test]
    fn rejects_unsafe_package() {
        let (shell, driver) = driver(FakeShell::new(|_| Ok(ok_output(""))));
        let err = driver.start_app("pkg; reboot", "t").expect_err("unsafe");
        assert_eq!(err.code, "ERR_VALIDATION");
        assert!(shell.scripts().is_empty());
    }

    #[test]
    fn finds_text_through_layout_dump() {
        let (_shell, driver) = driver(FakeShell::new(|script| {
            if script.starts_with("cat ") {
                Ok(ok_output(LAYOUT))
            } else {
                Ok(ok_output("DumpLayout saved to:/data/local/tmp/pmap_harness_layout.json"))
            }
        }));
        assert_eq!(
            driver.find_by_text("跳过", true, None, "t").expect("find"),
            Some(Point::new(1140, 215))
        );
        assert_eq!(driver.find_by_text("广告", false, None, "t").expect("find"), None);
        assert_eq!(driver.window_size("t").expect("size"), (1260, 2720));
    }

    #[test]
    fn non_zero_exit_is_system_error() {
        let (_shell, driver) = driver(FakeShell::new(|_| {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: "error: ability not found".to_string(),
                exit_code: Some(1),
            })
        }));
        let err = driver.start_app("com.tencent.videohm", "t").expect_err("fail");
        assert_eq!(err.code, "ERR_SYSTEM");
        assert!(err.error.contains("ability not found"));
    }
}
