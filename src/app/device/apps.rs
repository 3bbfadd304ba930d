use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::app::hdc::paths::PackageName;
use crate::app::hdc::runner::RemoteShell;

const SHELL_TIMEOUT: Duration = Duration::from_secs(10);

fn version_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""versionCode"\s*:\s*(\d+)"#).expect("versionCode regex"))
}

/// Reads the last `"versionCode": N` entry of `bm dump -n <bundle>` output; 0 when absent.
pub fn parse_version_code(output: &str) -> u64 {
    version_code_re()
        .captures_iter(output)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .last()
        .unwrap_or(0)
}

pub fn query_version_code(shell: &dyn RemoteShell, package: &PackageName, trace_id: &str) -> u64 {
    let script = format!("bm dump -n {package} | grep versionCode");
    match shell.run(&script, SHELL_TIMEOUT, trace_id) {
        Ok(output) => parse_version_code(&output.stdout),
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "failed to query version code");
            0
        }
    }
}

pub fn force_stop_script(package: &PackageName) -> String {
    format!("aa force-stop {package}")
}

pub fn kill_script(package: &PackageName) -> String {
    format!("kill -9 $(pidof {package}) 2>/dev/null || true")
}

/// Stops the app and kills any leftover process, pausing `settle` after each step.
/// Each step is best-effort.
pub fn force_stop_app(shell: &dyn RemoteShell, package: &PackageName, settle: Duration, trace_id: &str) {
    for script in [force_stop_script(package), kill_script(package)] {
        match shell.run(&script, SHELL_TIMEOUT, trace_id) {
            Ok(output) if output.success() => debug!(trace_id = %trace_id, script = %script, "ok"),
            Ok(output) => debug!(
                trace_id = %trace_id,
                script = %script,
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "non-zero exit ignored"
            ),
            Err(err) => warn!(trace_id = %trace_id, script = %script, error = %err, "stop step failed"),
        }
        if !settle.is_zero() {
            thread::sleep(settle);
        }
    }
    info!(trace_id = %trace_id, package = %package, "app force-stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::error::AppError;
    use crate::app::testing::{ok_output, FakeShell};

    fn package() -> PackageName {
        PackageName::parse("com.tencent.videohm").expect("package")
    }

    #[test]
    fn parses_last_version_code() {
        let out = "    \"versionCode\": 8830,\n        \"versionCode\": 8831,\n";
        assert_eq!(parse_version_code(out), 8831);
        assert_eq!(parse_version_code("\"versionCode\":42"), 42);
    }

    #[test]
    fn missing_version_code_is_zero() {
        assert_eq!(parse_version_code(""), 0);
        assert_eq!(parse_version_code("error: bundle not found"), 0);
    }

    #[test]
    fn query_version_code_degrades_to_zero_on_error() {
        let shell = FakeShell::new(|_| Err(AppError::timeout("timed out", "t")));
        assert_eq!(query_version_code(&shell, &package(), "t"), 0);

        let shell = FakeShell::new(|_| Ok(ok_output("\"versionCode\": 1203,\n")));
        assert_eq!(query_version_code(&shell, &package(), "t"), 1203);
        assert_eq!(
            shell.scripts(),
            vec!["bm dump -n com.tencent.videohm | grep versionCode"]
        );
    }

    #[test]
    fn force_stop_runs_both_steps_even_when_first_fails() {
        let shell = FakeShell::new(|script| {
            if script.starts_with("aa ") {
                Err(AppError::system("device offline", "t"))
            } else {
                Ok(ok_output(""))
            }
        });
        force_stop_app(&shell, &package(), Duration::ZERO, "t");
        assert_eq!(
            shell.scripts(),
            vec![
                "aa force-stop com.tencent.videohm".to_string(),
                "kill -9 $(pidof com.tencent.videohm) 2>/dev/null || true".to_string(),
            ]
        );
    }
}
