use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::app::config::ProfilerSettings;
use crate::app::error::AppError;
use crate::app::hdc::paths::{unique_artifact_path, validate_device_path, PackageName};
use crate::app::hdc::runner::RemoteShell;
use crate::app::hdc::transfer::recv_best_effort;

const SHELL_TIMEOUT: Duration = Duration::from_secs(10);
const HIDUMPER_TIMEOUT: Duration = Duration::from_secs(60);
const RECV_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Renders the `hiprofiler_cmd` invocation for a nativehook capture of `package`.
pub fn build_profiler_command(settings: &ProfilerSettings, package: &PackageName) -> String {
    let mut cmd = String::with_capacity(768);
    cmd.push_str("hiprofiler_cmd -c - -o ");
    cmd.push_str(&settings.remote_trace_path);
    cmd.push_str(&format!(" -t {} -s -k <<CONFIG\n", settings.duration_seconds));
    cmd.push_str(concat!(
        " request_id: 1\n",
        " session_config {\n",
        "  buffers {\n",
        "   pages: 131072\n",
        "  }\n",
        " }\n",
        " plugin_configs {\n",
        "  plugin_name: \"nativehook\"\n",
        "  sample_interval: 5000\n",
        "  config_data {\n",
        "   save_file: false\n",
        "   smb_pages: 16384\n",
        "   max_stack_depth: 20\n",
    ));
    cmd.push_str(&format!("   process_name: \"{package}\"\n"));
    cmd.push_str(concat!(
        "   string_compressed: true\n",
        "   fp_unwind: true\n",
        "   blocked: true\n",
        "   callframe_compress: true\n",
        "   record_accurately: true\n",
        "   offline_symbolization: true\n",
        "   statistics_interval: 1\n",
        "   startup_mode: true\n",
        "  }\n",
        " }\n",
        "CONFIG",
    ));
    cmd
}

fn checked_trace_path<'a>(settings: &'a ProfilerSettings, trace_id: &str) -> Result<&'a str, AppError> {
    validate_device_path(&settings.remote_trace_path)
        .map_err(|message| AppError::validation(message, trace_id))?;
    Ok(&settings.remote_trace_path)
}

/// Clears any previous trace and launches the capture without waiting for it.
pub fn start_profiler(
    shell: &dyn RemoteShell,
    settings: &ProfilerSettings,
    package: &PackageName,
    trace_id: &str,
) -> Result<(), AppError> {
    let remote = checked_trace_path(settings, trace_id)?;
    if let Err(err) = shell.run(&format!("rm -f {remote}"), SHELL_TIMEOUT, trace_id) {
        warn!(trace_id = %trace_id, error = %err, "failed to clear previous trace");
    }
    shell.spawn_detached(&build_profiler_command(settings, package), trace_id)?;
    info!(
        trace_id = %trace_id,
        package = %package,
        duration_seconds = settings.duration_seconds,
        "hiprofiler started"
    );
    Ok(())
}

fn remote_file_exists(shell: &dyn RemoteShell, remote: &str, trace_id: &str) -> bool {
    let script = format!("test -f {remote} && echo exists || echo not_exists");
    match shell.run(&script, SHELL_TIMEOUT, trace_id) {
        Ok(output) => output.stdout.lines().any(|line| line.trim() == "exists"),
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "remote file check failed");
            false
        }
    }
}

/// Polls until `remote` exists on the device. Checks at least once.
pub fn wait_for_remote_file(
    shell: &dyn RemoteShell,
    remote: &str,
    timeout: Duration,
    poll: Duration,
    trace_id: &str,
) -> bool {
    let started = Instant::now();
    loop {
        if remote_file_exists(shell, remote, trace_id) {
            return true;
        }
        if started.elapsed() + poll > timeout {
            return false;
        }
        thread::sleep(poll);
    }
}

pub fn render_hidumper_report(stdout: &str, stderr: &str) -> String {
    let mut report = stdout.to_string();
    if !stderr.is_empty() {
        report.push_str("\n--- stderr ---\n");
        report.push_str(stderr);
    }
    report
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilerExport {
    pub trace_ready: bool,
    pub htrace_path: Option<PathBuf>,
    pub hidumper_path: Option<PathBuf>,
}

/// Waits for the capture, snapshots `hidumper --mem`, then pulls the trace.
pub fn export_profiler_artifacts(
    shell: &dyn RemoteShell,
    settings: &ProfilerSettings,
    package: &PackageName,
    local_dir: &Path,
    case_name: &str,
    trace_id: &str,
) -> Result<ProfilerExport, AppError> {
    let remote = checked_trace_path(settings, trace_id)?;
    let wait = Duration::from_secs(settings.wait_timeout_seconds);
    if !wait_for_remote_file(shell, remote, wait, POLL_INTERVAL, trace_id) {
        warn!(trace_id = %trace_id, remote = %remote, "trace file never appeared, skipping export");
        return Ok(ProfilerExport::default());
    }

    let (stdout, stderr) = match shell.run(
        &format!("hidumper --mem $(pidof {package})"),
        HIDUMPER_TIMEOUT,
        trace_id,
    ) {
        Ok(output) => (output.stdout, output.stderr),
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "hidumper capture failed");
            (String::new(), err.error)
        }
    };

    if settings.settle_seconds > 0 {
        thread::sleep(Duration::from_secs(settings.settle_seconds));
    }

    let prepare_err = |err: std::io::Error| {
        AppError::system(
            format!("Failed to prepare {}: {err}", local_dir.display()),
            trace_id,
        )
    };
    let htrace_path = unique_artifact_path(local_dir, case_name, "profiler", "htrace").map_err(prepare_err)?;
    let received = recv_best_effort(shell, remote, &htrace_path, RECV_TIMEOUT, trace_id);

    let hidumper_path =
        unique_artifact_path(local_dir, case_name, "profiler", "hidumper.txt").map_err(prepare_err)?;
    fs::write(&hidumper_path, render_hidumper_report(&stdout, &stderr)).map_err(|err| {
        AppError::system(
            format!("Failed to write {}: {err}", hidumper_path.display()),
            trace_id,
        )
    })?;
    info!(
        trace_id = %trace_id,
        htrace = %htrace_path.display(),
        hidumper = %hidumper_path.display(),
        received,
        "profiler artifacts exported"
    );

    Ok(ProfilerExport {
        trace_ready: true,
        htrace_path: received.then_some(htrace_path),
        hidumper_path: Some(hidumper_path),
    })
}
