use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::app::config::MemdumpSettings;
use crate::app::error::AppError;
use crate::app::hdc::paths::{unique_artifact_path, validate_device_path, PackageName};
use crate::app::hdc::runner::RemoteShell;
use crate::app::hdc::transfer::recv_best_effort;

const SHELL_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_TIMEOUT: Duration = Duration::from_secs(120);

/// Values the app polls from its control file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    Reset,
    TriggerDump,
}

impl ControlFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlFlag::Reset => "0",
            ControlFlag::TriggerDump => "1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemdumpFetch {
    pub local_path: PathBuf,
    pub received: bool,
}

fn remote_file(
    settings: &MemdumpSettings,
    package: &PackageName,
    file: &str,
    trace_id: &str,
) -> Result<String, AppError> {
    let path = format!("{}/{}", settings.remote_dir(package), file);
    validate_device_path(&path).map_err(|message| AppError::validation(message, trace_id))?;
    Ok(path)
}

pub fn control_file_path(settings: &MemdumpSettings, package: &PackageName, trace_id: &str) -> Result<String, AppError> {
    remote_file(settings, package, &settings.control_file, trace_id)
}

pub fn dump_file_path(settings: &MemdumpSettings, package: &PackageName, trace_id: &str) -> Result<String, AppError> {
    remote_file(settings, package, &settings.dump_file, trace_id)
}

/// Writes `flag` into the app's control file. Returns whether the write succeeded.
pub fn write_control_flag(
    shell: &dyn RemoteShell,
    settings: &MemdumpSettings,
    package: &PackageName,
    flag: ControlFlag,
    trace_id: &str,
) -> bool {
    let path = match control_file_path(settings, package, trace_id) {
        Ok(path) => path,
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "invalid control file path");
            return false;
        }
    };
    let script = format!("echo \"{}\" > {path}", flag.as_str());
    match shell.run(&script, SHELL_TIMEOUT, trace_id) {
        Ok(output) if output.success() => {
            info!(trace_id = %trace_id, flag = ?flag, "control flag written");
            true
        }
        Ok(output) => {
            warn!(
                trace_id = %trace_id,
                flag = ?flag,
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "control flag write failed"
            );
            false
        }
        Err(err) => {
            warn!(trace_id = %trace_id, flag = ?flag, error = %err, "control flag write failed");
            false
        }
    }
}

/// Pulls the app's memdump file into a fresh local artifact under `local_dir`.
pub fn fetch_memdump(
    shell: &dyn RemoteShell,
    settings: &MemdumpSettings,
    package: &PackageName,
    local_dir: &Path,
    case_name: &str,
    trace_id: &str,
) -> Result<MemdumpFetch, AppError> {
    let remote = dump_file_path(settings, package, trace_id)?;
    let local_path = unique_artifact_path(local_dir, case_name, "memdump", "log").map_err(|err| {
        AppError::system(
            format!("Failed to prepare {}: {err}", local_dir.display()),
            trace_id,
        )
    })?;
    let received = recv_best_effort(shell, &remote, &local_path, RECV_TIMEOUT, trace_id);
    Ok(MemdumpFetch {
        local_path,
        received,
    })
}
