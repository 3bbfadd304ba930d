use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::error::AppError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Synchronous remote command execution over the debug bridge.
pub trait RemoteShell: Send + Sync {
    /// Runs `script` in the device shell, killing it once `timeout` elapses.
    fn run(&self, script: &str, timeout: Duration, trace_id: &str) -> Result<CommandOutput, AppError>;

    /// Copies `remote` from the device to `local`.
    fn recv_file(
        &self,
        remote: &str,
        local: &Path,
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError>;

    /// Starts `script` in the device shell without waiting for it.
    fn spawn_detached(&self, script: &str, trace_id: &str) -> Result<(), AppError>;
}

pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| AppError::dependency(format!("Failed to spawn {program}: {err}"), trace_id))?;

    // Drain both pipes on their own threads so a chatty child cannot fill the pipe buffer and
    // stall until the timeout.
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;

    let stdout_handle = std::thread::spawn(move || drain(stdout));
    let stderr_handle = std::thread::spawn(move || drain(stderr));

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    // A grandchild may still hold the pipes open; leave the drain threads detached.
                    drop(stdout_handle);
                    drop(stderr_handle);
                    return Err(AppError::timeout(
                        format!("Command timed out after {:.3}s", timeout.as_secs_f64()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

fn drain(mut reader: impl Read) -> Vec<u8> {
    let mut buffer = Vec::<u8>::new();
    let mut temp = [0u8; 4096];
    loop {
        match reader.read(&mut temp) {
            Ok(0) => break,
            Ok(count) => buffer.extend_from_slice(&temp[..count]),
            Err(_) => break,
        }
    }
    buffer
}

/// `hdc` client bound to one device (or the only connected one when `connect_key` is unset).
#[derive(Debug, Clone)]
pub struct HdcBridge {
    program: String,
    connect_key: Option<String>,
}

impl HdcBridge {
    pub fn new(program: impl Into<String>, connect_key: Option<String>) -> Self {
        Self {
            program: program.into(),
            connect_key: connect_key.filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn target_args(&self) -> Vec<String> {
        match &self.connect_key {
            Some(key) => vec!["-t".to_string(), key.clone()],
            None => Vec::new(),
        }
    }

    pub fn shell_args(&self, script: &str) -> Vec<String> {
        let mut args = self.target_args();
        args.push("shell".to_string());
        args.push(script.to_string());
        args
    }

    pub fn recv_args(&self, remote: &str, local: &Path) -> Vec<String> {
        let mut args = self.target_args();
        args.push("file".to_string());
        args.push("recv".to_string());
        args.push(remote.to_string());
        args.push(local.to_string_lossy().to_string());
        args
    }
}

impl RemoteShell for HdcBridge {
    fn run(&self, script: &str, timeout: Duration, trace_id: &str) -> Result<CommandOutput, AppError> {
        debug!(trace_id = %trace_id, script = %script, "hdc shell");
        run_command_with_timeout(&self.program, &self.shell_args(script), timeout, trace_id)
    }

    fn recv_file(
        &self,
        remote: &str,
        local: &Path,
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        debug!(trace_id = %trace_id, remote = %remote, local = %local.display(), "hdc file recv");
        run_command_with_timeout(&self.program, &self.recv_args(remote, local), timeout, trace_id)
    }

    fn spawn_detached(&self, script: &str, trace_id: &str) -> Result<(), AppError> {
        let mut child = Command::new(&self.program)
            .args(self.shell_args(script))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                AppError::dependency(format!("Failed to spawn {}: {err}", self.program), trace_id)
            })?;
        let trace_reaper = trace_id.to_string();
        std::thread::Builder::new()
            .name("hdc-detached".to_string())
            .spawn(move || {
                if let Err(err) = child.wait() {
                    warn!(trace_id = %trace_reaper, error = %err, "detached hdc command failed");
                }
            })
            .map_err(|err| AppError::system(format!("Failed to spawn reaper: {err}"), trace_id))?;
        Ok(())
    }
}
