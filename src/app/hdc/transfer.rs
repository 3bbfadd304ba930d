use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::hdc::runner::RemoteShell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    Finished { size_bytes: Option<u64> },
    Failed { reason: String },
    Unknown,
}

// `hdc file recv` prints "FileTransfer finish, Size:1234, File count = 1, ..." on success and
// "[Fail]<reason>" on failure, usually with exit code 0 either way.
pub fn parse_recv_outcome(output: &str) -> RecvOutcome {
    for raw in output.lines() {
        let line = raw.trim();
        if let Some(reason) = line.strip_prefix("[Fail]") {
            return RecvOutcome::Failed {
                reason: reason.trim().to_string(),
            };
        }
        if line.starts_with("FileTransfer finish") {
            return RecvOutcome::Finished {
                size_bytes: parse_size_field(line),
            };
        }
    }
    RecvOutcome::Unknown
}

fn parse_size_field(line: &str) -> Option<u64> {
    let (_, tail) = line.split_once("Size:")?;
    let digits: String = tail
        .trim_start()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Pulls `remote` into `local`. Failures are logged and reported as `false`.
pub fn recv_best_effort(
    shell: &dyn RemoteShell,
    remote: &str,
    local: &Path,
    timeout: Duration,
    trace_id: &str,
) -> bool {
    let output = match shell.recv_file(remote, local, timeout, trace_id) {
        Ok(output) => output,
        Err(err) => {
            warn!(trace_id = %trace_id, remote = %remote, error = %err, "file recv failed");
            return false;
        }
    };
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    match parse_recv_outcome(&combined) {
        RecvOutcome::Failed { reason } => {
            warn!(trace_id = %trace_id, remote = %remote, reason = %reason, "file recv rejected by device");
            false
        }
        RecvOutcome::Finished { size_bytes } => {
            info!(
                trace_id = %trace_id,
                remote = %remote,
                local = %local.display(),
                size_bytes = ?size_bytes,
                "file received"
            );
            true
        }
        RecvOutcome::Unknown => {
            if output.success() && local.exists() {
                true
            } else {
                warn!(
                    trace_id = %trace_id,
                    remote = %remote,
                    exit_code = ?output.exit_code,
                    "file recv finished without confirmation"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_finish_line_with_size() {
        let out = "FileTransfer finish, Size:20480, File count = 1, time:15ms rate:1365.33kB/s\n";
        assert_eq!(
            parse_recv_outcome(out),
            RecvOutcome::Finished {
                size_bytes: Some(20480)
            }
        );
    }

    #[test]
    fn parses_fail_line() {
        let out = "[Fail]Error opening file: no such file or directory, path:/data/x.log\n";
        match parse_recv_outcome(out) {
            RecvOutcome::Failed { reason } => assert!(reason.contains("no such file")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unrecognized_output_is_unknown() {
        assert_eq!(parse_recv_outcome(""), RecvOutcome::Unknown);
        assert_eq!(parse_recv_outcome("connecting..."), RecvOutcome::Unknown);
    }
}
