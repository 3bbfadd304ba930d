use std::sync::Arc;
use std::time::Duration;

use crate::app::error::AppError;
use crate::app::hdc::paths::PackageName;
use crate::app::hdc::runner::RemoteShell;

/// Memory-map label of the managed runtime's anonymous heap regions.
pub const REGION_LABEL: &str = "anon:Kotlin";

// Runs entirely on the device and prints exactly one "<virtual_kb> <resident_kb>" line.
// `pmap -x` rows are "<address> <kbytes> <rss> <dirty> <mode> <mapping>".
const PROBE_TEMPLATE: &str = concat!(
    "pid=$(pidof {package}); pid=${pid%% *}; ",
    "if [ -n \"$pid\" ]; then ",
    "pmap -x \"$pid\" 2>/dev/null | grep \"{label}\" | ",
    "{ v=0; r=0; while read addr kb rss rest; do ",
    "case \"$kb$rss\" in ''|*[!0-9]*) ;; *) v=$((v + kb)); r=$((r + rss));; esac; ",
    "done; echo \"$v $r\"; }; ",
    "else echo \"0 0\"; fi"
);

pub fn build_probe_script(package: &PackageName) -> String {
    PROBE_TEMPLATE
        .replace("{package}", package.as_str())
        .replace("{label}", REGION_LABEL)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("probe exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("probe produced no output")]
    EmptyOutput,

    #[error("bridge error: {0}")]
    Bridge(String),
}

/// One blocking memory measurement, bounded by `timeout`. Returns the trimmed stdout line.
pub trait SampleProbe: Send + Sync {
    fn sample(&self, timeout: Duration, trace_id: &str) -> Result<String, ProbeError>;
}

pub struct PmapProbe {
    shell: Arc<dyn RemoteShell>,
    script: String,
}

impl PmapProbe {
    pub fn new(shell: Arc<dyn RemoteShell>, package: &PackageName) -> Self {
        Self {
            shell,
            script: build_probe_script(package),
        }
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

impl SampleProbe for PmapProbe {
    fn sample(&self, timeout: Duration, trace_id: &str) -> Result<String, ProbeError> {
        let output = self
            .shell
            .run(&self.script, timeout, trace_id)
            .map_err(|err| map_bridge_error(err, timeout))?;
        if !output.success() {
            return Err(ProbeError::NonZeroExit {
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        let line = output.stdout.trim();
        if line.is_empty() {
            return Err(ProbeError::EmptyOutput);
        }
        Ok(line.to_string())
    }
}

fn map_bridge_error(err: AppError, timeout: Duration) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout { after: timeout }
    } else {
        ProbeError::Bridge(err.error)
    }
}
