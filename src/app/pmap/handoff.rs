use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::pmap::series::SampleSeries;

pub const BANNER_WIDTH: usize = 80;
pub const SECTION_TITLE: &str = "Pmap采样数据 (anon:Kotlin内存信息，单位: kB)";
pub const SECTION_HEADER: &str = "时间戳,虚拟内存(kB),物理内存(kB)";

pub fn render_series_block(series: &SampleSeries) -> String {
    let banner = "=".repeat(BANNER_WIDTH);
    let mut block = String::with_capacity(256 + series.len() * 32);
    block.push('\n');
    let _ = writeln!(block, "{banner}");
    let _ = writeln!(block, "{SECTION_TITLE}");
    let _ = writeln!(block, "{banner}");
    let _ = writeln!(block, "{SECTION_HEADER}");
    for record in series.iter() {
        let _ = writeln!(
            block,
            "{},{},{}",
            record.timestamp_us, record.virtual_kb, record.resident_kb
        );
    }
    let _ = writeln!(block, "{banner}");
    block
}

/// Appends the delimited sample block to `path`. Returns `Ok(false)` for an empty series.
pub fn append_series_block(path: &Path, series: &SampleSeries, trace_id: &str) -> Result<bool, AppError> {
    if series.is_empty() {
        return Ok(false);
    }
    let block = render_series_block(series);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| {
            AppError::system(
                format!("Failed to open {} for append: {err}", path.display()),
                trace_id,
            )
        })?;
    file.write_all(block.as_bytes()).map_err(|err| {
        AppError::system(
            format!("Failed to append samples to {}: {err}", path.display()),
            trace_id,
        )
    })?;
    file.flush()
        .map_err(|err| AppError::system(format!("Failed to flush {}: {err}", path.display()), trace_id))?;
    Ok(true)
}

/// Teardown entry point: never fails, only logs. Returns whether a block was written.
pub fn persist_series(path: &Path, series: &SampleSeries, trace_id: &str) -> bool {
    match append_series_block(path, series, trace_id) {
        Ok(true) => {
            info!(
                trace_id = %trace_id,
                count = series.len(),
                path = %path.display(),
                "pmap samples appended to memdump artifact"
            );
            true
        }
        Ok(false) => {
            info!(trace_id = %trace_id, "no pmap samples to append");
            false
        }
        Err(err) => {
            warn!(
                trace_id = %trace_id,
                path = %path.display(),
                error = %err,
                "failed to append pmap samples"
            );
            false
        }
    }
}
