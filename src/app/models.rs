use serde::{Deserialize, Serialize};

use crate::app::pmap::series::SampleSeries;

/// Cadence figures for one frozen series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesStats {
    pub count: usize,
    pub zero_samples: usize,
    pub mean_interval_ms: Option<f64>,
    pub max_gap_ms: Option<f64>,
    pub strictly_increasing: bool,
    pub peak_resident_kb: u64,
}

impl From<&SampleSeries> for SeriesStats {
    fn from(series: &SampleSeries) -> Self {
        let records = series.records();
        let gaps = records
            .windows(2)
            .map(|pair| pair[1].timestamp_us - pair[0].timestamp_us);
        Self {
            count: series.len(),
            zero_samples: series.zero_count(),
            mean_interval_ms: series.mean_interval_us().map(|us| us / 1000.0),
            max_gap_ms: gaps.clone().max().map(|us| us as f64 / 1000.0),
            strictly_increasing: gaps.into_iter().all(|gap| gap > 0),
            peak_resident_kb: records.iter().map(|r| r.resident_kb).max().unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub trace_id: String,
    pub case_name: String,
    pub package: String,
    pub version_code: u64,
    pub swipes: u32,
    pub skip_ad_strategy: Option<String>,
    pub series: SeriesStats,
    pub memdump_path: Option<String>,
    pub memdump_received: bool,
    pub samples_appended: bool,
    pub profiler_htrace: Option<String>,
    pub profiler_hidumper: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SoakSummary {
    pub trace_id: String,
    pub package: String,
    pub duration_secs: u64,
    pub interval_ms: u64,
    pub expected_samples: u64,
    pub series: SeriesStats,
}
