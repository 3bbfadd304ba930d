use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;
use crate::app::hdc::paths::{validate_device_path, PackageName};
use crate::app::pmap::monitor::MonitorConfig;

pub const DEFAULT_PACKAGE: &str = "com.tencent.videohm";
const CONFIG_ENV: &str = "PMAP_HARNESS_CONFIG_PATH";
/// Upper bound for every seconds-valued setting (one day).
const MAX_SECONDS: f64 = 86_400.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HdcSettings {
    pub command_path: String,
    pub connect_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    pub package_name: String,
    pub sample_interval_seconds: f64,
    pub probe_timeout_seconds: Option<f64>,
    pub stop_grace_seconds: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            package_name: DEFAULT_PACKAGE.to_string(),
            sample_interval_seconds: 1.0,
            probe_timeout_seconds: None,
            stop_grace_seconds: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemdumpSettings {
    pub enabled: bool,
    pub remote_dir_template: String,
    pub dump_file: String,
    pub control_file: String,
}

impl Default for MemdumpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            remote_dir_template: "/data/app/el2/100/base/{package}/files".to_string(),
            dump_file: "memdump.log".to_string(),
            control_file: "control.log".to_string(),
        }
    }
}

impl MemdumpSettings {
    pub fn remote_dir(&self, package: &PackageName) -> String {
        self.remote_dir_template
            .replace("{package}", package.as_str())
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfilerSettings {
    pub enabled: bool,
    pub remote_trace_path: String,
    pub duration_seconds: u32,
    pub wait_timeout_seconds: u64,
    pub settle_seconds: u64,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            remote_trace_path: "/data/local/tmp/hiprofiler_data.htrace".to_string(),
            duration_seconds: 60,
            wait_timeout_seconds: 60,
            settle_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    pub dump_dir: String,
    pub profiler_dir: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dump_dir: "dump_output".to_string(),
            profiler_dir: "hiperf_output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub hdc: HdcSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub memdump: MemdumpSettings,
    #[serde(default)]
    pub profiler: ProfilerSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl HarnessConfig {
    pub fn package_name(&self, trace_id: &str) -> Result<PackageName, AppError> {
        PackageName::parse(&self.monitor.package_name)
            .map_err(|message| AppError::validation(message, trace_id))
    }

    pub fn monitor_config(&self, trace_id: &str) -> Result<MonitorConfig, AppError> {
        let mut config = MonitorConfig::new(
            self.package_name(trace_id)?,
            self.monitor.sample_interval_seconds,
        );
        if let Some(timeout) = self.monitor.probe_timeout_seconds {
            config = config.with_probe_timeout(timeout);
        }
        Ok(config)
    }

    pub fn stop_grace(&self, trace_id: &str) -> Result<Duration, AppError> {
        Duration::try_from_secs_f64(self.monitor.stop_grace_seconds).map_err(|err| {
            AppError::validation(
                format!(
                    "Invalid stop_grace_seconds {}: {err}",
                    self.monitor.stop_grace_seconds
                ),
                trace_id,
            )
        })
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pmap_harness_config.json")
}

pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "config".to_string());
    name.push_str(".backup.json");
    path.with_file_name(name)
}

pub fn load_config(trace_id: &str) -> Result<HarnessConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &HarnessConfig, trace_id: &str) -> Result<(), AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_path_for(&path), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<HarnessConfig, AppError> {
    if !path.exists() {
        return Ok(HarnessConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: HarnessConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &HarnessConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

pub fn validate_config(mut config: HarnessConfig) -> HarnessConfig {
    if PackageName::parse(&config.monitor.package_name).is_err() {
        config.monitor.package_name = DEFAULT_PACKAGE.to_string();
    }
    if !config.monitor.sample_interval_seconds.is_finite() {
        config.monitor.sample_interval_seconds = 0.0;
    }
    config.monitor.sample_interval_seconds = config.monitor.sample_interval_seconds.min(MAX_SECONDS);
    if let Some(timeout) = config.monitor.probe_timeout_seconds {
        config.monitor.probe_timeout_seconds =
            (timeout.is_finite() && timeout > 0.0).then(|| timeout.min(MAX_SECONDS));
    }
    if !config.monitor.stop_grace_seconds.is_finite() || config.monitor.stop_grace_seconds <= 0.0 {
        config.monitor.stop_grace_seconds = 5.0;
    }
    config.monitor.stop_grace_seconds = config.monitor.stop_grace_seconds.min(MAX_SECONDS);
    if config.memdump.dump_file.trim().is_empty() || config.memdump.dump_file.contains('/') {
        config.memdump.dump_file = "memdump.log".to_string();
    }
    if config.memdump.control_file.trim().is_empty() || config.memdump.control_file.contains('/') {
        config.memdump.control_file = "control.log".to_string();
    }
    if validate_device_path(&config.profiler.remote_trace_path).is_err() {
        config.profiler.remote_trace_path = ProfilerSettings::default().remote_trace_path;
    }
    if config.profiler.duration_seconds == 0 {
        config.profiler.duration_seconds = 60;
    }
    if config.output.dump_dir.trim().is_empty() {
        config.output.dump_dir = "dump_output".to_string();
    }
    if config.output.profiler_dir.trim().is_empty() {
        config.output.profiler_dir = "hiperf_output".to_string();
    }
    config
}
