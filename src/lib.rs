pub mod app;

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use app::config::{
    backup_path_for, load_config, load_config_from_path, save_config, save_config_to_path,
    validate_config, HarnessConfig,
};
use app::error::AppError;
use app::hdc::locator::bridge_from_settings;
use app::hdc::runner::RemoteShell;
use app::logging::init_logging;
use app::models::SessionSummary;
use app::pmap::probe::PmapProbe;
use app::session::TestSession;
use app::ui::driver::HdcUiDriver;

const USAGE: &str = "Usage: pmap_harness [--config PATH] [--package NAME] [--interval SECONDS] \
[--swipes N] [--case NAME] [--connect-key KEY] [--memdump|--no-memdump] [--profiler|--no-profiler] \
[--save-config] [--json]\n";

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub package: Option<String>,
    pub interval_seconds: Option<f64>,
    pub swipes: u32,
    pub case_name: String,
    pub connect_key: Option<String>,
    pub memdump: Option<bool>,
    pub profiler: Option<bool>,
    pub save_config: bool,
    pub json: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            config_path: None,
            package: None,
            interval_seconds: None,
            swipes: 20,
            case_name: "TencentVideoHome".to_string(),
            connect_key: None,
            memdump: None,
            profiler: None,
            save_config: false,
            json: false,
        }
    }
}

impl CliArgs {
    /// Command-line values win over the config file.
    pub fn apply(&self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(package) = &self.package {
            config.monitor.package_name = package.clone();
        }
        if let Some(interval) = self.interval_seconds {
            config.monitor.sample_interval_seconds = interval;
        }
        if let Some(key) = &self.connect_key {
            config.hdc.connect_key = key.clone();
        }
        if let Some(enabled) = self.memdump {
            config.memdump.enabled = enabled;
        }
        if let Some(enabled) = self.profiler {
            config.profiler.enabled = enabled;
        }
        validate_config(config)
    }

    /// Writes the effective config back to `--config` or the default path, keeping a backup.
    pub fn persist(&self, config: &HarnessConfig, trace_id: &str) -> Result<(), AppError> {
        match &self.config_path {
            Some(path) => save_config_to_path(config, path, &backup_path_for(path), trace_id),
            None => save_config(config, trace_id),
        }
    }
}

fn take_value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    it.next()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("{flag} requires a value"))
}

pub fn parse_cli_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => parsed.config_path = Some(PathBuf::from(take_value(&mut it, "--config")?)),
            "--package" => parsed.package = Some(take_value(&mut it, "--package")?),
            "--interval" => {
                let value = take_value(&mut it, "--interval")?;
                parsed.interval_seconds = Some(
                    value
                        .parse::<f64>()
                        .map_err(|_| "--interval must be a number of seconds".to_string())?,
                );
            }
            "--swipes" => {
                let value = take_value(&mut it, "--swipes")?;
                parsed.swipes = value
                    .parse::<u32>()
                    .map_err(|_| "--swipes must be a number".to_string())?;
            }
            "--case" => parsed.case_name = take_value(&mut it, "--case")?,
            "--connect-key" | "-t" => parsed.connect_key = Some(take_value(&mut it, "--connect-key")?),
            "--memdump" => parsed.memdump = Some(true),
            "--no-memdump" => parsed.memdump = Some(false),
            "--profiler" => parsed.profiler = Some(true),
            "--no-profiler" => parsed.profiler = Some(false),
            "--save-config" => parsed.save_config = true,
            "--json" => parsed.json = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("Unknown arg: {other}\n{USAGE}")),
        }
    }
    Ok(parsed)
}

/// Runs one home-swipe session end to end.
pub fn run_session(args: &CliArgs, config: &HarnessConfig, trace_id: &str) -> Result<SessionSummary, AppError> {
    let bridge = Arc::new(bridge_from_settings(&config.hdc, trace_id)?);
    let shell: Arc<dyn RemoteShell> = bridge;
    let package = config.package_name(trace_id)?;
    let probe = Arc::new(PmapProbe::new(Arc::clone(&shell), &package));
    let driver = Arc::new(HdcUiDriver::new(Arc::clone(&shell)));

    let mut session = TestSession::new(config, &args.case_name, shell, driver, probe, trace_id)?;
    session.setup();
    let outcome = session
        .launch_with_monitor()
        .and_then(|()| session.run_home_swipe(args.swipes));
    let summary = session.teardown();
    outcome.map(|()| summary)
}

pub fn run() {
    let args = match parse_cli_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let loaded = match &args.config_path {
        Some(path) => load_config_from_path(path, &trace_id),
        None => load_config(&trace_id),
    };
    let config = match loaded {
        Ok(config) => args.apply(config),
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.log_level);

    if args.save_config {
        if let Err(err) = args.persist(&config, &trace_id) {
            eprintln!("Failed to save config: {err}");
            std::process::exit(1);
        }
    }

    match run_session(&args, &config, &trace_id) {
        Ok(summary) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
            } else {
                println!(
                    "case: {}\nsamples: {}\nzero samples: {}\nswipes: {}\nmemdump: {}\n",
                    summary.case_name,
                    summary.series.count,
                    summary.series.zero_samples,
                    summary.swipes,
                    summary.memdump_path.as_deref().unwrap_or("-"),
                );
            }
        }
        Err(err) => {
            eprintln!("{err} [trace_id={}]", err.trace_id);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_without_flags() {
        let parsed = parse_cli_args(Vec::new()).expect("parse");
        assert_eq!(parsed, CliArgs::default());
        assert_eq!(parsed.swipes, 20);
    }

    #[test]
    fn parses_overrides() {
        let parsed = parse_cli_args(args(&[
            "--package",
            "com.example.app",
            "--interval",
            "0.5",
            "--swipes",
            "6",
            "-t",
            "FMR0223",
            "--no-memdump",
            "--profiler",
            "--json",
        ]))
        .expect("parse");
        assert_eq!(parsed.package.as_deref(), Some("com.example.app"));
        assert_eq!(parsed.interval_seconds, Some(0.5));
        assert_eq!(parsed.swipes, 6);
        assert_eq!(parsed.connect_key.as_deref(), Some("FMR0223"));
        assert_eq!(parsed.memdump, Some(false));
        assert_eq!(parsed.profiler, Some(true));
        assert!(parsed.json);

        let config = parsed.apply(HarnessConfig::default());
        assert_eq!(config.monitor.package_name, "com.example.app");
        assert_eq!(config.monitor.sample_interval_seconds, 0.5);
        assert!(!config.memdump.enabled);
        assert!(config.profiler.enabled);
        assert_eq!(config.hdc.connect_key, "FMR0223");
    }

    #[test]
    fn huge_interval_flag_is_clamped() {
        let parsed = parse_cli_args(args(&["--interval", "1e20"])).expect("parse");
        let config = parsed.apply(HarnessConfig::default());
        assert_eq!(config.monitor.sample_interval_seconds, 86_400.0);
        assert!(config.monitor_config("t").expect("monitor").interval().is_some());
    }

    #[test]
    fn save_config_flag_persists_effective_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("harness.json");
        let path_arg = path.display().to_string();
        let parsed = parse_cli_args(args(&[
            "--config",
            &path_arg,
            "--interval",
            "0.25",
            "--save-config",
        ]))
        .expect("parse");
        assert!(parsed.save_config);

        let config = parsed.apply(HarnessConfig::default());
        parsed.persist(&config, "t").expect("first save");
        parsed.persist(&config, "t").expect("second save");

        let loaded = load_config_from_path(&path, "t").expect("load");
        assert_eq!(loaded, config);
        assert!(backup_path_for(&path).exists());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_cli_args(args(&["--swipes", "many"])).is_err());
        assert!(parse_cli_args(args(&["--package"])).is_err());
        assert!(parse_cli_args(args(&["--bogus"])).unwrap_err().contains("Unknown arg"));
    }
}
