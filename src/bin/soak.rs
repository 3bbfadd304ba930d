use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pmap_harness_lib::app::config::{load_config, validate_config};
use pmap_harness_lib::app::hdc::locator::bridge_from_settings;
use pmap_harness_lib::app::hdc::runner::RemoteShell;
use pmap_harness_lib::app::logging::init_logging;
use pmap_harness_lib::app::models::{SeriesStats, SoakSummary};
use pmap_harness_lib::app::pmap::handoff::append_series_block;
use pmap_harness_lib::app::pmap::monitor::MonitorController;
use pmap_harness_lib::app::pmap::probe::PmapProbe;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    package: Option<String>,
    connect_key: Option<String>,
    out: Option<PathBuf>,
    duration_secs: u64,
    interval_ms: u64,
    json: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut package = None;
    let mut connect_key = std::env::var("HDC_CONNECT_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut out = None;
    let mut duration_secs: u64 = 60;
    let mut interval_ms: u64 = 1000;
    let mut json = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--package" => {
                package = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if package.is_none() {
                    return Err("--package requires a value".to_string());
                }
            }
            "--connect-key" => {
                connect_key = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if connect_key.is_none() {
                    return Err("--connect-key requires a value".to_string());
                }
            }
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out = Some(PathBuf::from(value));
            }
            "--duration-secs" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--duration-secs requires a value".to_string())?;
                duration_secs = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| "--duration-secs must be a number".to_string())?;
            }
            "--interval-ms" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--interval-ms requires a value".to_string())?;
                interval_ms = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| "--interval-ms must be a number".to_string())?;
            }
            "--json" => json = true,
            "-h" | "--help" => {
                return Err("Usage: cargo run --bin soak -- [--package NAME] [--connect-key KEY] [--out FILE] [--duration-secs N] [--interval-ms N] [--json]\n".to_string());
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        package,
        connect_key,
        out,
        duration_secs: duration_secs.max(5),
        interval_ms: interval_ms.clamp(100, 10_000),
        json,
    })
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let mut config = match load_config(&trace_id) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };
    if let Some(package) = args.package.clone() {
        config.monitor.package_name = package;
    }
    if let Some(key) = args.connect_key.clone() {
        config.hdc.connect_key = key;
    }
    config.monitor.sample_interval_seconds = args.interval_ms as f64 / 1000.0;
    let config = validate_config(config);
    init_logging(&config.logging.log_level);

    let setup = bridge_from_settings(&config.hdc, &trace_id).and_then(|bridge| {
        let monitor_config = config.monitor_config(&trace_id)?;
        let stop_grace = config.stop_grace(&trace_id)?;
        Ok((bridge, monitor_config, stop_grace))
    });
    let (bridge, monitor_config, stop_grace) = match setup {
        Ok(v) => v,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    let package = monitor_config.package_name.clone();
    let shell: Arc<dyn RemoteShell> = Arc::new(bridge);
    let probe = Arc::new(PmapProbe::new(shell, &package));

    let mut monitor = MonitorController::new(monitor_config, probe, trace_id.clone())
        .with_stop_grace(stop_grace);
    if let Err(err) = monitor.start() {
        eprintln!("{err}");
        std::process::exit(1);
    }
    std::thread::sleep(Duration::from_secs(args.duration_secs));
    let series = monitor.stop();

    if let Some(out) = &args.out {
        if let Some(parent) = out.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = append_series_block(out, &series, &trace_id) {
            eprintln!("{err}");
        }
    }

    let stats = SeriesStats::from(&series);
    let healthy = stats.count > 0 && stats.strictly_increasing;
    let summary = SoakSummary {
        trace_id,
        package: package.to_string(),
        duration_secs: args.duration_secs,
        interval_ms: args.interval_ms,
        expected_samples: args.duration_secs * 1000 / args.interval_ms,
        series: stats,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    } else {
        println!(
            "status: {}\nsamples: {} (expected ~{})\nzero samples: {}\nmean interval ms: {}\nmax gap ms: {}\n",
            if healthy { "pass" } else { "fail" },
            summary.series.count,
            summary.expected_samples,
            summary.series.zero_samples,
            summary
                .series
                .mean_interval_ms
                .map(|v| format!("{v:.1}"))
                .unwrap_or_else(|| "-".to_string()),
            summary
                .series
                .max_gap_ms
                .map(|v| format!("{v:.1}"))
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    if !healthy {
        std::process::exit(1);
    }
}
