use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

use pose_estimator_rs::estimator::{Estimator, EstimatorConfig, EstimatorEvent};
use pose_estimator_rs::types::{ImuSample, PoseSample};

#[derive(Parser, Debug)]
struct Args {
    /// Path to session_*.json[.gz] log
    #[arg(long, conflicts_with = "session_dir")]
    log: Option<PathBuf>,

    /// Directory of session logs to batch replay (processes session_*.json[.gz])
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Initial covariance scale (P0 = scale * I)
    #[arg(long, default_value = "10.0")]
    initial_cov_scale: f64,

    /// Mocap measurement noise std [m]
    #[arg(long, default_value = "0.1")]
    meas_noise_std: f64,

    /// Process noise std per predict [m]
    #[arg(long, default_value = "0.0")]
    process_noise_std: f64,
}

#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    imu: Option<ImuSample>,
    pose: Option<PoseSample>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn rmse_pairs(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::INFINITY;
    }
    let sum_sq: f64 = pairs.iter().map(|(a, b)| (a - b).powi(2)).sum();
    (sum_sq / pairs.len() as f64).sqrt()
}

fn run_once(path: &Path, args: &Args) -> anyhow::Result<serde_json::Value> {
    let log = load_log(path)?;
    let config = EstimatorConfig {
        initial_cov_scale: args.initial_cov_scale,
        meas_noise_std: args.meas_noise_std,
        process_noise_std: args.process_noise_std,
        ..EstimatorConfig::default()
    };
    let mut estimator = Estimator::new(config)
        .map_err(|e| anyhow::anyhow!("estimator construction failed: {}", e))?;

    // Pair the prior estimate with each incoming mocap position so the
    // innovation magnitude over the session is visible after tuning runs
    let mut paired_x = Vec::new();
    let mut paired_y = Vec::new();
    let mut paired_z = Vec::new();
    let mut rejected = 0u64;

    for r in &log.readings {
        if let Some(imu) = r.imu.as_ref() {
            let _ = estimator.handle_imu(imu);
        }
        if let Some(pose) = r.pose.as_ref() {
            let prior = estimator.position_estimate();
            paired_x.push((prior.0, pose.position.0));
            paired_y.push((prior.1, pose.position.1));
            paired_z.push((prior.2, pose.position.2));
            for event in estimator.handle_pose(pose) {
                if let EstimatorEvent::MeasurementRejected { reason, .. } = event {
                    println!("[REJECT] t={:.2}s {}", r.timestamp, reason);
                    rejected += 1;
                }
            }
        }
    }

    let snapshot = estimator.snapshot();
    Ok(json!({
        "log": path.display().to_string(),
        "readings": log.readings.len(),
        "imu_samples": snapshot.imu_samples,
        "pose_samples": snapshot.pose_samples,
        "rejected": rejected,
        "innovation_rmse_m": {
            "x": rmse_pairs(&paired_x),
            "y": rmse_pairs(&paired_y),
            "z": rmse_pairs(&paired_z),
        },
        "final_position": snapshot.position,
        "final_covariance_trace": snapshot.covariance_trace,
    }))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut logs = Vec::new();
    if let Some(log) = args.log.as_ref() {
        logs.push(log.clone());
    } else if let Some(dir) = args.session_dir.as_ref() {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("session_") && (name.ends_with(".json") || name.ends_with(".json.gz")) {
                logs.push(path);
            }
        }
        logs.sort();
    } else {
        anyhow::bail!("pass --log <file> or --session-dir <dir>");
    }

    let mut summaries = Vec::new();
    for path in &logs {
        let summary = run_once(path, &args)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        summaries.push(summary);
    }

    if summaries.len() > 1 {
        println!("Replayed {} sessions", summaries.len());
    }

    Ok(())
}
