use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

mod estimator;
mod filters;
mod live_status;
mod sources;
mod types;

use estimator::{Estimator, EstimatorConfig, EstimatorEvent};
use types::{EstimateOutput, ImuSample, PoseSample};

#[derive(Parser, Debug)]
#[command(name = "pose_estimator")]
#[command(about = "Kalman pose estimator - fuses IMU and mocap position streams", long_about = None)]
struct Args {
    /// Duration in seconds (0 = run until ctrl-c)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Mocap subject whose pose stream to subscribe to
    #[arg(long, default_value = "UAV")]
    subject: String,

    /// State dimension
    #[arg(long, default_value = "3")]
    num_state: usize,

    /// Measurement dimension
    #[arg(long, default_value = "3")]
    num_sens: usize,

    /// Initial covariance scale (P0 = scale * I)
    #[arg(long, default_value = "10.0")]
    initial_cov_scale: f64,

    /// Mocap measurement noise std [m]
    #[arg(long, default_value = "0.1")]
    meas_noise_std: f64,

    /// Process noise std per predict [m] (0 = static model)
    #[arg(long, default_value = "0.0")]
    process_noise_std: f64,

    /// Output directory
    #[arg(long, default_value = "pose_estimator_sessions")]
    output_dir: String,
}

#[derive(Serialize, Deserialize, Clone)]
struct SensorReading {
    timestamp: f64,
    imu: Option<ImuSample>,
    pose: Option<PoseSample>,
}

#[derive(Serialize, Deserialize)]
struct SessionOutput {
    readings: Vec<SensorReading>,
    stats: Stats,
}

#[derive(Serialize, Deserialize)]
struct Stats {
    total_samples: usize,
    imu_samples: u64,
    pose_samples: u64,
    rejected_measurements: u64,
    final_position: (f64, f64, f64),
    final_covariance_trace: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("[{}] Pose Estimator Starting", ts_now());
    println!("  Duration: {} seconds (0=until ctrl-c)", args.duration);
    println!("  Subject: {}", args.subject);
    println!("  Dimensions: {} state / {} sens", args.num_state, args.num_sens);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    let config = EstimatorConfig {
        num_state: args.num_state,
        num_sens: args.num_sens,
        subject: args.subject.clone(),
        initial_cov_scale: args.initial_cov_scale,
        meas_noise_std: args.meas_noise_std,
        process_noise_std: args.process_noise_std,
    };
    // Construction fails fast on bad dimensions; the run loop below owns
    // the process lifetime.
    let mut estimator = Estimator::new(config)
        .map_err(|e| anyhow::anyhow!("estimator construction failed: {}", e))?;

    // Channels for sensor data
    let (imu_tx, mut imu_rx) = mpsc::channel::<ImuSample>(500);
    let (pose_tx, mut pose_rx) = mpsc::channel::<PoseSample>(100);

    // Spawn sample sources (hold handles to keep tasks alive)
    let _imu_handle = tokio::spawn(sources::imu_loop(imu_tx.clone()));
    let _mocap_handle = tokio::spawn(sources::mocap_loop(
        pose_tx.clone(),
        estimator.config().subject.clone(),
    ));

    drop(imu_tx);
    drop(pose_tx);

    // Explicit shutdown signal instead of blocking inside setup
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[{}] Ctrl-c received, shutting down...", ts_now());
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut readings: Vec<SensorReading> = Vec::new();
    let mut latest_estimate: Option<EstimateOutput> = None;

    let start = Utc::now();
    let mut last_save = Utc::now();
    let mut last_status_update = Utc::now();

    println!("[{}] Starting estimation loop...", ts_now());

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if args.duration > 0 {
            let elapsed = Utc::now().signed_duration_since(start);
            if elapsed.num_seconds() as u64 >= args.duration {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
        }

        // Each inertial sample: one predict, then republish the estimate
        while let Ok(imu) = imu_rx.try_recv() {
            let timestamp = imu.timestamp;
            let output = estimator.handle_imu(&imu);
            latest_estimate = Some(output);
            readings.push(SensorReading { timestamp, imu: Some(imu), pose: None });
        }

        // Each mocap pose: one correct against the filter's current state
        while let Ok(pose) = pose_rx.try_recv() {
            let timestamp = pose.timestamp;
            for event in estimator.handle_pose(&pose) {
                match event {
                    EstimatorEvent::FirstPoseReceived { position, .. } => {
                        println!(
                            "[{}] First mocap fix at ({:.2}, {:.2}, {:.2})",
                            ts_now(), position.0, position.1, position.2
                        );
                    }
                    EstimatorEvent::MeasurementRejected { reason, .. } => {
                        eprintln!("[{}] Measurement rejected: {}", ts_now(), reason);
                    }
                }
            }
            readings.push(SensorReading { timestamp, imu: None, pose: Some(pose) });
        }

        // Update live status every 2 seconds
        let now = Utc::now();
        if (now.signed_duration_since(last_status_update).num_seconds() as u64) >= 2 {
            let snapshot = estimator.snapshot();
            let uptime = now.signed_duration_since(start).num_seconds().max(0) as u64;

            let mut status = live_status::LiveStatus::new();
            status.timestamp = live_status::current_timestamp();
            status.imu_samples = snapshot.imu_samples;
            status.pose_samples = snapshot.pose_samples;
            status.rejected_measurements = snapshot.rejected_measurements;
            status.position = snapshot.position;
            status.position_std = snapshot.position_std;
            status.covariance_trace = snapshot.covariance_trace;
            status.uptime_seconds = uptime;

            let status_path = format!("{}/live_status.json", args.output_dir);
            let _ = status.save(&status_path);
            last_status_update = now;
        }

        // Auto-save every 15 seconds
        if (now.signed_duration_since(last_save).num_seconds() as u64) >= 15 {
            let filename = format!("{}/session_{}.json", args.output_dir, ts_now_clean());
            save_session(&filename, &readings, &estimator)?;
            println!("[{}] Auto-saved {} readings to {}", ts_now(), readings.len(), filename);
            last_save = now;
        }

        sleep(Duration::from_millis(1)).await;
    }

    // Final save
    let filename = format!("{}/session_{}_final.json", args.output_dir, ts_now_clean());
    save_session(&filename, &readings, &estimator)?;
    println!("[{}] Final save: {} readings to {}", ts_now(), readings.len(), filename);

    let snapshot = estimator.snapshot();
    println!("\n=== Final Stats ===");
    println!("IMU samples: {}", snapshot.imu_samples);
    println!("Mocap poses: {} ({} rejected)", snapshot.pose_samples, snapshot.rejected_measurements);
    println!(
        "Position: ({:.3}, {:.3}, {:.3}) +/- ({:.3}, {:.3}, {:.3}) m",
        snapshot.position.0, snapshot.position.1, snapshot.position.2,
        snapshot.position_std.0, snapshot.position_std.1, snapshot.position_std.2
    );
    if let Some(est) = latest_estimate.as_ref() {
        println!("Last republish at t={:.3}", est.pose.timestamp);
    }

    Ok(())
}

fn save_session(path: &str, readings: &[SensorReading], estimator: &Estimator) -> Result<()> {
    let snapshot = estimator.snapshot();
    let output = SessionOutput {
        readings: readings.to_vec(),
        stats: Stats {
            total_samples: readings.len(),
            imu_samples: snapshot.imu_samples,
            pose_samples: snapshot.pose_samples,
            rejected_measurements: snapshot.rejected_measurements,
            final_position: snapshot.position,
            final_covariance_trace: snapshot.covariance_trace,
        },
    };
    let json = serde_json::to_string_pretty(&output)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
