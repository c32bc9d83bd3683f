use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration};

use crate::types::{ImuSample, PoseSample};

/// Inertial stream, ~100 Hz. Mock samples stand in when no IMU driver is
/// wired up, so the node runs end to end on any machine.
pub async fn imu_loop(tx: Sender<ImuSample>) {
    let mut interval = interval(Duration::from_millis(10));
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        let sample = match read_imu() {
            Some(data) => data,
            None => mock_imu_sample(),
        };

        match tx.try_send(sample) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 500 == 0 {
                    eprintln!("[imu] {} samples", sample_count);
                }
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                eprintln!("[imu] channel closed after {} samples", sample_count);
                break;
            }
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                // Channel full, drop this sample
            }
        }
    }
}

/// Mocap pose stream for one subject, ~10 Hz.
pub async fn mocap_loop(tx: Sender<PoseSample>, subject: String) {
    let mut interval = interval(Duration::from_millis(100));
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        let sample = match read_mocap(&subject) {
            Some(data) => data,
            None => mock_pose_sample(),
        };

        match tx.try_send(sample) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 50 == 0 {
                    eprintln!("[mocap/{}] {} poses", subject, sample_count);
                }
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                eprintln!(
                    "[mocap/{}] channel closed after {} poses",
                    subject, sample_count
                );
                break;
            }
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                // Channel full, drop this sample
            }
        }
    }
}

fn read_imu() -> Option<ImuSample> {
    // No IMU driver hooked up in this build
    None
}

fn read_mocap(_subject: &str) -> Option<PoseSample> {
    // Would query the mocap bridge for the named subject
    None
}

fn mock_imu_sample() -> ImuSample {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let t = COUNTER.fetch_add(1, Ordering::Relaxed) as f64 * 0.01;

    ImuSample {
        timestamp: current_timestamp(),
        angular_velocity: (
            (t * 0.5).sin() * 0.05,
            (t * 0.3).cos() * 0.03,
            (t * 1.0).sin() * 0.1,
        ),
        linear_acceleration: (
            (t * 2.0 * PI).sin() * 0.5,
            (t * 2.0 * PI).cos() * 0.3,
            9.81 + (t * PI).sin() * 0.1,
        ),
    }
}

fn mock_pose_sample() -> PoseSample {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let t = COUNTER.fetch_add(1, Ordering::Relaxed) as f64 * 0.1;

    // Slow circle at 1 m altitude
    let yaw = t * 0.2;
    let half = yaw * 0.5;
    PoseSample {
        timestamp: current_timestamp(),
        position: (yaw.cos() * 2.0, yaw.sin() * 2.0, 1.0),
        orientation: (half.cos(), 0.0, 0.0, half.sin()),
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_pose_orientation_is_unit() {
        let pose = mock_pose_sample();
        let (w, x, y, z) = pose.orientation;
        let norm = (w * w + x * x + y * y + z * z).sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mock_imu_gravity_dominates_acceleration() {
        let sample = mock_imu_sample();
        let (ax, ay, az) = sample.linear_acceleration;
        let mag = (ax * ax + ay * ay + az * az).sqrt();
        assert!(mag > 9.0 && mag < 11.0);
    }
}
