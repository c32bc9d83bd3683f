// estimator.rs — Node layer around the linear Kalman core
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - the mocap and IMU transports
//   - File I/O and status output
//
// It takes sensor samples in, produces fused estimates and events out, so
// the same code serves the live node, the replay tool and the unit tests.

use std::sync::{Arc, Mutex};

use ndarray::arr1;
use serde::{Deserialize, Serialize};

use crate::filters::linear_kf::{FilterError, LinearKf};
use crate::types::{EstimateOutput, FusedImu, FusedPose, ImuSample, PoseSample};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct EstimatorConfig {
    /// State dimension (3 = position-only)
    pub num_state: usize,
    /// Measurement dimension
    pub num_sens: usize,
    /// Which mocap subject's pose stream to subscribe to
    pub subject: String,
    /// Initial covariance is this scale times identity
    pub initial_cov_scale: f64,
    /// Mocap measurement noise, one std for all channels [m]
    pub meas_noise_std: f64,
    /// Process noise injected per predict, 0 = static model [m]
    pub process_noise_std: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            num_state: 3,
            num_sens: 3,
            subject: "UAV".to_string(),
            initial_cov_scale: 10.0,
            meas_noise_std: 0.1,
            process_noise_std: 0.0,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum EstimatorEvent {
    FirstPoseReceived { timestamp: f64, position: (f64, f64, f64) },
    MeasurementRejected { timestamp: f64, reason: FilterError },
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EstimatorSnapshot {
    pub position: (f64, f64, f64),
    pub position_std: (f64, f64, f64),
    pub orientation: (f64, f64, f64, f64),
    pub covariance_trace: f64,
    pub covariance_diagonal: Vec<f64>,
    pub imu_samples: u64,
    pub pose_samples: u64,
    pub rejected_measurements: u64,
}

// ─── The estimator node ──────────────────────────────────────────────────────

pub struct Estimator {
    config: EstimatorConfig,
    kf: LinearKf,

    // Pass-through pose, republished on every inertial tick
    last_pose: PoseSample,
    pose_received: bool,

    imu_count: u64,
    pose_count: u64,
    rejected_count: u64,
}

impl Estimator {
    /// Fails fast when the configured dimensions are invalid; the node
    /// never exists half-built.
    pub fn new(config: EstimatorConfig) -> Result<Self, FilterError> {
        let kf = LinearKf::new(
            config.num_state,
            config.num_sens,
            config.initial_cov_scale,
            config.meas_noise_std,
            config.process_noise_std,
        )?;
        Ok(Self {
            config,
            kf,
            last_pose: PoseSample::default(),
            pose_received: false,
            imu_count: 0,
            pose_count: 0,
            rejected_count: 0,
        })
    }

    /// Feed one inertial sample: runs the prediction step and returns the
    /// full fused estimate for republishing. Emitted on every tick, not
    /// only after corrections.
    pub fn handle_imu(&mut self, sample: &ImuSample) -> EstimateOutput {
        self.kf.predict();
        self.imu_count += 1;

        EstimateOutput {
            imu: FusedImu::from(sample),
            pose: self.fused_pose(sample.timestamp),
        }
    }

    /// Feed one mocap pose: runs the correction step against the position
    /// and retains the pose fields for the next republish. A rejected
    /// measurement leaves the filter untouched and is superseded by the
    /// next sample.
    pub fn handle_pose(&mut self, sample: &PoseSample) -> Vec<EstimatorEvent> {
        let mut events = Vec::new();

        if !self.pose_received {
            self.pose_received = true;
            events.push(EstimatorEvent::FirstPoseReceived {
                timestamp: sample.timestamp,
                position: sample.position,
            });
        }

        let (px, py, pz) = sample.position;
        let measurement = arr1(&[px, py, pz]);
        match self.kf.correct(&measurement) {
            Ok(()) => {
                self.pose_count += 1;
            }
            Err(reason) => {
                self.rejected_count += 1;
                log::warn!(
                    "dropping mocap measurement at t={:.3}: {}",
                    sample.timestamp,
                    reason
                );
                events.push(EstimatorEvent::MeasurementRejected {
                    timestamp: sample.timestamp,
                    reason,
                });
            }
        }

        // Orientation and companion fields pass through unfiltered
        self.last_pose = sample.clone();
        events
    }

    pub fn snapshot(&self) -> EstimatorSnapshot {
        EstimatorSnapshot {
            position: self.position_estimate(),
            position_std: self.position_std(),
            orientation: self.last_pose.orientation,
            covariance_trace: self.kf.covariance_trace(),
            covariance_diagonal: self.kf.covariance_diagonal(),
            imu_samples: self.imu_count,
            pose_samples: self.pose_count,
            rejected_measurements: self.rejected_count,
        }
    }

    pub fn position_estimate(&self) -> (f64, f64, f64) {
        let x = self.kf.state();
        (
            x.get(0).copied().unwrap_or(0.0),
            x.get(1).copied().unwrap_or(0.0),
            x.get(2).copied().unwrap_or(0.0),
        )
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn filter(&self) -> &LinearKf {
        &self.kf
    }

    fn position_std(&self) -> (f64, f64, f64) {
        let p = self.kf.covariance();
        let std_at = |i: usize| {
            if i < self.kf.num_state() {
                p[[i, i]].max(0.0).sqrt()
            } else {
                0.0
            }
        };
        (std_at(0), std_at(1), std_at(2))
    }

    fn fused_pose(&self, timestamp: f64) -> FusedPose {
        FusedPose {
            timestamp,
            position: self.position_estimate(),
            orientation: self.last_pose.orientation,
            position_std: self.position_std(),
        }
    }
}

// ─── Shared handle ───────────────────────────────────────────────────────────

/// Clonable handle for driving one estimator from independent delivery
/// contexts (one task per sensor stream). The lock is held for the full
/// duration of each call, so predict and correct never interleave their
/// reads and writes of the filter state.
#[derive(Clone)]
pub struct SharedEstimator {
    inner: Arc<Mutex<Estimator>>,
}

impl SharedEstimator {
    pub fn new(estimator: Estimator) -> Self {
        Self { inner: Arc::new(Mutex::new(estimator)) }
    }

    pub fn handle_imu(&self, sample: &ImuSample) -> EstimateOutput {
        self.inner.lock().unwrap().handle_imu(sample)
    }

    pub fn handle_pose(&self, sample: &PoseSample) -> Vec<EstimatorEvent> {
        self.inner.lock().unwrap().handle_pose(sample)
    }

    pub fn snapshot(&self) -> EstimatorSnapshot {
        self.inner.lock().unwrap().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imu_at(timestamp: f64) -> ImuSample {
        ImuSample {
            timestamp,
            angular_velocity: (0.01, -0.02, 0.03),
            linear_acceleration: (0.1, 0.2, 9.81),
        }
    }

    fn pose_at(timestamp: f64, position: (f64, f64, f64)) -> PoseSample {
        PoseSample {
            timestamp,
            position,
            orientation: (0.5, 0.5, 0.5, 0.5),
        }
    }

    #[test]
    fn test_imu_tick_mirrors_raw_sample() {
        let mut est = Estimator::new(EstimatorConfig::default()).unwrap();
        let sample = imu_at(1.0);
        let out = est.handle_imu(&sample);

        assert_eq!(out.imu.timestamp, 1.0);
        assert_eq!(out.imu.angular_velocity, sample.angular_velocity);
        assert_eq!(out.imu.linear_acceleration, sample.linear_acceleration);
    }

    #[test]
    fn test_estimate_published_before_any_pose() {
        // No mocap fix yet: republish still happens, with the default pose
        let mut est = Estimator::new(EstimatorConfig::default()).unwrap();
        let out = est.handle_imu(&imu_at(0.5));

        assert_eq!(out.pose.position, (0.0, 0.0, 0.0));
        assert_eq!(out.pose.orientation, (1.0, 0.0, 0.0, 0.0));
        assert_eq!(est.snapshot().imu_samples, 1);
    }

    #[test]
    fn test_orientation_passes_through_unfiltered() {
        let mut est = Estimator::new(EstimatorConfig::default()).unwrap();
        est.handle_pose(&pose_at(1.0, (1.0, 2.0, 3.0)));
        let out = est.handle_imu(&imu_at(1.1));

        assert_eq!(out.pose.orientation, (0.5, 0.5, 0.5, 0.5));
        // Position pulled hard toward the measurement (R << P0)
        assert!((out.pose.position.0 - 1.0).abs() < 0.01);
        assert!((out.pose.position.1 - 2.0).abs() < 0.02);
        assert!((out.pose.position.2 - 3.0).abs() < 0.03);
    }

    #[test]
    fn test_first_pose_emits_event() {
        let mut est = Estimator::new(EstimatorConfig::default()).unwrap();
        let events = est.handle_pose(&pose_at(1.0, (1.0, 0.0, 0.0)));
        assert!(events
            .iter()
            .any(|e| matches!(e, EstimatorEvent::FirstPoseReceived { .. })));

        let events = est.handle_pose(&pose_at(2.0, (1.0, 0.0, 0.0)));
        assert!(events.is_empty());
    }

    #[test]
    fn test_singular_measurement_rejected_and_counted() {
        // Collapsed prior and zero noise: S is singular
        let config = EstimatorConfig {
            initial_cov_scale: 0.0,
            meas_noise_std: 0.0,
            ..EstimatorConfig::default()
        };
        let mut est = Estimator::new(config).unwrap();
        let before = est.snapshot();

        let events = est.handle_pose(&pose_at(1.0, (5.0, 5.0, 5.0)));
        assert!(events.iter().any(|e| matches!(
            e,
            EstimatorEvent::MeasurementRejected {
                reason: FilterError::SingularInnovationCovariance,
                ..
            }
        )));

        let after = est.snapshot();
        assert_eq!(after.position, before.position);
        assert_eq!(after.covariance_diagonal, before.covariance_diagonal);
        assert_eq!(after.rejected_measurements, 1);
        assert_eq!(after.pose_samples, 0);
        // Pass-through fields still updated by the rejected sample
        assert_eq!(after.orientation, (0.5, 0.5, 0.5, 0.5));
    }

    #[test]
    fn test_dimension_mismatch_rejected_at_boundary() {
        let config = EstimatorConfig { num_sens: 2, ..EstimatorConfig::default() };
        let mut est = Estimator::new(config).unwrap();
        let events = est.handle_pose(&pose_at(1.0, (1.0, 2.0, 3.0)));
        assert!(events.iter().any(|e| matches!(
            e,
            EstimatorEvent::MeasurementRejected {
                reason: FilterError::MalformedMeasurementDimension { expected: 2, got: 3 },
                ..
            }
        )));
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let config = EstimatorConfig { num_state: 0, ..EstimatorConfig::default() };
        assert!(Estimator::new(config).is_err());
    }

    #[test]
    fn test_shared_handle_serializes_concurrent_feeds() {
        let shared =
            SharedEstimator::new(Estimator::new(EstimatorConfig::default()).unwrap());

        let imu_handle = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    shared.handle_imu(&imu_at(i as f64 * 0.01));
                }
            })
        };
        let pose_handle = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    shared.handle_pose(&pose_at(i as f64 * 0.1, (1.0, 2.0, 3.0)));
                }
            })
        };
        imu_handle.join().unwrap();
        pose_handle.join().unwrap();

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.imu_samples, 500);
        assert_eq!(snapshot.pose_samples, 50);
        assert_eq!(snapshot.rejected_measurements, 0);
        // Covariance stayed symmetric positive along the diagonal
        for v in snapshot.covariance_diagonal {
            assert!(v >= 0.0);
        }
    }
}
