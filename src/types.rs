use serde::{Deserialize, Serialize};

/// One inertial sample: angular velocity [rad/s] + linear acceleration
/// [m/s^2] in the body frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImuSample {
    pub timestamp: f64,
    pub angular_velocity: (f64, f64, f64),
    pub linear_acceleration: (f64, f64, f64),
}

/// One absolute pose sample from the motion-capture system.
/// Orientation is (w, x, y, z); the filter never touches it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseSample {
    pub timestamp: f64,
    pub position: (f64, f64, f64),
    pub orientation: (f64, f64, f64, f64),
}

impl Default for PoseSample {
    fn default() -> Self {
        Self {
            timestamp: 0.0,
            position: (0.0, 0.0, 0.0),
            orientation: (1.0, 0.0, 0.0, 0.0),
        }
    }
}

/// Republished mirror of the latest raw inertial sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusedImu {
    pub timestamp: f64,
    pub angular_velocity: (f64, f64, f64),
    pub linear_acceleration: (f64, f64, f64),
}

impl From<&ImuSample> for FusedImu {
    fn from(sample: &ImuSample) -> Self {
        Self {
            timestamp: sample.timestamp,
            angular_velocity: sample.angular_velocity,
            linear_acceleration: sample.linear_acceleration,
        }
    }
}

/// Fused pose: position from the filter, orientation carried through
/// verbatim from the last mocap sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusedPose {
    pub timestamp: f64,
    pub position: (f64, f64, f64),
    pub orientation: (f64, f64, f64, f64),
    /// Per-axis standard deviation from the covariance diagonal [m]
    pub position_std: (f64, f64, f64),
}

/// What the estimate sink receives on every inertial tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EstimateOutput {
    pub imu: FusedImu,
    pub pose: FusedPose,
}
