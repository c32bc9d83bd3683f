use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Serialize, Deserialize, Clone)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub imu_samples: u64,
    pub pose_samples: u64,
    pub rejected_measurements: u64,
    pub position: (f64, f64, f64),
    pub position_std: (f64, f64, f64),
    pub covariance_trace: f64,
    pub uptime_seconds: u64,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            imu_samples: 0,
            pose_samples: 0,
            rejected_measurements: 0,
            position: (0.0, 0.0, 0.0),
            position_std: (0.0, 0.0, 0.0),
            covariance_trace: 0.0,
            uptime_seconds: 0,
        }
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
