//! Recursive state estimator fusing a high-rate inertial stream with a
//! low-rate motion-capture position stream.
//!
//! The core is a linear Kalman filter ([`filters::linear_kf::LinearKf`]):
//! every inertial sample drives one prediction step followed by a
//! republish of the fused estimate, every mocap pose drives one
//! correction step. The [`estimator`] module wraps the filter with that
//! policy and with the pass-through of unfused pose fields; transports
//! live in [`sources`] and the binaries.

pub mod estimator;
pub mod filters;
pub mod live_status;
pub mod sources;
pub mod types;

pub use estimator::{Estimator, EstimatorConfig, EstimatorEvent, SharedEstimator};
pub use filters::linear_kf::{FilterError, LinearKf};
pub use types::{EstimateOutput, FusedImu, FusedPose, ImuSample, PoseSample};
