/// Linear Kalman Filter (position fusion core)
///
/// State vector (n-dimensional, position-only by default):
/// [0-2]: Position (X, Y, Z) in the mocap frame (meters)
///
/// The transition model is identity (static between inertial ticks); the
/// measurement model observes the leading state entries directly. All of
/// the interesting behavior lives in `predict` and `correct`.
use std::fmt;

use nalgebra::DMatrix;
use ndarray::{Array1, Array2};

/// Errors raised by the filter. A failed `correct` leaves the filter's
/// state and covariance untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterError {
    /// Innovation covariance `S = H*P*H^T + R` was not invertible. Happens
    /// when both the prior covariance and the measurement noise have
    /// collapsed to zero along an observed direction.
    SingularInnovationCovariance,

    /// Incoming measurement length does not match the measurement model.
    MalformedMeasurementDimension { expected: usize, got: usize },

    /// State or measurement dimension was zero at construction.
    InvalidDimensions { num_state: usize, num_sens: usize },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::SingularInnovationCovariance => {
                write!(f, "innovation covariance is singular")
            }
            FilterError::MalformedMeasurementDimension { expected, got } => {
                write!(f, "measurement has length {}, filter expects {}", got, expected)
            }
            FilterError::InvalidDimensions { num_state, num_sens } => {
                write!(
                    f,
                    "state and measurement dimensions must be positive (got {}, {})",
                    num_state, num_sens
                )
            }
        }
    }
}

impl std::error::Error for FilterError {}

pub type Result<T> = std::result::Result<T, FilterError>;

pub struct LinearKf {
    /// State vector [n]
    state: Array1<f64>,

    /// Covariance matrix [n x n]
    covariance: Array2<f64>,

    /// State transition matrix [n x n], identity unless overridden
    transition: Array2<f64>,

    /// Measurement matrix [m x n]
    measurement_matrix: Array2<f64>,

    /// Measurement noise matrix [m x m]
    measurement_noise: Array2<f64>,

    /// Process noise matrix [n x n]
    process_noise: Array2<f64>,

    /// Step counters
    predict_count: u64,
    correct_count: u64,
}

impl LinearKf {
    /// Create a new filter with `x = 0`, `P = initial_cov_scale * I`,
    /// `R = meas_noise_std^2 * I` and `Q = process_noise_std^2 * I`.
    pub fn new(
        num_state: usize,
        num_sens: usize,
        initial_cov_scale: f64,
        meas_noise_std: f64,
        process_noise_std: f64,
    ) -> Result<Self> {
        if num_state == 0 || num_sens == 0 {
            return Err(FilterError::InvalidDimensions { num_state, num_sens });
        }

        let state = Array1::<f64>::zeros(num_state);
        let covariance = Array2::<f64>::eye(num_state) * initial_cov_scale;
        let transition = Array2::<f64>::eye(num_state);
        let measurement_matrix = Self::build_measurement_matrix(num_sens, num_state);
        let measurement_noise = Array2::<f64>::eye(num_sens) * meas_noise_std.powi(2);
        let process_noise = Array2::<f64>::eye(num_state) * process_noise_std.powi(2);

        Ok(Self {
            state,
            covariance,
            transition,
            measurement_matrix,
            measurement_noise,
            process_noise,
            predict_count: 0,
            correct_count: 0,
        })
    }

    /// Replace the transition model before use. Must stay [n x n].
    pub fn with_transition(mut self, transition: Array2<f64>) -> Result<Self> {
        let n = self.state.len();
        if transition.dim() != (n, n) {
            return Err(FilterError::InvalidDimensions {
                num_state: transition.nrows(),
                num_sens: transition.ncols(),
            });
        }
        self.transition = transition;
        Ok(self)
    }

    /// H observes the leading state entries; identity when m == n.
    fn build_measurement_matrix(num_sens: usize, num_state: usize) -> Array2<f64> {
        let mut h = Array2::<f64>::zeros((num_sens, num_state));
        for i in 0..num_sens.min(num_state) {
            h[[i, i]] = 1.0;
        }
        h
    }

    /// Prediction step: `x = F*x`, `P = F*P*F^T + Q`. Never fails.
    pub fn predict(&mut self) {
        self.state = self.transition.dot(&self.state);
        let fpf = self.transition.dot(&self.covariance).dot(&self.transition.t());
        self.covariance = fpf + &self.process_noise;
        self.predict_count += 1;
    }

    /// Measurement update with a length-m measurement vector.
    ///
    /// Rejects the measurement (state and covariance untouched) when its
    /// dimension is wrong or the innovation covariance is singular.
    pub fn correct(&mut self, measurement: &Array1<f64>) -> Result<()> {
        let expected = self.measurement_matrix.nrows();
        if measurement.len() != expected {
            return Err(FilterError::MalformedMeasurementDimension {
                expected,
                got: measurement.len(),
            });
        }

        let h = &self.measurement_matrix;
        let h_t = h.t().to_owned();

        // Innovation and its covariance
        let innovation = measurement - &h.dot(&self.state);
        let ph_t = self.covariance.dot(&h_t);
        let s = h.dot(&ph_t) + &self.measurement_noise;

        let s_inv = invert(&s).ok_or(FilterError::SingularInnovationCovariance)?;

        // Gain, then commit both halves of the update together
        let gain = ph_t.dot(&s_inv);
        let new_state = &self.state + &gain.dot(&innovation);
        let i_kh = Array2::<f64>::eye(self.state.len()) - gain.dot(h);
        let new_covariance = i_kh.dot(&self.covariance);

        self.state = new_state;
        self.covariance = new_covariance;
        self.correct_count += 1;
        Ok(())
    }

    pub fn state(&self) -> &Array1<f64> {
        &self.state
    }

    pub fn covariance(&self) -> &Array2<f64> {
        &self.covariance
    }

    pub fn covariance_trace(&self) -> f64 {
        (0..self.state.len()).map(|i| self.covariance[[i, i]]).sum()
    }

    pub fn covariance_diagonal(&self) -> Vec<f64> {
        (0..self.state.len()).map(|i| self.covariance[[i, i]]).collect()
    }

    pub fn num_state(&self) -> usize {
        self.state.len()
    }

    pub fn num_sens(&self) -> usize {
        self.measurement_matrix.nrows()
    }

    pub fn predict_count(&self) -> u64 {
        self.predict_count
    }

    pub fn correct_count(&self) -> u64 {
        self.correct_count
    }
}

/// General m x m inverse through nalgebra; None when singular.
fn invert(s: &Array2<f64>) -> Option<Array2<f64>> {
    let (rows, cols) = s.dim();
    let slice = s.as_slice()?;
    let inv = DMatrix::from_row_slice(rows, cols, slice).try_inverse()?;
    let mut out = Array2::<f64>::zeros((rows, cols));
    for i in 0..rows {
        for j in 0..cols {
            out[[i, j]] = inv[(i, j)];
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    #[test]
    fn test_invalid_dimensions_rejected() {
        assert!(matches!(
            LinearKf::new(0, 3, 10.0, 0.1, 0.0),
            Err(FilterError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            LinearKf::new(3, 0, 10.0, 0.1, 0.0),
            Err(FilterError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_identity_predict_preserves_state_and_covariance() {
        // F = I and Q = 0: 100 predicts change nothing
        let mut kf = LinearKf::new(3, 3, 10.0, 0.1, 0.0).unwrap();
        for _ in 0..100 {
            kf.predict();
        }
        for i in 0..3 {
            assert_eq!(kf.state()[i], 0.0);
            assert_eq!(kf.covariance()[[i, i]], 10.0);
        }
        assert_eq!(kf.predict_count(), 100);
    }

    #[test]
    fn test_predict_grows_covariance_with_process_noise() {
        let mut kf = LinearKf::new(3, 3, 10.0, 0.1, 0.5).unwrap();
        let before = kf.covariance_diagonal();
        kf.predict();
        kf.predict();
        let after = kf.covariance_diagonal();
        for i in 0..3 {
            assert!(after[i] > before[i]);
            assert_relative_eq!(after[i], before[i] + 2.0 * 0.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_correct_pulls_state_toward_measurement() {
        // P0 = 10*I dwarfs R = 0.01*I, so the measurement dominates
        let mut kf = LinearKf::new(3, 3, 10.0, 0.1, 0.0).unwrap();
        let trace_before = kf.covariance_trace();
        kf.correct(&arr1(&[1.0, 2.0, 3.0])).unwrap();

        assert_relative_eq!(kf.state()[0], 1.0, max_relative = 0.01);
        assert_relative_eq!(kf.state()[1], 2.0, max_relative = 0.01);
        assert_relative_eq!(kf.state()[2], 3.0, max_relative = 0.01);

        let trace_after = kf.covariance_trace();
        assert!(trace_after <= trace_before);
        assert!(trace_after < 0.05);
    }

    #[test]
    fn test_zero_noise_measurement_is_exact() {
        // R = 0 with H = I drives the state onto the measurement
        let mut kf = LinearKf::new(3, 3, 10.0, 0.0, 0.0).unwrap();
        kf.correct(&arr1(&[4.0, -5.0, 6.0])).unwrap();

        assert_relative_eq!(kf.state()[0], 4.0, epsilon = 1e-9);
        assert_relative_eq!(kf.state()[1], -5.0, epsilon = 1e-9);
        assert_relative_eq!(kf.state()[2], 6.0, epsilon = 1e-9);
        assert!(kf.covariance_trace().abs() < 1e-9);
    }

    #[test]
    fn test_zero_innovation_leaves_state_unchanged() {
        let mut kf = LinearKf::new(3, 3, 10.0, 0.1, 0.0).unwrap();
        kf.correct(&arr1(&[1.0, 2.0, 3.0])).unwrap();
        kf.predict();

        // Measure exactly the predicted state: w = 0, x must not move
        let predicted: Vec<f64> = kf.state().iter().copied().collect();
        kf.correct(&arr1(&predicted)).unwrap();
        for i in 0..3 {
            assert_relative_eq!(kf.state()[i], predicted[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_measurement_dimension_mismatch_rejected() {
        let mut kf = LinearKf::new(3, 2, 10.0, 0.1, 0.0).unwrap();
        let err = kf.correct(&arr1(&[1.0, 2.0, 3.0])).unwrap_err();
        assert_eq!(
            err,
            FilterError::MalformedMeasurementDimension { expected: 2, got: 3 }
        );

        // The matching length goes through
        assert!(kf.correct(&arr1(&[1.0, 2.0])).is_ok());
    }

    #[test]
    fn test_partial_measurement_only_touches_observed_entries() {
        let mut kf = LinearKf::new(3, 2, 10.0, 0.1, 0.0).unwrap();
        kf.correct(&arr1(&[1.0, 2.0])).unwrap();
        assert_relative_eq!(kf.state()[0], 1.0, max_relative = 0.01);
        assert_relative_eq!(kf.state()[1], 2.0, max_relative = 0.01);
        assert_eq!(kf.state()[2], 0.0);
        // Unobserved variance stays at the prior
        assert_eq!(kf.covariance()[[2, 2]], 10.0);
    }

    #[test]
    fn test_singular_innovation_preserves_state_exactly() {
        // P = 0 and R = 0 make S = 0: the update must be rejected whole
        let mut kf = LinearKf::new(3, 3, 0.0, 0.0, 0.0).unwrap();
        let state_before: Vec<f64> = kf.state().iter().copied().collect();
        let cov_before: Vec<f64> = kf.covariance().iter().copied().collect();

        let err = kf.correct(&arr1(&[1.0, 2.0, 3.0])).unwrap_err();
        assert_eq!(err, FilterError::SingularInnovationCovariance);

        let state_after: Vec<f64> = kf.state().iter().copied().collect();
        let cov_after: Vec<f64> = kf.covariance().iter().copied().collect();
        assert_eq!(state_before, state_after);
        assert_eq!(cov_before, cov_after);
        assert_eq!(kf.correct_count(), 0);
    }

    #[test]
    fn test_repeated_corrections_never_grow_trace() {
        let mut kf = LinearKf::new(3, 3, 10.0, 0.1, 0.0).unwrap();
        let mut last_trace = kf.covariance_trace();
        for k in 0..10 {
            kf.correct(&arr1(&[k as f64, 0.0, -1.0])).unwrap();
            let trace = kf.covariance_trace();
            assert!(trace <= last_trace + 1e-12);
            last_trace = trace;
        }
    }

    #[test]
    fn test_custom_transition_shape_validated() {
        let kf = LinearKf::new(3, 3, 10.0, 0.1, 0.0).unwrap();
        assert!(kf.with_transition(Array2::<f64>::eye(2)).is_err());
    }
}
