// State estimation for the hand-worn marker
//
// Provides:
// - Constant-velocity Kalman filter (3D position and 1D angle variants)
// - Marker estimator producing filtered telemetry from raw tracker samples

pub mod kalman;
mod marker;

pub use kalman::{AngleFilter, FilterStep, KalmanFilter, PositionFilter};
pub use marker::MarkerEstimator;
