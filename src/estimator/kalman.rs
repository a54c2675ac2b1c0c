// Constant-velocity Kalman filter
//
// State is [positions (M), velocities (M)]; only positions are measured.
// The same code runs the 3D marker filter (6 states) and the 1D joint-angle
// filters (2 states).

use nalgebra::{SMatrix, SVector};
use tracing::{debug, warn};

use crate::config::FilterNoise;

/// 3D marker position filter: [x, y, z, vx, vy, vz]
pub type PositionFilter = KalmanFilter<6, 3>;

/// Joint angle filter: [angle, angular velocity]
pub type AngleFilter = KalmanFilter<2, 1>;

/// Outcome of feeding one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStep {
    /// First measurement; the filter is now armed
    Initialized,
    /// Predict + correct ran
    Updated,
    /// Timestamp did not advance, sample ignored
    Skipped,
}

/// Kalman filter with `N` states and `M` measured positions (`N == 2 * M`)
#[allow(non_snake_case)]
#[derive(Debug, Clone)]
pub struct KalmanFilter<const N: usize, const M: usize> {
    state: SVector<f32, N>,
    P: SMatrix<f32, N, N>,
    Q: SMatrix<f32, N, N>,
    R: SMatrix<f32, M, M>,
    H: SMatrix<f32, M, N>,
    initial_covariance: f32,
    last_timestamp: f64,
    initialized: bool,
    updated: bool,
}

#[allow(non_snake_case)]
impl<const N: usize, const M: usize> KalmanFilter<N, M> {
    pub fn new(noise: FilterNoise) -> Self {
        assert_eq!(N, 2 * M, "state must hold one velocity per measured position");

        let Q = SMatrix::<f32, N, N>::from_fn(|r, c| match (r == c, r < M) {
            (true, true) => noise.position_process,
            (true, false) => noise.velocity_process,
            _ => 0.0,
        });

        Self {
            state: SVector::zeros(),
            P: SMatrix::identity() * noise.initial_covariance,
            Q,
            R: SMatrix::identity() * noise.measurement,
            H: SMatrix::from_fn(|r, c| if r == c { 1.0 } else { 0.0 }),
            initial_covariance: noise.initial_covariance,
            last_timestamp: 0.0,
            initialized: false,
            updated: false,
        }
    }

    /// Arm the filter at `measured` with zero velocity
    pub fn initialize(&mut self, measured: SVector<f32, M>, timestamp: f64) {
        self.state = SVector::zeros();
        self.state.fixed_rows_mut::<M>(0).copy_from(&measured);
        self.P = SMatrix::identity() * self.initial_covariance;
        self.last_timestamp = timestamp;
        self.initialized = true;
        self.updated = false;
    }

    /// Feed one measurement taken at `timestamp` (seconds)
    pub fn update(&mut self, measured: SVector<f32, M>, timestamp: f64) -> FilterStep {
        if !self.initialized {
            self.initialize(measured, timestamp);
            return FilterStep::Initialized;
        }

        let dt = timestamp - self.last_timestamp;
        if dt <= 0.0 || !dt.is_finite() {
            debug!("Skipping filter update, dt = {}", dt);
            return FilterStep::Skipped;
        }

        self.predict(dt as f32);
        self.correct(measured);
        self.last_timestamp = timestamp;
        self.updated = true;
        FilterStep::Updated
    }

    fn predict(&mut self, dt: f32) {
        let mut F = SMatrix::<f32, N, N>::identity();
        for i in 0..M {
            F[(i, i + M)] = dt;
        }

        self.state = F * self.state;
        self.P = F * self.P * F.transpose() + self.Q;
    }

    fn correct(&mut self, measured: SVector<f32, M>) {
        let innovation = measured - self.H * self.state;
        let S = self.H * self.P * self.H.transpose() + self.R;

        let Some(S_inv) = S.try_inverse() else {
            warn!("Innovation covariance is singular, skipping correction");
            return;
        };

        let K = self.P * self.H.transpose() * S_inv;
        self.state += K * innovation;
        self.P = (SMatrix::<f32, N, N>::identity() - K * self.H) * self.P;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True once an update has followed the initialisation
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn position(&self) -> SVector<f32, M> {
        self.state.fixed_rows::<M>(0).into_owned()
    }

    pub fn velocity(&self) -> SVector<f32, M> {
        self.state.fixed_rows::<M>(M).into_owned()
    }
}
