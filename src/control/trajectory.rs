// Minimum-jerk reference trajectory
//
// Each segment moves from the captured initial value to zero along the
// quintic profile s(tau) = 1 - 10 tau^3 + 15 tau^4 - 6 tau^5. When a segment
// completes it restarts from the current measurement, giving a rolling
// reference for continuous impedance rendering.

/// Position coefficient: 1 at tau = 0, 0 at tau = 1
pub fn position_coefficient(tau: f32) -> f32 {
    let tau3 = tau * tau * tau;
    1.0 - 10.0 * tau3 + 15.0 * tau3 * tau - 6.0 * tau3 * tau * tau
}

/// Velocity coefficient (d/dtau of the position profile, sign flipped)
pub fn velocity_coefficient(tau: f32) -> f32 {
    let tau2 = tau * tau;
    30.0 * tau2 - 60.0 * tau2 * tau + 30.0 * tau2 * tau2
}

/// Desired value and rate for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    pub value: f32,
    pub rate: f32,
    /// Normalised segment time, 0..1
    pub tau: f32,
}

/// One axis of the rolling minimum-jerk reference
#[derive(Debug, Clone)]
pub struct MinimumJerk {
    duration_s: f32,
    initial: f32,
    start_s: f64,
    active: bool,
}

impl MinimumJerk {
    pub fn new(duration_s: f32) -> Self {
        Self {
            duration_s: duration_s.max(f32::EPSILON),
            initial: 0.0,
            start_s: 0.0,
            active: false,
        }
    }

    /// Start a segment from `initial` at time `now_s`
    pub fn initialize(&mut self, initial: f32, now_s: f64) {
        self.initial = initial;
        self.start_s = now_s;
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn reset(&mut self) {
        self.active = false;
    }

    pub fn initial(&self) -> f32 {
        self.initial
    }

    /// Evaluate the reference at `now_s`. Once the segment has run its full
    /// duration a new one starts from `measured`.
    pub fn sample(&mut self, measured: f32, now_s: f64) -> Reference {
        if !self.active {
            self.initialize(measured, now_s);
        }

        let elapsed = (now_s - self.start_s).max(0.0) as f32;
        if elapsed >= self.duration_s {
            self.initialize(measured, now_s);
            return self.evaluate(0.0);
        }

        self.evaluate((elapsed / self.duration_s).min(1.0))
    }

    /// Reference at normalised time `tau` for the current segment
    pub fn evaluate(&self, tau: f32) -> Reference {
        let tau = tau.clamp(0.0, 1.0);
        Reference {
            value: self.initial * position_coefficient(tau),
            rate: -(self.initial / self.duration_s) * velocity_coefficient(tau),
            tau,
        }
    }
}
