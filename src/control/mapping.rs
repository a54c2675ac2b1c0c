// Cable geometry and motor command conversion
//
// Three cables pull the ring in fixed directions in the finger plane.
// A 2D virtual force is projected onto each cable direction, then converted
// force -> motor current -> drive percentage -> inverted PWM.

use crate::config::{ControllerConfig, MOTOR_COUNT, PWM_FULL_DRIVE, PWM_SPAN, PWM_ZERO_DRIVE};

/// Motor-side constants needed to turn cable force into drive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorModel {
    pub torque_constant: f32,
    pub spool_radius_m: f32,
    pub nominal_current_a: f32,
}

impl MotorModel {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            torque_constant: config.torque_constant,
            spool_radius_m: config.spool_radius_m,
            nominal_current_a: config.nominal_current_a,
        }
    }

    /// Cable force (N) to motor current (A), limited to the nominal current
    pub fn force_to_current(&self, force: f32) -> f32 {
        if !force.is_finite() || self.torque_constant <= 0.0 {
            return 0.0;
        }
        let current = force * self.spool_radius_m / self.torque_constant;
        current.clamp(-self.nominal_current_a, self.nominal_current_a)
    }

    /// Cable force (N) to signed drive fraction of nominal current, -1..1
    pub fn force_to_percentage(&self, force: f32) -> f32 {
        if self.nominal_current_a <= 0.0 {
            return 0.0;
        }
        self.force_to_current(force) / self.nominal_current_a
    }
}

/// Projection of a planar force onto the three cable directions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CableGeometry {
    directions: [(f32, f32); MOTOR_COUNT],
}

impl CableGeometry {
    pub fn new(angles_deg: [f32; MOTOR_COUNT]) -> Self {
        Self {
            directions: angles_deg.map(|deg| {
                let rad = deg.to_radians();
                (rad.cos(), rad.sin())
            }),
        }
    }

    /// Per-cable force for the planar force (fx, fy)
    pub fn project(&self, fx: f32, fy: f32) -> [f32; MOTOR_COUNT] {
        self.directions.map(|(cos_a, sin_a)| cos_a * fx + sin_a * fy)
    }
}

/// Inverted PWM for a drive fraction: 0 -> 2047 (zero drive), 1 -> 1 (full)
pub fn percentage_to_pwm(percentage: f32) -> u16 {
    if !percentage.is_finite() {
        return PWM_ZERO_DRIVE;
    }
    let pwm = (PWM_ZERO_DRIVE as f32 - percentage * PWM_SPAN).round();
    pwm.clamp(PWM_FULL_DRIVE as f32, PWM_ZERO_DRIVE as f32) as u16
}

/// Encoder counts to output shaft angle in degrees
pub fn encoder_to_degrees(counts: i32, counts_per_rev: f32) -> f32 {
    if counts_per_rev <= 0.0 {
        return 0.0;
    }
    counts as f32 * 360.0 / counts_per_rev
}
