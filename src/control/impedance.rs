// Impedance controller: filtered telemetry -> per-motor command frame
//
// Per tick:
// 1. Each axis follows its own minimum-jerk reference towards the neutral pose
// 2. force = Kp * angle error + Kd * rate error + Ki * bounded integral
// 3. The planar force is projected onto the three cables
// 4. Force -> current -> drive percentage, tension baseline, ramp-up
// 5. Safety clamp on motors past their captured angle limit
// 6. Percentage -> inverted PWM (zero drive unless the state is DrivingPwm)

use tracing::{debug, info, warn};

use super::mapping::{CableGeometry, MotorModel, encoder_to_degrees, percentage_to_pwm};
use super::trajectory::{MinimumJerk, Reference};
use crate::config::{ControllerConfig, MOTOR_COUNT};
use crate::context::{CommandFrame, Gains, GainChannel, HostContext};

/// One axis of the impedance law
#[derive(Debug, Clone)]
struct AxisController {
    trajectory: MinimumJerk,
    integral: f32,
    integral_limit: f32,
    /// Gains used for positive / negative error
    positive: GainChannel,
    negative: GainChannel,
}

impl AxisController {
    fn new(config: &ControllerConfig, positive: GainChannel, negative: GainChannel) -> Self {
        Self {
            trajectory: MinimumJerk::new(config.trajectory_duration_s),
            integral: 0.0,
            integral_limit: config.integral_limit.abs(),
            positive,
            negative,
        }
    }

    fn reset(&mut self) {
        self.trajectory.reset();
        self.integral = 0.0;
    }

    fn force(&mut self, ctx: &HostContext, measured: f32, measured_rate: f32, now_s: f64, dt: f32) -> AxisOutput {
        let reference = self.trajectory.sample(measured, now_s);
        let error = reference.value - measured;
        let rate_error = reference.rate - measured_rate;

        let channel = if error >= 0.0 { self.positive } else { self.negative };
        let Gains { kp, ki, kd } = ctx.gains.get(channel);

        self.integral = (self.integral + error * dt).clamp(-self.integral_limit, self.integral_limit);

        let force = kp * error + kd * rate_error + ki * self.integral;
        AxisOutput {
            reference,
            error,
            force: if force.is_finite() { force } else { 0.0 },
        }
    }
}

/// Per-axis result of one controller tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisOutput {
    pub reference: Reference,
    pub error: f32,
    pub force: f32,
}

pub struct ImpedanceController {
    config: ControllerConfig,
    geometry: CableGeometry,
    motor: MotorModel,
    abduction: AxisController,
    flexion: AxisController,
    enabled_at_s: Option<f64>,
    last_tick_s: Option<f64>,
    limit_tripped: [bool; MOTOR_COUNT],
    last_axes: Option<(AxisOutput, AxisOutput)>,
}

impl ImpedanceController {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            config: config.clone(),
            geometry: CableGeometry::new(config.cable_angles_deg),
            motor: MotorModel::from_config(config),
            abduction: AxisController::new(config, GainChannel::Abduction, GainChannel::Adduction),
            flexion: AxisController::new(config, GainChannel::Flexion, GainChannel::Extension),
            enabled_at_s: None,
            last_tick_s: None,
            limit_tripped: [false; MOTOR_COUNT],
            last_axes: None,
        }
    }

    /// Drive multiplier rising linearly from 0 to 1 after the amplifier is enabled
    pub fn ramp(&self, now_s: f64) -> f32 {
        match self.enabled_at_s {
            None => 0.0,
            Some(_) if self.config.ramp_up_s <= 0.0 => 1.0,
            Some(start) => (((now_s - start) as f32) / self.config.ramp_up_s).clamp(0.0, 1.0),
        }
    }

    /// (abduction, flexion) outputs of the most recent tick
    pub fn last_axes(&self) -> Option<(AxisOutput, AxisOutput)> {
        self.last_axes
    }

    /// Compute this tick's command frame
    pub fn update(&mut self, ctx: &HostContext, now_s: f64) -> CommandFrame {
        let driving = ctx.state.is_driving();
        match (driving, self.enabled_at_s) {
            (true, None) => {
                info!(
                    "Amplifier enabled, ramping drive over {:.1}s",
                    self.config.ramp_up_s
                );
                self.enabled_at_s = Some(now_s);
                self.abduction.reset();
                self.flexion.reset();
            }
            (false, Some(_)) => {
                debug!("Drive disabled, controller idle");
                self.enabled_at_s = None;
            }
            _ => {}
        }

        let dt = self
            .last_tick_s
            .map(|last| (now_s - last) as f32)
            .filter(|dt| dt.is_finite() && *dt > 0.0)
            .unwrap_or(0.0);
        self.last_tick_s = Some(now_s);

        let mut frame = CommandFrame {
            tension_baseline: self.config.tension_baseline,
            limit_deg: ctx.limits.angles(),
            ..CommandFrame::default()
        };

        if !driving {
            self.last_axes = None;
            return frame;
        }

        let (fx, fy) = if ctx.tension_only || !ctx.telemetry.is_filtered {
            self.last_axes = None;
            (0.0, 0.0)
        } else {
            let t = &ctx.telemetry;
            let abduction = self.abduction.force(
                ctx,
                t.abduction_angle_deg,
                t.abduction_angular_velocity_deg,
                now_s,
                dt,
            );
            let flexion = self.flexion.force(ctx, t.angle_filtered_deg, t.angular_velocity_deg, now_s, dt);
            self.last_axes = Some((abduction, flexion));
            (abduction.force, flexion.force)
        };

        let cable_forces = self.geometry.project(fx, fy);
        let ramp = self.ramp(now_s);

        for motor in 0..MOTOR_COUNT {
            let baseline = if ctx.tension_only {
                self.config.tension_baseline[motor]
            } else {
                0.0
            };
            let mut percentage =
                ((self.motor.force_to_percentage(cable_forces[motor]) + baseline) * ramp).clamp(0.0, 1.0);

            let angle = encoder_to_degrees(
                ctx.feedback.measured_encoder[motor],
                self.config.encoder_counts_per_rev,
            );
            let tripped = ctx.limits.is_exceeded(motor, angle);
            if tripped {
                percentage = 0.0;
            }
            if tripped != self.limit_tripped[motor] {
                if tripped {
                    warn!(
                        "Motor {} at {:.1} deg exceeds limit {:.1} deg, drive cut",
                        motor, angle, ctx.limits.motors[motor].angle_limit_deg
                    );
                } else {
                    info!("Motor {} back within its angle limit", motor);
                }
                self.limit_tripped[motor] = tripped;
            }

            frame.percentage[motor] = percentage;
            frame.pwm[motor] = percentage_to_pwm(percentage);
        }

        frame
    }
}
