// Host-side state machine
//
// The host's own view of the system state. Transitions come only from
// operator commands and from per-tick bookkeeping; the device keeps its own
// copy and the two meet only through packets.

use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::{GAIN_STEP, MOTOR_COUNT};
use crate::context::HostContext;
use crate::control::encoder_to_degrees;
use crate::state::SystemState;

pub struct HostStateMachine {
    gain_step: f32,
    counts_per_rev: f32,
}

impl HostStateMachine {
    pub fn new(counts_per_rev: f32) -> Self {
        Self {
            gain_step: GAIN_STEP,
            counts_per_rev,
        }
    }

    pub fn with_gain_step(mut self, step: f32) -> Self {
        self.gain_step = step.abs();
        self
    }

    fn transition(&self, ctx: &mut HostContext, next: SystemState) {
        if ctx.state != next {
            info!("State {:?} -> {:?}", ctx.state, next);
            ctx.state = next;
        }
    }

    /// Apply one operator command
    pub fn apply(&self, ctx: &mut HostContext, command: Command) {
        debug!("Operator command: {:?}", command);
        match command {
            Command::EnableAmplifier => self.transition(ctx, SystemState::DrivingPwm),
            Command::DisableAmplifier => self.transition(ctx, SystemState::Idle),
            Command::StartLimitCapture => {
                ctx.limits.start_measuring();
                self.transition(ctx, SystemState::MeasuringLimits);
            }
            Command::SetLimits => {
                if ctx.limits.is_measuring() {
                    ctx.limits.freeze();
                    info!("Angle limits set: {:?} deg", ctx.limits.angles());
                    self.transition(ctx, SystemState::Idle);
                } else {
                    warn!("No limit capture in progress, ignoring set-limits");
                }
            }
            Command::ClearLimits => {
                ctx.limits.clear();
                info!("Angle limits cleared");
                if ctx.state == SystemState::MeasuringLimits {
                    self.transition(ctx, SystemState::Idle);
                }
            }
            Command::MeasureCurrent => self.transition(ctx, SystemState::MeasuringCurrent),
            Command::ZeroEncoder => self.transition(ctx, SystemState::ZeroEncoder),
            Command::SelectState { state } => match state {
                SystemState::MeasuringLimits => self.apply(ctx, Command::StartLimitCapture),
                SystemState::Waiting => warn!("Waiting cannot be selected"),
                other => self.transition(ctx, other),
            },
            Command::ToggleTensionOnly => {
                ctx.tension_only = !ctx.tension_only;
                info!("Tension-only mode {}", if ctx.tension_only { "on" } else { "off" });
            }
            Command::SelectGain { channel, term } => {
                ctx.selected_gain = (channel, term);
                info!("Selected gain {:?} {:?}", channel, term);
            }
            Command::IncrementGain => self.adjust_gain(ctx, self.gain_step),
            Command::DecrementGain => self.adjust_gain(ctx, -self.gain_step),
            Command::SetSending { enabled } => {
                ctx.sending = enabled;
                info!("Sending {}", if enabled { "enabled" } else { "disabled" });
            }
            Command::SetReceiving { enabled } => {
                ctx.receiving = enabled;
                info!("Receiving {}", if enabled { "enabled" } else { "disabled" });
            }
        }
    }

    fn adjust_gain(&self, ctx: &mut HostContext, delta: f32) {
        let (channel, term) = ctx.selected_gain;
        let value = ctx.gains.get_mut(channel).term_mut(term);
        *value = (*value + delta).max(0.0);
        info!("{:?} {:?} = {:.3}", channel, term, *value);
    }

    /// Fold freshly received device feedback into the limit capture
    pub fn on_feedback(&self, ctx: &mut HostContext) {
        if ctx.state == SystemState::MeasuringLimits && ctx.limits.is_measuring() {
            let mut angles = [0.0f32; MOTOR_COUNT];
            for (angle, &counts) in angles.iter_mut().zip(&ctx.feedback.measured_encoder) {
                *angle = encoder_to_degrees(counts, self.counts_per_rev);
            }
            ctx.limits.observe(angles);
        }
    }

    /// Bookkeeping after the tick's packet went out
    pub fn end_tick(&self, ctx: &mut HostContext) {
        // Zeroing is a one-shot request
        if ctx.state == SystemState::ZeroEncoder {
            self.transition(ctx, SystemState::Idle);
        }
        ctx.tick += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{GainChannel, GainTerm};

    fn machine() -> HostStateMachine {
        HostStateMachine::new(2048.0).with_gain_step(0.5)
    }

    #[test]
    fn test_enable_disable() {
        let machine = machine();
        let mut ctx = HostContext::default();
        assert_eq!(ctx.state, SystemState::Idle);

        machine.apply(&mut ctx, Command::EnableAmplifier);
        assert_eq!(ctx.state, SystemState::DrivingPwm);
        machine.apply(&mut ctx, Command::DisableAmplifier);
        assert_eq!(ctx.state, SystemState::Idle);
    }

    #[test]
    fn test_zero_encoder_returns_to_idle_after_one_tick() {
        let machine = machine();
        let mut ctx = HostContext::default();
        machine.apply(&mut ctx, Command::ZeroEncoder);
        assert_eq!(ctx.state, SystemState::ZeroEncoder);

        machine.end_tick(&mut ctx);
        assert_eq!(ctx.state, SystemState::Idle);
        assert_eq!(ctx.tick, 1);
    }

    #[test]
    fn test_limit_capture_session() {
        let machine = machine();
        let mut ctx = HostContext::default();
        machine.apply(&mut ctx, Command::StartLimitCapture);
        assert_eq!(ctx.state, SystemState::MeasuringLimits);

        ctx.feedback.measured_encoder = [512, -256, 0];
        machine.on_feedback(&mut ctx);
        ctx.feedback.measured_encoder = [100, -512, 128];
        machine.on_feedback(&mut ctx);

        machine.apply(&mut ctx, Command::SetLimits);
        assert_eq!(ctx.state, SystemState::Idle);
        assert_eq!(ctx.limits.angles(), [90.0, 90.0, 22.5]);
        assert!(ctx.limits.motors.iter().all(|m| m.is_limit_set));

        // Feedback outside a capture session leaves the limits alone
        ctx.feedback.measured_encoder = [2048, 2048, 2048];
        machine.on_feedback(&mut ctx);
        assert_eq!(ctx.limits.angles(), [90.0, 90.0, 22.5]);
    }

    #[test]
    fn test_set_limits_without_capture_is_ignored() {
        let machine = machine();
        let mut ctx = HostContext::default();
        machine.apply(&mut ctx, Command::EnableAmplifier);
        machine.apply(&mut ctx, Command::SetLimits);
        assert_eq!(ctx.state, SystemState::DrivingPwm);
        assert!(!ctx.limits.motors[0].is_limit_set);
    }

    #[test]
    fn test_gain_adjustment() {
        let machine = machine();
        let mut ctx = HostContext::default();
        machine.apply(
            &mut ctx,
            Command::SelectGain {
                channel: GainChannel::Adduction,
                term: GainTerm::Ki,
            },
        );
        machine.apply(&mut ctx, Command::IncrementGain);
        machine.apply(&mut ctx, Command::IncrementGain);
        assert_eq!(ctx.gains.adduction.ki, 1.0);

        for _ in 0..5 {
            machine.apply(&mut ctx, Command::DecrementGain);
        }
        assert_eq!(ctx.gains.adduction.ki, 0.0, "gains never go negative");
    }

    #[test]
    fn test_select_state() {
        let machine = machine();
        let mut ctx = HostContext::default();

        machine.apply(&mut ctx, Command::SelectState { state: SystemState::MeasuringLimits });
        assert_eq!(ctx.state, SystemState::MeasuringLimits);
        assert!(ctx.limits.is_measuring());

        machine.apply(&mut ctx, Command::SelectState { state: SystemState::Waiting });
        assert_eq!(ctx.state, SystemState::MeasuringLimits);

        machine.apply(&mut ctx, Command::SelectState { state: SystemState::MeasuringCurrent });
        assert_eq!(ctx.state, SystemState::MeasuringCurrent);
    }

    #[test]
    fn test_link_toggles() {
        let machine = machine();
        let mut ctx = HostContext::default();
        machine.apply(&mut ctx, Command::SetSending { enabled: false });
        machine.apply(&mut ctx, Command::SetReceiving { enabled: false });
        assert!(!ctx.sending && !ctx.receiving);
        machine.apply(&mut ctx, Command::ToggleTensionOnly);
        assert!(ctx.tension_only);
    }
}
