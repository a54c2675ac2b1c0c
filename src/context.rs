// Process-wide host context
//
// One struct owned by the host loop and handed by reference to each component.
// Every field has exactly one writer:
// - telemetry: marker estimator
// - command: impedance controller
// - feedback, link: serial driver
// - state, gains, limits, mode flags: command dispatcher / host state machine

use serde::{Deserialize, Serialize};

use crate::config::{MOTOR_COUNT, PWM_ZERO_DRIVE};
use crate::protocol::DecoderStats;
use crate::state::{SafetyLimits, SystemState};

/// Filtered marker state for one tracking cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub position_raw_mm: [f32; 3],
    pub position_filtered_mm: [f32; 3],
    pub velocity_filtered_mm: [f32; 3],
    /// Flexion/extension joint angle
    pub angle_filtered_deg: f32,
    pub angular_velocity_deg: f32,
    /// Abduction/adduction joint angle
    pub abduction_angle_deg: f32,
    pub abduction_angular_velocity_deg: f32,
    pub timestamp_s: f64,
    /// False until the filters have run at least one update after initialising
    pub is_filtered: bool,
}

/// PID gains for one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Gains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }

    pub fn term_mut(&mut self, term: GainTerm) -> &mut f32 {
        match term {
            GainTerm::Kp => &mut self.kp,
            GainTerm::Ki => &mut self.ki,
            GainTerm::Kd => &mut self.kd,
        }
    }
}

impl Default for Gains {
    fn default() -> Self {
        Self::new(0.1, 0.0, 0.005)
    }
}

/// Direction of finger motion a gain set applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainChannel {
    Abduction,
    Adduction,
    Flexion,
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainTerm {
    Kp,
    Ki,
    Kd,
}

/// Gains for the four motion directions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerGains {
    pub abduction: Gains,
    pub adduction: Gains,
    pub flexion: Gains,
    pub extension: Gains,
}

impl ControllerGains {
    pub fn get(&self, channel: GainChannel) -> Gains {
        match channel {
            GainChannel::Abduction => self.abduction,
            GainChannel::Adduction => self.adduction,
            GainChannel::Flexion => self.flexion,
            GainChannel::Extension => self.extension,
        }
    }

    pub fn get_mut(&mut self, channel: GainChannel) -> &mut Gains {
        match channel {
            GainChannel::Abduction => &mut self.abduction,
            GainChannel::Adduction => &mut self.adduction,
            GainChannel::Flexion => &mut self.flexion,
            GainChannel::Extension => &mut self.extension,
        }
    }
}

/// Per-tick motor command produced by the controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Commanded drive per motor, 0..1
    pub percentage: [f32; MOTOR_COUNT],
    /// Inverted PWM, 1..2047 (2047 = zero drive)
    pub pwm: [u16; MOTOR_COUNT],
    pub tension_baseline: [f32; MOTOR_COUNT],
    pub limit_deg: [f32; MOTOR_COUNT],
}

impl Default for CommandFrame {
    fn default() -> Self {
        Self {
            percentage: [0.0; MOTOR_COUNT],
            pwm: [PWM_ZERO_DRIVE; MOTOR_COUNT],
            tension_baseline: [0.0; MOTOR_COUNT],
            limit_deg: [0.0; MOTOR_COUNT],
        }
    }
}

/// Latest values echoed back by the amplifier controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceFeedback {
    /// Raw type byte of the last telemetry frame (lowercase ack)
    pub packet_type: u8,
    pub counter: u8,
    pub amplifier_enabled: bool,
    pub measured_pwm: [u16; MOTOR_COUNT],
    /// Motor current in mA
    pub measured_current: [i16; MOTOR_COUNT],
    pub measured_encoder: [i32; MOTOR_COUNT],
    /// Host tick on which this feedback arrived
    pub received_tick: u64,
}

/// Health of the serial link as seen from the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkHealth {
    pub port_open: bool,
    pub responding: bool,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub counter_gaps: u64,
    pub ticks_since_valid: u32,
    pub decoder: DecoderStats,
}

/// Everything the host loop shares between its components
#[derive(Debug, Clone)]
pub struct HostContext {
    pub state: SystemState,
    pub telemetry: Telemetry,
    pub gains: ControllerGains,
    pub limits: SafetyLimits,
    pub command: CommandFrame,
    pub feedback: DeviceFeedback,
    pub link: LinkHealth,
    /// Apply only the cable pretension, no impedance force
    pub tension_only: bool,
    pub sending: bool,
    pub receiving: bool,
    /// Gain currently targeted by increment/decrement
    pub selected_gain: (GainChannel, GainTerm),
    pub tick: u64,
}

impl HostContext {
    pub fn new(gains: ControllerGains) -> Self {
        Self {
            state: SystemState::Idle,
            telemetry: Telemetry::default(),
            gains,
            limits: SafetyLimits::default(),
            command: CommandFrame::default(),
            feedback: DeviceFeedback::default(),
            link: LinkHealth::default(),
            tension_only: false,
            sending: true,
            receiving: true,
            selected_gain: (GainChannel::Flexion, GainTerm::Kp),
            tick: 0,
        }
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new(ControllerGains::default())
    }
}
