// System state shared (by protocol only) between host and device, and the
// per-motor safety limits captured on the host

use serde::{Deserialize, Serialize};

use crate::config::MOTOR_COUNT;
use crate::protocol::PacketKind;

/// Operating state of the haptic ring
///
/// Host and device each keep their own copy; the two are reconciled only
/// through packets and may disagree for a few ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    /// No packet received yet (device) / link not yet started (host)
    #[default]
    Waiting,
    Idle,
    DrivingPwm,
    MeasuringLimits,
    MeasuringCurrent,
    ZeroEncoder,
}

impl SystemState {
    /// The packet kind that carries this state on the wire
    pub fn packet_kind(self) -> PacketKind {
        match self {
            SystemState::Waiting | SystemState::Idle => PacketKind::Idle,
            SystemState::DrivingPwm => PacketKind::Drive,
            SystemState::MeasuringLimits => PacketKind::MeasureLimits,
            SystemState::MeasuringCurrent => PacketKind::MeasureCurrent,
            SystemState::ZeroEncoder => PacketKind::ZeroEncoder,
        }
    }

    /// The state a decoded packet asks for
    pub fn from_packet_kind(kind: PacketKind) -> Self {
        match kind {
            PacketKind::Idle => SystemState::Idle,
            PacketKind::Drive => SystemState::DrivingPwm,
            PacketKind::MeasureLimits => SystemState::MeasuringLimits,
            PacketKind::MeasureCurrent => SystemState::MeasuringCurrent,
            PacketKind::ZeroEncoder => SystemState::ZeroEncoder,
        }
    }

    pub fn is_driving(self) -> bool {
        self == SystemState::DrivingPwm
    }
}

/// Angle limit for one motor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorLimit {
    pub angle_limit_deg: f32,
    pub is_limit_set: bool,
    pub is_measuring: bool,
}

/// Per-motor angle limits
///
/// Empty on creation, grown while measuring, frozen once set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    pub motors: [MotorLimit; MOTOR_COUNT],
}

impl SafetyLimits {
    /// Start a fresh capture session; previous limits are discarded
    pub fn start_measuring(&mut self) {
        self.motors = [MotorLimit {
            angle_limit_deg: 0.0,
            is_limit_set: false,
            is_measuring: true,
        }; MOTOR_COUNT];
    }

    /// Widen each measuring motor's limit to cover the observed angles
    pub fn observe(&mut self, angles_deg: [f32; MOTOR_COUNT]) {
        for (limit, angle) in self.motors.iter_mut().zip(angles_deg) {
            if limit.is_measuring && !limit.is_limit_set && angle.is_finite() {
                limit.angle_limit_deg = limit.angle_limit_deg.max(angle.abs());
            }
        }
    }

    /// Freeze the captured limits
    pub fn freeze(&mut self) {
        for limit in &mut self.motors {
            if limit.is_measuring {
                limit.is_measuring = false;
                limit.is_limit_set = true;
            }
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_measuring(&self) -> bool {
        self.motors.iter().any(|m| m.is_measuring)
    }

    /// True when motor `index` has a frozen limit that `angle_deg` exceeds
    pub fn is_exceeded(&self, index: usize, angle_deg: f32) -> bool {
        let limit = &self.motors[index];
        limit.is_limit_set && angle_deg.abs() > limit.angle_limit_deg
    }

    pub fn angles(&self) -> [f32; MOTOR_COUNT] {
        self.motors.map(|m| m.angle_limit_deg)
    }
}
