// Loop rates, topics, link parameters, motor and controller constants
//
// Compile-time defaults live here as constants. `RuntimeConfig` groups them
// into sections that can be overridden from a JSON file and from the CLI.

use std::path::Path;

use serde::{Deserialize, Serialize};

// Host loop frequency
pub const LOOP_HZ: u64 = 100;
// Above this the tick period rounds to zero microseconds
pub const MAX_LOOP_HZ: u64 = 1_000_000;

// Zenoh topics
pub const TOPIC_MARKER: &str = "haptic/tracker/marker"; // raw marker samples from the fiducial tracker
pub const TOPIC_OPERATOR: &str = "haptic/cmd/operator"; // operator commands
pub const TOPIC_TELEMETRY: &str = "haptic/state/telemetry"; // telemetry for display/logging
pub const TOPIC_HEALTH: &str = "haptic/state/health"; // link health

// Serial port for the amplifier controller
pub const SERIAL_PORT: &str = "/dev/ttyACM0";
pub const SERIAL_BAUDRATE: u32 = 115_200;

// Rolling packet counter wraps at this value
pub const COUNTER_MODULUS: u8 = 100;

// Host clears its "responding" flag after this many ticks without a valid frame
pub const LINK_TIMEOUT_TICKS: u32 = 50;

// PWM scale is inverted: 2047 = zero drive, 1 = full drive
pub const PWM_ZERO_DRIVE: u16 = 2047;
pub const PWM_FULL_DRIVE: u16 = 1;
pub const PWM_SPAN: f32 = 2046.0;

// Motor and spool
pub const MOTOR_COUNT: usize = 3;
pub const TORQUE_CONSTANT_NM_PER_A: f32 = 0.0302;
pub const SPOOL_RADIUS_M: f32 = 0.0075;
pub const NOMINAL_CURRENT_A: f32 = 1.2;
pub const ENCODER_COUNTS_PER_REV: f32 = 2048.0;

// Cable directions in the finger plane (degrees)
pub const CABLE_ANGLES_DEG: [f32; MOTOR_COUNT] = [35.0, 145.0, 270.0];

// Controller timing
pub const TRAJECTORY_DURATION_S: f32 = 1.0;
pub const RAMP_UP_S: f32 = 2.0;
pub const INTEGRAL_LIMIT: f32 = 50.0;
pub const TENSION_BASELINE: f32 = 0.08;

// Gain adjustment step for operator increment/decrement
pub const GAIN_STEP: f32 = 0.01;

// Device-side timing (documented firmware rates)
pub const DEVICE_DRIVER_HZ: u64 = 1000;
pub const DEVICE_SERIAL_HZ: u64 = 100;
pub const COMMAND_TIMEOUT_TICKS: u32 = 250;

/// Error loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    pub sending: bool,
    pub receiving: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: SERIAL_PORT.to_string(),
            baudrate: SERIAL_BAUDRATE,
            sending: true,
            receiving: true,
        }
    }
}

/// Link-health policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub timeout_ticks: u32,
    pub counter_modulus: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            timeout_ticks: LINK_TIMEOUT_TICKS,
            counter_modulus: COUNTER_MODULUS,
        }
    }
}

/// Noise parameters for one constant-velocity Kalman filter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterNoise {
    /// Added to each position variance per predict step
    pub position_process: f32,
    /// Added to each velocity variance per predict step
    pub velocity_process: f32,
    pub measurement: f32,
    pub initial_covariance: f32,
}

impl Default for FilterNoise {
    fn default() -> Self {
        Self {
            position_process: 0.01,
            velocity_process: 5.0,
            measurement: 0.5,
            initial_covariance: 100.0,
        }
    }
}

/// Marker estimator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub position: FilterNoise,
    pub angle: FilterNoise,
    /// Marker position (mm) at which both joint angles are zero
    pub neutral_position_mm: [f32; 3],
    /// Distance from the finger joint to the marker (mm)
    pub pivot_distance_mm: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            position: FilterNoise::default(),
            angle: FilterNoise::default(),
            neutral_position_mm: [0.0; 3],
            pivot_distance_mm: 60.0,
        }
    }
}

/// Trajectory, impedance and motor-command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub trajectory_duration_s: f32,
    pub ramp_up_s: f32,
    pub integral_limit: f32,
    pub cable_angles_deg: [f32; MOTOR_COUNT],
    pub torque_constant: f32,
    pub spool_radius_m: f32,
    pub nominal_current_a: f32,
    pub encoder_counts_per_rev: f32,
    pub tension_baseline: [f32; MOTOR_COUNT],
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            trajectory_duration_s: TRAJECTORY_DURATION_S,
            ramp_up_s: RAMP_UP_S,
            integral_limit: INTEGRAL_LIMIT,
            cable_angles_deg: CABLE_ANGLES_DEG,
            torque_constant: TORQUE_CONSTANT_NM_PER_A,
            spool_radius_m: SPOOL_RADIUS_M,
            nominal_current_a: NOMINAL_CURRENT_A,
            encoder_counts_per_rev: ENCODER_COUNTS_PER_REV,
            tension_baseline: [TENSION_BASELINE; MOTOR_COUNT],
        }
    }
}

/// Limits the embedded side enforces on its own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub pwm_min: u16,
    pub pwm_max: u16,
    /// Per-motor |encoder| cutoff in counts; `None` disables the cutoff
    pub encoder_limit_counts: Option<[i32; MOTOR_COUNT]>,
    pub command_timeout_ticks: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            pwm_min: PWM_FULL_DRIVE,
            pwm_max: PWM_ZERO_DRIVE,
            encoder_limit_counts: None,
            command_timeout_ticks: COMMAND_TIMEOUT_TICKS,
        }
    }
}

/// Complete host runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub loop_hz: Option<u64>,
    pub serial: SerialConfig,
    pub link: LinkConfig,
    pub filter: FilterConfig,
    pub controller: ControllerConfig,
    pub device: DeviceConfig,
    pub gains: crate::context::ControllerGains,
}

impl RuntimeConfig {
    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn loop_hz(&self) -> u64 {
        self.loop_hz.unwrap_or(LOOP_HZ).clamp(1, MAX_LOOP_HZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let json = r#"{ "serial": { "port": "/dev/ttyUSB1" }, "loop_hz": 60 }"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB1");
        assert_eq!(config.serial.baudrate, SERIAL_BAUDRATE);
        assert_eq!(config.loop_hz(), 60);
        assert_eq!(config.controller.cable_angles_deg, CABLE_ANGLES_DEG);
        assert_eq!(config.device.pwm_max, PWM_ZERO_DRIVE);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.loop_hz(), LOOP_HZ);
        assert_eq!(config.link.timeout_ticks, LINK_TIMEOUT_TICKS);
        assert!(config.serial.sending && config.serial.receiving);
    }

    #[test]
    fn test_loop_rate_clamped() {
        let mut config = RuntimeConfig::default();
        config.loop_hz = Some(0);
        assert_eq!(config.loop_hz(), 1);
        config.loop_hz = Some(u64::MAX);
        assert_eq!(config.loop_hz(), MAX_LOOP_HZ);
        assert!(1_000_000 / config.loop_hz() > 0);
    }
}
