// Trajectory generation and impedance control for the haptic ring
//
// Provides:
// - Rolling minimum-jerk reference per axis
// - Cable geometry and force -> current -> PWM conversion
// - Impedance controller producing the per-tick command frame

mod impedance;
pub mod mapping;
pub mod trajectory;

pub use impedance::{AxisOutput, ImpedanceController};
pub use mapping::{CableGeometry, MotorModel, encoder_to_degrees, percentage_to_pwm};
pub use trajectory::{MinimumJerk, Reference};
