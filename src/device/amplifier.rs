// Amplifier driver: the body of the device's fixed-period interrupt
//
// Reads the latest decoded host command from the command mailbox, acts on the
// device's own copy of the system state, and publishes a telemetry snapshot
// for the serial service to echo back. Drive is applied only while the state
// is DrivingPwm and both the software enable and the hardware interlock hold.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::mailbox::DoubleBuffer;
use crate::config::{DeviceConfig, MOTOR_COUNT, PWM_ZERO_DRIVE};
use crate::protocol::PacketKind;
use crate::state::SystemState;

/// Hardware the driver talks to (PWM outputs, enable line, encoders, current sense)
pub trait AmplifierHal: Send {
    fn set_pwm(&mut self, pwm: [u16; MOTOR_COUNT]);
    fn set_amplifier_enable(&mut self, enabled: bool);
    /// Hardware safety interlock input
    fn interlock_asserted(&self) -> bool;
    fn read_encoders(&mut self) -> [i32; MOTOR_COUNT];
    /// Motor currents in mA
    fn read_currents(&mut self) -> [i16; MOTOR_COUNT];
    fn zero_encoders(&mut self);
}

/// A decoded host command as handed from the serial service to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveCommand {
    /// Incremented for every decoded packet; 0 = nothing received yet
    pub sequence: u32,
    pub kind: PacketKind,
    pub counter: u8,
    pub pwm: [u16; MOTOR_COUNT],
}

impl Default for DriveCommand {
    fn default() -> Self {
        Self {
            sequence: 0,
            kind: PacketKind::Idle,
            counter: 0,
            pwm: [PWM_ZERO_DRIVE; MOTOR_COUNT],
        }
    }
}

/// What the driver applied and measured on its last tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceTelemetry {
    pub state: SystemState,
    pub amplifier_enabled: bool,
    pub pwm: [u16; MOTOR_COUNT],
    pub current: [i16; MOTOR_COUNT],
    pub encoder: [i32; MOTOR_COUNT],
    pub tick: u64,
}

/// Mailboxes shared by the interrupt and the serial service loop
#[derive(Default)]
pub struct DeviceShared {
    pub commands: DoubleBuffer<DriveCommand>,
    pub telemetry: DoubleBuffer<DeviceTelemetry>,
}

impl DeviceShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            commands: DoubleBuffer::new(DriveCommand::default()),
            telemetry: DoubleBuffer::new(DeviceTelemetry {
                state: SystemState::Idle,
                pwm: [PWM_ZERO_DRIVE; MOTOR_COUNT],
                ..DeviceTelemetry::default()
            }),
        })
    }
}

pub struct AmplifierDriver<H: AmplifierHal> {
    hal: H,
    shared: Arc<DeviceShared>,
    config: DeviceConfig,
    state: SystemState,
    software_enable: bool,
    last_sequence: u32,
    ticks_since_command: u32,
    timed_out: bool,
    drive_blocked: bool,
    encoder_tripped: [bool; MOTOR_COUNT],
    tick: u64,
}

impl<H: AmplifierHal> AmplifierDriver<H> {
    pub fn new(hal: H, shared: Arc<DeviceShared>, config: DeviceConfig) -> Self {
        Self {
            hal,
            shared,
            config,
            state: SystemState::Idle,
            software_enable: false,
            last_sequence: 0,
            ticks_since_command: 0,
            timed_out: false,
            drive_blocked: false,
            encoder_tripped: [false; MOTOR_COUNT],
            tick: 0,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    /// Local software enable, the first half of the drive interlock
    pub fn set_software_enable(&mut self, enabled: bool) {
        if self.software_enable != enabled {
            info!("Device software enable {}", if enabled { "set" } else { "cleared" });
        }
        self.software_enable = enabled;
    }

    fn transition(&mut self, next: SystemState) {
        if self.state != next {
            info!("Device state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Take the newest decoded command, or run the command watchdog
    fn poll_command(&mut self) -> DriveCommand {
        let command = self.shared.commands.read();

        if command.sequence != self.last_sequence {
            self.last_sequence = command.sequence;
            self.ticks_since_command = 0;
            if self.timed_out {
                info!("Host commands resumed");
                self.timed_out = false;
            }
            self.transition(SystemState::from_packet_kind(command.kind));
        } else {
            self.ticks_since_command = self.ticks_since_command.saturating_add(1);
            if !self.timed_out && self.ticks_since_command > self.config.command_timeout_ticks {
                if self.state != SystemState::Idle {
                    warn!(
                        "No host command for {} ticks, falling back to Idle",
                        self.ticks_since_command
                    );
                }
                self.timed_out = true;
                self.transition(SystemState::Idle);
            }
        }
        command
    }

    /// Device-side clamp, applied regardless of what the host already clamped
    fn clamp_pwm(&self, pwm: u16) -> u16 {
        let low = self.config.pwm_min.min(self.config.pwm_max);
        let high = self.config.pwm_min.max(self.config.pwm_max);
        pwm.clamp(low, high)
    }

    fn apply_drive(&mut self, command: &DriveCommand, encoders: &[i32; MOTOR_COUNT]) -> (bool, [u16; MOTOR_COUNT]) {
        let allowed = self.software_enable && self.hal.interlock_asserted();
        if allowed == self.drive_blocked {
            if allowed {
                info!("Drive enabled");
            } else {
                warn!(
                    "Drive blocked (software enable {}, interlock {})",
                    self.software_enable,
                    self.hal.interlock_asserted()
                );
            }
            self.drive_blocked = !allowed;
        }
        if !allowed {
            return (false, [PWM_ZERO_DRIVE; MOTOR_COUNT]);
        }

        let mut pwm = [PWM_ZERO_DRIVE; MOTOR_COUNT];
        for motor in 0..MOTOR_COUNT {
            let tripped = self
                .config
                .encoder_limit_counts
                .is_some_and(|limits| encoders[motor].unsigned_abs() > limits[motor].unsigned_abs());
            if tripped != self.encoder_tripped[motor] {
                if tripped {
                    warn!("Motor {} encoder at {} counts, past device limit", motor, encoders[motor]);
                } else {
                    info!("Motor {} back within device limit", motor);
                }
                self.encoder_tripped[motor] = tripped;
            }
            if !tripped {
                pwm[motor] = self.clamp_pwm(command.pwm[motor]);
            }
        }
        (true, pwm)
    }

    /// One interrupt period
    pub fn tick(&mut self) {
        self.tick += 1;
        let command = self.poll_command();

        let mut encoders = self.hal.read_encoders();
        let currents = self.hal.read_currents();

        let (enabled, pwm) = match self.state {
            SystemState::Idle | SystemState::Waiting => (false, [PWM_ZERO_DRIVE; MOTOR_COUNT]),
            SystemState::DrivingPwm => self.apply_drive(&command, &encoders),
            // Sampling only, outputs held at zero drive
            SystemState::MeasuringLimits | SystemState::MeasuringCurrent => {
                (false, [PWM_ZERO_DRIVE; MOTOR_COUNT])
            }
            SystemState::ZeroEncoder => {
                self.hal.zero_encoders();
                encoders = self.hal.read_encoders();
                debug!("Encoders zeroed");
                self.transition(SystemState::Idle);
                (false, [PWM_ZERO_DRIVE; MOTOR_COUNT])
            }
        };

        if !self.state.is_driving() {
            self.drive_blocked = false;
        }

        // Enable low before outputs change, raised only after they are set
        if !enabled {
            self.hal.set_amplifier_enable(false);
        }
        self.hal.set_pwm(pwm);
        if enabled {
            self.hal.set_amplifier_enable(true);
        }

        self.shared.telemetry.write(DeviceTelemetry {
            state: self.state,
            amplifier_enabled: enabled,
            pwm,
            current: currents,
            encoder: encoders,
            tick: self.tick,
        });
    }
}

impl<H: AmplifierHal> Drop for AmplifierDriver<H> {
    fn drop(&mut self) {
        self.hal.set_amplifier_enable(false);
        self.hal.set_pwm([PWM_ZERO_DRIVE; MOTOR_COUNT]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeHal {
        pwm: [u16; MOTOR_COUNT],
        enabled: bool,
        interlock: bool,
        encoders: [i32; MOTOR_COUNT],
        zero_calls: u32,
    }

    impl AmplifierHal for FakeHal {
        fn set_pwm(&mut self, pwm: [u16; MOTOR_COUNT]) {
            self.pwm = pwm;
        }
        fn set_amplifier_enable(&mut self, enabled: bool) {
            self.enabled = enabled;
        }
        fn interlock_asserted(&self) -> bool {
            self.interlock
        }
        fn read_encoders(&mut self) -> [i32; MOTOR_COUNT] {
            self.encoders
        }
        fn read_currents(&mut self) -> [i16; MOTOR_COUNT] {
            [100, 200, 300]
        }
        fn zero_encoders(&mut self) {
            self.encoders = [0; MOTOR_COUNT];
            self.zero_calls += 1;
        }
    }

    fn driver(interlock: bool, config: DeviceConfig) -> AmplifierDriver<FakeHal> {
        let hal = FakeHal {
            interlock,
            ..FakeHal::default()
        };
        let mut driver = AmplifierDriver::new(hal, DeviceShared::new(), config);
        driver.set_software_enable(true);
        driver
    }

    fn send(driver: &AmplifierDriver<FakeHal>, kind: PacketKind, pwm: [u16; MOTOR_COUNT]) {
        let previous = driver.shared.commands.read();
        driver.shared.commands.write(DriveCommand {
            sequence: previous.sequence + 1,
            kind,
            counter: previous.counter.wrapping_add(1),
            pwm,
        });
    }

    #[test]
    fn test_starts_idle_with_zero_drive() {
        let mut driver = driver(true, DeviceConfig::default());
        driver.tick();
        assert_eq!(driver.state(), SystemState::Idle);
        assert_eq!(driver.hal().pwm, [PWM_ZERO_DRIVE; MOTOR_COUNT]);
        assert!(!driver.hal().enabled);
    }

    #[test]
    fn test_drive_needs_enable_and_interlock() {
        let mut driver = driver(false, DeviceConfig::default());
        send(&driver, PacketKind::Drive, [1500, 1000, 2047]);
        driver.tick();
        assert_eq!(driver.state(), SystemState::DrivingPwm);
        assert_eq!(driver.hal().pwm, [PWM_ZERO_DRIVE; MOTOR_COUNT]);

        driver.hal_mut().interlock = true;
        driver.tick();
        assert_eq!(driver.hal().pwm, [1500, 1000, 2047]);
        assert!(driver.hal().enabled);

        driver.set_software_enable(false);
        driver.tick();
        assert_eq!(driver.hal().pwm, [PWM_ZERO_DRIVE; MOTOR_COUNT]);
        assert!(!driver.hal().enabled);
    }

    #[test]
    fn test_device_clamps_pwm() {
        let mut driver = driver(true, DeviceConfig {
            pwm_min: 600,
            pwm_max: 2047,
            ..DeviceConfig::default()
        });
        send(&driver, PacketKind::Drive, [1, 599, 1200]);
        driver.tick();
        assert_eq!(driver.hal().pwm, [600, 600, 1200]);
    }

    #[test]
    fn test_encoder_limit_cuts_one_motor() {
        let mut driver = driver(true, DeviceConfig {
            encoder_limit_counts: Some([1000, 1000, 1000]),
            ..DeviceConfig::default()
        });
        driver.hal_mut().encoders = [-1500, 500, 0];
        send(&driver, PacketKind::Drive, [1000, 1000, 1000]);
        driver.tick();
        assert_eq!(driver.hal().pwm, [PWM_ZERO_DRIVE, 1000, 1000]);
    }

    #[test]
    fn test_zero_encoder_is_one_shot() {
        let mut driver = driver(true, DeviceConfig::default());
        driver.hal_mut().encoders = [10, 20, 30];
        send(&driver, PacketKind::ZeroEncoder, [PWM_ZERO_DRIVE; MOTOR_COUNT]);
        driver.tick();
        assert_eq!(driver.state(), SystemState::Idle);
        assert_eq!(driver.shared.telemetry.read().encoder, [0; MOTOR_COUNT]);

        // The same (stale) command does not zero again
        driver.hal_mut().encoders = [5, 5, 5];
        driver.tick();
        driver.tick();
        assert_eq!(driver.hal().zero_calls, 1);
    }

    #[test]
    fn test_measuring_holds_zero_drive() {
        let mut driver = driver(true, DeviceConfig::default());
        send(&driver, PacketKind::Drive, [1000; MOTOR_COUNT]);
        driver.tick();
        send(&driver, PacketKind::MeasureCurrent, [1000; MOTOR_COUNT]);
        driver.tick();
        assert_eq!(driver.state(), SystemState::MeasuringCurrent);
        assert_eq!(driver.hal().pwm, [PWM_ZERO_DRIVE; MOTOR_COUNT]);
        assert_eq!(driver.shared.telemetry.read().current, [100, 200, 300]);
    }

    #[test]
    fn test_command_timeout_falls_back_to_idle() {
        let mut driver = driver(true, DeviceConfig {
            command_timeout_ticks: 5,
            ..DeviceConfig::default()
        });
        send(&driver, PacketKind::Drive, [1000; MOTOR_COUNT]);
        for _ in 0..6 {
            driver.tick();
        }
        assert_eq!(driver.state(), SystemState::DrivingPwm);
        driver.tick();
        assert_eq!(driver.state(), SystemState::Idle);
        assert_eq!(driver.hal().pwm, [PWM_ZERO_DRIVE; MOTOR_COUNT]);

        send(&driver, PacketKind::Drive, [1000; MOTOR_COUNT]);
        driver.tick();
        assert_eq!(driver.state(), SystemState::DrivingPwm);
    }
}
