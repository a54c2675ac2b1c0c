// Simulated amplifier controller
//
// Stands in for the embedded board: a crude motor model behind the HAL trait,
// an "interrupt" thread running the amplifier driver at 1 kHz and a main-loop
// thread servicing the serial link at 100 Hz. The two threads share nothing
// except the device mailboxes.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::amplifier::{AmplifierDriver, AmplifierHal, DeviceShared};
use super::link::DeviceLink;
use crate::config::{DEVICE_DRIVER_HZ, DEVICE_SERIAL_HZ, DeviceConfig, MOTOR_COUNT, PWM_SPAN, PWM_ZERO_DRIVE};

// Steady-state encoder deflection at full drive
const FULL_DRIVE_COUNTS: f32 = 400.0;
// Fraction of the remaining deflection covered per driver tick
const RESPONSE_PER_TICK: f32 = 0.02;
const FULL_DRIVE_CURRENT_MA: f32 = 1200.0;

/// First-order motor/spool model driven by the PWM outputs
#[derive(Debug, Clone)]
pub struct SimulatedAmplifier {
    pwm: [u16; MOTOR_COUNT],
    enabled: bool,
    interlock: bool,
    position: [f32; MOTOR_COUNT],
    offset: [i32; MOTOR_COUNT],
}

impl SimulatedAmplifier {
    pub fn new() -> Self {
        Self {
            pwm: [PWM_ZERO_DRIVE; MOTOR_COUNT],
            enabled: false,
            interlock: true,
            position: [0.0; MOTOR_COUNT],
            offset: [0; MOTOR_COUNT],
        }
    }

    pub fn set_interlock(&mut self, asserted: bool) {
        self.interlock = asserted;
    }

    /// Applied drive per motor, 0..1
    pub fn drive(&self) -> [f32; MOTOR_COUNT] {
        let mut drive = [0.0; MOTOR_COUNT];
        if self.enabled {
            for (d, &pwm) in drive.iter_mut().zip(&self.pwm) {
                *d = (f32::from(PWM_ZERO_DRIVE.saturating_sub(pwm)) / PWM_SPAN).clamp(0.0, 1.0);
            }
        }
        drive
    }

    /// Advance the motor model by one driver tick
    pub fn step(&mut self) {
        let drive = self.drive();
        for (position, d) in self.position.iter_mut().zip(drive) {
            *position += (d * FULL_DRIVE_COUNTS - *position) * RESPONSE_PER_TICK;
        }
    }
}

impl Default for SimulatedAmplifier {
    fn default() -> Self {
        Self::new()
    }
}

impl AmplifierHal for SimulatedAmplifier {
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
        let mut counts = [0; MOTOR_COUNT];
        for ((c, &p), &o) in counts.iter_mut().zip(&self.position).zip(&self.offset) {
            *c = p.round() as i32 - o;
        }
        counts
    }

    fn read_currents(&mut self) -> [i16; MOTOR_COUNT] {
        let mut current = [0; MOTOR_COUNT];
        for (c, d) in current.iter_mut().zip(self.drive()) {
            *c = (d * FULL_DRIVE_CURRENT_MA).round() as i16;
        }
        current
    }

    fn zero_encoders(&mut self) {
        for (o, &p) in self.offset.iter_mut().zip(&self.position) {
            *o = p.round() as i32;
        }
    }
}

/// Handle to a running simulated device; stops both loops when dropped
pub struct SimulatedDevice {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl SimulatedDevice {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("Simulated device thread panicked");
            }
        }
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_periodic(running: &AtomicBool, hz: u64, mut body: impl FnMut()) {
    let period = Duration::from_micros(1_000_000 / hz.max(1));
    let mut next = Instant::now();
    while running.load(Ordering::Acquire) {
        body();
        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }
}

/// Start the device loops on their own threads, talking over `port`
pub fn spawn_simulated_device<T>(port: T, config: DeviceConfig) -> std::io::Result<SimulatedDevice>
where
    T: Read + Write + Send + 'static,
{
    let shared = DeviceShared::new();
    let mut device = SimulatedDevice {
        running: Arc::new(AtomicBool::new(true)),
        threads: Vec::with_capacity(2),
    };

    let mut driver = AmplifierDriver::new(SimulatedAmplifier::new(), Arc::clone(&shared), config);
    driver.set_software_enable(true);
    let running = Arc::clone(&device.running);
    device.threads.push(
        thread::Builder::new()
            .name("device-driver".into())
            .spawn(move || {
                run_periodic(&running, DEVICE_DRIVER_HZ, || {
                    driver.tick();
                    driver.hal_mut().step();
                });
            })?,
    );

    // A failed spawn here drops `device`, which stops the driver thread
    let mut link = DeviceLink::new(port, shared);
    let running = Arc::clone(&device.running);
    device.threads.push(
        thread::Builder::new()
            .name("device-serial".into())
            .spawn(move || {
                let mut error_logged = false;
                run_periodic(&running, DEVICE_SERIAL_HZ, || {
                    if let Err(e) = link.poll() {
                        if !error_logged {
                            warn!("Device link error: {}", e);
                            error_logged = true;
                        }
                    }
                });
            })?,
    );

    info!(
        "Simulated amplifier controller running ({} Hz driver, {} Hz serial)",
        DEVICE_DRIVER_HZ, DEVICE_SERIAL_HZ
    );
    Ok(device)
}
