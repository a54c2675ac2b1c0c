// Host <-> device scenarios over an in-memory serial link

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use haptic_ring_runtime::command::Command;
use haptic_ring_runtime::config::{
    ControllerConfig, DeviceConfig, LinkConfig, MOTOR_COUNT, PWM_ZERO_DRIVE, RuntimeConfig,
};
use haptic_ring_runtime::context::HostContext;
use haptic_ring_runtime::control::ImpedanceController;
use haptic_ring_runtime::device::{
    AmplifierDriver, DeviceLink, DeviceShared, SimulatedAmplifier, spawn_simulated_device,
};
use haptic_ring_runtime::host::{HostSerial, HostStateMachine};
use haptic_ring_runtime::link::{self, MemoryPort};
use haptic_ring_runtime::messages::LinkHealthStatus;
use haptic_ring_runtime::protocol::{FrameDecoder, PacketKind, PacketPayload, PacketType, encode_frame};
use haptic_ring_runtime::runtime::Runtime;
use haptic_ring_runtime::state::SystemState;

/// Host side and device side wired back to back, stepped by hand
struct Bench {
    ctx: HostContext,
    machine: HostStateMachine,
    host: HostSerial<MemoryPort>,
    device_link: DeviceLink<MemoryPort>,
    driver: AmplifierDriver<SimulatedAmplifier>,
}

impl Bench {
    fn new(device: DeviceConfig, link: LinkConfig) -> Self {
        let (host_port, device_port) = MemoryPort::pair();
        let shared = DeviceShared::new();
        let mut driver = AmplifierDriver::new(SimulatedAmplifier::new(), Arc::clone(&shared), device);
        driver.set_software_enable(true);
        Self {
            ctx: HostContext::default(),
            machine: HostStateMachine::new(2048.0),
            host: HostSerial::new(host_port, &link),
            device_link: DeviceLink::new(device_port, shared),
            driver,
        }
    }

    /// One host tick with ten device interrupts in between
    fn tick(&mut self) {
        if self.host.tick(&mut self.ctx) > 0 {
            self.machine.on_feedback(&mut self.ctx);
        }
        self.machine.end_tick(&mut self.ctx);
        self.device_link.poll().unwrap();
        for _ in 0..10 {
            self.driver.tick();
            self.driver.hal_mut().step();
        }
    }
}

fn send_command(port: &mut MemoryPort, kind: PacketKind, counter: u8, pwm: [u16; MOTOR_COUNT]) {
    let packet_type = PacketType::command(kind);
    let mut payload = PacketPayload::new(packet_type, counter);
    payload.pwm = pwm;
    port.write_all(&encode_frame(packet_type, &payload)).unwrap();
}

fn device_with_interlock(interlock: bool) -> (MemoryPort, DeviceLink<MemoryPort>, AmplifierDriver<SimulatedAmplifier>) {
    let (host, device) = MemoryPort::pair();
    let shared = DeviceShared::new();
    let mut hal = SimulatedAmplifier::new();
    hal.set_interlock(interlock);
    let mut driver = AmplifierDriver::new(hal, Arc::clone(&shared), DeviceConfig::default());
    driver.set_software_enable(true);
    (host, DeviceLink::new(device, shared), driver)
}

#[test]
fn drive_packet_applied_only_with_enable_and_interlock() {
    let (mut host, mut link, mut driver) = device_with_interlock(true);
    driver.tick();
    assert_eq!(driver.state(), SystemState::Idle);

    send_command(&mut host, PacketKind::Drive, 5, [1500, PWM_ZERO_DRIVE, PWM_ZERO_DRIVE]);
    assert_eq!(link.poll().unwrap(), 1);
    driver.tick();

    assert_eq!(driver.state(), SystemState::DrivingPwm);
    assert!(driver.hal().drive()[0] > 0.0);
    let mut bytes = Vec::new();
    link::read_available(&mut host, &mut bytes).unwrap();
    let mut decoder = FrameDecoder::new();
    decoder.extend(&bytes);
    let (type_byte, reply) = decoder.decode().unwrap();
    assert_eq!(type_byte, b'd');
    assert_eq!(reply.counter, 5);
}

#[test]
fn drive_packet_held_at_zero_without_interlock() {
    let (mut host, mut link, mut driver) = device_with_interlock(false);
    send_command(&mut host, PacketKind::Drive, 5, [1500, PWM_ZERO_DRIVE, PWM_ZERO_DRIVE]);
    link.poll().unwrap();
    driver.tick();

    assert_eq!(driver.state(), SystemState::DrivingPwm);
    assert_eq!(driver.hal().drive(), [0.0; MOTOR_COUNT]);

    // Without software enable, interlock alone is not enough
    driver.hal_mut().set_interlock(true);
    driver.set_software_enable(false);
    driver.tick();
    assert_eq!(driver.hal().drive(), [0.0; MOTOR_COUNT]);
}

#[test]
fn safety_limit_zeroes_motor_a() {
    let mut controller = ImpedanceController::new(&ControllerConfig {
        ramp_up_s: 0.0,
        ..ControllerConfig::default()
    });
    let mut ctx = HostContext::default();
    ctx.state = SystemState::DrivingPwm;
    ctx.tension_only = true;
    ctx.limits.start_measuring();
    ctx.limits.observe([30.0, 90.0, 90.0]);
    ctx.limits.freeze();
    // 35 degrees on motor A
    ctx.feedback.measured_encoder = [199, 0, 0];

    let frame = controller.update(&ctx, 0.0);
    assert_eq!(frame.percentage[0], 0.0);
    assert_eq!(frame.pwm[0], PWM_ZERO_DRIVE);
    assert!(frame.pwm[1] < PWM_ZERO_DRIVE);
}

#[test]
fn one_corrupt_frame_in_ten_is_dropped() {
    let mut bytes = Vec::new();
    for counter in 0..10u8 {
        let packet_type = PacketType::ack(PacketKind::Drive);
        let mut payload = PacketPayload::new(packet_type, counter);
        payload.encoder = [i32::from(counter) * 100, -7, 12];
        let mut frame = encode_frame(packet_type, &payload);
        if counter == 4 {
            frame[10] ^= 0x08;
        }
        bytes.extend(frame);
    }

    let mut decoder = FrameDecoder::new();
    decoder.extend(&bytes);
    let counters: Vec<u8> = decoder.decode_all().iter().map(|(_, p)| p.counter).collect();
    assert_eq!(counters, vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
    assert_eq!(decoder.stats().checksum_failures, 1);
}

#[test]
fn host_and_device_stay_in_step() {
    let mut bench = Bench::new(DeviceConfig::default(), LinkConfig::default());
    bench.tick();
    bench.tick();
    assert!(bench.ctx.link.responding);
    assert_eq!(bench.ctx.feedback.packet_type, b'i');

    bench.machine.apply(&mut bench.ctx, Command::EnableAmplifier);
    bench.ctx.command.pwm = [1, PWM_ZERO_DRIVE, PWM_ZERO_DRIVE];
    for _ in 0..20 {
        bench.tick();
    }
    assert_eq!(bench.driver.state(), SystemState::DrivingPwm);
    assert_eq!(bench.ctx.feedback.packet_type, b'd');
    assert!(bench.ctx.feedback.amplifier_enabled);
    assert!(bench.ctx.feedback.measured_encoder[0] > 0);
    assert!(bench.ctx.feedback.measured_current[0] > 0);
    assert_eq!(bench.ctx.link.counter_gaps, 0);
}

#[test]
fn limit_capture_and_zeroing_round_trip() {
    let mut bench = Bench::new(DeviceConfig::default(), LinkConfig::default());
    bench.machine.apply(&mut bench.ctx, Command::EnableAmplifier);
    bench.ctx.command.pwm = [1, 1, PWM_ZERO_DRIVE];
    for _ in 0..30 {
        bench.tick();
    }
    let deflection = bench.ctx.feedback.measured_encoder;
    assert!(deflection[0] > 0);

    bench.machine.apply(&mut bench.ctx, Command::StartLimitCapture);
    for _ in 0..3 {
        bench.tick();
    }
    bench.machine.apply(&mut bench.ctx, Command::SetLimits);
    assert_eq!(bench.ctx.state, SystemState::Idle);
    assert!(bench.ctx.limits.motors[0].is_limit_set);
    assert!(bench.ctx.limits.motors[0].angle_limit_deg > 0.0);

    bench.machine.apply(&mut bench.ctx, Command::ZeroEncoder);
    bench.tick();
    assert_eq!(bench.ctx.state, SystemState::Idle, "zeroing is one tick on the host");
    bench.tick();
    bench.tick();
    assert_eq!(bench.driver.state(), SystemState::Idle);
    // The spool is still unwinding, so counts go negative from the new zero
    assert!(bench.ctx.feedback.measured_encoder[0] <= 0);
    assert_eq!(bench.ctx.feedback.measured_encoder[2], 0);
}

#[test]
fn silent_device_clears_responding() {
    let mut bench = Bench::new(DeviceConfig::default(), LinkConfig {
        timeout_ticks: 5,
        ..LinkConfig::default()
    });
    bench.tick();
    bench.tick();
    assert!(bench.ctx.link.responding);

    // Host keeps sending; nothing services the device side any more. The
    // first tick still picks up the last reply already on the wire.
    for _ in 0..7 {
        bench.host.tick(&mut bench.ctx);
    }
    assert!(!bench.ctx.link.responding);
    assert!(bench.ctx.link.frames_sent >= 8);
}

#[test]
fn silent_host_returns_device_to_idle() {
    let mut bench = Bench::new(
        DeviceConfig {
            command_timeout_ticks: 50,
            ..DeviceConfig::default()
        },
        LinkConfig::default(),
    );
    bench.machine.apply(&mut bench.ctx, Command::EnableAmplifier);
    bench.ctx.command.pwm = [1000; MOTOR_COUNT];
    bench.tick();
    assert_eq!(bench.driver.state(), SystemState::DrivingPwm);

    for _ in 0..60 {
        bench.driver.tick();
    }
    assert_eq!(bench.driver.state(), SystemState::Idle);
    assert_eq!(bench.driver.hal().drive(), [0.0; MOTOR_COUNT]);
}

#[test]
fn runtime_against_threaded_simulator() {
    let (host, device) = MemoryPort::pair();
    let config = RuntimeConfig::default();
    let _device = spawn_simulated_device(device, config.device.clone()).unwrap();
    let mut runtime = Runtime::new(&config, HostSerial::new(host, &config.link));

    runtime.on_command(Command::EnableAmplifier);
    runtime.on_command(Command::ToggleTensionOnly);
    for i in 0..150 {
        runtime.step(f64::from(i) * 0.01);
        thread::sleep(Duration::from_millis(10));
    }

    let ctx = runtime.context();
    assert_eq!(runtime.health(), LinkHealthStatus::Ok);
    assert!(ctx.link.frames_received > 50);
    assert_eq!(ctx.feedback.packet_type, b'd');
    assert!(ctx.command.pwm.iter().all(|&pwm| pwm < PWM_ZERO_DRIVE));
}
