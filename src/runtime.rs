// Host control loop
//
// Fixed iteration order per tick:
// 1. Drain operator commands (zenoh, optionally keyboard) and marker samples
// 2. Marker sample -> Kalman estimator -> telemetry
// 3. Impedance controller -> command frame
// 4. Serial link: send this tick's command, read device telemetry
// 5. Bookkeeping, then publish telemetry and link health
//
// Nothing in the tick blocks: subscribers are drained with try_recv and the
// serial port never waits for data.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::command::{Command, KeyAction, key_to_action};
use crate::config::{RuntimeConfig, TOPIC_HEALTH, TOPIC_MARKER, TOPIC_OPERATOR, TOPIC_TELEMETRY};
use crate::context::HostContext;
use crate::control::ImpedanceController;
use crate::device::{SimulatedDevice, spawn_simulated_device};
use crate::estimator::MarkerEstimator;
use crate::host::{HostSerial, HostStateMachine};
use crate::link::{self, MemoryPort, Transport};
use crate::messages::{LinkHealthStatus, MarkerSample, TelemetryReport};

pub struct Runtime<T: Read + Write> {
    ctx: HostContext,
    machine: HostStateMachine,
    estimator: MarkerEstimator,
    controller: ImpedanceController,
    serial: HostSerial<T>,
    pending_marker: Option<MarkerSample>,
}

impl<T: Read + Write> Runtime<T> {
    pub fn new(config: &RuntimeConfig, serial: HostSerial<T>) -> Self {
        let mut ctx = HostContext::new(config.gains);
        ctx.sending = config.serial.sending;
        ctx.receiving = config.serial.receiving;
        if !serial.is_open() {
            ctx.sending = false;
            ctx.receiving = false;
        }
        ctx.link.port_open = serial.is_open();

        Self {
            ctx,
            machine: HostStateMachine::new(config.controller.encoder_counts_per_rev),
            estimator: MarkerEstimator::new(&config.filter),
            controller: ImpedanceController::new(&config.controller),
            serial,
            pending_marker: None,
        }
    }

    pub fn context(&self) -> &HostContext {
        &self.ctx
    }

    /// Queue a marker sample; only the newest one per tick is used
    pub fn on_marker(&mut self, sample: MarkerSample) {
        self.pending_marker = Some(sample);
    }

    pub fn on_command(&mut self, command: Command) {
        self.machine.apply(&mut self.ctx, command);
    }

    /// Run one tick at host time `now_s`
    pub fn step(&mut self, now_s: f64) -> TelemetryReport {
        if let Some(sample) = self.pending_marker.take() {
            self.ctx.telemetry = self
                .estimator
                .update(&self.ctx.telemetry, sample.position_mm, sample.timestamp_s);
        }

        self.ctx.command = self.controller.update(&self.ctx, now_s);

        if self.serial.tick(&mut self.ctx) > 0 {
            self.machine.on_feedback(&mut self.ctx);
        }

        let report = TelemetryReport::from(&self.ctx);
        self.machine.end_tick(&mut self.ctx);
        report
    }

    pub fn health(&self) -> LinkHealthStatus {
        LinkHealthStatus::from(&self.ctx.link)
    }
}

/// How the runtime should be started
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: RuntimeConfig,
    /// Run against an in-process simulated amplifier controller
    pub simulate: bool,
    /// Read operator commands from the terminal
    pub keyboard: bool,
}

/// Restores the terminal when keyboard input ends
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

/// Drain pending key presses. Returns true if the operator asked to quit.
fn poll_keyboard<T: Read + Write>(runtime: &mut Runtime<T>) -> std::io::Result<bool> {
    while event::poll(Duration::ZERO)? {
        if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
            if kind != KeyEventKind::Press {
                continue;
            }
            match key_to_action(code, runtime.context().selected_gain) {
                Some(KeyAction::Command(command)) => runtime.on_command(command),
                Some(KeyAction::Quit) => return Ok(true),
                None => {}
            }
        }
    }
    Ok(false)
}

fn open_link(options: &RunOptions) -> Result<(HostSerial<Box<dyn Transport>>, Option<SimulatedDevice>), std::io::Error> {
    let config = &options.config;
    if options.simulate {
        let (host, device) = MemoryPort::pair();
        let device = spawn_simulated_device(device, config.device.clone())?;
        let port: Box<dyn Transport> = Box::new(host);
        return Ok((HostSerial::new(port, &config.link), Some(device)));
    }

    match link::open_serial(&config.serial.port, config.serial.baudrate) {
        Ok(port) => {
            let port: Box<dyn Transport> = Box::new(port);
            Ok((HostSerial::new(port, &config.link), None))
        }
        Err(e) => {
            warn!(
                "Could not open {}: {} (sending/receiving disabled)",
                config.serial.port, e
            );
            Ok((HostSerial::disconnected(&config.link), None))
        }
    }
}

pub async fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let loop_hz = options.config.loop_hz();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let marker_sub = session.declare_subscriber(TOPIC_MARKER).await?;
    let operator_sub = session.declare_subscriber(TOPIC_OPERATOR).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    // `_device` outlives the runtime, so the final idle packet reaches a live device
    let (serial, _device) = open_link(&options)?;
    let mut runtime = Runtime::new(&options.config, serial);

    let _raw_mode = if options.keyboard {
        info!("Keyboard: e=enable, space=disable, l/s/k=limits, c=current, z=zero, t=tension, 1-4 p/i/d +/- gains, q=quit");
        Some(RawModeGuard::enable()?)
    } else {
        None
    };

    let mut tick = interval(Duration::from_micros(1_000_000 / loop_hz));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let mut last_health = runtime.health();

    info!(
        "Runtime started: {}Hz loop, {} mode",
        loop_hz,
        if options.simulate { "simulated" } else { "hardware" }
    );
    info!("Subscribed to: {}, {}", TOPIC_MARKER, TOPIC_OPERATOR);
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
        }

        // 1. Operator input, in arrival order
        while let Ok(Some(sample)) = operator_sub.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Command>(&payload) {
                Ok(command) => runtime.on_command(command),
                Err(e) => warn!("Failed to parse operator command: {}", e),
            }
        }
        if options.keyboard && poll_keyboard(&mut runtime)? {
            info!("Quit requested");
            break;
        }

        // 2. Marker samples, newest wins
        while let Ok(Some(sample)) = marker_sub.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MarkerSample>(&payload) {
                Ok(marker) => runtime.on_marker(marker),
                Err(e) => debug!("Failed to parse marker sample: {}", e),
            }
        }

        // 3-5. Estimate, control, link
        let report = runtime.step(started.elapsed().as_secs_f64());

        let report_json = serde_json::to_string(&report)?;
        pub_telemetry.put(report_json).await?;

        let health = runtime.health();
        if health != last_health {
            info!("Link health {:?} -> {:?}", last_health, health);
            last_health = health;
        }
        let health_json = serde_json::to_string(&health)?;
        pub_health.put(health_json).await?;
    }

    Ok(())
}
