// Host serial driver
//
// Each tick: send one command packet built from the current state and command
// frame, then drain whatever the device has sent back. There is no
// retransmission; a lost command is superseded by the next tick's.

use std::io::{Read, Write};

use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::context::{DeviceFeedback, HostContext};
use crate::link::{self, LinkError};
use crate::protocol::{FrameDecoder, PacketPayload, PacketType, encode_frame};
use crate::state::SystemState;

pub struct HostSerial<T: Read + Write> {
    port: Option<T>,
    decoder: FrameDecoder,
    counter: u8,
    counter_modulus: u8,
    timeout_ticks: u32,
    last_echo: Option<u8>,
    rx_buf: Vec<u8>,
    error_logged: bool,
}

impl<T: Read + Write> HostSerial<T> {
    pub fn new(port: T, link: &LinkConfig) -> Self {
        Self::with_port(Some(port), link)
    }

    /// A driver with no port: port-open failed, the loop keeps running
    pub fn disconnected(link: &LinkConfig) -> Self {
        Self::with_port(None, link)
    }

    fn with_port(port: Option<T>, link: &LinkConfig) -> Self {
        Self {
            port,
            decoder: FrameDecoder::new(),
            counter: 0,
            counter_modulus: link.counter_modulus.max(1),
            timeout_ticks: link.timeout_ticks,
            last_echo: None,
            rx_buf: Vec::with_capacity(512),
            error_logged: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Command packet for the current state and command frame
    pub fn build_packet(&self, ctx: &HostContext) -> (PacketType, PacketPayload) {
        let packet_type = PacketType::command(ctx.state.packet_kind());
        let mut payload = PacketPayload::new(packet_type, self.counter);

        if ctx.state == SystemState::DrivingPwm {
            payload.amplifier_enabled = 1;
            payload.pwm = ctx.command.pwm;
        }
        (packet_type, payload)
    }

    /// Run one link tick: send if enabled, receive if enabled, update health.
    ///
    /// Returns the number of telemetry frames applied to the context.
    pub fn tick(&mut self, ctx: &mut HostContext) -> usize {
        ctx.link.port_open = self.is_open();

        if ctx.sending && self.is_open() {
            if let Err(e) = self.send(ctx) {
                self.report_error("send", &e);
            }
        }

        let received = if ctx.receiving && self.is_open() {
            match self.receive(ctx) {
                Ok(n) => n,
                Err(e) => {
                    self.report_error("receive", &e);
                    0
                }
            }
        } else {
            0
        };

        self.update_health(ctx, received);
        received
    }

    fn send(&mut self, ctx: &mut HostContext) -> Result<(), LinkError> {
        let (packet_type, payload) = self.build_packet(ctx);
        let frame = encode_frame(packet_type, &payload);

        if let Some(port) = self.port.as_mut() {
            port.write_all(&frame)?;
            port.flush()?;
        }
        trace!("Sent {}", payload);

        ctx.link.frames_sent += 1;
        self.counter = (self.counter + 1) % self.counter_modulus;
        self.error_logged = false;
        Ok(())
    }

    fn receive(&mut self, ctx: &mut HostContext) -> Result<usize, LinkError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(0);
        };

        self.rx_buf.clear();
        link::read_available(port, &mut self.rx_buf)?;
        self.decoder.extend(&self.rx_buf);

        let mut applied = 0;
        while let Some((type_byte, payload)) = self.decoder.decode() {
            let Ok(packet_type) = PacketType::from_byte(type_byte) else {
                continue;
            };
            if !packet_type.ack {
                debug!("Ignoring command-type frame from device: {}", payload);
                continue;
            }
            self.apply_feedback(ctx, type_byte, &payload);
            applied += 1;
        }

        ctx.link.decoder = self.decoder.stats();
        Ok(applied)
    }

    fn apply_feedback(&mut self, ctx: &mut HostContext, type_byte: u8, payload: &PacketPayload) {
        trace!("Received {}", payload);

        if let Some(previous) = self.last_echo {
            // Echoes come off the wire, so anything out of range is a gap too
            let expected = (u16::from(previous) + 1) % u16::from(self.counter_modulus);
            if u16::from(payload.counter) != expected {
                debug!("Counter gap: expected {}, got {}", expected, payload.counter);
                ctx.link.counter_gaps += 1;
            }
        }
        self.last_echo = Some(payload.counter);

        ctx.feedback = DeviceFeedback {
            packet_type: type_byte,
            counter: payload.counter,
            amplifier_enabled: payload.amplifier_enabled != 0,
            measured_pwm: payload.pwm,
            measured_current: payload.current,
            measured_encoder: payload.encoder,
            received_tick: ctx.tick,
        };
        ctx.link.frames_received += 1;
    }

    fn update_health(&mut self, ctx: &mut HostContext, received: usize) {
        if received > 0 {
            if !ctx.link.responding {
                info!("Amplifier controller responding");
            }
            ctx.link.responding = true;
            ctx.link.ticks_since_valid = 0;
            return;
        }

        ctx.link.ticks_since_valid = ctx.link.ticks_since_valid.saturating_add(1);
        if ctx.link.responding && ctx.link.ticks_since_valid > self.timeout_ticks {
            warn!(
                "No valid frame for {} ticks, amplifier controller not responding",
                ctx.link.ticks_since_valid
            );
            ctx.link.responding = false;
        }
    }

    fn report_error(&mut self, what: &str, e: &LinkError) {
        if !self.error_logged {
            warn!("Serial {} failed: {}", what, e);
            self.error_logged = true;
        }
    }
}

impl<T: Read + Write> Drop for HostSerial<T> {
    fn drop(&mut self) {
        // Leave the device with a zero-drive command
        let payload = PacketPayload::new(PacketType::command(SystemState::Idle.packet_kind()), self.counter);
        let frame = encode_frame(PacketType::command(SystemState::Idle.packet_kind()), &payload);
        if let Some(port) = self.port.as_mut() {
            if let Err(e) = port.write_all(&frame) {
                warn!("Failed to send idle packet on shutdown: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PWM_ZERO_DRIVE;
    use crate::link::MemoryPort;
    use crate::protocol::{FRAME_LEN, PacketKind};

    fn link_config() -> LinkConfig {
        LinkConfig {
            timeout_ticks: 3,
            counter_modulus: 100,
        }
    }

    fn reply(device: &mut MemoryPort, counter: u8, encoder: [i32; 3]) {
        let mut payload = PacketPayload::new(PacketType::ack(PacketKind::Drive), counter);
        payload.encoder = encoder;
        payload.amplifier_enabled = 1;
        device
            .write_all(&encode_frame(PacketType::ack(PacketKind::Drive), &payload))
            .unwrap();
    }

    #[test]
    fn test_packet_follows_state() {
        let (host_port, _device) = MemoryPort::pair();
        let serial = HostSerial::new(host_port, &link_config());
        let mut ctx = HostContext::default();
        ctx.command.pwm = [1500, 1600, 1700];

        let (packet_type, payload) = serial.build_packet(&ctx);
        assert_eq!(packet_type.to_byte(), b'I');
        assert_eq!(payload.pwm, [PWM_ZERO_DRIVE; 3], "idle never carries drive");

        ctx.state = SystemState::DrivingPwm;
        let (packet_type, payload) = serial.build_packet(&ctx);
        assert_eq!(packet_type.to_byte(), b'D');
        assert_eq!(payload.pwm, [1500, 1600, 1700]);
        assert_eq!(payload.amplifier_enabled, 1);

        ctx.state = SystemState::MeasuringLimits;
        assert_eq!(serial.build_packet(&ctx).0.to_byte(), b'L');
        ctx.state = SystemState::MeasuringCurrent;
        assert_eq!(serial.build_packet(&ctx).0.to_byte(), b'C');
    }

    #[test]
    fn test_tick_sends_one_frame_and_wraps_counter() {
        let (host_port, mut device) = MemoryPort::pair();
        let mut serial = HostSerial::new(host_port, &LinkConfig {
            counter_modulus: 3,
            ..link_config()
        });
        let mut ctx = HostContext::default();

        let mut counters = Vec::new();
        for _ in 0..4 {
            serial.tick(&mut ctx);
            let mut bytes = Vec::new();
            link::read_available(&mut device, &mut bytes).unwrap();
            assert_eq!(bytes.len(), FRAME_LEN);
            let mut decoder = FrameDecoder::new();
            decoder.extend(&bytes);
            counters.push(decoder.decode().unwrap().1.counter);
        }
        assert_eq!(counters, vec![0, 1, 2, 0]);
        assert_eq!(ctx.link.frames_sent, 4);
    }

    #[test]
    fn test_feedback_applied() {
        let (host_port, mut device) = MemoryPort::pair();
        let mut serial = HostSerial::new(host_port, &link_config());
        let mut ctx = HostContext::default();

        reply(&mut device, 0, [10, 20, 30]);
        assert_eq!(serial.tick(&mut ctx), 1);
        assert_eq!(ctx.feedback.measured_encoder, [10, 20, 30]);
        assert_eq!(ctx.feedback.packet_type, b'd');
        assert!(ctx.feedback.amplifier_enabled);
        assert!(ctx.link.responding);
    }

    #[test]
    fn test_counter_gap_counted() {
        let (host_port, mut device) = MemoryPort::pair();
        let mut serial = HostSerial::new(host_port, &link_config());
        let mut ctx = HostContext::default();

        reply(&mut device, 98, [0; 3]);
        reply(&mut device, 99, [0; 3]);
        reply(&mut device, 0, [0; 3]);
        reply(&mut device, 2, [0; 3]);
        assert_eq!(serial.tick(&mut ctx), 4);
        assert_eq!(ctx.link.counter_gaps, 1);
    }

    #[test]
    fn test_out_of_range_echo_is_a_gap() {
        let (host_port, mut device) = MemoryPort::pair();
        let mut serial = HostSerial::new(host_port, &link_config());
        let mut ctx = HostContext::default();

        reply(&mut device, 255, [0; 3]);
        reply(&mut device, 0, [0; 3]);
        assert_eq!(serial.tick(&mut ctx), 2);
        assert_eq!(ctx.link.counter_gaps, 1);
        assert_eq!(ctx.feedback.counter, 0);
        assert!(ctx.link.responding);
    }

    #[test]
    fn test_responding_cleared_after_timeout() {
        let (host_port, mut device) = MemoryPort::pair();
        let mut serial = HostSerial::new(host_port, &link_config());
        let mut ctx = HostContext::default();

        reply(&mut device, 0, [0; 3]);
        serial.tick(&mut ctx);
        assert!(ctx.link.responding);

        for _ in 0..3 {
            serial.tick(&mut ctx);
        }
        assert!(ctx.link.responding, "still within the timeout");
        serial.tick(&mut ctx);
        assert!(!ctx.link.responding);

        reply(&mut device, 1, [0; 3]);
        serial.tick(&mut ctx);
        assert!(ctx.link.responding);
        assert_eq!(ctx.link.ticks_since_valid, 0);
    }

    #[test]
    fn test_disabled_directions() {
        let (host_port, mut device) = MemoryPort::pair();
        let mut serial = HostSerial::new(host_port, &link_config());
        let mut ctx = HostContext::default();
        ctx.sending = false;
        ctx.receiving = false;

        reply(&mut device, 0, [5; 3]);
        assert_eq!(serial.tick(&mut ctx), 0);
        assert_eq!(device.pending(), 0, "nothing sent");
        assert_eq!(ctx.feedback.measured_encoder, [0; 3]);
    }

    #[test]
    fn test_disconnected_driver_keeps_running() {
        let mut serial: HostSerial<MemoryPort> = HostSerial::disconnected(&link_config());
        let mut ctx = HostContext::default();
        assert_eq!(serial.tick(&mut ctx), 0);
        assert!(!ctx.link.port_open);
        assert!(!ctx.link.responding);
    }

    #[test]
    fn test_drop_sends_idle() {
        let (host_port, mut device) = MemoryPort::pair();
        let serial = HostSerial::new(host_port, &link_config());
        drop(serial);

        let mut bytes = Vec::new();
        link::read_available(&mut device, &mut bytes).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.decode().unwrap().0, b'I');
    }
}
