// Device serial service
//
// Runs in the device's main loop. Every decoded host command is handed to the
// amplifier interrupt through the command mailbox and answered immediately
// with the matching lowercase type, the echoed counter and the newest
// telemetry snapshot. Bytes that never decode are never acted on.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, trace};

use super::amplifier::{DeviceShared, DriveCommand};
use crate::link::{self, LinkError};
use crate::protocol::{DecoderStats, FrameDecoder, PacketPayload, PacketType, encode_frame};

pub struct DeviceLink<T: Read + Write> {
    port: T,
    shared: Arc<DeviceShared>,
    decoder: FrameDecoder,
    sequence: u32,
    rx_buf: Vec<u8>,
}

impl<T: Read + Write> DeviceLink<T> {
    pub fn new(port: T, shared: Arc<DeviceShared>) -> Self {
        Self {
            port,
            shared,
            decoder: FrameDecoder::new(),
            sequence: 0,
            rx_buf: Vec::with_capacity(512),
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Service the link once. Returns the number of host commands handled.
    pub fn poll(&mut self) -> Result<usize, LinkError> {
        self.rx_buf.clear();
        link::read_available(&mut self.port, &mut self.rx_buf)?;
        self.decoder.extend(&self.rx_buf);

        let mut handled = 0;
        while let Some((type_byte, payload)) = self.decoder.decode() {
            let Ok(packet_type) = PacketType::from_byte(type_byte) else {
                continue;
            };
            if packet_type.ack {
                debug!("Ignoring ack-type frame from host: {}", payload);
                continue;
            }
            trace!("Host command {}", payload);

            self.sequence = self.sequence.wrapping_add(1).max(1);
            self.shared.commands.write(DriveCommand {
                sequence: self.sequence,
                kind: packet_type.kind,
                counter: payload.counter,
                pwm: payload.pwm,
            });

            self.reply(packet_type, payload.counter)?;
            handled += 1;
        }
        Ok(handled)
    }

    fn reply(&mut self, command: PacketType, counter: u8) -> Result<(), LinkError> {
        let telemetry = self.shared.telemetry.read();
        let ack = command.to_ack();

        let mut payload = PacketPayload::new(ack, counter);
        payload.amplifier_enabled = u8::from(telemetry.amplifier_enabled);
        payload.pwm = telemetry.pwm;
        payload.current = telemetry.current;
        payload.encoder = telemetry.encoder;

        self.port.write_all(&encode_frame(ack, &payload))?;
        self.port.flush()?;
        trace!("Replied {}", payload);
        Ok(())
    }
}
