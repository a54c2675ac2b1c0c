// Packet payload shared by host and amplifier controller
//
// Payload layout (little-endian, packed, 27 bytes):
// [type u8, counter u8, amp_enabled u8, pwm[3] u16, current[3] i16, encoder[3] i32]

use std::fmt;

use crate::config::{MOTOR_COUNT, PWM_ZERO_DRIVE};

/// Size of an encoded `PacketPayload` in bytes
pub const PAYLOAD_LEN: usize = 3 + MOTOR_COUNT * 2 + MOTOR_COUNT * 2 + MOTOR_COUNT * 4;

/// Error decoding a payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Payload truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unknown packet type 0x{0:02X}")]
    UnknownPacketType(u8),

    #[error("Payload length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// What a packet asks for (or acknowledges)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Idle,
    Drive,
    MeasureLimits,
    MeasureCurrent,
    ZeroEncoder,
}

impl PacketKind {
    fn command_byte(self) -> u8 {
        match self {
            PacketKind::Idle => b'I',
            PacketKind::Drive => b'D',
            PacketKind::MeasureLimits => b'L',
            PacketKind::MeasureCurrent => b'C',
            PacketKind::ZeroEncoder => b'Z',
        }
    }
}

/// Packet type byte: uppercase = host command, lowercase = device ack/telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType {
    pub kind: PacketKind,
    pub ack: bool,
}

impl PacketType {
    pub const fn command(kind: PacketKind) -> Self {
        Self { kind, ack: false }
    }

    pub const fn ack(kind: PacketKind) -> Self {
        Self { kind, ack: true }
    }

    /// The matching reply type for a command
    pub fn to_ack(self) -> Self {
        Self::ack(self.kind)
    }

    pub fn to_byte(self) -> u8 {
        let byte = self.kind.command_byte();
        if self.ack {
            byte.to_ascii_lowercase()
        } else {
            byte
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        let kind = match byte.to_ascii_uppercase() {
            b'I' => PacketKind::Idle,
            b'D' => PacketKind::Drive,
            b'L' => PacketKind::MeasureLimits,
            b'C' => PacketKind::MeasureCurrent,
            b'Z' => PacketKind::ZeroEncoder,
            _ => return Err(ProtocolError::UnknownPacketType(byte)),
        };
        Ok(Self {
            kind,
            ack: byte.is_ascii_lowercase(),
        })
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_byte() as char)
    }
}

/// Fixed-layout record carried inside every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketPayload {
    pub packet_type: u8,
    pub counter: u8,
    pub amplifier_enabled: u8,
    pub pwm: [u16; MOTOR_COUNT],
    pub current: [i16; MOTOR_COUNT],
    pub encoder: [i32; MOTOR_COUNT],
}

impl PacketPayload {
    /// A payload that drives nothing
    pub fn new(packet_type: PacketType, counter: u8) -> Self {
        Self {
            packet_type: packet_type.to_byte(),
            counter,
            amplifier_enabled: 0,
            pwm: [PWM_ZERO_DRIVE; MOTOR_COUNT],
            current: [0; MOTOR_COUNT],
            encoder: [0; MOTOR_COUNT],
        }
    }

    pub fn kind(&self) -> Result<PacketType> {
        PacketType::from_byte(self.packet_type)
    }

    pub fn to_bytes(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        let mut pos = 0;
        let mut put = |bytes: &[u8]| {
            out[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        };

        put(&[self.packet_type, self.counter, self.amplifier_enabled]);
        for pwm in self.pwm {
            put(&pwm.to_le_bytes());
        }
        for current in self.current {
            put(&current.to_le_bytes());
        }
        for encoder in self.encoder {
            put(&encoder.to_le_bytes());
        }
        out
    }

    /// Parse a payload. The slice must be exactly `PAYLOAD_LEN` bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PAYLOAD_LEN {
            return Err(ProtocolError::LengthMismatch {
                expected: PAYLOAD_LEN,
                actual: bytes.len(),
            });
        }

        let mut reader = PayloadReader::new(bytes);
        let packet_type = reader.read_u8()?;
        PacketType::from_byte(packet_type)?;

        let counter = reader.read_u8()?;
        let amplifier_enabled = reader.read_u8()?;

        let mut pwm = [0u16; MOTOR_COUNT];
        for value in &mut pwm {
            *value = reader.read_u16_le()?;
        }
        let mut current = [0i16; MOTOR_COUNT];
        for value in &mut current {
            *value = reader.read_i16_le()?;
        }
        let mut encoder = [0i32; MOTOR_COUNT];
        for value in &mut encoder {
            *value = reader.read_i32_le()?;
        }

        Ok(Self {
            packet_type,
            counter,
            amplifier_enabled,
            pwm,
            current,
            encoder,
        })
    }
}

impl fmt::Display for PacketPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} #{} en={} pwm={} cur={} enc={}]",
            self.packet_type as char,
            self.counter,
            self.amplifier_enabled,
            self.pwm.map(|v| v.to_string()).join("/"),
            self.current.map(|v| v.to_string()).join("/"),
            self.encoder.map(|v| v.to_string()).join("/"),
        )
    }
}

/// Bounds-checked little-endian cursor over a byte slice
pub struct PayloadReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(ProtocolError::Truncated {
                needed: N,
                available: self.remaining(),
            });
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..self.position + N]);
        self.position += N;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_i16_le(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }
}
