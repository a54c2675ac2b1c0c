// Frame codec for the host <-> amplifier serial link
//
// Frame format: [0xAA, type, length, payload..., checksum]
// checksum = type ^ length ^ (xor of payload bytes)

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::packet::{PAYLOAD_LEN, PacketPayload, PacketType};

/// Start-of-frame marker
pub const START_BYTE: u8 = 0xAA;

/// Bytes around the payload: start, type, length, checksum
pub const FRAME_OVERHEAD: usize = 4;

/// Total encoded frame size
pub const FRAME_LEN: usize = PAYLOAD_LEN + FRAME_OVERHEAD;

/// XOR checksum over type, length and payload
pub fn checksum(packet_type: u8, length: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(packet_type ^ length, |acc, &byte| acc ^ byte)
}

/// Build a complete frame. Never fails: the payload has a fixed size.
pub fn encode_frame(packet_type: PacketType, payload: &PacketPayload) -> Vec<u8> {
    let type_byte = packet_type.to_byte();
    let length = PAYLOAD_LEN as u8;
    let body = payload.to_bytes();

    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.push(START_BYTE);
    frame.push(type_byte);
    frame.push(length);
    frame.extend_from_slice(&body);
    frame.push(checksum(type_byte, length, &body));
    frame
}

/// Link-health counters kept by the decoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub checksum_failures: u64,
    /// Candidates rejected before the checksum (bad length or unknown type)
    pub malformed_frames: u64,
    /// Bytes skipped while hunting for a start marker
    pub bytes_discarded: u64,
}

/// Incoming byte queue with resynchronising frame extraction
#[derive(Debug, Default)]
pub struct FrameDecoder {
    queue: VecDeque<u8>,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes);
    }

    /// Number of bytes waiting in the queue
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Extract the next complete, validated frame.
    ///
    /// Returns `None` when no complete frame is available yet; partial frames
    /// stay queued. A candidate that fails validation loses only its leading
    /// start byte, and scanning resumes from the next byte.
    pub fn decode(&mut self) -> Option<(u8, PacketPayload)> {
        loop {
            self.skip_to_start();

            // Need start, type and length before the candidate can be judged
            if self.queue.len() < 3 {
                return None;
            }

            let packet_type = self.queue[1];
            let length = self.queue[2];

            if length as usize != PAYLOAD_LEN || PacketType::from_byte(packet_type).is_err() {
                trace!(
                    "Rejecting candidate frame: type=0x{:02X}, length={}",
                    packet_type, length
                );
                self.stats.malformed_frames += 1;
                self.queue.pop_front();
                continue;
            }

            let total = length as usize + FRAME_OVERHEAD;
            if self.queue.len() < total {
                return None;
            }

            let body: Vec<u8> = self.queue.range(3..3 + length as usize).copied().collect();
            let received = self.queue[total - 1];
            let expected = checksum(packet_type, length, &body);

            if received != expected {
                trace!(
                    "Checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                    expected, received
                );
                self.stats.checksum_failures += 1;
                self.queue.pop_front();
                continue;
            }

            match PacketPayload::parse(&body) {
                Ok(payload) => {
                    self.queue.drain(..total);
                    self.stats.frames_decoded += 1;
                    return Some((packet_type, payload));
                }
                Err(e) => {
                    trace!("Dropping frame with valid checksum: {}", e);
                    self.stats.malformed_frames += 1;
                    self.queue.pop_front();
                }
            }
        }
    }

    /// Decode every complete frame currently queued
    pub fn decode_all(&mut self) -> Vec<(u8, PacketPayload)> {
        std::iter::from_fn(|| self.decode()).collect()
    }

    fn skip_to_start(&mut self) {
        let skip = self
            .queue
            .iter()
            .position(|&b| b == START_BYTE)
            .unwrap_or(self.queue.len());
        if skip > 0 {
            self.queue.drain(..skip);
            self.stats.bytes_discarded += skip as u64;
        }
    }
}
