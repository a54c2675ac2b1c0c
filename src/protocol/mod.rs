// Serial protocol between the host and the amplifier controller
//
// Provides:
// - Fixed-layout packet payload with a bounds-checked reader
// - Frame encoding with XOR checksum
// - Resynchronising frame decoder

pub mod codec;
pub mod packet;

pub use codec::{DecoderStats, FRAME_LEN, FrameDecoder, START_BYTE, checksum, encode_frame};
pub use packet::{PAYLOAD_LEN, PacketKind, PacketPayload, PacketType, PayloadReader, ProtocolError};
