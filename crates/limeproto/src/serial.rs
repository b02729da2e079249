//! Serial DMX framing
//!
//! Wraps a DMX frame in the Enttec-style "send DMX" serial packet:
//!
//! ```text
//! Byte 0:      0x7E        start delimiter
//! Byte 1:      0x06        output-universe label
//! Bytes 2-3:   0x01 0x02   payload length 513, little-endian
//! Byte 4:      0x00        DMX start code
//! Bytes 5-516: channels 1-512
//! Byte 517:    0xE7        end delimiter
//! ```
//!
//! The payload length is always 513 (start code + 512 channels) and the total
//! wire size is always 518 bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::dmx::{DmxFrame, DMX_CHANNELS};

/// Packet start delimiter
pub const SERIAL_START: u8 = 0x7E;

/// Packet end delimiter
pub const SERIAL_END: u8 = 0xE7;

/// "Send DMX to output universe" label
pub const SERIAL_LABEL_OUTPUT: u8 = 0x06;

/// Total wire size of a serial DMX packet
pub const SERIAL_PACKET_LEN: usize = 518;

/// Payload length field: DMX start code + 512 channels
const PAYLOAD_LEN: u16 = (DMX_CHANNELS + 1) as u16;

/// Frame a DMX frame for the serial wire. Always 518 bytes.
pub fn encode_serial_dmx(frame: &DmxFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(SERIAL_PACKET_LEN);
    buf.put_u8(SERIAL_START);
    buf.put_u8(SERIAL_LABEL_OUTPUT);
    buf.put_u16_le(PAYLOAD_LEN);
    buf.put_u8(0x00); // DMX start code
    buf.put_slice(frame.channels());
    buf.put_u8(SERIAL_END);
    buf.freeze()
}
