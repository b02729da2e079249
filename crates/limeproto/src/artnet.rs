//! Art-Net framing
//!
//! Builds ArtDmx packets (the Art-Net "output a DMX frame" opcode):
//!
//! ```text
//! Bytes 0-7:    "Art-Net\0"   protocol id
//! Bytes 8-9:    0x00 0x50     OpDmx, little-endian
//! Bytes 10-11:  0x00 0x0E     protocol version 14, big-endian
//! Byte 12:      0x00          sequence (sequencing unused)
//! Byte 13:      0x00          physical input port
//! Bytes 14-15:  universe, little-endian
//! Bytes 16-17:  channel count 512, big-endian
//! Bytes 18-529: channels 1-512
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::dmx::{DmxFrame, DMX_CHANNELS};

/// Art-Net protocol id, including the terminating NUL
pub const ARTNET_ID: &[u8; 8] = b"Art-Net\0";

/// OpDmx opcode (little-endian on the wire)
pub const OP_DMX: u16 = 0x5000;

/// Art-Net protocol version (big-endian on the wire)
pub const PROTOCOL_VERSION: u16 = 14;

/// Standard Art-Net UDP port
pub const ARTNET_PORT: u16 = 6454;

/// Total wire size of an ArtDmx packet carrying a full universe
pub const ART_DMX_LEN: usize = 18 + DMX_CHANNELS;

/// Frame a DMX frame as an ArtDmx packet for `universe`. Always 530 bytes.
pub fn encode_art_dmx(universe: u16, frame: &DmxFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(ART_DMX_LEN);
    buf.put_slice(ARTNET_ID);
    buf.put_u16_le(OP_DMX);
    buf.put_u16(PROTOCOL_VERSION);
    buf.put_u8(0); // sequence
    buf.put_u8(0); // physical port
    buf.put_u16_le(universe);
    buf.put_u16(DMX_CHANNELS as u16);
    buf.put_slice(frame.channels());
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_shape() {
        let frame = DmxFrame::zeroed();
        let packet = encode_art_dmx(0, &frame);

        assert_eq!(packet.len(), ART_DMX_LEN);
        assert_eq!(&packet[0..8], b"Art-Net\0");
        assert_eq!(&packet[8..10], &[0x00, 0x50]);
        assert_eq!(&packet[10..12], &[0x00, 0x0E]);
        assert_eq!(packet[12], 0x00);
        assert_eq!(packet[13], 0x00);
        assert_eq!(&packet[16..18], &[0x02, 0x00]); // 512 big-endian
    }

    #[test]
    fn test_universe_little_endian() {
        let frame = DmxFrame::zeroed();
        let packet = encode_art_dmx(0x0102, &frame);
        assert_eq!(packet[14], 0x02);
        assert_eq!(packet[15], 0x01);
    }

    #[test]
    fn test_channels_follow_header() {
        let mut frame = DmxFrame::zeroed();
        frame.set(0, 0xAA);
        frame.set(511, 0xBB);
        let packet = encode_art_dmx(3, &frame);
        assert_eq!(packet[18], 0xAA);
        assert_eq!(packet[529], 0xBB);
    }
}
