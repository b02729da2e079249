//! DMX frame primitives
//!
//! A DMX512 universe is exactly 512 unsigned 8-bit channel values. Frames are
//! built once (padding short input with zeroes, truncating excess) and treated
//! as read-only by everything downstream of the channel table.
//!
//! The frame-number encoding carries a 16-bit counter over DMX channels 1-2
//! (array indices 0-1), MSB first, for frame-accurate sync with an external
//! video or show counter.

use serde::{Deserialize, Serialize};

/// Channels in one DMX universe
pub const DMX_CHANNELS: usize = 512;

/// One DMX frame: exactly 512 channel values.
#[derive(Clone, PartialEq, Eq)]
pub struct DmxFrame {
    channels: [u8; DMX_CHANNELS],
}

impl DmxFrame {
    /// All channels at zero
    pub fn zeroed() -> Self {
        Self {
            channels: [0; DMX_CHANNELS],
        }
    }

    /// Build a frame from arbitrary input.
    ///
    /// Missing channels default to 0, excess values are truncated. The result
    /// is always exactly 512 channels.
    pub fn from_slice(values: &[u8]) -> Self {
        let mut channels = [0u8; DMX_CHANNELS];
        let take = values.len().min(DMX_CHANNELS);
        channels[..take].copy_from_slice(&values[..take]);
        Self { channels }
    }

    /// Full channel array
    pub fn channels(&self) -> &[u8; DMX_CHANNELS] {
        &self.channels
    }

    /// Read one channel (0-indexed). Out-of-range reads return 0.
    pub fn get(&self, index: usize) -> u8 {
        self.channels.get(index).copied().unwrap_or(0)
    }

    /// Set one channel (0-indexed). Out-of-range writes are ignored.
    pub fn set(&mut self, index: usize, value: u8) {
        if let Some(ch) = self.channels.get_mut(index) {
            *ch = value;
        }
    }

    /// Stamp a 16-bit frame number onto channels 1-2 (indices 0-1)
    pub fn set_frame_number(&mut self, frame: u16) {
        let [hi, lo] = encode_frame_number(frame);
        self.channels[0] = hi;
        self.channels[1] = lo;
    }

    /// Read the 16-bit frame number from channels 1-2
    pub fn frame_number(&self) -> u16 {
        decode_frame_number([self.channels[0], self.channels[1]])
    }
}

impl Default for DmxFrame {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl std::fmt::Debug for DmxFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.channels.iter().filter(|&&c| c != 0).count();
        write!(f, "DmxFrame({lit}/{DMX_CHANNELS} channels lit)")
    }
}

/// Encode a 16-bit frame counter as two DMX channel values, MSB first
pub fn encode_frame_number(frame: u16) -> [u8; 2] {
    [(frame >> 8) as u8, (frame & 0xFF) as u8]
}

/// Decode two DMX channel values back into the frame counter
pub fn decode_frame_number(channels: [u8; 2]) -> u16 {
    ((channels[0] as u16) << 8) | channels[1] as u16
}

/// An ordered sequence of DMX frames loaded at configuration time.
///
/// Immutable until reconfiguration. Indexing wraps modulo the table length so
/// an external counter larger than the table can still address it.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    frames: Vec<DmxFrame>,
}

/// Row form of a channel table as it appears in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRows(pub Vec<Vec<u8>>);

impl ChannelTable {
    pub fn new(frames: Vec<DmxFrame>) -> Self {
        Self { frames }
    }

    /// Build from raw rows, padding/truncating each row to 512 channels
    pub fn from_rows(rows: &[Vec<u8>]) -> Self {
        Self {
            frames: rows.iter().map(|row| DmxFrame::from_slice(row)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at `index`, wrapping modulo the table length.
    ///
    /// Returns `None` only for an empty table.
    pub fn frame(&self, index: usize) -> Option<&DmxFrame> {
        if self.frames.is_empty() {
            None
        } else {
            Some(&self.frames[index % self.frames.len()])
        }
    }
}

impl From<ChannelRows> for ChannelTable {
    fn from(rows: ChannelRows) -> Self {
        Self::from_rows(&rows.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_pads_with_zero() {
        let frame = DmxFrame::from_slice(&[10, 20, 30]);
        assert_eq!(frame.get(0), 10);
        assert_eq!(frame.get(2), 30);
        assert_eq!(frame.get(3), 0);
        assert_eq!(frame.get(511), 0);
    }

    #[test]
    fn test_from_slice_truncates_excess() {
        let long = vec![7u8; DMX_CHANNELS + 100];
        let frame = DmxFrame::from_slice(&long);
        assert_eq!(frame.channels().len(), DMX_CHANNELS);
        assert_eq!(frame.get(511), 7);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut frame = DmxFrame::zeroed();
        frame.set(512, 99);
        assert_eq!(frame.get(512), 0);
        assert_eq!(frame.get(usize::MAX), 0);
    }

    #[test]
    fn test_frame_number_roundtrip_exhaustive() {
        for f in 0..=u16::MAX {
            assert_eq!(decode_frame_number(encode_frame_number(f)), f);
        }
    }

    #[test]
    fn test_frame_number_msb_first() {
        assert_eq!(encode_frame_number(0x1234), [0x12, 0x34]);
        assert_eq!(decode_frame_number([0xAB, 0xCD]), 0xABCD);
    }

    #[test]
    fn test_frame_number_on_channels() {
        let mut frame = DmxFrame::zeroed();
        frame.set_frame_number(40000);
        assert_eq!(frame.frame_number(), 40000);
        assert_eq!(frame.get(0), (40000u16 >> 8) as u8);
        assert_eq!(frame.get(1), (40000u16 & 0xFF) as u8);
    }

    #[test]
    fn test_table_wraps_modulo_length() {
        let table = ChannelTable::from_rows(&[vec![1], vec![2], vec![3]]);
        assert_eq!(table.frame(0).unwrap().get(0), 1);
        assert_eq!(table.frame(4).unwrap().get(0), 2);
        assert_eq!(table.frame(300).unwrap().get(0), 1);
    }

    #[test]
    fn test_empty_table() {
        let table = ChannelTable::default();
        assert!(table.is_empty());
        assert!(table.frame(0).is_none());
    }
}
