//! Wire format for the strip controller.
//!
//! ```text
//! ┌──────┬──────┬─────────┬────────────┬─────────┬──────────┐
//! │ 0xA5 │ 0x5A │ COMMAND │ LENGTH     │ PAYLOAD │ CHECKSUM │
//! │ 1B   │ 1B   │ 1B      │ 2B (LE)    │ 0–5B    │ 1B       │
//! └──────┴──────┴─────────┴────────────┴─────────┴──────────┘
//! ```
//!
//! The checksum is CRC-8 (poly `0x07`, MSB first, init 0, no final xor) over
//! command, length and payload. The marker bytes are not covered.
//!
//! Nothing is acknowledged by the device, so there is no reply path here.

use std::{fmt, ops::Deref};

pub const START_OF_FRAME: [u8; 2] = [0xA5, 0x5A];

pub const CMD_SET_PIXEL: u8 = 0x10;
pub const CMD_BRIGHTNESS: u8 = 0x13;
pub const CMD_SHOW: u8 = 0x04;

const CRC8_POLY: u8 = 0x07;

/// Largest payload any command carries (SET_PIXEL).
pub const MAX_PAYLOAD_LEN: usize = 5;

/// Marker + command + length + payload + checksum.
pub const MAX_FRAME_LEN: usize = START_OF_FRAME.len() + 1 + 2 + MAX_PAYLOAD_LEN + 1;

pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, byte| crc8_update(crc, *byte))
}

#[inline]
fn crc8_update(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ CRC8_POLY
        } else {
            crc << 1
        };
    }
    crc
}

/// A command as it travels on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SetPixel { index: u16, r: u8, g: u8, b: u8 },
    Brightness(u8),
    Show,
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::SetPixel { .. } => CMD_SET_PIXEL,
            Self::Brightness(_) => CMD_BRIGHTNESS,
            Self::Show => CMD_SHOW,
        }
    }

    /// Writes the payload into `buf` and returns its length.
    fn write_payload(&self, buf: &mut [u8; MAX_PAYLOAD_LEN]) -> usize {
        match *self {
            Self::SetPixel { index, r, g, b } => {
                let [lo, hi] = index.to_le_bytes();
                *buf = [lo, hi, r, g, b];
                5
            }
            Self::Brightness(value) => {
                buf[0] = value;
                1
            }
            Self::Show => 0,
        }
    }

    fn from_parts(opcode: u8, payload: &[u8]) -> Option<Self> {
        match (opcode, payload) {
            (CMD_SET_PIXEL, &[lo, hi, r, g, b]) => Some(Self::SetPixel {
                index: u16::from_le_bytes([lo, hi]),
                r,
                g,
                b,
            }),
            (CMD_BRIGHTNESS, &[value]) => Some(Self::Brightness(value)),
            (CMD_SHOW, &[]) => Some(Self::Show),
            _ => None,
        }
    }

    pub fn encode(&self) -> Frame {
        let mut payload = [0; MAX_PAYLOAD_LEN];
        let payload_len = self.write_payload(&mut payload);
        let payload = &payload[..payload_len];

        let mut bytes = [0; MAX_FRAME_LEN];
        let [len_lo, len_hi] = (payload_len as u16).to_le_bytes();
        bytes[..2].copy_from_slice(&START_OF_FRAME);
        bytes[2] = self.opcode();
        bytes[3] = len_lo;
        bytes[4] = len_hi;
        bytes[5..5 + payload_len].copy_from_slice(payload);

        let checksum = crc8(&bytes[2..5 + payload_len]);
        bytes[5 + payload_len] = checksum;

        Frame {
            bytes,
            len: 6 + payload_len,
        }
    }
}

/// One encoded frame, held on the stack.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl Frame {
    pub fn command(&self) -> u8 {
        self.bytes[2]
    }

    /// Length field, payload bytes only.
    pub fn payload_len(&self) -> u16 {
        u16::from_le_bytes([self.bytes[3], self.bytes[4]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[5..self.len - 1]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[self.len - 1]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(")?;
        for (idx, byte) in self.as_bytes().iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        f.write_str(")")
    }
}

pub fn encode_set_pixel(index: u16, r: u8, g: u8, b: u8) -> Frame {
    Command::SetPixel { index, r, g, b }.encode()
}

/// Out-of-range values are clamped, never rejected.
pub fn encode_brightness(value: i32) -> Frame {
    Command::Brightness(value.clamp(0, 255) as u8).encode()
}

pub fn encode_show() -> Frame {
    Command::Show.encode()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    Checksum { expected: u8, actual: u8 },
    #[error("payload length {0} exceeds the largest known command")]
    Oversized(u16),
    #[error("unknown command {opcode:#04x} with {len} payload bytes")]
    UnknownCommand { opcode: u8, len: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecodeState {
    Marker0,
    Marker1,
    Opcode,
    LenLo,
    LenHi,
    Payload,
    Checksum,
}

/// Byte-at-a-time frame decoder, mirroring what the firmware does.
///
/// Garbage before a marker is skipped. After an error the decoder is back to
/// hunting for the next marker, so a single bad frame does not poison the
/// rest of the stream.
#[derive(Clone, Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    opcode: u8,
    expected_len: u16,
    payload: [u8; MAX_PAYLOAD_LEN],
    filled: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Marker0,
            opcode: 0,
            expected_len: 0,
            payload: [0; MAX_PAYLOAD_LEN],
            filled: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed one byte. Returns `Ok(Some(..))` once a whole frame has arrived.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Command>, DecodeError> {
        match self.state {
            DecodeState::Marker0 => {
                if byte == START_OF_FRAME[0] {
                    self.state = DecodeState::Marker1;
                }
            }
            DecodeState::Marker1 => {
                self.state = match byte {
                    _ if byte == START_OF_FRAME[1] => DecodeState::Opcode,
                    _ if byte == START_OF_FRAME[0] => DecodeState::Marker1,
                    _ => DecodeState::Marker0,
                };
            }
            DecodeState::Opcode => {
                self.opcode = byte;
                self.state = DecodeState::LenLo;
            }
            DecodeState::LenLo => {
                self.expected_len = u16::from(byte);
                self.state = DecodeState::LenHi;
            }
            DecodeState::LenHi => {
                self.expected_len |= u16::from(byte) << 8;
                if usize::from(self.expected_len) > MAX_PAYLOAD_LEN {
                    let len = self.expected_len;
                    self.reset();
                    return Err(DecodeError::Oversized(len));
                }
                self.filled = 0;
                self.state = if self.expected_len == 0 {
                    DecodeState::Checksum
                } else {
                    DecodeState::Payload
                };
            }
            DecodeState::Payload => {
                self.payload[self.filled] = byte;
                self.filled += 1;
                if self.filled == usize::from(self.expected_len) {
                    self.state = DecodeState::Checksum;
                }
            }
            DecodeState::Checksum => {
                let payload = &self.payload[..self.filled];
                let [len_lo, len_hi] = self.expected_len.to_le_bytes();
                let expected = payload
                    .iter()
                    .fold(crc8(&[self.opcode, len_lo, len_hi]), |crc, b| {
                        crc8_update(crc, *b)
                    });

                let result = if expected != byte {
                    Err(DecodeError::Checksum {
                        expected,
                        actual: byte,
                    })
                } else {
                    Command::from_parts(self.opcode, payload)
                        .map(Some)
                        .ok_or(DecodeError::UnknownCommand {
                            opcode: self.opcode,
                            len: payload.len(),
                        })
                };
                self.reset();
                return result;
            }
        }

        Ok(None)
    }

    /// Feed a chunk, collecting every complete command. Stops at the first
    /// error; bytes after it are dropped.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Result<Vec<Command>, DecodeError> {
        let mut commands = Vec::new();
        for &byte in bytes {
            if let Some(command) = self.feed(byte)? {
                commands.push(command);
            }
        }
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn crc8_check_value() {
        // Standard CRC-8/SMBUS check string.
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn show_frame_bytes() {
        let frame = encode_show();
        assert_eq!(frame.as_bytes(), &[0xA5, 0x5A, 0x04, 0x00, 0x00, 0xAB]);
        assert_eq!(frame.checksum(), crc8(&[0x04, 0x00, 0x00]));
        assert_eq!(frame.payload_len(), 0);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn set_pixel_frame_bytes() {
        let frame = encode_set_pixel(3, 255, 0, 128);
        let crc = crc8(&[0x10, 0x05, 0x00, 0x03, 0x00, 0xFF, 0x00, 0x80]);
        assert_eq!(crc, 0x99);
        assert_eq!(
            frame.as_bytes(),
            &[0xA5, 0x5A, 0x10, 0x05, 0x00, 0x03, 0x00, 0xFF, 0x00, 0x80, crc]
        );
        assert_eq!(frame.command(), CMD_SET_PIXEL);
        assert_eq!(frame.payload_len(), 5);
        assert_eq!(frame.len(), MAX_FRAME_LEN);
    }

    #[test]
    fn set_pixel_index_is_little_endian() {
        let frame = encode_set_pixel(0x0102, 1, 2, 3);
        assert_eq!(&frame.payload()[..2], &[0x02, 0x01]);
    }

    #[test]
    fn brightness_is_clamped() {
        assert_eq!(encode_brightness(300).payload(), &[255]);
        assert_eq!(encode_brightness(-4).payload(), &[0]);
        assert_eq!(
            encode_brightness(64).as_bytes(),
            &[0xA5, 0x5A, 0x13, 0x01, 0x00, 0x40, 0xF1]
        );
    }

    #[test]
    fn single_byte_change_changes_checksum() {
        let base = encode_set_pixel(7, 10, 20, 30);
        let tweaked = encode_set_pixel(7, 10, 21, 30);
        assert_ne!(base.checksum(), tweaked.checksum());
    }

    #[test]
    fn decoder_skips_garbage_and_reads_stream() {
        let mut stream = vec![0x00, 0xA5, 0x13];
        stream.extend_from_slice(&encode_set_pixel(42, 1, 2, 3));
        stream.extend_from_slice(&encode_brightness(9));
        stream.extend_from_slice(&encode_show());

        let commands = FrameDecoder::new().feed_bytes(&stream).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::SetPixel {
                    index: 42,
                    r: 1,
                    g: 2,
                    b: 3
                },
                Command::Brightness(9),
                Command::Show,
            ]
        );
    }

    #[test]
    fn decoder_rejects_bad_checksum_then_recovers() {
        let mut corrupt = encode_show().as_bytes().to_vec();
        *corrupt.last_mut().unwrap() ^= 0xFF;

        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            decoder.feed_bytes(&corrupt),
            Err(DecodeError::Checksum { .. })
        ));
        assert_eq!(decoder.feed_bytes(&encode_show()).unwrap(), vec![Command::Show]);
    }

    #[test]
    fn decoder_rejects_oversized_length() {
        let mut decoder = FrameDecoder::new();
        let result = decoder.feed_bytes(&[0xA5, 0x5A, 0x10, 0x40, 0x00]);
        assert_eq!(result, Err(DecodeError::Oversized(0x40)));
    }

    proptest! {
        #[test]
        fn crc8_detects_any_single_byte_change(
            data in proptest::collection::vec(any::<u8>(), 1..16),
            pos in any::<proptest::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut changed = data.clone();
            let idx = pos.index(changed.len());
            changed[idx] ^= flip;
            prop_assert_eq!(crc8(&data), crc8(&data));
            prop_assert_ne!(crc8(&data), crc8(&changed));
        }

        #[test]
        fn decoder_accepts_every_encoded_set_pixel(index: u16, r: u8, g: u8, b: u8) {
            let command = Command::SetPixel { index, r, g, b };
            let decoded = FrameDecoder::new().feed_bytes(&command.encode()).unwrap();
            prop_assert_eq!(decoded, vec![command]);
        }
    }
}
